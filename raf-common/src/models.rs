//! Request and result models
//!
//! Wire field names follow the scoring routine's column names (`MemberID`,
//! `DOB`, `FromDOS`, ...), so the JSON body and the staging tables line up.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One output row of the scoring routine, column name → scalar value.
///
/// Column order is preserved as returned by the routine.
pub type ResultRow = serde_json::Map<String, serde_json::Value>;

/// Declared widths of the staging table columns
pub mod widths {
    pub const MEMBER_ID: usize = 50;
    pub const FLAG: usize = 1;
    pub const RA_TYPE: usize = 10;
    pub const DX_CODE: usize = 20;
    pub const UNQUALIFICATION_REASON: usize = 20;
}

fn default_medicaid_flag() -> String {
    "N".to_string()
}

/// Member enrollment row consumed by the scoring routine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MembershipRecord {
    #[serde(rename = "MemberID")]
    pub member_id: String,

    /// Staged into the `BirthDate` column
    #[serde(rename = "DOB")]
    pub dob: NaiveDate,

    #[serde(rename = "Gender")]
    pub gender: String,

    /// Plan type code
    #[serde(rename = "RAType")]
    pub ra_type: String,

    #[serde(rename = "Hospice")]
    pub hospice: String,

    /// Long-term institutional Medicaid flag
    #[serde(rename = "LTIMCAID", default = "default_medicaid_flag")]
    pub ltimcaid: String,

    /// New-enrollee Medicaid flag
    #[serde(rename = "NEMCAID", default = "default_medicaid_flag")]
    pub nemcaid: String,

    /// Original reason for entitlement code
    #[serde(rename = "OREC")]
    pub orec: String,
}

/// Diagnosis observed for a member over a service period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    #[serde(rename = "MemberID")]
    pub member_id: String,

    #[serde(rename = "FromDOS")]
    pub from_dos: NaiveDate,

    #[serde(rename = "ThruDOS")]
    pub thru_dos: NaiveDate,

    #[serde(rename = "DxCode")]
    pub dx_code: String,

    #[serde(rename = "QualificationFlag")]
    pub qualification_flag: i64,

    /// Only meaningful when the qualification flag marks the row as disqualified
    #[serde(rename = "UnqualificationReason", default)]
    pub unqualification_reason: String,
}

/// Body of `POST /process_data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub dos_year: i32,
    pub memberships: Vec<MembershipRecord>,
    pub diagnoses: Vec<DiagnosisRecord>,
}

impl ProcessRequest {
    /// Check every record against the staging column rules.
    ///
    /// Runs before anything touches the cache or the database. Member
    /// references from diagnoses are deliberately not cross-checked.
    pub fn validate(&self) -> Result<()> {
        for (i, m) in self.memberships.iter().enumerate() {
            m.validate()
                .map_err(|e| Error::InvalidInput(format!("memberships[{}]: {}", i, e)))?;
        }
        for (i, d) in self.diagnoses.iter().enumerate() {
            d.validate()
                .map_err(|e| Error::InvalidInput(format!("diagnoses[{}]: {}", i, e)))?;
        }
        Ok(())
    }
}

impl MembershipRecord {
    fn validate(&self) -> std::result::Result<(), String> {
        check_required("MemberID", &self.member_id, widths::MEMBER_ID)?;
        check_width("Gender", &self.gender, widths::FLAG)?;
        check_width("RAType", &self.ra_type, widths::RA_TYPE)?;
        check_width("Hospice", &self.hospice, widths::FLAG)?;
        check_width("LTIMCAID", &self.ltimcaid, widths::FLAG)?;
        check_width("NEMCAID", &self.nemcaid, widths::FLAG)?;
        check_width("OREC", &self.orec, widths::FLAG)
    }
}

impl DiagnosisRecord {
    fn validate(&self) -> std::result::Result<(), String> {
        check_required("MemberID", &self.member_id, widths::MEMBER_ID)?;
        check_required("DxCode", &self.dx_code, widths::DX_CODE)?;
        check_width(
            "UnqualificationReason",
            &self.unqualification_reason,
            widths::UNQUALIFICATION_REASON,
        )?;
        if self.from_dos > self.thru_dos {
            return Err(format!(
                "FromDOS {} is after ThruDOS {}",
                self.from_dos, self.thru_dos
            ));
        }
        Ok(())
    }
}

fn check_required(field: &str, value: &str, max: usize) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    check_width(field, value, max)
}

fn check_width(field: &str, value: &str, max: usize) -> std::result::Result<(), String> {
    let len = value.chars().count();
    if len > max {
        return Err(format!("{} exceeds {} characters (got {})", field, max, len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn membership_json() -> serde_json::Value {
        json!({
            "MemberID": "M1",
            "DOB": "1950-01-01",
            "Gender": "F",
            "RAType": "CN",
            "Hospice": "N",
            "LTIMCAID": "N",
            "NEMCAID": "N",
            "OREC": "0"
        })
    }

    fn diagnosis() -> DiagnosisRecord {
        DiagnosisRecord {
            member_id: "M1".to_string(),
            from_dos: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            thru_dos: NaiveDate::from_ymd_opt(2023, 1, 31).unwrap(),
            dx_code: "E11.9".to_string(),
            qualification_flag: 1,
            unqualification_reason: String::new(),
        }
    }

    #[test]
    fn test_membership_parses_wire_names() {
        let m: MembershipRecord = serde_json::from_value(membership_json()).unwrap();
        assert_eq!(m.member_id, "M1");
        assert_eq!(m.dob, NaiveDate::from_ymd_opt(1950, 1, 1).unwrap());
        assert_eq!(m.ra_type, "CN");
    }

    #[test]
    fn test_medicaid_flags_default_to_n() {
        let mut value = membership_json();
        let obj = value.as_object_mut().unwrap();
        obj.remove("LTIMCAID");
        obj.remove("NEMCAID");

        let m: MembershipRecord = serde_json::from_value(value).unwrap();
        assert_eq!(m.ltimcaid, "N");
        assert_eq!(m.nemcaid, "N");
    }

    #[test]
    fn test_membership_rejects_unknown_fields() {
        let mut value = membership_json();
        value["Extra"] = json!("x");
        assert!(serde_json::from_value::<MembershipRecord>(value).is_err());
    }

    #[test]
    fn test_membership_requires_dob() {
        let mut value = membership_json();
        value.as_object_mut().unwrap().remove("DOB");
        assert!(serde_json::from_value::<MembershipRecord>(value).is_err());
    }

    #[test]
    fn test_dob_serializes_as_iso_date() {
        let m: MembershipRecord = serde_json::from_value(membership_json()).unwrap();
        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back["DOB"], "1950-01-01");
    }

    #[test]
    fn test_unqualification_reason_defaults_empty() {
        let d: DiagnosisRecord = serde_json::from_value(json!({
            "MemberID": "M1",
            "FromDOS": "2023-01-01",
            "ThruDOS": "2023-01-31",
            "DxCode": "E11.9",
            "QualificationFlag": 1
        }))
        .unwrap();
        assert_eq!(d.unqualification_reason, "");
        assert_eq!(d.qualification_flag, 1);
    }

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let request = ProcessRequest {
            dos_year: 2023,
            memberships: vec![serde_json::from_value(membership_json()).unwrap()],
            diagnoses: vec![diagnosis()],
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_service_period() {
        let mut d = diagnosis();
        std::mem::swap(&mut d.from_dos, &mut d.thru_dos);
        let request = ProcessRequest {
            dos_year: 2023,
            memberships: vec![],
            diagnoses: vec![d],
        };

        let err = request.validate().unwrap_err().to_string();
        assert!(err.contains("diagnoses[0]"), "{}", err);
        assert!(err.contains("after ThruDOS"), "{}", err);
    }

    #[test]
    fn test_validate_rejects_wide_flag() {
        let mut m: MembershipRecord = serde_json::from_value(membership_json()).unwrap();
        m.hospice = "NO".to_string();
        let request = ProcessRequest {
            dos_year: 2023,
            memberships: vec![m],
            diagnoses: vec![],
        };

        let err = request.validate().unwrap_err().to_string();
        assert!(err.contains("Hospice"), "{}", err);
    }

    #[test]
    fn test_validate_rejects_empty_dx_code() {
        let mut d = diagnosis();
        d.dx_code = "  ".to_string();
        let request = ProcessRequest {
            dos_year: 2023,
            memberships: vec![],
            diagnoses: vec![d],
        };
        assert!(matches!(request.validate(), Err(Error::InvalidInput(_))));
    }
}
