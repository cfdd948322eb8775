//! Canonical cache keys
//!
//! A key is the SHA-256 of a canonical JSON document:
//!
//! ```text
//! ["raf-key/v1", <dos_year>, [<membership>...], [<diagnosis>...]]
//! ```
//!
//! Each record is encoded as an array of `[field, value]` pairs sorted by
//! wire field name, and each collection is sorted by those encodings. Field
//! order and record order in the request therefore never change the key,
//! while duplicate records still do (collections are multisets).

use raf_common::{DiagnosisRecord, MembershipRecord, ProcessRequest};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

const KEY_VERSION: &str = "raf-key/v1";

/// Order-independent identity of a scoring request
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Build the key for `request`
    pub fn from_request(request: &ProcessRequest) -> Self {
        let digest = Sha256::digest(canonical_encoding(request).as_bytes());
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Field-name/value pairs of a record, in any order
trait CanonicalFields {
    fn field_pairs(&self) -> Vec<(&'static str, Value)>;
}

impl CanonicalFields for MembershipRecord {
    fn field_pairs(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("MemberID", json!(self.member_id)),
            ("DOB", json!(self.dob.to_string())),
            ("Gender", json!(self.gender)),
            ("RAType", json!(self.ra_type)),
            ("Hospice", json!(self.hospice)),
            ("LTIMCAID", json!(self.ltimcaid)),
            ("NEMCAID", json!(self.nemcaid)),
            ("OREC", json!(self.orec)),
        ]
    }
}

impl CanonicalFields for DiagnosisRecord {
    fn field_pairs(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("MemberID", json!(self.member_id)),
            ("FromDOS", json!(self.from_dos.to_string())),
            ("ThruDOS", json!(self.thru_dos.to_string())),
            ("DxCode", json!(self.dx_code)),
            ("QualificationFlag", json!(self.qualification_flag)),
            ("UnqualificationReason", json!(self.unqualification_reason)),
        ]
    }
}

fn canonical_record<R: CanonicalFields>(record: &R) -> Value {
    let mut pairs = record.field_pairs();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Value::Array(
        pairs
            .into_iter()
            .map(|(name, value)| json!([name, value]))
            .collect(),
    )
}

fn canonical_collection<R: CanonicalFields>(records: &[R]) -> Value {
    let mut encoded: Vec<(String, Value)> = records
        .iter()
        .map(|r| {
            let value = canonical_record(r);
            (value.to_string(), value)
        })
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0));
    Value::Array(encoded.into_iter().map(|(_, v)| v).collect())
}

/// Canonical document hashed into the key
pub fn canonical_encoding(request: &ProcessRequest) -> String {
    json!([
        KEY_VERSION,
        request.dos_year,
        canonical_collection(&request.memberships),
        canonical_collection(&request.diagnoses),
    ])
    .to_string()
}
