//! Shared fixtures for raf-gateway integration tests
//!
//! - Request builders matching the API's wire format
//! - `ScriptedBackend`: in-process scoring engine with failure injection
//! - In-memory SQLite backend construction

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use raf_common::config::InvalidationPolicy;
use raf_common::{DiagnosisRecord, MembershipRecord, ProcessRequest, ResultRow};
use raf_gateway::engine::{
    BatchStager, ComputationInvoker, ScoringBackend, ScoringSession, SqliteBackend,
};
use raf_gateway::{BackendError, MemoizationCache, Orchestrator};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Request fixtures
// =============================================================================

pub fn member(id: &str) -> MembershipRecord {
    MembershipRecord {
        member_id: id.to_string(),
        dob: NaiveDate::from_ymd_opt(1950, 1, 1).unwrap(),
        gender: "F".to_string(),
        ra_type: "CN".to_string(),
        hospice: "N".to_string(),
        ltimcaid: "N".to_string(),
        nemcaid: "N".to_string(),
        orec: "0".to_string(),
    }
}

pub fn diagnosis(id: &str, code: &str) -> DiagnosisRecord {
    DiagnosisRecord {
        member_id: id.to_string(),
        from_dos: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        thru_dos: NaiveDate::from_ymd_opt(2023, 1, 31).unwrap(),
        dx_code: code.to_string(),
        qualification_flag: 1,
        unqualification_reason: String::new(),
    }
}

/// The single-member E11.9 scenario for payment year 2023
pub fn sample_request() -> ProcessRequest {
    ProcessRequest {
        dos_year: 2023,
        memberships: vec![member("M1")],
        diagnoses: vec![diagnosis("M1", "E11.9")],
    }
}

/// `sample_request` as the JSON body a client would post
pub fn sample_body() -> serde_json::Value {
    json!({
        "dos_year": 2023,
        "memberships": [{
            "MemberID": "M1",
            "DOB": "1950-01-01",
            "Gender": "F",
            "RAType": "CN",
            "Hospice": "N",
            "LTIMCAID": "N",
            "NEMCAID": "N",
            "OREC": "0"
        }],
        "diagnoses": [{
            "MemberID": "M1",
            "FromDOS": "2023-01-01",
            "ThruDOS": "2023-01-31",
            "DxCode": "E11.9",
            "QualificationFlag": 1,
            "UnqualificationReason": ""
        }]
    })
}

pub fn request_for_year(year: i32) -> ProcessRequest {
    ProcessRequest {
        dos_year: year,
        ..sample_request()
    }
}

// =============================================================================
// Scripted backend
// =============================================================================

/// Call counters and failure budget shared by a backend and its sessions
#[derive(Default)]
pub struct Script {
    pub begins: AtomicUsize,
    pub invocations: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    /// Upcoming invocations that fail
    pub failing_invocations: AtomicUsize,
    /// Upcoming stagings that fail
    pub failing_stagings: AtomicUsize,
    /// Rows committed across all sessions
    pub committed_members: AtomicUsize,
}

impl Script {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_next_invocations(&self, n: usize) {
        self.failing_invocations.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_stagings(&self, n: usize) {
        self.failing_stagings.store(n, Ordering::SeqCst);
    }
}

/// Take one unit from a failure budget, if any is left
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Deterministic in-process engine: one row per staged member with its
/// diagnosis count
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    pub script: Arc<Script>,
    /// Time each invocation takes
    pub delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ScoringBackend for ScriptedBackend {
    async fn begin(&self) -> Result<Box<dyn ScoringSession>, BackendError> {
        self.script.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            delay: self.delay,
            members: Vec::new(),
            diagnoses: Vec::new(),
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    delay: Duration,
    members: Vec<MembershipRecord>,
    diagnoses: Vec<DiagnosisRecord>,
}

#[async_trait]
impl ScoringSession for ScriptedSession {
    async fn prepare(&mut self) -> Result<(), BackendError> {
        if take_failure(&self.script.failing_stagings) {
            return Err(BackendError::Unavailable("working tables unavailable".into()));
        }
        self.members.clear();
        self.diagnoses.clear();
        Ok(())
    }

    async fn insert_memberships(&mut self, batch: &[MembershipRecord]) -> Result<u64, BackendError> {
        self.members.extend_from_slice(batch);
        Ok(batch.len() as u64)
    }

    async fn insert_diagnoses(&mut self, batch: &[DiagnosisRecord]) -> Result<u64, BackendError> {
        self.diagnoses.extend_from_slice(batch);
        Ok(batch.len() as u64)
    }

    async fn invoke(&mut self, dos_year: i32) -> Result<Vec<ResultRow>, BackendError> {
        self.script.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if take_failure(&self.script.failing_invocations) {
            return Err(BackendError::Unavailable("scoring routine raised".into()));
        }

        let mut members: Vec<&MembershipRecord> = self.members.iter().collect();
        members.sort_by(|a, b| a.member_id.cmp(&b.member_id));

        Ok(members
            .into_iter()
            .map(|m| {
                let dx_count = self
                    .diagnoses
                    .iter()
                    .filter(|d| d.member_id == m.member_id)
                    .count();
                let mut row = ResultRow::new();
                row.insert("MemberID".to_string(), json!(m.member_id));
                row.insert("PmtYear".to_string(), json!(dos_year));
                row.insert("DxCount".to_string(), json!(dx_count));
                row
            })
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.script.commits.fetch_add(1, Ordering::SeqCst);
        self.script
            .committed_members
            .fetch_add(self.members.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.script.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Orchestrator over `backend` with the default batch size and no TTL
pub fn orchestrator(
    backend: Arc<dyn ScoringBackend>,
    capacity: usize,
    policy: InvalidationPolicy,
) -> Orchestrator {
    Orchestrator::new(
        backend,
        MemoizationCache::new(capacity, None),
        BatchStager::new(1000),
        ComputationInvoker::new(Some(Duration::from_secs(5))),
        policy,
    )
}

// =============================================================================
// SQLite backend
// =============================================================================

/// Routine that echoes staged membership rows with their diagnosis counts
pub const ECHO_ROUTINE: &str = r#"
    SELECT m.MemberID,
           m.BirthDate,
           ?1 AS PmtYear,
           (SELECT COUNT(*) FROM temp.TempDiagnosis d WHERE d.MemberID = m.MemberID) AS DxCount,
           (SELECT MAX(d.QualificationFlag) FROM temp.TempDiagnosis d WHERE d.MemberID = m.MemberID) AS QualificationFlag
    FROM temp.TempMembership m
    ORDER BY m.MemberID
"#;

/// Routine that only reports how many rows were staged
pub const COUNT_ROUTINE: &str = r#"
    SELECT ?1 AS PmtYear,
           (SELECT COUNT(*) FROM temp.TempMembership) AS Members,
           (SELECT COUNT(*) FROM temp.TempDiagnosis) AS Diagnoses
"#;

/// Single-connection in-memory SQLite backend running `statement`
pub async fn sqlite_backend(statement: &str) -> SqliteBackend {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Should open in-memory database");
    SqliteBackend::new(pool, statement)
}

/// Real SQLite sessions whose diagnosis inserts fail while `failures` lasts.
/// Membership rows are already written when the failure hits.
#[derive(Clone)]
pub struct StagingFaultBackend {
    pub inner: SqliteBackend,
    pub failures: Arc<AtomicUsize>,
}

impl StagingFaultBackend {
    pub fn new(inner: SqliteBackend, failures: usize) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl ScoringBackend for StagingFaultBackend {
    async fn begin(&self) -> Result<Box<dyn ScoringSession>, BackendError> {
        Ok(Box::new(StagingFaultSession {
            inner: self.inner.begin().await?,
            failures: self.failures.clone(),
        }))
    }
}

struct StagingFaultSession {
    inner: Box<dyn ScoringSession>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl ScoringSession for StagingFaultSession {
    async fn prepare(&mut self) -> Result<(), BackendError> {
        self.inner.prepare().await
    }

    async fn insert_memberships(&mut self, batch: &[MembershipRecord]) -> Result<u64, BackendError> {
        self.inner.insert_memberships(batch).await
    }

    async fn insert_diagnoses(&mut self, batch: &[DiagnosisRecord]) -> Result<u64, BackendError> {
        if take_failure(&self.failures) {
            return Err(BackendError::Unavailable("diagnosis insert rejected".into()));
        }
        self.inner.insert_diagnoses(batch).await
    }

    async fn invoke(&mut self, dos_year: i32) -> Result<Vec<ResultRow>, BackendError> {
        self.inner.invoke(dos_year).await
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.inner.rollback().await
    }
}
