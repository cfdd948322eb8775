//! Scoring engine access
//!
//! A [`ScoringBackend`] opens one [`ScoringSession`] per computation. The
//! session is a transactional scope: working tables, staged rows and the
//! routine call all live on it, and nothing is visible outside it until
//! [`ScoringSession::commit`]. Dropping a session without committing rolls it
//! back.

mod invoker;
mod sqlite;
mod stager;

pub use invoker::ComputationInvoker;
pub use sqlite::SqliteBackend;
pub use stager::{BatchStager, StageReport};

use async_trait::async_trait;
use raf_common::{DiagnosisRecord, MembershipRecord, ResultRow};

use crate::error::BackendError;

/// Source of scoring sessions
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Open a new exclusive session with its own transaction
    async fn begin(&self) -> Result<Box<dyn ScoringSession>, BackendError>;
}

/// One transactional scope on the scoring engine
#[async_trait]
pub trait ScoringSession: Send {
    /// Create empty working tables for this session
    async fn prepare(&mut self) -> Result<(), BackendError>;

    /// Write one batch of membership rows; returns rows written
    async fn insert_memberships(&mut self, batch: &[MembershipRecord]) -> Result<u64, BackendError>;

    /// Write one batch of diagnosis rows; returns rows written
    async fn insert_diagnoses(&mut self, batch: &[DiagnosisRecord]) -> Result<u64, BackendError>;

    /// Run the scoring routine over the staged rows
    async fn invoke(&mut self, dos_year: i32) -> Result<Vec<ResultRow>, BackendError>;

    /// Make the session's work durable and end it
    async fn commit(self: Box<Self>) -> Result<(), BackendError>;

    /// Discard the session's work and end it
    async fn rollback(self: Box<Self>) -> Result<(), BackendError>;
}
