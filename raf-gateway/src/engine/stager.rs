//! Batch staging of request records into session working tables

use raf_common::{DiagnosisRecord, MembershipRecord};
use tracing::debug;

use super::ScoringSession;
use crate::error::{BackendError, GatewayError};

/// What one stage call wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub membership_rows: u64,
    pub membership_batches: usize,
    pub diagnosis_rows: u64,
    pub diagnosis_batches: usize,
}

/// Writes record collections in fixed-size batches
#[derive(Debug, Clone, Copy)]
pub struct BatchStager {
    batch_size: usize,
}

impl BatchStager {
    /// Stager writing at most `batch_size` records per statement (minimum 1)
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Prepare working tables and write every record.
    ///
    /// Any failure is a StagingFailure; the caller owns the session and
    /// rolls it back.
    pub async fn stage(
        &self,
        session: &mut dyn ScoringSession,
        memberships: &[MembershipRecord],
        diagnoses: &[DiagnosisRecord],
    ) -> Result<StageReport, GatewayError> {
        session.prepare().await.map_err(GatewayError::Staging)?;

        let mut report = StageReport::default();

        debug!("Inserting {} membership rows", memberships.len());
        for (i, batch) in memberships.chunks(self.batch_size).enumerate() {
            let written = session
                .insert_memberships(batch)
                .await
                .map_err(GatewayError::Staging)?;
            check_written(batch.len(), written)?;
            report.membership_rows += written;
            report.membership_batches += 1;
            debug!("Membership batch {} staged ({} rows)", i + 1, written);
        }

        debug!("Inserting {} diagnosis rows", diagnoses.len());
        for (i, batch) in diagnoses.chunks(self.batch_size).enumerate() {
            let written = session
                .insert_diagnoses(batch)
                .await
                .map_err(GatewayError::Staging)?;
            check_written(batch.len(), written)?;
            report.diagnosis_rows += written;
            report.diagnosis_batches += 1;
            debug!("Diagnosis batch {} staged ({} rows)", i + 1, written);
        }

        Ok(report)
    }
}

fn check_written(expected: usize, written: u64) -> Result<(), GatewayError> {
    let expected = expected as u64;
    if written != expected {
        return Err(GatewayError::Staging(BackendError::ShortWrite { expected, written }));
    }
    Ok(())
}
