//! Scoring routine invocation

use raf_common::ResultRow;
use std::time::Duration;
use tracing::debug;

use super::ScoringSession;
use crate::error::{BackendError, GatewayError};

/// Calls the scoring routine on a staged session, bounded by a timeout.
///
/// Never retries; a failure is reported once as an InvocationFailure.
#[derive(Debug, Clone, Copy)]
pub struct ComputationInvoker {
    timeout: Option<Duration>,
}

impl ComputationInvoker {
    /// `None` waits for the routine indefinitely
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn invoke(
        &self,
        session: &mut dyn ScoringSession,
        dos_year: i32,
    ) -> Result<Vec<ResultRow>, GatewayError> {
        debug!("Executing scoring routine for payment year {}", dos_year);

        let call = session.invoke(dos_year);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackendError::Timeout(limit))
                .and_then(|r| r),
            None => call.await,
        };

        let rows = result.map_err(GatewayError::Invocation)?;
        debug!("Retrieved {} records from scoring routine", rows.len());
        Ok(rows)
    }
}
