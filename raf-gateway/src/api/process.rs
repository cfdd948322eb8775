//! Scoring endpoint
//!
//! POST /process_data stages the posted records, runs the scoring routine and
//! returns its rows, memoized per canonical request.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use raf_common::{ProcessRequest, ResultRow};
use serde::{Serialize, Serializer};
use tracing::info;

use crate::cache::CachedRows;
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::CacheStatus;
use crate::AppState;

/// Success body of POST /process_data
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub cache_status: CacheStatus,
    pub count: usize,
    #[serde(serialize_with = "serialize_rows")]
    pub results: CachedRows,
    pub timestamp: String,
}

fn serialize_rows<S: Serializer>(rows: &CachedRows, serializer: S) -> Result<S::Ok, S::Error> {
    <[ResultRow]>::serialize(rows.as_slice(), serializer)
}

/// Malformed JSON is a validation failure; anything refused before parsing
/// keeps the rejection's own status
fn reject(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
            ApiError::Validation(rejection.body_text())
        }
        other => ApiError::Rejected {
            status: other.status(),
            message: other.body_text(),
        },
    }
}

/// POST /process_data
pub async fn process_data(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Json<ProcessResponse>> {
    let Json(request) = payload.map_err(reject)?;

    info!(
        "Processing data for {} members and {} diagnoses",
        request.memberships.len(),
        request.diagnoses.len()
    );

    let outcome = state.orchestrator.process(&request).await?;

    info!(
        "Successfully processed {} records ({})",
        outcome.rows.len(),
        outcome.cache_status.as_str()
    );

    Ok(Json(ProcessResponse {
        status: "success",
        message: "Data processed successfully",
        cache_status: outcome.cache_status,
        count: outcome.rows.len(),
        results: outcome.rows,
        timestamp: raf_common::time::iso_timestamp(),
    }))
}
