//! # RAF Common Library
//!
//! Shared code for the RAF gateway including:
//! - Membership/diagnosis record models and request validation
//! - Configuration loading
//! - Common error type
//! - Staging database pool construction
//! - Timestamp helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{DiagnosisRecord, MembershipRecord, ProcessRequest, ResultRow};
