//! SQLite scoring engine reached through sqlx
//!
//! Working tables are created in the connection's `temp` schema, so they are
//! private to the session's pooled connection. The routine is a configured
//! SQL statement that reads them, with `?1` bound to the payment year.

use async_trait::async_trait;
use raf_common::{DiagnosisRecord, MembershipRecord, ResultRow};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, QueryBuilder, Row, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef};
use std::sync::Arc;

use super::{ScoringBackend, ScoringSession};
use crate::error::BackendError;

const CREATE_WORKING_TABLES: &str = r#"
    DROP TABLE IF EXISTS temp.TempMembership;
    DROP TABLE IF EXISTS temp.TempDiagnosis;

    CREATE TEMP TABLE TempMembership (
        MemberID VARCHAR(50) NOT NULL,
        BirthDate DATE NOT NULL,
        Gender VARCHAR(1) NULL,
        RAType VARCHAR(10) NULL,
        Hospice VARCHAR(1) NULL,
        LTIMCAID VARCHAR(1) NULL,
        NEMCAID VARCHAR(1) NULL,
        OREC VARCHAR(1) NULL
    );

    CREATE TEMP TABLE TempDiagnosis (
        MemberID VARCHAR(50) NOT NULL,
        FromDOS DATE NOT NULL,
        ThruDOS DATE NOT NULL,
        DxCode VARCHAR(20) NOT NULL,
        QualificationFlag INTEGER NOT NULL,
        UnqualificationReason VARCHAR(20)
    );
"#;

/// SQLite's upper bound on bound parameters in one statement
const MAX_BIND_PARAMS: usize = 32766;
const MEMBERSHIP_COLUMNS: usize = 8;
const DIAGNOSIS_COLUMNS: usize = 6;

/// Rows per INSERT so a statement never exceeds [`MAX_BIND_PARAMS`]. A
/// configured batch larger than this is written as several statements inside
/// the same transaction.
fn rows_per_statement(columns: usize) -> usize {
    MAX_BIND_PARAMS / columns
}

const DROP_WORKING_TABLES: &str = r#"
    DROP TABLE IF EXISTS temp.TempMembership;
    DROP TABLE IF EXISTS temp.TempDiagnosis;
"#;

/// Scoring backend over a SQLite pool
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    statement: Arc<str>,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool, statement: impl Into<Arc<str>>) -> Self {
        Self {
            pool,
            statement: statement.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ScoringBackend for SqliteBackend {
    async fn begin(&self) -> Result<Box<dyn ScoringSession>, BackendError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteSession {
            tx,
            statement: self.statement.clone(),
        }))
    }
}

/// Session bound to one pooled connection and its open transaction
pub struct SqliteSession {
    tx: Transaction<'static, Sqlite>,
    statement: Arc<str>,
}

#[async_trait]
impl ScoringSession for SqliteSession {
    async fn prepare(&mut self) -> Result<(), BackendError> {
        (&mut *self.tx)
            .execute(sqlx::raw_sql(CREATE_WORKING_TABLES))
            .await?;
        Ok(())
    }

    async fn insert_memberships(&mut self, batch: &[MembershipRecord]) -> Result<u64, BackendError> {
        let mut written = 0;

        for rows in batch.chunks(rows_per_statement(MEMBERSHIP_COLUMNS)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO temp.TempMembership \
                 (MemberID, BirthDate, Gender, RAType, Hospice, LTIMCAID, NEMCAID, OREC) ",
            );
            builder.push_values(rows, |mut row, m| {
                row.push_bind(m.member_id.clone())
                    .push_bind(m.dob)
                    .push_bind(m.gender.clone())
                    .push_bind(m.ra_type.clone())
                    .push_bind(m.hospice.clone())
                    .push_bind(m.ltimcaid.clone())
                    .push_bind(m.nemcaid.clone())
                    .push_bind(m.orec.clone());
            });

            written += builder.build().execute(&mut *self.tx).await?.rows_affected();
        }

        Ok(written)
    }

    async fn insert_diagnoses(&mut self, batch: &[DiagnosisRecord]) -> Result<u64, BackendError> {
        let mut written = 0;

        for rows in batch.chunks(rows_per_statement(DIAGNOSIS_COLUMNS)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO temp.TempDiagnosis \
                 (MemberID, FromDOS, ThruDOS, DxCode, QualificationFlag, UnqualificationReason) ",
            );
            builder.push_values(rows, |mut row, d| {
                row.push_bind(d.member_id.clone())
                    .push_bind(d.from_dos)
                    .push_bind(d.thru_dos)
                    .push_bind(d.dx_code.clone())
                    .push_bind(d.qualification_flag)
                    .push_bind(d.unqualification_reason.clone());
            });

            written += builder.build().execute(&mut *self.tx).await?.rows_affected();
        }

        Ok(written)
    }

    async fn invoke(&mut self, dos_year: i32) -> Result<Vec<ResultRow>, BackendError> {
        let rows = sqlx::query(&self.statement)
            .bind(dos_year)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(to_result_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let mut tx = self.tx;
        (&mut *tx).execute(sqlx::raw_sql(DROP_WORKING_TABLES)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Normalize one routine output row to JSON scalars
fn to_result_row(row: &SqliteRow) -> Result<ResultRow, BackendError> {
    let mut out = ResultRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else if let Ok(v) = row.try_get::<i64, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            serde_json::Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| {
                    BackendError::MalformedResult(format!(
                        "column {} holds a non-finite number",
                        column.name()
                    ))
                })?
        } else if let Ok(v) = row.try_get::<String, _>(i) {
            Value::String(v)
        } else {
            return Err(BackendError::MalformedResult(format!(
                "column {} has unsupported type {}",
                column.name(),
                raw.type_info().name()
            )));
        };

        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}
