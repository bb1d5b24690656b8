//! Embedded migrations and the scoped sequence counters.

use chrono::{Datelike, NaiveDate};
use sqlx::migrate::Migrator;
use sqlx::PgConnection;

use crate::error::Result;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Allocate the next value of a named counter.
///
/// The upsert takes a row lock on the counter that is held until the caller's
/// transaction ends, so concurrent callers are serialized. The increment is
/// part of that transaction: a rollback undoes it and the same value is
/// handed out again, so committed numbers stay gap-free.
pub async fn next_sequence(conn: &mut PgConnection, scope: &str) -> Result<i64> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sequence_counters (scope, last_value)
        VALUES ($1, 1)
        ON CONFLICT (scope) DO UPDATE
            SET last_value = sequence_counters.last_value + 1,
                updated_at = NOW()
        RETURNING last_value
        "#,
    )
    .bind(scope)
    .fetch_one(&mut *conn)
    .await?;

    Ok(value)
}

pub fn queue_scope(department: &str, date: NaiveDate) -> String {
    format!("queue:{}:{}", department, date)
}

pub fn patient_scope(year: i32) -> String {
    format!("patient:{}", year)
}

pub fn visit_scope(date: NaiveDate) -> String {
    format!("visit:{}", date)
}

/// `PAT-2026-0042`
pub fn registration_number(year: i32, value: i64) -> String {
    format!("PAT-{}-{:04}", year, value)
}

/// `VIS-2026-10-19-0007`
pub fn visit_number(date: NaiveDate, value: i64) -> String {
    format!(
        "VIS-{:04}-{:02}-{:02}-{:04}",
        date.year(),
        date.month(),
        date.day(),
        value
    )
}
