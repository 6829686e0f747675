//! Identifier and timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Generates a new run id.
///
/// Ids are UUID v7, so lexical order follows creation order.
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::now_v7().to_string()
}

/// Formats a timestamp as RFC 3339 with millisecond precision.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
