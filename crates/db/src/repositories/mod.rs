use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use deferra_core::store::StoreError;

pub mod audit;
pub mod deferral;
pub mod notification;
pub mod user;

pub use deferral::SqlDeferralStore;
pub use notification::{Inbox, SqlNotificationOutbox, StoredNotification, INBOX_LIMIT};
pub use user::SqlIdentityDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Fixed-width UTC text so lexical order in SQLite matches time order.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_optional_timestamp(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(encode_timestamp)
}

pub(crate) fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Encode(format!("cannot encode `{column}`: {error}")))
}

pub(crate) fn parse_json<T: DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid JSON in `{column}`: {error}")))
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown value in `{column}`: `{value}`")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use deferra_core::store::StoreError;

    use super::{encode_timestamp, parse_timestamp, parse_u32, RepositoryError};

    #[test]
    fn encoded_timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).single().expect("early");
        let late = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).single().expect("late");

        let early_text = encode_timestamp(&early);
        assert!(early_text < encode_timestamp(&late));
        assert_eq!(parse_timestamp("at", early_text).expect("parse"), early);
    }

    #[test]
    fn negative_version_is_a_decode_error() {
        let error = parse_u32("version", -1).expect_err("negative");
        assert!(matches!(error, RepositoryError::Decode(message) if message.contains("version")));
    }

    #[test]
    fn repository_errors_surface_as_backend_store_errors() {
        let store_error = StoreError::from(RepositoryError::Decode("bad row".to_owned()));
        assert!(matches!(store_error, StoreError::Backend(message) if message.contains("bad row")));
    }
}
