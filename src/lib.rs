pub mod config;
pub mod database;
pub mod judge;
pub mod publisher;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod score;
pub mod web_server;
pub mod worker;

use chrono::{SecondsFormat, Utc};

/// RFC 3339 timestamp with millisecond precision, the format stored in the
/// database.
pub fn create_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
