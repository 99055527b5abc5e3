//! Serde helpers shared by configuration types

/// Serialize a `Duration` as whole seconds.
///
/// Timeouts in the gateway config are written as plain integers
/// (`read_timeout = 10`) rather than structured durations.
///
/// ```ignore
/// #[serde(with = "jg_core::config::serde_utils::duration_secs")]
/// shutdown_timeout: Duration,
/// ```
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
