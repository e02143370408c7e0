//! Serde helpers shared by configuration types

/// `Duration` stored as whole seconds, which reads naturally in TOML
///
/// ```ignore
/// #[serde(with = "sm_core::config::serde_utils::duration_secs")]
/// drain_timeout: Duration,
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Drain {
        #[serde(with = "duration_secs")]
        drain_timeout: Duration,
    }

    #[test]
    fn test_duration_written_as_seconds() {
        let drain = Drain {
            drain_timeout: Duration::from_millis(5_900),
        };
        assert_eq!(
            serde_json::to_string(&drain).unwrap(),
            r#"{"drain_timeout":5}"#
        );
    }

    #[test]
    fn test_duration_read_from_seconds() {
        let drain: Drain = serde_json::from_str(r#"{"drain_timeout":12}"#).unwrap();
        assert_eq!(drain.drain_timeout, Duration::from_secs(12));
    }
}
