//! Thin helpers around [`std::time::Duration`] for the second-granularity
//! interval fields in agent/server config (§6: poll interval, report
//! interval, store interval).

use std::time::Duration;

/// Parses a plain non-negative integer number of seconds, the format used
/// by the original program's `-p`/`-r`/`-i` flags and their environment
/// equivalents.
pub fn parse_seconds(input: &str) -> Result<Duration, ParseSecondsError> {
    let secs: u64 = input
        .trim()
        .parse()
        .map_err(|_| ParseSecondsError(input.to_string()))?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, thiserror::Error)]
#[error("not a whole number of seconds: {0:?}")]
pub struct ParseSecondsError(String);

/// A `serde` adapter so `Duration` config fields can be deserialized from
/// the same `"5"`-seconds string shape that `parse_seconds` accepts, used
/// by both the agent and server config-file layer.
pub mod seconds {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_seconds("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_seconds("0").unwrap(), Duration::from_secs(0));
        assert!(parse_seconds("10s").is_err());
    }
}
