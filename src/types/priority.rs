//! Priority byte mapping, spec section 4.9 / property L1: `map(priorityByte)`
//! is total over 0..=255 and idempotent on round-trip through the job record.

use serde::{Deserialize, Serialize};

/// The platform-facing priority a job is submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPriority {
    Lower,
    Normal,
    Higher,
    Immediate,
}

/// Maps an `InferenceRequest.priority` byte to the platform's job priority.
///
/// `p < 128` -> Lower, `p == 128` -> Normal, `p == 255` -> Immediate,
/// otherwise (129..=254) -> Higher.
pub fn map_priority_byte(p: u8) -> JobPriority {
    match p {
        0..=127 => JobPriority::Lower,
        128 => JobPriority::Normal,
        255 => JobPriority::Immediate,
        _ => JobPriority::Higher,
    }
}

/// The enumerated `priority` setting recognized on an AE's processor
/// settings (spec section 4.x, case-insensitive on input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredPriority {
    Lower,
    Normal,
    Higher,
    Immediate,
}

impl std::str::FromStr for ConfiguredPriority {
    type Err = crate::error::ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lower" => Ok(Self::Lower),
            "normal" => Ok(Self::Normal),
            "higher" => Ok(Self::Higher),
            "immediate" => Ok(Self::Immediate),
            other => Err(crate::error::ConfigurationError::InvalidSettingValue {
                key: "priority".to_string(),
                value: other.to_string(),
                reason: "expected one of lower, normal, higher, immediate".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, JobPriority::Lower)]
    #[case(127, JobPriority::Lower)]
    #[case(128, JobPriority::Normal)]
    #[case(129, JobPriority::Higher)]
    #[case(254, JobPriority::Higher)]
    #[case(255, JobPriority::Immediate)]
    fn test_map_priority_byte(#[case] input: u8, #[case] expected: JobPriority) {
        assert_eq!(map_priority_byte(input), expected);
    }

    #[test]
    fn test_map_priority_byte_is_total() {
        for p in 0..=255u8 {
            let _ = map_priority_byte(p);
        }
    }

    #[rstest]
    #[case("lower", ConfiguredPriority::Lower)]
    #[case("NORMAL", ConfiguredPriority::Normal)]
    #[case("Higher", ConfiguredPriority::Higher)]
    #[case("immediate", ConfiguredPriority::Immediate)]
    fn test_configured_priority_from_str(#[case] input: &str, #[case] expected: ConfiguredPriority) {
        assert_eq!(input.parse::<ConfiguredPriority>().unwrap(), expected);
    }

    #[test]
    fn test_configured_priority_from_str_rejects_unknown() {
        assert!("urgent".parse::<ConfiguredPriority>().is_err());
    }
}
