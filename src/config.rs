//! Process-wide configuration (section 3's Configuration entity), resolved
//! from environment variables at startup via `figment`. Updateable only
//! through the change bus thereafter; this module only covers the initial
//! load.

use std::num::NonZeroUsize;
use std::time::Duration;

use camino::Utf8PathBuf;
use figment::providers::Env;
use figment::Figment;
use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::types::AeTitle;

#[derive(Debug, Clone, Deserialize)]
pub struct ScpSettings {
    #[serde(default = "default_scp_port")]
    pub port: u16,
    #[serde(default = "default_max_associations")]
    pub maximum_number_of_associations: NonZeroUsize,
    #[serde(default)]
    pub verification: VerificationSettings,
    #[serde(default)]
    pub log_dimse_datasets: bool,
    #[serde(default)]
    pub reject_unknown_sources: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_max_pdu_length")]
    pub max_pdu_length: u32,
}

/// `scp.verification.*`: whether C-ECHO is accepted at all, and which TS
/// UIDs are accepted for it. An empty `transfer_syntaxes` means Implicit VR
/// Little Endian and Explicit VR Little Endian only, the pair every DICOM
/// peer is required to support.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub transfer_syntaxes: Vec<String>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            transfer_syntaxes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSettings {
    #[serde(default = "default_export_max_retries")]
    pub maximum_retries: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(with = "humantime_serde", default = "default_poll_frequency")]
    pub poll_frequency: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            maximum_retries: default_export_max_retries(),
            failure_threshold: default_failure_threshold(),
            poll_frequency: default_poll_frequency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScuSettings {
    #[serde(default = "default_scu_ae_title")]
    pub ae_title: AeTitle,
    #[serde(default = "default_max_associations")]
    pub maximum_number_of_associations: NonZeroUsize,
    #[serde(default)]
    pub export: ExportSettings,
}

impl Default for ScuSettings {
    fn default() -> Self {
        Self {
            ae_title: default_scu_ae_title(),
            maximum_number_of_associations: default_max_associations(),
            export: ExportSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSettings {
    #[serde(with = "humantime_serde", default = "default_poll_frequency")]
    pub poll_frequency: Duration,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    pub auth_bearer_token: Option<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            poll_frequency: default_poll_frequency(),
            auth_username: None,
            auth_password: None,
            auth_bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSubmissionSettings {
    #[serde(with = "humantime_serde", default = "default_poll_frequency")]
    pub poll_frequency: Duration,
}

impl Default for JobSubmissionSettings {
    fn default() -> Self {
        Self {
            poll_frequency: default_poll_frequency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub temporary: Utf8PathBuf,
    #[serde(default)]
    pub can_store_bytes: u64,
    #[serde(default)]
    pub can_export_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSettings {
    pub base_url: url::Url,
    pub results_base_url: url::Url,
    #[serde(default = "default_platform_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub scp: ScpSettings,
    #[serde(default)]
    pub scu: ScuSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub job_submission: JobSubmissionSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub platform: PlatformSettings,
}

fn default_scp_port() -> u16 {
    11112
}

fn default_max_associations() -> NonZeroUsize {
    NonZeroUsize::new(32).unwrap()
}

fn default_true() -> bool {
    true
}

fn default_max_pdu_length() -> u32 {
    16384
}

fn default_scu_ae_title() -> AeTitle {
    AeTitle::from_static("DICOM-ADAPTER")
}

fn default_export_max_retries() -> u32 {
    3
}

fn default_failure_threshold() -> f64 {
    0.0
}

fn default_poll_frequency() -> Duration {
    Duration::from_secs(5)
}

fn default_max_connections() -> u32 {
    10
}

fn default_platform_max_retries() -> u32 {
    3
}

/// Builds the figment source from the environment, prefixed and split on
/// `_` so that e.g. `DICOM_ADAPTER_SCP_PORT` maps to `scp.port`.
pub fn figment() -> Figment {
    Figment::new().merge(Env::prefixed("DICOM_ADAPTER_").split("_"))
}

/// Resolves and validates the process configuration from the environment.
pub fn load() -> Result<Configuration, ConfigurationError> {
    let config: Configuration = figment()
        .extract()
        .map_err(|e| ConfigurationError::Other(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

const MAX_ASSOCIATIONS_LIMIT: usize = 1000;

fn validate(config: &Configuration) -> Result<(), ConfigurationError> {
    if !(0.0..=1.0).contains(&config.scu.export.failure_threshold) {
        return Err(ConfigurationError::Other(format!(
            "scu.export.failureThreshold must be in 0.0..=1.0, got {}",
            config.scu.export.failure_threshold
        )));
    }
    if config.scp.port == 0 {
        return Err(ConfigurationError::Other(
            "scp.port must be in 1..=65535, got 0".to_string(),
        ));
    }
    if config.scp.maximum_number_of_associations.get() > MAX_ASSOCIATIONS_LIMIT {
        return Err(ConfigurationError::Other(format!(
            "scp.maximumNumberOfAssociations must be in 1..={MAX_ASSOCIATIONS_LIMIT}, got {}",
            config.scp.maximum_number_of_associations
        )));
    }
    if config.scu.maximum_number_of_associations.get() > MAX_ASSOCIATIONS_LIMIT {
        return Err(ConfigurationError::Other(format!(
            "scu.maximumNumberOfAssociations must be in 1..={MAX_ASSOCIATIONS_LIMIT}, got {}",
            config.scu.maximum_number_of_associations
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Configuration {
        Configuration {
            scp: ScpSettings {
                port: default_scp_port(),
                maximum_number_of_associations: default_max_associations(),
                verification: VerificationSettings::default(),
                log_dimse_datasets: false,
                reject_unknown_sources: false,
                strict: false,
                max_pdu_length: default_max_pdu_length(),
            },
            scu: ScuSettings::default(),
            retrieval: RetrievalSettings::default(),
            job_submission: JobSubmissionSettings::default(),
            storage: StorageSettings {
                temporary: Utf8PathBuf::from("/tmp/staging"),
                can_store_bytes: 0,
                can_export_bytes: 0,
            },
            database: DatabaseSettings {
                url: "postgres://localhost/adapter".to_string(),
                max_connections: default_max_connections(),
            },
            platform: PlatformSettings {
                base_url: url::Url::parse("https://platform.example").unwrap(),
                results_base_url: url::Url::parse("https://results.example").unwrap(),
                max_retries: default_platform_max_retries(),
            },
        }
    }

    #[test]
    fn test_base_config_is_valid() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_failure_threshold_out_of_range_is_rejected() {
        let mut config = base_config();
        config.scu.export.failure_threshold = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_port_is_rejected() {
        let mut config = base_config();
        config.scp.port = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_scp_maximum_associations_above_limit_is_rejected() {
        let mut config = base_config();
        config.scp.maximum_number_of_associations =
            NonZeroUsize::new(MAX_ASSOCIATIONS_LIMIT + 1).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_scu_maximum_associations_above_limit_is_rejected() {
        let mut config = base_config();
        config.scu.maximum_number_of_associations =
            NonZeroUsize::new(MAX_ASSOCIATIONS_LIMIT + 1).unwrap();
        assert!(validate(&config).is_err());
    }
}
