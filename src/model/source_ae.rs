use serde::{Deserialize, Serialize};

use crate::types::AeTitle;

/// A remote peer allowed to open associations when `rejectUnknownSources`
/// is enabled. Matching is case-insensitive on `ae_title`, exact on
/// `host_ip` (section 4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceApplicationEntity {
    pub ae_title: AeTitle,
    pub host_ip: String,
}

impl SourceApplicationEntity {
    pub fn matches(&self, calling_ae: &str, remote_host: &str) -> bool {
        self.ae_title.as_str().eq_ignore_ascii_case(calling_ae) && self.host_ip == remote_host
    }
}
