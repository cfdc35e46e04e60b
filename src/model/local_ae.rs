use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{AeTitle, Uid};

/// A configured local Application Entity: the identity this service answers
/// DIMSE associations as, plus the processor that turns its received
/// instances into jobs.
///
/// Invariant: `aeTitle` is unique across all `LocalApplicationEntity`
/// records; enforced by the repository, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalApplicationEntity {
    pub name: String,
    pub ae_title: AeTitle,
    pub overwrite_same_instance: bool,
    pub ignored_sop_classes: BTreeSet<Uid>,
    pub processor_name: String,
    /// Ordered so a processor's settings validator can report the first
    /// offending key deterministically.
    pub processor_settings: Vec<(String, String)>,
}

impl LocalApplicationEntity {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.processor_settings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn settings_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.processor_settings
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
