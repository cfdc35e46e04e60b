use serde::{Deserialize, Serialize};

use crate::types::AeTitle;

/// A configured DIMSE export destination, resolved by name from an
/// `ExportTask`'s `parameters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationApplicationEntity {
    pub name: String,
    pub ae_title: AeTitle,
    pub host_ip: String,
    pub port: u16,
}
