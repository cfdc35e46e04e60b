use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::types::{AeTitle, Uid};

/// Identifies and locates one received DICOM instance staged on disk.
///
/// Created when a C-STORE is accepted (section 4.1); `storage_path` is
/// `temporary / sanitize(calledAeTitle) / sanitize(SopInstanceUid).dcm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStorageInfo {
    pub sop_instance_uid: Uid,
    pub study_instance_uid: Uid,
    pub series_instance_uid: Uid,
    pub patient_id: String,
    pub sop_class_uid: Uid,
    pub called_ae_title: AeTitle,
    pub association_id: u32,
    pub storage_path: Utf8PathBuf,
}
