use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::types::{JobId, PayloadId, PipelineId, TransactionId, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Queued,
    InProcess,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Unknown,
    Success,
    Fail,
}

/// One study, scoped down to series/instances when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySelector {
    pub study_instance_uid: Uid,
    pub series: Vec<SeriesSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSelector {
    pub series_instance_uid: Uid,
    pub sop_instance_uids: Vec<Uid>,
}

/// The typed union named by `inputMetadata.details.type` (section 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputMetadataDetails {
    #[serde(rename = "DICOM_UID")]
    DicomUid { studies: Vec<StudySelector> },
    #[serde(rename = "DICOM_PATIENT_ID")]
    DicomPatientId { patient_id: String },
    #[serde(rename = "ACCESSION_NUMBER")]
    AccessionNumber { accession_numbers: Vec<String> },
}

/// One entry of `inputResources`: either the single required Algorithm
/// selection, or a DICOMweb retrieval source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interface")]
pub enum InputResource {
    Algorithm { pipeline_id: PipelineId },
    #[serde(rename = "DICOMweb")]
    DicomWeb {
        source_name: String,
        base_uri: String,
    },
}

/// A DICOMweb output sink named in `outputResources` (DICOMweb-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResource {
    pub base_uri: String,
}

/// An ACR-shaped inference request (section 3). Invariant: once
/// `storage_path` is set it is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub transaction_id: TransactionId,
    pub priority: u8,
    pub input_metadata: InputMetadataDetails,
    pub input_resources: Vec<InputResource>,
    pub output_resources: Vec<OutputResource>,
    pub job_id: Option<JobId>,
    pub payload_id: Option<PayloadId>,
    pub storage_path: Option<Utf8PathBuf>,
    pub state: RequestState,
    pub status: RequestStatus,
    pub try_count: u32,
}

impl InferenceRequest {
    /// Sets `storage_path` unless it is already set, upholding the
    /// no-overwrite invariant.
    pub fn set_storage_path_once(&mut self, path: Utf8PathBuf) {
        if self.storage_path.is_none() {
            self.storage_path = Some(path);
        }
    }

    pub fn algorithm_pipeline(&self) -> Option<&PipelineId> {
        self.input_resources.iter().find_map(|r| match r {
            InputResource::Algorithm { pipeline_id } => Some(pipeline_id),
            _ => None,
        })
    }

    pub fn retrieval_resources(&self) -> impl Iterator<Item = &InputResource> {
        self.input_resources
            .iter()
            .filter(|r| !matches!(r, InputResource::Algorithm { .. }))
    }
}
