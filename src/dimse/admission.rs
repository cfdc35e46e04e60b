//! The association admission protocol (section 4.1), steps 1-2 and 4;
//! step 3 (presentation context negotiation) is applied directly against
//! `dicom-ul`'s association options in `scp.rs` since it is proposal-level,
//! not association-level.

use crate::model::LocalApplicationEntity;
use crate::repository::Repository;
use crate::storage_info::StorageInfoProvider;
use crate::types::AeTitle;

use super::status::RejectReason;

pub struct AdmissionDecision {
    pub local_ae: LocalApplicationEntity,
    /// If true, the association is accepted but every C-STORE on it must
    /// respond Resource Limitation (step 4).
    pub resource_limited: bool,
}

pub struct AdmissionRejection {
    pub reason: RejectReason,
}

/// Steps 1-2-4 of the admission protocol. Step 1 is skipped entirely when
/// `reject_unknown_sources` is false.
pub async fn admit(
    repository: &dyn Repository,
    storage_info: &StorageInfoProvider,
    reject_unknown_sources: bool,
    calling_ae_title: &str,
    remote_host: &str,
    called_ae_title: &str,
) -> Result<AdmissionDecision, AdmissionRejection> {
    if reject_unknown_sources && !source_known(repository, calling_ae_title, remote_host).await {
        return Err(AdmissionRejection {
            reason: RejectReason::CallingAeNotRecognized,
        });
    }

    let called_ae_title = AeTitle::from(called_ae_title.to_string());
    let local_ae = repository
        .get_local_ae(&called_ae_title)
        .await
        .ok()
        .flatten()
        .ok_or(AdmissionRejection {
            reason: RejectReason::CalledAeNotRecognized,
        })?;

    let resource_limited = !storage_info.can_store();

    Ok(AdmissionDecision {
        local_ae,
        resource_limited,
    })
}

/// Case-insensitive on AE title, exact on host (section 4.2).
async fn source_known(repository: &dyn Repository, calling_ae_title: &str, remote_host: &str) -> bool {
    match repository.list_source_aes().await {
        Ok(sources) => sources
            .iter()
            .any(|source| source.matches(calling_ae_title, remote_host)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocalApplicationEntity, SourceApplicationEntity};
    use crate::repository::FakeRepository;
    use crate::storage_info::{StorageInfoProvider, StorageThresholds};
    use std::collections::BTreeSet;

    fn local_ae(ae_title: &str) -> LocalApplicationEntity {
        LocalApplicationEntity {
            name: ae_title.to_string(),
            ae_title: AeTitle::from(ae_title.to_string()),
            overwrite_same_instance: false,
            ignored_sop_classes: BTreeSet::new(),
            processor_name: "AE Title Job Processor".to_string(),
            processor_settings: vec![("pipeline-a".to_string(), "pid1".to_string())],
        }
    }

    fn storage_always_ok() -> (tempfile::TempDir, StorageInfoProvider) {
        let tmp = tempfile::tempdir().unwrap();
        let provider = StorageInfoProvider::new(
            camino::Utf8Path::from_path(tmp.path()).unwrap(),
            StorageThresholds {
                can_store_bytes: 0,
                can_export_bytes: 0,
            },
        );
        (tmp, provider)
    }

    #[tokio::test]
    async fn test_rejects_unknown_called_ae() {
        let repo = FakeRepository::new();
        let (_tmp, storage) = storage_always_ok();
        let result = admit(&repo, &storage, false, "ANY", "10.0.0.1", "UNKNOWN").await;
        assert!(matches!(
            result.err().unwrap().reason,
            RejectReason::CalledAeNotRecognized
        ));
    }

    #[tokio::test]
    async fn test_admits_known_called_ae() {
        let repo = FakeRepository::new();
        repo.put_local_ae(local_ae("CLARA1")).await.unwrap();
        let (_tmp, storage) = storage_always_ok();
        let result = admit(&repo, &storage, false, "ANY", "10.0.0.1", "CLARA1").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_unknown_source_when_enabled() {
        let repo = FakeRepository::new();
        repo.put_local_ae(local_ae("CLARA1")).await.unwrap();
        repo.put_source_ae(SourceApplicationEntity {
            ae_title: AeTitle::from_static("PACS"),
            host_ip: "10.0.0.1".to_string(),
        })
        .await
        .unwrap();
        let (_tmp, storage) = storage_always_ok();
        let result = admit(&repo, &storage, true, "UNKNOWN", "10.0.0.2", "CLARA1").await;
        assert!(matches!(
            result.err().unwrap().reason,
            RejectReason::CallingAeNotRecognized
        ));
    }

    #[tokio::test]
    async fn test_admits_known_source_case_insensitive() {
        let repo = FakeRepository::new();
        repo.put_local_ae(local_ae("CLARA1")).await.unwrap();
        repo.put_source_ae(SourceApplicationEntity {
            ae_title: AeTitle::from_static("PACS"),
            host_ip: "10.0.0.1".to_string(),
        })
        .await
        .unwrap();
        let (_tmp, storage) = storage_always_ok();
        let result = admit(&repo, &storage, true, "pacs", "10.0.0.1", "CLARA1").await;
        assert!(result.is_ok());
    }
}
