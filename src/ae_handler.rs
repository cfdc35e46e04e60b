//! The local-AE storage arbiter (section 4.3): one instance per LocalAE,
//! deciding whether to persist an incoming instance, writing it with
//! retry, and publishing a notification on success.

use std::time::Duration;

use camino::Utf8PathBuf;

use crate::instance_bus::InstanceNotificationBus;
use crate::model::{InstanceStorageInfo, LocalApplicationEntity};
use crate::sanitize::sanitize_path;

const WRITE_RETRY_WAITS: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(500),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    Skipped,
    Dropped,
}

/// Arbitrates writes for one LocalAE's storage subtree.
pub struct AeHandler {
    local_ae: LocalApplicationEntity,
    root: Utf8PathBuf,
    bus: InstanceNotificationBus,
}

impl AeHandler {
    pub fn new(local_ae: LocalApplicationEntity, temporary_root: &camino::Utf8Path) -> Self {
        let root = temporary_root.join(sanitize_path(local_ae.ae_title.as_str()));
        Self {
            local_ae,
            root,
            bus: InstanceNotificationBus::new(),
        }
    }

    pub fn notification_bus(&self) -> &InstanceNotificationBus {
        &self.bus
    }

    pub fn storage_path_for(&self, sop_instance_uid: &str) -> Utf8PathBuf {
        self.root.join(format!("{}.dcm", sanitize_path(sop_instance_uid)))
    }

    /// Deletes and recreates this AE's storage subtree. Run once at
    /// startup, before any association is accepted.
    pub async fn cold_start_cleanup(&self) -> std::io::Result<()> {
        match fs_err::tokio::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs_err::tokio::create_dir_all(&self.root).await
    }

    pub async fn handle_instance(
        &self,
        info: InstanceStorageInfo,
        bytes: &[u8],
    ) -> std::io::Result<StoreOutcome> {
        if self
            .local_ae
            .ignored_sop_classes
            .contains(&info.sop_class_uid)
        {
            return Ok(StoreOutcome::Dropped);
        }

        let exists = fs_err::tokio::try_exists(&info.storage_path).await?;
        if exists && !self.local_ae.overwrite_same_instance {
            return Ok(StoreOutcome::Skipped);
        }

        self.write_with_retry(&info.storage_path, bytes).await?;
        self.bus.publish(info);
        Ok(StoreOutcome::Stored)
    }

    async fn write_with_retry(&self, path: &Utf8PathBuf, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let mut last_error = None;
        for wait in WRITE_RETRY_WAITS {
            match fs_err::tokio::write(path, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        fs_err::tokio::write(path, bytes)
            .await
            .map_err(|e| last_error.unwrap_or(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AeTitle, Uid};
    use std::collections::BTreeSet;

    fn local_ae(overwrite: bool, ignored: BTreeSet<Uid>) -> LocalApplicationEntity {
        LocalApplicationEntity {
            name: "test".to_string(),
            ae_title: AeTitle::from_static("CLARA1"),
            overwrite_same_instance: overwrite,
            ignored_sop_classes: ignored,
            processor_name: "AE Title Job Processor".to_string(),
            processor_settings: Vec::new(),
        }
    }

    fn info(storage_path: Utf8PathBuf, sop_class_uid: &str) -> InstanceStorageInfo {
        InstanceStorageInfo {
            sop_instance_uid: Uid::from_static("1.2.3"),
            study_instance_uid: Uid::from_static("1.2"),
            series_instance_uid: Uid::from_static("1.2.3.4"),
            patient_id: "patient-1".to_string(),
            sop_class_uid: Uid::from(sop_class_uid.to_string()),
            called_ae_title: AeTitle::from_static("CLARA1"),
            association_id: 1,
            storage_path,
        }
    }

    #[tokio::test]
    async fn test_drops_ignored_sop_class() {
        let tmp = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
        let mut ignored = BTreeSet::new();
        ignored.insert(Uid::from_static("1.2.840.10008.5.1.4.1.1.7"));
        let handler = AeHandler::new(local_ae(false, ignored), root);
        let path = handler.storage_path_for("1.2.3");
        let outcome = handler
            .handle_instance(info(path, "1.2.840.10008.5.1.4.1.1.7"), b"data")
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_skips_existing_without_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
        let handler = AeHandler::new(local_ae(false, BTreeSet::new()), root);
        let path = handler.storage_path_for("1.2.3");
        handler
            .handle_instance(info(path.clone(), "1.2.840.10008.5.1.4.1.1.7"), b"first")
            .await
            .unwrap();
        let outcome = handler
            .handle_instance(info(path.clone(), "1.2.840.10008.5.1.4.1.1.7"), b"second")
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Skipped);
        assert_eq!(fs_err::tokio::read(&path).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_overwrites_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
        let handler = AeHandler::new(local_ae(true, BTreeSet::new()), root);
        let path = handler.storage_path_for("1.2.3");
        handler
            .handle_instance(info(path.clone(), "1.2.840.10008.5.1.4.1.1.7"), b"first")
            .await
            .unwrap();
        let outcome = handler
            .handle_instance(info(path.clone(), "1.2.840.10008.5.1.4.1.1.7"), b"second")
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Stored);
        assert_eq!(fs_err::tokio::read(&path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_cold_start_cleanup_recreates_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(tmp.path()).unwrap().join("CLARA1");
        fs_err::tokio::create_dir_all(&root).await.unwrap();
        fs_err::tokio::write(root.join("stale.dcm"), b"x").await.unwrap();
        let handler = AeHandler::new(
            local_ae(false, BTreeSet::new()),
            camino::Utf8Path::from_path(tmp.path()).unwrap(),
        );
        handler.cold_start_cleanup().await.unwrap();
        assert!(!root.join("stale.dcm").exists());
        assert!(root.exists());
    }
}
