//! StorageInfoProvider (section 2 item 2): reports free space against the
//! can-store / can-export thresholds that gate C-STORE admission and the
//! export poll respectively.

use camino::Utf8Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes of free space required to accept new stores / run an export pass.
#[derive(Debug, Clone, Copy)]
pub struct StorageThresholds {
    pub can_store_bytes: u64,
    pub can_export_bytes: u64,
}

/// Queries free space on the filesystem backing `root` and compares it
/// against configured thresholds. Free-space queries are a single syscall,
/// cheap enough to call on every admission decision; no caching.
pub struct StorageInfoProvider {
    root: camino::Utf8PathBuf,
    thresholds: StorageThresholds,
    last_observed_free_bytes: AtomicU64,
}

impl StorageInfoProvider {
    pub fn new(root: impl AsRef<Utf8Path>, thresholds: StorageThresholds) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            thresholds,
            last_observed_free_bytes: AtomicU64::new(u64::MAX),
        }
    }

    fn free_bytes(&self) -> u64 {
        match fs4::available_space(self.root.as_std_path()) {
            Ok(bytes) => {
                self.last_observed_free_bytes.store(bytes, Ordering::Relaxed);
                bytes
            }
            Err(e) => {
                tracing::warn!(event = "storage_info", error = %e, "failed to query free space");
                self.last_observed_free_bytes.load(Ordering::Relaxed)
            }
        }
    }

    pub fn can_store(&self) -> bool {
        self.free_bytes() >= self.thresholds.can_store_bytes
    }

    pub fn can_export(&self) -> bool {
        self.free_bytes() >= self.thresholds.can_export_bytes
    }
}
