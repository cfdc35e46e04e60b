//! The export pipeline (section 4.7): download-tasks -> convert-to-jobs ->
//! download-payload -> export -> report, one pass per poll tick, skipped
//! entirely when StorageInfoProvider reports cannot-export.

mod pipeline;
mod scu;
mod stow;

pub use pipeline::{run_export_pass, ExportConfig};

use std::sync::Arc;

use crate::dicomweb::DicomWebClient;
use crate::health::{HealthReporter, ServiceState};
use crate::platform::{PayloadsClient, ResultsClient};
use crate::repository::Repository;
use crate::storage_info::StorageInfoProvider;

/// Runs until `cancel` fires; the poll timer re-arms only after a full pass
/// completes (section 4.7 concurrency note).
pub async fn export_service(
    repository: Arc<dyn Repository>,
    results_client: Arc<dyn ResultsClient>,
    payloads_client: Arc<dyn PayloadsClient>,
    dicomweb: Arc<DicomWebClient>,
    storage_info: Arc<StorageInfoProvider>,
    health: HealthReporter,
    cancel: tokio_util::sync::CancellationToken,
    config: ExportConfig,
) -> anyhow::Result<()> {
    health.set("ExportService", ServiceState::Running);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.poll_frequency) => {}
        }

        if !storage_info.can_export() {
            tracing::warn!(event = "export", "skipping export pass: insufficient storage");
            continue;
        }

        run_export_pass(
            repository.as_ref(),
            results_client.as_ref(),
            payloads_client.as_ref(),
            dicomweb.as_ref(),
            &config,
        )
        .await;
    }

    health.set("ExportService", ServiceState::Stopped);
    Ok(())
}
