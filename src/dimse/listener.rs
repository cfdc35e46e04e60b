//! The DIMSE TCP accept loop (section 4.1/5): one task per association, up
//! to `scp.maximumNumberOfAssociations` concurrent, gated by a semaphore.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::ae_change_bus::{AeChangeEvent, ApplicationEntityChangeBus};
use crate::health::{HealthReporter, ServiceState};
use crate::job_processor::ProcessorRegistry;
use crate::repository::Repository;
use crate::storage_info::StorageInfoProvider;
use crate::types::AeTitle;

use super::association::AssociationIdSequence;
use super::scp::{handle_association, AeHandlerEntry, ScpConfig};

pub struct ListenerConfig {
    pub port: u16,
    pub calling_ae_title: String,
    pub strict: bool,
    pub max_pdu_length: u32,
    pub reject_unknown_sources: bool,
    pub verification_enabled: bool,
    pub verification_transfer_syntaxes: Vec<String>,
    pub maximum_number_of_associations: usize,
    pub temporary_root: camino::Utf8PathBuf,
    pub processor_registry: Arc<ProcessorRegistry>,
    pub ae_change_bus: Arc<ApplicationEntityChangeBus>,
}

/// Accepts TCP connections and spawns one association task per connection,
/// bounded by a semaphore. Runs until `cancel` fires; in-flight associations
/// are allowed to finish their current C-STORE (cooperative cancellation,
/// section 5).
pub async fn dimse_listener(
    config: ListenerConfig,
    repository: Arc<dyn Repository>,
    storage_info: Arc<StorageInfoProvider>,
    health: HealthReporter,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(event = "dimse_listener", port = config.port, "listening");

    let semaphore = Arc::new(Semaphore::new(config.maximum_number_of_associations));
    let ae_handlers: Arc<tokio::sync::Mutex<HashMap<AeTitle, AeHandlerEntry>>> =
        Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    // A Deleted LocalAE must stop being grouped into jobs immediately, not
    // merely on its next C-STORE. Dropping its `AeHandlerEntry` drops the
    // subscription feeding the processor, tearing it down (section 2 item 4).
    let eviction_handlers = Arc::clone(&ae_handlers);
    let _ae_change_subscription = config.ae_change_bus.subscribe(move |event| {
        if let AeChangeEvent::Deleted(ae_title) = event {
            let ae_title = ae_title.clone();
            let handlers = Arc::clone(&eviction_handlers);
            tokio::spawn(async move {
                if handlers.lock().await.remove(&ae_title).is_some() {
                    tracing::info!(event = "ae_handler", ae_title = %ae_title.as_str(), "evicted handler for deleted AE");
                }
            });
        }
    });

    let association_ids = AssociationIdSequence::new();
    let scp_config = Arc::new(ScpConfig {
        calling_ae_title: config.calling_ae_title,
        strict: config.strict,
        max_pdu_length: config.max_pdu_length,
        reject_unknown_sources: config.reject_unknown_sources,
        verification_enabled: config.verification_enabled,
        verification_transfer_syntaxes: config.verification_transfer_syntaxes,
        temporary_root: config.temporary_root,
        processor_registry: config.processor_registry,
    });

    health.set("DimseListener", ServiceState::Running);

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => permit?,
        };

        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(event = "dimse_listener", error = %e, "accept failed");
                continue;
            }
        };

        let repository = Arc::clone(&repository);
        let storage_info = Arc::clone(&storage_info);
        let ae_handlers = Arc::clone(&ae_handlers);
        let health = health.clone();
        let association_ids = association_ids.clone();
        let scp_config = Arc::clone(&scp_config);
        let association_cancel = cancel.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let result = handle_association(
                stream,
                repository,
                storage_info,
                ae_handlers,
                health,
                association_ids,
                scp_config,
                association_cancel,
            )
            .await;
            if let Err(e) = result {
                tracing::warn!(event = "association", peer = %peer_addr, error = %e, "association ended with an error");
            }
        });
    }

    health.set("DimseListener", ServiceState::Stopped);
    Ok(())
}
