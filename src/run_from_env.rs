//! Process entry point (section 4.14 / AMBIENT process shape): `run_from_env`
//! resolves configuration, `run` wires concrete components together and
//! hands them to the `Supervisor`, mirroring `oxidicom`'s
//! `run_server_from_env`/`run_server` split.

use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::ae_change_bus::ApplicationEntityChangeBus;
use crate::cleanup_queue::{space_reclaimer, InstanceCleanupQueue};
use crate::config::{self, Configuration};
use crate::dicomweb::{Auth, DicomWebClient};
use crate::dimse::{dimse_listener, ListenerConfig};
use crate::export::{export_service, ExportConfig};
use crate::health::HealthReporter;
use crate::inference_retrieval::{inference_retrieval_service, InferenceRetrievalConfig};
use crate::job_processor::ProcessorRegistry;
use crate::job_submission::{job_submission_service, JobSubmissionConfig};
use crate::platform::HttpPlatformClient;
use crate::repository::PostgresRepository;
use crate::storage_info::{StorageInfoProvider, StorageThresholds};
use crate::supervisor::Supervisor;

/// Resolves configuration from the environment and runs.
pub async fn run_from_env() -> anyhow::Result<()> {
    let config = config::load()?;
    run(config).await
}

/// Wires every long-running service named in section 2 and runs them under
/// a single `Supervisor` until shutdown.
pub async fn run(config: Configuration) -> anyhow::Result<()> {
    let health = HealthReporter::new();
    let mut supervisor = Supervisor::new(health.clone());
    let cancel = supervisor.cancellation_token();

    let repository: Arc<PostgresRepository> = Arc::new(
        PostgresRepository::connect(&config.database.url, config.database.max_connections).await?,
    );

    let storage_info = Arc::new(StorageInfoProvider::new(
        &config.storage.temporary,
        StorageThresholds {
            can_store_bytes: config.storage.can_store_bytes,
            can_export_bytes: config.storage.can_export_bytes,
        },
    ));

    let dicomweb = Arc::new(DicomWebClient::new());

    let platform_client = Arc::new(HttpPlatformClient::new(
        config.platform.base_url.as_str(),
        config.platform.results_base_url.as_str(),
        config.platform.max_retries,
    )?);

    let processor_registry = Arc::new(ProcessorRegistry::with_default_processors());
    let ae_change_bus = Arc::new(ApplicationEntityChangeBus::new());

    let (cleanup_queue, cleanup_receiver) = InstanceCleanupQueue::new();

    supervisor.spawn("DimseListener", {
        let repository = Arc::clone(&repository) as Arc<dyn crate::repository::Repository>;
        let storage_info = Arc::clone(&storage_info);
        let health = health.clone();
        let cancel = cancel.clone();
        let listener_config = ListenerConfig {
            port: config.scp.port,
            calling_ae_title: config.scu.ae_title.as_str().to_string(),
            strict: config.scp.strict,
            max_pdu_length: config.scp.max_pdu_length,
            reject_unknown_sources: config.scp.reject_unknown_sources,
            verification_enabled: config.scp.verification.enabled,
            verification_transfer_syntaxes: config.scp.verification.transfer_syntaxes.clone(),
            maximum_number_of_associations: config.scp.maximum_number_of_associations.get(),
            temporary_root: config.storage.temporary.clone(),
            processor_registry: Arc::clone(&processor_registry),
            ae_change_bus: Arc::clone(&ae_change_bus),
        };
        dimse_listener(listener_config, repository, storage_info, health, cancel)
    });

    supervisor.spawn("SpaceReclaimer", {
        let health = health.clone();
        let cancel = cancel.clone();
        async move {
            space_reclaimer(cleanup_receiver, health, cancel).await;
            Ok(())
        }
    });

    supervisor.spawn("JobSubmissionService", {
        let repository = Arc::clone(&repository) as Arc<dyn crate::repository::Repository>;
        let jobs_client = Arc::clone(&platform_client) as Arc<dyn crate::platform::JobsClient>;
        let payloads_client = Arc::clone(&platform_client) as Arc<dyn crate::platform::PayloadsClient>;
        let health = health.clone();
        let cancel = cancel.clone();
        let job_submission_config = JobSubmissionConfig {
            poll_frequency: config.job_submission.poll_frequency,
        };
        job_submission_service(
            repository,
            jobs_client,
            payloads_client,
            cleanup_queue,
            health,
            cancel,
            job_submission_config,
        )
    });

    supervisor.spawn("ExportService", {
        let repository = Arc::clone(&repository) as Arc<dyn crate::repository::Repository>;
        let results_client = Arc::clone(&platform_client) as Arc<dyn crate::platform::ResultsClient>;
        let payloads_client = Arc::clone(&platform_client) as Arc<dyn crate::platform::PayloadsClient>;
        let dicomweb = Arc::clone(&dicomweb);
        let storage_info = Arc::clone(&storage_info);
        let health = health.clone();
        let cancel = cancel.clone();
        let export_config = ExportConfig {
            poll_frequency: config.scu.export.poll_frequency,
            agent: config.scu.ae_title.as_str().to_string(),
            maximum_retries: config.scu.export.maximum_retries,
            failure_threshold: config.scu.export.failure_threshold,
            calling_ae_title: config.scu.ae_title.as_str().to_string(),
            max_pdu_length: config.scp.max_pdu_length,
            maximum_associations: config.scu.maximum_number_of_associations,
        };
        export_service(
            repository,
            results_client,
            payloads_client,
            dicomweb,
            storage_info,
            health,
            cancel,
            export_config,
        )
    });

    supervisor.spawn("InferenceRetrievalService", {
        let repository = Arc::clone(&repository) as Arc<dyn crate::repository::Repository>;
        let dicomweb = Arc::clone(&dicomweb);
        let health = health.clone();
        let cancel = cancel.clone();
        let retrieval_config = InferenceRetrievalConfig {
            poll_frequency: config.retrieval.poll_frequency,
            temporary_root: resolve_retrieval_root(&config.storage.temporary),
            auth: resolve_auth(&config),
        };
        inference_retrieval_service(repository, dicomweb, health, cancel, retrieval_config)
    });

    supervisor.run().await
}

/// InferenceRequestRetrieval stages files under its own subdirectory of the
/// staging root, separate from the per-LocalAE subtrees the DIMSE side uses
/// (section 4.5: instances retrieved this way never pass through an
/// `AeHandler`).
fn resolve_retrieval_root(temporary: &Utf8PathBuf) -> Utf8PathBuf {
    temporary.join("inference-retrieval")
}

fn resolve_auth(config: &Configuration) -> Auth {
    if let Some(token) = &config.retrieval.auth_bearer_token {
        return Auth::Bearer { token: token.clone() };
    }
    if let (Some(username), Some(password)) =
        (&config.retrieval.auth_username, &config.retrieval.auth_password)
    {
        return Auth::Basic {
            username: username.clone(),
            password: password.clone(),
        };
    }
    Auth::None
}
