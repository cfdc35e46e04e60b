//! End-to-end DIMSE scenarios (section 8, scenarios 1/2/6): a real
//! `dimse_listener` driven by a real SCU, backed by a `FakeRepository`,
//! following `oxidicom/tests/integration_test.rs`'s own shape (real
//! listener, real client) but substituting a fake for the database.

mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dicom_adapter::ae_change_bus::ApplicationEntityChangeBus;
use dicom_adapter::dimse::{dimse_listener, ListenerConfig};
use dicom_adapter::health::HealthReporter;
use dicom_adapter::job_processor::ProcessorRegistry;
use dicom_adapter::model::{LocalApplicationEntity, SourceApplicationEntity};
use dicom_adapter::repository::{FakeRepository, Repository};
use dicom_adapter::storage_info::{StorageInfoProvider, StorageThresholds};
use dicom_adapter::types::AeTitle;

use support::{free_tcp_port, init_logging, send_cecho, send_cstore, try_establish, TestInstance};

const CALLING_AE: &str = "TESTSCU";
const CALLED_AE: &str = "CLARA1";

fn local_ae(pipelines: Vec<(&str, &str)>) -> LocalApplicationEntity {
    LocalApplicationEntity {
        name: "clara-1".to_string(),
        ae_title: AeTitle::from_static(CALLED_AE),
        overwrite_same_instance: false,
        ignored_sop_classes: BTreeSet::new(),
        processor_name: "AE Title Job Processor".to_string(),
        processor_settings: pipelines
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .chain(std::iter::once(("timeout".to_string(), "5".to_string())))
            .collect(),
    }
}

struct TestListener {
    addr: String,
    repository: Arc<FakeRepository>,
    // Drop order matters: cancel the listener before the staging directory
    // it writes into disappears.
    _cancel_guard: tokio_util::sync::DropGuard,
    _storage_tmp: tempfile::TempDir,
}

async fn start_listener(thresholds: StorageThresholds, reject_unknown_sources: bool) -> TestListener {
    start_listener_with_verification_tx(thresholds, reject_unknown_sources, Vec::new()).await
}

async fn start_listener_with_verification_tx(
    thresholds: StorageThresholds,
    reject_unknown_sources: bool,
    verification_transfer_syntaxes: Vec<String>,
) -> TestListener {
    init_logging();
    let repository = Arc::new(FakeRepository::new());
    let storage_tmp = tempfile::tempdir().unwrap();
    let storage_root = camino::Utf8Path::from_path(storage_tmp.path()).unwrap().to_owned();
    let storage_info = Arc::new(StorageInfoProvider::new(&storage_root, thresholds));
    let health = HealthReporter::new();
    let cancel = tokio_util::sync::CancellationToken::new();
    let port = free_tcp_port();

    let config = ListenerConfig {
        port,
        calling_ae_title: CALLING_AE.to_string(),
        strict: false,
        max_pdu_length: 16384,
        reject_unknown_sources,
        verification_enabled: true,
        verification_transfer_syntaxes,
        maximum_number_of_associations: 4,
        temporary_root: storage_root,
        processor_registry: Arc::new(ProcessorRegistry::with_default_processors()),
        ae_change_bus: Arc::new(ApplicationEntityChangeBus::new()),
    };

    let repo_dyn = Arc::clone(&repository) as Arc<dyn Repository>;
    let task_cancel = cancel.clone();
    tokio::spawn(dimse_listener(config, repo_dyn, storage_info, health, task_cancel));

    // Give the listener a moment to bind before the first connection attempt.
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestListener {
        addr: format!("127.0.0.1:{port}"),
        repository,
        _cancel_guard: cancel.drop_guard(),
        _storage_tmp: storage_tmp,
    }
}

/// Scenario 1: an unrecognized source is rejected at negotiation (section
/// 4.2) — the association itself must never be established, not merely
/// have its first C-STORE fail.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_unknown_source_is_rejected() {
    let listener = start_listener(
        StorageThresholds { can_store_bytes: 0, can_export_bytes: 0 },
        true,
    )
    .await;
    listener
        .repository
        .put_local_ae(local_ae(vec![("pipeline-a", "PID1")]))
        .await
        .unwrap();
    // Deliberately no SourceApplicationEntity registered.

    let instance = TestInstance::new("1.2.3", "1.2.3.1", "1.2.3.1.1");
    let established = try_establish(&listener.addr, CALLING_AE, CALLED_AE, instance.sop_class_uid).await;

    assert!(!established, "unknown source must be rejected before the association is established");
    assert!(listener.repository.list_created_inference_jobs().await.unwrap().is_empty());
}

/// Scenario 6: storage below the can-store threshold rejects every C-STORE
/// with Resource Limitation (section 4.1 step 4), without touching the job
/// processor.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_disk_full_rejects_cstore() {
    let listener = start_listener(
        StorageThresholds { can_store_bytes: u64::MAX, can_export_bytes: 0 },
        false,
    )
    .await;
    listener
        .repository
        .put_local_ae(local_ae(vec![("pipeline-a", "PID1")]))
        .await
        .unwrap();

    let instance = TestInstance::new("1.2.4", "1.2.4.1", "1.2.4.1.1");
    let status = send_cstore(&listener.addr, CALLING_AE, CALLED_AE, &instance).await;

    assert_eq!(status, 0xa700, "expected Resource Limitation (0xa700)");
    assert!(listener.repository.list_created_inference_jobs().await.unwrap().is_empty());
}

/// `scp.verification.transferSyntaxes` (section 3) narrows which TS a
/// C-ECHO may use; a TS outside the configured set fails the C-ECHO rather
/// than being silently accepted.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_verification_rejects_unconfigured_transfer_syntax() {
    let listener = start_listener_with_verification_tx(
        StorageThresholds { can_store_bytes: 0, can_export_bytes: 0 },
        false,
        vec!["1.2.840.10008.1.2.1".to_string()], // Explicit VR Little Endian only
    )
    .await;
    listener
        .repository
        .put_local_ae(local_ae(vec![("pipeline-a", "PID1")]))
        .await
        .unwrap();

    let allowed = send_cecho(&listener.addr, CALLING_AE, CALLED_AE, "1.2.840.10008.1.2.1").await;
    assert_eq!(allowed, 0, "configured transfer syntax must succeed");

    let disallowed = send_cecho(&listener.addr, CALLING_AE, CALLED_AE, "1.2.840.10008.1.2").await;
    assert_ne!(disallowed, 0, "transfer syntax outside scp.verification.transferSyntaxes must fail");
}

/// Scenario 2: two instances of the same study arriving inside one time
/// window are grouped into a single job per configured pipeline (section
/// 4.4), even though they were admitted over two separate associations.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_two_instances_same_study_emit_one_job_per_pipeline() {
    let listener = start_listener(
        StorageThresholds { can_store_bytes: 0, can_export_bytes: 0 },
        false,
    )
    .await;
    listener
        .repository
        .put_local_ae(local_ae(vec![("pipeline-a", "PID1"), ("pipeline-b", "PID2")]))
        .await
        .unwrap();

    let study = "1.2.5";
    let first = TestInstance::new(study, "1.2.5.1", "1.2.5.1.1");
    let second = TestInstance::new(study, "1.2.5.1", "1.2.5.1.2");

    assert_eq!(send_cstore(&listener.addr, CALLING_AE, CALLED_AE, &first).await, 0);
    assert_eq!(send_cstore(&listener.addr, CALLING_AE, CALLED_AE, &second).await, 0);

    // Minimum window is 5s (section 4.4); give it a comfortable margin.
    tokio::time::sleep(Duration::from_secs(7)).await;

    let jobs = listener.repository.list_created_inference_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2, "one job per configured pipeline");
    for job in &jobs {
        assert_eq!(job.instances.len(), 2, "both instances grouped into the same window");
    }
}
