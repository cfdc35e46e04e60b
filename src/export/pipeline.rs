//! The per-tick export dataflow (section 4.7): download-tasks ->
//! convert-to-jobs -> download-payload -> export -> report.

use std::num::NonZeroUsize;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;

use super::scu::{export_via_scu, parse_pending_file};
use super::stow::export_via_stow;
use crate::dicomweb::DicomWebClient;
use crate::platform::{PayloadsClient, PendingExportTask, ResultsClient};
use crate::repository::Repository;
use crate::types::TaskId;

pub struct ExportConfig {
    pub poll_frequency: Duration,
    pub agent: String,
    pub maximum_retries: u32,
    pub failure_threshold: f64,
    pub calling_ae_title: String,
    pub max_pdu_length: u32,
    pub maximum_associations: NonZeroUsize,
}

/// `parameters`' typed union (section 4.7: "for the SCU variant this
/// requires parsing `parameters` as a destination name"). Not part of the
/// data model proper since it only exists inside the opaque JSON blob.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ExportTarget {
    #[serde(rename = "SCU")]
    Scu { destination: String },
    #[serde(rename = "DICOMweb")]
    DicomWeb { base_uri: String },
}

const PENDING_LIMIT: u32 = 10;

pub async fn run_export_pass(
    repository: &dyn Repository,
    results_client: &dyn ResultsClient,
    payloads_client: &dyn PayloadsClient,
    dicomweb: &DicomWebClient,
    config: &ExportConfig,
) {
    let tasks = match results_client.get_pending(&config.agent, PENDING_LIMIT).await {
        Ok(tasks) => tasks,
        Err(e) => {
            tracing::warn!(event = "export", error = %e, "failed to fetch pending export tasks");
            return;
        }
    };

    // One worker per task, bounded to `scu.maximumNumberOfAssociations`
    // (section 4.7: "MaxDegreeOfParallelism = scu.maximumNumberOfAssociations,
    // MaxMessagesPerTask = 1"). `for_each_concurrent` gives that bound
    // without requiring the borrowed clients to be `'static`.
    stream::iter(tasks)
        .for_each_concurrent(config.maximum_associations.get(), |task| async move {
            process_task(
                task,
                repository,
                results_client,
                payloads_client,
                dicomweb,
                config.maximum_retries,
                config.failure_threshold,
                &config.calling_ae_title,
                config.max_pdu_length,
            )
            .await;
        })
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn process_task(
    task: PendingExportTask,
    repository: &dyn Repository,
    results_client: &dyn ResultsClient,
    payloads_client: &dyn PayloadsClient,
    dicomweb: &DicomWebClient,
    maximum_retries: u32,
    failure_threshold: f64,
    calling_ae_title: &str,
    max_pdu_length: u32,
) {
    let task_id = task.task_id.clone();
    let uris_count = task.uris.len();
    if uris_count == 0 {
        let _ = results_client.report_success(&task_id).await;
        return;
    }

    let target: ExportTarget = match serde_json::from_value(task.parameters.clone()) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(event = "export", task_id = %task_id.as_str(), error = %e, "invalid or unrecognized export target");
            let _ = results_client.report_failure(&task_id, false).await;
            return;
        }
    };

    let destination = match &target {
        ExportTarget::Scu { destination } => match repository.get_destination_ae(destination).await {
            Ok(Some(ae)) => Some(ae),
            Ok(None) => {
                tracing::warn!(event = "export", task_id = %task_id.as_str(), destination, "unrecognized destination AE");
                let _ = results_client.report_failure(&task_id, false).await;
                return;
            }
            Err(e) => {
                tracing::warn!(event = "export", task_id = %task_id.as_str(), error = %e, "failed to resolve destination AE");
                let _ = results_client.report_failure(&task_id, false).await;
                return;
            }
        },
        ExportTarget::DicomWeb { .. } => None,
    };

    let mut failure_count = 0u32;
    let mut downloaded = Vec::with_capacity(uris_count);
    for uri in &task.uris {
        match payloads_client.download(&task.payload_id, uri).await {
            Ok(bytes) => downloaded.push(bytes),
            Err(e) => {
                tracing::warn!(event = "export", task_id = %task_id.as_str(), uri, error = %e, "failed to download export artifact");
                failure_count += 1;
            }
        }
    }

    let download_failure_rate = failure_count as f64 / uris_count as f64;
    if download_failure_rate > failure_threshold {
        tracing::warn!(event = "export", task_id = %task_id.as_str(), download_failure_rate, "download failure rate exceeds threshold");
        report(results_client, &task_id, task.retries, maximum_retries).await;
        return;
    }

    let mut successful_export = 0u32;
    match target {
        ExportTarget::Scu { .. } => {
            let destination = destination.expect("destination resolved above");
            let files: Vec<_> = downloaded
                .iter()
                .filter_map(|bytes| parse_pending_file(bytes))
                .collect();
            let skipped = downloaded.len() - files.len();
            if skipped > 0 {
                tracing::warn!(event = "export", task_id = %task_id.as_str(), skipped, "skipped unparseable downloaded files");
            }
            let calling_ae_title = calling_ae_title.to_string();
            let outcome = tokio::task::spawn_blocking(move || {
                export_via_scu(&destination, &calling_ae_title, max_pdu_length, files)
            })
            .await;
            match outcome {
                Ok(Ok(outcome)) => {
                    successful_export += outcome.successful as u32;
                    failure_count += outcome.failed as u32;
                }
                Ok(Err(e)) => {
                    tracing::warn!(event = "export", task_id = %task_id.as_str(), error = %e, "SCU association failed");
                    failure_count += downloaded.len() as u32;
                }
                Err(e) => {
                    tracing::error!(event = "export", task_id = %task_id.as_str(), error = %e, "SCU export task panicked");
                    failure_count += downloaded.len() as u32;
                }
            }
        }
        ExportTarget::DicomWeb { base_uri } => {
            let files: Vec<bytes::Bytes> = downloaded.into_iter().map(bytes::Bytes::from).collect();
            let outcome = export_via_stow(dicomweb, &base_uri, files).await;
            successful_export += outcome.successful as u32;
            failure_count += outcome.failed as u32;
        }
    }

    let _ = successful_export;
    let export_failure_rate = failure_count as f64 / uris_count as f64;
    tracing::info!(event = "export", task_id = %task_id.as_str(), successful_export, failure_count, export_failure_rate, "export pass complete");

    if export_failure_rate > failure_threshold {
        report(results_client, &task_id, task.retries, maximum_retries).await;
    } else if let Err(e) = results_client.report_success(&task_id).await {
        tracing::warn!(event = "export", task_id = %task_id.as_str(), error = %e, "failed to report export success");
    }
}

async fn report(results_client: &dyn ResultsClient, task_id: &TaskId, retries: u32, maximum_retries: u32) {
    let retry = retries < maximum_retries;
    if let Err(e) = results_client.report_failure(task_id, retry).await {
        tracing::warn!(event = "export", task_id = %task_id.as_str(), error = %e, "failed to report export failure");
    }
}
