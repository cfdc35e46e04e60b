//! JobSubmissionService (section 4.9): drains repository jobs in state
//! `Created`, creates the platform job, uploads the payload, starts it,
//! and hands staged files to the cleanup queue.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cleanup_queue::InstanceCleanupQueue;
use crate::health::{HealthReporter, ServiceState};
use crate::model::{InferenceJob, JobState};
use crate::platform::{JobsClient, PayloadsClient};
use crate::repository::Repository;
use crate::types::map_priority_byte;

pub struct JobSubmissionConfig {
    pub poll_frequency: Duration,
}

/// Runs until `cancel` fires; each poll tick drains every `Created` job to
/// completion (start-to-finish per job, not pipelined) before re-arming.
pub async fn job_submission_service(
    repository: Arc<dyn Repository>,
    jobs_client: Arc<dyn JobsClient>,
    payloads_client: Arc<dyn PayloadsClient>,
    cleanup_queue: InstanceCleanupQueue,
    health: HealthReporter,
    cancel: CancellationToken,
    config: JobSubmissionConfig,
) -> anyhow::Result<()> {
    health.set("JobSubmissionService", ServiceState::Running);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.poll_frequency) => {}
        }

        let jobs = match repository.list_created_inference_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(event = "job_submission", error = %e, "failed to list created jobs");
                continue;
            }
        };

        for job in jobs {
            submit_one(
                job,
                repository.as_ref(),
                jobs_client.as_ref(),
                payloads_client.as_ref(),
                &cleanup_queue,
            )
            .await;
        }
    }

    health.set("JobSubmissionService", ServiceState::Stopped);
    Ok(())
}

async fn submit_one(
    mut job: InferenceJob,
    repository: &dyn Repository,
    jobs_client: &dyn JobsClient,
    payloads_client: &dyn PayloadsClient,
    cleanup_queue: &InstanceCleanupQueue,
) {
    // Idempotent on jobId: a job that already has one (retried after a
    // crash between create and start) is never recreated.
    if job.job_id.is_none() {
        let priority = map_priority_byte(job.priority);
        match jobs_client.create(&job.pipeline_id, &job.job_name, priority).await {
            Ok((job_id, payload_id)) => {
                job.job_id = Some(job_id);
                job.payload_id = Some(payload_id);
            }
            Err(e) => {
                tracing::warn!(event = "job_submission", job_name = %job.job_name, error = %e, "failed to create platform job");
                job.advance(JobState::Failed);
                let _ = repository.put_inference_job(job).await;
                return;
            }
        }
    }

    let payload_id = job.payload_id.clone().expect("payload_id set alongside job_id");
    let mut upload_failed = false;
    for instance in &job.instances {
        if let Err(e) = payloads_client.upload(&payload_id, &instance.storage_path).await {
            tracing::warn!(event = "job_submission", job_name = %job.job_name, path = %instance.storage_path, error = %e, "failed to upload payload file");
            upload_failed = true;
            break;
        }
    }

    if upload_failed {
        job.advance(JobState::Failed);
        let _ = repository.put_inference_job(job).await;
        return;
    }
    job.advance(JobState::PayloadUploaded);

    let job_id = job.job_id.clone().expect("job_id set above");
    match jobs_client.start(&job_id).await {
        Ok(()) => job.advance(JobState::Started),
        Err(e) => {
            tracing::warn!(event = "job_submission", job_name = %job.job_name, error = %e, "failed to start platform job");
            job.advance(JobState::Failed);
        }
    }

    let started = job.state == JobState::Started;
    let instances = job.instances.clone();
    if let Err(e) = repository.put_inference_job(job).await {
        tracing::warn!(event = "job_submission", error = %e, "failed to persist job state");
    }

    if started {
        for instance in instances {
            cleanup_queue.push(instance.storage_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FakeRepository;
    use crate::types::{JobId, PayloadId, PipelineId};
    use async_trait::async_trait;
    use camino::Utf8Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct StubJobsClient {
        fail_create: bool,
    }

    #[async_trait]
    impl JobsClient for StubJobsClient {
        async fn create(
            &self,
            _pipeline_id: &PipelineId,
            _job_name: &str,
            _priority: crate::types::JobPriority,
        ) -> anyhow::Result<(JobId, PayloadId)> {
            if self.fail_create {
                anyhow::bail!("boom");
            }
            Ok((JobId::from_static("job-1"), PayloadId::from_static("payload-1")))
        }

        async fn start(&self, _job_id: &JobId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubPayloadsClient {
        uploaded: AtomicBool,
    }

    #[async_trait]
    impl PayloadsClient for StubPayloadsClient {
        async fn upload(&self, _payload_id: &PayloadId, _path: &Utf8Path) -> anyhow::Result<()> {
            self.uploaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn download(&self, _payload_id: &PayloadId, _uri: &str) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }
    }

    fn job() -> InferenceJob {
        InferenceJob {
            record_id: Uuid::new_v4(),
            job_id: None,
            payload_id: None,
            job_name: "job".to_string(),
            pipeline_id: PipelineId::from_static("pipeline-1"),
            priority: 128,
            instances: Vec::new(),
            state: JobState::Created,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn test_successful_submission_reaches_started_and_queues_cleanup() {
        let repository = FakeRepository::new();
        let jobs_client = StubJobsClient { fail_create: false };
        let payloads_client = StubPayloadsClient {
            uploaded: AtomicBool::new(false),
        };
        let (cleanup_queue, _rx) = InstanceCleanupQueue::new();

        submit_one(job(), &repository, &jobs_client, &payloads_client, &cleanup_queue).await;

        let jobs = repository.list_created_inference_jobs().await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_marks_job_failed() {
        let repository = FakeRepository::new();
        let jobs_client = StubJobsClient { fail_create: true };
        let payloads_client = StubPayloadsClient {
            uploaded: AtomicBool::new(false),
        };
        let (cleanup_queue, _rx) = InstanceCleanupQueue::new();
        let submitted = job();
        let record_id = submitted.record_id;

        submit_one(submitted, &repository, &jobs_client, &payloads_client, &cleanup_queue).await;

        let persisted = repository.get_inference_job(record_id).await.unwrap().unwrap();
        assert_eq!(persisted.state, JobState::Failed);
    }
}
