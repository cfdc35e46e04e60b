use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Repository;
use crate::model::{
    DestinationApplicationEntity, InferenceJob, InferenceRequest, LocalApplicationEntity,
    RequestState, SourceApplicationEntity,
};
use crate::types::{AeTitle, TransactionId};

/// An in-memory stand-in for `PostgresRepository`, used in tests in the
/// same role `oxidicom`'s `CubePostgresClient` plays against a real
/// database in production.
#[derive(Default)]
pub struct FakeRepository {
    local_aes: Mutex<HashMap<AeTitle, LocalApplicationEntity>>,
    source_aes: Mutex<Vec<SourceApplicationEntity>>,
    destination_aes: Mutex<HashMap<String, DestinationApplicationEntity>>,
    inference_requests: Mutex<HashMap<TransactionId, InferenceRequest>>,
    inference_jobs: Mutex<HashMap<Uuid, InferenceJob>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn list_local_aes(&self) -> anyhow::Result<Vec<LocalApplicationEntity>> {
        Ok(self.local_aes.lock().await.values().cloned().collect())
    }

    async fn get_local_ae(&self, ae_title: &AeTitle) -> anyhow::Result<Option<LocalApplicationEntity>> {
        Ok(self.local_aes.lock().await.get(ae_title).cloned())
    }

    async fn put_local_ae(&self, ae: LocalApplicationEntity) -> anyhow::Result<()> {
        self.local_aes.lock().await.insert(ae.ae_title.clone(), ae);
        Ok(())
    }

    async fn delete_local_ae(&self, ae_title: &AeTitle) -> anyhow::Result<()> {
        self.local_aes.lock().await.remove(ae_title);
        Ok(())
    }

    async fn list_source_aes(&self) -> anyhow::Result<Vec<SourceApplicationEntity>> {
        Ok(self.source_aes.lock().await.clone())
    }

    async fn put_source_ae(&self, ae: SourceApplicationEntity) -> anyhow::Result<()> {
        self.source_aes.lock().await.push(ae);
        Ok(())
    }

    async fn list_destination_aes(&self) -> anyhow::Result<Vec<DestinationApplicationEntity>> {
        Ok(self.destination_aes.lock().await.values().cloned().collect())
    }

    async fn get_destination_ae(&self, name: &str) -> anyhow::Result<Option<DestinationApplicationEntity>> {
        Ok(self.destination_aes.lock().await.get(name).cloned())
    }

    async fn put_destination_ae(&self, ae: DestinationApplicationEntity) -> anyhow::Result<()> {
        self.destination_aes.lock().await.insert(ae.name.clone(), ae);
        Ok(())
    }

    async fn put_inference_request(&self, request: InferenceRequest) -> anyhow::Result<()> {
        self.inference_requests
            .lock()
            .await
            .insert(request.transaction_id.clone(), request);
        Ok(())
    }

    async fn get_inference_request(
        &self,
        transaction_id: &TransactionId,
    ) -> anyhow::Result<Option<InferenceRequest>> {
        Ok(self
            .inference_requests
            .lock()
            .await
            .get(transaction_id)
            .cloned())
    }

    async fn list_queued_inference_requests(&self) -> anyhow::Result<Vec<InferenceRequest>> {
        Ok(self
            .inference_requests
            .lock()
            .await
            .values()
            .filter(|r| r.state == RequestState::Queued)
            .cloned()
            .collect())
    }

    async fn put_inference_job(&self, job: InferenceJob) -> anyhow::Result<()> {
        self.inference_jobs.lock().await.insert(job.record_id, job);
        Ok(())
    }

    async fn get_inference_job(&self, record_id: Uuid) -> anyhow::Result<Option<InferenceJob>> {
        Ok(self.inference_jobs.lock().await.get(&record_id).cloned())
    }

    async fn list_created_inference_jobs(&self) -> anyhow::Result<Vec<InferenceJob>> {
        use crate::model::JobState;
        Ok(self
            .inference_jobs
            .lock()
            .await
            .values()
            .filter(|j| j.state == JobState::Created)
            .cloned()
            .collect())
    }
}
