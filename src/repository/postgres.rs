use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::Repository;
use crate::model::{
    DestinationApplicationEntity, InferenceJob, InferenceRequest, LocalApplicationEntity,
    SourceApplicationEntity,
};
use crate::types::{AeTitle, TransactionId};

/// The production `Repository`, backed by `sqlx`'s Postgres pool. Entities
/// are stored as `jsonb` columns keyed by their natural identifier: the
/// repository's job here is transactional CRUD, not relational modeling of
/// DICOM/platform concepts the rest of the core already types.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(connection_string: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;
        let repository = Self { pool };
        repository.migrate().await?;
        Ok(repository)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_application_entities (
                ae_title TEXT PRIMARY KEY,
                data JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS source_application_entities (
                ae_title TEXT NOT NULL,
                host_ip TEXT NOT NULL,
                PRIMARY KEY (ae_title, host_ip)
            );
            CREATE TABLE IF NOT EXISTS destination_application_entities (
                name TEXT PRIMARY KEY,
                data JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS inference_requests (
                transaction_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                data JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS inference_jobs (
                record_id UUID PRIMARY KEY,
                state TEXT NOT NULL,
                data JSONB NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn list_local_aes(&self) -> anyhow::Result<Vec<LocalApplicationEntity>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM local_application_entities")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(data,)| serde_json::from_value(data))
            .collect::<Result<_, _>>()?)
    }

    async fn get_local_ae(&self, ae_title: &AeTitle) -> anyhow::Result<Option<LocalApplicationEntity>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM local_application_entities WHERE ae_title = $1",
        )
        .bind(ae_title.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(data,)| serde_json::from_value(data)).transpose()?)
    }

    async fn put_local_ae(&self, ae: LocalApplicationEntity) -> anyhow::Result<()> {
        let data = serde_json::to_value(&ae)?;
        sqlx::query(
            r#"INSERT INTO local_application_entities (ae_title, data) VALUES ($1, $2)
               ON CONFLICT (ae_title) DO UPDATE SET data = EXCLUDED.data"#,
        )
        .bind(ae.ae_title.as_str())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_local_ae(&self, ae_title: &AeTitle) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM local_application_entities WHERE ae_title = $1")
            .bind(ae_title.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_source_aes(&self) -> anyhow::Result<Vec<SourceApplicationEntity>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT ae_title, host_ip FROM source_application_entities")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(ae_title, host_ip)| SourceApplicationEntity {
                ae_title: AeTitle::from(ae_title),
                host_ip,
            })
            .collect())
    }

    async fn put_source_ae(&self, ae: SourceApplicationEntity) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO source_application_entities (ae_title, host_ip) VALUES ($1, $2)
               ON CONFLICT (ae_title, host_ip) DO NOTHING"#,
        )
        .bind(ae.ae_title.as_str())
        .bind(ae.host_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_destination_aes(&self) -> anyhow::Result<Vec<DestinationApplicationEntity>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM destination_application_entities")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(data,)| serde_json::from_value(data))
            .collect::<Result<_, _>>()?)
    }

    async fn get_destination_ae(&self, name: &str) -> anyhow::Result<Option<DestinationApplicationEntity>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM destination_application_entities WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(data,)| serde_json::from_value(data)).transpose()?)
    }

    async fn put_destination_ae(&self, ae: DestinationApplicationEntity) -> anyhow::Result<()> {
        let data = serde_json::to_value(&ae)?;
        sqlx::query(
            r#"INSERT INTO destination_application_entities (name, data) VALUES ($1, $2)
               ON CONFLICT (name) DO UPDATE SET data = EXCLUDED.data"#,
        )
        .bind(ae.name)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_inference_request(&self, request: InferenceRequest) -> anyhow::Result<()> {
        let state = format!("{:?}", request.state);
        let data = serde_json::to_value(&request)?;
        sqlx::query(
            r#"INSERT INTO inference_requests (transaction_id, state, data) VALUES ($1, $2, $3)
               ON CONFLICT (transaction_id) DO UPDATE SET state = EXCLUDED.state, data = EXCLUDED.data"#,
        )
        .bind(request.transaction_id.as_str())
        .bind(state)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_inference_request(
        &self,
        transaction_id: &TransactionId,
    ) -> anyhow::Result<Option<InferenceRequest>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM inference_requests WHERE transaction_id = $1")
                .bind(transaction_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(data,)| serde_json::from_value(data)).transpose()?)
    }

    async fn list_queued_inference_requests(&self) -> anyhow::Result<Vec<InferenceRequest>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM inference_requests WHERE state = 'Queued'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(data,)| serde_json::from_value(data))
            .collect::<Result<_, _>>()?)
    }

    async fn put_inference_job(&self, job: InferenceJob) -> anyhow::Result<()> {
        let state = format!("{:?}", job.state);
        let data = serde_json::to_value(&job)?;
        sqlx::query(
            r#"INSERT INTO inference_jobs (record_id, state, data) VALUES ($1, $2, $3)
               ON CONFLICT (record_id) DO UPDATE SET state = EXCLUDED.state, data = EXCLUDED.data"#,
        )
        .bind(job.record_id)
        .bind(state)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_inference_job(&self, record_id: Uuid) -> anyhow::Result<Option<InferenceJob>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM inference_jobs WHERE record_id = $1")
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(data,)| serde_json::from_value(data)).transpose()?)
    }

    async fn list_created_inference_jobs(&self) -> anyhow::Result<Vec<InferenceJob>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM inference_jobs WHERE state = 'Created'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(data,)| serde_json::from_value(data))
            .collect::<Result<_, _>>()?)
    }
}
