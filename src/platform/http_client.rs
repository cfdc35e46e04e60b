use async_trait::async_trait;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use super::retry::with_retry;
use super::{JobsClient, PayloadsClient, PendingExportTask, ResultsClient};
use crate::types::{JobId, JobPriority, PayloadId, PipelineId, TaskId};

/// The production platform client: one `reqwest::Client` talking to the
/// job-execution platform's base URL and the results service's base URL,
/// each overridable via the Kubernetes service-discovery environment
/// variables named in spec section 6 (`CLARA_SERVICE_HOST`/
/// `CLARA_SERVICE_PORT_API`, `CLARA_RESULTSSERVICE_SERVICE_HOST`/
/// `CLARA_RESULTSSERVICE_SERVICE_PORT`). These are read directly with
/// `std::env::var`, not through the `figment`-merged `Configuration`,
/// because they are platform service-discovery conventions, not adapter
/// settings.
pub struct HttpPlatformClient {
    client: reqwest::Client,
    platform_base_url: String,
    results_base_url: String,
    max_retries: u32,
}

impl HttpPlatformClient {
    pub fn new(configured_platform_url: &str, configured_results_url: &str, max_retries: u32) -> anyhow::Result<Self> {
        let platform_base_url = resolve_base_url(
            configured_platform_url,
            "CLARA_SERVICE_HOST",
            "CLARA_SERVICE_PORT_API",
        );
        let results_base_url = resolve_base_url(
            configured_results_url,
            "CLARA_RESULTSSERVICE_SERVICE_HOST",
            "CLARA_RESULTSSERVICE_SERVICE_PORT",
        );
        let client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
        Ok(Self {
            client,
            platform_base_url,
            results_base_url,
            max_retries,
        })
    }
}

fn resolve_base_url(configured: &str, host_var: &str, port_var: &str) -> String {
    match (std::env::var(host_var), std::env::var(port_var)) {
        (Ok(host), Ok(port)) => format!("http://{host}:{port}"),
        _ => configured.to_string(),
    }
}

#[derive(Serialize)]
struct CreateJobRequest<'a> {
    pipeline_id: &'a str,
    job_name: &'a str,
    priority: &'static str,
}

#[derive(Deserialize)]
struct CreateJobResponse {
    job_id: String,
    payload_id: String,
}

fn priority_str(priority: JobPriority) -> &'static str {
    match priority {
        JobPriority::Lower => "Lower",
        JobPriority::Normal => "Normal",
        JobPriority::Higher => "Higher",
        JobPriority::Immediate => "Immediate",
    }
}

#[async_trait]
impl JobsClient for HttpPlatformClient {
    async fn create(
        &self,
        pipeline_id: &PipelineId,
        job_name: &str,
        priority: JobPriority,
    ) -> anyhow::Result<(JobId, PayloadId)> {
        let url = format!("{}/jobs", self.platform_base_url);
        let body = CreateJobRequest {
            pipeline_id: pipeline_id.as_str(),
            job_name,
            priority: priority_str(priority),
        };
        let response: CreateJobResponse = with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            let body = &body;
            async move {
                let res = client.post(url).json(body).send().await?;
                Ok(res.error_for_status()?.json().await?)
            }
        })
        .await?;
        Ok((JobId::from(response.job_id), PayloadId::from(response.payload_id)))
    }

    async fn start(&self, job_id: &JobId) -> anyhow::Result<()> {
        let url = format!("{}/jobs/{}/start", self.platform_base_url, job_id.as_str());
        with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            async move {
                client.post(url).send().await?.error_for_status()?;
                Ok(())
            }
        })
        .await
    }
}

#[async_trait]
impl PayloadsClient for HttpPlatformClient {
    async fn upload(&self, payload_id: &PayloadId, path: &Utf8Path) -> anyhow::Result<()> {
        let url = format!("{}/payloads/{}/files", self.platform_base_url, payload_id.as_str());
        let bytes = fs_err::tokio::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "file.dcm".to_string());
        with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            let bytes = bytes.clone();
            let file_name = file_name.clone();
            async move {
                let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                let form = reqwest::multipart::Form::new().part("file", part);
                client.post(url).multipart(form).send().await?.error_for_status()?;
                Ok(())
            }
        })
        .await
    }

    async fn download(&self, payload_id: &PayloadId, uri: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/payloads/{}/{}", self.platform_base_url, payload_id.as_str(), uri);
        let bytes = with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            async move {
                let res = client.get(url).send().await?.error_for_status()?;
                Ok(res.bytes().await?.to_vec())
            }
        })
        .await?;
        Ok(bytes)
    }
}

#[derive(Deserialize)]
struct PendingTaskResponse {
    task_id: String,
    job_id: String,
    payload_id: String,
    parameters: serde_json::Value,
    uris: Vec<String>,
    retries: u32,
}

#[async_trait]
impl ResultsClient for HttpPlatformClient {
    async fn get_pending(&self, agent: &str, limit: u32) -> anyhow::Result<Vec<PendingExportTask>> {
        let url = format!("{}/results/pending", self.results_base_url);
        let response: Vec<PendingTaskResponse> = with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            async move {
                let res = client
                    .get(url)
                    .query(&[("agent", agent), ("limit", &limit.to_string())])
                    .send()
                    .await?;
                Ok(res.error_for_status()?.json().await?)
            }
        })
        .await?;
        Ok(response
            .into_iter()
            .map(|t| PendingExportTask {
                task_id: TaskId::from(t.task_id),
                job_id: JobId::from(t.job_id),
                payload_id: PayloadId::from(t.payload_id),
                parameters: t.parameters,
                uris: t.uris,
                retries: t.retries,
            })
            .collect())
    }

    async fn report_success(&self, task_id: &TaskId) -> anyhow::Result<()> {
        let url = format!("{}/results/{}/success", self.results_base_url, task_id.as_str());
        with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            async move {
                client.post(url).send().await?.error_for_status()?;
                Ok(())
            }
        })
        .await
    }

    async fn report_failure(&self, task_id: &TaskId, retry: bool) -> anyhow::Result<()> {
        let url = format!("{}/results/{}/failure", self.results_base_url, task_id.as_str());
        with_retry(self.max_retries, || {
            let client = &self.client;
            let url = &url;
            async move {
                client
                    .post(url)
                    .query(&[("retry", retry.to_string())])
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_base_url_prefers_env_when_both_set() {
        std::env::set_var("TEST_HOST_VAR_A", "platform.svc");
        std::env::set_var("TEST_PORT_VAR_A", "8080");
        let resolved = resolve_base_url("http://configured", "TEST_HOST_VAR_A", "TEST_PORT_VAR_A");
        assert_eq!(resolved, "http://platform.svc:8080");
        std::env::remove_var("TEST_HOST_VAR_A");
        std::env::remove_var("TEST_PORT_VAR_A");
    }

    #[test]
    fn test_resolve_base_url_falls_back_to_configured() {
        let resolved = resolve_base_url(
            "http://configured",
            "TEST_HOST_VAR_B_UNSET",
            "TEST_PORT_VAR_B_UNSET",
        );
        assert_eq!(resolved, "http://configured");
    }
}
