//! HTTP client for the job status endpoint.

use job_types::{FetchError, JobStatus, StatusFetcher};

const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Fetcher that calls `GET {base_url}/job/{jobId}` and decodes a `JobStatus` body.
pub struct HttpStatusFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStatusFetcher {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            std::env::var("JOB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let token = std::env::var("JOB_API_TOKEN").ok().filter(|t| !t.is_empty());
        Self::new(base_url, token)
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/job/{}", self.base_url, job_id)
    }
}

#[async_trait::async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, FetchError> {
        if job_id.is_empty() {
            return Err(FetchError::EmptyJobId);
        }
        let mut req = self.client.get(self.job_url(job_id));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let res = req
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if !status.is_success() {
            tracing::debug!(job_id = %job_id, status = status.as_u16(), "status endpoint error");
            return Err(FetchError::from_status(job_id, status.as_u16(), body));
        }
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_strips_trailing_slash() {
        let f = HttpStatusFetcher::new("http://host/api/".to_string(), None);
        assert_eq!(f.job_url("42"), "http://host/api/job/42");
    }

    #[tokio::test]
    async fn empty_job_id_is_rejected_locally() {
        let f = HttpStatusFetcher::new("http://127.0.0.1:1".to_string(), None);
        assert_eq!(f.fetch_status("").await, Err(FetchError::EmptyJobId));
    }
}
