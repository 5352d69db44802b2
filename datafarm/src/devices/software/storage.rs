use crate::error::{AgentError, CaptureStep};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Remote storage that keeps the captured photos.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `name` and return the reference
    /// other systems use to locate it.
    async fn upload(&self, path: &Path, name: &str) -> Result<String, AgentError>;
}

fn default_endpoint() -> String {
    String::from("https://storage.googleapis.com")
}

fn default_token_env() -> Option<String> {
    Some(String::from("GCS_ACCESS_TOKEN"))
}

/// Bucket the photos go to.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct StorageConfig {
    /// Bucket name, also the prefix of the published reference.
    pub bucket: String,
    /// Storage api root.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the oauth access token. Tokens are
    /// short lived, so it is read again for every upload.
    #[serde(default = "default_token_env")]
    pub token_env: Option<String>,
}

/// Cloud storage bucket using the json api media upload.
pub struct CloudBucket {
    client: reqwest::Client,
    config: StorageConfig,
}

impl CloudBucket {
    /// Create the bucket client by consuming a config.
    ///
    /// * `config`: `StorageConfig`
    pub fn new(config: StorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket
        )
    }

    /// Reference of an object once uploaded.
    ///
    /// * `name`: object name.
    pub fn reference(&self, name: &str) -> String {
        format!("{}/{}", self.config.bucket, name)
    }
}

#[async_trait]
impl ObjectStore for CloudBucket {
    async fn upload(&self, path: &Path, name: &str) -> Result<String, AgentError> {
        let upload_err = |reason: String| AgentError::collaborator(CaptureStep::Upload, reason);
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| upload_err(format!("{}: {e}", path.display())))?;

        let mut request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", name)])
            .header(CONTENT_TYPE, "image/jpeg")
            .body(body);
        if let Some(token) = self
            .config
            .token_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
        {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upload_err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(upload_err(format!("{status}: {text}")));
        }
        debug!(%status, name, "photo uploaded");
        Ok(self.reference(name))
    }
}
