//! Remote object storage for transcoded videos.

use std::io;

use async_trait::async_trait;
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use url::Url;

use crate::config::StorageSection;
use crate::error::{MediaError, MediaResult};

/// Streamed upload body. An `Err` item means the producer failed and the
/// object must not be committed.
pub type ObjectBody = ReceiverStream<io::Result<Vec<u8>>>;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub key: String,
    pub resource_type: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub bytes: Option<u64>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Commits the object only if `body` ends without an error item.
    async fn put_stream(&self, request: UploadRequest, body: ObjectBody)
        -> MediaResult<StoredObject>;

    /// Discards anything the store may hold for `key`.
    async fn abort(&self, resource_type: &str, key: &str) -> MediaResult<()>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    bytes: Option<u64>,
}

/// Store reached over HTTP: `PUT <endpoint>/<resource_type>/<key>` with a
/// chunked body, `DELETE` on the same resource to abort.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    public_base_url: Option<Url>,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(client: Client, endpoint: &str) -> MediaResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| MediaError::Upload(format!("invalid storage endpoint: {err}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(MediaError::Upload(
                "storage endpoint cannot be used as a base url".into(),
            ));
        }
        Ok(Self {
            client,
            endpoint,
            public_base_url: None,
            token: None,
        })
    }

    pub fn from_config(section: &StorageSection) -> MediaResult<Self> {
        let client = Client::builder()
            .user_agent("clipframe/0.1")
            .build()
            .map_err(|err| MediaError::Upload(err.to_string()))?;
        let mut store = Self::new(client, &section.endpoint)?;
        if let Some(base) = &section.public_base_url {
            store = store.with_public_base_url(base)?;
        }
        if let Some(token) = section
            .api_token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|token| !token.trim().is_empty())
        {
            store = store.with_token(token);
        }
        Ok(store)
    }

    pub fn with_public_base_url(mut self, base: &str) -> MediaResult<Self> {
        let parsed = Url::parse(base)
            .map_err(|err| MediaError::Upload(format!("invalid public base url: {err}")))?;
        if parsed.cannot_be_a_base() {
            return Err(MediaError::Upload(
                "public base url cannot be used as a base url".into(),
            ));
        }
        self.public_base_url = Some(parsed);
        Ok(self)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn object_url(&self, resource_type: &str, key: &str) -> Url {
        join_segments(&self.endpoint, resource_type, key)
    }

    /// URL handed back to callers when the store's response omits one.
    pub fn public_url(&self, resource_type: &str, key: &str) -> Url {
        let base = self.public_base_url.as_ref().unwrap_or(&self.endpoint);
        join_segments(base, resource_type, key)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn join_segments(base: &Url, resource_type: &str, key: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(resource_type).push(key);
    }
    url
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_stream(
        &self,
        request: UploadRequest,
        body: ObjectBody,
    ) -> MediaResult<StoredObject> {
        let target = self.object_url(&request.resource_type, &request.key);
        debug!(key = %request.key, url = %target, "uploading object");
        let response = self
            .authorize(self.client.put(target))
            .header(reqwest::header::CONTENT_TYPE, &request.content_type)
            .body(Body::wrap_stream(body))
            .send()
            .await?
            .error_for_status()?;
        let payload = response.bytes().await?;
        let parsed: Option<UploadResponse> = serde_json::from_slice(&payload).ok();
        let url = parsed
            .as_ref()
            .and_then(|body| body.secure_url.clone().or_else(|| body.url.clone()))
            .unwrap_or_else(|| {
                self.public_url(&request.resource_type, &request.key)
                    .to_string()
            });
        Ok(StoredObject {
            key: request.key,
            url,
            bytes: parsed.and_then(|body| body.bytes),
        })
    }

    async fn abort(&self, resource_type: &str, key: &str) -> MediaResult<()> {
        let target = self.object_url(resource_type, key);
        let response = self.authorize(self.client.delete(target)).send().await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(MediaError::Upload(format!(
                "abort of {key} returned {}",
                response.status()
            )))
        }
    }
}
