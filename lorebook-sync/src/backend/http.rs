//! Plain HTTP file backend.
//!
//! Files live at `{base_url}/{name}`. Reads are `GET`s; a commit replays the
//! buffered `PUT`s and `DELETE`s one after another, stopping at the first
//! failure.

use super::{FileBackend, FileOp, FileReadonlyBackend, FileReader, FileWriter, WriteBuffer};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// HTTP backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Base URL every file path is appended to.
    pub base_url: String,
    /// Bearer token sent with every request, if any.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/lorebook".to_string(),
            token: None,
            timeout_secs: 60,
        }
    }
}

struct HttpInner {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpInner {
    fn url(&self, name: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) if !token.is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }
}

/// Files served by a REST endpoint.
#[derive(Clone)]
pub struct HttpFileBackend {
    inner: Arc<HttpInner>,
}

impl HttpFileBackend {
    pub fn new(config: HttpBackendConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            inner: Arc::new(HttpInner { config, client }),
        })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.inner.config
    }
}

fn ensure_success(response: Response, url: &str) -> SyncResult<Response> {
    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(SyncError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

#[async_trait]
impl FileReader for HttpFileBackend {
    async fn read(&self, name: &str) -> SyncResult<Option<Vec<u8>>> {
        let url = self.inner.url(name);
        debug!("GET {}", url);
        let response = self
            .inner
            .authorize(self.inner.client.get(&url))
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("GET {url} failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, &url)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(format!("read body of {url} failed: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }
}

impl FileReadonlyBackend for HttpFileBackend {
    fn reader(&self) -> Arc<dyn FileReader> {
        Arc::new(self.clone())
    }
}

impl FileBackend for HttpFileBackend {
    fn writer(&self) -> Box<dyn FileWriter> {
        Box::new(HttpFileWriter {
            inner: self.inner.clone(),
            buffer: WriteBuffer::new(),
        })
    }
}

struct HttpFileWriter {
    inner: Arc<HttpInner>,
    buffer: WriteBuffer,
}

#[async_trait]
impl FileWriter for HttpFileWriter {
    fn write(&mut self, name: &str, content: Vec<u8>) {
        self.buffer.write(name, content);
    }

    fn delete(&mut self, name: &str) {
        self.buffer.delete(name);
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }

    async fn commit(&mut self) -> SyncResult<()> {
        let ops = self.buffer.take();
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        for op in ops {
            let url = self.inner.url(op.name());
            let request = match op {
                FileOp::Write { content, .. } => {
                    debug!("PUT {} ({} bytes)", url, content.len());
                    self.inner.client.put(&url).body(content)
                }
                FileOp::Delete { .. } => {
                    debug!("DELETE {}", url);
                    self.inner.client.delete(&url)
                }
            };
            let response = self
                .inner
                .authorize(request)
                .send()
                .await
                .map_err(|e| SyncError::Network(format!("request to {url} failed: {e}")))?;
            ensure_success(response, &url)?;
        }
        info!("Committed {} operations to {}", count, self.inner.config.base_url);
        Ok(())
    }
}
