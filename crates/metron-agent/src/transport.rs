use std::time::Duration;

use async_trait::async_trait;
use metron_common::{EncodedBatch, HASH_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};

use crate::error::{AgentError, Result};

/// Delivers an encoded batch and reports the response status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &EncodedBatch) -> Result<u16>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &EncodedBatch) -> Result<u16> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip");
        if let Some(hash) = &batch.hash {
            request = request.header(HASH_HEADER, hash);
        }

        let response = request.body(batch.body.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout("report request")
            } else {
                AgentError::Transport(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}
