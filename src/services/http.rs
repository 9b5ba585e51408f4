//! JSON-over-HTTP collaborator.
//!
//! POSTs the request body as JSON to a fixed URL and decodes the JSON
//! response. The call's timeout is the time left in its [`Budget`]; the token
//! budget travels in the `x-max-tokens` header.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Budget, Collaborator, ServiceError};

/// Remote implementation of any collaborator interface.
pub struct HttpCollaborator<I, O> {
    name: String,
    url: String,
    client: reqwest::Client,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> std::fmt::Debug for HttpCollaborator<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCollaborator")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish()
    }
}

impl<I, O> HttpCollaborator<I, O> {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(name, url, client))
    }

    /// Share an existing client (connection pool) between collaborators.
    pub fn with_client(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
            _types: PhantomData,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(timeout.as_millis() as u64)
    } else if err.is_decode() || err.is_body() {
        ServiceError::Malformed(err.to_string())
    } else {
        ServiceError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl<I, O> Collaborator<I, O> for HttpCollaborator<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: I, budget: Budget) -> Result<O, ServiceError> {
        let timeout = budget.remaining();
        if timeout.is_zero() {
            return Err(ServiceError::Timeout(0));
        }

        log::debug!("{}: POST {} (timeout {}ms)", self.name, self.url, timeout.as_millis());
        let response = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .header("x-max-tokens", budget.max_tokens.to_string())
            .json(&input)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("{}: status {} from {}", self.name, status.as_u16(), self.url);
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| classify(e, timeout))?;
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}
