//! HTTP decision client
//!
//! Posts form-encoded requests to the decision service and decodes the JSON
//! envelope it answers with.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use strandgate_core::config::DecisionConfig;
use tracing::{debug, warn};

use crate::error::{DecisionError, DecisionResult};
use crate::types::*;

/// The external authority that decides every bind and search.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn bind(&self, request: &BindDecisionRequest) -> DecisionResult<BindDecision>;

    async fn search(&self, request: &SearchDecisionRequest) -> DecisionResult<SearchDecision>;
}

/// Decision service reached over HTTP
pub struct HttpDecisionClient {
    client: Client,
    bind_url: String,
    search_url: String,
}

impl HttpDecisionClient {
    /// Create a new client from configuration
    pub fn new(config: &DecisionConfig) -> DecisionResult<Self> {
        config
            .validate()
            .map_err(|e| DecisionError::InvalidUrl(e.to_string()))?;

        let client = ClientBuilder::new()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| DecisionError::Client(e.to_string()))?;

        Ok(Self {
            client,
            bind_url: config.bind_url(),
            search_url: config.search_url(),
        })
    }

    pub fn bind_url(&self) -> &str {
        &self.bind_url
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    /// POST a form and decode the reply.
    ///
    /// Transport failures (connect, send, read, timeout) are errors. The HTTP
    /// status is not checked beyond logging; the body alone decides.
    async fn post_form<F, T>(&self, url: &str, form: &F) -> DecisionResult<T>
    where
        F: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| DecisionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = %status, "decision service returned non-success status");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DecisionError::Transport(e.to_string()))?;

        debug!(url, status = %status, body_len = body.len(), "decision response received");
        Ok(decode_permissive(&body))
    }
}

#[async_trait]
impl DecisionService for HttpDecisionClient {
    async fn bind(&self, request: &BindDecisionRequest) -> DecisionResult<BindDecision> {
        self.post_form(&self.bind_url, request).await
    }

    async fn search(&self, request: &SearchDecisionRequest) -> DecisionResult<SearchDecision> {
        self.post_form(&self.search_url, request).await
    }
}

impl std::fmt::Debug for HttpDecisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDecisionClient")
            .field("bind_url", &self.bind_url)
            .field("search_url", &self.search_url)
            .finish()
    }
}
