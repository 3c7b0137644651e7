//! Broker management endpoint client
//!
//! The broker moves its own messages; the operator only instructs it over
//! the management HTTP interface and polls until the backlog reaches zero.
//! The interface is a trait so the drain state machine can be driven
//! against a fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::controller::PodKey;

/// Outcome of a drain request against one broker pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrainResponse {
    /// Broker accepted the request and has begun moving messages
    Acknowledged,
    /// Broker was already draining
    Pending,
    /// Broker rejected the request
    Failed(String),
}

/// Drain operations exposed by a broker's management endpoint
#[async_trait]
pub trait DrainRequester: Send + Sync {
    /// Ask the broker behind `pod` to redistribute its messages to peers
    async fn request_drain(&self, pod: &PodKey, statefulset: &str) -> Result<DrainResponse>;

    /// Undelivered messages still held by the broker behind `pod`
    async fn remaining_messages(&self, pod: &PodKey, statefulset: &str) -> Result<u64>;
}

/// Stable per-pod management URL, routed through the fleet's headless
/// Service so it stays resolvable while the pod is terminating
pub fn pod_management_url(pod: &PodKey, statefulset: &str, port: i32) -> String {
    format!(
        "http://{}.{}-headless.{}.svc:{}",
        pod.name, statefulset, pod.namespace, port
    )
}

/// reqwest-backed management client used in production
pub struct HttpDrainClient {
    http: HttpClient,
    port: i32,
    base_override: Option<String>,
}

#[derive(Deserialize)]
struct MessageCount {
    count: u64,
}

impl HttpDrainClient {
    pub fn new(port: i32, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            http,
            port,
            base_override: None,
        })
    }

    /// Route every request to a fixed base URL instead of pod DNS
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.base_override = Some(base.trim_end_matches('/').to_string());
        self
    }

    fn base_url(&self, pod: &PodKey, statefulset: &str) -> String {
        match &self.base_override {
            Some(base) => base.clone(),
            None => pod_management_url(pod, statefulset, self.port),
        }
    }
}

#[async_trait]
impl DrainRequester for HttpDrainClient {
    async fn request_drain(&self, pod: &PodKey, statefulset: &str) -> Result<DrainResponse> {
        let url = format!("{}/api/v1/drain", self.base_url(pod, statefulset));
        debug!("Requesting drain: POST {}", url);

        let response = self.http.post(&url).send().await?;

        match response.status().as_u16() {
            200 | 202 => Ok(DrainResponse::Acknowledged),
            409 => Ok(DrainResponse::Pending),
            code => {
                let body = response.text().await.unwrap_or_default();
                warn!("Drain request to {} rejected with HTTP {}: {}", url, code, body);
                Ok(DrainResponse::Failed(format!("HTTP {code}: {body}")))
            }
        }
    }

    async fn remaining_messages(&self, pod: &PodKey, statefulset: &str) -> Result<u64> {
        let url = format!("{}/api/v1/message-count", self.base_url(pod, statefulset));

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::DrainEndpointError(format!(
                "message count from {} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let count: MessageCount = response.json().await?;
        Ok(count.count)
    }
}
