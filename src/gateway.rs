use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::GatewayError;

/// GatewayConfirmation
///
/// What the external gateway knows about a payment: whether it settled, which
/// user paid, and the purchased tier. The tier arrives as raw text; mapping
/// it into the closed plan vocabulary is the workflow's job, so a bad tier is
/// rejected there before any plan write.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfirmation {
    pub settled: bool,
    pub user_id: Uuid,
    pub tier: String,
}

/// PaymentGateway Contract
///
/// Defines the abstract contract for the external confirmation call. This
/// trait allows swapping the concrete implementation, from the real HTTP
/// client (HttpPaymentGateway) in production to the scripted mock
/// (MockPaymentGateway) in tests, without affecting the workflow.
///
/// The confirmation call is the only place this core talks to the gateway;
/// the gateway's own protocol is otherwise opaque.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm(&self, payment_id: &str) -> Result<GatewayConfirmation, GatewayError>;
}

/// GatewayState
///
/// The concrete type used to share the gateway client across the application
/// state.
pub type GatewayState = Arc<dyn PaymentGateway>;

/// HttpPaymentGateway
///
/// The concrete implementation calling the gateway's confirmation endpoint
/// over HTTPS. The client carries the configured request timeout, so a hung
/// gateway surfaces as `Unavailable` within bounded time rather than pinning
/// the request task.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// Constructs the gateway client from the loaded configuration.
    /// Construction happens once at startup, so a bad TLS/runtime setup
    /// fails fast here.
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .expect("FATAL: failed to construct gateway HTTP client");

        Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.gateway_api_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    /// confirm
    ///
    /// GET `{base}/v1/payments/{id}/confirmation`. Timeouts and transport
    /// errors map to `Unavailable` (retryable); a 404 means the gateway does
    /// not know the id at all.
    async fn confirm(&self, payment_id: &str) -> Result<GatewayConfirmation, GatewayError> {
        let url = format!("{}/v1/payments/{}/confirmation", self.base_url, payment_id);

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Unavailable("confirmation call timed out".to_string())
                } else {
                    GatewayError::Unavailable(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::PaymentNotFound);
        }

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        response
            .json::<GatewayConfirmation>()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("malformed confirmation: {e}")))
    }
}

// --- The Mock Implementation (For Unit Tests) ---

/// MockPaymentGateway
///
/// A scripted implementation of `PaymentGateway` used for testing the
/// workflow without a network. Responses are consumed front-to-back, one per
/// `confirm` call; once the script runs dry every further call reports
/// `PaymentNotFound`. The call counter lets tests assert how many times the
/// workflow actually reached the gateway.
#[derive(Default)]
pub struct MockPaymentGateway {
    responses: Mutex<VecDeque<Result<GatewayConfirmation, GatewayError>>>,
    calls: Mutex<u32>,
    /// Delay applied before answering, to hold a verification attempt open
    /// while a test races a second trigger against it.
    pub hold: Option<Duration>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(
        responses: Vec<Result<GatewayConfirmation, GatewayError>>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
            hold: None,
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().expect("gateway call counter poisoned")
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn confirm(&self, _payment_id: &str) -> Result<GatewayConfirmation, GatewayError> {
        if let Some(hold) = self.hold {
            tokio::time::sleep(hold).await;
        }

        *self.calls.lock().expect("gateway call counter poisoned") += 1;

        self.responses
            .lock()
            .expect("gateway script poisoned")
            .pop_front()
            .unwrap_or(Err(GatewayError::PaymentNotFound))
    }
}
