use super::{CaptureStatus, PaymentIntent, PaymentProcessor, ProcessorError};
use crate::config::GatewayConfig;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct LinkDescription {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<LinkDescription>,
}

/// PayPal Orders v2 client using OAuth2 client credentials.
pub struct PayPalClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    return_url: String,
    cancel_url: String,
    token: Mutex<Option<(String, Instant)>>,
}

impl PayPalClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            return_url: config.return_url.clone(),
            cancel_url: config.cancel_url.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ProcessorError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < *expires_at {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: AccessTokenResponse = response.json().await?;

        debug!(expires_in = body.expires_in, "obtained processor access token");
        *cached = Some((
            body.access_token.clone(),
            Instant::now() + Duration::from_secs(body.expires_in),
        ));
        Ok(body.access_token)
    }
}

#[async_trait]
impl PaymentProcessor for PayPalClient {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": format!("{:.2}", amount),
                }
            }],
            "application_context": {
                "return_url": self.return_url,
                "cancel_url": self.cancel_url,
            }
        });

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let order: OrderResponse = check_status(response).await?.json().await?;

        let approval_url = order
            .links
            .into_iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href)
            .ok_or(ProcessorError::MissingApprovalLink)?;

        info!(token = %order.id, "processor order created");
        Ok(PaymentIntent {
            token: order.id,
            approval_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture_intent(&self, token: &str) -> Result<CaptureStatus, ProcessorError> {
        let access = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders/{}/capture", self.base_url, token))
            .bearer_auth(access)
            .json(&json!({}))
            .send()
            .await?;

        // 4xx here means the processor refused the capture (not approved, already captured).
        if response.status().is_client_error() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, %body, "capture refused");
            return Ok(CaptureStatus::Other(format!("HTTP {}", status)));
        }

        let order: OrderResponse = check_status(response).await?.json().await?;
        if order.status.eq_ignore_ascii_case("COMPLETED") {
            Ok(CaptureStatus::Completed)
        } else {
            Ok(CaptureStatus::Other(order.status))
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProcessorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProcessorError::Rejected {
        status: status.as_u16(),
        body,
    })
}
