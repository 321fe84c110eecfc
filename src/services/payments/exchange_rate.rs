use super::{CurrencyConverter, ProcessorError};
use crate::config::ExchangeRateConfig;
use crate::services::pricing::round2;
use async_trait::async_trait;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct LatestRates {
    rates: HashMap<String, f64>,
}

/// Looks up `{base_url}/latest/{FROM}` and multiplies by the target rate.
pub struct ExchangeRateClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExchangeRateClient {
    pub fn new(config: &ExchangeRateConfig) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CurrencyConverter for ExchangeRateClient {
    #[instrument(skip(self))]
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Decimal, ProcessorError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(amount);
        }

        let mut request = self
            .client
            .get(format!("{}/latest/{}", self.base_url, from.to_ascii_uppercase()));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let latest: LatestRates = response.json().await?;
        let rate = latest
            .rates
            .get(&to.to_ascii_uppercase())
            .copied()
            .and_then(Decimal::from_f64)
            .filter(|r| *r > Decimal::ZERO)
            .ok_or_else(|| ProcessorError::MissingRate {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        debug!(%rate, "exchange rate resolved");
        Ok(round2(amount * rate))
    }
}
