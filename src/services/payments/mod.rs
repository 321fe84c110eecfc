//! Payment processor and currency conversion seams.
//!
//! Checkout talks to the outside world only through [`PaymentProcessor`] and
//! [`CurrencyConverter`]. Production uses PayPal Orders v2 and an exchange-rate
//! HTTP API; tests plug in their own implementations.

use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod exchange_rate;
pub mod paypal;

pub use crate::entities::order::PaymentMethod;
pub use exchange_rate::ExchangeRateClient;
pub use paypal::PayPalClient;

/// An approved-to-start processor order the customer must confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub token: String,
    pub approval_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Completed,
    /// Anything the processor reports other than a completed capture.
    Other(String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("processor returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("no approval link in processor response")]
    MissingApprovalLink,

    #[error("no exchange rate from {from} to {to}")]
    MissingRate { from: String, to: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProcessorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProcessorError::InvalidResponse(err.to_string())
        } else {
            ProcessorError::Transport(err.to_string())
        }
    }
}

impl From<ProcessorError> for ServiceError {
    fn from(err: ProcessorError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Creates a capture-intent order for `amount` in `currency`.
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentIntent, ProcessorError>;

    /// Captures a previously approved order.
    async fn capture_intent(&self, token: &str) -> Result<CaptureStatus, ProcessorError>;
}

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn convert(&self, amount: Decimal, from: &str, to: &str)
        -> Result<Decimal, ProcessorError>;
}
