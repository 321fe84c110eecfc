use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    config::{ExchangeRateConfig, GatewayConfig},
    services::payments::{
        CaptureStatus, CurrencyConverter, ExchangeRateClient, PayPalClient, PaymentProcessor,
        ProcessorError,
    },
};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway_config(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: server.uri(),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        ..GatewayConfig::default()
    }
}

async fn mount_oauth(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21AAF-test",
            "token_type": "Bearer",
            "expires_in": 32400
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn creates_intent_and_reuses_access_token() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(header("authorization", "Bearer A21AAF-test"))
        .and(body_partial_json(json!({ "intent": "CAPTURE" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "5O190127TN364715T",
            "status": "CREATED",
            "links": [
                { "href": "https://api.test/v2/checkout/orders/5O190127TN364715T", "rel": "self" },
                { "href": "https://www.sandbox.test/checkoutnow?token=5O190127TN364715T", "rel": "approve" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/5O190127TN364715T/capture"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PayPalClient::new(&gateway_config(&server)).unwrap();
    let intent = client.create_intent(dec!(12.5), "USD").await.unwrap();
    assert_eq!(intent.token, "5O190127TN364715T");
    assert_eq!(
        intent.approval_url,
        "https://www.sandbox.test/checkoutnow?token=5O190127TN364715T"
    );

    let status = client.capture_intent(&intent.token).await.unwrap();
    assert_eq!(status, CaptureStatus::Completed);
}

#[tokio::test]
async fn missing_approve_link_is_an_error() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "NOAPPROVE",
            "status": "CREATED",
            "links": [{ "href": "https://api.test/self", "rel": "self" }]
        })))
        .mount(&server)
        .await;

    let client = PayPalClient::new(&gateway_config(&server)).unwrap();
    let result = client.create_intent(dec!(10), "USD").await;
    assert_matches!(result, Err(ProcessorError::MissingApprovalLink));
}

#[tokio::test]
async fn refused_capture_is_reported_not_raised() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/EC-1/capture"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "name": "UNPROCESSABLE_ENTITY",
            "details": [{ "issue": "ORDER_NOT_APPROVED" }]
        })))
        .mount(&server)
        .await;

    let client = PayPalClient::new(&gateway_config(&server)).unwrap();
    let status = client.capture_intent("EC-1").await.unwrap();
    assert_eq!(status, CaptureStatus::Other("HTTP 422".to_string()));
}

#[tokio::test]
async fn server_errors_surface_as_rejections() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = PayPalClient::new(&gateway_config(&server)).unwrap();
    let result = client.create_intent(dec!(10), "USD").await;
    assert_matches!(result, Err(ProcessorError::Rejected { status: 503, .. }));
}

#[tokio::test]
async fn rejected_credentials_fail_intent_creation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;

    let client = PayPalClient::new(&gateway_config(&server)).unwrap();
    let result = client.create_intent(dec!(10), "USD").await;
    assert_matches!(result, Err(ProcessorError::Rejected { status: 401, .. }));
}

fn rates_config(server: &MockServer) -> ExchangeRateConfig {
    ExchangeRateConfig {
        base_url: server.uri(),
        api_key: None,
        request_timeout_secs: 5,
    }
}

#[tokio::test]
async fn converts_with_latest_rate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest/INR"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "base": "INR",
            "rates": { "USD": 0.5, "EUR": 0.25 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ExchangeRateClient::new(&rates_config(&server)).unwrap();
    let converted = client.convert(dec!(250), "INR", "USD").await.unwrap();
    assert_eq!(converted, dec!(125));
}

#[tokio::test]
async fn missing_rate_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest/INR"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rates": { "EUR": 0.25 }
        })))
        .mount(&server)
        .await;

    let client = ExchangeRateClient::new(&rates_config(&server)).unwrap();
    let result = client.convert(dec!(250), "INR", "USD").await;
    assert_matches!(result, Err(ProcessorError::MissingRate { .. }));
}

#[tokio::test]
async fn same_currency_skips_the_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = ExchangeRateClient::new(&rates_config(&server)).unwrap();
    let converted = client.convert(dec!(99.99), "USD", "usd").await.unwrap();
    assert_eq!(converted, dec!(99.99));
}
