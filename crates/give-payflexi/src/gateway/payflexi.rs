//! PayFlexi REST Client

use async_trait::async_trait;
use reqwest::{StatusCode, Url, header};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use super::{CheckoutSession, Gateway, InitiateRequest, TransactionMeta, TransactionSnapshot};
use crate::config::{MAX_REQUEST_TIMEOUT, PayflexiConfig};
use crate::credentials::MerchantCredentials;
use crate::donation::Reference;
use crate::error::{PaymentError, Result};

/// HTTP client for the PayFlexi merchant API
pub struct PayflexiClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: MerchantCredentials,
}

/// Body of `POST /merchants/transactions`
#[derive(Serialize)]
struct CreateTransaction<'a> {
    email: &'a str,
    name: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    reference: &'a str,
    callback_url: &'a str,
    currency: &'a str,
    domain: &'static str,
    meta: &'a TransactionMeta,
}

impl PayflexiClient {
    /// Create a client for the configured mode.
    ///
    /// Fails with `PaymentError::Config` when the mode's keys are missing or
    /// the base URL does not parse.
    pub fn new(config: &PayflexiConfig) -> Result<Self> {
        let credentials = MerchantCredentials::resolve_active(config)?;

        let base_url = Url::parse(&config.api_base_url).map_err(|e| {
            PaymentError::Config(format!("invalid PayFlexi API URL '{}': {e}", config.api_base_url))
        })?;

        if config.allows_invalid_certs() {
            tracing::warn!("TLS certificate validation disabled for PayFlexi test mode");
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout.min(MAX_REQUEST_TIMEOUT))
            .danger_accept_invalid_certs(config.allows_invalid_certs())
            .build()
            .map_err(|e| PaymentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    pub fn credentials(&self) -> &MerchantCredentials {
        &self.credentials
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                PaymentError::Config(format!(
                    "PayFlexi API URL '{}' cannot be a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(self.credentials.secret_key())
            .header(header::ACCEPT, "application/json")
    }
}

#[async_trait]
impl Gateway for PayflexiClient {
    async fn initiate(&self, request: &InitiateRequest) -> Result<CheckoutSession> {
        let url = self.endpoint(&["merchants", "transactions"])?;
        let body = CreateTransaction {
            email: &request.email,
            name: &request.name,
            amount: request.amount,
            reference: request.reference.as_str(),
            callback_url: &request.callback_url,
            currency: &request.currency,
            domain: "global",
            meta: &request.meta,
        };

        tracing::debug!(reference = %request.reference, "Creating PayFlexi transaction");

        let response = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        let text = response.text().await.map_err(unavailable)?;
        let json: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = json
                .as_ref()
                .and_then(message_of)
                .unwrap_or_else(|| status.to_string());
            return Err(PaymentError::Gateway(format!("HTTP {}: {message}", status.as_u16())));
        }

        let json = json.ok_or_else(|| {
            PaymentError::Gateway("transaction creation returned a non-JSON body".into())
        })?;

        if json.get("errors").is_some_and(is_truthy) {
            return Err(PaymentError::Gateway(
                message_of(&json).unwrap_or_else(|| "transaction creation rejected".into()),
            ));
        }

        let checkout_url = json
            .get("checkout_url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PaymentError::Gateway("No checkout URL returned".into()))?;

        Ok(CheckoutSession {
            checkout_url: checkout_url.to_string(),
        })
    }

    async fn fetch_transaction(&self, reference: &Reference) -> Result<TransactionSnapshot> {
        let url = self.endpoint(&["merchants", "transactions", reference.as_str()])?;

        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PaymentError::GatewayUnavailable(format!(
                "transaction lookup returned HTTP {}",
                status.as_u16()
            )));
        }

        let text = response.text().await.map_err(unavailable)?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| PaymentError::InvalidResponse(format!("transaction body: {e}")))?;

        parse_snapshot(&json)
    }

    fn name(&self) -> &str {
        "PayFlexi"
    }
}

fn unavailable(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::GatewayUnavailable("request timed out".into())
    } else {
        PaymentError::GatewayUnavailable(err.to_string())
    }
}

/// Validate a transaction lookup body into a snapshot
pub(crate) fn parse_snapshot(json: &Value) -> Result<TransactionSnapshot> {
    let data = json.get("data").filter(|d| d.is_object());
    let field = |name: &str| data.and_then(|d| d.get(name)).and_then(string_of);

    if json.get("errors").is_some_and(is_truthy) {
        return Ok(TransactionSnapshot::Errored {
            message: field("message").or_else(|| message_of(json)),
            gateway_response: field("gateway_response"),
        });
    }

    let data = data.ok_or_else(|| PaymentError::InvalidResponse("missing 'data' object".into()))?;
    let transaction_id = field("transaction_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PaymentError::InvalidResponse("missing 'data.transaction_id'".into()))?;

    let txn_amount = match data.get("txn_amount") {
        None | Some(Value::Null) => None,
        Some(v) => Some(decimal_of(v).ok_or_else(|| {
            PaymentError::InvalidResponse(format!("'data.txn_amount' is not a number: {v}"))
        })?),
    };

    Ok(TransactionSnapshot::Approved {
        transaction_id,
        txn_amount,
        message: field("message"),
    })
}

/// Loose truthiness for the gateway's `errors` field
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn message_of(json: &Value) -> Option<String> {
    json.get("message").and_then(string_of)
}

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    raw.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&raw).ok())
}
