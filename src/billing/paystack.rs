use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha512;
use tracing::{error, info};

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex HMAC-SHA512 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Checks a webhook signature against the raw body. The comparison runs in constant time
/// and must happen before the body is parsed.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Hex signature for `body`, as the gateway would compute it.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeTransaction {
    pub email: String,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    pub callback_url: String,
    pub cancel_action: String,
}

/// Gateway answer for a transaction lookup.
#[derive(Debug, Clone)]
pub struct TransactionVerification {
    pub api_status: bool,
    pub transaction_status: Option<String>,
    pub data: Value,
}

impl TransactionVerification {
    pub fn is_successful(&self) -> bool {
        self.api_status && self.transaction_status.as_deref() == Some("success")
    }
}

// key: billing-adapter -> payment gateway integration
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(&self, request: &InitializeTransaction) -> Result<Value>;
    async fn verify_transaction(&self, reference: &str) -> Result<TransactionVerification>;
}

// key: billing-adapter-paystack -> REST client
#[derive(Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl PaystackGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct GatewayEnvelope {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    data: Value,
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_transaction(&self, request: &InitializeTransaction) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await
            .context("payment gateway unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %truncate(&body, 300), "transaction initialization rejected");
            return Err(anyhow!("transaction initialization rejected with {status}"));
        }
        let envelope: GatewayEnvelope = response
            .json()
            .await
            .context("invalid initialization response")?;
        info!(reference = %request.reference, "transaction initialized");
        Ok(envelope.data)
    }

    async fn verify_transaction(&self, reference: &str) -> Result<TransactionVerification> {
        let endpoint = url::Url::parse(&format!("{}/transaction/verify/", self.base_url))
            .and_then(|base| base.join(reference))
            .context("invalid verification url")?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("payment gateway unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %reference, body = %truncate(&body, 300), "transaction verification rejected");
            return Err(anyhow!("transaction verification rejected with {status}"));
        }
        let envelope: GatewayEnvelope = response
            .json()
            .await
            .context("invalid verification response")?;
        let transaction_status = envelope
            .data
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(TransactionVerification {
            api_status: envelope.status,
            transaction_status,
            data: envelope.data,
        })
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
