use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::lifecycle::{self, PaymentDetails, SubscriptionLookup, WebhookEvent};
use super::models::{Subscription, Tier};
use super::paystack::{self, InitializeTransaction, PaymentGateway};
use super::quota;
use super::service::{ApplyOutcome, BillingStore};
use crate::config::ServiceEndpoints;
use crate::error::{AppError, AppResult};
use crate::extractor::{ApiJson, AuthUser};
use crate::pricing;

const DEFAULT_GATEWAY_CURRENCY: &str = "NGN";

#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    pub id: Uuid,
    pub email: Option<String>,
    pub subscription_tier: Tier,
    pub subscription_status: String,
    pub searches_this_month: i64,
    /// `null` for unlimited tiers.
    pub monthly_limit: Option<i64>,
    pub remaining_searches: Option<i64>,
}

// key: billing-api -> GET /api/user/subscription
pub async fn get_subscription(
    Extension(store): Extension<Arc<dyn BillingStore>>,
    user: AuthUser,
) -> AppResult<Json<SubscriptionSummary>> {
    let prefs = store.preferences(user.user_id).await?;
    Ok(Json(SubscriptionSummary {
        id: user.user_id,
        email: user.email,
        monthly_limit: quota::monthly_limit(prefs.subscription_tier),
        remaining_searches: quota::remaining(prefs.subscription_tier, prefs.searches_this_month),
        subscription_tier: prefs.subscription_tier,
        subscription_status: prefs.subscription_status,
        searches_this_month: prefs.searches_this_month,
    }))
}

pub async fn subscription_details(
    Extension(store): Extension<Arc<dyn BillingStore>>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Option<Subscription>>> {
    Ok(Json(store.latest_subscription(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default, rename = "subscriptionId")]
    pub subscription_id: Option<Uuid>,
}

// key: billing-api -> POST /api/user/cancel-subscription
pub async fn cancel_subscription(
    Extension(store): Extension<Arc<dyn BillingStore>>,
    AuthUser { user_id, .. }: AuthUser,
    ApiJson(request): ApiJson<CancelRequest>,
) -> AppResult<Json<Value>> {
    let subscription_id = request
        .subscription_id
        .ok_or_else(|| AppError::Validation("subscriptionId is required".into()))?;
    let subscription = store
        .subscription_by_id(subscription_id)
        .await?
        .ok_or(AppError::NotFound("subscription"))?;
    let plan = lifecycle::cancel(&subscription, user_id).map_err(|_| {
        warn!(%user_id, %subscription_id, "cancellation attempted on a foreign subscription");
        AppError::NotFound("subscription")
    })?;
    if !plan.is_noop() {
        store.apply(&plan).await?;
        info!(%user_id, %subscription_id, "subscription cancelled");
    }
    Ok(Json(json!({
        "success": true,
        "subscriptionId": subscription_id,
        "status": "cancelled",
    })))
}

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub email: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub reference: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub callback_url: Option<String>,
    pub cancel_action: Option<String>,
}

fn callback_url(endpoints: &ServiceEndpoints) -> String {
    format!("{}/api/payment/verify", endpoints.app_public_url)
}

fn cancel_url(endpoints: &ServiceEndpoints) -> String {
    format!("{}/dashboard/upgrade", endpoints.app_public_url)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn start_checkout(
    gateway: &dyn PaymentGateway,
    request: InitializeTransaction,
) -> AppResult<Json<Value>> {
    let data = gateway
        .initialize_transaction(&request)
        .await
        .map_err(|err| {
            error!(?err, reference = %request.reference, "failed to initialize payment");
            AppError::Payment("Failed to initialize payment".into())
        })?;
    let amount_display = pricing::format_minor_units(request.amount, &request.currency);
    Ok(Json(json!({ "ok": true, "data": data, "amount_display": amount_display })))
}

// key: billing-api -> POST /api/payment/initialize, proxied to the gateway
pub async fn initialize_payment(
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    Extension(endpoints): Extension<ServiceEndpoints>,
    ApiJson(request): ApiJson<InitializeRequest>,
) -> AppResult<Json<Value>> {
    let (Some(email), Some(amount), Some(reference)) = (
        non_blank(request.email),
        request.amount.filter(|amount| *amount > 0),
        non_blank(request.reference),
    ) else {
        return Err(AppError::Validation("Missing required fields".into()));
    };
    let transaction = InitializeTransaction {
        email,
        amount,
        currency: non_blank(request.currency)
            .unwrap_or_else(|| DEFAULT_GATEWAY_CURRENCY.to_string()),
        reference,
        metadata: request.metadata,
        callback_url: non_blank(request.callback_url).unwrap_or_else(|| callback_url(&endpoints)),
        cancel_action: non_blank(request.cancel_action).unwrap_or_else(|| cancel_url(&endpoints)),
    };
    start_checkout(gateway.as_ref(), transaction).await
}

#[derive(Debug, Deserialize)]
pub struct CheckoutQuery {
    pub tier: Option<String>,
    pub currency: Option<String>,
}

/// `GET /api/payment/initialize?tier=&currency=`: checkout for the caller at the
/// localized price of `tier`.
pub async fn initialize_checkout(
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    Extension(endpoints): Extension<ServiceEndpoints>,
    user: AuthUser,
    Query(query): Query<CheckoutQuery>,
) -> AppResult<Json<Value>> {
    let tier = query
        .tier
        .as_deref()
        .and_then(|raw| raw.parse::<Tier>().ok())
        .filter(Tier::is_paid)
        .ok_or_else(|| AppError::Validation("tier must be pro or enterprise".into()))?;
    let email = non_blank(user.email)
        .ok_or_else(|| AppError::Validation("an email address is required for checkout".into()))?;
    let currency = non_blank(query.currency).unwrap_or_else(|| pricing::BASE_CURRENCY.to_string());
    let prices = pricing::pricing_in_minor_units(&currency);
    let transaction = InitializeTransaction {
        email,
        amount: prices.for_tier(tier),
        currency: prices.currency,
        reference: format!("ts_{}", Uuid::new_v4().simple()),
        metadata: json!({ "userId": user.user_id, "tier": tier }),
        callback_url: callback_url(&endpoints),
        cancel_action: cancel_url(&endpoints),
    };
    start_checkout(gateway.as_ref(), transaction).await
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "ref")]
    pub reference_short: Option<String>,
    pub reference: Option<String>,
    pub trxref: Option<String>,
}

impl VerifyQuery {
    fn reference(self) -> Option<String> {
        non_blank(self.reference_short)
            .or_else(|| non_blank(self.reference))
            .or_else(|| non_blank(self.trxref))
    }
}

fn dashboard_redirect(endpoints: &ServiceEndpoints, path: &str, params: &[(&str, &str)]) -> Redirect {
    let raw = format!("{}{path}", endpoints.app_public_url);
    match url::Url::parse(&raw) {
        Ok(mut target) => {
            target.query_pairs_mut().extend_pairs(params);
            Redirect::temporary(target.as_str())
        }
        Err(err) => {
            error!(?err, %raw, "invalid dashboard redirect url");
            Redirect::temporary(&raw)
        }
    }
}

fn failure_redirect(endpoints: &ServiceEndpoints, code: &str) -> Redirect {
    dashboard_redirect(endpoints, "/dashboard/upgrade", &[("error", code)])
}

fn success_redirect(endpoints: &ServiceEndpoints, tier: Tier, renewal: Option<DateTime<Utc>>) -> Redirect {
    match renewal {
        Some(renewal) => dashboard_redirect(
            endpoints,
            "/dashboard/upgrade/success",
            &[("tier", tier.as_str()), ("renewal", &renewal.to_rfc3339())],
        ),
        None => dashboard_redirect(
            endpoints,
            "/dashboard/upgrade/success",
            &[("tier", tier.as_str()), ("existing", "true")],
        ),
    }
}

// key: billing-api -> GET /api/payment/verify, browser redirect after checkout
pub async fn verify_payment(
    Extension(store): Extension<Arc<dyn BillingStore>>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    Extension(endpoints): Extension<ServiceEndpoints>,
    Query(query): Query<VerifyQuery>,
) -> Redirect {
    let Some(reference) = query.reference() else {
        return failure_redirect(&endpoints, "no_reference");
    };

    let verification = match gateway.verify_transaction(&reference).await {
        Ok(verification) => verification,
        Err(err) => {
            error!(?err, %reference, "payment verification failed");
            return failure_redirect(&endpoints, "verification_failed");
        }
    };
    if !verification.is_successful() {
        warn!(
            %reference,
            status = ?verification.transaction_status,
            "payment not successful"
        );
        return failure_redirect(&endpoints, "payment_not_successful");
    }

    let details = match PaymentDetails::from_transaction(&verification.data, Some(&reference)) {
        Ok(details) => details,
        Err(err) => {
            warn!(%err, %reference, "verified payment carries unusable metadata");
            return failure_redirect(&endpoints, "invalid_metadata");
        }
    };

    let lookup = SubscriptionLookup {
        reference: Some(details.reference.clone()),
        subscription_code: None,
    };
    let existing = match store.find_subscription(&lookup).await {
        Ok(existing) => existing,
        Err(err) => {
            error!(?err, %reference, "subscription lookup failed");
            return failure_redirect(&endpoints, "internal_error");
        }
    };
    if let Some(existing) = existing.filter(|found| found.external_ref == details.reference) {
        info!(%reference, "payment already processed");
        return success_redirect(&endpoints, existing.tier, None);
    }

    let now = Utc::now();
    let plan = lifecycle::activate(&details, None, now);
    match store.apply(&plan).await {
        Ok(ApplyOutcome::Applied) => {
            info!(user_id = %details.user_id, tier = %details.tier, %reference, "subscription activated");
            success_redirect(&endpoints, details.tier, Some(now + lifecycle::renewal_period()))
        }
        Ok(ApplyOutcome::Duplicate) => success_redirect(&endpoints, details.tier, None),
        Err(err) => {
            error!(?err, %reference, "failed to record subscription");
            failure_redirect(&endpoints, "subscription_creation_failed")
        }
    }
}

// key: billing-api -> POST /api/webhooks/payment, signed gateway events
pub async fn payment_webhook(
    Extension(store): Extension<Arc<dyn BillingStore>>,
    Extension(endpoints): Extension<ServiceEndpoints>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get(paystack::SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;
    if !paystack::verify_signature(&endpoints.paystack_secret, &body, signature) {
        warn!(bytes = body.len(), "rejected webhook with invalid signature");
        return Err(AppError::InvalidSignature);
    }

    let event = WebhookEvent::parse(&body).map_err(|err| AppError::Validation(err.to_string()))?;
    let existing = match event.lookup() {
        Some(lookup) => store.find_subscription(&lookup).await?,
        None => None,
    };
    let plan = lifecycle::plan_webhook(&event, existing.as_ref(), Utc::now());
    if plan.is_noop() {
        info!(event = event.name(), outcome = ?plan.outcome, "webhook required no changes");
    } else {
        let applied = store.apply(&plan).await?;
        info!(event = event.name(), outcome = ?plan.outcome, ?applied, "webhook processed");
    }
    Ok(Json(json!({ "received": true })))
}
