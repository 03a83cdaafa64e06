//! Subscription state machine.
//!
//! Every transition is a pure function from an event (and the record it concerns) to a
//! [`TransitionPlan`]: the writes the store must apply atomically. Nothing in this module
//! touches the database.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::models::{NewSubscription, Subscription, SubscriptionStatus, Tier};

/// Fixed billing period granted by a successful payment, counted from the moment the
/// payment is observed.
pub fn renewal_period() -> Duration {
    Duration::days(30)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentDataError {
    #[error("payment reference missing")]
    MissingReference,
    #[error("payment metadata missing user id or tier")]
    InvalidMetadata,
    #[error("webhook payload is not valid JSON: {0}")]
    Malformed(String),
}

/// Payment facts extracted from a gateway transaction object.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub reference: String,
    pub user_id: Uuid,
    pub tier: Tier,
    pub plan_code: Option<String>,
    pub subscription_code: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
}

impl PaymentDetails {
    /// Reads a transaction `data` object. The reference comes from the transaction itself,
    /// falling back to the one the caller looked up.
    pub fn from_transaction(
        data: &Value,
        fallback_reference: Option<&str>,
    ) -> Result<Self, PaymentDataError> {
        let reference = str_field(data, "reference")
            .or(fallback_reference)
            .map(str::to_string)
            .ok_or(PaymentDataError::MissingReference)?;
        let metadata = data.get("metadata").unwrap_or(&Value::Null);
        let user_id = str_field(metadata, "userId")
            .or_else(|| str_field(metadata, "user_id"))
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or(PaymentDataError::InvalidMetadata)?;
        let tier = str_field(metadata, "tier")
            .and_then(|raw| raw.parse::<Tier>().ok())
            .filter(Tier::is_paid)
            .ok_or(PaymentDataError::InvalidMetadata)?;
        let plan_code = str_field(metadata, "plan_code")
            .or_else(|| data.pointer("/plan/plan_code").and_then(Value::as_str))
            .map(str::to_string);
        let subscription_code = data
            .pointer("/subscription/subscription_code")
            .and_then(Value::as_str)
            .map(str::to_string);
        let amount_minor = data.get("amount").and_then(Value::as_i64).unwrap_or(0);
        let currency = str_field(data, "currency").unwrap_or("NGN").to_string();

        Ok(Self {
            reference,
            user_id,
            tier,
            plan_code,
            subscription_code,
            amount_minor,
            currency,
        })
    }
}

// key: billing-webhook-event -> tagged union over gateway event types
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    ChargeSuccess(PaymentDetails),
    InvoicePaymentSucceeded {
        reference: Option<String>,
        subscription_code: Option<String>,
        invoice_code: Option<String>,
        period_start: Option<String>,
    },
    SubscriptionCreate {
        subscription_code: Option<String>,
    },
    SubscriptionEnable {
        subscription_code: Option<String>,
    },
    SubscriptionDisable {
        reference: Option<String>,
        subscription_code: String,
    },
    Unhandled(String),
}

#[derive(Debug, Deserialize)]
struct RawWebhook {
    event: String,
    #[serde(default)]
    data: Value,
}

impl WebhookEvent {
    /// Parses an already authenticated webhook body.
    pub fn parse(body: &[u8]) -> Result<Self, PaymentDataError> {
        let raw: RawWebhook = serde_json::from_slice(body)
            .map_err(|err| PaymentDataError::Malformed(err.to_string()))?;
        let data = &raw.data;
        let event = match raw.event.as_str() {
            "charge.success" => match PaymentDetails::from_transaction(data, None) {
                Ok(details) => WebhookEvent::ChargeSuccess(details),
                // Charges without our metadata belong to recurring invoices.
                Err(_) => WebhookEvent::Unhandled(raw.event),
            },
            "invoice.payment_succeeded" => WebhookEvent::InvoicePaymentSucceeded {
                reference: str_field(data, "reference")
                    .or_else(|| data.pointer("/transaction/reference").and_then(Value::as_str))
                    .map(str::to_string),
                subscription_code: data
                    .pointer("/subscription/subscription_code")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                invoice_code: str_field(data, "invoice_code").map(str::to_string),
                period_start: str_field(data, "period_start").map(str::to_string),
            },
            "subscription.create" => WebhookEvent::SubscriptionCreate {
                subscription_code: str_field(data, "subscription_code").map(str::to_string),
            },
            "subscription.enable" => WebhookEvent::SubscriptionEnable {
                subscription_code: str_field(data, "subscription_code").map(str::to_string),
            },
            "subscription.disable" => match str_field(data, "subscription_code") {
                Some(code) => WebhookEvent::SubscriptionDisable {
                    reference: str_field(data, "reference").map(str::to_string),
                    subscription_code: code.to_string(),
                },
                None => WebhookEvent::Unhandled(raw.event),
            },
            _ => WebhookEvent::Unhandled(raw.event),
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            WebhookEvent::ChargeSuccess(_) => "charge.success",
            WebhookEvent::InvoicePaymentSucceeded { .. } => "invoice.payment_succeeded",
            WebhookEvent::SubscriptionCreate { .. } => "subscription.create",
            WebhookEvent::SubscriptionEnable { .. } => "subscription.enable",
            WebhookEvent::SubscriptionDisable { .. } => "subscription.disable",
            WebhookEvent::Unhandled(name) => name,
        }
    }

    /// Which stored subscription the event refers to, if any.
    pub fn lookup(&self) -> Option<SubscriptionLookup> {
        match self {
            WebhookEvent::ChargeSuccess(details) => Some(SubscriptionLookup {
                reference: Some(details.reference.clone()),
                subscription_code: None,
            }),
            WebhookEvent::InvoicePaymentSucceeded {
                reference,
                subscription_code,
                ..
            } => Some(SubscriptionLookup {
                reference: reference.clone(),
                subscription_code: subscription_code.clone(),
            }),
            WebhookEvent::SubscriptionDisable {
                reference,
                subscription_code,
            } => Some(SubscriptionLookup {
                reference: reference.clone(),
                subscription_code: Some(subscription_code.clone()),
            }),
            _ => None,
        }
    }
}

/// Match by gateway reference first, then by recurring subscription (or plan) code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLookup {
    pub reference: Option<String>,
    pub subscription_code: Option<String>,
}

/// A single write the store must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingWrite {
    InsertSubscription(NewSubscription),
    ExtendRenewal {
        subscription_id: Uuid,
        renewal_date: DateTime<Utc>,
    },
    MarkExpired {
        subscription_id: Uuid,
    },
    MarkCancelled {
        subscription_id: Uuid,
    },
    SetUserTier {
        user_id: Uuid,
        tier: Tier,
        status: SubscriptionStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    AlreadyProcessed,
    SubscriptionNotFound,
    Ignored,
}

// key: billing-transition-plan -> writes applied in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    /// Unique event key recorded alongside the writes; a repeat key means the event was
    /// already applied and nothing else runs.
    pub dedupe_key: Option<String>,
    pub writes: Vec<BillingWrite>,
    pub outcome: TransitionOutcome,
}

impl TransitionPlan {
    fn noop(outcome: TransitionOutcome) -> Self {
        Self {
            dedupe_key: None,
            writes: Vec::new(),
            outcome,
        }
    }

    fn with_key(mut self, key: Option<String>) -> Self {
        self.dedupe_key = key;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.writes.is_empty()
    }
}

/// pending/none -> active after a verified payment.
pub fn activate(
    details: &PaymentDetails,
    existing: Option<&Subscription>,
    now: DateTime<Utc>,
) -> TransitionPlan {
    if existing.is_some() {
        return TransitionPlan::noop(TransitionOutcome::AlreadyProcessed);
    }
    TransitionPlan {
        dedupe_key: None,
        writes: vec![
            BillingWrite::InsertSubscription(NewSubscription {
                user_id: details.user_id,
                tier: details.tier,
                external_ref: details.reference.clone(),
                plan_code: details.plan_code.clone(),
                subscription_code: details.subscription_code.clone(),
                start_date: now,
                renewal_date: now + renewal_period(),
                amount_minor: details.amount_minor,
                currency: details.currency.clone(),
            }),
            BillingWrite::SetUserTier {
                user_id: details.user_id,
                tier: details.tier,
                status: SubscriptionStatus::Active,
            },
        ],
        outcome: TransitionOutcome::Applied,
    }
}

/// active -> active on a recurring charge.
pub fn renew(existing: Option<&Subscription>, now: DateTime<Utc>) -> TransitionPlan {
    let Some(subscription) = existing else {
        return TransitionPlan::noop(TransitionOutcome::SubscriptionNotFound);
    };
    if subscription.status.is_terminal() {
        return TransitionPlan::noop(TransitionOutcome::Ignored);
    }
    TransitionPlan {
        dedupe_key: None,
        writes: vec![
            BillingWrite::ExtendRenewal {
                subscription_id: subscription.id,
                renewal_date: now + renewal_period(),
            },
            BillingWrite::SetUserTier {
                user_id: subscription.user_id,
                tier: subscription.tier,
                status: SubscriptionStatus::Active,
            },
        ],
        outcome: TransitionOutcome::Applied,
    }
}

/// active -> expired when the gateway disables the recurring subscription.
pub fn expire(existing: Option<&Subscription>) -> TransitionPlan {
    let Some(subscription) = existing else {
        return TransitionPlan::noop(TransitionOutcome::SubscriptionNotFound);
    };
    if subscription.status.is_terminal() {
        return TransitionPlan::noop(TransitionOutcome::AlreadyProcessed);
    }
    TransitionPlan {
        dedupe_key: None,
        writes: vec![
            BillingWrite::MarkExpired {
                subscription_id: subscription.id,
            },
            BillingWrite::SetUserTier {
                user_id: subscription.user_id,
                tier: Tier::Free,
                status: SubscriptionStatus::Expired,
            },
        ],
        outcome: TransitionOutcome::Applied,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("subscription not found")]
pub struct NotOwned;

/// active -> cancelled on the owner's request. A subscription owned by someone else is
/// indistinguishable from a missing one.
pub fn cancel(subscription: &Subscription, caller: Uuid) -> Result<TransitionPlan, NotOwned> {
    if subscription.user_id != caller {
        return Err(NotOwned);
    }
    if subscription.status.is_terminal() {
        return Ok(TransitionPlan::noop(TransitionOutcome::AlreadyProcessed));
    }
    Ok(TransitionPlan {
        dedupe_key: None,
        writes: vec![
            BillingWrite::MarkCancelled {
                subscription_id: subscription.id,
            },
            BillingWrite::SetUserTier {
                user_id: subscription.user_id,
                tier: Tier::Free,
                status: SubscriptionStatus::Cancelled,
            },
        ],
        outcome: TransitionOutcome::Applied,
    })
}

/// Dispatch table from webhook event to transition.
pub fn plan_webhook(
    event: &WebhookEvent,
    existing: Option<&Subscription>,
    now: DateTime<Utc>,
) -> TransitionPlan {
    match event {
        WebhookEvent::ChargeSuccess(details) => activate(details, existing, now)
            .with_key(Some(format!("charge.success:{}", details.reference))),
        WebhookEvent::InvoicePaymentSucceeded {
            reference,
            invoice_code,
            period_start,
            ..
        } => renew(existing, now).with_key(invoice_key(
            invoice_code.as_deref(),
            reference.as_deref(),
            period_start.as_deref(),
        )),
        WebhookEvent::SubscriptionDisable {
            subscription_code, ..
        } => expire(existing).with_key(Some(format!("subscription.disable:{subscription_code}"))),
        WebhookEvent::SubscriptionCreate { .. }
        | WebhookEvent::SubscriptionEnable { .. }
        | WebhookEvent::Unhandled(_) => TransitionPlan::noop(TransitionOutcome::Ignored),
    }
}

/// A reference alone can recur across billing periods, so it only identifies an invoice
/// together with the period. Without either, the renewal is applied undeduplicated.
fn invoice_key(
    invoice_code: Option<&str>,
    reference: Option<&str>,
    period_start: Option<&str>,
) -> Option<String> {
    match (invoice_code, reference, period_start) {
        (Some(code), _, _) => Some(format!("invoice.payment_succeeded:{code}")),
        (None, Some(reference), Some(period)) => {
            Some(format!("invoice.payment_succeeded:{reference}:{period}"))
        }
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription(status: SubscriptionStatus) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier: Tier::Pro,
            external_ref: "ref_123".into(),
            plan_code: Some("PLN_pro".into()),
            subscription_code: Some("SUB_abc".into()),
            status,
            start_date: now,
            renewal_date: Some(now + renewal_period()),
            amount_minor: 110_000,
            currency: "ZAR".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn details(user_id: Uuid) -> PaymentDetails {
        PaymentDetails {
            reference: "ref_new".into(),
            user_id,
            tier: Tier::Pro,
            plan_code: Some("PLN_pro".into()),
            subscription_code: None,
            amount_minor: 110_000,
            currency: "ZAR".into(),
        }
    }

    #[test]
    fn transaction_metadata_is_extracted() {
        let user_id = Uuid::new_v4();
        let data = json!({
            "reference": "ref_1",
            "status": "success",
            "amount": 180000,
            "currency": "ZAR",
            "metadata": {"user_id": user_id.to_string(), "tier": "enterprise", "plan_code": "PLN_ent"}
        });
        let parsed = PaymentDetails::from_transaction(&data, None).unwrap();
        assert_eq!(parsed.user_id, user_id);
        assert_eq!(parsed.tier, Tier::Enterprise);
        assert_eq!(parsed.amount_minor, 180_000);
        assert_eq!(parsed.plan_code.as_deref(), Some("PLN_ent"));
    }

    #[test]
    fn transaction_without_tier_is_rejected() {
        let data = json!({"reference": "ref_1", "metadata": {"userId": Uuid::new_v4().to_string()}});
        assert_eq!(
            PaymentDetails::from_transaction(&data, None),
            Err(PaymentDataError::InvalidMetadata)
        );
    }

    #[test]
    fn currency_defaults_to_naira() {
        let data = json!({"metadata": {"userId": Uuid::new_v4().to_string(), "tier": "pro"}});
        let parsed = PaymentDetails::from_transaction(&data, Some("ref_q")).unwrap();
        assert_eq!(parsed.reference, "ref_q");
        assert_eq!(parsed.currency, "NGN");
    }

    #[test]
    fn activation_is_idempotent_on_reference() {
        let existing = subscription(SubscriptionStatus::Active);
        let plan = activate(&details(existing.user_id), Some(&existing), Utc::now());
        assert!(plan.is_noop());
        assert_eq!(plan.outcome, TransitionOutcome::AlreadyProcessed);
    }

    #[test]
    fn activation_opens_thirty_day_period_and_upgrades_tier() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let plan = activate(&details(user_id), None, now);
        assert_eq!(plan.writes.len(), 2);
        match &plan.writes[0] {
            BillingWrite::InsertSubscription(new) => {
                assert_eq!(new.renewal_date - new.start_date, Duration::days(30));
                assert_eq!(new.external_ref, "ref_new");
            }
            other => panic!("unexpected write {other:?}"),
        }
        assert_eq!(
            plan.writes[1],
            BillingWrite::SetUserTier {
                user_id,
                tier: Tier::Pro,
                status: SubscriptionStatus::Active
            }
        );
    }

    #[test]
    fn renewal_extends_from_arrival_time() {
        let existing = subscription(SubscriptionStatus::Active);
        let now = Utc::now() + Duration::days(90);
        let plan = renew(Some(&existing), now);
        assert_eq!(
            plan.writes[0],
            BillingWrite::ExtendRenewal {
                subscription_id: existing.id,
                renewal_date: now + Duration::days(30)
            }
        );
    }

    #[test]
    fn expired_subscription_is_not_revived() {
        let existing = subscription(SubscriptionStatus::Expired);
        let plan = renew(Some(&existing), Utc::now());
        assert!(plan.is_noop());
        assert_eq!(plan.outcome, TransitionOutcome::Ignored);
    }

    #[test]
    fn disable_downgrades_owner() {
        let existing = subscription(SubscriptionStatus::Active);
        let plan = expire(Some(&existing));
        assert!(plan.writes.contains(&BillingWrite::SetUserTier {
            user_id: existing.user_id,
            tier: Tier::Free,
            status: SubscriptionStatus::Expired,
        }));
    }

    #[test]
    fn cancel_rejects_foreign_subscription() {
        let existing = subscription(SubscriptionStatus::Active);
        assert_eq!(cancel(&existing, Uuid::new_v4()), Err(NotOwned));
        let plan = cancel(&existing, existing.user_id).unwrap();
        assert_eq!(
            plan.writes[0],
            BillingWrite::MarkCancelled {
                subscription_id: existing.id
            }
        );
    }

    #[test]
    fn webhook_events_are_parsed() {
        let body = json!({
            "event": "invoice.payment_succeeded",
            "data": {
                "invoice_code": "INV_1",
                "reference": "ref_123",
                "subscription": {"subscription_code": "SUB_abc"}
            }
        });
        let event = WebhookEvent::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            event,
            WebhookEvent::InvoicePaymentSucceeded {
                reference: Some("ref_123".into()),
                subscription_code: Some("SUB_abc".into()),
                invoice_code: Some("INV_1".into()),
                period_start: None,
            }
        );
        let plan = plan_webhook(&event, Some(&subscription(SubscriptionStatus::Active)), Utc::now());
        assert_eq!(
            plan.dedupe_key.as_deref(),
            Some("invoice.payment_succeeded:INV_1")
        );

        let unknown = WebhookEvent::parse(br#"{"event":"transfer.success","data":{}}"#).unwrap();
        assert_eq!(unknown, WebhookEvent::Unhandled("transfer.success".into()));
        assert!(plan_webhook(&unknown, None, Utc::now()).is_noop());
    }

    #[test]
    fn invoices_without_code_are_keyed_by_period() {
        let existing = subscription(SubscriptionStatus::Active);
        let invoice = |period: Option<&str>| {
            let mut data = json!({
                "reference": "ref_123",
                "subscription": {"subscription_code": "SUB_abc"}
            });
            if let Some(period) = period {
                data["period_start"] = json!(period);
            }
            let body = json!({"event": "invoice.payment_succeeded", "data": data});
            WebhookEvent::parse(body.to_string().as_bytes()).unwrap()
        };

        let march = plan_webhook(&invoice(Some("2026-03-01T00:00:00.000Z")), Some(&existing), Utc::now());
        let april = plan_webhook(&invoice(Some("2026-04-01T00:00:00.000Z")), Some(&existing), Utc::now());
        assert_eq!(
            march.dedupe_key.as_deref(),
            Some("invoice.payment_succeeded:ref_123:2026-03-01T00:00:00.000Z")
        );
        assert_ne!(march.dedupe_key, april.dedupe_key);

        let unkeyed = plan_webhook(&invoice(None), Some(&existing), Utc::now());
        assert_eq!(unkeyed.dedupe_key, None);
        assert!(!unkeyed.is_noop());
    }

    #[test]
    fn malformed_body_is_reported() {
        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(PaymentDataError::Malformed(_))
        ));
    }
}
