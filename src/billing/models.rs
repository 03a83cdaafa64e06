use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// key: billing-tier -> closed set of subscription levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Stored tiers are free-form text; anything unrecognised is treated as free.
    pub fn parse_or_free(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Tier::Free)
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::Free)
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(anyhow!("unknown subscription tier `{other}`")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// key: billing-subscription-status -> pending -> active -> {cancelled, expired}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Cancelled and expired records never come back; a new payment creates a new record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl FromStr for SubscriptionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(anyhow!("unknown subscription status `{other}`")),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// key: billing-preferences -> tier + monthly usage counter per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub subscription_tier: Tier,
    pub searches_this_month: i64,
    pub subscription_status: String,
}

impl UserPreferences {
    /// Users without a preferences row behave as a fresh free account.
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            subscription_tier: Tier::Free,
            searches_this_month: 0,
            subscription_status: "active".to_string(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserPreferencesRow {
    pub user_id: Uuid,
    pub subscription_tier: Option<String>,
    pub searches_this_month: Option<i64>,
    pub subscription_status: Option<String>,
}

impl From<UserPreferencesRow> for UserPreferences {
    fn from(row: UserPreferencesRow) -> Self {
        Self {
            user_id: row.user_id,
            subscription_tier: Tier::parse_or_free(row.subscription_tier.as_deref()),
            searches_this_month: row.searches_this_month.unwrap_or(0),
            subscription_status: row
                .subscription_status
                .unwrap_or_else(|| "active".to_string()),
        }
    }
}

// key: billing-subscription-model -> one record per gateway reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: Tier,
    pub external_ref: String,
    pub plan_code: Option<String>,
    pub subscription_code: Option<String>,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: String,
    pub external_ref: String,
    pub plan_code: Option<String>,
    pub subscription_code: Option<String>,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = anyhow::Error;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            tier: row.tier.parse()?,
            external_ref: row.external_ref,
            plan_code: row.plan_code,
            subscription_code: row.subscription_code,
            status: row.status.parse()?,
            start_date: row.start_date,
            renewal_date: row.renewal_date,
            amount_minor: row.amount_minor,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Values needed to open a subscription record for a freshly verified payment.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub tier: Tier,
    pub external_ref: String,
    pub plan_code: Option<String>,
    pub subscription_code: Option<String>,
    pub start_date: DateTime<Utc>,
    pub renewal_date: DateTime<Utc>,
    pub amount_minor: i64,
    pub currency: String,
}
