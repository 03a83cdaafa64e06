use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::lifecycle::{BillingWrite, SubscriptionLookup, TransitionPlan};
use super::models::{Subscription, SubscriptionRow, UserPreferences, UserPreferencesRow};

/// Result of executing a [`TransitionPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The event key or payment reference was already recorded; nothing was written.
    Duplicate,
}

// key: billing-store -> preferences + subscriptions persistence seam
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn preferences(&self, user_id: Uuid) -> Result<UserPreferences>;
    async fn increment_usage(&self, user_id: Uuid) -> Result<i64>;
    async fn find_subscription(&self, lookup: &SubscriptionLookup) -> Result<Option<Subscription>>;
    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>>;
    async fn latest_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>>;
    /// Executes every write of the plan in one transaction.
    async fn apply(&self, plan: &TransitionPlan) -> Result<ApplyOutcome>;
}

// key: billing-service -> Postgres-backed subscription lifecycle
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, tier, external_ref, plan_code, subscription_code, status, start_date, renewal_date, amount_minor, currency, created_at, updated_at";

#[async_trait]
impl BillingStore for BillingService {
    async fn preferences(&self, user_id: Uuid) -> Result<UserPreferences> {
        let row = sqlx::query_as::<_, UserPreferencesRow>(
            r#"
            SELECT user_id, subscription_tier, searches_this_month, subscription_status
            FROM user_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(UserPreferences::from)
            .unwrap_or_else(|| UserPreferences::default_for(user_id)))
    }

    async fn increment_usage(&self, user_id: Uuid) -> Result<i64> {
        let used: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO user_preferences (user_id, searches_this_month)
            VALUES ($1, 1)
            ON CONFLICT (user_id)
            DO UPDATE SET
                searches_this_month = user_preferences.searches_this_month + 1,
                updated_at = NOW()
            RETURNING searches_this_month
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(used)
    }

    async fn find_subscription(&self, lookup: &SubscriptionLookup) -> Result<Option<Subscription>> {
        if lookup.reference.is_none() && lookup.subscription_code.is_none() {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE external_ref = $1
               OR subscription_code = $2
               OR plan_code = $2
            ORDER BY COALESCE(external_ref = $1, FALSE) DESC, updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(lookup.reference.as_deref())
        .bind(lookup.subscription_code.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn latest_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn apply(&self, plan: &TransitionPlan) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(key) = &plan.dedupe_key {
            let recorded = sqlx::query(
                "INSERT INTO payment_webhook_events (event_key) VALUES ($1) ON CONFLICT (event_key) DO NOTHING",
            )
            .bind(key)
            .execute(&mut tx)
            .await?
            .rows_affected();
            if recorded == 0 {
                tx.rollback().await?;
                return Ok(ApplyOutcome::Duplicate);
            }
        }

        for write in &plan.writes {
            match write {
                BillingWrite::InsertSubscription(new) => {
                    let inserted = sqlx::query(
                        r#"
                        INSERT INTO subscriptions (
                            id, user_id, tier, external_ref, plan_code, subscription_code,
                            status, start_date, renewal_date, amount_minor, currency
                        ) VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8, $9, $10)
                        ON CONFLICT (external_ref) DO NOTHING
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(new.user_id)
                    .bind(new.tier.as_str())
                    .bind(&new.external_ref)
                    .bind(new.plan_code.as_deref())
                    .bind(new.subscription_code.as_deref())
                    .bind(new.start_date)
                    .bind(new.renewal_date)
                    .bind(new.amount_minor)
                    .bind(&new.currency)
                    .execute(&mut tx)
                    .await?
                    .rows_affected();
                    if inserted == 0 {
                        tx.rollback().await?;
                        return Ok(ApplyOutcome::Duplicate);
                    }
                }
                BillingWrite::ExtendRenewal {
                    subscription_id,
                    renewal_date,
                } => {
                    sqlx::query(
                        "UPDATE subscriptions SET status = 'active', renewal_date = $2, updated_at = NOW() WHERE id = $1",
                    )
                    .bind(subscription_id)
                    .bind(renewal_date)
                    .execute(&mut tx)
                    .await?;
                }
                BillingWrite::MarkExpired { subscription_id } => {
                    sqlx::query(
                        "UPDATE subscriptions SET status = 'expired', updated_at = NOW() WHERE id = $1",
                    )
                    .bind(subscription_id)
                    .execute(&mut tx)
                    .await?;
                }
                BillingWrite::MarkCancelled { subscription_id } => {
                    sqlx::query(
                        "UPDATE subscriptions SET status = 'cancelled', updated_at = NOW() WHERE id = $1",
                    )
                    .bind(subscription_id)
                    .execute(&mut tx)
                    .await?;
                }
                BillingWrite::SetUserTier {
                    user_id,
                    tier,
                    status,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO user_preferences (user_id, subscription_tier, subscription_status)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (user_id)
                        DO UPDATE SET
                            subscription_tier = EXCLUDED.subscription_tier,
                            subscription_status = EXCLUDED.subscription_status,
                            updated_at = NOW()
                        "#,
                    )
                    .bind(user_id)
                    .bind(tier.as_str())
                    .bind(status.as_str())
                    .execute(&mut tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }
}
