#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use httpmock::MockServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use trendscout::analysis::models::{KeywordRecord, NewKeywordRecord, SearchRecord};
use trendscout::analysis::{HttpAnalysisClient, SearchStore};
use trendscout::billing::lifecycle::{BillingWrite, SubscriptionLookup, TransitionPlan};
use trendscout::billing::{
    ApplyOutcome, BillingStore, PaystackGateway, Subscription, SubscriptionStatus, Tier,
    UserPreferences,
};
use trendscout::config::ServiceEndpoints;
use trendscout::pricing::GeoLocator;
use trendscout::{app, AppContext};

pub const JWT_SECRET: &str = "secret";
pub const PAYSTACK_SECRET: &str = "sk_test_webhooks";
pub const APP_URL: &str = "https://app.example";

pub fn token_for(user_id: Uuid, email: Option<&str>) -> String {
    std::env::set_var("AUTH_JWT_SECRET", JWT_SECRET);
    let claims = serde_json::json!({
        "sub": user_id,
        "email": email,
        "exp": 9999999999u64,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Everything the billing store holds. Compared whole to prove a request changed nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillingSnapshot {
    pub preferences: HashMap<Uuid, UserPreferences>,
    pub subscriptions: Vec<Subscription>,
    pub event_keys: HashSet<String>,
    pub renewals: usize,
}

#[derive(Default)]
pub struct MemoryBillingStore {
    state: Mutex<BillingSnapshot>,
}

impl MemoryBillingStore {
    pub fn snapshot(&self) -> BillingSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn set_preferences(&self, user_id: Uuid, tier: Tier, used: i64) {
        let mut state = self.state.lock().unwrap();
        state.preferences.insert(
            user_id,
            UserPreferences {
                user_id,
                subscription_tier: tier,
                searches_this_month: used,
                subscription_status: "active".into(),
            },
        );
    }

    pub fn preferences_of(&self, user_id: Uuid) -> UserPreferences {
        self.state
            .lock()
            .unwrap()
            .preferences
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserPreferences::default_for(user_id))
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.state.lock().unwrap().subscriptions.push(subscription);
    }
}

pub fn active_subscription(user_id: Uuid, reference: &str, code: Option<&str>) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: Uuid::new_v4(),
        user_id,
        tier: Tier::Pro,
        external_ref: reference.into(),
        plan_code: None,
        subscription_code: code.map(str::to_string),
        status: SubscriptionStatus::Active,
        start_date: now - chrono::Duration::days(40),
        renewal_date: Some(now - chrono::Duration::days(10)),
        amount_minor: 110_000,
        currency: "ZAR".into(),
        created_at: now - chrono::Duration::days(40),
        updated_at: now - chrono::Duration::days(40),
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn preferences(&self, user_id: Uuid) -> Result<UserPreferences> {
        Ok(self.preferences_of(user_id))
    }

    async fn increment_usage(&self, user_id: Uuid) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        let prefs = state
            .preferences
            .entry(user_id)
            .or_insert_with(|| UserPreferences::default_for(user_id));
        prefs.searches_this_month += 1;
        Ok(prefs.searches_this_month)
    }

    async fn find_subscription(&self, lookup: &SubscriptionLookup) -> Result<Option<Subscription>> {
        let state = self.state.lock().unwrap();
        let by_ref = lookup.reference.as_ref().and_then(|reference| {
            state
                .subscriptions
                .iter()
                .find(|sub| &sub.external_ref == reference)
        });
        let by_code = || {
            lookup.subscription_code.as_ref().and_then(|code| {
                state.subscriptions.iter().find(|sub| {
                    sub.subscription_code.as_ref() == Some(code)
                        || sub.plan_code.as_ref() == Some(code)
                })
            })
        };
        Ok(by_ref.or_else(by_code).cloned())
    }

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        let state = self.state.lock().unwrap();
        Ok(state.subscriptions.iter().find(|sub| sub.id == id).cloned())
    }

    async fn latest_subscription(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subscriptions
            .iter()
            .filter(|sub| sub.user_id == user_id)
            .max_by_key(|sub| sub.created_at)
            .cloned())
    }

    async fn apply(&self, plan: &TransitionPlan) -> Result<ApplyOutcome> {
        let mut state = self.state.lock().unwrap();
        let mut next = state.clone();
        if let Some(key) = &plan.dedupe_key {
            if !next.event_keys.insert(key.clone()) {
                return Ok(ApplyOutcome::Duplicate);
            }
        }
        let now = Utc::now();
        for write in &plan.writes {
            match write {
                BillingWrite::InsertSubscription(new) => {
                    if next
                        .subscriptions
                        .iter()
                        .any(|sub| sub.external_ref == new.external_ref)
                    {
                        return Ok(ApplyOutcome::Duplicate);
                    }
                    next.subscriptions.push(Subscription {
                        id: Uuid::new_v4(),
                        user_id: new.user_id,
                        tier: new.tier,
                        external_ref: new.external_ref.clone(),
                        plan_code: new.plan_code.clone(),
                        subscription_code: new.subscription_code.clone(),
                        status: SubscriptionStatus::Active,
                        start_date: new.start_date,
                        renewal_date: Some(new.renewal_date),
                        amount_minor: new.amount_minor,
                        currency: new.currency.clone(),
                        created_at: now,
                        updated_at: now,
                    });
                }
                BillingWrite::ExtendRenewal {
                    subscription_id,
                    renewal_date,
                } => {
                    let sub = find_mut(&mut next.subscriptions, *subscription_id)?;
                    sub.renewal_date = Some(*renewal_date);
                    sub.status = SubscriptionStatus::Active;
                    sub.updated_at = now;
                    next.renewals += 1;
                }
                BillingWrite::MarkExpired { subscription_id } => {
                    let sub = find_mut(&mut next.subscriptions, *subscription_id)?;
                    sub.status = SubscriptionStatus::Expired;
                    sub.updated_at = now;
                }
                BillingWrite::MarkCancelled { subscription_id } => {
                    let sub = find_mut(&mut next.subscriptions, *subscription_id)?;
                    sub.status = SubscriptionStatus::Cancelled;
                    sub.updated_at = now;
                }
                BillingWrite::SetUserTier {
                    user_id,
                    tier,
                    status,
                } => {
                    let prefs = next
                        .preferences
                        .entry(*user_id)
                        .or_insert_with(|| UserPreferences::default_for(*user_id));
                    prefs.subscription_tier = *tier;
                    prefs.subscription_status = status.as_str().to_string();
                }
            }
        }
        *state = next;
        Ok(ApplyOutcome::Applied)
    }
}

fn find_mut(subscriptions: &mut [Subscription], id: Uuid) -> Result<&mut Subscription> {
    subscriptions
        .iter_mut()
        .find(|sub| sub.id == id)
        .ok_or_else(|| anyhow!("subscription {id} not found"))
}

#[derive(Default)]
pub struct MemorySearchStore {
    pub searches: Mutex<Vec<SearchRecord>>,
    pub rows: Mutex<Vec<KeywordRecord>>,
    reject_rows: AtomicBool,
}

impl MemorySearchStore {
    pub fn searches(&self) -> Vec<SearchRecord> {
        self.searches.lock().unwrap().clone()
    }

    pub fn rows(&self) -> Vec<KeywordRecord> {
        self.rows.lock().unwrap().clone()
    }

    /// Makes every later keyword row insert fail, as a lost database connection would.
    pub fn reject_keyword_rows(&self) {
        self.reject_rows.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchStore for MemorySearchStore {
    async fn create_search(&self, user_id: Uuid, keywords: &[String]) -> Result<SearchRecord> {
        let record = SearchRecord {
            id: Uuid::new_v4(),
            user_id,
            keywords: keywords.to_vec(),
            created_at: Utc::now(),
        };
        self.searches.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn append_keywords(&self, search_id: Uuid, keywords: &[String]) -> Result<()> {
        let mut searches = self.searches.lock().unwrap();
        let search = searches
            .iter_mut()
            .find(|search| search.id == search_id)
            .ok_or_else(|| anyhow!("search {search_id} not found"))?;
        search.keywords.extend_from_slice(keywords);
        Ok(())
    }

    async fn insert_keyword_records(&self, records: &[NewKeywordRecord]) -> Result<u64> {
        if self.reject_rows.load(Ordering::SeqCst) {
            return Err(anyhow!("keywords table unavailable"));
        }
        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.push(KeywordRecord {
                id: Uuid::new_v4(),
                search_id: record.search_id,
                keyword: record.keyword.clone(),
                opportunity_score: record.opportunity_score,
                trends_interest: record.trends_interest,
                trends_growth_rate: record.trends_growth_rate,
                trends_region: record.trends_region.clone(),
                spocket_count: record.spocket_count,
                zendrop_count: record.zendrop_count,
                amazon_serp_estimate: record.amazon_serp_estimate,
                aliexpress_serp_estimate: record.aliexpress_serp_estimate,
                amazon_product_count: record.amazon_product_count,
                aliexpress_product_count: record.aliexpress_product_count,
                created_at: Utc::now(),
            });
        }
        Ok(records.len() as u64)
    }

    async fn search_for_user(
        &self,
        search_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<SearchRecord>> {
        Ok(self
            .searches()
            .into_iter()
            .find(|search| search.id == search_id && search.user_id == user_id))
    }

    async fn keyword_records(&self, search_id: Uuid) -> Result<Vec<KeywordRecord>> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|row| row.search_id == search_id)
            .collect())
    }

    async fn list_searches(&self, user_id: Uuid, limit: i64) -> Result<Vec<SearchRecord>> {
        let mut searches: Vec<_> = self
            .searches()
            .into_iter()
            .filter(|search| search.user_id == user_id)
            .collect();
        searches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        searches.truncate(limit.max(0) as usize);
        Ok(searches)
    }

    async fn top_keywords(&self, user_id: Uuid, limit: Option<i64>) -> Result<Vec<KeywordRecord>> {
        let owned: HashSet<Uuid> = self
            .searches()
            .into_iter()
            .filter(|search| search.user_id == user_id)
            .map(|search| search.id)
            .collect();
        let mut rows: Vec<_> = self
            .rows()
            .into_iter()
            .filter(|row| owned.contains(&row.search_id))
            .collect();
        rows.sort_by(|a, b| {
            b.opportunity_score
                .total_cmp(&a.opportunity_score)
                .then_with(|| {
                    b.trends_growth_rate
                        .unwrap_or(f64::MIN)
                        .total_cmp(&a.trends_growth_rate.unwrap_or(f64::MIN))
                })
        });
        if let Some(limit) = limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }
}

/// Router wired to in-memory stores and one mock server standing in for every external
/// collaborator (analysis service, payment gateway, geolocation).
pub struct TestApp {
    pub router: Router,
    pub billing: Arc<MemoryBillingStore>,
    pub searches: Arc<MemorySearchStore>,
    pub upstream: MockServer,
}

impl TestApp {
    pub async fn start() -> Self {
        std::env::set_var("AUTH_JWT_SECRET", JWT_SECRET);
        let upstream = MockServer::start_async().await;
        let billing = Arc::new(MemoryBillingStore::default());
        let searches = Arc::new(MemorySearchStore::default());
        let http = reqwest::Client::new();
        let endpoints = ServiceEndpoints {
            analysis_url: upstream.base_url(),
            paystack_base: upstream.base_url(),
            paystack_secret: PAYSTACK_SECRET.into(),
            app_public_url: APP_URL.into(),
            geolocation_base: format!("{}/geo", upstream.base_url()),
            upstream_timeout: Some(Duration::from_secs(2)),
        };
        let context = AppContext {
            billing: billing.clone(),
            searches: searches.clone(),
            backend: Arc::new(
                HttpAnalysisClient::new(http.clone(), endpoints.analysis_url.clone())
                    .with_timeout(endpoints.upstream_timeout),
            ),
            payments: Arc::new(PaystackGateway::new(
                http.clone(),
                endpoints.paystack_base.clone(),
                endpoints.paystack_secret.clone(),
            )),
            geo: GeoLocator::new(http, endpoints.geolocation_base.clone()),
            endpoints,
        };
        Self {
            router: app(context),
            billing,
            searches,
            upstream,
        }
    }

    /// Raw response for streaming endpoints: status, content type and the full body text.
    pub async fn send_text(&self, request: Request<Body>) -> (StatusCode, String, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}
