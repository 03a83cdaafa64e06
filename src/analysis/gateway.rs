use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use super::batch::{validate_keyword_count, BatchOutcome, BatchSubmitter};
use super::client::AnalysisBackend;
use super::models::{
    align_results, AnalysisMode, AnalysisOptions, AnalysisRequest, KeywordAnalysis,
    NewKeywordRecord, DEFAULT_REGION, DEFAULT_TIMEFRAME,
};
use super::store::SearchStore;
use crate::billing::models::UserPreferences;
use crate::billing::quota;
use crate::billing::service::BillingStore;
use crate::error::{AppError, AppResult};

/// Result of a single-keyword retry.
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    pub search_id: Uuid,
    pub keyword: String,
    pub result: KeywordAnalysis,
    pub succeeded: bool,
}

// key: analysis-gateway -> quota gate, upstream call, persistence, usage accounting
#[derive(Clone)]
pub struct AnalysisGateway {
    billing: Arc<dyn BillingStore>,
    searches: Arc<dyn SearchStore>,
    backend: Arc<dyn AnalysisBackend>,
}

impl AnalysisGateway {
    pub fn new(
        billing: Arc<dyn BillingStore>,
        searches: Arc<dyn SearchStore>,
        backend: Arc<dyn AnalysisBackend>,
    ) -> Self {
        Self {
            billing,
            searches,
            backend,
        }
    }

    pub fn searches(&self) -> &Arc<dyn SearchStore> {
        &self.searches
    }

    /// Fails closed: a preferences lookup error rejects the request before any upstream
    /// call is made.
    pub async fn check_quota(&self, user_id: Uuid, mode: AnalysisMode) -> AppResult<UserPreferences> {
        let prefs = self.billing.preferences(user_id).await?;
        let decision = quota::evaluate(prefs.subscription_tier, prefs.searches_this_month, mode);
        if !decision.is_allowed() {
            info!(%user_id, tier = %prefs.subscription_tier, ?decision, "analysis rejected by quota policy");
        }
        decision.into_result()?;
        Ok(prefs)
    }

    /// Single-request analysis of 3-10 keywords.
    pub async fn submit(&self, user_id: Uuid, request: &AnalysisRequest) -> AppResult<BatchOutcome> {
        let keywords = request.cleaned_keywords();
        validate_keyword_count(keywords.len())?;
        self.run_batch(user_id, &keywords, &request.options(), None)
            .await
    }

    async fn run_batch(
        &self,
        user_id: Uuid,
        keywords: &[String],
        options: &AnalysisOptions,
        search_id: Option<Uuid>,
    ) -> AppResult<BatchOutcome> {
        self.check_quota(user_id, options.mode).await?;

        let response = self.backend.analyze(keywords, options).await?;
        let results = align_results(keywords, response.results);

        let search_id = match search_id {
            None => self.searches.create_search(user_id, keywords).await?.id,
            Some(id) => {
                if let Err(err) = self.searches.append_keywords(id, keywords).await {
                    error!(?err, %user_id, search_id = %id, "failed to append batch keywords to search");
                }
                id
            }
        };

        let records: Vec<NewKeywordRecord> = results
            .iter()
            .map(|result| NewKeywordRecord::from_analysis(search_id, &options.region, result))
            .collect();
        let persisted_rows = match self.searches.insert_keyword_records(&records).await {
            Ok(count) => count,
            Err(err) => {
                error!(?err, %user_id, %search_id, "failed to save keyword results");
                0
            }
        };

        self.record_usage(user_id).await;

        let failed = results.iter().filter(|result| result.is_failed()).count();
        info!(
            %user_id,
            %search_id,
            keywords = keywords.len(),
            failed,
            persisted_rows,
            "analysis batch completed"
        );
        Ok(BatchOutcome {
            search_id,
            results,
            persisted_rows,
        })
    }

    /// Re-analyses one keyword of an existing search and stores the result as a new row.
    pub async fn retry_keyword(
        &self,
        user_id: Uuid,
        search_id: Uuid,
        keyword: &str,
        mode: AnalysisMode,
    ) -> AppResult<RetryOutcome> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(AppError::Validation("keyword is required".into()));
        }
        let search = self
            .searches
            .search_for_user(search_id, user_id)
            .await?
            .ok_or(AppError::NotFound("search"))?;
        if !search
            .keywords
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(keyword))
        {
            return Err(AppError::Validation(format!(
                "`{keyword}` is not part of this search"
            )));
        }

        self.check_quota(user_id, mode).await?;

        let region = self
            .searches
            .keyword_records(search_id)
            .await?
            .into_iter()
            .find(|record| record.keyword.eq_ignore_ascii_case(keyword))
            .map(|record| record.trends_region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let options = AnalysisOptions {
            mode,
            region,
            timeframe: DEFAULT_TIMEFRAME.to_string(),
        };
        let keywords = vec![keyword.to_string()];
        let response = self.backend.analyze(&keywords, &options).await?;
        let result = align_results(&keywords, response.results)
            .pop()
            .unwrap_or_else(|| KeywordAnalysis::missing(keyword));

        let record = NewKeywordRecord::from_analysis(search_id, &options.region, &result);
        if let Err(err) = self
            .searches
            .insert_keyword_records(std::slice::from_ref(&record))
            .await
        {
            error!(?err, %user_id, %search_id, "failed to save retried keyword");
        }
        self.record_usage(user_id).await;

        Ok(RetryOutcome {
            search_id,
            keyword: keyword.to_string(),
            succeeded: !result.is_failed(),
            result,
        })
    }

    async fn record_usage(&self, user_id: Uuid) {
        match self.billing.increment_usage(user_id).await {
            Ok(used) => info!(%user_id, searches_this_month = used, "usage recorded"),
            Err(err) => error!(?err, %user_id, "failed to increment monthly usage"),
        }
    }
}

#[async_trait]
impl BatchSubmitter for AnalysisGateway {
    async fn submit_batch(
        &self,
        user_id: Uuid,
        keywords: &[String],
        options: &AnalysisOptions,
        search_id: Option<Uuid>,
    ) -> AppResult<BatchOutcome> {
        self.run_batch(user_id, keywords, options, search_id).await
    }
}
