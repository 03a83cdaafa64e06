use std::convert::Infallible;

use axum::{
    extract::{Extension, Path, Query},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;
use uuid::Uuid;

use super::batch::{plan_batches, BatchOrchestrator};
use super::gateway::{AnalysisGateway, RetryOutcome};
use super::models::{AnalysisMode, AnalysisRequest, KeywordAnalysis, KeywordRecord, SearchRecord};
use crate::billing::quota;
use crate::billing::service::BillingStore;
use crate::error::{AppError, AppResult};
use crate::extractor::{ApiJson, AuthUser};

use std::sync::Arc;

const SEARCH_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponseBody {
    pub success: bool,
    pub search_id: Uuid,
    pub results: Vec<KeywordAnalysis>,
}

// key: analysis-api -> POST /api/analyze
pub async fn analyze(
    Extension(gateway): Extension<AnalysisGateway>,
    AuthUser { user_id, .. }: AuthUser,
    ApiJson(request): ApiJson<AnalysisRequest>,
) -> AppResult<Json<AnalysisResponseBody>> {
    let outcome = gateway.submit(user_id, &request).await?;
    Ok(Json(AnalysisResponseBody {
        success: true,
        search_id: outcome.search_id,
        results: outcome.results,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunBody {
    pub success: bool,
    pub search_id: Uuid,
    pub batches: usize,
    pub results: Vec<KeywordAnalysis>,
}

// key: analysis-api -> POST /api/analyze/batch, progress over SSE or a final JSON body
pub async fn analyze_batch(
    Extension(gateway): Extension<AnalysisGateway>,
    Extension(orchestrator): Extension<BatchOrchestrator>,
    AuthUser { user_id, .. }: AuthUser,
    Query(query): Query<BatchQuery>,
    ApiJson(request): ApiJson<AnalysisRequest>,
) -> AppResult<Response> {
    let keywords = request.cleaned_keywords();
    let batches = plan_batches(&keywords, request.mode)?;
    // Reject up front so denials keep their status code instead of arriving as an event.
    gateway.check_quota(user_id, request.mode).await?;

    let run = orchestrator.spawn(user_id, batches, request.options());
    if query.wait {
        drop(run.events);
        let summary = run.handle.await.map_err(|err| {
            error!(?err, %user_id, "analysis run task failed");
            AppError::Internal(err.into())
        })??;
        return Ok(Json(BatchRunBody {
            success: true,
            search_id: summary.search_id,
            batches: summary.batches,
            results: summary.results,
        })
        .into_response());
    }

    let stream = ReceiverStream::new(run.events).filter_map(|event| async move {
        Event::default()
            .json_data(&event)
            .ok()
            .map(Ok::<_, Infallible>)
    });
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct SearchDetail {
    pub search: SearchRecord,
    pub keywords: Vec<KeywordRecord>,
    /// A search whose keyword rows failed to save.
    pub empty: bool,
    pub failed_keywords: Vec<String>,
}

pub async fn get_search(
    Extension(gateway): Extension<AnalysisGateway>,
    AuthUser { user_id, .. }: AuthUser,
    Path(search_id): Path<Uuid>,
) -> AppResult<Json<SearchDetail>> {
    let searches = gateway.searches();
    let search = searches
        .search_for_user(search_id, user_id)
        .await?
        .ok_or(AppError::NotFound("search"))?;
    let keywords = searches.keyword_records(search_id).await?;
    let failed_keywords = failed_keywords(&keywords);
    Ok(Json(SearchDetail {
        empty: keywords.is_empty(),
        search,
        keywords,
        failed_keywords,
    }))
}

/// Keywords whose latest row is still a placeholder.
fn failed_keywords(records: &[KeywordRecord]) -> Vec<String> {
    let mut latest: Vec<&KeywordRecord> = Vec::new();
    for record in records {
        match latest
            .iter_mut()
            .find(|seen| seen.keyword.eq_ignore_ascii_case(&record.keyword))
        {
            Some(seen) if seen.created_at <= record.created_at => *seen = record,
            Some(_) => {}
            None => latest.push(record),
        }
    }
    latest
        .into_iter()
        .filter(|record| record.is_placeholder())
        .map(|record| record.keyword.clone())
        .collect()
}

pub async fn list_searches(
    Extension(gateway): Extension<AnalysisGateway>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<SearchRecord>>> {
    let searches = gateway
        .searches()
        .list_searches(user_id, SEARCH_HISTORY_LIMIT)
        .await?;
    Ok(Json(searches))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub keyword: String,
    #[serde(default)]
    pub mode: AnalysisMode,
}

// key: analysis-api -> POST /api/searches/:id/retry
pub async fn retry_keyword(
    Extension(gateway): Extension<AnalysisGateway>,
    AuthUser { user_id, .. }: AuthUser,
    Path(search_id): Path<Uuid>,
    ApiJson(request): ApiJson<RetryRequest>,
) -> AppResult<Json<RetryOutcome>> {
    let outcome = gateway
        .retry_keyword(user_id, search_id, &request.keyword, request.mode)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct TopProducts {
    pub tier: crate::billing::models::Tier,
    pub items: Vec<KeywordRecord>,
}

pub async fn top_products(
    Extension(gateway): Extension<AnalysisGateway>,
    Extension(billing): Extension<Arc<dyn BillingStore>>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<TopProducts>> {
    let prefs = billing.preferences(user_id).await?;
    let limit = quota::top_products_limit(prefs.subscription_tier);
    let items = gateway.searches().top_keywords(user_id, limit).await?;
    Ok(Json(TopProducts {
        tier: prefs.subscription_tier,
        items,
    }))
}
