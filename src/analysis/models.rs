use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const MIN_KEYWORDS: usize = 3;
pub const MAX_KEYWORDS: usize = 10;
pub const DEFAULT_REGION: &str = "US";
pub const DEFAULT_TIMEFRAME: &str = "today 12-m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Fast,
    /// Also requests supply-side signals; slower upstream.
    Deep,
}

impl AnalysisMode {
    pub fn include_supply(&self) -> bool {
        matches!(self, AnalysisMode::Deep)
    }
}

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub mode: AnalysisMode,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
}

/// Validated analysis parameters shared by every batch of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub mode: AnalysisMode,
    pub region: String,
    pub timeframe: String,
}

impl AnalysisRequest {
    pub fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            mode: self.mode,
            region: non_empty(self.region.as_deref()).unwrap_or(DEFAULT_REGION).to_string(),
            timeframe: non_empty(self.timeframe.as_deref())
                .unwrap_or(DEFAULT_TIMEFRAME)
                .to_string(),
        }
    }

    /// Trimmed, non-empty keywords in submission order.
    pub fn cleaned_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|keyword| keyword.trim())
            .filter(|keyword| !keyword.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordScores {
    #[serde(default)]
    pub opportunity: f64,
    #[serde(default)]
    pub demand: f64,
    #[serde(default)]
    pub supply: f64,
    #[serde(default)]
    pub competition: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandSignal {
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub momentum_pct: f64,
    #[serde(default)]
    pub trend: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplySignal {
    pub spocket_count: Option<i64>,
    pub zendrop_count: Option<i64>,
    pub amazon_serp_estimate: Option<i64>,
    pub aliexpress_serp_estimate: Option<i64>,
    pub amazon_product_count: Option<i64>,
    pub aliexpress_product_count: Option<i64>,
}

/// One keyword's result as returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordAnalysis {
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<KeywordScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<DemandSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supply: Option<SupplySignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeywordAnalysis {
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.scores.is_none()
    }

    /// Stand-in for a keyword the service did not return.
    pub fn missing(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            scores: None,
            demand: None,
            supply: None,
            error: Some("keyword missing from analysis response".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub results: Vec<KeywordAnalysis>,
}

// key: analysis-search -> one analysis submission
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SearchRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Row to insert for one analysed keyword. Rows are never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewKeywordRecord {
    pub search_id: Uuid,
    pub keyword: String,
    pub opportunity_score: f64,
    pub trends_interest: Option<f64>,
    pub trends_growth_rate: Option<f64>,
    pub trends_region: String,
    pub spocket_count: Option<i64>,
    pub zendrop_count: Option<i64>,
    pub amazon_serp_estimate: Option<i64>,
    pub aliexpress_serp_estimate: Option<i64>,
    pub amazon_product_count: Option<i64>,
    pub aliexpress_product_count: Option<i64>,
}

impl NewKeywordRecord {
    /// Failed keywords become placeholders (score 0, no metrics) so every submitted
    /// keyword has a row that can be retried.
    pub fn from_analysis(search_id: Uuid, region: &str, result: &KeywordAnalysis) -> Self {
        if result.is_failed() {
            return Self::placeholder(search_id, region, &result.keyword);
        }
        let scores = result.scores.clone().unwrap_or_default();
        let supply = result.supply.clone().unwrap_or_default();
        Self {
            search_id,
            keyword: result.keyword.clone(),
            opportunity_score: scores.opportunity.clamp(0.0, 100.0),
            trends_interest: result.demand.as_ref().map(|demand| demand.current),
            trends_growth_rate: result.demand.as_ref().map(|demand| demand.momentum_pct),
            trends_region: region.to_string(),
            spocket_count: supply.spocket_count,
            zendrop_count: supply.zendrop_count,
            amazon_serp_estimate: supply.amazon_serp_estimate,
            aliexpress_serp_estimate: supply.aliexpress_serp_estimate,
            amazon_product_count: supply.amazon_product_count,
            aliexpress_product_count: supply.aliexpress_product_count,
        }
    }

    pub fn placeholder(search_id: Uuid, region: &str, keyword: &str) -> Self {
        Self {
            search_id,
            keyword: keyword.to_string(),
            opportunity_score: 0.0,
            trends_interest: None,
            trends_growth_rate: None,
            trends_region: region.to_string(),
            spocket_count: None,
            zendrop_count: None,
            amazon_serp_estimate: None,
            aliexpress_serp_estimate: None,
            amazon_product_count: None,
            aliexpress_product_count: None,
        }
    }
}

// key: analysis-keyword-row -> persisted keyword result
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct KeywordRecord {
    pub id: Uuid,
    pub search_id: Uuid,
    pub keyword: String,
    pub opportunity_score: f64,
    pub trends_interest: Option<f64>,
    pub trends_growth_rate: Option<f64>,
    pub trends_region: String,
    pub spocket_count: Option<i64>,
    pub zendrop_count: Option<i64>,
    pub amazon_serp_estimate: Option<i64>,
    pub aliexpress_serp_estimate: Option<i64>,
    pub amazon_product_count: Option<i64>,
    pub aliexpress_product_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl KeywordRecord {
    /// Placeholder rows left by a failed keyword.
    pub fn is_placeholder(&self) -> bool {
        self.opportunity_score == 0.0 && self.trends_interest.is_none()
    }
}

/// Pairs each submitted keyword with its upstream result, in submission order. Keywords
/// the service omitted are filled with a failed stand-in.
pub fn align_results(keywords: &[String], results: Vec<KeywordAnalysis>) -> Vec<KeywordAnalysis> {
    let mut pending: Vec<Option<KeywordAnalysis>> = results.into_iter().map(Some).collect();
    keywords
        .iter()
        .map(|keyword| {
            pending
                .iter_mut()
                .find(|slot| {
                    slot.as_ref()
                        .map(|result| result.keyword.eq_ignore_ascii_case(keyword))
                        .unwrap_or(false)
                })
                .and_then(Option::take)
                .unwrap_or_else(|| KeywordAnalysis::missing(keyword))
        })
        .collect()
}
