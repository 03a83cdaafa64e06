use serde::Serialize;

use super::models::Tier;
use crate::analysis::models::AnalysisMode;
use crate::error::AppError;

// key: billing-quota -> outcome of a pre-flight usage check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allowed,
    QuotaExceeded { limit: i64, used: i64 },
    ModeRestricted,
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }

    /// Maps a denial onto the error returned to the caller.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            QuotaDecision::Allowed => Ok(()),
            QuotaDecision::QuotaExceeded { .. } => Err(AppError::PlanLimit),
            QuotaDecision::ModeRestricted => Err(AppError::PlanRestriction),
        }
    }
}

/// Monthly analysis allowance. `None` means unlimited.
pub fn monthly_limit(tier: Tier) -> Option<i64> {
    match tier {
        Tier::Free => Some(5),
        Tier::Pro => Some(50),
        Tier::Enterprise => None,
    }
}

/// How many ranked keywords the top-products view may show.
pub fn top_products_limit(tier: Tier) -> Option<i64> {
    match tier {
        Tier::Free => Some(3),
        Tier::Pro => Some(10),
        Tier::Enterprise => None,
    }
}

pub fn deep_mode_allowed(tier: Tier) -> bool {
    match tier {
        Tier::Free => false,
        Tier::Pro | Tier::Enterprise => true,
    }
}

pub fn remaining(tier: Tier, used: i64) -> Option<i64> {
    monthly_limit(tier).map(|limit| limit.saturating_sub(used).max(0))
}

/// Pure pre-flight check. Quota is checked before the mode restriction; nothing is
/// recorded here.
pub fn evaluate(tier: Tier, searches_this_month: i64, mode: AnalysisMode) -> QuotaDecision {
    if let Some(limit) = monthly_limit(tier) {
        if searches_this_month >= limit {
            return QuotaDecision::QuotaExceeded {
                limit,
                used: searches_this_month,
            };
        }
    }
    if mode == AnalysisMode::Deep && !deep_mode_allowed(tier) {
        return QuotaDecision::ModeRestricted;
    }
    QuotaDecision::Allowed
}
