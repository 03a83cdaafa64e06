use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use super::geo::{client_ip, GeoLocator};
use super::{currency_for_country, format_currency, pricing};

#[derive(Debug, Default, Deserialize)]
pub struct PricingQuery {
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PricingResponse {
    pub country: Option<String>,
    pub currency: String,
    pub pro: i64,
    pub enterprise: i64,
    pub pro_display: String,
    pub enterprise_display: String,
}

// key: pricing-api -> GET /api/pricing, localized plan prices
pub async fn get_pricing(
    Extension(geo): Extension<GeoLocator>,
    Query(query): Query<PricingQuery>,
    headers: HeaderMap,
) -> Json<PricingResponse> {
    let country = match query
        .country
        .map(|value| value.trim().to_ascii_uppercase())
        .filter(|value| !value.is_empty())
    {
        Some(country) => Some(country),
        None => match client_ip(&headers) {
            Some(ip) => geo.country_for_ip(ip).await,
            None => None,
        },
    };
    let prices = pricing(currency_for_country(country.as_deref()));
    Json(PricingResponse {
        country,
        pro_display: format_currency(prices.pro as f64, &prices.currency),
        enterprise_display: format_currency(prices.enterprise as f64, &prices.currency),
        currency: prices.currency,
        pro: prices.pro,
        enterprise: prices.enterprise,
    })
}
