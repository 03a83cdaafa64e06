use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};

use crate::analysis::{self, AnalysisBackend, AnalysisGateway, BatchOrchestrator, SearchStore};
use crate::billing::{self, BillingStore, PaymentGateway};
use crate::config::ServiceEndpoints;
use crate::pricing::{self, GeoLocator};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/analyze", post(analysis::api::analyze))
        .route("/api/analyze/batch", post(analysis::api::analyze_batch))
        .route("/api/searches", get(analysis::api::list_searches))
        .route("/api/searches/:id", get(analysis::api::get_search))
        .route("/api/searches/:id/retry", post(analysis::api::retry_keyword))
        .route("/api/top-products", get(analysis::api::top_products))
        .route("/api/user/subscription", get(billing::api::get_subscription))
        .route(
            "/api/user/subscription-details",
            get(billing::api::subscription_details),
        )
        .route(
            "/api/user/cancel-subscription",
            post(billing::api::cancel_subscription),
        )
        .route(
            "/api/payment/initialize",
            get(billing::api::initialize_checkout).post(billing::api::initialize_payment),
        )
        .route("/api/payment/verify", get(billing::api::verify_payment))
        .route("/api/webhooks/payment", post(billing::api::payment_webhook))
        .route("/api/pricing", get(pricing::api::get_pricing))
}

/// Collaborators every handler may depend on, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub billing: Arc<dyn BillingStore>,
    pub searches: Arc<dyn SearchStore>,
    pub backend: Arc<dyn AnalysisBackend>,
    pub payments: Arc<dyn PaymentGateway>,
    pub geo: GeoLocator,
    pub endpoints: ServiceEndpoints,
}

// key: routes -> api router with its extension layers
pub fn app(context: AppContext) -> Router {
    let gateway = AnalysisGateway::new(
        context.billing.clone(),
        context.searches.clone(),
        context.backend.clone(),
    );
    let orchestrator = BatchOrchestrator::new(Arc::new(gateway.clone()));
    api_routes()
        .layer(Extension(gateway))
        .layer(Extension(orchestrator))
        .layer(Extension(context.billing))
        .layer(Extension(context.payments))
        .layer(Extension(context.geo))
        .layer(Extension(context.endpoints))
}
