use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use trendscout::analysis::{HttpAnalysisClient, SearchRepository};
use trendscout::billing::{BillingService, PaystackGateway};
use trendscout::config::{self, ServiceEndpoints};
use trendscout::pricing::GeoLocator;
use trendscout::{app, AppContext};

async fn root() -> &'static str {
    "Trendscout API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if required secrets are missing
    let _ = config::AUTH_JWT_SECRET.as_str();
    let endpoints = ServiceEndpoints::from_env();
    if config::PAYSTACK_PUBLIC_KEY.is_none() {
        tracing::warn!("PAYSTACK_PUBLIC_KEY is not set; checkout clients cannot open the payment popup");
    }

    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let http = reqwest::Client::new();
    let context = AppContext {
        billing: Arc::new(BillingService::new(pool.clone())),
        searches: Arc::new(SearchRepository::new(pool.clone())),
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

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let router = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(app(context))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
