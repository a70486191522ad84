//! HTTP façade: router construction and server bootstrap.

pub mod error;
pub mod handlers;
mod openapi;
pub mod sms;
pub mod state;
pub mod upi;

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;

use crate::kv::{KvStore, RedisKv};
use handlers::{health, root};
pub use openapi::openapi;
use sms::{HttpSmsSender, LogSmsSender, SmsSender};
use state::AppContext;
use upi::{DisabledUpiClient, HttpUpiClient, UpiClient};

pub struct SmsGatewayConfig {
    pub endpoint: String,
    pub sender_id: String,
    pub api_key: String,
}

pub struct UpiProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub kv_url: String,
    pub jwt_secret: String,
    /// Browser origin allowed to call the admin and team surfaces.
    pub frontend_base_url: String,
    /// `None` falls back to the logging sender for local development.
    pub sms: Option<SmsGatewayConfig>,
    /// `None` disables provider verification; format checks still apply.
    pub upi: Option<UpiProviderConfig>,
    pub request_timeout_seconds: u64,
}

/// Build the documented router.
#[must_use]
pub fn router() -> utoipa_axum::router::OpenApiRouter {
    openapi::api_router()
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database or key-value store cannot be reached or
/// the listener fails to bind.
pub async fn new(config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKv::connect(&config.kv_url)
            .await
            .context("Failed to connect to key-value store")?,
    );

    let sms: Arc<dyn SmsSender> = match config.sms {
        Some(gateway) => Arc::new(
            HttpSmsSender::new(gateway.endpoint, gateway.sender_id, gateway.api_key)
                .context("Failed to build SMS sender")?,
        ),
        None => {
            info!("SMS gateway disabled, using log sender");
            Arc::new(LogSmsSender)
        }
    };

    let upi_enabled = config.upi.is_some();
    let upi: Arc<dyn UpiClient> = match config.upi {
        Some(provider) => Arc::new(
            HttpUpiClient::new(provider.base_url, provider.api_key)
                .context("Failed to build UPI client")?,
        ),
        None => {
            info!("UPI provider disabled, format validation only");
            Arc::new(DisabledUpiClient)
        }
    };

    let ctx = Arc::new(AppContext::new(
        kv,
        sms,
        upi,
        config.jwt_secret.into_bytes(),
        upi_enabled,
    ));

    let frontend_origin = frontend_origin(&config.frontend_base_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Extend the documented routes with `/` and preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                // Request deadline; outbound SMS/UPI calls carry shorter ones.
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.request_timeout_seconds,
                )))
                .layer(cors)
                .layer(Extension(ctx))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
