//! Liveness and readiness endpoint.

use axum::{
    body::Body,
    extract::Extension,
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{Instrument, error, info_span};
use utoipa::ToSchema;

use crate::api::state::AppContext;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    database: String,
    kv: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database and key-value store are reachable", body = Health),
        (status = 503, description = "A dependency is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(
    method: Method,
    pool: Extension<PgPool>,
    ctx: Extension<Arc<AppContext>>,
) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let db_ok = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(err) => {
                    error!("Failed to ping database: {err}");
                    false
                }
            }
        }
        Err(err) => {
            error!("Failed to acquire database connection: {err}");
            false
        }
    };

    // A failed probe key read means the ephemeral store is down; OTP and
    // rate limiting cannot work without it.
    let kv_ok = match ctx.kv().get("health:probe").await {
        Ok(_) => true,
        Err(err) => {
            error!("Failed to reach key-value store: {err}");
            false
        }
    };

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_ok { "ok" } else { "error" }.to_string(),
        kv: if kv_ok { "ok" } else { "error" }.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    if db_ok && kv_ok {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}
