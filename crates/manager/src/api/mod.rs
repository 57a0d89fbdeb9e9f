//! HTTP API — JSON front door over the pool facade.

pub mod error;
pub mod map;
pub mod route;

use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ManagerConfig;
use crate::pool::BrowserPool;

pub fn router(pool: BrowserPool, config: &ManagerConfig) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(route::health))
        .route("/browsers", get(route::list_browsers))
        .route("/browsers/runtime", get(route::list_from_runtime))
        .route("/browsers/by-id/{id}", get(route::find_by_id))
        .route(
            "/browsers/by-session/{session_id}",
            get(route::find_by_session),
        )
        .route("/browsers/reserve", post(route::reserve))
        .route("/browsers/{name}/release", post(route::release))
        .route("/browsers/{name}/extend", post(route::extend))
        .route("/browsers/{name}/internals", put(route::set_internals))
        .route("/browsers/{name}/vnc-password", put(route::set_vnc_password))
        .route("/browsers/{name}/debug", put(route::set_debug))
        .route("/browsers/{name}/viewport", put(route::set_viewport))
        .route("/browsers/{name}/resolution", post(route::set_resolution))
        .route("/viewport", put(route::set_default_viewport))
        .with_state(pool)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }
    router
}
