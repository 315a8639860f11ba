//! HTTP surface of the service: route modules and the application router.

pub mod auth;
pub mod aws;
pub mod box_profiles;
pub mod common;
pub mod opx;
pub mod users;
pub mod video_groups;
pub mod videos;

#[cfg(test)]
mod flow_tests;

use anyhow::Context;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware, Router,
};
use tower_cookies::CookieManagerLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::common::csrf::csrf_protection;
use crate::api::common::request_tracing::{
    make_custom_span, on_custom_failure, on_custom_request, on_custom_response,
};
use crate::system::create_system_router;
use crate::InnerState;

/// Builds the full application router with its state applied.
#[tracing::instrument(name = "create_app", skip(state))]
pub fn create_app(state: InnerState) -> anyhow::Result<Router> {
    tracing::info!("Creating application router");

    let mut api = Router::new()
        .nest("/auth", auth::routes(state.clone()))
        .nest("/videos", videos::routes(state.clone()))
        .nest("/video-groups", video_groups::routes(state.clone()))
        .nest("/box-profiles", box_profiles::routes(state.clone()))
        .nest("/opx", opx::routes(state.clone()))
        .merge(create_system_router(state.clone()));

    match state.aws.clone() {
        Some(aws_services) => {
            tracing::info!("Mounting AWS routes");
            api = api.nest("/aws", aws::routes(state.clone(), aws_services));
        }
        None => tracing::info!("AWS_REGION not set, AWS routes disabled"),
    }

    let mut app = api
        .with_state(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_custom_span)
                .on_request(on_custom_request)
                .on_response(on_custom_response)
                .on_failure(on_custom_failure),
        );

    if state.config.csrf_enabled {
        tracing::info!("CSRF protection enabled");
        app = app.layer(middleware::from_fn(csrf_protection));
    }

    app = app
        .layer(CookieManagerLayer::new())
        .layer(cors_layer(state.config.cors_origin.as_deref())?);

    if state.config.compression_enabled {
        tracing::info!("Response compression enabled");
        app = app.layer(CompressionLayer::new());
    }

    Ok(app)
}

fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = origin else {
        return Ok(CorsLayer::permissive());
    };

    let origin = origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS_ORIGIN '{}'", origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("csrf-token"),
            HeaderName::from_static("x-xsrf-token"),
        ]))
}
