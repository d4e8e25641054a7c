//! HTTP server wiring: the decision/management API, optionally guarded by the
//! enforcement middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::Router;
use miette::IntoDiagnostic;
use tower_http::trace::TraceLayer;

use crate::authz::Enforcer;
use crate::middleware::{enforce, EnforceConfig};
use crate::settings::Settings;

/// The full application router for `settings`.
pub fn app(settings: &Settings, enforcer: Arc<Enforcer>) -> Router {
    let mut router = crate::authz::web::router(enforcer.clone());

    if settings.enforcement.enabled {
        tracing::info!(
            auth_type = ?settings.enforcement.auth_type,
            skip_paths = ?settings.enforcement.skip_paths,
            "Request enforcement is ENABLED"
        );
        let config = EnforceConfig::from_settings(enforcer, &settings.enforcement);
        router = router.layer(middleware::from_fn_with_state(config, enforce));
    } else {
        tracing::info!("Request enforcement is DISABLED");
    }

    router.layer(TraceLayer::new_for_http())
}

pub async fn serve(settings: Settings, enforcer: Arc<Enforcer>) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .bind_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    let router = app(&settings, enforcer);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Policy API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}
