use axum::{routing::get, Router};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{trace::TraceLayer, cors::{Any, CorsLayer}};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use learnpath_runtime::api::{HttpLearningApi, LearningApi};
use learnpath_runtime::config::Settings;
use learnpath_runtime::routes;
use learnpath_runtime::shell::{ApiFactory, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "learnpath_runtime=info,tower_http=info,axum=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = HttpLearningApi::new(&settings.api_url, settings.api_token.clone(), settings.api_timeout)?;
    // the learner's own token wins over the configured one
    let api: ApiFactory = Arc::new(move |token: Option<String>| {
        Arc::new(backend.with_token(token)) as Arc<dyn LearningApi>
    });

    let state = AppState::new(api, settings.session());
    state.spawn_sweeper(settings.session_idle.min(Duration::from_secs(60)), settings.session_idle);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        );

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(api = %settings.api_url, dwell_secs = settings.dwell.as_secs(), "listening on http://0.0.0.0:{}", settings.port);

    axum::serve(listener, app).await?;
    Ok(())
}
