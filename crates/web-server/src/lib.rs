//! Read-only HTTP surface over the pipeline store.

use axum::{routing::get, Router};
use database::StrategyStore;
use events::EventBus;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;
pub mod snapshot;

pub use error::AppError;
pub use snapshot::{PipelineSnapshot, PoolView, StrategyDetail};

/// The shared application state that all handlers can access.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StrategyStore>,
    pub events: EventBus,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/pipeline", get(handlers::get_pipeline))
        .route("/api/pool", get(handlers::get_pool))
        .route("/api/strategies/:id", get(handlers::get_strategy))
        .route("/api/events", get(handlers::events_handler))
        .fallback(handlers::not_found)
        .with_state(Arc::new(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serves until `shutdown` flips to `true`.
pub async fn run_server(addr: SocketAddr, state: AppState, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Web server started and listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    tracing::info!("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use core_types::{
        Comparison, Condition, Direction, NewStrategy, Operand, PriceField, StrategyLogic, Timeframe, Value,
    };
    use database::MemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>) -> Router {
        router(AppState { store, events: EventBus::new(8) })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    fn new_strategy() -> NewStrategy {
        NewStrategy {
            logic: StrategyLogic {
                direction: Direction::Short,
                entry: vec![Condition {
                    left: Operand::Price { field: PriceField::Close, bars_ago: 0 },
                    op: Comparison::Lt,
                    right: Operand::Value { value: Value::Const(50.0) },
                }],
                exit: vec![],
                stop_loss: Some(Value::Const(0.03)),
                take_profit: None,
            },
            parameter_space: Default::default(),
            timeframe: Timeframe::H2,
        }
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let response = app(Arc::new(MemoryStore::new()))
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pipeline_reports_queue_depths_by_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_strategy(new_strategy()).await.unwrap();
        store.insert_strategy(new_strategy()).await.unwrap();

        let (status, body) = get_json(app(store), "/api/pipeline").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue_depths"]["GENERATED"], 2);
        assert_eq!(body["queue_depths"]["SCORED"], 0);
        assert_eq!(body["generation_paused"], false);
        assert_eq!(body["risk"]["emergency_stop"], false);
    }

    #[tokio::test]
    async fn strategy_detail_and_missing_strategy() {
        let store = Arc::new(MemoryStore::new());
        let record = store.insert_strategy(new_strategy()).await.unwrap();

        let (status, body) = get_json(app(store.clone()), &format!("/api/strategies/{}", record.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["strategy"]["status"], "GENERATED");
        assert_eq!(body["history"].as_array().map(Vec::len), Some(0));

        let (status, _) = get_json(app(store), &format!("/api/strategies/{}", uuid::Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_is_a_json_404() {
        let (status, body) = get_json(app(Arc::new(MemoryStore::new())), "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no such endpoint");
    }
}
