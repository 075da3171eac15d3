use crate::snapshot::{PipelineSnapshot, PoolView, StrategyDetail};
use crate::{error::AppError, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// # GET /api/pipeline
/// Queue depth per status, the pause flag, the risk flags and the pool summary.
pub async fn get_pipeline(State(state): State<Arc<AppState>>) -> Result<Json<PipelineSnapshot>, AppError> {
    Ok(Json(PipelineSnapshot::collect(state.store.as_ref()).await?))
}

/// # GET /api/pool
pub async fn get_pool(State(state): State<Arc<AppState>>) -> Result<Json<PoolView>, AppError> {
    Ok(Json(PoolView::collect(state.store.as_ref()).await?))
}

/// # GET /api/strategies/:id
pub async fn get_strategy(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StrategyDetail>, AppError> {
    Ok(Json(StrategyDetail::collect(state.store.as_ref(), id).await?))
}

pub async fn not_found() -> AppError {
    AppError::NotFound("no such endpoint".to_string())
}

/// # GET /api/events
/// Streams every pipeline event as a JSON text frame.
pub async fn events_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("[WS] Event subscriber connected.");
    let mut rx = state.events.subscribe();
    loop {
        tokio::select! {
            next = events::next_event(&mut rx) => {
                let text = match next {
                    Some(Ok(envelope)) => match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "[WS] Could not encode event.");
                            continue;
                        }
                    },
                    Some(Err(lag)) => {
                        tracing::warn!(error = %lag, "[WS] Subscriber lagged.");
                        continue;
                    }
                    None => break,
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "[WS] Error.");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::info!("[WS] Connection closed.");
}
