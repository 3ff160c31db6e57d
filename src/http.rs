//! HTTP adapter.
//!
//! Maps each API operation onto a JSON route and optionally serves
//! `/metrics` for Prometheus scraping. Errors are rendered by
//! [`ApiError`]'s `IntoResponse` implementation.

use crate::error::{ApiError, ApiResult};
use crate::handlers::Api;
use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use channelstream_proto::api::{
    AdminStats, ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse,
    InfoRequest, ListenQuery, MessageAccepted, SubscribeRequest, SubscribeResponse,
    UnsubscribeRequest, UnsubscribeResponse, UserStateRequest,
};
use channelstream_proto::{ChannelConfigs, ChannelsInfo, MessagePayload, UserState};
use std::net::SocketAddr;
use std::sync::Arc;

type ApiState = State<Arc<Api>>;

/// Unwrap a JSON body, turning extractor rejections into `InvalidRequest`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::invalid(e.body_text()))
}

async fn connect(
    State(api): ApiState,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<Json<ConnectResponse>> {
    api.connect(body(payload)?).map(Json)
}

async fn subscribe(
    State(api): ApiState,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> ApiResult<Json<SubscribeResponse>> {
    api.subscribe(body(payload)?).map(Json)
}

async fn unsubscribe(
    State(api): ApiState,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> ApiResult<Json<UnsubscribeResponse>> {
    api.unsubscribe(body(payload)?).map(Json)
}

async fn message(
    State(api): ApiState,
    payload: Result<Json<Vec<MessagePayload>>, JsonRejection>,
) -> ApiResult<Json<MessageAccepted>> {
    api.message(body(payload)?).map(Json)
}

async fn disconnect(
    State(api): ApiState,
    payload: Result<Json<DisconnectRequest>, JsonRejection>,
) -> ApiResult<Json<DisconnectResponse>> {
    api.disconnect(body(payload)?).map(Json)
}

async fn user_state(
    State(api): ApiState,
    payload: Result<Json<UserStateRequest>, JsonRejection>,
) -> ApiResult<Json<UserState>> {
    api.user_state(body(payload)?).map(Json)
}

async fn channel_config(
    State(api): ApiState,
    payload: Result<Json<ChannelConfigs>, JsonRejection>,
) -> ApiResult<Json<ChannelsInfo>> {
    api.channel_config(body(payload)?).map(Json)
}

async fn info_all(State(api): ApiState) -> ApiResult<Json<ChannelsInfo>> {
    api.info(InfoRequest::default()).map(Json)
}

async fn info(
    State(api): ApiState,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<ChannelsInfo>> {
    api.info(body(payload)?).map(Json)
}

async fn listen(State(api): ApiState, Query(query): Query<ListenQuery>) -> ApiResult<Response> {
    let jsonp = query.callback.as_deref().is_some_and(|cb| !cb.is_empty());
    let body = api.listen(query).await?;
    let content_type = if jsonp {
        "application/javascript"
    } else {
        "application/json"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn admin(State(api): ApiState) -> Json<AdminStats> {
    Json(api.admin_stats())
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Build the router for every API route.
pub fn router(api: Arc<Api>, metrics: bool) -> Router {
    let mut app = Router::new()
        .route("/connect", post(connect))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/message", post(message))
        .route("/disconnect", post(disconnect))
        .route("/user_state", post(user_state))
        .route("/channel_config", post(channel_config))
        .route("/info", get(info_all).post(info))
        .route("/listen", get(listen).post(listen))
        .route("/admin", get(admin));
    if metrics {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.with_state(api)
}

/// Serve `app` on `addr` until the server fails.
pub async fn run_http_server(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server on {addr}"))?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}
