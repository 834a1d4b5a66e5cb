//! REST surface for the consumer control plane (warp-based).

use std::convert::Infallible;
use std::sync::Arc;

use paimen_core::{ConsumerDraft, ConsumerPatch, ControlError, StoreError};
use paimen_runtime::{ConsumerSupervisor, LagInspector};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::Reply;
use warp::{Filter, Rejection};

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub supervisor: Arc<ConsumerSupervisor>,
    pub inspector: Arc<LagInspector>,
}

/// JSON error body: `{"error": "...", "code": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct GroupsQuery {
    #[serde(default)]
    all_groups: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupListResponse {
    consumer_groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MonitorOffsetsQuery {
    group_id: String,
    bootstrap_servers: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MonitorLagQuery {
    group_id: String,
    topic: String,
    bootstrap_servers: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    consumers: usize,
    recent_operations: Vec<paimen_runtime::JournalEntry>,
}

/// Build all control-plane routes. Callers attach [`handle_rejection`].
pub fn routes(
    ctx: ApiContext,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list_consumers = warp::path("consumers")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handle_list_consumers);

    let create_consumer = warp::path("consumers")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_context(ctx.clone()))
        .and_then(handle_create_consumer);

    let get_consumer = warp::path("consumers")
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handle_get_consumer);

    let update_consumer = warp::path("consumers")
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::body::json())
        .and(with_context(ctx.clone()))
        .and_then(handle_update_consumer);

    let start_consumer = warp::path("consumers")
        .and(warp::path::param::<Uuid>())
        .and(warp::path("start"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_context(ctx.clone()))
        .and_then(handle_start_consumer);

    let stop_consumer = warp::path("consumers")
        .and(warp::path::param::<Uuid>())
        .and(warp::path("stop"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_context(ctx.clone()))
        .and_then(handle_stop_consumer);

    let delete_consumer = warp::path("consumers")
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_context(ctx.clone()))
        .and_then(handle_delete_consumer);

    let list_groups = warp::path("consumergroups")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<GroupsQuery>())
        .and(with_context(ctx.clone()))
        .and_then(handle_list_groups);

    let group_offsets = warp::path("consumergroups")
        .and(warp::path::param::<String>())
        .and(warp::path("offsets"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handle_group_offsets);

    let monitor_offsets = warp::path("monitor")
        .and(warp::path("consumer-group-offsets"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<MonitorOffsetsQuery>())
        .and(with_context(ctx.clone()))
        .and_then(handle_monitor_offsets);

    let monitor_lag = warp::path("monitor")
        .and(warp::path("consumer-group-lag"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<MonitorLagQuery>())
        .and(with_context(ctx.clone()))
        .and_then(handle_monitor_lag);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(handle_health);

    list_consumers
        .or(create_consumer)
        .or(start_consumer)
        .or(stop_consumer)
        .or(get_consumer)
        .or(update_consumer)
        .or(delete_consumer)
        .or(list_groups)
        .or(group_offsets)
        .or(monitor_offsets)
        .or(monitor_lag)
        .or(health)
}

fn with_context(
    ctx: ApiContext,
) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_list_consumers(ctx: ApiContext) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.list().await {
        Ok(specs) => Ok(warp::reply::with_status(
            warp::reply::json(&specs),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_create_consumer(
    draft: ConsumerDraft,
    ctx: ApiContext,
) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.create(draft).await {
        Ok(spec) => Ok(warp::reply::with_status(
            warp::reply::json(&spec),
            StatusCode::CREATED,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_get_consumer(id: Uuid, ctx: ApiContext) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.get(id).await {
        Ok(spec) => Ok(warp::reply::with_status(
            warp::reply::json(&spec),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_update_consumer(
    id: Uuid,
    patch: ConsumerPatch,
    ctx: ApiContext,
) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.update(id, patch).await {
        Ok(spec) => Ok(warp::reply::with_status(
            warp::reply::json(&spec),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_start_consumer(id: Uuid, ctx: ApiContext) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.start(id).await {
        Ok(outcome) => Ok(warp::reply::with_status(
            warp::reply::json(&outcome),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_stop_consumer(id: Uuid, ctx: ApiContext) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.stop(id).await {
        Ok(outcome) => Ok(warp::reply::with_status(
            warp::reply::json(&outcome),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_delete_consumer(id: Uuid, ctx: ApiContext) -> Result<impl Reply, Infallible> {
    match ctx.supervisor.delete(id).await {
        Ok(()) => Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT)
            .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_list_groups(
    query: GroupsQuery,
    ctx: ApiContext,
) -> Result<impl Reply, Infallible> {
    let known = match ctx.supervisor.known_groups().await {
        Ok(groups) => groups,
        Err(e) => return Ok(error_response(e)),
    };

    let consumer_groups = if query.all_groups {
        match ctx.inspector.list_groups(None).await {
            Ok(mut all) => {
                // The cluster view may not yet include service-known groups
                // that have never committed; merge and deduplicate.
                all.extend(known);
                all.sort_unstable();
                all.dedup();
                all
            }
            Err(e) => return Ok(error_response(e)),
        }
    } else {
        known
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&GroupListResponse { consumer_groups }),
        StatusCode::OK,
    )
    .into_response())
}

async fn handle_group_offsets(
    group_id: String,
    ctx: ApiContext,
) -> Result<impl Reply, Infallible> {
    match ctx.inspector.committed_offsets(&group_id, None).await {
        Ok(offsets) => Ok(warp::reply::with_status(
            warp::reply::json(&offsets),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_monitor_offsets(
    query: MonitorOffsetsQuery,
    ctx: ApiContext,
) -> Result<impl Reply, Infallible> {
    match ctx
        .inspector
        .committed_offsets(&query.group_id, query.bootstrap_servers.as_deref())
        .await
    {
        Ok(offsets) => Ok(warp::reply::with_status(
            warp::reply::json(&offsets.by_topic()),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_monitor_lag(
    query: MonitorLagQuery,
    ctx: ApiContext,
) -> Result<impl Reply, Infallible> {
    match ctx
        .inspector
        .lag(
            &query.group_id,
            &query.topic,
            query.bootstrap_servers.as_deref(),
        )
        .await
    {
        Ok(lags) => Ok(warp::reply::with_status(
            warp::reply::json(&lags),
            StatusCode::OK,
        )
        .into_response()),
        Err(e) => Ok(error_response(e)),
    }
}

async fn handle_health(ctx: ApiContext) -> Result<impl Reply, Infallible> {
    let consumers = match ctx.supervisor.list().await {
        Ok(specs) => specs.len(),
        Err(e) => return Ok(error_response(e)),
    };
    let body = HealthResponse {
        status: "ok",
        consumers,
        recent_operations: ctx.supervisor.recent_operations(20),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::OK).into_response())
}

// =============================================================================
// Error mapping
// =============================================================================

fn error_response(err: ControlError) -> warp::reply::Response {
    let (status, code) = match &err {
        ControlError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ControlError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
        ControlError::BadConfig(_) => (StatusCode::BAD_REQUEST, "bad_config"),
        ControlError::UnknownType(_) => (StatusCode::BAD_REQUEST, "unknown_type"),
        ControlError::ClientInit(_) => (StatusCode::BAD_GATEWAY, "client_init"),
        ControlError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_io"),
        ControlError::TimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, "timed_out"),
        ControlError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
    };
    let body = ApiError {
        error: err.to_string(),
        code: code.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Translate warp rejections into the same JSON error shape.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "resource not found".to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "bad_config", body_err.to_string())
    } else if let Some(query_err) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "bad_config", query_err.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else {
        tracing::error!(?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error".to_string(),
        )
    };

    let body = ApiError {
        error: message,
        code: code.to_string(),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status).into_response())
}
