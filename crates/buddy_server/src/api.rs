/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use buddy_core::feed::{parse_cursor, FeedFilters};
use buddy_core::model::{Identity, Role, Visibility};
use buddy_core::score::Mood;
use buddy_core::service::NewPost;
use buddy_core::{FeedError, FeedRuntime};
use buddy_protocol::{
    AwardPointsRequest, CommentListQuery, CommentRequest, CreatePostRequest, CreatePostResponse,
    ErrorResponse, FeedQuery, MessageSentRequest, OkResponse, PersonalizedQuery,
    QuizAttemptRequest, ReactionRequest,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn};

#[derive(Clone)]
pub struct AppState {
    pub runtime: FeedRuntime,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/metrics", get(metrics))
        .route("/v1/feed", get(feed))
        .route("/v1/feed/personalized", get(personalized_feed))
        .route("/v1/trending/:community_id", get(trending))
        .route("/v1/posts", post(create_post))
        .route("/v1/posts/:post_id", delete(delete_post))
        .route("/v1/posts/:post_id/share", post(share_post))
        .route("/v1/posts/:post_id/react", post(react))
        .route("/v1/posts/:post_id/unreact", post(unreact))
        .route(
            "/v1/posts/:post_id/comments",
            post(add_comment).get(list_comments),
        )
        .route("/v1/connections/:user_id/accept", post(accept_connection))
        .route("/v1/connections/:user_id/remove", post(remove_connection))
        .route("/v1/quizzes/:quiz_id/attempts", post(quiz_attempt))
        .route("/v1/quizzes/:quiz_id/stats", get(quiz_stats))
        .route("/v1/messages/sent", post(message_sent))
        .route("/v1/analytics/messages/:day", get(messages_on_day))
        .route("/v1/points/award", post(award_points))
        .route("/v1/points/:user_id", get(points_total))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("req");
                info_span!(
                    "http",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id
                )
            }),
        )
        .with_state(state)
}

fn error_response(e: FeedError) -> Response {
    let status = match &e {
        FeedError::NotFound(_) => StatusCode::NOT_FOUND,
        FeedError::Forbidden(_) => StatusCode::FORBIDDEN,
        FeedError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        FeedError::Conflict { .. } => StatusCode::CONFLICT,
        FeedError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() || status == StatusCode::CONFLICT {
        warn!("request failed: {e}");
    } else {
        debug!("request rejected: {e}");
    }
    (status, Json(ErrorResponse::new(e.code(), e.to_string()))).into_response()
}

/// Identity as forwarded by the identity provider in front of this service.
fn caller(headers: &HeaderMap) -> Result<Identity, Response> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let Some(user_id) = user_id else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("unauthenticated", "missing x-user-id")),
        )
            .into_response());
    };
    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .map(Role::parse)
        .unwrap_or(Role::User);
    Ok(Identity::new(user_id, role))
}

macro_rules! try_caller {
    ($headers:expr) => {
        match caller(&$headers) {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    };
}

fn ok() -> Response {
    (StatusCode::OK, Json(OkResponse::ok())).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    match state.runtime.social.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "service": "feed"})),
        )
            .into_response(),
        Err(e) => {
            warn!("health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "service": "feed"})),
            )
                .into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.runtime.metrics.snapshot())).into_response()
}

async fn feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<FeedQuery>,
) -> Response {
    let me = try_caller!(headers);
    let cursor = match q.cursor.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(raw) => match parse_cursor(raw) {
            Ok(v) => Some(v),
            Err(e) => return error_response(e),
        },
        None => None,
    };
    let filters = FeedFilters {
        community_id: q.community_id,
        cursor,
    };
    match state
        .runtime
        .composer
        .compose(&me.user_id, &filters, q.page_size)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn personalized_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PersonalizedQuery>,
) -> Response {
    let me = try_caller!(headers);
    let mood = q.mood.as_deref().and_then(|m| {
        let parsed = Mood::parse(m);
        if parsed.is_none() {
            debug!(mood = m, "ignoring unknown mood hint");
        }
        parsed
    });
    match state
        .runtime
        .personalization
        .get_personalized_feed(&me.user_id, q.community_id.as_deref(), mood)
        .await
    {
        Ok(feed) => (StatusCode::OK, Json(feed)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn trending(State(state): State<AppState>, Path(community_id): Path<String>) -> Response {
    let items = state.runtime.trending.get_trending(&community_id).await;
    (
        StatusCode::OK,
        Json(json!({"communityId": community_id, "items": items})),
    )
        .into_response()
}

async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePostRequest>,
) -> Response {
    let me = try_caller!(headers);
    let Some(visibility) = Visibility::parse(&req.visibility) else {
        return error_response(FeedError::invalid(format!(
            "unknown visibility: {:?}",
            req.visibility
        )));
    };
    let post = NewPost {
        content: req.content,
        tags: req.tags,
        visibility,
        community_tag: req.community_tag,
    };
    match state.runtime.social.create_post(&me, post).await {
        Ok(item) => (
            StatusCode::OK,
            Json(CreatePostResponse {
                ok: true,
                post_id: item.id,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Response {
    let me = try_caller!(headers);
    match state.runtime.social.delete_post(&me, &post_id).await {
        Ok(()) => ok(),
        Err(e) => error_response(e),
    }
}

async fn share_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Response {
    let me = try_caller!(headers);
    match state.runtime.social.share_post(&me, &post_id).await {
        Ok(_) => ok(),
        Err(e) => error_response(e),
    }
}

async fn react(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> Response {
    let me = try_caller!(headers);
    match state.runtime.social.react(&me, &post_id, &req.reaction).await {
        Ok(_) => ok(),
        Err(e) => error_response(e),
    }
}

async fn unreact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Response {
    let me = try_caller!(headers);
    match state.runtime.social.unreact(&me, &post_id).await {
        Ok(_) => ok(),
        Err(e) => error_response(e),
    }
}

async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> Response {
    let me = try_caller!(headers);
    match state
        .runtime
        .social
        .add_comment(&me, &post_id, &req.text, req.parent_id.as_deref())
        .await
    {
        Ok(comment) => (
            StatusCode::OK,
            Json(json!({"ok": true, "comment": comment})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    Query(q): Query<CommentListQuery>,
) -> Response {
    let _me = try_caller!(headers);
    match state.runtime.social.list_comments(&post_id, q.limit).await {
        Ok(items) => (StatusCode::OK, Json(json!({"items": items}))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn accept_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Response {
    let me = try_caller!(headers);
    match state.runtime.social.accept_connection(&me, &user_id).await {
        Ok(changed) => (StatusCode::OK, Json(json!({"ok": true, "changed": changed}))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_connection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Response {
    let me = try_caller!(headers);
    match state.runtime.social.remove_connection(&me, &user_id).await {
        Ok(changed) => (StatusCode::OK, Json(json!({"ok": true, "changed": changed}))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn quiz_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(quiz_id): Path<String>,
    Json(req): Json<QuizAttemptRequest>,
) -> Response {
    let me = try_caller!(headers);
    match state
        .runtime
        .social
        .submit_quiz_attempt(&me, &quiz_id, req.score)
        .await
    {
        Ok(()) => ok(),
        Err(e) => error_response(e),
    }
}

async fn quiz_stats(State(state): State<AppState>, Path(quiz_id): Path<String>) -> Response {
    match state.runtime.social.quiz_stats(&quiz_id).await {
        Ok(doc) => (
            StatusCode::OK,
            Json(json!({"quizId": quiz_id, "attempts": doc.count, "avgScore": doc.mean})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn message_sent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MessageSentRequest>,
) -> Response {
    let me = try_caller!(headers);
    match state
        .runtime
        .social
        .record_message_sent(&me, req.thread_id.as_deref())
        .await
    {
        Ok(()) => ok(),
        Err(e) => error_response(e),
    }
}

async fn messages_on_day(State(state): State<AppState>, Path(day): Path<String>) -> Response {
    match state.runtime.social.messages_on_day(&day).await {
        Ok(count) => (StatusCode::OK, Json(json!({"day": day, "count": count}))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn award_points(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AwardPointsRequest>,
) -> Response {
    let me = try_caller!(headers);
    match state
        .runtime
        .social
        .award_points(&me, &req.user_id, req.points)
        .await
    {
        Ok(_) => {
            info!(
                user = %req.user_id,
                points = req.points,
                action = req.action_type.as_deref().unwrap_or("-"),
                by = %me.user_id,
                "points awarded"
            );
            ok()
        }
        Err(e) => error_response(e),
    }
}

async fn points_total(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.runtime.social.points_total(&user_id).await {
        Ok(points) => {
            (StatusCode::OK, Json(json!({"userId": user_id, "points": points}))).into_response()
        }
        Err(e) => error_response(e),
    }
}
