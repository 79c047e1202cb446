use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::AppState;
use crate::{
    error::AppResult,
    models::{Recommendation, RecommendationQuery, Viewer},
    services::interactions::{ClientContext, InteractionOutcome, InteractionPayload},
};

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// `GET /api/v1/recommendations?for=&limit=&q=`
pub async fn get_recommendations(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<RecommendationQuery>,
) -> AppResult<Json<Vec<Recommendation>>> {
    let recommendations = state
        .recommendations
        .get_recommendations(&viewer, &query)
        .await?;
    Ok(Json(recommendations))
}

/// `POST /api/v1/interactions`
pub async fn record_interaction(
    State(state): State<AppState>,
    viewer: Viewer,
    context: ClientContext,
    Json(payload): Json<InteractionPayload>,
) -> AppResult<Response> {
    let outcome = state
        .interactions
        .record_interaction(&viewer, payload, &context)
        .await?;

    let response = match outcome {
        InteractionOutcome::Recorded(interaction) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "interaction": interaction })),
        )
            .into_response(),
        InteractionOutcome::RateLimited {
            reason,
            retry_after_seconds,
        } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "success": false,
                    "rateLimited": true,
                    "reason": reason,
                    "retryAfterSeconds": retry_after_seconds,
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
            response
        }
    };

    Ok(response)
}
