use crate::api::token;
use crate::logic::{DispatchRequest, Dispatcher};
use crate::model::{Document, Entity, Principal, Role};
use crate::notify::ConnectionRegistry;
use crate::store::{EntityStore, StoreError};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const USER_SCHEMA: &str = "user";
pub const GROUP_USER_SCHEMA: &str = "groupUser";
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub document: Arc<Document>,
    pub store: Arc<dyn EntityStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ConnectionRegistry>,
    pub jwt_secret: String,
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests.
    #[serde(rename = "jwtHeader")]
    pub jwt_header: String,
    #[serde(rename = "tokenPayload")]
    pub token_payload: Principal,
    /// The full schema document, so clients can build their UI and
    /// requests from the same source of truth the server dispatches on.
    pub openapi: Value,
    pub roles: Vec<Role>,
}

/// Load a stored user row and expand it into a principal: group
/// memberships come from the `groupUser` join collection, role grants
/// from the user's own `roles` array.
pub async fn build_principal(state: &AppState, name: &str) -> Result<(Principal, Entity), Response> {
    let mut filter = Entity::new();
    filter.insert("name".to_string(), Value::String(name.to_string()));

    let user = match state.store.find_one(USER_SCHEMA, &filter).await {
        Ok(user) => user,
        Err(StoreError::NotFound { .. }) => {
            return Err(error_response(StatusCode::UNAUTHORIZED, "unknown user"));
        }
        Err(err) => {
            log::error!("user lookup failed: {err}");
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "user lookup failed",
            ));
        }
    };

    let id = user.get("id").and_then(Value::as_i64).unwrap_or_default();
    let group_owner = user
        .get("groupOwner")
        .and_then(Value::as_i64)
        .unwrap_or_default();

    let roles: Vec<Role> = user
        .get("roles")
        .cloned()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .unwrap_or_default();

    let mut group_filter = Entity::new();
    group_filter.insert("user".to_string(), Value::from(id));

    let groups = match state.store.find(GROUP_USER_SCHEMA, &group_filter, &[]).await {
        Ok(rows) => rows
            .iter()
            .filter_map(|row| row.get("group").and_then(Value::as_i64))
            .collect(),
        Err(err) => {
            log::error!("group lookup failed: {err}");
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "group lookup failed",
            ));
        }
    };

    let principal = Principal {
        id,
        name: name.to_string(),
        group_owner,
        groups,
        roles,
    };

    Ok((principal, user))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let (principal, user) = match build_principal(&state, &request.user).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let stored_password = user.get("password").and_then(Value::as_str).unwrap_or("");

    if stored_password.is_empty() || stored_password != request.password {
        return error_response(StatusCode::UNAUTHORIZED, "invalid credentials");
    }

    let jwt_header = match token::issue(&principal, &state.jwt_secret) {
        Ok(token) => token,
        Err(err) => {
            log::error!("token issue failed: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "token issue failed");
        }
    };

    let openapi = serde_json::to_value(state.document.as_ref()).unwrap_or(Value::Null);
    let roles = principal.roles.clone();

    Json(LoginResponse {
        jwt_header,
        token_payload: principal,
        openapi,
        roles,
    })
    .into_response()
}

/// Resolve the caller from the request headers: a bearer JWT, or a
/// configured API key mapped to a stored user.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, Response> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let Some(token) = value.strip_prefix("Bearer ") else {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "malformed authorization header",
            ));
        };

        return token::verify(token, &state.jwt_secret)
            .map_err(|_| error_response(StatusCode::UNAUTHORIZED, "invalid token"));
    }

    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        let Some(user_name) = state.api_keys.get(key) else {
            return Err(error_response(StatusCode::UNAUTHORIZED, "unknown api key"));
        };

        let (principal, _) = build_principal(state, user_name).await?;
        return Ok(principal);
    }

    Err(error_response(StatusCode::UNAUTHORIZED, "missing credentials"))
}

/// Generic entry point for every entity route under the API base path.
pub async fn serve_entity(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    let principal = match authenticate(&state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };

    let body = match body {
        None => None,
        Some(Json(Value::Object(map))) => Some(map),
        Some(_) => {
            return error_response(StatusCode::BAD_REQUEST, "request body must be a JSON object")
        }
    };

    let mut params = Entity::new();
    for (name, value) in query {
        params.insert(name, Value::String(value));
    }

    let request = DispatchRequest {
        path: format!("/{}", path.trim_start_matches('/')),
        method: method.as_str().to_lowercase(),
        params,
        body,
        principal,
    };

    match state.dispatcher.dispatch(request).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => {
            let status =
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

            if status.is_server_error() {
                log::error!("dispatch failed: {err}");
            }

            error_response(status, err.to_string())
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    match state.store.connect().await {
        Ok(()) => Json(json!({"status": "healthy"})).into_response(),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("storage unavailable: {err}"),
        ),
    }
}
