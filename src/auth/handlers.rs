use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, ProvisionUserRequest, PublicUser, RefreshRequest,
            RegisterRequest,
        },
        repo::{Role, User},
        services::{hash_password, is_valid_email, verify_password, AuthUser, JwtKeys},
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/users", post(provision_user))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn public(user: &User) -> PublicUser {
    PublicUser {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role,
    }
}

/// Unwrap a user lookup: absent user is a 401, a failed query is a 500.
fn require_user(result: anyhow::Result<Option<User>>) -> Result<User, (StatusCode, String)> {
    match result {
        Ok(Some(u)) => Ok(u),
        Ok(None) => Err((StatusCode::UNAUTHORIZED, "User not found".into())),
        Err(e) => {
            error!(error = %e, "user lookup failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn token_pair(
    state: &AppState,
    user: &User,
) -> Result<(String, String), (StatusCode, String)> {
    let keys = JwtKeys::from_ref(state);
    let access = keys.sign_access(user.id, user.role).map_err(|e| {
        error!(error = %e, "jwt sign access failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    let refresh = keys.sign_refresh(user.id, user.role).map_err(|e| {
        error!(error = %e, "jwt sign refresh failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok((access, refresh))
}

async fn create_user(
    state: &AppState,
    username: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<User, (StatusCode, String)> {
    let username = username.trim();
    let email = email.trim().to_lowercase();

    if username.is_empty() {
        warn!("empty username");
        return Err((StatusCode::BAD_REQUEST, "Username is required".into()));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    if password.len() < 8 {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    if let Ok(Some(_)) = User::find_by_username(&state.db, username).await {
        warn!(username = %username, "username already taken");
        return Err((StatusCode::CONFLICT, "Username already taken".into()));
    }
    if let Ok(Some(_)) = User::find_by_email(&state.db, &email).await {
        warn!(email = %email, "email already registered");
        return Err((StatusCode::CONFLICT, "Email already registered".into()));
    }

    let hash = match hash_password(password) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "hash_password failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    match User::create(&state.db, username, &email, &hash, role).await {
        Ok(u) => Ok(u),
        Err(e) => {
            error!(error = %e, "create user failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Self-service signup. Always lands in the viewer role; only an admin can
/// hand out anything broader.
#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let user = create_user(
        &state,
        &payload.username,
        &payload.email,
        &payload.password,
        Role::Viewer,
    )
    .await?;

    let (access_token, refresh_token) = token_pair(&state, &user)?;
    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: public(&user),
    }))
}

/// Admin-only provisioning with an explicit role.
#[instrument(skip(state, payload))]
pub async fn provision_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ProvisionUserRequest>,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    if !auth.role.is_admin() {
        warn!(user_id = %auth.id, "non-admin attempted user provisioning");
        return Err((
            StatusCode::FORBIDDEN,
            "Only admins can provision users".into(),
        ));
    }

    let user = create_user(
        &state,
        &payload.username,
        &payload.email,
        &payload.password,
        payload.role,
    )
    .await?;

    info!(user_id = %user.id, role = ?user.role, "user provisioned");
    Ok((StatusCode::CREATED, Json(public(&user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let username = payload.username.trim();

    let user = match User::find_by_username(&state.db, username).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(username = %username, "login unknown username");
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_username failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let ok = match verify_password(&payload.password, &user.password_hash) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "verify_password failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    if !ok {
        warn!(username = %username, user_id = %user.id, "login invalid password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }

    let (access_token, refresh_token) = token_pair(&state, &user)?;
    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: public(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| (StatusCode::UNAUTHORIZED, format!("{}", e)))?;

    // Reload the user so a role change invalidates the old claim.
    let user = require_user(User::find_by_id(&state.db, claims.sub).await)?;

    let (access_token, refresh_token) = token_pair(&state, &user)?;
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: public(&user),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = require_user(User::find_by_id(&state.db, auth.id).await)?;

    Ok(Json(public(&user)))
}

#[cfg(test)]
mod lookup_tests {
    use super::*;
    use time::OffsetDateTime;

    fn sample_user() -> User {
        User {
            id: uuid::Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "hash".into(),
            role: Role::Editor,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn found_user_passes_through() {
        let user = sample_user();
        let id = user.id;
        let out = require_user(Ok(Some(user))).expect("user should pass through");
        assert_eq!(out.id, id);
    }

    #[test]
    fn missing_user_is_unauthorized() {
        let (status, _) = require_user(Ok(None)).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn query_failure_is_a_server_error_not_unauthorized() {
        let (status, msg) = require_user(Err(anyhow::anyhow!("connection refused"))).unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(msg.contains("connection refused"));
    }
}

#[cfg(test)]
mod me_tests {
    use super::*;

    #[test]
    fn test_public_user_serialization() {
        let response = PublicUser {
            id: uuid::Uuid::new_v4(),
            username: "tester".to_string(),
            email: "test@example.com".to_string(),
            role: Role::Viewer,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(json.contains("\"viewer\""));
    }
}
