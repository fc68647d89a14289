use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{accounts::repo::CustomerAccount, auth::services::AuthUser, state::AppState};

use super::dto::{
    AccountName, CreateAccountRequest, CreatedAccountResponse, RevealRequest, RevealResponse,
};

/// The lookup pages are deliberately unauthenticated; each record is gated
/// by its own access code instead. Creation stays admin-only.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route("/accounts/:id", post(reveal_account))
}

/// GET /accounts — customer names only.
#[instrument(skip(state))]
pub async fn list_accounts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AccountName>>, (StatusCode, String)> {
    let rows = CustomerAccount::list(&state.db).await.map_err(|e| {
        error!(error = %e, "list accounts failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(
        rows.into_iter()
            .map(|(id, name)| AccountName { id, name })
            .collect(),
    ))
}

/// POST /accounts/:id — reveal the spreadsheet URL on an exact code match.
/// Any mismatch gets the same generic message.
#[instrument(skip(state, body))]
pub async fn reveal_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RevealRequest>,
) -> Result<Json<RevealResponse>, (StatusCode, String)> {
    let account = CustomerAccount::find_by_id(&state.db, id)
        .await
        .map_err(|e| {
            error!(error = %e, %id, "find account failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
        .ok_or((StatusCode::NOT_FOUND, "Account not found".to_string()))?;

    if !account.access_code_matches(&body.access_code) {
        warn!(account_id = %id, "invalid access code attempt");
        return Err((StatusCode::FORBIDDEN, "Invalid access code".to_string()));
    }

    Ok(Json(RevealResponse {
        name: account.name,
        finance_sheet_url: account.finance_sheet_url,
    }))
}

/// POST /accounts (authenticated) — admin-only provisioning.
#[instrument(skip(state, auth, body))]
pub async fn create_account(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreatedAccountResponse>), (StatusCode, String)> {
    if !auth.role.is_admin() {
        warn!(user_id = %auth.id, "non-admin attempted account provisioning");
        return Err((
            StatusCode::FORBIDDEN,
            "Only admins can create customer accounts".into(),
        ));
    }

    let name = body.name.trim();
    let access_code = body.access_code.trim();
    if name.is_empty() || access_code.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Name and access code are required".into(),
        ));
    }

    let account = CustomerAccount::create(&state.db, name, access_code, &body.finance_sheet_url)
        .await
        .map_err(|e| {
            error!(error = %e, "create account failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    info!(account_id = %account.id, name = %account.name, "customer account created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedAccountResponse {
            id: account.id,
            name: account.name,
        }),
    ))
}
