use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::services::AuthUser,
    shipments::repo::{FileType, Shipment, ShipmentFile},
    state::AppState,
};

use super::dto::{
    CreatedShipmentResponse, DashboardResponse, FileLink, SearchParams, ShipmentDetails,
    ShipmentSummary, UpdateStatusRequest, ValidationErrorBody,
};
use super::services::{
    create_shipment_with_files, file_type_for_field, midnight_utc, month_start, report_csv,
    validate_shipment_form, week_start, CreateShipmentError, UploadedDocument,
};

const PRESIGN_TTL_SECS: u64 = 30 * 60;
const DASHBOARD_RECENT_LIMIT: i64 = 10;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard))
        .route("/search", get(search_shipments))
        .route("/shipments/:id", get(get_shipment))
        .route("/report/csv", get(export_csv))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/shipments", post(create_shipment))
        .route("/shipments/:id/status", post(update_status))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB of documents
}

// --- handlers ---

/// GET / — weekly and monthly weight totals plus the newest shipments.
#[instrument(skip(state, _auth))]
pub async fn dashboard(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<DashboardResponse>, (StatusCode, String)> {
    let today = OffsetDateTime::now_utc().date();

    let weekly_total_kg = Shipment::total_kg_since(&state.db, midnight_utc(week_start(today)))
        .await
        .map_err(internal)?;
    let monthly_total_kg = Shipment::total_kg_since(&state.db, midnight_utc(month_start(today)))
        .await
        .map_err(internal)?;
    let recent = Shipment::list_recent(&state.db, DASHBOARD_RECENT_LIMIT)
        .await
        .map_err(internal)?;

    Ok(Json(DashboardResponse {
        weekly_total_kg,
        monthly_total_kg,
        recent_shipments: recent.into_iter().map(ShipmentSummary::from).collect(),
    }))
}

/// POST /shipments (multipart): form fields plus repeatable file inputs
/// receipt_files / packing_list_files / awb_files.
#[instrument(skip(state, auth, mp))]
pub async fn create_shipment(
    State(state): State<AppState>,
    auth: AuthUser,
    mut mp: Multipart,
) -> Result<(StatusCode, HeaderMap, Json<CreatedShipmentResponse>), Response> {
    if !auth.role.can_edit() {
        warn!(user_id = %auth.id, role = ?auth.role, "create shipment denied");
        return Err((
            StatusCode::FORBIDDEN,
            "You do not have permission to add shipments".to_string(),
        )
            .into_response());
    }

    let mut so_number: Option<String> = None;
    let mut lc_number: Option<String> = None;
    let mut total_ctn: Option<String> = None;
    let mut total_kg: Option<String> = None;
    let mut documents: Vec<UploadedDocument> = Vec::new();

    while let Ok(Some(field)) = mp.next_field().await {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        if let Some(file_type) = file_type_for_field(&name) {
            // An input with no file selected arrives with an empty filename;
            // skip it rather than error.
            let filename = field.file_name().unwrap_or_default().to_string();
            if filename.is_empty() {
                continue;
            }
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field
                .bytes()
                .await
                .map_err(|e| internal(e).into_response())?;
            documents.push(UploadedDocument {
                file_type,
                filename,
                content_type,
                body,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| internal(e).into_response())?;
            match name.as_str() {
                "so_number" => so_number = Some(value),
                "lc_number" => lc_number = Some(value),
                "total_ctn" => total_ctn = Some(value),
                "total_kg" => total_kg = Some(value),
                _ => {}
            }
        }
    }

    let draft = validate_shipment_form(
        so_number.as_deref(),
        lc_number.as_deref(),
        total_ctn.as_deref(),
        total_kg.as_deref(),
    )
    .map_err(validation_response)?;

    let (shipment, file_ids) = create_shipment_with_files(&state, auth.id, draft, documents)
        .await
        .map_err(|e| match e {
            CreateShipmentError::Validation(errors) => validation_response(errors),
            CreateShipmentError::Other(e) => {
                error!(error = %e, "create shipment failed");
                internal(e).into_response()
            }
        })?;

    let mut headers = HeaderMap::new();
    if let Ok(loc) = format!("/shipments/{}", shipment.id).parse() {
        headers.insert(axum::http::header::LOCATION, loc);
    }

    Ok((
        StatusCode::CREATED,
        headers,
        Json(CreatedShipmentResponse {
            id: shipment.id,
            so_number: shipment.so_number,
            created_at: shipment.created_at,
            file_ids,
        }),
    ))
}

/// GET /search?q= — substring match across all shipment fields.
#[instrument(skip(state, _auth))]
pub async fn search_shipments(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ShipmentSummary>>, (StatusCode, String)> {
    let query = params.q.trim();
    if query.is_empty() {
        // An empty query lists nothing, not everything.
        return Ok(Json(Vec::new()));
    }

    let shipments = Shipment::search(&state.db, query).await.map_err(internal)?;
    Ok(Json(
        shipments.into_iter().map(ShipmentSummary::from).collect(),
    ))
}

/// GET /shipments/:id — full detail with documents grouped by type.
#[instrument(skip(state, auth))]
pub async fn get_shipment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ShipmentDetails>, (StatusCode, String)> {
    let shipment = Shipment::find_by_id(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Shipment not found".to_string()))?;

    let files = ShipmentFile::list_by_shipment(&state.db, id)
        .await
        .map_err(internal)?;

    let mut receipt_files = Vec::new();
    let mut packing_files = Vec::new();
    let mut awb_files = Vec::new();
    for f in files {
        let url = state
            .storage
            .presign_get(&f.s3_key, PRESIGN_TTL_SECS)
            .await
            .map_err(internal)?;
        let link = FileLink { id: f.id, url };
        match f.file_type {
            FileType::Receipt => receipt_files.push(link),
            FileType::Packing => packing_files.push(link),
            FileType::Awb => awb_files.push(link),
        }
    }

    Ok(Json(ShipmentDetails {
        shipment: ShipmentSummary::from(shipment),
        can_edit: auth.role.can_edit(),
        receipt_files,
        packing_files,
        awb_files,
    }))
}

/// POST /shipments/:id/status — plain overwrite, no history kept.
#[instrument(skip(state, auth))]
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<ShipmentSummary>, (StatusCode, String)> {
    if !auth.role.can_edit() {
        warn!(user_id = %auth.id, role = ?auth.role, %id, "status change denied");
        return Err((
            StatusCode::FORBIDDEN,
            "You do not have permission to change the status".to_string(),
        ));
    }

    let updated = Shipment::update_status(&state.db, id, body.status)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Shipment not found".to_string()))?;

    Ok(Json(ShipmentSummary::from(updated)))
}

/// GET /report/csv — admin-only full export as an attachment.
#[instrument(skip(state, auth))]
pub async fn export_csv(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !auth.role.is_admin() {
        warn!(user_id = %auth.id, role = ?auth.role, "csv export denied");
        return Err((
            StatusCode::FORBIDDEN,
            "Only admins can download the report".to_string(),
        ));
    }

    let rows = Shipment::list_report_rows(&state.db)
        .await
        .map_err(internal)?;
    let csv = report_csv(&rows);

    Ok((
        StatusCode::OK,
        [
            ("Content-Type", "text/csv"),
            (
                "Content-Disposition",
                "attachment; filename=\"shipment_report.csv\"",
            ),
        ],
        csv,
    ))
}

fn validation_response(errors: super::services::FieldErrors) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ValidationErrorBody { errors }),
    )
        .into_response()
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
