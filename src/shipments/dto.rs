use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{Shipment, ShipmentStatus};
use super::services::FieldErrors;

/// Shipment as shown in lists (dashboard, search results).
#[derive(Debug, Serialize)]
pub struct ShipmentSummary {
    pub id: Uuid,
    pub so_number: String,
    pub lc_number: Option<String>,
    pub total_ctn: i32,
    pub total_kg: f64,
    pub status: ShipmentStatus,
    pub status_label: &'static str,
    pub created_at: OffsetDateTime,
}

impl From<Shipment> for ShipmentSummary {
    fn from(s: Shipment) -> Self {
        Self {
            id: s.id,
            so_number: s.so_number,
            lc_number: s.lc_number,
            total_ctn: s.total_ctn,
            total_kg: s.total_kg,
            status: s.status,
            status_label: s.status.label(),
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub weekly_total_kg: f64,
    pub monthly_total_kg: f64,
    pub recent_shipments: Vec<ShipmentSummary>,
}

/// Presigned link to one uploaded document.
#[derive(Debug, Serialize)]
pub struct FileLink {
    pub id: Uuid,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ShipmentDetails {
    #[serde(flatten)]
    pub shipment: ShipmentSummary,
    pub can_edit: bool,
    pub receipt_files: Vec<FileLink>,
    pub packing_files: Vec<FileLink>,
    pub awb_files: Vec<FileLink>,
}

#[derive(Debug, Serialize)]
pub struct CreatedShipmentResponse {
    pub id: Uuid,
    pub so_number: String,
    pub created_at: OffsetDateTime,
    pub file_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ShipmentStatus,
}

/// 422 body: per-field validation messages.
#[derive(Debug, Serialize)]
pub struct ValidationErrorBody {
    pub errors: FieldErrors,
}
