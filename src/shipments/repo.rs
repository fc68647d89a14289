use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

/// Where a shipment currently is. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ShipmentStatus {
    Pending,
    Fly,
    Arrived,
}

impl ShipmentStatus {
    pub fn label(self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "Pending",
            ShipmentStatus::Fly => "Fly",
            ShipmentStatus::Arrived => "Arrived",
        }
    }
}

/// Kind of uploaded document attached to a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FileType {
    Receipt,
    Packing,
    Awb,
}

impl FileType {
    pub fn label(self) -> &'static str {
        match self {
            FileType::Receipt => "Receipt Copy",
            FileType::Packing => "Packing List",
            FileType::Awb => "AWB Copy",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Receipt => "receipt",
            FileType::Packing => "packing",
            FileType::Awb => "awb",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Shipment {
    pub id: Uuid,
    pub so_number: String,
    pub lc_number: Option<String>,
    pub total_ctn: i32,
    pub total_kg: f64,
    pub status: ShipmentStatus,
    /// Weak reference: nulled out when the creating user is deleted.
    pub created_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShipmentFile {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub file_type: FileType,
    pub s3_key: String,
    pub created_at: OffsetDateTime,
}

/// One CSV report line, creator resolved to a username where it survives.
#[derive(Debug, Clone, FromRow)]
pub struct ReportRow {
    pub so_number: String,
    pub lc_number: Option<String>,
    pub total_ctn: i32,
    pub total_kg: f64,
    pub status: ShipmentStatus,
    pub created_by_username: Option<String>,
    pub created_at: OffsetDateTime,
}

const SHIPMENT_COLS: &str = "id, so_number, lc_number, total_ctn, total_kg, status, created_by, created_at";

impl Shipment {
    pub async fn insert(
        db: &PgPool,
        so_number: &str,
        lc_number: Option<&str>,
        total_ctn: i32,
        total_kg: f64,
        created_by: Uuid,
    ) -> Result<Shipment, sqlx::Error> {
        sqlx::query_as::<_, Shipment>(
            r#"
            INSERT INTO shipments (so_number, lc_number, total_ctn, total_kg, status, created_by)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING id, so_number, lc_number, total_ctn, total_kg, status, created_by, created_at
            "#,
        )
        .bind(so_number)
        .bind(lc_number)
        .bind(total_ctn)
        .bind(total_kg)
        .bind(created_by)
        .fetch_one(db)
        .await
    }

    pub async fn so_number_exists(db: &PgPool, so_number: &str) -> anyhow::Result<bool> {
        let exists: (bool,) =
            sqlx::query_as(r#"SELECT EXISTS(SELECT 1 FROM shipments WHERE so_number = $1)"#)
                .bind(so_number)
                .fetch_one(db)
                .await?;
        Ok(exists.0)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, Shipment>(&format!(
            "SELECT {SHIPMENT_COLS} FROM shipments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Newest shipments across all users (dashboard table).
    pub async fn list_recent(db: &PgPool, limit: i64) -> anyhow::Result<Vec<Shipment>> {
        let rows = sqlx::query_as::<_, Shipment>(&format!(
            "SELECT {SHIPMENT_COLS} FROM shipments ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Case-insensitive substring match across every searchable field.
    /// Numeric columns are compared by their textual representation.
    pub async fn search(db: &PgPool, query: &str) -> anyhow::Result<Vec<Shipment>> {
        let pattern = format!("%{}%", query);
        let rows = sqlx::query_as::<_, Shipment>(&format!(
            r#"
            SELECT DISTINCT {SHIPMENT_COLS}
            FROM shipments
            WHERE so_number ILIKE $1
               OR lc_number ILIKE $1
               OR status ILIKE $1
               OR total_ctn::text ILIKE $1
               OR total_kg::text ILIKE $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(pattern)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Sum of total_kg over shipments created on/after the boundary.
    /// An empty window sums to zero, not NULL.
    pub async fn total_kg_since(db: &PgPool, since: OffsetDateTime) -> anyhow::Result<f64> {
        let total: (f64,) = sqlx::query_as(
            r#"SELECT COALESCE(SUM(total_kg), 0) FROM shipments WHERE created_at >= $1"#,
        )
        .bind(since)
        .fetch_one(db)
        .await?;
        Ok(total.0)
    }

    pub async fn update_status(
        db: &PgPool,
        id: Uuid,
        status: ShipmentStatus,
    ) -> anyhow::Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, Shipment>(
            r#"
            UPDATE shipments
            SET status = $2
            WHERE id = $1
            RETURNING id, so_number, lc_number, total_ctn, total_kg, status, created_by, created_at
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Every shipment for the CSV report, newest first, creator resolved.
    pub async fn list_report_rows(db: &PgPool) -> anyhow::Result<Vec<ReportRow>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT s.so_number, s.lc_number, s.total_ctn, s.total_kg, s.status,
                   u.username AS created_by_username, s.created_at
            FROM shipments s
            LEFT JOIN users u ON u.id = s.created_by
            ORDER BY s.created_at DESC
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

impl ShipmentFile {
    /// Insert a file record within a transaction, so one shipment's batch
    /// of document rows lands together.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        shipment_id: Uuid,
        file_type: FileType,
        s3_key: &str,
    ) -> anyhow::Result<()> {
        tx.execute(
            sqlx::query(
                r#"
                INSERT INTO shipment_files (id, shipment_id, file_type, s3_key)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id)
            .bind(shipment_id)
            .bind(file_type)
            .bind(s3_key),
        )
        .await?;
        Ok(())
    }

    pub async fn list_by_shipment(
        db: &PgPool,
        shipment_id: Uuid,
    ) -> anyhow::Result<Vec<ShipmentFile>> {
        let rows = sqlx::query_as::<_, ShipmentFile>(
            r#"
            SELECT id, shipment_id, file_type, s3_key, created_at
            FROM shipment_files
            WHERE shipment_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(shipment_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;

    #[test]
    fn status_labels_are_human_readable() {
        assert_eq!(ShipmentStatus::Pending.label(), "Pending");
        assert_eq!(ShipmentStatus::Fly.label(), "Fly");
        assert_eq!(ShipmentStatus::Arrived.label(), "Arrived");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ShipmentStatus::Arrived).unwrap(),
            "\"arrived\""
        );
        let parsed: ShipmentStatus = serde_json::from_str("\"fly\"").unwrap();
        assert_eq!(parsed, ShipmentStatus::Fly);
    }

    #[test]
    fn file_type_labels() {
        assert_eq!(FileType::Receipt.label(), "Receipt Copy");
        assert_eq!(FileType::Packing.label(), "Packing List");
        assert_eq!(FileType::Awb.label(), "AWB Copy");
        assert_eq!(FileType::Awb.as_str(), "awb");
    }
}
