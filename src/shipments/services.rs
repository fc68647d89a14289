use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Context;
use bytes::Bytes;
use thiserror::Error;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::repo::{FileType, ReportRow, Shipment, ShipmentFile};
use crate::state::AppState;

/// Field name → message, rendered next to the offending form field.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Debug, Error)]
pub enum CreateShipmentError {
    #[error("shipment form validation failed")]
    Validation(FieldErrors),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Validated shipment form values, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentDraft {
    pub so_number: String,
    pub lc_number: Option<String>,
    pub total_ctn: i32,
    pub total_kg: f64,
}

/// One uploaded document pulled out of the multipart body.
pub struct UploadedDocument {
    pub file_type: FileType,
    pub filename: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Maps a multipart field name to the document type it carries.
/// Unknown field names are ignored by the caller.
pub fn file_type_for_field(field: &str) -> Option<FileType> {
    match field {
        "receipt_files" => Some(FileType::Receipt),
        "packing_list_files" => Some(FileType::Packing),
        "awb_files" => Some(FileType::Awb),
        _ => None,
    }
}

/// Check the raw form fields. All errors are collected so the client can
/// show them per-field in one round trip.
pub fn validate_shipment_form(
    so_number: Option<&str>,
    lc_number: Option<&str>,
    total_ctn: Option<&str>,
    total_kg: Option<&str>,
) -> Result<ShipmentDraft, FieldErrors> {
    let mut errors = FieldErrors::new();

    let so_number = so_number.map(str::trim).unwrap_or_default();
    if so_number.is_empty() {
        errors.insert("so_number", "S/O number is required".into());
    }

    let lc_number = lc_number
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    let total_ctn = match total_ctn.map(str::trim).unwrap_or_default().parse::<i32>() {
        Ok(n) => n,
        Err(_) => {
            errors.insert("total_ctn", "Total CTN must be a whole number".into());
            0
        }
    };

    let total_kg = match total_kg.map(str::trim).unwrap_or_default().parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => {
            errors.insert("total_kg", "Total KG must be a number".into());
            0.0
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ShipmentDraft {
        so_number: so_number.to_owned(),
        lc_number,
        total_ctn,
        total_kg,
    })
}

fn duplicate_so_errors() -> FieldErrors {
    let mut errors = FieldErrors::new();
    errors.insert("so_number", "A shipment with this S/O number already exists".into());
    errors
}

/// One uploaded object whose row may not have landed yet.
struct StoredDocument {
    id: Uuid,
    file_type: FileType,
    key: String,
}

/// Best-effort removal of uploaded objects whose rows never landed.
async fn remove_stored(st: &AppState, stored: &[StoredDocument]) {
    for s in stored {
        if let Err(e) = st.storage.delete_document(&s.key).await {
            warn!(error = %e, key = %s.key, "failed to remove orphaned document");
        }
    }
}

/// Persist the shipment, then upload and record its documents.
///
/// The shipment row is committed before any file work starts, so a failure
/// during upload or linking leaves a shipment with fewer files than
/// submitted; the already-uploaded objects are removed so storage holds no
/// unreferenced documents. The file rows themselves go in one transaction.
pub async fn create_shipment_with_files(
    st: &AppState,
    created_by: Uuid,
    draft: ShipmentDraft,
    documents: Vec<UploadedDocument>,
) -> Result<(Shipment, Vec<Uuid>), CreateShipmentError> {
    if Shipment::so_number_exists(&st.db, &draft.so_number)
        .await
        .context("check so_number uniqueness")?
    {
        return Err(CreateShipmentError::Validation(duplicate_so_errors()));
    }

    let shipment = match Shipment::insert(
        &st.db,
        &draft.so_number,
        draft.lc_number.as_deref(),
        draft.total_ctn,
        draft.total_kg,
        created_by,
    )
    .await
    {
        Ok(s) => s,
        // Concurrent insert can still trip the unique constraint.
        Err(e) if is_unique_violation(&e) => {
            return Err(CreateShipmentError::Validation(duplicate_so_errors()))
        }
        Err(e) => return Err(anyhow::Error::new(e).context("insert shipment").into()),
    };

    let mut stored: Vec<StoredDocument> = Vec::with_capacity(documents.len());
    for doc in documents {
        let id = Uuid::new_v4();
        let key = format!(
            "shipment_files/{}/{}/{}-{}",
            shipment.id,
            doc.file_type.as_str(),
            id,
            doc.filename
        );
        if let Err(e) = st
            .storage
            .put_document(&key, doc.body, &doc.content_type)
            .await
        {
            remove_stored(st, &stored).await;
            return Err(CreateShipmentError::Other(
                e.context(format!("put_document {}", key)),
            ));
        }
        stored.push(StoredDocument {
            id,
            file_type: doc.file_type,
            key,
        });
    }

    let linked: anyhow::Result<()> = async {
        let mut tx = st.db.begin().await.context("begin tx")?;
        for s in &stored {
            ShipmentFile::insert_tx(&mut tx, s.id, shipment.id, s.file_type, &s.key).await?;
        }
        tx.commit().await.context("commit tx")?;
        Ok(())
    }
    .await;
    if let Err(e) = linked {
        remove_stored(st, &stored).await;
        return Err(e.into());
    }

    info!(
        shipment_id = %shipment.id,
        so_number = %shipment.so_number,
        files = stored.len(),
        "shipment created"
    );
    Ok((shipment, stored.into_iter().map(|s| s.id).collect()))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e.as_database_error().map(|d| d.is_unique_violation()),
        Some(true)
    )
}

/// Monday 00:00 of the week containing `today`.
pub fn week_start(today: Date) -> Date {
    let back = today.weekday().number_days_from_monday();
    today - time::Duration::days(i64::from(back))
}

/// Day 1 of the month containing `today`.
pub fn month_start(today: Date) -> Date {
    // replace_day(1) cannot fail: every month has a day 1
    today.replace_day(1).unwrap_or(today)
}

/// A calendar date as a UTC midnight boundary for created_at comparisons.
pub fn midnight_utc(date: Date) -> OffsetDateTime {
    date.midnight().assume_utc()
}

/// RFC 4180 quoting: wrap a field containing a delimiter, quote or line
/// break, doubling any quotes inside. Safe fields pass through unchanged.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains(['"', ',', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Render every shipment as the admin CSV report. The free-text columns
/// (S/O, LC, creator) are quoted as needed so one shipment is always one
/// record.
pub fn report_csv(rows: &[ReportRow]) -> String {
    let ts_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let mut csv = String::from("S/O Number,LC Number,Total CTN,Total KG,Status,Created By,Created At\n");
    for row in rows {
        let _ = writeln!(
            csv,
            "{},{},{},{},{},{},{}",
            csv_field(&row.so_number),
            csv_field(row.lc_number.as_deref().unwrap_or("")),
            row.total_ctn,
            row.total_kg,
            row.status.label(),
            csv_field(row.created_by_username.as_deref().unwrap_or("")),
            row.created_at.format(&ts_format).unwrap_or_default(),
        );
    }
    csv
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn accepts_a_complete_form() {
        let draft = validate_shipment_form(Some("SO-100"), Some("LC-7"), Some("25"), Some("310.5"))
            .expect("valid form");
        assert_eq!(draft.so_number, "SO-100");
        assert_eq!(draft.lc_number.as_deref(), Some("LC-7"));
        assert_eq!(draft.total_ctn, 25);
        assert_eq!(draft.total_kg, 310.5);
    }

    #[test]
    fn missing_so_number_is_a_field_error() {
        let errors = validate_shipment_form(None, None, Some("1"), Some("2.0")).unwrap_err();
        assert!(errors.contains_key("so_number"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn blank_lc_number_becomes_none() {
        let draft =
            validate_shipment_form(Some("SO-1"), Some("   "), Some("1"), Some("1")).unwrap();
        assert_eq!(draft.lc_number, None);
    }

    #[test]
    fn non_numeric_fields_are_collected_together() {
        let errors =
            validate_shipment_form(Some("SO-1"), None, Some("two"), Some("heavy")).unwrap_err();
        assert!(errors.contains_key("total_ctn"));
        assert!(errors.contains_key("total_kg"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn carton_count_must_be_whole() {
        let errors =
            validate_shipment_form(Some("SO-1"), None, Some("2.5"), Some("1.0")).unwrap_err();
        assert!(errors.contains_key("total_ctn"));
    }
}

#[cfg(test)]
mod boundary_tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn week_start_is_monday() {
        // 2024-03-14 was a Thursday
        assert_eq!(week_start(date!(2024 - 03 - 14)), date!(2024 - 03 - 11));
        // Monday maps to itself
        assert_eq!(week_start(date!(2024 - 03 - 11)), date!(2024 - 03 - 11));
        // Sunday belongs to the week that started six days earlier
        assert_eq!(week_start(date!(2024 - 03 - 17)), date!(2024 - 03 - 11));
    }

    #[test]
    fn week_start_crosses_month_boundary() {
        // 2024-03-01 was a Friday; its week began in February
        assert_eq!(week_start(date!(2024 - 03 - 01)), date!(2024 - 02 - 26));
    }

    #[test]
    fn month_start_is_day_one() {
        assert_eq!(month_start(date!(2024 - 03 - 14)), date!(2024 - 03 - 01));
        assert_eq!(month_start(date!(2024 - 03 - 01)), date!(2024 - 03 - 01));
    }

    #[test]
    fn midnight_boundary_is_inclusive_start() {
        let boundary = midnight_utc(date!(2024 - 03 - 11));
        assert_eq!(boundary.hour(), 0);
        assert_eq!(boundary.minute(), 0);
        assert_eq!(boundary.offset(), time::UtcOffset::UTC);
    }
}

#[cfg(test)]
mod csv_tests {
    use super::*;
    use crate::shipments::repo::ShipmentStatus;
    use time::macros::datetime;

    fn row(so: &str, lc: Option<&str>, user: Option<&str>) -> ReportRow {
        ReportRow {
            so_number: so.into(),
            lc_number: lc.map(Into::into),
            total_ctn: 12,
            total_kg: 340.5,
            status: ShipmentStatus::Fly,
            created_by_username: user.map(Into::into),
            created_at: datetime!(2024-03-14 09:30:05 UTC),
        }
    }

    #[test]
    fn header_plus_one_line_per_shipment() {
        let rows = vec![row("SO-1", Some("LC-1"), Some("alice")), row("SO-2", None, None)];
        let csv = report_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "S/O Number,LC Number,Total CTN,Total KG,Status,Created By,Created At"
        );
    }

    #[test]
    fn status_column_uses_the_human_label() {
        let csv = report_csv(&[row("SO-1", None, Some("alice"))]);
        assert!(csv.contains(",Fly,"));
        assert!(!csv.contains(",fly,"));
    }

    #[test]
    fn absent_lc_and_creator_render_as_empty_strings() {
        let csv = report_csv(&[row("SO-2", None, None)]);
        assert_eq!(
            csv.lines().nth(1).unwrap(),
            "SO-2,,12,340.5,Fly,,2024-03-14 09:30:05"
        );
    }

    #[test]
    fn comma_in_a_field_does_not_shift_columns() {
        let csv = report_csv(&[row("SO,100", Some("LC-1"), Some("alice"))]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "\"SO,100\",LC-1,12,340.5,Fly,alice,2024-03-14 09:30:05"
        );
    }

    #[test]
    fn newline_in_a_field_stays_inside_one_quoted_record() {
        let csv = report_csv(&[row("SO-1", None, Some("line1\nline2"))]);
        // the break sits inside a quoted field, so parsers see one record
        assert!(csv.contains(",\"line1\nline2\","));
        // exactly one data row follows the header
        assert_eq!(csv.matches("SO-1,").count(), 1);
    }

    #[test]
    fn quotes_inside_a_field_are_doubled() {
        let csv = report_csv(&[row("SO \"rush\" 7", None, None)]);
        assert!(csv
            .lines()
            .nth(1)
            .unwrap()
            .starts_with("\"SO \"\"rush\"\" 7\","));
    }
}

#[cfg(test)]
mod cleanup_tests {
    use super::*;
    use crate::storage::DocumentStore;
    use axum::async_trait;
    use std::sync::{Arc, Mutex};

    struct RecordingStore {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentStore for RecordingStore {
        async fn put_document(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_document(&self, key: &str) -> anyhow::Result<()> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
        async fn presign_get(&self, k: &str, _s: u64) -> anyhow::Result<String> {
            Ok(k.to_string())
        }
    }

    #[tokio::test]
    async fn orphaned_documents_are_removed_from_storage() {
        let recorder = Arc::new(RecordingStore {
            deleted: Mutex::new(Vec::new()),
        });
        let mut state = AppState::fake();
        state.storage = recorder.clone();

        let stored = vec![
            StoredDocument {
                id: Uuid::new_v4(),
                file_type: FileType::Receipt,
                key: "shipment_files/a/receipt/one.pdf".into(),
            },
            StoredDocument {
                id: Uuid::new_v4(),
                file_type: FileType::Awb,
                key: "shipment_files/a/awb/two.pdf".into(),
            },
        ];
        remove_stored(&state, &stored).await;

        let deleted = recorder.deleted.lock().unwrap().clone();
        assert_eq!(
            deleted,
            vec![
                "shipment_files/a/receipt/one.pdf".to_string(),
                "shipment_files/a/awb/two.pdf".to_string(),
            ]
        );
    }
}

#[cfg(test)]
mod file_field_tests {
    use super::*;

    #[test]
    fn known_fields_map_to_their_type() {
        assert_eq!(file_type_for_field("receipt_files"), Some(FileType::Receipt));
        assert_eq!(
            file_type_for_field("packing_list_files"),
            Some(FileType::Packing)
        );
        assert_eq!(file_type_for_field("awb_files"), Some(FileType::Awb));
    }

    #[test]
    fn unknown_fields_are_skipped() {
        assert_eq!(file_type_for_field("so_number"), None);
        assert_eq!(file_type_for_field("files"), None);
    }
}
