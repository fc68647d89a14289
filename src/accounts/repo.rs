use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Customer whose finance spreadsheet is shared behind an access code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CustomerAccount {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub access_code: String,
    #[serde(skip_serializing)]
    pub finance_sheet_url: String,
}

impl CustomerAccount {
    /// Names only, alphabetical. The list page never shows anything
    /// sensitive.
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<(Uuid, String)>> {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as(r#"SELECT id, name FROM customer_accounts ORDER BY name ASC"#)
                .fetch_all(db)
                .await?;
        Ok(rows)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<CustomerAccount>> {
        let row = sqlx::query_as::<_, CustomerAccount>(
            r#"
            SELECT id, name, access_code, finance_sheet_url
            FROM customer_accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        access_code: &str,
        finance_sheet_url: &str,
    ) -> anyhow::Result<CustomerAccount> {
        let row = sqlx::query_as::<_, CustomerAccount>(
            r#"
            INSERT INTO customer_accounts (name, access_code, finance_sheet_url)
            VALUES ($1, $2, $3)
            RETURNING id, name, access_code, finance_sheet_url
            "#,
        )
        .bind(name)
        .bind(access_code)
        .bind(finance_sheet_url)
        .fetch_one(db)
        .await?;
        Ok(row)
    }

    /// Exact, case-sensitive comparison. A mismatch reveals nothing about
    /// how close the candidate was.
    pub fn access_code_matches(&self, candidate: &str) -> bool {
        self.access_code == candidate
    }
}

#[cfg(test)]
mod access_code_tests {
    use super::*;

    fn account(code: &str) -> CustomerAccount {
        CustomerAccount {
            id: Uuid::new_v4(),
            name: "Acme Traders".into(),
            access_code: code.into(),
            finance_sheet_url: "https://sheets.example/acme".into(),
        }
    }

    #[test]
    fn exact_match_succeeds() {
        assert!(account("SECRET-42").access_code_matches("SECRET-42"));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert!(!account("SECRET-42").access_code_matches("secret-42"));
    }

    #[test]
    fn near_misses_fail() {
        let acc = account("SECRET-42");
        assert!(!acc.access_code_matches(""));
        assert!(!acc.access_code_matches("SECRET-4"));
        assert!(!acc.access_code_matches("SECRET-42 "));
    }

    #[test]
    fn sensitive_fields_never_serialize() {
        let json = serde_json::to_string(&account("SECRET-42")).unwrap();
        assert!(!json.contains("SECRET-42"));
        assert!(!json.contains("sheets.example"));
    }
}
