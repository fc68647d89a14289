use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// List entry: customer name only, never codes or URLs.
#[derive(Debug, Serialize)]
pub struct AccountName {
    pub id: Uuid,
    pub name: String,
}

/// Body of the unauthenticated reveal request.
#[derive(Debug, Deserialize)]
pub struct RevealRequest {
    pub access_code: String,
}

#[derive(Debug, Serialize)]
pub struct RevealResponse {
    pub name: String,
    pub finance_sheet_url: String,
}

/// Admin provisioning of a customer account.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub access_code: String,
    pub finance_sheet_url: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedAccountResponse {
    pub id: Uuid,
    pub name: String,
}
