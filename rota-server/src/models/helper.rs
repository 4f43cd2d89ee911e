use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HELPERS_COLLECTION: &str = "helpers";

/// A volunteer who can be put on the rota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Helper {
    pub id: String,
    pub name: String,
    pub parkrun_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateHelperRequest {
    pub name: String,
    pub parkrun_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateHelperRequest {
    pub name: Option<String>,
    pub parkrun_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}
