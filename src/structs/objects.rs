use serde::{Deserialize, Serialize};

// https://cloud.google.com/storage/docs/json_api/v1/objects/list
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objects {
    #[serde(default)]
    pub items: Vec<Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    pub name: String,
    // uint64 fields come back as JSON strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

// Error body shared by the BigQuery and Storage JSON apis
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}
