use crate::structs::table_reference::TableReference;
use crate::structs::table_schema::TableSchema;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    #[default]
    #[value(alias = "CSV")]
    Csv,
    #[value(alias = "NEWLINE_DELIMITED_JSON")]
    NewlineDelimitedJson,
}

// What happens when the destination table already holds data
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    #[default]
    #[value(alias = "WRITE_EMPTY")]
    WriteEmpty,
    #[value(alias = "WRITE_APPEND")]
    WriteAppend,
    #[value(alias = "WRITE_TRUNCATE")]
    WriteTruncate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateDisposition {
    #[default]
    #[value(alias = "CREATE_IF_NEEDED")]
    CreateIfNeeded,
    #[value(alias = "CREATE_NEVER")]
    CreateNever,
}

// https://cloud.google.com/bigquery/docs/reference/rest/v2/Job#JobConfigurationLoad
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigurationLoad {
    pub source_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_format: Option<SourceFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    pub destination_table: TableReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_disposition: Option<CreateDisposition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_disposition: Option<WriteDisposition>,
    // Extra values not in the schema are dropped instead of failing the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_unknown_values: Option<bool>,
}
