use std::path::Path;

use serde::Deserialize;

use crate::error::LoadError;
use crate::structs::table_field_schema::TableFieldSchema;
use crate::structs::table_schema::TableSchema;

// `bq show --schema` writes a bare array, the REST api nests it under "fields"
#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Fields(Vec<TableFieldSchema>),
    Table(TableSchema),
}

pub fn parse_schema(contents: &str) -> Result<Vec<TableFieldSchema>, LoadError> {
    let fields = match serde_json::from_str::<SchemaFile>(contents) {
        Ok(SchemaFile::Fields(fields)) => fields,
        Ok(SchemaFile::Table(table)) => table.fields,
        Err(err) => {
            return Err(LoadError::Config(format!(
                "schema must be a JSON array of fields or an object with \"fields\": {err}"
            )))
        }
    };
    if let Some(pos) = fields.iter().position(|f| f.name.is_empty()) {
        return Err(LoadError::Config(format!(
            "schema field #{} has an empty name",
            pos + 1
        )));
    }
    Ok(fields)
}

pub async fn read_schema(path: &Path) -> Result<Vec<TableFieldSchema>, LoadError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
        LoadError::Config(format!("failed to read schema file {}: {err}", path.display()))
    })?;
    parse_schema(&contents)
}
