use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use log::debug;
use serde::Deserialize;

use crate::error::LoadError;
use crate::job::DEFAULT_RETRIES;

/// Where the bearer token for google apis comes from.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsSource {
    /// `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud well-known file
    #[default]
    ApplicationDefault,
    AuthorizedUser {
        path: PathBuf,
    },
    ServiceAccount {
        path: PathBuf,
    },
    /// A pre-fetched access token, e.g. from `gcloud auth print-access-token`
    Token {
        token: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub credentials: CredentialsSource,
    #[serde(default = "default_retries")]
    pub default_retries: usize,
    #[serde(default)]
    pub bigquery_endpoint: Option<String>,
    #[serde(default)]
    pub storage_endpoint: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_retries() -> usize {
    DEFAULT_RETRIES
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            credentials: CredentialsSource::default(),
            default_retries: default_retries(),
            bigquery_endpoint: None,
            storage_endpoint: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// Layers `bq_load.*` in the working directory, then `file` if given,
    /// then `BQ_LOAD__*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, LoadError> {
        let mut builder = Config::builder().add_source(File::with_name("bq_load").required(false));
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }
        let settings: ClientConfig = builder
            .add_source(
                Environment::with_prefix("BQ_LOAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        debug!("Loaded settings. {:#?}", settings.redacted());

        Ok(settings)
    }

    // Static tokens must not end up in logs
    fn redacted(&self) -> ClientConfig {
        let mut copy = self.clone();
        if let CredentialsSource::Token { token } = &mut copy.credentials {
            *token = "<redacted>".into();
        }
        copy
    }
}
