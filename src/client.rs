use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use again::RetryPolicy;
use async_trait::async_trait;
use log::debug;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use yup_oauth2::authenticator::DefaultAuthenticator;

use crate::error::LoadError;
use crate::job::{JobHandle, JobService};
use crate::settings::{ClientConfig, CredentialsSource};
use crate::storage::{ObjectInfo, ObjectLister, StorageLocation};
use crate::structs;
use crate::structs::objects::{ApiErrorResponse, Objects};

const BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const STORAGE_URL: &str = "https://storage.googleapis.com/storage/v1";
const SCOPES: &[&str; 2] = &[
    "https://www.googleapis.com/auth/bigquery",
    "https://www.googleapis.com/auth/devstorage.read_only",
];
const WELL_KNOWN_CREDENTIALS: &str = ".config/gcloud/application_default_credentials.json";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

enum TokenSource {
    Authenticator(DefaultAuthenticator),
    Static(String),
}

struct InnerClient {
    token_source: TokenSource,
    reqwest_client: reqwest::Client,
    bigquery_url: String,
    storage_url: String,
    default_retries: usize,
}

/// REST client for the BigQuery jobs api and the Cloud Storage objects api.
#[derive(Clone)]
pub struct Client {
    inner_client: Arc<InnerClient>,
}

impl Client {
    pub async fn new(config: &ClientConfig) -> Result<Self, LoadError> {
        let token_source = match &config.credentials {
            CredentialsSource::Token { token } => TokenSource::Static(token.clone()),
            CredentialsSource::AuthorizedUser { path } => {
                TokenSource::Authenticator(authorized_user(path).await?)
            }
            CredentialsSource::ServiceAccount { path } => {
                TokenSource::Authenticator(service_account(path).await?)
            }
            CredentialsSource::ApplicationDefault => {
                TokenSource::Authenticator(application_default().await?)
            }
        };
        let reqwest_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Client {
            inner_client: Arc::new(InnerClient {
                token_source,
                reqwest_client,
                bigquery_url: trim_base(config.bigquery_endpoint.as_deref(), BIGQUERY_URL),
                storage_url: trim_base(config.storage_endpoint.as_deref(), STORAGE_URL),
                default_retries: config.default_retries,
            }),
        })
    }

    async fn bearer_token(&self) -> Result<String, LoadError> {
        match &self.inner_client.token_source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Authenticator(authenticator) => {
                let tok = authenticator.token(SCOPES).await?;
                Ok(tok.as_str().to_owned())
            }
        }
    }

    /// Sends the request built by `build`, retrying transient failures with
    /// exponential backoff up to `retries` extra times.
    async fn call<T, F>(&self, build: F, retries: usize) -> Result<T, LoadError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let build = &build;
        RetryPolicy::exponential(RETRY_BASE_DELAY)
            .with_max_retries(retries)
            .with_jitter(true)
            .retry_if(move || self.call_once(build), |err: &LoadError| {
                let transient = err.is_transient();
                if transient {
                    debug!("Retrying after transient error: {}", err);
                }
                transient
            })
            .await
    }

    async fn call_once<T, F>(&self, build: &F) -> Result<T, LoadError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let tok = self.bearer_token().await?;
        let res = build(&self.inner_client.reqwest_client)
            .bearer_auth(tok)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|err| LoadError::MalformedResponse(format!("{err} in body: {body}")))
    }

    fn jobs_url(&self, project_id: &str) -> String {
        format!(
            "{base}/projects/{project_id}/jobs",
            base = self.inner_client.bigquery_url,
            project_id = project_id
        )
    }

    fn objects_url(&self, bucket: &str) -> String {
        format!(
            "{base}/b/{bucket}/o",
            base = self.inner_client.storage_url,
            bucket = bucket
        )
    }
}

#[async_trait]
impl JobService for Client {
    async fn insert_job(
        &self,
        project_id: &str,
        job: &structs::job::Job,
        retries: usize,
    ) -> Result<structs::job::Job, LoadError> {
        let api_url = self.jobs_url(project_id);
        self.call(|http| json_request(http, Method::POST, &api_url, job), retries)
            .await
    }

    async fn get_job(&self, handle: &JobHandle) -> Result<structs::job::Job, LoadError> {
        let api_url = format!("{}/{}", self.jobs_url(&handle.project_id), handle.job_id);
        let location = handle.location.clone();
        self.call(
            |http| {
                let req = http.get(&api_url);
                match &location {
                    Some(location) => req.query(&[("location", location)]),
                    None => req,
                }
            },
            self.inner_client.default_retries,
        )
        .await
    }
}

#[async_trait]
impl ObjectLister for Client {
    async fn list_objects(&self, location: &StorageLocation) -> Result<Vec<ObjectInfo>, LoadError> {
        let api_url = self.objects_url(&location.bucket);
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("prefix", location.prefix.clone()),
                ("fields", "items(name,size),nextPageToken".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let page: Objects = self
                .call(
                    |http| http.get(&api_url).query(&query),
                    self.inner_client.default_retries,
                )
                .await?;
            objects.extend(object_infos(page.items)?);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(objects)
    }
}

fn json_request<B: Serialize>(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: &B,
) -> RequestBuilder {
    http.request(method, url).json(body)
}

fn trim_base(endpoint: Option<&str>, default: &str) -> String {
    endpoint.unwrap_or(default).trim_end_matches('/').to_string()
}

fn object_infos(items: Vec<structs::objects::Object>) -> Result<Vec<ObjectInfo>, LoadError> {
    items
        .into_iter()
        .map(|item| {
            let size = match &item.size {
                Some(size) => size.parse().map_err(|_| {
                    LoadError::MalformedResponse(format!(
                        "object {} has non-numeric size {:?}",
                        item.name, size
                    ))
                })?,
                None => 0,
            };
            Ok(ObjectInfo {
                name: item.name,
                size,
            })
        })
        .collect()
}

fn api_error(status: u16, body: &str) -> LoadError {
    let message = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ => body.to_string(),
    };
    LoadError::Api { status, message }
}

async fn authorized_user(path: &Path) -> Result<DefaultAuthenticator, LoadError> {
    let secret = yup_oauth2::read_authorized_user_secret(path)
        .await
        .map_err(|source| credentials_error(path, source))?;
    yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
        .build()
        .await
        .map_err(|source| credentials_error(path, source))
}

async fn service_account(path: &Path) -> Result<DefaultAuthenticator, LoadError> {
    let key = yup_oauth2::read_service_account_key(path)
        .await
        .map_err(|source| credentials_error(path, source))?;
    yup_oauth2::ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .map_err(|source| credentials_error(path, source))
}

async fn application_default() -> Result<DefaultAuthenticator, LoadError> {
    let path = match std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                LoadError::Config("HOME is not set, cannot locate gcloud credentials".into())
            })?;
            PathBuf::from(home).join(WELL_KNOWN_CREDENTIALS)
        }
    };
    debug!("Using application default credentials from {}", path.display());
    let contents = tokio::fs::read(&path)
        .await
        .map_err(|source| credentials_error(&path, source))?;
    match credentials_type(&contents).as_deref() {
        Some("service_account") => service_account(&path).await,
        Some("authorized_user") => authorized_user(&path).await,
        other => Err(LoadError::Config(format!(
            "unsupported credentials type {:?} in {}",
            other,
            path.display()
        ))),
    }
}

fn credentials_type(contents: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(contents).ok()?;
    value.get("type")?.as_str().map(str::to_owned)
}

fn credentials_error(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Credentials {
        path: path.to_path_buf(),
        source,
    }
}
