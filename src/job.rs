use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::error::LoadError;
use crate::structs::error_proto::ErrorProto;
use crate::structs::job::Job;
use crate::structs::job_configuration::JobConfiguration;
use crate::structs::job_configuration_load::{
    CreateDisposition, JobConfigurationLoad, SourceFormat, WriteDisposition,
};
use crate::structs::job_reference::JobReference;
use crate::structs::job_status::{JobStatus, State};
use crate::structs::table_field_schema::TableFieldSchema;
use crate::structs::table_reference::TableReference;
use crate::structs::table_schema::TableSchema;
use crate::wait::WaitBudget;

pub const DEFAULT_RETRIES: usize = 5;

/// Everything needed to build one load job. Built once, then only read.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    destination: TableReference,
    schema: Vec<TableFieldSchema>,
    source_uri: String,
    source_format: SourceFormat,
    write_disposition: WriteDisposition,
    create_disposition: CreateDisposition,
    ignore_unknown_values: bool,
    location: Option<String>,
    retries: usize,
}

impl LoadRequest {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
        schema: Vec<TableFieldSchema>,
        source_uri: impl Into<String>,
    ) -> Self {
        LoadRequest {
            destination: TableReference {
                project_id: project_id.into(),
                dataset_id: dataset_id.into(),
                table_id: table_id.into(),
            },
            schema,
            source_uri: source_uri.into(),
            source_format: SourceFormat::default(),
            write_disposition: WriteDisposition::default(),
            create_disposition: CreateDisposition::default(),
            ignore_unknown_values: true,
            location: None,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn source_format(mut self, format: SourceFormat) -> Self {
        self.source_format = format;
        self
    }

    pub fn write_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.write_disposition = disposition;
        self
    }

    pub fn create_disposition(mut self, disposition: CreateDisposition) -> Self {
        self.create_disposition = disposition;
        self
    }

    pub fn ignore_unknown_values(mut self, ignore: bool) -> Self {
        self.ignore_unknown_values = ignore;
        self
    }

    pub fn location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn destination(&self) -> &TableReference {
        &self.destination
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    /// The `jobs.insert` body for this request under the given job id.
    pub fn to_job(&self, job_id: &str) -> Job {
        Job {
            job_reference: Some(JobReference {
                project_id: Some(self.destination.project_id.clone()),
                job_id: Some(job_id.into()),
                location: self.location.clone(),
            }),
            configuration: Some(JobConfiguration {
                load: Some(JobConfigurationLoad {
                    source_uris: vec![self.source_uri.clone()],
                    source_format: Some(self.source_format),
                    schema: Some(TableSchema {
                        fields: self.schema.clone(),
                    }),
                    destination_table: self.destination.clone(),
                    create_disposition: Some(self.create_disposition),
                    write_disposition: Some(self.write_disposition),
                    ignore_unknown_values: Some(self.ignore_unknown_values),
                }),
            }),
            status: None,
        }
    }
}

/// Identifies a submitted job for status polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub project_id: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(ErrorProto),
}

impl From<&JobStatus> for JobState {
    fn from(status: &JobStatus) -> Self {
        match status.state {
            Some(State::Done) => match &status.error_result {
                Some(err) => JobState::Failed(err.clone()),
                None => JobState::Succeeded,
            },
            Some(State::Running) => JobState::Running,
            Some(State::Pending) | None => JobState::Pending,
        }
    }
}

#[async_trait]
pub trait JobService: Send + Sync {
    /// `jobs.insert`; transient failures are retried up to `retries` times.
    async fn insert_job(&self, project_id: &str, job: &Job, retries: usize) -> Result<Job, LoadError>;
    /// `jobs.get`
    async fn get_job(&self, handle: &JobHandle) -> Result<Job, LoadError>;
}

/// A fresh id for every call, so a retried submission can never be merged
/// with an earlier job that is still in flight.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Submits exactly one load job for `request`.
pub async fn submit_load<S: JobService + ?Sized>(
    service: &S,
    request: &LoadRequest,
) -> Result<JobHandle, LoadError> {
    let job_id = new_job_id();
    let project_id = &request.destination.project_id;
    info!(
        "Submitting load job {} into {}:{}.{} from {}",
        job_id,
        project_id,
        request.destination.dataset_id,
        request.destination.table_id,
        request.source_uri
    );
    let job = match service
        .insert_job(project_id, &request.to_job(&job_id), request.retries)
        .await
    {
        Ok(job) => job,
        // A retried insert whose first attempt reached the service
        Err(LoadError::Api { status: 409, message }) if message.contains(&job_id) => {
            info!("Job {} already exists, polling it: {}", job_id, message);
            return Ok(JobHandle {
                project_id: project_id.clone(),
                job_id,
                location: request.location.clone(),
            });
        }
        Err(LoadError::Api { status, message }) => {
            return Err(LoadError::Submission {
                message: format!("HTTP {status}: {message}"),
            })
        }
        Err(other) => return Err(other),
    };

    if let Some(JobStatus {
        error_result: Some(ErrorProto { message, .. }),
        ..
    }) = &job.status
    {
        return Err(LoadError::Submission {
            message: message.clone(),
        });
    }
    if let Some(JobStatus {
        errors: Some(errors),
        ..
    }) = &job.status
    {
        for error in errors {
            warn!("Got error in job insert request: {}", error.message);
        }
    }

    let reference = job.job_reference.unwrap_or_default();
    Ok(JobHandle {
        project_id: reference.project_id.unwrap_or_else(|| project_id.clone()),
        job_id: reference.job_id.unwrap_or(job_id),
        location: reference.location.or_else(|| request.location.clone()),
    })
}

/// Polls `handle` every `interval` until the job is DONE.
///
/// Returns the number of polls made. A reported `errors` list fails the
/// poll right away, even if the job has not reached DONE yet. There is no
/// attempt cap; `budget` bounds the wait.
pub async fn poll_job<S: JobService + ?Sized>(
    service: &S,
    handle: &JobHandle,
    interval: Duration,
    budget: &WaitBudget,
) -> Result<u32, LoadError> {
    let mut polls = 0;
    loop {
        let job = budget.guard("polling job", service.get_job(handle)).await?;
        polls += 1;
        let status = job.status.unwrap_or_default();

        if let Some(errors) = status.errors.as_ref().filter(|errors| !errors.is_empty()) {
            return Err(LoadError::Job {
                job_id: handle.job_id.clone(),
                payload: serde_json::to_string_pretty(errors)
                    .unwrap_or_else(|_| format!("{errors:?}")),
            });
        }

        match JobState::from(&status) {
            JobState::Succeeded => {
                info!("Job {} complete after {} polls", handle.job_id, polls);
                return Ok(polls);
            }
            JobState::Failed(err) => {
                return Err(LoadError::Job {
                    job_id: handle.job_id.clone(),
                    payload: serde_json::to_string(&err).unwrap_or(err.message),
                });
            }
            state => debug!("Job {} is {:?} (poll {})", handle.job_id, state, polls),
        }

        budget.pause(interval, "polling job").await?;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use tokio_util::sync::CancellationToken;

    use super::*;

    pub(crate) fn status(state: State) -> JobStatus {
        JobStatus {
            state: Some(state),
            ..JobStatus::default()
        }
    }

    pub(crate) fn error(message: &str) -> ErrorProto {
        ErrorProto {
            reason: Some("invalid".into()),
            message: message.into(),
            ..ErrorProto::default()
        }
    }

    /// Echoes inserts back and replays scripted statuses on get; the last
    /// status repeats.
    #[derive(Default)]
    pub(crate) struct ScriptedJobs {
        pub inserted: Mutex<Vec<(Job, usize)>>,
        pub statuses: Mutex<VecDeque<JobStatus>>,
        pub polls: Mutex<u32>,
    }

    impl ScriptedJobs {
        pub(crate) fn new(statuses: Vec<JobStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Self::default()
            }
        }

        pub(crate) fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobService for ScriptedJobs {
        async fn insert_job(&self, _project_id: &str, job: &Job, retries: usize) -> Result<Job, LoadError> {
            self.inserted.lock().unwrap().push((job.clone(), retries));
            let mut echoed = job.clone();
            echoed.status = Some(status(State::Pending));
            Ok(echoed)
        }

        async fn get_job(&self, handle: &JobHandle) -> Result<Job, LoadError> {
            *self.polls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().cloned()
            };
            Ok(Job {
                job_reference: Some(JobReference {
                    project_id: Some(handle.project_id.clone()),
                    job_id: Some(handle.job_id.clone()),
                    location: None,
                }),
                configuration: None,
                status,
            })
        }
    }

    struct RejectingJobs;

    #[async_trait]
    impl JobService for RejectingJobs {
        async fn insert_job(&self, _project_id: &str, _job: &Job, _retries: usize) -> Result<Job, LoadError> {
            Err(LoadError::Api {
                status: 404,
                message: "Not found: Dataset p:d".into(),
            })
        }

        async fn get_job(&self, _handle: &JobHandle) -> Result<Job, LoadError> {
            unreachable!("nothing to poll")
        }
    }

    /// Answers every insert with 409, as the service does when an earlier
    /// attempt of the same insert already created the job.
    struct ConflictingJobs {
        other_id: Option<&'static str>,
    }

    #[async_trait]
    impl JobService for ConflictingJobs {
        async fn insert_job(&self, _project_id: &str, job: &Job, _retries: usize) -> Result<Job, LoadError> {
            let inserted = job
                .job_reference
                .as_ref()
                .and_then(|reference| reference.job_id.clone())
                .unwrap_or_default();
            let id = self.other_id.map(String::from).unwrap_or(inserted);
            Err(LoadError::Api {
                status: 409,
                message: format!("Already Exists: Job p:EU.{id}"),
            })
        }

        async fn get_job(&self, _handle: &JobHandle) -> Result<Job, LoadError> {
            unreachable!("nothing to poll")
        }
    }

    fn handle() -> JobHandle {
        JobHandle {
            project_id: "p".into(),
            job_id: "job-1".into(),
            location: None,
        }
    }

    fn request() -> LoadRequest {
        let schema: Vec<TableFieldSchema> =
            serde_json::from_str(r#"[{"name": "file_name", "type": "STRING", "mode": "REQUIRED"}]"#).unwrap();
        LoadRequest::new("p", "d", "t", schema, "gs://bucket/etl/*.csv")
    }

    #[test]
    fn job_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_job_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn insert_body_matches_api() {
        let job = request()
            .write_disposition(WriteDisposition::WriteAppend)
            .source_format(SourceFormat::NewlineDelimitedJson)
            .to_job("job-1");
        let body = serde_json::to_value(&job).unwrap();
        assert_eq!(body["jobReference"]["jobId"], "job-1");
        assert_eq!(body["jobReference"]["projectId"], "p");
        let load = &body["configuration"]["load"];
        assert_eq!(load["sourceUris"][0], "gs://bucket/etl/*.csv");
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["createDisposition"], "CREATE_IF_NEEDED");
        assert_eq!(load["ignoreUnknownValues"], true);
        assert_eq!(load["destinationTable"]["datasetId"], "d");
        assert_eq!(load["destinationTable"]["tableId"], "t");
        assert_eq!(load["schema"]["fields"][0]["name"], "file_name");
        assert_eq!(load["schema"]["fields"][0]["mode"], "REQUIRED");
        assert!(body.get("status").is_none());
    }

    #[test]
    fn defaults_are_csv_and_write_empty() {
        let body = serde_json::to_value(request().to_job("x")).unwrap();
        assert_eq!(body["configuration"]["load"]["sourceFormat"], "CSV");
        assert_eq!(body["configuration"]["load"]["writeDisposition"], "WRITE_EMPTY");
    }

    #[test]
    fn state_from_status() {
        assert_eq!(JobState::from(&JobStatus::default()), JobState::Pending);
        assert_eq!(JobState::from(&status(State::Running)), JobState::Running);
        assert_eq!(JobState::from(&status(State::Done)), JobState::Succeeded);
        let failed = JobStatus {
            error_result: Some(error("bad row")),
            ..status(State::Done)
        };
        assert_eq!(JobState::from(&failed), JobState::Failed(error("bad row")));
    }

    #[tokio::test]
    async fn every_submission_gets_a_new_id() {
        let jobs = ScriptedJobs::default();
        let first = submit_load(&jobs, &request()).await.unwrap();
        let second = submit_load(&jobs, &request()).await.unwrap();
        assert_ne!(first.job_id, second.job_id);
        let inserted = jobs.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[0].1, DEFAULT_RETRIES);
    }

    #[tokio::test]
    async fn retries_pass_through_to_transport() {
        let jobs = ScriptedJobs::default();
        submit_load(&jobs, &request().retries(2)).await.unwrap();
        assert_eq!(jobs.inserted.lock().unwrap()[0].1, 2);
    }

    #[tokio::test]
    async fn rejected_insert_is_a_submission_error() {
        let err = submit_load(&RejectingJobs, &request()).await.unwrap_err();
        match err {
            LoadError::Submission { message } => assert!(message.contains("Not found: Dataset p:d")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn conflict_on_own_id_counts_as_submitted() {
        let jobs = ConflictingJobs { other_id: None };
        let handle = submit_load(&jobs, &request().location(Some("EU".into())))
            .await
            .unwrap();
        assert_eq!(handle.project_id, "p");
        assert_eq!(handle.location.as_deref(), Some("EU"));
        assert!(uuid::Uuid::parse_str(&handle.job_id).is_ok());
    }

    #[tokio::test]
    async fn conflict_on_foreign_id_is_a_submission_error() {
        let jobs = ConflictingJobs {
            other_id: Some("someone-elses-job"),
        };
        let err = submit_load(&jobs, &request()).await.unwrap_err();
        match err {
            LoadError::Submission { message } => {
                assert!(message.starts_with("HTTP 409"));
                assert!(message.contains("someone-elses-job"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_three_polls() {
        let jobs = ScriptedJobs::new(vec![
            status(State::Running),
            status(State::Running),
            status(State::Done),
        ]);
        let polls = poll_job(&jobs, &handle(), Duration::from_secs(1), &WaitBudget::unbounded())
            .await
            .unwrap();
        assert_eq!(polls, 3);
        assert_eq!(jobs.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn done_with_error_surfaces_payload() {
        let jobs = ScriptedJobs::new(vec![
            status(State::Running),
            JobStatus {
                error_result: Some(error("Provided Schema does not match Table")),
                ..status(State::Done)
            },
        ]);
        let err = poll_job(&jobs, &handle(), Duration::from_secs(1), &WaitBudget::unbounded())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Job { .. }));
        assert!(err.to_string().contains("Provided Schema does not match Table"));
        assert_eq!(jobs.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn error_field_before_done_fails_immediately() {
        let jobs = ScriptedJobs::new(vec![
            JobStatus {
                errors: Some(vec![error("Too many errors encountered")]),
                ..status(State::Running)
            },
            status(State::Done),
        ]);
        let err = poll_job(&jobs, &handle(), Duration::from_secs(1), &WaitBudget::unbounded())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Too many errors encountered"));
        assert_eq!(jobs.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_endless_polling() {
        let jobs = ScriptedJobs::new(vec![status(State::Running)]);
        let budget = WaitBudget::new(CancellationToken::new(), Some(Duration::from_secs(10)));
        let err = poll_job(&jobs, &handle(), Duration::from_secs(1), &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::DeadlineExceeded { .. }));
        assert!(jobs.polls() >= 10);
    }

    /// A `jobs.get` that never answers.
    struct HungJobs;

    #[async_trait]
    impl JobService for HungJobs {
        async fn insert_job(&self, _project_id: &str, _job: &Job, _retries: usize) -> Result<Job, LoadError> {
            unreachable!("nothing to insert")
        }

        async fn get_job(&self, _handle: &JobHandle) -> Result<Job, LoadError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Job::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_a_hung_status_call() {
        let budget = WaitBudget::new(CancellationToken::new(), Some(Duration::from_secs(5)));
        let started = tokio::time::Instant::now();
        let err = poll_job(&HungJobs, &handle(), Duration::from_secs(1), &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::DeadlineExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let jobs = ScriptedJobs::new(vec![status(State::Pending)]);
        let token = CancellationToken::new();
        let budget = WaitBudget::new(token.clone(), None);
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            token.cancel();
        });
        let err = poll_job(&jobs, &handle(), Duration::from_secs(1), &budget)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, LoadError::Cancelled { .. }));
        assert_eq!(jobs.polls(), 4);
    }
}
