use std::time::Duration;

use log::info;

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::error::LoadError;
use crate::job::{poll_job, submit_load, JobHandle, JobService, LoadRequest};
use crate::storage::{wait_for_objects, ObjectLister, ReadinessReport, StorageLocation};
use crate::wait::WaitBudget;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub handle: JobHandle,
    pub polls: u32,
    pub readiness: Option<ReadinessReport>,
}

/// Readiness check, then one load job, then polling until it is DONE.
pub struct BatchLoadSubmitter<S, L> {
    jobs: S,
    lister: L,
    poll_interval: Duration,
    readiness: Box<dyn Backoff>,
    budget: WaitBudget,
    on_submitted: Option<Box<dyn Fn(&JobHandle) + Send + Sync>>,
}

impl<S: JobService, L: ObjectLister> BatchLoadSubmitter<S, L> {
    pub fn new(jobs: S, lister: L) -> Self {
        BatchLoadSubmitter {
            jobs,
            lister,
            poll_interval: DEFAULT_POLL_INTERVAL,
            readiness: Box::new(ExponentialBackoff::default()),
            budget: WaitBudget::unbounded(),
            on_submitted: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn readiness_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.readiness = backoff;
        self
    }

    pub fn budget(mut self, budget: WaitBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Called once the job is accepted, before polling starts.
    pub fn on_submitted(mut self, hook: impl Fn(&JobHandle) + Send + Sync + 'static) -> Self {
        self.on_submitted = Some(Box::new(hook));
        self
    }

    /// Runs the whole load. With `expected_objects` set, the source listing
    /// must show exactly that many objects before anything is submitted.
    pub async fn run(
        &self,
        request: &LoadRequest,
        expected_objects: Option<usize>,
    ) -> Result<LoadOutcome, LoadError> {
        let readiness = match expected_objects {
            Some(expected) => {
                let location = StorageLocation::parse(request.source_uri())?;
                info!("Waiting for {} source files at {}", expected, location);
                Some(
                    wait_for_objects(
                        &self.lister,
                        &location,
                        expected,
                        self.readiness.as_ref(),
                        &self.budget,
                    )
                    .await?,
                )
            }
            None => None,
        };

        let handle = submit_load(&self.jobs, request).await?;
        info!("Submitted job {}, waiting for it to finish", handle.job_id);
        if let Some(hook) = &self.on_submitted {
            hook(&handle);
        }
        let polls = poll_job(&self.jobs, &handle, self.poll_interval, &self.budget).await?;

        Ok(LoadOutcome {
            handle,
            polls,
            readiness,
        })
    }
}
