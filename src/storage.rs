use std::fmt;

use async_trait::async_trait;
use log::{debug, info};

use crate::backoff::Backoff;
use crate::error::LoadError;
use crate::wait::WaitBudget;

const SCHEME: &str = "gs://";

/// Bucket and directory prefix that a load job's source files live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub bucket: String,
    pub prefix: String,
}

impl StorageLocation {
    /// Splits `gs://bucket/dir/part-*.json` into `bucket` and `dir/`.
    /// The last path component is the file name or wildcard and is dropped.
    pub fn parse(uri: &str) -> Result<Self, LoadError> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| LoadError::InvalidLocation(uri.into()))?;
        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(LoadError::InvalidLocation(uri.into()));
        }
        let prefix = match path.rsplit_once('/') {
            Some((dir, _file)) if !dir.is_empty() => format!("{dir}/"),
            _ => String::new(),
        };
        Ok(StorageLocation {
            bucket: bucket.into(),
            prefix,
        })
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// Every object under `location.prefix`, across all result pages.
    async fn list_objects(&self, location: &StorageLocation) -> Result<Vec<ObjectInfo>, LoadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub objects: usize,
    pub total_bytes: u64,
    pub attempts: u32,
}

/// Waits until exactly `expected` objects are visible under `location`.
///
/// Listings in object storage can lag behind writes, so a load submitted
/// right after the upload may silently miss files. The listing is retried on
/// the `backoff` schedule and gives up with [`LoadError::ReadinessTimeout`]
/// once `backoff.max_attempts()` listings have come back short.
pub async fn wait_for_objects<L: ObjectLister + ?Sized>(
    lister: &L,
    location: &StorageLocation,
    expected: usize,
    backoff: &dyn Backoff,
    budget: &WaitBudget,
) -> Result<ReadinessReport, LoadError> {
    let max_attempts = backoff.max_attempts().max(1);
    let mut observed = 0;
    for attempt in 0..max_attempts {
        let objects = budget
            .guard("waiting for source files", lister.list_objects(location))
            .await?;
        observed = objects.len();
        debug!(
            "Listed {} objects at {} (attempt {}/{}, expecting {})",
            observed,
            location,
            attempt + 1,
            max_attempts,
            expected
        );
        if observed == expected {
            let total_bytes = objects.iter().map(|o| o.size).sum();
            info!(
                "All {} source files present at {} ({} bytes)",
                expected, location, total_bytes
            );
            return Ok(ReadinessReport {
                objects: observed,
                total_bytes,
                attempts: attempt + 1,
            });
        }
        if attempt + 1 < max_attempts {
            budget
                .pause(backoff.delay(attempt), "waiting for source files")
                .await?;
        }
    }
    Err(LoadError::ReadinessTimeout {
        expected,
        observed,
        attempts: max_attempts,
        location: location.to_string(),
    })
}
