pub mod backoff;
pub mod client;
pub mod error;
pub mod job;
pub mod schema;
pub mod settings;
pub mod storage;
pub mod structs;
pub mod submitter;
pub mod wait;

pub use client::Client;
pub use error::LoadError;
pub use job::{JobHandle, JobService, JobState, LoadRequest};
pub use settings::{ClientConfig, CredentialsSource};
pub use storage::{ObjectLister, StorageLocation};
pub use submitter::{BatchLoadSubmitter, LoadOutcome};
