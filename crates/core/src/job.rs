//! The scheduled detection job and its status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::cluster::ClusterId;
use crate::error::CoreError;
use crate::granularity::{Frequency, Granularity};
use crate::time::Minutes;

pub type JobId = i64;

/// Job status state machine.
///
/// `Created -> Running <-> Stopped`, and from `Running` (or its runnable
/// variant `NoData`) a job may fall into the terminal `Error` or `Zombie`
/// states, which are left only by a manual relaunch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Created,
    Running,
    Stopped,
    Error,
    NoData,
    Zombie,
}

impl JobStatus {
    /// Statuses the dispatch loop keeps executing.
    pub fn is_runnable(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::NoData)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Zombie)
    }

    /// Neither stopped by an operator nor terminal. Only such records may be
    /// written back by the dispatch loop.
    pub fn is_dispatchable(self) -> bool {
        self != JobStatus::Stopped && !self.is_terminal()
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (_, Stopped) => self != Stopped,
            (Created | Stopped | Error | Zombie, Running) => true,
            (Running | NoData, Running | NoData | Error | Zombie) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.can_transition_to(next) {
            return Err(CoreError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Running => "RUNNING",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Error => "ERROR",
            JobStatus::NoData => "NODATA",
            JobStatus::Zombie => "ZOMBIE",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(JobStatus::Created),
            "RUNNING" => Ok(JobStatus::Running),
            "STOPPED" => Ok(JobStatus::Stopped),
            "ERROR" => Ok(JobStatus::Error),
            "NODATA" => Ok(JobStatus::NoData),
            "ZOMBIE" => Ok(JobStatus::Zombie),
            _ => Err(CoreError::UnknownStatus(s.to_string())),
        }
    }
}

/// A scheduled anomaly-detection job.
///
/// The scheduling core only reads and writes `status`,
/// `effective_query_time` and `effective_run_time`; every other field is
/// passed through to the data source, detector and mailer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    #[serde(default)]
    pub owner: String,
    /// Comma-separated contact addresses.
    #[serde(default)]
    pub owner_email: String,
    pub cluster_id: ClusterId,
    /// Stored query definition, opaque to the scheduler.
    pub query: serde_json::Value,
    /// Link back to the query in the source's UI, copied into reports.
    #[serde(default)]
    pub url: Option<String>,
    pub granularity: Granularity,
    /// Number of granularity buckets one detection window tests.
    #[serde(default = "default_granularity_range")]
    pub granularity_range: u32,
    #[serde(deserialize_with = "lenient_frequency")]
    pub frequency: Frequency,
    #[serde(default = "default_sigma_threshold")]
    pub sigma_threshold: f64,
    /// Publication delay of the data source.
    #[serde(default)]
    pub hours_of_lag: u32,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    /// Window end (minutes) the job analyzes on its next run.
    #[serde(default)]
    pub effective_query_time: Option<Minutes>,
    /// Minutes at which the job is next due.
    #[serde(default)]
    pub effective_run_time: Option<Minutes>,
}

fn default_granularity_range() -> u32 {
    1
}

fn default_sigma_threshold() -> f64 {
    3.0
}

fn default_status() -> JobStatus {
    JobStatus::Created
}

/// Unrecognized frequency names fall back to `day`.
fn lenient_frequency<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Frequency, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!(frequency = %raw, "Unknown job frequency, defaulting to day");
        Frequency::Day
    }))
}

impl Job {
    /// A freshly created job with no run or query times.
    pub fn new(
        job_id: JobId,
        cluster_id: ClusterId,
        query: serde_json::Value,
        granularity: Granularity,
        frequency: Frequency,
    ) -> Self {
        Self {
            job_id,
            owner: String::new(),
            owner_email: String::new(),
            cluster_id,
            query,
            url: None,
            granularity,
            granularity_range: default_granularity_range(),
            frequency,
            sigma_threshold: default_sigma_threshold(),
            hours_of_lag: 0,
            status: JobStatus::Created,
            effective_query_time: None,
            effective_run_time: None,
        }
    }

    /// Start of the report window that ends at the current query time.
    pub fn report_nominal_time(&self) -> Option<Minutes> {
        self.effective_query_time
            .map(|q| q - self.granularity.minutes() * i64::from(self.granularity_range.max(1)))
    }

    /// Copy used by detection tasks: same definition, scheduling times cleared.
    pub fn copy_for_detection(&self) -> Job {
        Job {
            effective_query_time: None,
            effective_run_time: None,
            ..self.clone()
        }
    }

    pub fn owner_emails(&self) -> Vec<String> {
        self.owner_email
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}
