use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Tri-state result of a run-level status probe.
///
/// The service omits `dateStarted` entirely until the run has been
/// scheduled; once scheduled, the key is present but null until the
/// milestone is actually reached. Collapsing the first two states into a
/// boolean loses information callers rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunProgress {
    /// the status record has no `dateStarted` key yet
    NotScheduled,
    /// scheduled, timestamp still null
    Pending,
    /// timestamp set
    Reached,
}

impl std::fmt::Display for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RunProgress::NotScheduled => write!(f, "not scheduled"),
            RunProgress::Pending => write!(f, "pending"),
            RunProgress::Reached => write!(f, "reached"),
        }
    }
}

/// Status of one run of a job, as returned by the runs endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    #[serde(default, deserialize_with = "present")]
    pub date_started: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub date_completed: Option<Option<DateTime<Utc>>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keep "key present but null" distinct from "key absent"
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl RunStatus {
    pub fn started(&self) -> RunProgress {
        match &self.date_started {
            None => RunProgress::NotScheduled,
            Some(None) => RunProgress::Pending,
            Some(Some(_)) => RunProgress::Reached,
        }
    }

    /// Completion is only meaningful once the run has been scheduled
    pub fn completed(&self) -> RunProgress {
        if self.date_started.is_none() {
            return RunProgress::NotScheduled;
        }
        match &self.date_completed {
            None | Some(None) => RunProgress::Pending,
            Some(Some(_)) => RunProgress::Reached,
        }
    }
}

/// One entry of a job's status history
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One file attached to a job
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
