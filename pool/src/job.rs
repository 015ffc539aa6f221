//! The persisted job envelope (§3, §6): a self-describing text mapping stored as JSON in every
//! queue, sorted-set payload, and in-progress list. `#[serde(default)]` on every optional field
//! means producers and consumers tolerate unknown/missing fields, per §6.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Determines how to generate a job id at enqueue time, mirroring the three common shapes a
/// producer wants: fully random, prefixed-random, or caller-supplied.
pub enum JobId<'a> {
    Auto,
    Prefix(&'a str),
    Value(&'a str),
}

impl<'a> JobId<'a> {
    pub fn make_id(&self) -> String {
        match self {
            JobId::Auto => uuid::Uuid::new_v4().to_string(),
            JobId::Prefix(prefix) => format!("{}:{}", prefix, uuid::Uuid::new_v4()),
            JobId::Value(s) => s.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Enqueued-at, epoch seconds.
    #[serde(rename = "t")]
    pub enqueued_at: i64,
    #[serde(default)]
    pub fails: u32,
    #[serde(default, rename = "err")]
    pub last_err: String,
    #[serde(default, rename = "failed_at")]
    pub failed_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Epoch seconds; 0 means "not scheduled", matching the Go-derived convention of using the
    /// zero value as "absent" instead of an `Option`.
    #[serde(default, rename = "scheduled_at")]
    pub scheduled_at: i64,
}

impl JobRecord {
    pub fn new(id: JobId, name: impl Into<String>, args: Map<String, Value>) -> Self {
        JobRecord {
            name: name.into(),
            id: id.make_id(),
            args,
            enqueued_at: Utc::now().timestamp(),
            fails: 0,
            last_err: String::new(),
            failed_at: 0,
            unique: false,
            scheduled_at: 0,
        }
    }

    pub fn scheduled(
        id: JobId,
        name: impl Into<String>,
        args: Map<String, Value>,
        run_at_epoch_secs: i64,
    ) -> Self {
        let mut job = JobRecord::new(id, name, args);
        job.scheduled_at = run_at_epoch_secs;
        job
    }

    /// Record a handler failure (§4.4 step 8): bump `fails`, set `last_err`, stamp `failed_at`.
    pub fn mark_failed(&mut self, err: &str) {
        self.fails += 1;
        self.last_err = err.to_string();
        self.failed_at = Utc::now().timestamp();
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json_tolerating_unknown_fields() {
        let job = JobRecord::new(JobId::Value("a-test-id"), "email", Map::new());
        let payload = job.to_payload().unwrap();
        assert!(payload.contains("\"id\":\"a-test-id\""));

        let mut with_extra: Value = serde_json::from_str(&payload).unwrap();
        with_extra
            .as_object_mut()
            .unwrap()
            .insert("future_field".into(), Value::Bool(true));
        let decoded = JobRecord::from_payload(&with_extra.to_string()).unwrap();
        assert_eq!(decoded.id, "a-test-id");
        assert_eq!(decoded.name, "email");
    }

    #[test]
    fn mark_failed_increments_and_stamps() {
        let mut job = JobRecord::new(JobId::Auto, "flaky", Map::new());
        assert_eq!(job.fails, 0);
        job.mark_failed("boom");
        assert_eq!(job.fails, 1);
        assert_eq!(job.last_err, "boom");
        assert!(job.failed_at > 0);
    }

    #[test]
    fn scheduled_at_defaults_to_zero() {
        let job = JobRecord::new(JobId::Auto, "email", Map::new());
        assert_eq!(job.scheduled_at, 0);
    }
}
