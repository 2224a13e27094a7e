//! Wire format.
//!
//! Messages are plain JSON text so operators can read them off the broker:
//!
//! ```json
//! {"task_name": "scoring.recalculate_task_score",
//!  "args": ["task", "01J...", "task_completed"],
//!  "queue": "scoring.task",
//!  "headers": {"id": "01J...", "attempt": 1, "enqueued_at": "...", "cascade": null}}
//! ```
//!
//! `args` stays positional (kind, id, reason); the bookkeeping the worker
//! needs lives in `headers`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QueueName, route, task_name};
use crate::domain::{CascadeId, EntityId, EntityKind, JobId, Reason, RecalculationJob};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("bad argument '{value}': {message}")]
    BadArgument { value: String, message: String },

    #[error("message for {kind}/{reason} arrived on '{queue}', expected '{expected}'")]
    WrongQueue {
        kind: EntityKind,
        reason: Reason,
        queue: QueueName,
        expected: QueueName,
    },

    #[error("task name '{got}' does not match '{expected}'")]
    WrongTaskName { got: String, expected: &'static str },

    #[error("attempt must start at 1")]
    ZeroAttempt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireHeaders {
    pub id: JobId,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub cascade: Option<CascadeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub task_name: String,
    pub args: [String; 3],
    pub queue: QueueName,
    pub headers: WireHeaders,
}

impl WireMessage {
    pub fn from_job(job: &RecalculationJob) -> Self {
        Self {
            task_name: task_name(job.entity_kind, job.reason).to_string(),
            args: [
                job.entity_kind.as_str().to_string(),
                job.entity_id.as_ulid().to_string(),
                job.reason.as_str().to_string(),
            ],
            queue: route(job.entity_kind, job.reason),
            headers: WireHeaders {
                id: job.job_id,
                attempt: job.attempt,
                enqueued_at: job.enqueued_at,
                cascade: job.cascade_id,
            },
        }
    }

    /// Rebuild the job, checking that the routing fields agree with the args.
    pub fn into_job(self) -> Result<RecalculationJob, WireError> {
        let [kind, id, reason] = self.args;
        let entity_kind = kind.parse::<EntityKind>().map_err(|e| bad_argument(&kind, e))?;
        let entity_id = id.parse::<EntityId>().map_err(|e| bad_argument(&id, e))?;
        let reason = reason.parse::<Reason>().map_err(|e| bad_argument(&reason, e))?;

        let expected = route(entity_kind, reason);
        if self.queue != expected {
            return Err(WireError::WrongQueue {
                kind: entity_kind,
                reason,
                queue: self.queue,
                expected,
            });
        }
        let expected_name = task_name(entity_kind, reason);
        if self.task_name != expected_name {
            return Err(WireError::WrongTaskName {
                got: self.task_name,
                expected: expected_name,
            });
        }
        if self.headers.attempt == 0 {
            return Err(WireError::ZeroAttempt);
        }

        Ok(RecalculationJob {
            job_id: self.headers.id,
            entity_kind,
            entity_id,
            reason,
            enqueued_at: self.headers.enqueued_at,
            attempt: self.headers.attempt,
            cascade_id: self.headers.cascade,
        })
    }
}

fn bad_argument(value: &str, err: impl std::fmt::Display) -> WireError {
    WireError::BadArgument {
        value: value.to_string(),
        message: err.to_string(),
    }
}

pub fn encode(job: &RecalculationJob) -> Result<String, WireError> {
    Ok(serde_json::to_string(&WireMessage::from_job(job))?)
}

pub fn decode(payload: &str) -> Result<RecalculationJob, WireError> {
    let message: WireMessage = serde_json::from_str(payload)?;
    message.into_job()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::EntityRef;

    fn sample_job() -> RecalculationJob {
        RecalculationJob::new(
            JobId::from_u128(7),
            EntityRef::task(EntityId::from_u128(42)),
            Reason::DependencyAdded,
            Some(CascadeId::from_u128(3)),
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn message_has_the_documented_shape() {
        let text = encode(&sample_job()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["task_name"], "scoring.recalculate_dependent_task");
        assert_eq!(value["queue"], "scoring.task_dependency");
        assert_eq!(value["args"][0], "task");
        assert_eq!(value["args"][2], "dependency_added");
        assert_eq!(value["headers"]["attempt"], 1);
    }

    #[test]
    fn decode_restores_the_job() {
        let job = sample_job().next_attempt(Utc.with_ymd_and_hms(2024, 5, 1, 9, 1, 0).unwrap());
        let decoded = decode(&encode(&job).unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn decode_rejects_mismatched_queue() {
        let mut message = WireMessage::from_job(&sample_job());
        message.queue = QueueName::Area;
        let text = serde_json::to_string(&message).unwrap();
        assert!(matches!(decode(&text), Err(WireError::WrongQueue { .. })));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut message = WireMessage::from_job(&sample_job());
        message.args[0] = "galaxy".into();
        let text = serde_json::to_string(&message).unwrap();
        assert!(matches!(decode(&text), Err(WireError::BadArgument { .. })));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(WireError::Malformed(_))));
    }
}
