//! Wire protocol between the supervisor and its workers.
//!
//! Messages are JSON-serialized and newline-delimited. Worker lines that are
//! not one of the two control messages are application data and are passed
//! through untouched.

use crate::queue::{Job, JobId};
use serde::{Deserialize, Serialize};

/// Message from supervisor to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// Run this job.
    AssignWork {
        job_id: JobId,
        payload: serde_json::Value,
    },

    /// Exit voluntarily (idle worker retired by the kill policy).
    Exit,
}

/// Control messages a worker may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerControl {
    /// First request after startup.
    RequestingWork,
    /// The previous job succeeded; send the next one.
    RequestingMoreWork,
}

/// A decoded line from a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Control(WorkerControl),
    /// Anything else, forwarded verbatim.
    Other(serde_json::Value),
}

impl SupervisorMessage {
    pub fn assign(job: &Job) -> Self {
        Self::AssignWork {
            job_id: job.id,
            payload: job.payload.clone(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("SupervisorMessage serialization failed");
        json.push('\n');
        json
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl WorkerControl {
    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> String {
        let mut json = serde_json::to_string(self).expect("WorkerControl serialization failed");
        json.push('\n');
        json
    }
}

impl WorkerMessage {
    /// Decode a worker line. This never fails: a line that is not valid JSON
    /// is forwarded as a JSON string.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => match control_of(&value) {
                Some(control) => Self::Control(control),
                None => Self::Other(value),
            },
            Err(_) => Self::Other(serde_json::Value::String(line.to_string())),
        }
    }
}

/// Control messages are objects whose only key is `type`.
fn control_of(value: &serde_json::Value) -> Option<WorkerControl> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    WorkerControl::deserialize(value).ok()
}
