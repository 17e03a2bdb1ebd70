use serde::Serialize;
use serde_json::{Map, Value};

use crate::errno_names::errno_name;
use crate::metadata_ops::OpOutcome;
use crate::sandbox::{ApplyMode, ApplyOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    OpFailed,
    InvalidOp,
    ApplyFailed,
}

#[derive(Serialize, Clone, Debug)]
pub struct ApplyRecord {
    pub rc: i32,
    pub errno: Option<i32>,
    pub errno_name: Option<String>,
    pub message: Option<String>,
    pub mode: ApplyMode,
}

impl From<&ApplyOutcome> for ApplyRecord {
    fn from(outcome: &ApplyOutcome) -> Self {
        ApplyRecord {
            rc: outcome.rc,
            errno: outcome.errno,
            errno_name: outcome.errno.map(errno_name),
            message: outcome.message.clone(),
            mode: outcome.mode,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct RunResult {
    pub op: String,
    pub path: String,
    pub syscall: String,
    pub attr_payload: Option<String>,
    pub status: RunStatus,
    pub errno: Option<i32>,
    pub errno_name: Option<String>,
    pub message: Option<String>,
    pub apply: ApplyRecord,
}

/// Identity of a run, shared by every result shape.
pub struct RunTarget<'a> {
    pub op: &'a str,
    pub path: &'a str,
    pub syscall: &'a str,
    pub attr_payload: Option<&'a str>,
}

impl RunResult {
    pub fn apply_failed(target: &RunTarget<'_>, apply: &ApplyOutcome) -> Self {
        RunResult {
            op: target.op.to_string(),
            path: target.path.to_string(),
            syscall: target.syscall.to_string(),
            attr_payload: target.attr_payload.map(str::to_string),
            status: RunStatus::ApplyFailed,
            errno: None,
            errno_name: None,
            message: Some(format!("sandbox apply rc {}", apply.rc)),
            apply: ApplyRecord::from(apply),
        }
    }

    pub fn completed(target: &RunTarget<'_>, apply: &ApplyOutcome, op: OpOutcome) -> Self {
        RunResult {
            op: target.op.to_string(),
            path: target.path.to_string(),
            syscall: target.syscall.to_string(),
            attr_payload: target.attr_payload.map(str::to_string),
            status: op.status,
            errno: op.errno,
            errno_name: op.errno.map(errno_name),
            message: op.message,
            apply: ApplyRecord::from(apply),
        }
    }
}

fn sort_value(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                sort_value(item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, mut val) in entries {
                sort_value(&mut val);
                sorted.insert(key, val);
            }
            *map = sorted;
        }
        _ => {}
    }
}

pub fn render_result(result: &RunResult) -> Result<String, String> {
    let mut value =
        serde_json::to_value(result).map_err(|e| format!("failed to encode JSON: {e}"))?;
    sort_value(&mut value);
    serde_json::to_string_pretty(&value).map_err(|e| format!("failed to encode JSON: {e}"))
}

pub fn print_result(result: &RunResult) -> Result<(), String> {
    let text = render_result(result)?;
    println!("{text}");
    Ok(())
}
