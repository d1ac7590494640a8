use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::warn;

/// How status payloads are written to the wire log.
pub enum MessageLogMode {
    /// Every payload in full.
    Full,
    /// First payload in full, then only changed JSON paths.
    Diffed,
}

/// NDJSON append log of outgoing requests/commands and incoming status
/// payloads. Meant for protocol debugging against real receivers.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_status: Option<Value>,
}

fn params_json(params: &[(&'static str, String)]) -> Value {
    let map: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_status: None,
        })
    }

    pub fn log_request(&mut self, target: &str, params: &[(&'static str, String)]) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "target": target,
            "params": params_json(params),
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, key: Option<&'static str>, params: &[(&'static str, String)]) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "key": key,
            "params": params_json(params),
        });
        self.write_line(&entry);
    }

    pub fn log_status(&mut self, body: &Value) {
        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "status",
                    "body": body,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => match self.previous_status.take() {
                None => {
                    let entry = json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "status",
                        "full": true,
                        "body": body,
                    });
                    self.write_line(&entry);
                    self.previous_status = Some(body.clone());
                }
                Some(prev) => {
                    let changes: Vec<Value> = json_changes(&prev, body)
                        .into_iter()
                        .map(|(path, new)| json!({ "path": path, "new": new }))
                        .collect();
                    let entry = json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "status",
                        "changes": changes,
                    });
                    self.write_line(&entry);
                    self.previous_status = Some(body.clone());
                }
            },
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

/// Leaf values present in `curr` that differ from `prev`, as
/// `dotted.path -> new value` pairs. Removed keys are not reported.
fn json_changes(prev: &Value, curr: &Value) -> Vec<(String, Value)> {
    let mut changes = Vec::new();
    walk(prev, curr, "", &mut changes);
    changes
}

fn walk(prev: &Value, curr: &Value, path: &str, changes: &mut Vec<(String, Value)>) {
    match curr {
        Value::Object(curr_map) => {
            let empty = Map::new();
            let prev_map = prev.as_object().unwrap_or(&empty);
            for (key, curr_val) in curr_map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk(
                    prev_map.get(key).unwrap_or(&Value::Null),
                    curr_val,
                    &child,
                    changes,
                );
            }
        }
        _ => {
            if prev != curr {
                changes.push((path.to_string(), curr.clone()));
            }
        }
    }
}
