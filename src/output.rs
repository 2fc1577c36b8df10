//! Operator-facing output
//!
//! - human mode: results pretty-printed to stdout, logs and errors to stderr
//! - agent mode: JSON Lines on stdout, each event carrying a schema version

use serde::Serialize;
use serde_json::{json, Value};
use std::process::ExitCode;

use crate::dispatch::DispatchError;
use crate::operation::{ArgumentError, Param};
use crate::registry::Registry;

const SCHEMA_VERSION: u8 = 1;

/// Event wrapper with schema version
#[derive(Serialize)]
struct Event<T: Serialize> {
    v: u8,
    #[serde(rename = "type")]
    event_type: String,
    payload: T,
}

fn emit<T: Serialize>(event_type: &str, payload: T) {
    let event = Event {
        v: SCHEMA_VERSION,
        event_type: event_type.to_string(),
        payload,
    };
    println!("{}", serde_json::to_string(&event).unwrap_or_default());
}

/// Output handler
pub struct Output {
    agent_mode: bool,
}

impl Output {
    pub fn new(agent_mode: bool) -> Self {
        Self { agent_mode }
    }

    /// Log message (stderr for human, JSON Lines for agent)
    pub fn log(&self, level: &str, message: &str) {
        if self.agent_mode {
            emit("log", json!({"level": level, "message": message}));
        } else {
            eprintln!("[{}] {}", level.to_uppercase(), message);
        }
    }

    /// Final result
    pub fn result<T: Serialize>(&self, data: T) {
        if self.agent_mode {
            emit("result", data);
        } else {
            println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
        }
    }

    /// Report a terminal error and pick the exit code for it
    pub fn error(&self, err: ToolError) -> ExitCode {
        if self.agent_mode {
            emit("error", &err);
        } else {
            eprintln!("Error [{}][{}]: {}", err.cat, err.code, err.message.as_deref().unwrap_or(""));
            if err.retryable {
                if let Some(s) = err.retry_after_s {
                    eprintln!("  Retry after: {}s", s);
                }
            }
            eprintln!("  Fix: {:?}", err.fix);
        }
        ExitCode::from(err.exit_code())
    }
}

/// Structured terminal error
#[derive(Debug, Serialize)]
pub struct ToolError {
    pub code: String,
    pub cat: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u32>,
    pub fix: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolError {
    fn new(code: &str, cat: &str, retry_after_s: Option<u32>, fix: &[&str], message: &str) -> Self {
        Self {
            code: code.into(),
            cat: cat.into(),
            op: None,
            retryable: retry_after_s.is_some(),
            retry_after_s,
            fix: fix.iter().map(|f| f.to_string()).collect(),
            message: Some(message.into()),
        }
    }

    /// Network error
    pub fn net(code: &str, message: &str) -> Self {
        Self::new(code, "net", Some(5), &["proxy", "wait"], message)
    }

    /// Input error
    pub fn input(code: &str, message: &str) -> Self {
        Self::new(code, "in", None, &["param"], message)
    }

    /// Auth error
    pub fn auth(code: &str, message: &str) -> Self {
        Self::new(code, "auth", None, &["auth"], message)
    }

    /// External service error
    pub fn ext(code: &str, message: &str) -> Self {
        Self::new(code, "ext", Some(5), &["wait", "report"], message)
    }

    /// System error
    pub fn sys(code: &str, message: &str) -> Self {
        Self::new(code, "sys", None, &["report"], message)
    }

    /// Timeout error
    pub fn timeout(code: &str, message: &str, retry_after: u32) -> Self {
        Self::new(code, "time", Some(retry_after), &["wait"], message)
    }

    /// Add operation context
    pub fn with_op(mut self, op: &str) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Classify a dispatch failure
    pub fn from_dispatch(err: &DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::UnknownOperation(_) => Self::input("UNKNOWN_OPERATION", &message),
            DispatchError::Failed(_) => Self::ext("OPERATION_FAILED", &message),
            DispatchError::Log(_) => Self::sys("LOG_WRITE", &message),
            DispatchError::Handler { source, detail, .. } => {
                let http = source.chain().find_map(|e| e.downcast_ref::<reqwest::Error>());
                if let Some(e) = http {
                    if e.is_timeout() {
                        return Self::timeout("FASTLY_TIMEOUT", &message, 30);
                    }
                    if e.is_connect() {
                        return Self::net("FASTLY_UNREACHABLE", &message);
                    }
                }
                if source.chain().any(|e| e.is::<ArgumentError>()) {
                    return Self::input("MISSING_ARGUMENT", &message);
                }
                if detail.contains("401 Unauthorized") || detail.contains("403 Forbidden") {
                    return Self::auth("FASTLY_AUTH", &message);
                }
                Self::ext("HANDLER_ERROR", &message)
            }
        }
    }

    /// Get exit code based on category
    pub fn exit_code(&self) -> u8 {
        match self.cat.as_str() {
            "in" => 1,
            "auth" => 3,
            "time" => 4,
            _ => 2,
        }
    }
}

fn value_type(param: Param) -> &'static str {
    match param {
        Param::InputDictionary => "key_value_pairs",
        Param::DictionaryItems | Param::Ips => "list",
        _ => "string",
    }
}

/// Tool manifest (--manifest), built from the registered operations
pub fn manifest(registry: &Registry) -> Value {
    let actions: Vec<Value> = registry
        .operations()
        .iter()
        .map(|op| {
            json!({
                "id": op.name,
                "options": op.handler.params().iter().map(|p| json!({
                    "name": p.name(),
                    "type": value_type(*p),
                })).collect::<Vec<_>>()
            })
        })
        .collect();

    json!({
        "schema_version": "1.0",
        "tool": {
            "name": "fastly-tools",
            "display_name": "Fastly Power Tools",
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION")
        },
        "capabilities": {
            "agent": true,
            "interactive": false,
            "streaming": false,
            "resume": false
        },
        "actions": actions,
        "permissions": {
            "network": true,
            "network_domains": ["api.fastly.com"],
            "filesystem": {
                "read": ["$FASTLY_TOOLS_DIR"],
                "write": ["$FASTLY_LOG_FILE", "$FASTLY_BACKUP_DIR"]
            },
            "env_vars": [
                "FASTLY_API_KEY",
                "FASTLY_TOOLS_DIR",
                "FASTLY_LOG_FILE",
                "FASTLY_API_BASE",
                "FASTLY_BACKUP_DIR",
                "FASTLY_STALE_DAYS",
                "FASTLY_PRUNE_BACKUPS"
            ]
        }
    })
}

pub fn print_manifest(registry: &Registry) {
    println!("{}", serde_json::to_string_pretty(&manifest(registry)).unwrap_or_default());
}
