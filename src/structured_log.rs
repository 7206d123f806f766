//! Structured logging for the intent pipeline
//!
//! Every event is one JSON object on stderr (optionally mirrored to a
//! file), so classification decisions and sandbox runs can be replayed
//! from logs by tooling:
//!
//!   {"timestamp":"2026-01-10T12:34:56Z","level":"info","component":"ENGINE",
//!    "event":"classified","data":{"action":"install_package","engine":"rule-based"}}
//!
//! Callers use the `slog_*` macros:
//!
//!   slog_info!("SANDBOX", "spawned", json!({"command": sanitized}));
//!   slog_warn!("LEARNING", "load_failed", "store unreadable", json!({"key": key}));

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref LOG_SINK: Mutex<Option<File>> = Mutex::new(None);
    static ref LOG_CONFIG: Mutex<LogConfig> = Mutex::new(LogConfig::default());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEntry {
    fn render(&self, json_output: bool) -> String {
        if json_output {
            return serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        }

        let data = self
            .data
            .as_ref()
            .map(|d| format!(" {}", d))
            .unwrap_or_default();
        format!(
            "{} [{}] {}: {}{}",
            self.level.as_str(),
            self.component,
            self.event,
            self.message.as_deref().unwrap_or(""),
            data
        )
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub json_output: bool,
    pub file_path: Option<PathBuf>,
    pub min_level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json_output: true,
            file_path: None,
            min_level: LogLevel::Warn,
        }
    }
}

/// Install the process-wide log configuration.
///
/// A file sink that cannot be opened is skipped; stderr output continues.
pub fn init_logger(config: LogConfig) {
    let sink = config.file_path.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    if let Ok(mut guard) = LOG_SINK.lock() {
        *guard = sink;
    }
    if let Ok(mut guard) = LOG_CONFIG.lock() {
        *guard = config;
    }
}

pub fn enabled(level: LogLevel) -> bool {
    match LOG_CONFIG.lock() {
        Ok(cfg) => level >= cfg.min_level,
        Err(_) => level >= LogConfig::default().min_level,
    }
}

pub fn log_event(level: LogLevel, component: &str, event: &str, data: serde_json::Value) {
    write_entry(level, component, event, None, Some(data));
}

pub fn log_message(
    level: LogLevel,
    component: &str,
    event: &str,
    message: &str,
    data: Option<serde_json::Value>,
) {
    write_entry(level, component, event, Some(message.to_string()), data);
}

fn write_entry(
    level: LogLevel,
    component: &str,
    event: &str,
    message: Option<String>,
    data: Option<serde_json::Value>,
) {
    let json_output = match LOG_CONFIG.lock() {
        Ok(cfg) if level >= cfg.min_level => cfg.json_output,
        Ok(_) => return,
        Err(_) => true,
    };

    let entry = LogEntry {
        timestamp: Utc::now(),
        level,
        component: component.to_string(),
        event: event.to_string(),
        message,
        data,
    };
    let line = entry.render(json_output);

    eprintln!("{}", line);

    if let Ok(mut sink) = LOG_SINK.lock() {
        if let Some(ref mut file) = *sink {
            let _ = writeln!(file, "{}", line);
        }
    }
}

#[macro_export]
macro_rules! slog_debug {
    ($component:expr, $event:expr, $data:expr) => {
        $crate::structured_log::log_event(
            $crate::structured_log::LogLevel::Debug,
            $component,
            $event,
            $data,
        )
    };
    ($component:expr, $event:expr, $msg:expr, $data:expr) => {
        $crate::structured_log::log_message(
            $crate::structured_log::LogLevel::Debug,
            $component,
            $event,
            $msg,
            Some($data),
        )
    };
}

#[macro_export]
macro_rules! slog_info {
    ($component:expr, $event:expr, $data:expr) => {
        $crate::structured_log::log_event(
            $crate::structured_log::LogLevel::Info,
            $component,
            $event,
            $data,
        )
    };
    ($component:expr, $event:expr, $msg:expr, $data:expr) => {
        $crate::structured_log::log_message(
            $crate::structured_log::LogLevel::Info,
            $component,
            $event,
            $msg,
            Some($data),
        )
    };
}

#[macro_export]
macro_rules! slog_warn {
    ($component:expr, $event:expr, $data:expr) => {
        $crate::structured_log::log_event(
            $crate::structured_log::LogLevel::Warn,
            $component,
            $event,
            $data,
        )
    };
    ($component:expr, $event:expr, $msg:expr, $data:expr) => {
        $crate::structured_log::log_message(
            $crate::structured_log::LogLevel::Warn,
            $component,
            $event,
            $msg,
            Some($data),
        )
    };
}

#[macro_export]
macro_rules! slog_error {
    ($component:expr, $event:expr, $data:expr) => {
        $crate::structured_log::log_event(
            $crate::structured_log::LogLevel::Error,
            $component,
            $event,
            $data,
        )
    };
    ($component:expr, $event:expr, $msg:expr, $data:expr) => {
        $crate::structured_log::log_message(
            $crate::structured_log::LogLevel::Error,
            $component,
            $event,
            $msg,
            Some($data),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_entry_renders_as_json_object() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            component: "SANDBOX".to_string(),
            event: "spawned".to_string(),
            message: None,
            data: Some(json!({"pid": 42})),
        };

        let line = entry.render(true);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["component"], "SANDBOX");
        assert_eq!(parsed["data"]["pid"], 42);
        assert!(parsed.get("message").is_none());
    }

    #[test]
    fn test_plain_render() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Warn,
            component: "LEARNING".to_string(),
            event: "save_failed".to_string(),
            message: Some("disk full".to_string()),
            data: None,
        };

        assert_eq!(entry.render(false), "warn [LEARNING] save_failed: disk full");
    }
}
