//! Error classification and recovery advice
//!
//! Free-form failure text is mapped onto the closed [`ErrorType`] set and
//! every category gets a plan: a plain explanation, ordered suggestions and
//! an optional note about the underlying system concept. Unclassified
//! errors still get a generic plan.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::command_builder::sanitize_package_name;
use crate::sandbox::TIMEOUT_MARKER;
use crate::slog_info;

const PACKAGE_PLACEHOLDER: &str = "the package";
const SUCCESS_BOOST: f64 = 0.05;
const BOOST_CAP: f64 = 0.99;
const COMMON_ERROR_LIMIT: usize = 10;

lazy_static::lazy_static! {
    static ref PACKAGE_IN_INPUT: Vec<Regex> = [
        r"(?i)install\s+(\S+)",
        r"(?i)package\s+(\S+)",
        r"(?i)get\s+(\S+)",
        r"(?i)need\s+(\S+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    PackageNotFound,
    PermissionDenied,
    NetworkError,
    DependencyConflict,
    DiskSpace,
    CommandFailed,
    #[default]
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::PackageNotFound => "package_not_found",
            ErrorType::PermissionDenied => "permission_denied",
            ErrorType::NetworkError => "network_error",
            ErrorType::DependencyConflict => "dependency_conflict",
            ErrorType::DiskSpace => "disk_space",
            ErrorType::CommandFailed => "command_failed",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure as reported by whoever hit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_type: ErrorType,
    pub error_message: String,
    pub command: Option<String>,
    pub user_input: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    /// Context with an undetermined type, to be classified from the message.
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Unknown,
            error_message: error_message.into(),
            command: None,
            user_input: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub action: String,
    pub command: Option<String>,
    pub confidence: f64,
    pub requires_confirmation: bool,
}

impl Suggestion {
    /// A suggestion with a concrete command. Confirmation is required when
    /// the command is privileged or destructive.
    pub fn run(action: &str, command: impl Into<String>, confidence: f64) -> Self {
        let command = command.into();
        Self {
            action: action.to_string(),
            requires_confirmation: needs_confirmation(&command),
            command: Some(command),
            confidence,
        }
    }

    /// Advice the user carries out themselves.
    pub fn advice(action: &str, confidence: f64) -> Self {
        Self {
            action: action.to_string(),
            command: None,
            confidence,
            requires_confirmation: false,
        }
    }

    pub fn confirm(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

/// True for commands that elevate privileges or change system state in a
/// way that is hard to undo.
pub fn needs_confirmation(command: &str) -> bool {
    let command = command.trim();
    command.starts_with("sudo ")
        || command.contains("nix-collect-garbage")
        || command.contains("rollback")
        || command.contains("nixos-rebuild")
        || command.split_whitespace().any(|w| w == "restart")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Category the plan was generated for, after classification.
    pub error_type: ErrorType,
    pub explanation: String,
    pub suggestions: Vec<Suggestion>,
    pub learn_more: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonError {
    pub error_type: ErrorType,
    pub command: Option<String>,
    pub frequency: u32,
    pub last_seen: DateTime<Utc>,
}

/// Map an error message onto an [`ErrorType`] by keyword.
pub fn detect_error_type(message: &str) -> ErrorType {
    let message = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if has(&["no space left", "disk space", "disk full", "disk quota exceeded"]) {
        ErrorType::DiskSpace
    } else if has(&["permission denied", "operation not permitted", "must be root", "access denied"]) {
        ErrorType::PermissionDenied
    } else if message.contains(&TIMEOUT_MARKER.to_lowercase()) {
        ErrorType::CommandFailed
    } else if has(&["not found", "no such package", "does not provide attribute", "undefined variable"]) {
        ErrorType::PackageNotFound
    } else if has(&["network", "connection", "timeout", "timed out", "could not resolve", "unable to download"]) {
        ErrorType::NetworkError
    } else if has(&["conflict", "dependency", "collision"]) {
        ErrorType::DependencyConflict
    } else if has(&["exit code", "exit status", "non-zero", "failed"]) {
        ErrorType::CommandFailed
    } else {
        ErrorType::Unknown
    }
}

/// Package name the user most likely meant, from their original request.
/// The name is sanitised because it ends up in suggested commands.
pub fn extract_package_name(input: Option<&str>) -> String {
    input
        .and_then(|text| {
            PACKAGE_IN_INPUT
                .iter()
                .find_map(|re| re.captures(text))
                .and_then(|caps| caps.get(1))
        })
        .and_then(|m| sanitize_package_name(m.as_str()).ok())
        .unwrap_or_else(|| PACKAGE_PLACEHOLDER.to_string())
}

#[derive(Default)]
struct AdvisorState {
    history: Vec<ErrorContext>,
    boosts: HashMap<(ErrorType, String), f64>,
}

/// Turns failures into recovery plans and remembers what went wrong.
#[derive(Default)]
pub struct RecoveryAdvisor {
    state: Mutex<AdvisorState>,
}

impl RecoveryAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, AdvisorState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn detect_error_type(&self, message: &str) -> ErrorType {
        detect_error_type(message)
    }

    pub fn analyze_error(&self, mut context: ErrorContext) -> RecoveryPlan {
        if context.error_type == ErrorType::Unknown {
            context.error_type = detect_error_type(&context.error_message);
        }

        let mut plan = match context.error_type {
            ErrorType::PackageNotFound => package_not_found(&context),
            ErrorType::PermissionDenied => permission_denied(&context),
            ErrorType::NetworkError => network_error(),
            ErrorType::DependencyConflict => dependency_conflict(&context),
            ErrorType::DiskSpace => disk_space(),
            ErrorType::CommandFailed => command_failed(),
            ErrorType::Unknown => generic(),
        };

        let mut state = self.state();
        for suggestion in &mut plan.suggestions {
            if let Some(boost) = state.boosts.get(&(plan.error_type, suggestion.action.clone())) {
                suggestion.confidence = (suggestion.confidence + boost).min(BOOST_CAP);
            }
        }

        slog_info!(
            "RECOVERY",
            "analyzed",
            json!({
                "error_type": plan.error_type.as_str(),
                "suggestions": plan.suggestions.len(),
            })
        );

        state.history.push(context);
        plan
    }

    /// Note that `action` fixed an error of `error_type`; later plans rank
    /// that suggestion with more confidence.
    pub fn record_successful_recovery(&self, error_type: ErrorType, action: &str) {
        let mut state = self.state();
        let boost = state
            .boosts
            .entry((error_type, action.to_string()))
            .or_insert(0.0);
        *boost += SUCCESS_BOOST;

        slog_info!(
            "RECOVERY",
            "recovery_succeeded",
            json!({ "error_type": error_type.as_str(), "action": action })
        );
    }

    /// Most frequent `(error_type, command)` pairs, most frequent first.
    pub fn get_common_errors(&self) -> Vec<CommonError> {
        let state = self.state();
        let mut groups: Vec<CommonError> = Vec::new();
        let mut index: HashMap<(ErrorType, Option<&str>), usize> = HashMap::new();

        for error in &state.history {
            let key = (error.error_type, error.command.as_deref());
            match index.get(&key) {
                Some(&i) => {
                    groups[i].frequency += 1;
                    groups[i].last_seen = error.timestamp;
                }
                None => {
                    index.insert(key, groups.len());
                    groups.push(CommonError {
                        error_type: error.error_type,
                        command: error.command.clone(),
                        frequency: 1,
                        last_seen: error.timestamp,
                    });
                }
            }
        }

        groups.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        groups.truncate(COMMON_ERROR_LIMIT);
        groups
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }
}

fn package_not_found(context: &ErrorContext) -> RecoveryPlan {
    let package = extract_package_name(context.user_input.as_deref());
    RecoveryPlan {
        error_type: ErrorType::PackageNotFound,
        explanation: format!(
            "I couldn't find a package called \"{}\". The name may differ on NixOS, \
             it may live in another channel, or there may be a typo.",
            package
        ),
        suggestions: vec![
            Suggestion::run(
                "Search for similar packages",
                format!("nix search nixpkgs {}", package),
                0.9,
            ),
            Suggestion::advice("Try common alternatives", 0.8).confirm(),
            Suggestion::run("Update package channels", "sudo nix-channel --update", 0.7),
        ],
        learn_more: Some(
            "Package names in NixOS can differ from other distributions, for example \
             google-chrome is packaged as google-chrome-stable."
                .to_string(),
        ),
    }
}

fn permission_denied(context: &ErrorContext) -> RecoveryPlan {
    let unprivileged = context
        .command
        .as_deref()
        .filter(|c| !c.trim_start().starts_with("sudo"));

    let (explanation, suggestions) = match unprivileged {
        Some(command) => (
            "This operation requires administrator privileges. It needs to run with sudo.",
            vec![Suggestion::run(
                "Run with administrator privileges",
                format!("sudo {}", command),
                0.95,
            )],
        ),
        None => (
            "This operation requires administrator privileges. Even with sudo, it was blocked.",
            vec![
                Suggestion::run("Check if you're in the right user group", "groups", 0.7),
                Suggestion::advice("Check file permissions", 0.6),
            ],
        ),
    };

    RecoveryPlan {
        error_type: ErrorType::PermissionDenied,
        explanation: explanation.to_string(),
        suggestions,
        learn_more: Some(
            "Some operations in NixOS require root privileges. Anything run with sudo \
             asks for confirmation first."
                .to_string(),
        ),
    }
}

fn network_error() -> RecoveryPlan {
    RecoveryPlan {
        error_type: ErrorType::NetworkError,
        explanation: "There seems to be a network issue: no connection, DNS trouble, a \
                      firewall in the way or the remote server being down."
            .to_string(),
        suggestions: vec![
            Suggestion::run("Check internet connection", "ping -c 3 nixos.org", 0.9),
            Suggestion::run("Check DNS resolution", "nslookup nixos.org", 0.8),
            Suggestion::run(
                "Restart network service",
                "sudo systemctl restart NetworkManager",
                0.7,
            ),
            Suggestion::advice("Try using a different DNS server", 0.6).confirm(),
        ],
        learn_more: Some(
            "Network issues can often be fixed by restarting NetworkManager or checking \
             your DNS settings."
                .to_string(),
        ),
    }
}

fn dependency_conflict(context: &ErrorContext) -> RecoveryPlan {
    let user_profile = context
        .command
        .as_deref()
        .map(|c| c.replacen("sudo ", "", 1));

    RecoveryPlan {
        error_type: ErrorType::DependencyConflict,
        explanation: "There's a conflict between packages: two packages need different \
                      versions of a dependency, or something already installed collides \
                      with the new package."
            .to_string(),
        suggestions: vec![
            Suggestion {
                action: "Try installing in a user profile instead".to_string(),
                command: user_profile,
                confidence: 0.8,
                requires_confirmation: true,
            },
            Suggestion::run("Check for conflicting packages", "nix-env -q", 0.7),
            Suggestion::advice("Use nix-shell for an isolated environment", 0.9),
            Suggestion::run("Garbage collect and retry", "nix-collect-garbage", 0.6),
        ],
        learn_more: Some(
            "NixOS prevents conflicts by keeping every package in its own store path. \
             nix-shell or a separate profile can isolate a problematic package."
                .to_string(),
        ),
    }
}

fn disk_space() -> RecoveryPlan {
    RecoveryPlan {
        error_type: ErrorType::DiskSpace,
        explanation: "You're running low on disk space. NixOS keeps old generations for \
                      rollback, and they can use significant space."
            .to_string(),
        suggestions: vec![
            Suggestion::run("Clean up old generations", "sudo nix-collect-garbage -d", 0.9),
            Suggestion::run("Check disk usage", "df -h", 0.95),
            Suggestion::run(
                "Remove old system profiles",
                "sudo nix-collect-garbage --delete-old",
                0.85,
            ),
            Suggestion::run(
                "Check what's using space",
                "du -sh /nix/store/* | sort -h | tail -20",
                0.7,
            ),
        ],
        learn_more: Some(
            "NixOS stores all packages in /nix/store. Running garbage collection \
             regularly keeps it in check."
                .to_string(),
        ),
    }
}

fn command_failed() -> RecoveryPlan {
    RecoveryPlan {
        error_type: ErrorType::CommandFailed,
        explanation: "The command didn't work as expected.".to_string(),
        suggestions: vec![
            Suggestion::advice("Check the exact error message", 0.8),
            Suggestion::advice("Try a simpler version of the command", 0.7).confirm(),
            Suggestion::advice("Look for alternative approaches", 0.6),
        ],
        learn_more: None,
    }
}

fn generic() -> RecoveryPlan {
    RecoveryPlan {
        error_type: ErrorType::Unknown,
        explanation: "Something went wrong, and the cause isn't clear. These general steps \
                      usually narrow it down."
            .to_string(),
        suggestions: vec![
            Suggestion::run("Check system logs", "journalctl -xe", 0.6),
            Suggestion::advice("Try the command with verbose output", 0.5).confirm(),
            Suggestion::advice("Search for this error online", 0.7),
        ],
        learn_more: Some(
            "The NixOS manual and community forums are good places to look up \
             unfamiliar errors."
                .to_string(),
        ),
    }
}
