//! intent_core - natural-language requests to safe NixOS actions
//!
//! Modules:
//! - types: Intent, Entity and engine tags shared by every layer
//! - lexicon: package, service, problem and setting vocabulary
//! - pattern_matcher: ordered regex rules (first, most trusted layer)
//! - fuzzy_matcher: keyword scoring with typo tolerance
//! - learning_store: corrections, learned patterns and synonyms
//! - persistence: key-value storage behind the learning store
//! - intent_engine: runs the layers in trust order
//! - command_builder: intent to NixOS command
//! - sandbox: validated, resource-bounded command execution
//! - redaction: log-safe rendering of command lines
//! - recovery: error classification and recovery plans
//! - pipeline: classify, plan, execute and recover in one place
//! - config: YAML application configuration
//! - structured_log: JSON event logging

pub mod structured_log;

pub mod types;
pub mod lexicon;
pub mod pattern_matcher;
pub mod fuzzy_matcher;
pub mod persistence;
pub mod learning_store;
pub mod intent_engine;
pub mod command_builder;
pub mod redaction;
pub mod sandbox;
pub mod recovery;
pub mod pipeline;
pub mod config;

/// Unique id with a readable prefix, e.g. `correction-6f1c…`.
pub fn make_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

// Re-export key types for convenience
pub use types::{Engine, Entity, EntityType, Intent, IntentAction, NlpResult};

pub use pattern_matcher::PatternMatcher;

pub use fuzzy_matcher::FuzzyMatcher;

pub use persistence::{JsonFileStore, KeyValueStore, MemoryStore};

pub use learning_store::{Correction, LearnedPattern, LearningExport, LearningStats, LearningStore};

pub use intent_engine::IntentEngine;

pub use command_builder::{plan_command, CommandPlan, PlanError};

pub use sandbox::{CommandSandbox, ExecutionResult, SandboxError, SandboxPolicy};

pub use redaction::sanitize_command;

pub use recovery::{CommonError, ErrorContext, ErrorType, RecoveryAdvisor, RecoveryPlan, Suggestion};

pub use pipeline::{Pipeline, RunReport};

pub use config::{AppConfig, ConfigError};
