//! End-to-end request handling
//!
//! `Pipeline` owns one of each component and wires them together:
//! text is classified, the intent is planned into a command, the command
//! runs in the sandbox, and any failure along the way comes back with a
//! recovery plan.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::command_builder::{plan_command, CommandPlan, PlanError};
use crate::intent_engine::IntentEngine;
use crate::learning_store::{Correction, LearningStats, LearningStore};
use crate::persistence::KeyValueStore;
use crate::redaction::redact_text;
use crate::recovery::{CommonError, ErrorContext, ErrorType, RecoveryAdvisor, RecoveryPlan};
use crate::sandbox::{CommandSandbox, ExecutionResult, SandboxError, SandboxPolicy};
use crate::types::{Intent, NlpResult};
use crate::{slog_info, slog_warn};

/// What happened when an intent was carried out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub intent: Intent,
    pub plan: Option<CommandPlan>,
    pub result: Option<ExecutionResult>,
    /// Present whenever the run did not succeed.
    pub recovery: Option<RecoveryPlan>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.recovery.is_none() && self.result.as_ref().is_some_and(|r| r.success)
    }
}

pub struct Pipeline<S: KeyValueStore> {
    engine: IntentEngine<S>,
    learning: Arc<LearningStore<S>>,
    sandbox: CommandSandbox,
    advisor: RecoveryAdvisor,
    policy: SandboxPolicy,
}

impl<S: KeyValueStore> Pipeline<S> {
    pub fn new(learning: LearningStore<S>, policy: SandboxPolicy) -> Self {
        let learning = Arc::new(learning);
        Self {
            engine: IntentEngine::new(Arc::clone(&learning)),
            learning,
            sandbox: CommandSandbox::new(),
            advisor: RecoveryAdvisor::new(),
            policy,
        }
    }

    /// Pipeline whose learning store is primed from `backend`.
    pub async fn open(backend: S, policy: SandboxPolicy) -> Self {
        Self::new(LearningStore::load(backend).await, policy)
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn sandbox(&self) -> &CommandSandbox {
        &self.sandbox
    }

    pub fn learning(&self) -> &LearningStore<S> {
        &self.learning
    }

    pub fn process_input(&self, text: &str) -> NlpResult {
        self.engine.process_input(text)
    }

    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        policy: &SandboxPolicy,
    ) -> Result<ExecutionResult, SandboxError> {
        self.sandbox.execute(command, args, policy).await
    }

    /// Plan `intent`, run the plan in the sandbox and attach a recovery plan
    /// to any failure.
    pub async fn run_intent(&self, intent: &Intent) -> RunReport {
        let mut report = RunReport {
            intent: intent.clone(),
            plan: None,
            result: None,
            recovery: None,
        };

        let plan = match plan_command(intent) {
            Ok(plan) => plan,
            Err(e) => {
                slog_info!(
                    "PIPELINE",
                    "no_plan",
                    json!({ "action": intent.action.as_str(), "reason": e.to_string() })
                );
                report.recovery = Some(self.advisor.analyze_error(plan_error_context(&e, intent)));
                return report;
            }
        };

        let mut policy = self.policy.clone();
        policy.allow_network |= plan.needs_network;

        let (program, args) = plan.argv();
        let context = |message: String| {
            ErrorContext::new(redact_text(&message))
                .with_command(plan.command_line())
                .with_user_input(intent.raw_input.clone())
        };

        match self.sandbox.execute(&program, &args, &policy).await {
            Ok(result) => {
                if !result.success {
                    report.recovery = Some(self.advisor.analyze_error(context(failure_message(&result))));
                }
                report.result = Some(result);
            }
            Err(e) => {
                slog_warn!(
                    "PIPELINE",
                    "execution_refused",
                    json!({ "action": intent.action.as_str(), "reason": e.to_string() })
                );
                report.recovery = Some(self.advisor.analyze_error(context(e.to_string())));
            }
        }

        report.plan = Some(plan);
        report
    }

    pub fn analyze_error(&self, context: ErrorContext) -> RecoveryPlan {
        self.advisor.analyze_error(context)
    }

    pub fn record_successful_recovery(&self, error_type: ErrorType, action: &str) {
        self.advisor.record_successful_recovery(error_type, action)
    }

    pub async fn record_correction(
        &self,
        original_input: &str,
        recognized: &Intent,
        corrected: &Intent,
        accepted: bool,
    ) -> Correction {
        self.learning
            .record_correction(original_input, recognized, corrected, accepted)
            .await
    }

    pub fn get_suggestions(&self, partial: &str) -> Vec<String> {
        self.learning.get_suggestions(partial)
    }

    pub fn learning_stats(&self) -> LearningStats {
        self.learning.get_stats()
    }

    pub fn common_errors(&self) -> Vec<CommonError> {
        self.advisor.get_common_errors()
    }
}

fn plan_error_context(error: &PlanError, intent: &Intent) -> ErrorContext {
    let context = ErrorContext::new(error.to_string()).with_user_input(intent.raw_input.clone());
    match error {
        PlanError::Unknown | PlanError::NothingToRun { .. } => context.with_type(ErrorType::Unknown),
        PlanError::MissingEntity { .. } | PlanError::InvalidPackageName(_) => {
            context.with_type(ErrorType::PackageNotFound)
        }
    }
}

fn failure_message(result: &ExecutionResult) -> String {
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match (result.exit_code, result.signal) {
        (Some(code), _) => format!("command failed with exit code {}", code),
        (None, Some(signal)) => format!("command failed: killed by signal {}", signal),
        (None, None) => "command failed".to_string(),
    }
}
