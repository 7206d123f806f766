//! Intent to command mapping
//!
//! Turns a classified [`Intent`] into the NixOS command that carries it out.
//! Plans only describe the command; running it is the sandbox's job.

use serde::{Deserialize, Serialize};

use crate::lexicon::identify_problem;
use crate::types::{EntityType, Intent, IntentAction};

/// Verbs that change a unit's state and therefore need root.
const MUTATING_SERVICE_VERBS: &[&str] = &["start", "stop", "restart", "enable", "disable"];

const PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("fire-fox", "firefox"),
    ("vs-code", "vscode"),
    ("visual-studio-code", "vscode"),
    ("python", "python3"),
    ("node", "nodejs"),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("nothing to run for {action}: {hint}")]
    NothingToRun { action: IntentAction, hint: String },
    #[error("{action} needs a {entity} but none was recognised")]
    MissingEntity {
        action: IntentAction,
        entity: EntityType,
    },
    #[error("invalid package name: {0:?}")]
    InvalidPackageName(String),
    #[error("the request was not understood")]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPlan {
    pub command: String,
    pub args: Vec<String>,
    pub requires_sudo: bool,
    pub requires_confirmation: bool,
    pub needs_network: bool,
    pub description: String,
    /// Command that undoes this one, when there is one.
    pub rollback: Option<String>,
}

impl CommandPlan {
    fn new(command: &str, args: &[&str], description: String) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            requires_sudo: false,
            requires_confirmation: false,
            needs_network: false,
            description,
            rollback: None,
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn sudo(mut self) -> Self {
        self.requires_sudo = true;
        self.requires_confirmation = true;
        self
    }

    fn confirm(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    fn network(mut self) -> Self {
        self.needs_network = true;
        self
    }

    fn rollback(mut self, rollback: impl Into<String>) -> Self {
        self.rollback = Some(rollback.into());
        self
    }

    /// Program and arguments to hand to the sandbox. Privileged plans go
    /// through non-interactive sudo so they fail instead of prompting.
    pub fn argv(&self) -> (String, Vec<String>) {
        if self.requires_sudo {
            let mut args = vec!["-n".to_string(), self.command.clone()];
            args.extend(self.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (self.command.clone(), self.args.clone())
        }
    }

    /// The command as a user would type it.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        if self.requires_sudo {
            parts.push("sudo");
        }
        parts.push(self.command.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

/// Strip shell metacharacters and apply well-known renames.
pub fn sanitize_package_name(name: &str) -> Result<String, PlanError> {
    let cleaned: String = name
        .chars()
        .filter(|c| !";&|<>`$(){}[]\\'\"".contains(*c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if cleaned.is_empty() || cleaned.starts_with('-') {
        return Err(PlanError::InvalidPackageName(name.to_string()));
    }

    Ok(PACKAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == cleaned)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(cleaned))
}

pub fn plan_command(intent: &Intent) -> Result<CommandPlan, PlanError> {
    let action = intent.action;
    let required = |entity: EntityType| {
        intent
            .entity(entity)
            .filter(|v| !v.trim().is_empty())
            .ok_or(PlanError::MissingEntity { action, entity })
    };

    match action {
        IntentAction::InstallPackage => {
            let package = sanitize_package_name(required(EntityType::Package)?)?;
            Ok(CommandPlan::new("nix-env", &["-iA"], format!("Install {}", package))
                .arg(format!("nixpkgs.{}", package))
                .network()
                .rollback(format!("nix-env -e {}", package)))
        }
        IntentAction::RemovePackage => {
            let package = sanitize_package_name(required(EntityType::Package)?)?;
            Ok(CommandPlan::new("nix-env", &["-e"], format!("Remove {}", package))
                .arg(package)
                .confirm()
                .rollback("nix-env --rollback"))
        }
        IntentAction::UpdateSystem => Ok(CommandPlan::new(
            "nixos-rebuild",
            &["switch", "--upgrade"],
            "Update the system".to_string(),
        )
        .sudo()
        .network()
        .rollback("sudo nixos-rebuild switch --rollback")),
        IntentAction::SearchPackages => {
            let query = intent
                .entity(EntityType::Package)
                .or_else(|| intent.entity(EntityType::Topic))
                .filter(|v| !v.trim().is_empty())
                .ok_or(PlanError::MissingEntity {
                    action,
                    entity: EntityType::Package,
                })?;
            let query = sanitize_package_name(query)?;
            Ok(
                CommandPlan::new("nix", &["search", "nixpkgs"], format!("Search for {}", query))
                    .arg(query)
                    .network(),
            )
        }
        IntentAction::QueryInfo => Ok(plan_query(intent)),
        IntentAction::ServiceControl => {
            let service = required(EntityType::Service)?.to_string();
            let verb = intent.entity(EntityType::ActionVerb).unwrap_or("status");
            let plan = CommandPlan::new("systemctl", &[verb], format!("{} {}", verb, service))
                .arg(service);
            if MUTATING_SERVICE_VERBS.contains(&verb) {
                Ok(plan.sudo())
            } else {
                Ok(plan)
            }
        }
        IntentAction::Troubleshoot => {
            let problem = intent
                .entity(EntityType::Problem)
                .unwrap_or_else(|| identify_problem(&intent.raw_input));
            Ok(plan_diagnosis(problem))
        }
        IntentAction::GetHelp => Err(PlanError::NothingToRun {
            action,
            hint: "see https://nixos.org/manual/nixos/stable/ or ask a more specific question"
                .to_string(),
        }),
        IntentAction::Configure => Err(PlanError::NothingToRun {
            action,
            hint: "settings live in /etc/nixos/configuration.nix; edit it and run \
                   sudo nixos-rebuild switch"
                .to_string(),
        }),
        IntentAction::Unknown => Err(PlanError::Unknown),
    }
}

fn plan_query(intent: &Intent) -> CommandPlan {
    let subjects: Vec<&str> = intent
        .entities
        .iter()
        .filter(|e| e.entity_type == EntityType::QuerySubject)
        .map(|e| e.value.as_str())
        .collect();
    let mentions = |words: &[&str]| subjects.iter().any(|s| words.iter().any(|w| s.contains(w)));

    if mentions(&["disk", "space", "storage"]) {
        CommandPlan::new("df", &["-h"], "Show disk usage".to_string())
    } else if mentions(&["memory", "ram"]) {
        CommandPlan::new("free", &["-h"], "Show memory usage".to_string())
    } else if mentions(&["cpu", "load"]) {
        CommandPlan::new("uptime", &[], "Show system load".to_string())
    } else if mentions(&["error"]) {
        CommandPlan::new(
            "journalctl",
            &["-p", "err", "-n", "50", "--no-pager"],
            "Show recent errors".to_string(),
        )
    } else if mentions(&["log"]) {
        CommandPlan::new(
            "journalctl",
            &["-n", "50", "--no-pager"],
            "Show recent logs".to_string(),
        )
    } else {
        CommandPlan::new("nix-env", &["-q"], "List installed packages".to_string())
    }
}

fn plan_diagnosis(problem: &str) -> CommandPlan {
    match problem {
        "network" => CommandPlan::new(
            "nmcli",
            &["general", "status"],
            "Check network status".to_string(),
        ),
        "audio" => CommandPlan::new(
            "wpctl",
            &["status"],
            "Check audio devices".to_string(),
        ),
        "display" => CommandPlan::new(
            "xrandr",
            &["--query"],
            "List connected displays".to_string(),
        ),
        "print" => CommandPlan::new(
            "systemctl",
            &["status", "cups"],
            "Check the print service".to_string(),
        ),
        "bluetooth" => CommandPlan::new(
            "systemctl",
            &["status", "bluetooth"],
            "Check the bluetooth service".to_string(),
        ),
        "performance" => CommandPlan::new(
            "top",
            &["-b", "-n", "1"],
            "Show what is using the system".to_string(),
        ),
        _ => CommandPlan::new(
            "journalctl",
            &["-p", "err", "-b", "-n", "50", "--no-pager"],
            "Show errors since boot".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Engine, Entity};

    fn intent(action: IntentAction, entities: &[(EntityType, &str)]) -> Intent {
        Intent {
            action,
            entities: entities
                .iter()
                .map(|(t, v)| Entity::new(*t, *v, 0.9))
                .collect(),
            confidence: 0.99,
            raw_input: String::new(),
            source: Engine::RuleBased,
        }
    }

    #[test]
    fn test_install_plan() {
        let plan = plan_command(&intent(IntentAction::InstallPackage, &[(EntityType::Package, "firefox")])).unwrap();
        assert_eq!(plan.command_line(), "nix-env -iA nixpkgs.firefox");
        assert!(!plan.requires_sudo);
        assert!(plan.needs_network);
        assert_eq!(plan.rollback.as_deref(), Some("nix-env -e firefox"));
    }

    #[test]
    fn test_remove_requires_confirmation() {
        let plan = plan_command(&intent(IntentAction::RemovePackage, &[(EntityType::Package, "vlc")])).unwrap();
        assert_eq!(plan.command_line(), "nix-env -e vlc");
        assert!(plan.requires_confirmation);
    }

    #[test]
    fn test_update_goes_through_sudo() {
        let plan = plan_command(&intent(IntentAction::UpdateSystem, &[])).unwrap();
        assert_eq!(plan.command_line(), "sudo nixos-rebuild switch --upgrade");
        let (program, args) = plan.argv();
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["-n", "nixos-rebuild", "switch", "--upgrade"]);
    }

    #[test]
    fn test_service_verbs() {
        let status = plan_command(&intent(
            IntentAction::ServiceControl,
            &[(EntityType::Service, "sshd"), (EntityType::ActionVerb, "status")],
        ))
        .unwrap();
        assert_eq!(status.command_line(), "systemctl status sshd");
        assert!(!status.requires_sudo);

        let restart = plan_command(&intent(
            IntentAction::ServiceControl,
            &[(EntityType::Service, "NetworkManager"), (EntityType::ActionVerb, "restart")],
        ))
        .unwrap();
        assert_eq!(restart.command_line(), "sudo systemctl restart NetworkManager");
        assert!(restart.requires_confirmation);
    }

    #[test]
    fn test_query_subjects() {
        let disk = plan_command(&intent(IntentAction::QueryInfo, &[(EntityType::QuerySubject, "disk")])).unwrap();
        assert_eq!(disk.command_line(), "df -h");
        let logs = plan_command(&intent(
            IntentAction::QueryInfo,
            &[(EntityType::QuerySubject, "logs"), (EntityType::QuerySubject, "errors")],
        ))
        .unwrap();
        assert!(logs.args.contains(&"err".to_string()));
        let other = plan_command(&intent(IntentAction::QueryInfo, &[])).unwrap();
        assert_eq!(other.command_line(), "nix-env -q");
    }

    #[test]
    fn test_nothing_to_run() {
        let err = plan_command(&intent(IntentAction::Configure, &[(EntityType::Setting, "theme")])).unwrap_err();
        assert!(matches!(err, PlanError::NothingToRun { action: IntentAction::Configure, .. }));
        assert_eq!(plan_command(&intent(IntentAction::Unknown, &[])).unwrap_err(), PlanError::Unknown);
    }

    #[test]
    fn test_missing_package() {
        let err = plan_command(&intent(IntentAction::InstallPackage, &[])).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingEntity {
                action: IntentAction::InstallPackage,
                entity: EntityType::Package
            }
        );
    }

    #[test]
    fn test_package_sanitization() {
        assert_eq!(sanitize_package_name("Fire Fox").unwrap(), "firefox");
        assert_eq!(sanitize_package_name("vlc; reboot").unwrap(), "vlc-reboot");
        assert_eq!(sanitize_package_name("node").unwrap(), "nodejs");
        assert!(sanitize_package_name("$()").is_err());
        assert!(sanitize_package_name("--help").is_err());
    }

    #[test]
    fn test_diagnosis_is_read_only() {
        let plan = plan_command(&intent(IntentAction::Troubleshoot, &[(EntityType::Problem, "network")])).unwrap();
        assert_eq!(plan.command_line(), "nmcli general status");
        assert!(!plan.requires_sudo);
        assert!(!plan.requires_confirmation);
    }
}
