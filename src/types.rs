//! Core intent types shared by every classification layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the user asked the system to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    InstallPackage,
    RemovePackage,
    UpdateSystem,
    SearchPackages,
    GetHelp,
    Troubleshoot,
    QueryInfo,
    Configure,
    ServiceControl,
    Unknown,
}

impl IntentAction {
    /// Every action except `Unknown`, in declaration order.
    pub const KNOWN: [IntentAction; 9] = [
        IntentAction::InstallPackage,
        IntentAction::RemovePackage,
        IntentAction::UpdateSystem,
        IntentAction::SearchPackages,
        IntentAction::GetHelp,
        IntentAction::Troubleshoot,
        IntentAction::QueryInfo,
        IntentAction::Configure,
        IntentAction::ServiceControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentAction::InstallPackage => "install_package",
            IntentAction::RemovePackage => "remove_package",
            IntentAction::UpdateSystem => "update_system",
            IntentAction::SearchPackages => "search_packages",
            IntentAction::GetHelp => "get_help",
            IntentAction::Troubleshoot => "troubleshoot",
            IntentAction::QueryInfo => "query_info",
            IntentAction::Configure => "configure",
            IntentAction::ServiceControl => "service_control",
            IntentAction::Unknown => "unknown",
        }
    }

    /// Actions whose primary entity is a package name.
    pub fn targets_package(&self) -> bool {
        matches!(self, IntentAction::InstallPackage | IntentAction::RemovePackage)
    }
}

impl fmt::Display for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentAction {
    type Err = String;

    /// Accepts the snake_case names plus the short forms a person would type
    /// on the command line ("install", "remove", "service").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "install_package" | "install" => IntentAction::InstallPackage,
            "remove_package" | "remove" | "uninstall" => IntentAction::RemovePackage,
            "update_system" | "update" | "upgrade" => IntentAction::UpdateSystem,
            "search_packages" | "search" => IntentAction::SearchPackages,
            "get_help" | "help" => IntentAction::GetHelp,
            "troubleshoot" | "fix" => IntentAction::Troubleshoot,
            "query_info" | "query" => IntentAction::QueryInfo,
            "configure" | "config" => IntentAction::Configure,
            "service_control" | "service" => IntentAction::ServiceControl,
            "unknown" => IntentAction::Unknown,
            other => return Err(format!("unknown intent action: {}", other)),
        };
        Ok(action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Package,
    Service,
    ActionVerb,
    QuerySubject,
    Timeframe,
    Setting,
    Problem,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Package => "package",
            EntityType::Service => "service",
            EntityType::ActionVerb => "action_verb",
            EntityType::QuerySubject => "query_subject",
            EntityType::Timeframe => "timeframe",
            EntityType::Setting => "setting",
            EntityType::Problem => "problem",
            EntityType::Topic => "topic",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    pub confidence: f64,
}

impl Entity {
    pub fn new(entity_type: EntityType, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            entity_type,
            value: value.into(),
            confidence,
        }
    }
}

/// Classification layer that produced an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    RuleBased,
    Statistical,
    Learned,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::RuleBased => "rule-based",
            Engine::Statistical => "statistical",
            Engine::Learned => "learned",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: IntentAction,
    pub entities: Vec<Entity>,
    pub confidence: f64,
    pub raw_input: String,
    pub source: Engine,
}

impl Intent {
    pub fn unknown(raw_input: impl Into<String>, source: Engine) -> Self {
        Self {
            action: IntentAction::Unknown,
            entities: Vec::new(),
            confidence: 0.0,
            raw_input: raw_input.into(),
            source,
        }
    }

    /// First entity of the given type.
    pub fn entity(&self, entity_type: EntityType) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.entity_type == entity_type)
            .map(|e| e.value.as_str())
    }

    pub fn is_unknown(&self) -> bool {
        self.action == IntentAction::Unknown
    }
}

/// Orchestrator output: the winning intent plus timing and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpResult {
    #[serde(flatten)]
    pub intent: Intent,
    pub processing_time_ms: f64,
    pub engine: Engine,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serializes_snake_case() {
        let json = serde_json::to_string(&IntentAction::InstallPackage).unwrap();
        assert_eq!(json, "\"install_package\"");
        let back: IntentAction = serde_json::from_str("\"service_control\"").unwrap();
        assert_eq!(back, IntentAction::ServiceControl);
    }

    #[test]
    fn test_action_short_names() {
        assert_eq!("install".parse::<IntentAction>().unwrap(), IntentAction::InstallPackage);
        assert_eq!("query-info".parse::<IntentAction>().unwrap(), IntentAction::QueryInfo);
        assert!("dance".parse::<IntentAction>().is_err());
    }

    #[test]
    fn test_engine_tags() {
        assert_eq!(serde_json::to_string(&Engine::RuleBased).unwrap(), "\"rule-based\"");
        assert_eq!(Engine::Learned.to_string(), "learned");
    }

    #[test]
    fn test_nlp_result_flattens_intent() {
        let result = NlpResult {
            intent: Intent {
                action: IntentAction::InstallPackage,
                entities: vec![Entity::new(EntityType::Package, "firefox", 0.9)],
                confidence: 0.99,
                raw_input: "install firefox".to_string(),
                source: Engine::RuleBased,
            },
            processing_time_ms: 0.2,
            engine: Engine::RuleBased,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["action"], "install_package");
        assert_eq!(value["entities"][0]["type"], "package");
        assert_eq!(value["engine"], "rule-based");
    }
}
