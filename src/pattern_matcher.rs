//! Rule-based intent layer
//!
//! An ordered table of regular expressions anchored at the start of the
//! input; rules for fixed phrases may leave trailing words unmatched. The
//! first rule that matches decides the action; its extraction rule pulls
//! entities out of the capture groups. Confidence starts at the rule's base value and is
//! nudged by a few surface signals of the input.

use regex::Regex;
use serde_json::json;

use crate::lexicon::{
    identify_problem, identify_setting, normalize_package_name, normalize_service_name,
    service_verb,
};
use crate::slog_debug;
use crate::types::{Engine, Entity, EntityType, Intent, IntentAction};

const WHOLE_INPUT_BONUS: f64 = 0.1;
const DIRECT_PHRASING_BONUS: f64 = 0.05;
const TYPO_PENALTY: f64 = 0.1;
const RULE_ENTITY_CONFIDENCE: f64 = 0.9;

/// How a rule turns its captures into entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extraction {
    Bare,
    Package,
    Service,
    Topic,
    Problem,
    Subject,
    Logs,
    Setting,
}

struct Pattern {
    regex: Regex,
    action: IntentAction,
    extraction: Extraction,
    base_confidence: f64,
}

fn rule(pattern: &str, action: IntentAction, extraction: Extraction, base: f64) -> Pattern {
    Pattern {
        regex: Regex::new(pattern).unwrap(),
        action,
        extraction,
        base_confidence: base,
    }
}

lazy_static::lazy_static! {
    static ref PATTERNS: Vec<Pattern> = {
        use Extraction::*;
        use IntentAction::*;
        vec![
            rule(r"^install\s+(.+)$", InstallPackage, Package, 0.99),
            rule(r"^get\s+rid\s+of\s+(.+)$", RemovePackage, Package, 0.95),
            rule(r"^(?:get|add|download)\s+(.+)$", InstallPackage, Package, 0.95),
            rule(r"^i\s+(?:need|want)\s+(?:to\s+install\s+)?(.+)$", InstallPackage, Package, 0.92),
            rule(
                r"^(?:can\s+you|could\s+you|would\s+you|please)\s+(?:please\s+)?(?:install|add|get)\s+(.+)$",
                InstallPackage,
                Package,
                0.90,
            ),
            rule(r"^(?:remove|uninstall|delete)\s+(.+)$", RemovePackage, Package, 0.99),
            rule(
                r"^update(?:\s+(?:the\s+|my\s+)?(?:system|everything|all|computer))?\b",
                UpdateSystem,
                Bare,
                0.99,
            ),
            rule(
                r"^(?:upgrade|refresh)(?:\s+(?:the\s+|my\s+)?(?:system|everything|all|computer))?\b",
                UpdateSystem,
                Bare,
                0.95,
            ),
            rule(r"^(?:search(?:\s+for)?|find|look\s+for)\s+(.+)$", SearchPackages, Subject, 0.99),
            rule(
                r"^what\s+(?:packages?|programs?|apps?)\s+(?:are\s+there\s+)?(?:for|to)\s+(.+)$",
                SearchPackages,
                Subject,
                0.92,
            ),
            rule(
                r"^(?:start|stop|restart|enable|disable)\s+(?:the\s+|my\s+)?(.+?)(?:\s+service)?$",
                ServiceControl,
                Service,
                0.95,
            ),
            rule(
                r"^(?:is|check\s+if)\s+(?:the\s+|my\s+)?(.+?)\s+(?:service\s+)?(?:running|active|up)$",
                ServiceControl,
                Service,
                0.95,
            ),
            rule(r"^help(?:\s+me)?(?:\s+with)?\s*(.*)$", GetHelp, Topic, 0.99),
            rule(r"^(?:how\s+do\s+i|how\s+to|how\s+can\s+i)\s+(.+)$", GetHelp, Topic, 0.95),
            rule(
                r"^(?:my\s+)?(.+?)\s+(?:is\s+)?(?:not\s+working|broken|isn't\s+working|isnt\s+working|doesn't\s+work|stopped\s+working|keeps\s+crashing)$",
                Troubleshoot,
                Problem,
                0.95,
            ),
            rule(r"^(?:fix|repair|troubleshoot)\s+(?:my\s+|the\s+)?(.+)$", Troubleshoot, Problem, 0.92),
            rule(
                r"^(?:no|lost)\s+(?:internet|network|wifi|connection)(?:\s+connection)?\b",
                Troubleshoot,
                Problem,
                0.90,
            ),
            rule(r"^(?:disk|memory|cpu)\s+(?:usage|space)\b", QueryInfo, Subject, 0.99),
            rule(
                r"^(?:show|check|view)\s+(?:me\s+)?(?:the\s+)?(?:recent\s+|latest\s+)?(?:system\s+)?(?:logs?|errors?)\b",
                QueryInfo,
                Logs,
                0.90,
            ),
            rule(r"^(?:show|list|what)\s+(?:is|are|me)\s+(?:my\s+|the\s+)?(.+)$", QueryInfo, Subject, 0.95),
            rule(r"^list\s+(?:my\s+|all\s+)?(.+)$", QueryInfo, Subject, 0.92),
            rule(
                r"^(?:make|set)\s+(?:the\s+)?(?:text|font)(?:\s+size)?\s+(bigger|larger|smaller)\b",
                Configure,
                Setting,
                0.90,
            ),
            rule(r"^(?:change|adjust|configure|set\s+up)\s+(?:the\s+|my\s+)?(.+)$", Configure, Setting, 0.90),
        ]
    };
    static ref POLITENESS: Regex =
        Regex::new(r"\b(?:please|pls|could\s+you|can\s+you|would\s+you)\b").unwrap();
    static ref TYPO_LEXICON: Regex = Regex::new(r"\b(?:teh|hte|taht|becuase|recieve)\b").unwrap();
}

/// Deterministic first classification layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl PatternMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn rule_count(&self) -> usize {
        PATTERNS.len()
    }

    /// Classify already-normalised text. Returns an `unknown` intent with
    /// zero confidence when no rule applies.
    pub fn classify(&self, normalized: &str) -> Intent {
        for (index, pattern) in PATTERNS.iter().enumerate() {
            let Some(caps) = pattern.regex.captures(normalized) else {
                continue;
            };

            let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let capture = caps
                .iter()
                .skip(1)
                .flatten()
                .last()
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty());

            let confidence = adjust_confidence(pattern.base_confidence, normalized, matched);
            let entities = extract_entities(pattern.extraction, normalized, capture);

            slog_debug!(
                "PATTERN",
                "rule_matched",
                json!({
                    "rule": index,
                    "action": pattern.action.as_str(),
                    "confidence": confidence,
                })
            );

            return Intent {
                action: pattern.action,
                entities,
                confidence,
                raw_input: normalized.to_string(),
                source: Engine::RuleBased,
            };
        }

        Intent::unknown(normalized, Engine::RuleBased)
    }
}

fn adjust_confidence(base: f64, input: &str, matched: &str) -> f64 {
    let mut confidence = base;
    if matched == input {
        confidence += WHOLE_INPUT_BONUS;
    }
    if !POLITENESS.is_match(input) {
        confidence += DIRECT_PHRASING_BONUS;
    }
    if TYPO_LEXICON.is_match(input) {
        confidence -= TYPO_PENALTY;
    }
    confidence.clamp(0.0, 1.0)
}

fn extract_entities(extraction: Extraction, input: &str, capture: Option<&str>) -> Vec<Entity> {
    let entity = |entity_type, value: String| Entity::new(entity_type, value, RULE_ENTITY_CONFIDENCE);

    match extraction {
        Extraction::Bare => Vec::new(),
        Extraction::Package => capture
            .map(normalize_package_name)
            .filter(|name| !name.is_empty())
            .map(|name| vec![entity(EntityType::Package, name)])
            .unwrap_or_default(),
        Extraction::Service => {
            let mut entities = Vec::new();
            if let Some(name) = capture {
                entities.push(entity(EntityType::Service, normalize_service_name(name)));
            }
            entities.push(entity(EntityType::ActionVerb, service_verb(input).to_string()));
            entities
        }
        Extraction::Topic => capture
            .map(|topic| vec![entity(EntityType::Topic, topic.to_string())])
            .unwrap_or_default(),
        Extraction::Problem => {
            let area = identify_problem(capture.unwrap_or(input));
            vec![entity(EntityType::Problem, area.to_string())]
        }
        Extraction::Subject => {
            let subject = capture
                .or_else(|| input.split_whitespace().next())
                .unwrap_or(input);
            vec![entity(EntityType::QuerySubject, subject.to_string())]
        }
        Extraction::Logs => {
            let mut entities = vec![entity(EntityType::QuerySubject, "logs".to_string())];
            if input.contains("recent") || input.contains("latest") {
                entities.push(entity(EntityType::Timeframe, "recent".to_string()));
            }
            if input.contains("error") {
                entities.push(entity(EntityType::QuerySubject, "errors".to_string()));
            }
            entities
        }
        Extraction::Setting => vec![entity(EntityType::Setting, identify_setting(input).to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_firefox() {
        let intent = PatternMatcher::new().classify("install firefox");
        assert_eq!(intent.action, IntentAction::InstallPackage);
        assert_eq!(intent.entity(EntityType::Package), Some("firefox"));
        assert!(intent.confidence >= 0.99);
        assert_eq!(intent.source, Engine::RuleBased);
    }

    #[test]
    fn test_get_rid_of_is_removal() {
        let intent = PatternMatcher::new().classify("get rid of vlc");
        assert_eq!(intent.action, IntentAction::RemovePackage);
        assert_eq!(intent.entity(EntityType::Package), Some("vlc"));
    }

    #[test]
    fn test_package_phrase_is_normalized() {
        let intent = PatternMatcher::new().classify("i need a web browser");
        assert_eq!(intent.action, IntentAction::InstallPackage);
        assert_eq!(intent.entity(EntityType::Package), Some("firefox"));
    }

    #[test]
    fn test_troubleshoot_wifi() {
        let intent = PatternMatcher::new().classify("my wifi isn't working");
        assert_eq!(intent.action, IntentAction::Troubleshoot);
        assert_eq!(intent.entity(EntityType::Problem), Some("network"));
    }

    #[test]
    fn test_service_control() {
        let intent = PatternMatcher::new().classify("restart sound");
        assert_eq!(intent.action, IntentAction::ServiceControl);
        assert_eq!(intent.entity(EntityType::Service), Some("pipewire"));
        assert_eq!(intent.entity(EntityType::ActionVerb), Some("restart"));

        let intent = PatternMatcher::new().classify("is ssh running");
        assert_eq!(intent.entity(EntityType::Service), Some("sshd"));
        assert_eq!(intent.entity(EntityType::ActionVerb), Some("status"));
    }

    #[test]
    fn test_update_and_query() {
        let matcher = PatternMatcher::new();
        assert_eq!(matcher.classify("update").action, IntentAction::UpdateSystem);
        assert_eq!(matcher.classify("upgrade everything").action, IntentAction::UpdateSystem);

        let intent = matcher.classify("disk usage");
        assert_eq!(intent.action, IntentAction::QueryInfo);
        assert_eq!(intent.entity(EntityType::QuerySubject), Some("disk"));

        let intent = matcher.classify("show recent logs");
        assert_eq!(intent.entity(EntityType::Timeframe), Some("recent"));
    }

    #[test]
    fn test_configure_font() {
        let intent = PatternMatcher::new().classify("make the text bigger");
        assert_eq!(intent.action, IntentAction::Configure);
        assert_eq!(intent.entity(EntityType::Setting), Some("font-size-increase"));
    }

    #[test]
    fn test_help_topic() {
        let intent = PatternMatcher::new().classify("help me with printing");
        assert_eq!(intent.action, IntentAction::GetHelp);
        assert_eq!(intent.entity(EntityType::Topic), Some("printing"));
    }

    #[test]
    fn test_no_match_is_unknown() {
        let intent = PatternMatcher::new().classify("instal fyrefox");
        assert_eq!(intent.action, IntentAction::Unknown);
        assert_eq!(intent.confidence, 0.0);
        assert!(intent.entities.is_empty());
    }

    #[test]
    fn test_typo_lexicon_lowers_confidence() {
        let matcher = PatternMatcher::new();
        let clean = matcher.classify("can you install firefox");
        let typo = matcher.classify("can you install teh firefox");
        assert_eq!(clean.action, typo.action);
        assert!(typo.confidence < clean.confidence);
        assert!((typo.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_partial_match_gets_no_whole_input_bonus() {
        let matcher = PatternMatcher::new();
        let whole = matcher.classify("make the text bigger");
        let partial = matcher.classify("make the text bigger for me");
        assert_eq!(partial.action, IntentAction::Configure);
        assert_eq!(partial.entity(EntityType::Setting), Some("font-size-increase"));
        assert!((whole.confidence - 1.0).abs() < 1e-9);
        assert!((partial.confidence - 0.95).abs() < 1e-9);

        let partial = matcher.classify("no internet since this morning");
        assert_eq!(partial.action, IntentAction::Troubleshoot);
        assert!((partial.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let matcher = PatternMatcher::new();
        for input in ["install firefox", "update", "disk usage", "remove vim"] {
            let intent = matcher.classify(input);
            assert!(intent.confidence <= 1.0 && intent.confidence >= 0.0);
        }
    }

    #[test]
    fn test_deterministic() {
        let matcher = PatternMatcher::new();
        let first = matcher.classify("search for photo editor");
        for _ in 0..5 {
            assert_eq!(matcher.classify("search for photo editor"), first);
        }
    }
}
