//! Intent orchestration
//!
//! Runs the layers in trust order: rules, then statistics, then what this
//! installation has learned. The first layer that is confident enough
//! answers; otherwise the strongest candidate wins.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::fuzzy_matcher::FuzzyMatcher;
use crate::learning_store::LearningStore;
use crate::pattern_matcher::PatternMatcher;
use crate::persistence::KeyValueStore;
use crate::slog_info;
use crate::types::{Engine, Intent, NlpResult};

/// Rule results above this are returned without consulting other layers.
pub const RULE_FAST_PATH: f64 = 0.95;
/// Statistical results above this skip the learning layer.
pub const STATISTICAL_ACCEPT: f64 = 0.85;

/// Lowercase, trim, collapse whitespace, straighten typographic quotes and
/// drop trailing sentence punctuation.
pub fn normalize_input(text: &str) -> String {
    let straightened: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' | '`' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect();

    straightened
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['?', '!', '.', ','])
        .trim_end()
        .to_string()
}

pub struct IntentEngine<S: KeyValueStore> {
    patterns: PatternMatcher,
    fuzzy: FuzzyMatcher,
    learning: Arc<LearningStore<S>>,
}

impl<S: KeyValueStore> IntentEngine<S> {
    pub fn new(learning: Arc<LearningStore<S>>) -> Self {
        Self {
            patterns: PatternMatcher::new(),
            fuzzy: FuzzyMatcher::new(),
            learning,
        }
    }

    pub fn learning(&self) -> &Arc<LearningStore<S>> {
        &self.learning
    }

    pub fn process_input(&self, text: &str) -> NlpResult {
        let started = Instant::now();
        let normalized = normalize_input(text);

        let (mut intent, engine) = self.resolve(&normalized);
        intent.raw_input = text.to_string();

        let result = NlpResult {
            intent,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            engine,
        };

        slog_info!(
            "ENGINE",
            "classified",
            json!({
                "action": result.intent.action.as_str(),
                "confidence": result.intent.confidence,
                "engine": engine.as_str(),
                "elapsed_ms": result.processing_time_ms,
            })
        );

        result
    }

    /// A learned intent only has to beat the statistical result; a rule
    /// result below the fast-path threshold is used only when nothing was
    /// learned for the input and it outscores statistics.
    fn resolve(&self, normalized: &str) -> (Intent, Engine) {
        let rule = self.patterns.classify(normalized);
        if rule.confidence > RULE_FAST_PATH {
            return (rule, Engine::RuleBased);
        }

        let statistical = self.fuzzy.classify(normalized);
        if statistical.confidence > STATISTICAL_ACCEPT {
            return (statistical, Engine::Statistical);
        }

        match self.learning.check_learned_pattern(normalized) {
            Some(learned) if learned.confidence > statistical.confidence => (learned, Engine::Learned),
            Some(_) => (statistical, Engine::Statistical),
            None if rule.confidence >= statistical.confidence => (rule, Engine::RuleBased),
            None => (statistical, Engine::Statistical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::types::{Entity, EntityType, IntentAction};

    fn engine() -> IntentEngine<MemoryStore> {
        IntentEngine::new(Arc::new(LearningStore::new(MemoryStore::new())))
    }

    #[test]
    fn test_normalize_input() {
        assert_eq!(normalize_input("  Install   Firefox?! "), "install firefox");
        assert_eq!(normalize_input("my wifi isn\u{2019}t working"), "my wifi isn't working");
    }

    #[test]
    fn test_rule_fast_path() {
        let result = engine().process_input("Install Firefox");
        assert_eq!(result.engine, Engine::RuleBased);
        assert_eq!(result.intent.action, IntentAction::InstallPackage);
        assert_eq!(result.intent.entity(EntityType::Package), Some("firefox"));
        assert_eq!(result.intent.raw_input, "Install Firefox");
        assert!(result.processing_time_ms >= 0.0);
    }

    #[test]
    fn test_statistical_fallback() {
        let result = engine().process_input("instal fyrefox");
        assert_eq!(result.engine, Engine::Statistical);
        assert_eq!(result.intent.action, IntentAction::InstallPackage);
        assert!(result.intent.confidence <= 0.9);
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        let result = engine().process_input("zebra");
        assert_eq!(result.intent.action, IntentAction::Unknown);
        assert_eq!(result.intent.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_learned_layer_wins_over_weak_statistics() {
        let engine = engine();
        let corrected = Intent {
            action: IntentAction::InstallPackage,
            entities: vec![Entity::new(EntityType::Package, "firefox", 1.0)],
            confidence: 1.0,
            raw_input: "gimme fyrefox".to_string(),
            source: Engine::Learned,
        };
        let first = engine.process_input("gimme fyrefox");
        engine
            .learning()
            .record_correction("gimme fyrefox", &first.intent, &corrected, true)
            .await;

        let result = engine.process_input("gimme fyrefox");
        assert_eq!(result.engine, Engine::Learned);
        assert_eq!(result.intent.action, IntentAction::InstallPackage);
        assert_eq!(result.intent.entity(EntityType::Package), Some("firefox"));
    }

    #[tokio::test]
    async fn test_learned_intent_beats_sub_threshold_rule() {
        let engine = engine();
        let input = "make the text bigger for me";
        let first = engine.process_input(input);
        assert_eq!(first.engine, Engine::RuleBased);
        assert!(first.intent.confidence <= RULE_FAST_PATH);

        let corrected = Intent {
            action: IntentAction::GetHelp,
            entities: vec![Entity::new(EntityType::Topic, "accessibility", 1.0)],
            confidence: 1.0,
            raw_input: input.to_string(),
            source: Engine::Learned,
        };
        for _ in 0..6 {
            engine
                .learning()
                .record_correction(input, &first.intent, &corrected, true)
                .await;
        }

        let result = engine.process_input(input);
        assert_eq!(result.engine, Engine::Learned);
        assert_eq!(result.intent.action, IntentAction::GetHelp);
    }

    #[tokio::test]
    async fn test_learning_never_overrides_confident_rules() {
        let engine = engine();
        let corrected = Intent {
            action: IntentAction::RemovePackage,
            entities: vec![Entity::new(EntityType::Package, "firefox", 1.0)],
            confidence: 1.0,
            raw_input: "install firefox".to_string(),
            source: Engine::Learned,
        };
        let first = engine.process_input("install firefox");
        for _ in 0..5 {
            engine
                .learning()
                .record_correction("install firefox", &first.intent, &corrected, true)
                .await;
        }

        let result = engine.process_input("install firefox");
        assert_eq!(result.engine, Engine::RuleBased);
        assert_eq!(result.intent.action, IntentAction::InstallPackage);
    }
}
