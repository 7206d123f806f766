//! Adaptive learning from user corrections
//!
//! Accepted corrections become learned patterns keyed by the normalised
//! input, and tokens that co-occur with a corrected package name become
//! synonyms of it. Later inputs are matched against learned patterns either
//! exactly or through synonym-expanded Jaccard similarity.
//!
//! State is loaded once from a [`KeyValueStore`] and saved after every
//! correction. Storage problems are logged and otherwise ignored.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;

use crate::persistence::KeyValueStore;
use crate::types::{Engine, Entity, EntityType, Intent, IntentAction};
use crate::{make_id, slog_debug, slog_info, slog_warn};

/// Storage key for the serialised learning state.
pub const LEARNING_KEY: &str = "intent-learning";
/// Only this many of the most recent corrections are kept.
pub const MAX_CORRECTIONS: usize = 1000;

const INITIAL_CONFIDENCE: f64 = 0.7;
const CONFIDENCE_STEP: f64 = 0.05;
const CONFIDENCE_CAP: f64 = 0.95;
const EXACT_MATCH_THRESHOLD: f64 = 0.6;
const SIMILARITY_THRESHOLD: f64 = 0.7;
const LEARNED_ENTITY_CONFIDENCE: f64 = 0.9;
const MIN_SYNONYM_LEN: usize = 3;
const SUGGESTION_LIMIT: usize = 5;
const RECENT_WINDOW: usize = 100;

lazy_static::lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub id: String,
    pub original_input: String,
    pub recognized_intent: Intent,
    pub corrected_intent: Intent,
    pub timestamp: DateTime<Utc>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    /// Input as the user first typed it.
    pub pattern: String,
    pub action: IntentAction,
    pub entities: BTreeMap<EntityType, String>,
    pub confidence: f64,
    pub frequency: u32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_corrections: usize,
    pub accepted_corrections: usize,
    pub acceptance_rate: f64,
    pub learned_patterns: usize,
    pub synonym_words: usize,
    pub recent_rejection_rate: f64,
    pub improvement_rate: f64,
}

/// Everything the store knows, in a form fit for export or inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningExport {
    pub corrections: usize,
    pub patterns: BTreeMap<String, LearnedPattern>,
    pub synonyms: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LearningState {
    #[serde(default)]
    corrections: Vec<Correction>,
    #[serde(default)]
    patterns: BTreeMap<String, LearnedPattern>,
    #[serde(default)]
    synonyms: BTreeMap<String, BTreeSet<String>>,
}

impl LearningState {
    fn push_correction(&mut self, correction: Correction) {
        self.corrections.push(correction);
        if self.corrections.len() > MAX_CORRECTIONS {
            let excess = self.corrections.len() - MAX_CORRECTIONS;
            self.corrections.drain(..excess);
        }
    }

    fn learn_pattern(&mut self, key: String, original_input: &str, corrected: &Intent, now: DateTime<Utc>) {
        let entities: BTreeMap<EntityType, String> = corrected
            .entities
            .iter()
            .map(|e| (e.entity_type, e.value.clone()))
            .collect();

        match self.patterns.get_mut(&key) {
            Some(existing) if existing.action == corrected.action => {
                existing.confidence = (existing.confidence + CONFIDENCE_STEP).min(CONFIDENCE_CAP);
                existing.frequency += 1;
                existing.last_seen = now;
                existing.entities.extend(entities);
            }
            Some(existing) => {
                existing.action = corrected.action;
                existing.entities = entities;
                existing.frequency += 1;
                existing.last_seen = now;
            }
            None => {
                self.patterns.insert(
                    key,
                    LearnedPattern {
                        pattern: original_input.trim().to_string(),
                        action: corrected.action,
                        entities,
                        confidence: INITIAL_CONFIDENCE,
                        frequency: 1,
                        last_seen: now,
                    },
                );
            }
        }
    }

    fn learn_synonyms(&mut self, key: &str, corrected: &Intent) {
        if !corrected.action.targets_package() {
            return;
        }
        let Some(value) = corrected.entity(EntityType::Package) else {
            return;
        };
        let value = value.to_lowercase();

        for token in key.split_whitespace() {
            if token == value || token.chars().count() < MIN_SYNONYM_LEN {
                continue;
            }
            self.synonyms
                .entry(token.to_string())
                .or_default()
                .insert(value.clone());
            self.synonyms
                .entry(value.clone())
                .or_default()
                .insert(token.to_string());
        }
    }

    fn expand(&self, text: &str) -> BTreeSet<String> {
        let mut expanded: BTreeSet<String> = text.split_whitespace().map(str::to_string).collect();
        let direct: Vec<String> = expanded.iter().cloned().collect();
        for token in direct {
            if let Some(words) = self.synonyms.get(&token) {
                expanded.extend(words.iter().cloned());
            }
        }
        expanded
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        jaccard(&self.expand(a), &self.expand(b))
    }
}

/// Lowercase, trim, and drop everything that is not a word character or
/// whitespace. Runs of whitespace collapse to one space.
pub fn normalize_key(input: &str) -> String {
    NON_WORD
        .replace_all(&input.trim().to_lowercase(), "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// |A ∩ B| / |A ∪ B|, zero for two empty sets.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

pub struct LearningStore<S: KeyValueStore> {
    backend: S,
    state: RwLock<LearningState>,
    // serialises record + save so frequency counters stay exact
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> LearningStore<S> {
    /// Empty store that will persist into `backend`.
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            state: RwLock::new(LearningState::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Store primed with whatever `backend` holds. Missing or unreadable
    /// data yields an empty store.
    pub async fn load(backend: S) -> Self {
        let state = match backend.load(LEARNING_KEY).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<LearningState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    slog_warn!(
                        "LEARNING",
                        "load_failed",
                        "learning data is corrupt, starting empty",
                        json!({ "error": e.to_string() })
                    );
                    LearningState::default()
                }
            },
            Ok(None) => LearningState::default(),
            Err(e) => {
                slog_warn!(
                    "LEARNING",
                    "load_failed",
                    "learning data unreadable, starting empty",
                    json!({ "error": format!("{:#}", e) })
                );
                LearningState::default()
            }
        };

        slog_info!(
            "LEARNING",
            "loaded",
            json!({
                "corrections": state.corrections.len(),
                "patterns": state.patterns.len(),
                "synonyms": state.synonyms.len(),
            })
        );

        Self {
            backend,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LearningState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LearningState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a correction and, when accepted, learn from it. The updated
    /// state is saved before this returns.
    pub async fn record_correction(
        &self,
        original_input: &str,
        recognized: &Intent,
        corrected: &Intent,
        accepted: bool,
    ) -> Correction {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let correction = Correction {
            id: make_id("correction"),
            original_input: original_input.to_string(),
            recognized_intent: recognized.clone(),
            corrected_intent: corrected.clone(),
            timestamp: now,
            accepted,
        };

        let snapshot = {
            let mut state = self.write_state();
            state.push_correction(correction.clone());

            let key = normalize_key(original_input);
            if accepted && !key.is_empty() {
                state.learn_pattern(key.clone(), original_input, corrected, now);
                state.learn_synonyms(&key, corrected);
            }
            serde_json::to_vec(&*state)
        };

        slog_info!(
            "LEARNING",
            "correction_recorded",
            json!({
                "id": correction.id,
                "accepted": accepted,
                "recognized": recognized.action.as_str(),
                "corrected": corrected.action.as_str(),
            })
        );

        match snapshot {
            Ok(bytes) => {
                if let Err(e) = self.backend.save(LEARNING_KEY, bytes).await {
                    slog_warn!(
                        "LEARNING",
                        "save_failed",
                        "learning data not persisted",
                        json!({ "error": format!("{:#}", e) })
                    );
                }
            }
            Err(e) => {
                slog_warn!(
                    "LEARNING",
                    "save_failed",
                    "learning data not serialisable",
                    json!({ "error": e.to_string() })
                );
            }
        }

        correction
    }

    /// Intent learned for `input`, if any pattern is close enough.
    pub fn check_learned_pattern(&self, input: &str) -> Option<Intent> {
        let key = normalize_key(input);
        if key.is_empty() {
            return None;
        }
        let state = self.read_state();

        if let Some(pattern) = state.patterns.get(&key) {
            if pattern.confidence > EXACT_MATCH_THRESHOLD {
                return Some(learned_intent(pattern, input, pattern.confidence));
            }
        }

        let query = state.expand(&key);
        let mut best: Option<(&LearnedPattern, f64)> = None;
        for (pattern_key, pattern) in &state.patterns {
            let score = jaccard(&query, &state.expand(pattern_key));
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((pattern, score));
            }
        }

        let (pattern, score) = best.filter(|(_, score)| *score > SIMILARITY_THRESHOLD)?;
        slog_debug!(
            "LEARNING",
            "similar_pattern",
            json!({ "pattern": pattern.pattern, "similarity": score })
        );
        Some(learned_intent(pattern, input, pattern.confidence * score))
    }

    /// Synonym-expanded Jaccard similarity between two inputs.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        self.read_state()
            .similarity(&normalize_key(a), &normalize_key(b))
    }

    /// Learned pattern stored for exactly this input.
    pub fn pattern(&self, input: &str) -> Option<LearnedPattern> {
        self.read_state().patterns.get(&normalize_key(input)).cloned()
    }

    pub fn synonyms_of(&self, word: &str) -> Vec<String> {
        self.read_state()
            .synonyms
            .get(&word.to_lowercase())
            .map(|words| words.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Previously corrected inputs starting with `partial`, most used first.
    pub fn get_suggestions(&self, partial: &str) -> Vec<String> {
        let prefix = normalize_key(partial);
        let state = self.read_state();

        let mut ranked: Vec<(&String, &LearnedPattern)> = state
            .patterns
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();
        ranked.sort_by(|(ka, a), (kb, b)| {
            let wa = a.frequency as f64 * a.confidence;
            let wb = b.frequency as f64 * b.confidence;
            wb.total_cmp(&wa).then_with(|| ka.cmp(kb))
        });

        ranked
            .into_iter()
            .take(SUGGESTION_LIMIT)
            .map(|(_, p)| p.pattern.clone())
            .collect()
    }

    pub fn get_stats(&self) -> LearningStats {
        let state = self.read_state();
        let total = state.corrections.len();
        let accepted = state.corrections.iter().filter(|c| c.accepted).count();

        let recent = &state.corrections[total.saturating_sub(RECENT_WINDOW)..];
        let recent_rejection_rate = if recent.is_empty() {
            0.0
        } else {
            recent.iter().filter(|c| !c.accepted).count() as f64 / recent.len() as f64
        };

        LearningStats {
            total_corrections: total,
            accepted_corrections: accepted,
            acceptance_rate: if total == 0 { 0.0 } else { accepted as f64 / total as f64 },
            learned_patterns: state.patterns.len(),
            synonym_words: state.synonyms.len(),
            recent_rejection_rate,
            improvement_rate: (1.0 - recent_rejection_rate) * 100.0,
        }
    }

    pub fn export_learning_data(&self) -> LearningExport {
        let state = self.read_state();
        LearningExport {
            corrections: state.corrections.len(),
            patterns: state.patterns.clone(),
            synonyms: state
                .synonyms
                .iter()
                .map(|(word, set)| (word.clone(), set.iter().cloned().collect()))
                .collect(),
        }
    }
}

fn learned_intent(pattern: &LearnedPattern, raw_input: &str, confidence: f64) -> Intent {
    Intent {
        action: pattern.action,
        entities: pattern
            .entities
            .iter()
            .map(|(entity_type, value)| Entity::new(*entity_type, value.clone(), LEARNED_ENTITY_CONFIDENCE))
            .collect(),
        confidence,
        raw_input: raw_input.to_string(),
        source: Engine::Learned,
    }
}
