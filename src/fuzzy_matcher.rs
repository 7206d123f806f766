//! Statistical intent layer
//!
//! Tolerates typos and loose phrasing: tokens are first corrected through a
//! small typo table, then every intent is scored by how many of its keywords
//! appear exactly (+1) or within a small edit distance (+0.5). The best
//! score wins, and confidence stays below the rule layer's ceiling.

use serde_json::json;
use std::collections::HashMap;

use crate::lexicon::{identify_problem, normalize_package_name};
use crate::slog_debug;
use crate::types::{Engine, Entity, EntityType, Intent, IntentAction};

/// Largest edit distance that still counts as a near-keyword hit.
pub const MAX_EDIT_DISTANCE: usize = 2;
/// Largest length difference between token and keyword for a near hit.
pub const MAX_LENGTH_DIFFERENCE: usize = 2;

const EXACT_HIT: f64 = 1.0;
const NEAR_HIT: f64 = 0.5;
const SCORE_SCALE: f64 = 3.0;
const CONFIDENCE_CEILING: f64 = 0.9;
const PACKAGE_ENTITY_CONFIDENCE: f64 = 0.8;
const PROBLEM_ENTITY_CONFIDENCE: f64 = 0.7;

const INTENT_KEYWORDS: &[(IntentAction, &[&str])] = &[
    (
        IntentAction::InstallPackage,
        &["install", "get", "add", "need", "want", "download", "setup"],
    ),
    (IntentAction::RemovePackage, &["remove", "uninstall", "delete", "rid"]),
    (IntentAction::UpdateSystem, &["update", "upgrade", "refresh", "latest"]),
    (IntentAction::SearchPackages, &["search", "find", "look", "which"]),
    (IntentAction::GetHelp, &["help", "how", "explain", "guide"]),
    (
        IntentAction::Troubleshoot,
        &["broken", "working", "fix", "problem", "issue", "wrong", "crashed"],
    ),
    (IntentAction::QueryInfo, &["show", "list", "what", "status", "usage"]),
    (IntentAction::Configure, &["change", "configure", "adjust", "set", "bigger", "smaller"]),
    (
        IntentAction::ServiceControl,
        &["start", "stop", "restart", "enable", "disable", "service"],
    ),
];

lazy_static::lazy_static! {
    static ref TYPOS: HashMap<&'static str, &'static str> = {
        let table: &[(&str, &[&str])] = &[
            ("install", &["instal", "installl", "intall", "instsll", "istall", "isntall", "insatll"]),
            ("remove", &["rmove", "remov", "removve", "delet"]),
            ("update", &["updae", "upadte", "upgrate", "updte", "udpate"]),
            ("upgrade", &["upgrad", "upgarde"]),
            ("firefox", &["firefx", "firfox", "firefoz", "fierfix"]),
            ("package", &["packge", "pakage", "pckage"]),
        ];
        let mut typos = HashMap::new();
        for (canonical, misspellings) in table {
            for typo in *misspellings {
                typos.insert(*typo, *canonical);
            }
        }
        typos
    };
}

/// Keyword and edit-distance scorer, consulted when no rule is confident.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzyMatcher;

impl FuzzyMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, normalized: &str) -> Intent {
        let tokens = tokenize(normalized);
        if tokens.is_empty() {
            return Intent::unknown(normalized, Engine::Statistical);
        }

        let mut best: Option<(IntentAction, f64)> = None;
        for (action, keywords) in INTENT_KEYWORDS {
            let score = score_keywords(&tokens, keywords);
            if score > 0.0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((*action, score));
            }
        }

        let Some((action, score)) = best else {
            return Intent::unknown(normalized, Engine::Statistical);
        };

        let confidence = (score / SCORE_SCALE).min(CONFIDENCE_CEILING);
        let entities = extract_entities(action, &tokens, normalized);

        slog_debug!(
            "FUZZY",
            "scored",
            json!({ "action": action.as_str(), "score": score, "confidence": confidence })
        );

        Intent {
            action,
            entities,
            confidence,
            raw_input: normalized.to_string(),
            source: Engine::Statistical,
        }
    }
}

/// Split into tokens and replace known misspellings with their canonical word.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
        .filter(|token| !token.is_empty())
        .map(correct_token)
        .collect()
}

pub fn correct_token(token: &str) -> String {
    TYPOS
        .get(token)
        .map(|canonical| (*canonical).to_string())
        .unwrap_or_else(|| token.to_string())
}

fn score_keywords(tokens: &[String], keywords: &[&str]) -> f64 {
    keywords
        .iter()
        .map(|keyword| {
            if tokens.iter().any(|t| t == keyword) {
                EXACT_HIT
            } else if tokens.iter().any(|t| is_near(t, keyword)) {
                NEAR_HIT
            } else {
                0.0
            }
        })
        .sum()
}

fn keyword_hit(token: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| *k == token || is_near(token, k))
}

/// True when `token` is a misspelling-distance away from `keyword` without
/// being identical to it.
pub fn is_near(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return false;
    }
    let (a, b) = (token.chars().count(), keyword.chars().count());
    if a.abs_diff(b) > MAX_LENGTH_DIFFERENCE {
        return false;
    }
    levenshtein(token, keyword) <= MAX_EDIT_DISTANCE
}

/// Classic Levenshtein distance over chars, two rows at a time.
pub fn levenshtein(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

fn extract_entities(action: IntentAction, tokens: &[String], input: &str) -> Vec<Entity> {
    match action {
        IntentAction::InstallPackage | IntentAction::RemovePackage => {
            let keywords = INTENT_KEYWORDS
                .iter()
                .find(|(a, _)| *a == action)
                .map(|(_, k)| *k)
                .unwrap_or(&[]);
            let Some(verb_at) = tokens.iter().position(|t| keyword_hit(t, keywords)) else {
                return Vec::new();
            };
            let rest = tokens[verb_at + 1..].join(" ");
            let package = normalize_package_name(&rest);
            if package.is_empty() {
                Vec::new()
            } else {
                vec![Entity::new(EntityType::Package, package, PACKAGE_ENTITY_CONFIDENCE)]
            }
        }
        IntentAction::Troubleshoot => vec![Entity::new(
            EntityType::Problem,
            identify_problem(input),
            PROBLEM_ENTITY_CONFIDENCE,
        )],
        _ => Vec::new(),
    }
}
