//! L0 intent layer: free text in, scored [`Intent`] out.
//!
//! Parsing is deliberately mechanical — keyword families for the type,
//! a scope phrase, independent constraint scans, and an additive
//! confidence score. Low-confidence intents go through a clarification
//! loop driven by an injected answer provider.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::debug;

use crate::core::intent::{ClarificationRound, Constraint, Intent, IntentId, IntentType};

const CREATE_KEYWORDS: &[&str] = &["create", "build", "make", "implement", "add"];
const FIX_KEYWORDS: &[&str] = &["fix", "repair", "debug", "resolve", "patch"];
const MODIFY_KEYWORDS: &[&str] = &["modify", "change", "update", "refactor", "rename"];
const TEST_KEYWORDS: &[&str] = &["test", "verify", "validate", "check"];
const REVIEW_KEYWORDS: &[&str] = &["review", "audit", "inspect"];
const DEPLOY_KEYWORDS: &[&str] = &["deploy", "release", "ship", "publish"];

/// Keyword families scanned in order; the first match wins.
const KEYWORD_FAMILIES: &[(IntentType, &[&str])] = &[
    (IntentType::Create, CREATE_KEYWORDS),
    (IntentType::Fix, FIX_KEYWORDS),
    (IntentType::Modify, MODIFY_KEYWORDS),
    (IntentType::Test, TEST_KEYWORDS),
    (IntentType::Review, REVIEW_KEYWORDS),
    (IntentType::Deploy, DEPLOY_KEYWORDS),
];

const ACTION_VERBS: &[&str] = &[
    "create", "build", "make", "implement", "add", "fix", "repair", "debug", "resolve",
    "modify", "change", "update", "refactor", "test", "verify", "review", "deploy", "release",
];

const TECHNICAL_TERMS: &[&str] = &[
    "api", "database", "endpoint", "function", "module", "component", "schema", "server",
    "service", "interface", "pipeline", "cache",
];

const AMBIGUOUS_WORDS: &[&str] = &["maybe", "perhaps", "something", "whatever", "anything"];

const URGENCY_WORDS: &[&str] = &["urgent", "asap", "immediately", "quickly"];
const QUALITY_WORDS: &[&str] = &["robust", "reliable", "production", "high-quality", "quality"];

/// Segments shorter than this are discarded by multi-intent splitting.
const MIN_SEGMENT_LEN: usize = 10;

/// Cap applied to confidence gained through clarification.
const CLARIFICATION_CONFIDENCE_CAP: f64 = 0.95;

/// Confidence added per clarification round.
const CLARIFICATION_CONFIDENCE_STEP: f64 = 0.15;

fn scope_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:for|in|to)\s+([A-Za-z0-9_][A-Za-z0-9_\s-]*)").expect("valid scope regex")
    })
}

/// Lowercased word tokens of the input, split on non-alphanumerics
/// except `-` so hyphenated keywords survive.
fn tokens(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn contains_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

/// Tuning knobs for the intent layer.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentConfig {
    /// Confidence below this requests clarification.
    pub min_confidence_threshold: f64,
    /// Clarification rounds before the loop gives up.
    pub max_clarification_rounds: u32,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.7,
            max_clarification_rounds: 3,
        }
    }
}

/// Caller-supplied hints for parsing.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// Scope to fall back to when the text names none.
    pub scope_hint: Option<String>,
}

/// Diagnostics describing how an intent was parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsingMetadata {
    /// Keywords that contributed to type detection.
    pub matched_keywords: Vec<String>,
    /// Distinct ambiguous words that lowered confidence.
    pub ambiguous_words: Vec<String>,
    /// Parsing wall-clock time in milliseconds.
    pub duration_ms: u64,
}

/// Result of parsing one request.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// The winning interpretation.
    pub intent: Intent,
    /// Other keyword families that also matched, in scan order.
    pub alternatives: Vec<IntentType>,
    /// Parsing diagnostics.
    pub metadata: ParsingMetadata,
}

/// Answers clarification questions on behalf of the requester.
#[async_trait]
pub trait ClarificationProvider: Send + Sync {
    /// Produce an answer to a clarification question about an intent.
    async fn answer(&self, intent: &Intent, question: &str) -> String;
}

/// L0: turns free text into structured, confidence-scored intents.
pub struct IntentLayer {
    config: IntentConfig,
    /// Clarification exchanges per intent, retained until cleared.
    history: HashMap<IntentId, Vec<ClarificationRound>>,
}

impl IntentLayer {
    /// Create an intent layer with the given tuning knobs.
    pub fn new(config: IntentConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    /// Create an intent layer with default knobs.
    pub fn with_defaults() -> Self {
        Self::new(IntentConfig::default())
    }

    /// The layer's configuration.
    pub fn config(&self) -> &IntentConfig {
        &self.config
    }

    /// Parse raw input into an intent, alternatives, and diagnostics.
    pub fn parse_intent(&self, input: &str, context: Option<&ParseContext>) -> ParseOutcome {
        let start = Instant::now();
        let toks = tokens(input);

        let mut parsed_type = IntentType::General;
        let mut alternatives = Vec::new();
        let mut matched_keywords = Vec::new();
        for (candidate, keywords) in KEYWORD_FAMILIES {
            let hits: Vec<String> = toks
                .iter()
                .filter(|t| keywords.contains(&t.as_str()))
                .cloned()
                .collect();
            if hits.is_empty() {
                continue;
            }
            if parsed_type == IntentType::General {
                parsed_type = *candidate;
                matched_keywords = hits;
            } else {
                alternatives.push(*candidate);
            }
        }

        let scope = extract_scope(input)
            .or_else(|| context.and_then(|c| c.scope_hint.clone()))
            .unwrap_or_else(|| "project".to_string());

        let constraints = extract_constraints(&toks);
        let tags: Vec<String> = toks
            .iter()
            .filter(|t| TECHNICAL_TERMS.contains(&t.as_str()))
            .cloned()
            .collect();

        let ambiguous_words: Vec<String> = AMBIGUOUS_WORDS
            .iter()
            .filter(|w| toks.iter().any(|t| t == *w))
            .map(|w| w.to_string())
            .collect();

        let confidence = Self::score_confidence(input);
        let needs_clarification = confidence < self.config.min_confidence_threshold;

        let mut intent = Intent::new(input);
        intent.parsed_type = parsed_type;
        intent.scope = scope;
        intent.constraints = constraints;
        intent.tags = tags;
        intent.confidence = confidence;
        intent.needs_clarification = needs_clarification;

        debug!(
            intent = %intent.id.short(),
            parsed_type = %parsed_type,
            confidence,
            needs_clarification,
            "parsed intent"
        );

        ParseOutcome {
            intent,
            alternatives,
            metadata: ParsingMetadata {
                matched_keywords,
                ambiguous_words,
                duration_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    /// Score parser confidence for a piece of input.
    ///
    /// Base 0.5; +0.1 for length over 50 characters and +0.1 more over
    /// 100; +0.15 for an action verb; +0.1 for a technical term; +0.05
    /// for a constraint keyword; -0.15 per distinct ambiguous word.
    /// Always clamped to [0, 1].
    pub fn score_confidence(input: &str) -> f64 {
        let toks = tokens(input);
        let mut score: f64 = 0.5;

        if input.len() > 50 {
            score += 0.1;
        }
        if input.len() > 100 {
            score += 0.1;
        }
        if contains_any(&toks, ACTION_VERBS) {
            score += 0.15;
        }
        if contains_any(&toks, TECHNICAL_TERMS) {
            score += 0.1;
        }
        if has_constraint_keyword(&toks) {
            score += 0.05;
        }
        let ambiguous = AMBIGUOUS_WORDS
            .iter()
            .filter(|w| toks.iter().any(|t| t == *w))
            .count();
        score -= 0.15 * ambiguous as f64;

        score.clamp(0.0, 1.0)
    }

    /// Apply one clarification exchange to an intent.
    ///
    /// Appends the round to both the intent and the layer's per-intent
    /// history, bumps confidence by 0.15 (capped at 0.95), and
    /// recomputes `needs_clarification`.
    pub fn process_clarification(&mut self, intent: &mut Intent, question: &str, answer: &str) {
        let round = ClarificationRound::new(question, answer);
        intent.clarification_history.push(round.clone());
        self.history.entry(intent.id).or_default().push(round);

        intent.confidence = (intent.confidence + CLARIFICATION_CONFIDENCE_STEP)
            .min(CLARIFICATION_CONFIDENCE_CAP);
        intent.needs_clarification = intent.confidence < self.config.min_confidence_threshold;
    }

    /// Run the clarification loop until confidence clears the threshold
    /// or the round budget runs out.
    ///
    /// At budget exhaustion `needs_clarification` is forced to `false`
    /// regardless of confidence — the pipeline proceeds with what it has.
    /// Returns the number of rounds used.
    pub async fn run_clarification_loop(
        &mut self,
        intent: &mut Intent,
        provider: &dyn ClarificationProvider,
    ) -> u32 {
        let mut rounds = 0;
        while intent.needs_clarification && rounds < self.config.max_clarification_rounds {
            let question = self.clarification_question(intent);
            let answer = provider.answer(intent, &question).await;
            self.process_clarification(intent, &question, &answer);
            rounds += 1;
        }
        if intent.needs_clarification {
            debug!(
                intent = %intent.id.short(),
                rounds,
                "clarification budget exhausted, proceeding anyway"
            );
            intent.needs_clarification = false;
        }
        rounds
    }

    fn clarification_question(&self, intent: &Intent) -> String {
        if intent.scope == "project" {
            "Which part of the project should this apply to?".to_string()
        } else {
            format!(
                "Can you give more detail about what \"{}\" should do?",
                intent.raw_input.trim()
            )
        }
    }

    /// Split input that bundles several requests into one message.
    ///
    /// Splits on "and also", semicolons, and newlines; segments shorter
    /// than 10 characters are discarded. If nothing survives, the
    /// original input is returned unsplit.
    pub fn detect_multi_intent(input: &str) -> Vec<String> {
        let segments: Vec<String> = input
            .split("and also")
            .flat_map(|s| s.split(';'))
            .flat_map(|s| s.split('\n'))
            .map(|s| s.trim().to_string())
            .filter(|s| s.len() >= MIN_SEGMENT_LEN)
            .collect();

        if segments.is_empty() {
            vec![input.to_string()]
        } else {
            segments
        }
    }

    /// Clarification history for one intent, if any.
    pub fn clarification_history(&self, id: &IntentId) -> Option<&[ClarificationRound]> {
        self.history.get(id).map(|v| v.as_slice())
    }

    /// Drop all retained clarification history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

fn extract_scope(input: &str) -> Option<String> {
    scope_regex()
        .captures(&input.to_lowercase())
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_constraints(toks: &[String]) -> Vec<Constraint> {
    let mut constraints = Vec::new();
    if contains_any(toks, URGENCY_WORDS) {
        constraints.push(Constraint::TimeSensitive);
    }
    if contains_any(toks, QUALITY_WORDS) {
        constraints.push(Constraint::HighQuality);
    }
    if contains_any(toks, &["simple", "basic"]) {
        constraints.push(Constraint::MinimalScope);
    }
    if toks.iter().any(|t| t == "test" || t == "tested" || t == "tests") {
        constraints.push(Constraint::Tested);
    }
    constraints
}

fn has_constraint_keyword(toks: &[String]) -> bool {
    contains_any(toks, URGENCY_WORDS)
        || contains_any(toks, QUALITY_WORDS)
        || contains_any(toks, &["simple", "basic", "test", "tested", "tests"])
}
