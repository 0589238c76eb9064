//! Structured interpretation of free-text requests.
//!
//! An [`Intent`] is produced by the intent layer from raw user input. It is
//! mutated only by clarification rounds (confidence rises, history grows)
//! and becomes effectively immutable once handed to the planning layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub Uuid);

impl IntentId {
    /// Create a new unique intent identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of work a request asks for.
///
/// Detection scans keyword families in a fixed order; the first family
/// with a match wins and everything else falls through to `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Create,
    Fix,
    Modify,
    Test,
    Review,
    Deploy,
    #[default]
    General,
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentType::Create => "create",
            IntentType::Fix => "fix",
            IntentType::Modify => "modify",
            IntentType::Test => "test",
            IntentType::Review => "review",
            IntentType::Deploy => "deploy",
            IntentType::General => "general",
        };
        write!(f, "{}", s)
    }
}

/// A constraint extracted from the request text.
///
/// Constraints are detected by independent keyword scans, so several may
/// co-occur on one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Constraint {
    TimeSensitive,
    HighQuality,
    MinimalScope,
    Tested,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Constraint::TimeSensitive => "time-sensitive",
            Constraint::HighQuality => "high-quality",
            Constraint::MinimalScope => "minimal-scope",
            Constraint::Tested => "tested",
        };
        write!(f, "{}", s)
    }
}

/// One question/answer exchange from the clarification loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRound {
    /// Question posed to the requester.
    pub question: String,
    /// Answer received.
    pub answer: String,
    /// When the exchange happened.
    pub timestamp: DateTime<Utc>,
}

impl ClarificationRound {
    /// Record a question/answer exchange stamped with the current time.
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Structured, confidence-scored interpretation of a free-text request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Unique identifier for this intent.
    pub id: IntentId,
    /// The original request text, verbatim.
    pub raw_input: String,
    /// Detected category of work.
    pub parsed_type: IntentType,
    /// What part of the system the request applies to.
    pub scope: String,
    /// Constraints extracted from the text.
    pub constraints: Vec<Constraint>,
    /// Recognized technical terms found in the text.
    pub tags: Vec<String>,
    /// Parser confidence in [0, 1].
    pub confidence: f64,
    /// Whether the confidence is below the clarification threshold.
    pub needs_clarification: bool,
    /// Clarification exchanges applied to this intent, oldest first.
    pub clarification_history: Vec<ClarificationRound>,
}

impl Intent {
    /// Create an intent with a fresh id and the given raw input.
    ///
    /// All parsed fields start at their defaults; the intent layer fills
    /// them in during parsing.
    pub fn new(raw_input: &str) -> Self {
        Self {
            id: IntentId::new(),
            raw_input: raw_input.to_string(),
            parsed_type: IntentType::General,
            scope: "project".to_string(),
            constraints: Vec::new(),
            tags: Vec::new(),
            confidence: 0.0,
            needs_clarification: false,
            clarification_history: Vec::new(),
        }
    }
}
