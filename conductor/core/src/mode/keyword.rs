//! Keyword scoring and the data-driven keyword mode
//!
//! [`KeywordScorer`] turns a definition's keyword and trigger lists into a
//! confidence score. [`KeywordMode`] wraps a [`ModeDefinition`] with that
//! scorer so modes can be declared purely in configuration.
//!
//! # Scoring
//!
//! ```text
//! keyword score = 1 - 0.65^hits                 (1 hit: 0.35, 2: 0.58, 3: 0.73)
//! trigger score = min(0.6 + 0.1 * (hits - 1), 0.9)
//! confidence    = max(keyword, trigger) (+0.1 when both fire), clamped to [0, 1]
//! ```
//!
//! Matching is case-insensitive and respects word boundaries, so `"fix"` does
//! not match `"prefix"`.

use async_trait::async_trait;

use super::contract::{HandleScore, Mode, ModeContext, ModeError, ModeResult};
use super::definition::ModeDefinition;

const KEYWORD_DECAY: f32 = 0.65;
const TRIGGER_BASE: f32 = 0.6;
const TRIGGER_STEP: f32 = 0.1;
const TRIGGER_CAP: f32 = 0.9;
const COMBINED_BONUS: f32 = 0.1;

/// Which keywords and triggers an utterance hit
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeywordMatch {
    /// Matched keywords, in definition order
    pub keywords: Vec<String>,
    /// Matched trigger phrases, in definition order
    pub triggers: Vec<String>,
}

impl KeywordMatch {
    /// Whether nothing matched
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.triggers.is_empty()
    }
}

/// Scores utterances against keyword and trigger lists
#[derive(Clone, Debug, Default)]
pub struct KeywordScorer {
    keywords: Vec<String>,
    triggers: Vec<String>,
}

impl KeywordScorer {
    /// Build a scorer; entries are normalized and de-duplicated
    #[must_use]
    pub fn new(keywords: &[String], triggers: &[String]) -> Self {
        Self {
            keywords: normalize_all(keywords),
            triggers: normalize_all(triggers),
        }
    }

    /// Build a scorer from a definition's lists
    #[must_use]
    pub fn for_definition(definition: &ModeDefinition) -> Self {
        Self::new(&definition.keywords, &definition.triggers)
    }

    /// Find which entries occur in `utterance`
    #[must_use]
    pub fn matches(&self, utterance: &str) -> KeywordMatch {
        let haystack = format!(" {} ", normalize(utterance));
        let hit = |needle: &&String| haystack.contains(&format!(" {needle} "));

        KeywordMatch {
            keywords: self.keywords.iter().filter(hit).cloned().collect(),
            triggers: self.triggers.iter().filter(hit).cloned().collect(),
        }
    }

    /// Score `utterance`
    #[must_use]
    pub fn score(&self, utterance: &str) -> HandleScore {
        let found = self.matches(utterance);
        let confidence = confidence_for(&found);

        let mut score = HandleScore::new(confidence);
        if !found.triggers.is_empty() {
            score = score.because(format!(
                "matched trigger phrases: {}",
                found.triggers.join(", ")
            ));
        }
        if !found.keywords.is_empty() {
            score = score.because(format!("matched keywords: {}", found.keywords.join(", ")));
        }
        if found.is_empty() {
            score = score.because("no keyword or trigger matched");
        }
        score
    }
}

fn confidence_for(found: &KeywordMatch) -> f32 {
    let keyword_hits = i32::try_from(found.keywords.len()).unwrap_or(i32::MAX);
    let keyword_score = if keyword_hits == 0 {
        0.0
    } else {
        1.0 - KEYWORD_DECAY.powi(keyword_hits)
    };

    let trigger_score = match found.triggers.len() {
        0 => 0.0,
        n => (TRIGGER_BASE + TRIGGER_STEP * (n - 1) as f32).min(TRIGGER_CAP),
    };

    let mut confidence = keyword_score.max(trigger_score);
    if keyword_score > 0.0 && trigger_score > 0.0 {
        confidence += COMBINED_BONUS;
    }
    confidence.clamp(0.0, 1.0)
}

/// Lower-case and collapse everything that is not alphanumeric into single spaces
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_all(entries: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        let normalized = normalize(entry);
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

// ============================================================================
// Keyword Mode
// ============================================================================

/// A mode whose behaviour is fully described by its definition
///
/// Scores with [`KeywordScorer`] and acknowledges the turn when processing.
/// Real plugins replace `process` with their own work.
#[derive(Clone, Debug)]
pub struct KeywordMode {
    definition: ModeDefinition,
    scorer: KeywordScorer,
}

impl KeywordMode {
    /// Wrap a definition
    #[must_use]
    pub fn new(definition: ModeDefinition) -> Self {
        let scorer = KeywordScorer::for_definition(&definition);
        Self { definition, scorer }
    }

    /// The scorer used by this mode
    #[must_use]
    pub fn scorer(&self) -> &KeywordScorer {
        &self.scorer
    }
}

#[async_trait]
impl Mode for KeywordMode {
    fn definition(&self) -> &ModeDefinition {
        &self.definition
    }

    async fn can_handle(
        &self,
        utterance: &str,
        _ctx: &ModeContext,
    ) -> Result<HandleScore, ModeError> {
        Ok(self.scorer.score(utterance))
    }

    async fn activate(&self, ctx: &ModeContext) -> Result<(), ModeError> {
        tracing::debug!(
            mode = %self.definition.id,
            session = %ctx.session_id,
            "Keyword mode activated"
        );
        Ok(())
    }

    async fn process(&self, utterance: &str, _ctx: &ModeContext) -> Result<ModeResult, ModeError> {
        let found = self.scorer.matches(utterance);
        let confidence = confidence_for(&found);

        let mut result = ModeResult::success(format!(
            "{} mode is on it: {}",
            self.definition.name,
            utterance.trim()
        ))
        .with_confidence(confidence)
        .with_metadata("matched_keywords", found.keywords.clone())
        .with_metadata("matched_triggers", found.triggers.clone());

        for keyword in found.keywords.iter().chain(found.triggers.iter()) {
            result = result.with_suggestion(format!("Go deeper on \"{keyword}\""));
        }
        Ok(result)
    }
}
