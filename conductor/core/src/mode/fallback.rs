//! Default mode
//!
//! The mode a session lands in when nothing else clears the admission
//! threshold, when a switch is rejected, or when every scorer failed. It
//! accepts every session and never refuses activation.

use async_trait::async_trait;

use super::contract::{HandleScore, Mode, ModeContext, ModeError, ModeResult};
use super::definition::{ModeCategory, ModeDefinition};

/// Built-in fallback mode
#[derive(Clone, Debug)]
pub struct DefaultMode {
    definition: ModeDefinition,
}

impl DefaultMode {
    /// Id used when no other default is configured
    pub const ID: &'static str = "chatting";

    /// Confidence reported for every utterance
    pub const BASELINE_CONFIDENCE: f32 = 0.1;

    /// Confidence reported on processed turns
    pub const RESULT_CONFIDENCE: f32 = 0.5;

    /// Create the default mode with the standard id
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Self::ID)
    }

    /// Create the default mode under a different id
    #[must_use]
    pub fn with_id(id: &str) -> Self {
        let definition = ModeDefinition::new(id, "Chatting")
            .with_category(ModeCategory::General)
            .with_description("General conversation when no specialised mode fits")
            .with_priority(i32::MIN);
        Self { definition }
    }
}

impl Default for DefaultMode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mode for DefaultMode {
    fn definition(&self) -> &ModeDefinition {
        &self.definition
    }

    async fn can_handle(
        &self,
        _utterance: &str,
        _ctx: &ModeContext,
    ) -> Result<HandleScore, ModeError> {
        Ok(HandleScore::new(Self::BASELINE_CONFIDENCE).because("default mode baseline"))
    }

    async fn activate(&self, _ctx: &ModeContext) -> Result<(), ModeError> {
        Ok(())
    }

    async fn process(&self, utterance: &str, _ctx: &ModeContext) -> Result<ModeResult, ModeError> {
        Ok(ModeResult::success(format!("Let's talk it through: {}", utterance.trim()))
            .with_confidence(Self::RESULT_CONFIDENCE)
            .with_suggestion("Describe what you are trying to do"))
    }
}
