//! Modes
//!
//! Everything a mode is: its static definition, the async capability trait
//! plugins implement, the guard the core wraps around every hook call, and the
//! two built-in implementations.

mod contract;
mod definition;
mod fallback;
pub mod hook;
mod keyword;

pub use contract::{clamp_confidence, HandleScore, Mode, ModeContext, ModeError, ModeResult};
pub use definition::{ModeCategory, ModeDefinition, DEFAULT_MODE_TIMEOUT_MS};
pub use fallback::DefaultMode;
pub use hook::HookFailure;
pub use keyword::{KeywordMatch, KeywordMode, KeywordScorer};
