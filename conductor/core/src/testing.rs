//! Scripted modes for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ids::SessionId;
use crate::mode::{HandleScore, Mode, ModeContext, ModeDefinition, ModeError, ModeResult};

/// How a scripted hook behaves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
    Panic,
}

/// Shared record of hook calls, as `"hook:session"` strings
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn push(&self, hook: &str, session: &SessionId) {
        self.0.lock().push(format!("{hook}:{session}"));
    }
}

/// A mode whose every hook outcome is chosen by the test
pub struct ScriptedMode {
    definition: ModeDefinition,
    score: f32,
    trigger: Option<String>,
    result_confidence: f32,
    score_behavior: Behavior,
    activate: Behavior,
    /// Activations that succeed before `activate` starts refusing
    activation_budget: Option<usize>,
    activations: AtomicUsize,
    deactivate: Behavior,
    process: Behavior,
    calls: CallLog,
}

impl ScriptedMode {
    pub fn new(id: &str, score: f32) -> Self {
        Self {
            definition: ModeDefinition::new(id, id),
            score,
            trigger: None,
            result_confidence: 0.8,
            score_behavior: Behavior::Succeed,
            activate: Behavior::Succeed,
            activation_budget: None,
            activations: AtomicUsize::new(0),
            deactivate: Behavior::Succeed,
            process: Behavior::Succeed,
            calls: CallLog::default(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.definition.priority = priority;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.definition.max_concurrent_sessions = Some(max);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.definition = self.definition.with_timeout(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.definition.enabled = false;
        self
    }

    pub fn result_confidence(mut self, confidence: f32) -> Self {
        self.result_confidence = confidence;
        self
    }

    pub fn scoring(mut self, behavior: Behavior) -> Self {
        self.score_behavior = behavior;
        self
    }

    pub fn processing(mut self, behavior: Behavior) -> Self {
        self.process = behavior;
        self
    }

    /// Score 0.0 unless the utterance contains `word`
    pub fn triggered_by(mut self, word: &str) -> Self {
        self.trigger = Some(word.to_string());
        self
    }

    pub fn activating(mut self, behavior: Behavior) -> Self {
        self.activate = behavior;
        self
    }

    pub fn failing_activate(self) -> Self {
        self.activating(Behavior::Fail)
    }

    /// Succeed `n` activations, then refuse every later one
    pub fn failing_activate_after(mut self, n: usize) -> Self {
        self.activation_budget = Some(n);
        self
    }

    pub fn deactivating(mut self, behavior: Behavior) -> Self {
        self.deactivate = behavior;
        self
    }

    pub fn failing_deactivate(self) -> Self {
        self.deactivating(Behavior::Fail)
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

async fn act(behavior: Behavior, hook: &str) -> Result<(), ModeError> {
    match behavior {
        Behavior::Succeed => Ok(()),
        Behavior::Fail => Err(ModeError::failed(format!("{hook} refused"))),
        Behavior::Hang => {
            futures::future::pending::<()>().await;
            Ok(())
        }
        Behavior::Panic => panic!("{hook} panicked"),
    }
}

#[async_trait]
impl Mode for ScriptedMode {
    fn definition(&self) -> &ModeDefinition {
        &self.definition
    }

    async fn can_handle(&self, utterance: &str, ctx: &ModeContext) -> Result<HandleScore, ModeError> {
        self.calls.push("can_handle", &ctx.session_id);
        act(self.score_behavior, "can_handle").await?;
        let score = match &self.trigger {
            Some(word) if !utterance.contains(word.as_str()) => 0.0,
            _ => self.score,
        };
        Ok(HandleScore::new(score).because("scripted"))
    }

    async fn activate(&self, ctx: &ModeContext) -> Result<(), ModeError> {
        self.calls.push("activate", &ctx.session_id);
        let seen = self.activations.fetch_add(1, Ordering::SeqCst);
        match self.activation_budget {
            Some(budget) if seen >= budget => act(Behavior::Fail, "activate").await,
            _ => act(self.activate, "activate").await,
        }
    }

    async fn deactivate(&self, session_id: &SessionId) -> Result<(), ModeError> {
        self.calls.push("deactivate", session_id);
        act(self.deactivate, "deactivate").await
    }

    async fn process(&self, utterance: &str, ctx: &ModeContext) -> Result<ModeResult, ModeError> {
        self.calls.push("process", &ctx.session_id);
        act(self.process, "process").await?;
        Ok(ModeResult::success(format!("{}: {utterance}", self.definition.id))
            .with_confidence(self.result_confidence))
    }
}
