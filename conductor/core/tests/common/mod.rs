//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use mode_conductor_core::mode::KeywordScorer;
use mode_conductor_core::{
    ChannelSink, DispatchEvent, Dispatcher, DispatcherConfig, HandleScore, Mode, ModeContext,
    ModeDefinition, ModeError, ModeRegistry, ModeResult, SessionId,
};

/// Keyword-scored mode with a fixed processing confidence and switchable faults
pub struct TestMode {
    definition: ModeDefinition,
    scorer: KeywordScorer,
    fixed_score: Option<f32>,
    fail_activate: bool,
    hang_process: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl TestMode {
    pub fn new(definition: ModeDefinition) -> Self {
        let scorer = KeywordScorer::for_definition(&definition);
        Self {
            definition,
            scorer,
            fixed_score: None,
            fail_activate: false,
            hang_process: false,
            calls: Arc::default(),
        }
    }

    pub fn keyword(id: &str, keywords: &[&str], priority: i32) -> Self {
        Self::new(
            ModeDefinition::new(id, id)
                .with_keywords(keywords.iter().copied())
                .with_priority(priority),
        )
    }

    /// Ignore keywords and always score `score`
    pub fn scoring(mut self, score: f32) -> Self {
        self.fixed_score = Some(score);
        self
    }

    pub fn failing_activate(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    pub fn hanging_process(mut self, timeout: Duration) -> Self {
        self.hang_process = true;
        self.definition = self.definition.with_timeout(timeout);
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.definition = self.definition.with_max_concurrent_sessions(max);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Mode for TestMode {
    fn definition(&self) -> &ModeDefinition {
        &self.definition
    }

    async fn can_handle(&self, utterance: &str, _ctx: &ModeContext) -> Result<HandleScore, ModeError> {
        Ok(match self.fixed_score {
            Some(score) => HandleScore::new(score).because("fixed"),
            None => self.scorer.score(utterance),
        })
    }

    async fn activate(&self, ctx: &ModeContext) -> Result<(), ModeError> {
        self.calls.lock().push(format!("activate:{}", ctx.session_id));
        if self.fail_activate {
            return Err(ModeError::failed("activation refused"));
        }
        Ok(())
    }

    async fn deactivate(&self, session_id: &SessionId) -> Result<(), ModeError> {
        self.calls.lock().push(format!("deactivate:{session_id}"));
        Ok(())
    }

    async fn process(&self, utterance: &str, ctx: &ModeContext) -> Result<ModeResult, ModeError> {
        self.calls.lock().push(format!("process:{}", ctx.session_id));
        if self.hang_process {
            futures::future::pending::<()>().await;
        }
        Ok(ModeResult::success(format!("{}: {utterance}", self.definition.id)).with_confidence(0.8))
    }
}

/// The default conversational mode used across scenarios
pub fn chatting() -> TestMode {
    TestMode::keyword("chatting", &[], 1).scoring(0.05)
}

pub fn dispatcher(modes: Vec<TestMode>) -> (Dispatcher, mpsc::Receiver<DispatchEvent>) {
    dispatcher_with(modes, DispatcherConfig::default())
}

pub fn dispatcher_with(
    modes: Vec<TestMode>,
    config: DispatcherConfig,
) -> (Dispatcher, mpsc::Receiver<DispatchEvent>) {
    let mut builder = ModeRegistry::builder().with_default("chatting");
    for mode in modes {
        builder = builder.register(mode);
    }
    let registry = builder.build().expect("registry should build");
    let (sink, rx) = ChannelSink::new(1024);
    (Dispatcher::new(Arc::new(registry), Arc::new(sink), config), rx)
}

pub fn drain(rx: &mut mpsc::Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub fn kinds(events: &[DispatchEvent]) -> Vec<&'static str> {
    events.iter().map(DispatchEvent::kind).collect()
}
