//! Fakes shared by pipeline and route tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::automation::{AutomationWorker, EngineError};
use crate::cv::{CvResolver, MaterializedCv, StaticCvSource};
use crate::models::ApplicationRow;
use crate::pipeline::state_machine::{AttemptReport, Outcome};

/// Resolver whose only files are `references`.
pub fn static_resolver(references: &[&str]) -> CvResolver {
    let files: HashMap<String, Bytes> = references
        .iter()
        .map(|r| (r.to_string(), Bytes::from_static(b"%PDF-1.4 test")))
        .collect();
    CvResolver::new(Arc::new(StaticCvSource { files }))
}

/// Worker that replays a fixed script of results, then succeeds.
/// `Err(message)` entries simulate a lost browser engine.
pub struct ScriptedWorker {
    script: Mutex<VecDeque<Result<AttemptReport, String>>>,
    seen: Mutex<Vec<Uuid>>,
    calls: AtomicUsize,
    shutdowns: AtomicUsize,
    delay: Duration,
}

impl ScriptedWorker {
    pub fn new(outcomes: Vec<Result<Outcome, String>>) -> Self {
        Self::with_reports(
            outcomes
                .into_iter()
                .map(|r| r.map(AttemptReport::new))
                .collect(),
        )
    }

    pub fn with_reports(reports: Vec<Result<AttemptReport, String>>) -> Self {
        Self {
            script: Mutex::new(reports.into()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutomationWorker for ScriptedWorker {
    async fn submit(
        &self,
        application: &ApplicationRow,
        cv: &MaterializedCv,
    ) -> Result<AttemptReport, EngineError> {
        assert!(cv.path().exists(), "CV must be materialized during submit");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(application.id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(EngineError::SessionLost(message)),
            None => Ok(AttemptReport::new(Outcome::success())),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
