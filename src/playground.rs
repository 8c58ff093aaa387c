//! Instance manager: create, step, and inspect running scripts.
//!
//! The playground owns a registry of independent instances, each pairing an
//! assembly with its own execution context and exclusive browser session.
//! External controllers drive instances one instruction at a time through
//! [`Playground::step`]; different instances step concurrently, while two
//! steps on the same instance serialize on that instance's lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::artifacts::{ArtifactError, MemoryScreenshotStore, ScreenshotStore};
use crate::browser::{Browser, BrowserError, StaticBrowser};
use crate::events::{
    EngineEvent, EventDispatcher, EventHandler, InstanceCreatedEvent, InstanceRemovedEvent,
    LoggingHandler, ScreenshotCapturedEvent, StepExecutedEvent, StepFailedEvent,
};
use crate::runtime::{ExecError, ScriptContext};
use crate::script::{self, Assembly, Literal, ParserIssue};

/// Instance ids start above this value unless the builder overrides it.
pub const DEFAULT_INSTANCE_ID_BASE: u64 = 10_000;

/// Monotonic instance-id source.
///
/// Callers must not assume any particular starting value, only that ids are
/// unique and increasing for the life of the allocator.
#[derive(Debug)]
pub struct InstanceIdAllocator {
    next: AtomicU64,
}

impl InstanceIdAllocator {
    pub fn new(base: u64) -> Self {
        Self {
            next: AtomicU64::new(base),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("no instance with id {0}")]
    UnknownInstance(u64),
    #[error("instance {id} has finished: all {len} instructions executed")]
    AssemblyExhausted { id: u64, len: usize },
    #[error("step {address} ({command}) failed: {source}")]
    Step {
        address: usize,
        command: String,
        #[source]
        source: ExecError,
    },
    #[error("screenshot capture for instance {id} failed: {source}")]
    Capture {
        id: u64,
        #[source]
        source: ExecError,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Serializable view of one instance, shaped for the hosting API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: u64,
    pub instruction_pointer: usize,
    pub instruction_count: usize,
    pub finished: bool,
    pub origin: String,
    pub fields: HashMap<String, String>,
    pub vars: HashMap<String, Literal>,
    pub last_screenshot: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of uploading a script.
///
/// Diagnostics ride along with the best-effort assembly; whether errors are
/// fatal is the caller's policy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInstance {
    pub snapshot: InstanceSnapshot,
    pub assembly: Assembly,
    pub diagnostics: Vec<ParserIssue>,
}

struct InstanceState {
    id: u64,
    source: String,
    assembly: Arc<Assembly>,
    context: ScriptContext,
    pointer: usize,
    screenshot_seq: u64,
    last_screenshot: Option<String>,
    created_at: DateTime<Utc>,
}

impl InstanceState {
    fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id,
            instruction_pointer: self.pointer,
            instruction_count: self.assembly.len(),
            finished: self.pointer >= self.assembly.len(),
            origin: self.context.origin().to_string(),
            fields: self.context.fields().clone(),
            vars: self.context.vars().clone(),
            last_screenshot: self.last_screenshot.clone(),
            created_at: self.created_at,
        }
    }
}

/// Builder configuring the playground's collaborators.
pub struct PlaygroundBuilder {
    browser: Option<Arc<dyn Browser>>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
    id_base: u64,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl PlaygroundBuilder {
    pub fn new() -> Self {
        Self {
            browser: None,
            screenshots: None,
            id_base: DEFAULT_INSTANCE_ID_BASE,
            handlers: Vec::new(),
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_screenshot_store(mut self, store: Arc<dyn ScreenshotStore>) -> Self {
        self.screenshots = Some(store);
        self
    }

    /// Override the first instance id handed out, for deterministic tests.
    pub fn with_instance_id_base(mut self, base: u64) -> Self {
        self.id_base = base;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Build the playground. Defaults: the bundled static browser, an
    /// in-memory screenshot store, and a logging event handler.
    pub fn build(self) -> Result<Playground, BrowserError> {
        let browser = match self.browser {
            Some(browser) => browser,
            None => Arc::new(StaticBrowser::new()?),
        };
        let screenshots = self
            .screenshots
            .unwrap_or_else(|| Arc::new(MemoryScreenshotStore::new()));

        let mut events = EventDispatcher::new();
        events.register_handler(Arc::new(LoggingHandler));
        for handler in self.handlers {
            events.register_handler(handler);
        }

        Ok(Playground {
            browser,
            screenshots,
            ids: InstanceIdAllocator::new(self.id_base),
            instances: RwLock::new(HashMap::new()),
            events,
        })
    }
}

impl Default for PlaygroundBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of independent script instances.
pub struct Playground {
    browser: Arc<dyn Browser>,
    screenshots: Arc<dyn ScreenshotStore>,
    ids: InstanceIdAllocator,
    instances: RwLock<HashMap<u64, Arc<Mutex<InstanceState>>>>,
    events: EventDispatcher,
}

impl Playground {
    pub fn builder() -> PlaygroundBuilder {
        PlaygroundBuilder::new()
    }

    pub fn new() -> Result<Self, BrowserError> {
        Self::builder().build()
    }

    /// Upload a script: validate, assemble, and register a fresh instance
    /// with its pointer at 0. Diagnostics never block creation.
    pub fn create(&self, source: &str) -> CreatedInstance {
        let parsed = script::parse(source);
        let id = self.ids.allocate();
        let assembly = Arc::new(parsed.assembly);

        let state = InstanceState {
            id,
            source: source.to_string(),
            assembly: assembly.clone(),
            context: ScriptContext::new(self.browser.clone()),
            pointer: 0,
            screenshot_seq: 0,
            last_screenshot: None,
            created_at: Utc::now(),
        };
        let snapshot = state.snapshot();

        self.instances
            .write()
            .expect("instance registry poisoned")
            .insert(id, Arc::new(Mutex::new(state)));

        self.events
            .dispatch(EngineEvent::InstanceCreated(InstanceCreatedEvent {
                id,
                instructions: assembly.len(),
                diagnostics: parsed.diagnostics.len(),
                timestamp: Utc::now(),
            }));

        CreatedInstance {
            snapshot,
            assembly: (*assembly).clone(),
            diagnostics: parsed.diagnostics,
        }
    }

    /// Execute the instruction at the pointer and advance past it.
    ///
    /// On failure the pointer stays where it was, so the caller can retry
    /// or abandon the instance. After a successful step with an open session
    /// a screenshot is captured best-effort and noted in the snapshot.
    pub async fn step(&self, id: u64) -> Result<InstanceSnapshot, PlaygroundError> {
        let instance = self.instance(id)?;
        let mut state = instance.lock().await;

        let address = state.pointer;
        let Some(instruction) = state.assembly.get(address).cloned() else {
            return Err(PlaygroundError::AssemblyExhausted {
                id,
                len: state.assembly.len(),
            });
        };

        if let Err(source) = state.context.apply(&instruction).await {
            self.events.dispatch(EngineEvent::StepFailed(StepFailedEvent {
                id,
                address,
                command: instruction.command.clone(),
                error: source.to_string(),
                timestamp: Utc::now(),
            }));
            return Err(PlaygroundError::Step {
                address,
                command: instruction.command,
                source,
            });
        }

        state.pointer = address + 1;
        self.events
            .dispatch(EngineEvent::StepExecuted(StepExecutedEvent {
                id,
                address,
                command: instruction.command,
                timestamp: Utc::now(),
            }));

        if state.context.session_open() {
            match self.capture_locked(&mut state).await {
                Ok(Some(identifier)) => self.events.dispatch(EngineEvent::ScreenshotCaptured(
                    ScreenshotCapturedEvent {
                        id,
                        screenshot: identifier,
                        timestamp: Utc::now(),
                    },
                )),
                Ok(None) => {}
                Err(err) => log::warn!("post-step screenshot for instance {id} failed: {err}"),
            }
        }

        Ok(state.snapshot())
    }

    /// Capture a screenshot of the instance's session right now.
    ///
    /// Returns `None` when no session is open; capture or persistence
    /// failures are errors, unlike the best-effort capture after a step.
    pub async fn screenshot(&self, id: u64) -> Result<Option<String>, PlaygroundError> {
        let instance = self.instance(id)?;
        let mut state = instance.lock().await;
        let captured = self.capture_locked(&mut state).await?;
        if let Some(identifier) = &captured {
            self.events.dispatch(EngineEvent::ScreenshotCaptured(
                ScreenshotCapturedEvent {
                    id,
                    screenshot: identifier.clone(),
                    timestamp: Utc::now(),
                },
            ));
        }
        Ok(captured)
    }

    /// Drop an instance, discarding its session. Returns whether it existed.
    pub async fn remove(&self, id: u64) -> bool {
        let removed = self
            .instances
            .write()
            .expect("instance registry poisoned")
            .remove(&id);

        match removed {
            Some(instance) => {
                instance.lock().await.context.shutdown();
                self.events
                    .dispatch(EngineEvent::InstanceRemoved(InstanceRemovedEvent {
                        id,
                        timestamp: Utc::now(),
                    }));
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self, id: u64) -> Result<InstanceSnapshot, PlaygroundError> {
        let instance = self.instance(id)?;
        let state = instance.lock().await;
        Ok(state.snapshot())
    }

    pub async fn assembly(&self, id: u64) -> Result<Arc<Assembly>, PlaygroundError> {
        let instance = self.instance(id)?;
        let state = instance.lock().await;
        Ok(state.assembly.clone())
    }

    pub async fn source(&self, id: u64) -> Result<String, PlaygroundError> {
        let instance = self.instance(id)?;
        let state = instance.lock().await;
        Ok(state.source.clone())
    }

    /// Ids of every registered instance, in creation order.
    pub fn instance_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .instances
            .read()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    async fn capture_locked(
        &self,
        state: &mut InstanceState,
    ) -> Result<Option<String>, PlaygroundError> {
        let bytes = match state.context.capture().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(source) => return Err(PlaygroundError::Capture {
                id: state.id,
                source,
            }),
        };

        state.screenshot_seq += 1;
        let identifier = format!("{}-{}", state.id, state.screenshot_seq);
        self.screenshots.persist(&identifier, bytes).await?;
        state.last_screenshot = Some(identifier.clone());
        Ok(Some(identifier))
    }

    /// Registry lookup. The read lock is released before any await.
    fn instance(&self, id: u64) -> Result<Arc<Mutex<InstanceState>>, PlaygroundError> {
        self.instances
            .read()
            .ok()
            .and_then(|map| map.get(&id).cloned())
            .ok_or(PlaygroundError::UnknownInstance(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MemoryFetcher;

    const PAGE: &str = r#"
        <html><body>
            <div class="row"><span class="name">alpha</span></div>
            <div class="row"><span class="name">beta</span></div>
        </body></html>
    "#;

    fn playground() -> (Playground, Arc<MemoryScreenshotStore>) {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("https://example.com/page", PAGE);
        let store = Arc::new(MemoryScreenshotStore::new());
        let playground = Playground::builder()
            .with_browser(Arc::new(StaticBrowser::from_fetcher(Arc::new(fetcher))))
            .with_screenshot_store(store.clone())
            .build()
            .unwrap();
        (playground, store)
    }

    #[test]
    fn ids_are_monotonic_from_the_default_base() {
        let (playground, _) = playground();
        let first = playground.create("open");
        let second = playground.create("open");
        assert_eq!(first.snapshot.id, DEFAULT_INSTANCE_ID_BASE);
        assert_eq!(second.snapshot.id, DEFAULT_INSTANCE_ID_BASE + 1);
    }

    #[test]
    fn id_base_is_injectable() {
        let fetcher = MemoryFetcher::new();
        let playground = Playground::builder()
            .with_browser(Arc::new(StaticBrowser::from_fetcher(Arc::new(fetcher))))
            .with_instance_id_base(500)
            .build()
            .unwrap();
        assert_eq!(playground.create("open").snapshot.id, 500);
    }

    #[test]
    fn creation_reports_diagnostics_with_the_assembly() {
        let (playground, _) = playground();
        let created = playground.create("origin: https://example.com/page\nfoo: 1");
        assert_eq!(created.assembly.len(), 2);
        assert_eq!(created.diagnostics.len(), 1);
        assert_eq!(created.snapshot.instruction_pointer, 0);
        assert!(!created.snapshot.finished);
    }

    #[tokio::test]
    async fn steps_run_the_script_to_completion() {
        let (playground, store) = playground();
        let id = playground
            .create(
                "origin: https://example.com/page\n\
                 var: attempt 1\n\
                 open\n\
                 select_all: .row\n\
                 save_selection: rows\n\
                 close",
            )
            .snapshot
            .id;

        let mut last = None;
        for _ in 0..6 {
            last = Some(playground.step(id).await.unwrap());
        }
        let snapshot = last.unwrap();
        assert!(snapshot.finished);
        assert_eq!(snapshot.instruction_pointer, 6);
        assert_eq!(snapshot.origin, "https://example.com/page");
        assert_eq!(snapshot.vars["attempt"], Literal::Number(1.0));
        // open, select_all, save_selection ran with a session open.
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn stepping_past_the_end_fails() {
        let (playground, _) = playground();
        let id = playground.create("var: done true").snapshot.id;
        playground.step(id).await.unwrap();
        let err = playground.step(id).await.unwrap_err();
        assert!(matches!(
            err,
            PlaygroundError::AssemblyExhausted { len: 1, .. }
        ));
    }

    #[tokio::test]
    async fn a_failed_step_does_not_advance_the_pointer() {
        let (playground, _) = playground();
        let id = playground.create("select: .row\nclose").snapshot.id;

        let err = playground.step(id).await.unwrap_err();
        match err {
            PlaygroundError::Step {
                address, command, ..
            } => {
                assert_eq!(address, 0);
                assert_eq!(command, "select");
            }
            other => panic!("expected a step error, got {other:?}"),
        }
        let snapshot = playground.snapshot(id).await.unwrap();
        assert_eq!(snapshot.instruction_pointer, 0);
    }

    #[tokio::test]
    async fn screenshots_are_numbered_per_instance() {
        let (playground, store) = playground();
        let id = playground
            .create("origin: https://example.com/page\nopen")
            .snapshot
            .id;
        playground.step(id).await.unwrap();
        let after_open = playground.step(id).await.unwrap();
        assert_eq!(after_open.last_screenshot.as_deref(), Some("10000-1"));

        let explicit = playground.screenshot(id).await.unwrap();
        assert_eq!(explicit.as_deref(), Some("10000-2"));
        assert_eq!(store.len(), 2);
        assert!(store.retrieve("10000-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn screenshot_without_a_session_is_none() {
        let (playground, _) = playground();
        let id = playground.create("var: x 1").snapshot.id;
        assert!(playground.screenshot(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_instances_are_rejected() {
        let (playground, _) = playground();
        assert!(matches!(
            playground.step(42).await.unwrap_err(),
            PlaygroundError::UnknownInstance(42)
        ));
        assert!(matches!(
            playground.snapshot(42).await.unwrap_err(),
            PlaygroundError::UnknownInstance(42)
        ));
    }

    #[tokio::test]
    async fn removal_drops_the_instance() {
        let (playground, _) = playground();
        let id = playground.create("open").snapshot.id;
        assert!(playground.remove(id).await);
        assert!(!playground.remove(id).await);
        assert!(matches!(
            playground.step(id).await.unwrap_err(),
            PlaygroundError::UnknownInstance(_)
        ));
        assert!(playground.instance_ids().is_empty());
    }

    struct RecordingHandler(std::sync::Mutex<Vec<&'static str>>);

    impl EventHandler for RecordingHandler {
        fn handle(&self, event: &EngineEvent) {
            let label = match event {
                EngineEvent::InstanceCreated(_) => "created",
                EngineEvent::StepExecuted(_) => "step",
                EngineEvent::StepFailed(_) => "failed",
                EngineEvent::ScreenshotCaptured(_) => "screenshot",
                EngineEvent::InstanceRemoved(_) => "removed",
            };
            self.0.lock().unwrap().push(label);
        }
    }

    #[tokio::test]
    async fn lifecycle_events_reach_registered_handlers() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("https://example.com/page", PAGE);
        let recorder = Arc::new(RecordingHandler(std::sync::Mutex::new(Vec::new())));
        let playground = Playground::builder()
            .with_browser(Arc::new(StaticBrowser::from_fetcher(Arc::new(fetcher))))
            .with_event_handler(recorder.clone())
            .build()
            .unwrap();

        let id = playground
            .create("origin: https://example.com/page\nopen\nselect: .missing-page")
            .snapshot
            .id;
        playground.step(id).await.unwrap();
        playground.step(id).await.unwrap();
        playground.remove(id).await;

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["created", "step", "step", "screenshot", "removed"]
        );
    }
}
