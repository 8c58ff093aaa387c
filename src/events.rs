//! Engine event system.
//!
//! Provides hooks for logging, metrics, and custom reactions around the
//! lifecycle of script instances.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An instance was created from uploaded source text.
#[derive(Debug, Clone)]
pub struct InstanceCreatedEvent {
    pub id: u64,
    pub instructions: usize,
    pub diagnostics: usize,
    pub timestamp: DateTime<Utc>,
}

/// One instruction executed and the pointer advanced.
#[derive(Debug, Clone)]
pub struct StepExecutedEvent {
    pub id: u64,
    pub address: usize,
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

/// One instruction failed; the pointer stayed put.
#[derive(Debug, Clone)]
pub struct StepFailedEvent {
    pub id: u64,
    pub address: usize,
    pub command: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// A screenshot was captured and persisted.
#[derive(Debug, Clone)]
pub struct ScreenshotCapturedEvent {
    pub id: u64,
    pub screenshot: String,
    pub timestamp: DateTime<Utc>,
}

/// An instance was removed from the registry.
#[derive(Debug, Clone)]
pub struct InstanceRemovedEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    InstanceCreated(InstanceCreatedEvent),
    StepExecuted(StepExecutedEvent),
    StepFailed(StepFailedEvent),
    ScreenshotCaptured(ScreenshotCapturedEvent),
    InstanceRemoved(InstanceRemovedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EngineEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: EngineEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &EngineEvent) {
        match event {
            EngineEvent::InstanceCreated(created) => {
                log::info!(
                    "instance {} created: {} instructions, {} diagnostics",
                    created.id,
                    created.instructions,
                    created.diagnostics
                );
            }
            EngineEvent::StepExecuted(step) => {
                log::debug!("instance {} step {} -> {}", step.id, step.address, step.command);
            }
            EngineEvent::StepFailed(failed) => {
                log::warn!(
                    "instance {} step {} ({}) failed: {}",
                    failed.id,
                    failed.address,
                    failed.command,
                    failed.error
                );
            }
            EngineEvent::ScreenshotCaptured(shot) => {
                log::debug!("instance {} captured {}", shot.id, shot.screenshot);
            }
            EngineEvent::InstanceRemoved(removed) => {
                log::info!("instance {} removed", removed.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &EngineEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.dispatch(EngineEvent::InstanceRemoved(InstanceRemovedEvent {
            id: 10000,
            timestamp: Utc::now(),
        }));
        dispatcher.dispatch(EngineEvent::StepExecuted(StepExecutedEvent {
            id: 10000,
            address: 0,
            command: "open".into(),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 2);
    }
}
