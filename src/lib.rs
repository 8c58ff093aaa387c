//! # jdscript
//!
//! A line-oriented browser-automation scripting language with a validating
//! parser and a steppable execution engine.
//!
//! The language is deliberately small: a script is a flat list of commands,
//! one per line, with no loops or branches. The interesting part is the
//! runtime around it. Scripts execute one instruction at a time against an
//! exclusive browser session, so an external controller (a UI, an HTTP API)
//! can drive, inspect, and screenshot a run at every step.
//!
//! ## Features
//!
//! - Closed command grammar with one shared signature table
//! - Lenient lexer with quoted literals and primitive type coercion
//! - Validator reporting positioned warnings and errors, never failing
//! - Best-effort assembler: diagnostics never block an assembly
//! - Async interpreter with origin/field/var bindings and DOM selections
//! - Multi-instance playground with monotonic ids and screenshot artifacts
//! - Pluggable browser, transport, and screenshot-store collaborators
//!
//! ## Example
//!
//! ```no_run
//! use jdscript::Playground;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let playground = Playground::new()?;
//!     let created = playground.create(
//!         "origin: https://example.com/search?q={{q}}\n\
//!          field: q rust\n\
//!          open\n\
//!          select_all: a.result\n\
//!          save_selection: links",
//!     );
//!     let mut snapshot = created.snapshot;
//!     while !snapshot.finished {
//!         snapshot = playground.step(snapshot.id).await?;
//!         println!("at {}: origin {}", snapshot.instruction_pointer, snapshot.origin);
//!     }
//!     Ok(())
//! }
//! ```

mod playground;

pub mod artifacts;
pub mod browser;
pub mod events;
pub mod runtime;
pub mod script;

pub use crate::playground::{
    CreatedInstance,
    DEFAULT_INSTANCE_ID_BASE,
    InstanceIdAllocator,
    InstanceSnapshot,
    Playground,
    PlaygroundBuilder,
    PlaygroundError,
};

pub use crate::script::{
    ArgKind,
    Assembly,
    Command,
    CommandSignature,
    Instruction,
    IssueKind,
    IssueSeverity,
    Literal,
    ParsedScript,
    ParserIssue,
    parse,
    parse_script,
    validate_script,
};

pub use crate::runtime::{
    ExecError,
    ScriptContext,
    Selection,
};

pub use crate::browser::{
    Browser,
    BrowserError,
    MemoryFetcher,
    NodeRef,
    PageFetcher,
    PageSession,
    ReqwestPageFetcher,
    StaticBrowser,
    StaticBrowserConfig,
    StaticPage,
};

pub use crate::artifacts::{
    ArtifactError,
    FsScreenshotStore,
    MemoryScreenshotStore,
    ScreenshotStore,
};

pub use crate::events::{
    EngineEvent,
    EventDispatcher,
    EventHandler,
    InstanceCreatedEvent,
    InstanceRemovedEvent,
    LoggingHandler,
    ScreenshotCapturedEvent,
    StepExecutedEvent,
    StepFailedEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
