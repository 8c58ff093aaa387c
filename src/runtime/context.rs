//! Per-instance interpreter state and command semantics.
//!
//! A `ScriptContext` owns everything one running script can touch: its
//! origin URL, field and variable bindings, the most recent selection, named
//! selection snapshots, and at most one open page session. Instructions are
//! dispatched through [`ScriptContext::apply`], which resolves the command
//! name against the grammar and fans out to one method per command.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::browser::{Browser, BrowserError, NodeRef, PageSession};
use crate::script::{Command, Instruction, Literal};

/// `{{name}}` tokens a `field` command substitutes inside the origin.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder regex is valid"));

/// Result of the most recent selection instruction.
///
/// `Empty` is the null selection. An empty `List` is not `Empty`: a
/// `select_all` with zero matches still produces a list.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Empty,
    Node(NodeRef),
    List(Vec<NodeRef>),
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Empty)
    }

    /// How many nodes the selection holds.
    pub fn node_count(&self) -> usize {
        match self {
            Selection::Empty => 0,
            Selection::Node(_) => 1,
            Selection::List(nodes) => nodes.len(),
        }
    }
}

/// Failure of a single instruction.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),
    #[error("wrong number of arguments for {command}: expected {expected}, found {found}")]
    ArgumentCount {
        command: Command,
        expected: String,
        found: usize,
    },
    #[error("no open session; run open before {0}")]
    SessionRequired(Command),
    #[error("origin \"{url}\" is not a valid url: {source}")]
    InvalidOrigin {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// The mutable state of one running script instance.
pub struct ScriptContext {
    browser: Arc<dyn Browser>,
    origin: String,
    fields: HashMap<String, String>,
    vars: HashMap<String, Literal>,
    last_selection: Selection,
    saved_selections: HashMap<String, Selection>,
    session: Option<Arc<dyn PageSession>>,
}

impl ScriptContext {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self {
            browser,
            origin: String::new(),
            fields: HashMap::new(),
            vars: HashMap::new(),
            last_selection: Selection::Empty,
            saved_selections: HashMap::new(),
            session: None,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn vars(&self) -> &HashMap<String, Literal> {
        &self.vars
    }

    pub fn last_selection(&self) -> &Selection {
        &self.last_selection
    }

    pub fn saved_selection(&self, name: &str) -> Option<&Selection> {
        self.saved_selections.get(name)
    }

    pub fn session_open(&self) -> bool {
        self.session.is_some()
    }

    /// Execute one instruction. The command name is resolved against the
    /// grammar and the argument count is enforced from the same signature
    /// table the validator uses; a mismatch on either is an execution error.
    pub async fn apply(&mut self, instruction: &Instruction) -> Result<(), ExecError> {
        let Some(command) = Command::from_name(&instruction.command) else {
            return Err(ExecError::UnknownCommand(instruction.command.clone()));
        };

        let args = &instruction.arguments;
        let signature = command.signature();
        if !signature.accepts_count(args.len()) {
            return Err(ExecError::ArgumentCount {
                command,
                expected: signature.expectation(),
                found: args.len(),
            });
        }

        log::debug!("dispatching {} with {} arguments", command, args.len());
        match command {
            Command::Origin => {
                self.set_origin(args[0].as_text());
                Ok(())
            }
            Command::Field => {
                self.set_field(args[0].as_text(), args[1].as_text());
                Ok(())
            }
            Command::Var => {
                self.set_var(args[0].as_text(), args[1].clone());
                Ok(())
            }
            Command::Open => self.open().await,
            Command::Close => self.close().await,
            Command::Select => self.select(&args[0].as_text()).await,
            Command::SelectAll => self.select_all(&args[0].as_text()).await,
            Command::SelectFrom => {
                self.select_from(&args[0].as_text(), &args[1].as_text()).await
            }
            Command::SelectAllFrom => {
                self.select_all_from(&args[0].as_text(), &args[1].as_text())
                    .await
            }
            Command::SaveSelection => {
                self.save_selection(args[0].as_text());
                Ok(())
            }
        }
    }

    /// Replace the origin verbatim, placeholders intact.
    pub fn set_origin(&mut self, url: String) {
        self.origin = url;
    }

    /// Bind a field and substitute every `{{name}}` occurrence in the origin
    /// with its value.
    pub fn set_field(&mut self, name: String, value: String) {
        self.origin = self.origin.replace(&placeholder(&name), &value);
        self.fields.insert(name, value);
    }

    /// Bind a variable verbatim. Variables never substitute into anything.
    pub fn set_var(&mut self, name: String, value: Literal) {
        self.vars.insert(name, value);
    }

    /// Open a page at the current origin.
    ///
    /// An already-open session is discarded without waiting for its close to
    /// finish; see [`ScriptContext::discard_session`].
    pub async fn open(&mut self) -> Result<(), ExecError> {
        let unresolved: Vec<&str> = PLACEHOLDER_RE
            .captures_iter(&self.origin)
            .filter_map(|captures| captures.get(1))
            .map(|group| group.as_str())
            .collect();
        if !unresolved.is_empty() {
            log::warn!(
                "origin {} still contains unresolved placeholders: {}",
                self.origin,
                unresolved.join(", ")
            );
        }

        // A still-open session goes away first, whether or not the new
        // navigation succeeds.
        self.discard_session();

        let url = Url::parse(&self.origin).map_err(|source| ExecError::InvalidOrigin {
            url: self.origin.clone(),
            source,
        })?;

        let session = self.browser.open(&url).await?;
        log::info!("opened session on page {} at {}", session.page_id(), url);
        self.session = Some(session);
        Ok(())
    }

    /// Close the open session, if any.
    pub async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(session) = self.session.take() {
            log::info!("closing session on page {}", session.page_id());
            session.close().await?;
        }
        Ok(())
    }

    /// Drop the current session without awaiting its close.
    ///
    /// The close runs on a background task and may still be in flight while
    /// a replacement session opens; out-of-order completion is tolerated.
    /// Outside a tokio runtime there is nothing to run the close on, so the
    /// handle is dropped as-is.
    fn discard_session(&mut self) {
        if let Some(stale) = self.session.take() {
            log::warn!(
                "discarding still-open session on page {} without waiting",
                stale.page_id()
            );
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = stale.close().await {
                            log::warn!("background session close failed: {err}");
                        }
                    });
                }
                Err(_) => drop(stale),
            }
        }
    }

    /// First match for `selector` in the open document, or the null
    /// selection.
    pub async fn select(&mut self, selector: &str) -> Result<(), ExecError> {
        let session = self.require_session(Command::Select)?;
        self.last_selection = match session.query_first(selector, None).await? {
            Some(node) => Selection::Node(node),
            None => Selection::Empty,
        };
        Ok(())
    }

    /// Every match for `selector`, possibly an empty list.
    pub async fn select_all(&mut self, selector: &str) -> Result<(), ExecError> {
        let session = self.require_session(Command::SelectAll)?;
        self.last_selection = Selection::List(session.query_all(selector, None).await?);
        Ok(())
    }

    /// Query scoped to a saved selection.
    ///
    /// A saved single node scopes one first-match query. A saved list runs
    /// the query per root and keeps each root's first match, so the result
    /// is a list with at most one entry per root. An unbound name or a
    /// saved null selection yields the null selection.
    pub async fn select_from(&mut self, name: &str, selector: &str) -> Result<(), ExecError> {
        let session = self.require_session(Command::SelectFrom)?;
        let next = match self.saved_selections.get(name).cloned() {
            None | Some(Selection::Empty) => Selection::Empty,
            Some(Selection::Node(root)) => {
                match session.query_first(selector, Some(root)).await? {
                    Some(node) => Selection::Node(node),
                    None => Selection::Empty,
                }
            }
            Some(Selection::List(roots)) => {
                let mut found = Vec::new();
                for root in roots {
                    if let Some(node) = session.query_first(selector, Some(root)).await? {
                        found.push(node);
                    }
                }
                Selection::List(found)
            }
        };
        self.last_selection = next;
        Ok(())
    }

    /// Query-all scoped to a saved selection, flattening matches from every
    /// root into one list.
    pub async fn select_all_from(&mut self, name: &str, selector: &str) -> Result<(), ExecError> {
        let session = self.require_session(Command::SelectAllFrom)?;
        let next = match self.saved_selections.get(name).cloned() {
            None | Some(Selection::Empty) => Selection::Empty,
            Some(Selection::Node(root)) => {
                Selection::List(session.query_all(selector, Some(root)).await?)
            }
            Some(Selection::List(roots)) => {
                let mut found = Vec::new();
                for root in roots {
                    found.extend(session.query_all(selector, Some(root)).await?);
                }
                Selection::List(found)
            }
        };
        self.last_selection = next;
        Ok(())
    }

    /// Snapshot the last selection under `name`, overwriting any previous
    /// snapshot. Later selections do not change the snapshot.
    pub fn save_selection(&mut self, name: String) {
        self.saved_selections
            .insert(name, self.last_selection.clone());
    }

    /// Capture a screenshot of the open session, or `None` without one.
    pub async fn capture(&self) -> Result<Option<Bytes>, ExecError> {
        match &self.session {
            Some(session) => Ok(Some(session.screenshot().await?)),
            None => Ok(None),
        }
    }

    /// Discard the session without awaiting, for instance teardown. Safe to
    /// call with or without a running runtime.
    pub fn shutdown(&mut self) {
        self.discard_session();
    }

    fn require_session(&self, command: Command) -> Result<Arc<dyn PageSession>, ExecError> {
        self.session
            .clone()
            .ok_or(ExecError::SessionRequired(command))
    }
}

fn placeholder(name: &str) -> String {
    format!("{{{{{name}}}}}")
}
