//! Per-message execution context.
//!
//! A context owns the pending step list for the stage currently running and a
//! cursor into it. [`Context::run`] is the only driver: it pops one step at a
//! time and continues only if that step called [`Context::next`] or diverted
//! to a terminal branch. Nothing recurses, so chain length is not bounded by
//! the stack.

use std::fmt;
use std::sync::Arc;

use chrono::FixedOffset;
use signalbus_mapping::Mapping;
use tracing::debug;

use crate::definition::{CtxFn, EventDefinition};
use crate::metadata::Metadata;
use crate::pipeline::{self, Stage};
use crate::registry::Registry;
use crate::Map;

/// The four short-circuit branches a message can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// No event is bound to the received alias.
    Found,
    Error,
    /// Arguments did not satisfy the event's schema.
    Failed,
    Denied,
}

impl Branch {
    pub const ALL: [Branch; 4] = [Branch::Found, Branch::Error, Branch::Failed, Branch::Denied];

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Found => "found",
            Branch::Error => "error",
            Branch::Failed => "failed",
            Branch::Denied => "denied",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub(crate) enum Step {
    Stage(Stage),
    Hook(CtxFn),
}

pub struct Context {
    /// Canonical event name, empty when the alias did not resolve.
    pub name: String,
    /// Alias as received, with the connection prefix stripped.
    pub alias: String,
    /// Instance the message arrived on.
    pub connection: String,
    pub metadata: Metadata,
    /// Raw payload.
    pub value: Map,
    /// Arguments materialized by the schema, plus whatever hooks add.
    pub args: Map,

    pub(crate) event: Option<Arc<EventDefinition>>,
    pub(crate) registry: Arc<Registry>,

    steps: Vec<Step>,
    cursor: usize,
    advance: bool,

    branch: Option<Branch>,
    mapping: Option<Mapping>,
    error: Option<anyhow::Error>,
    denial: Option<String>,
}

impl Context {
    pub(crate) fn new(registry: Arc<Registry>, connection: &str, alias: &str) -> Self {
        Self {
            name: String::new(),
            alias: alias.to_string(),
            connection: connection.to_string(),
            metadata: Metadata::default(),
            value: Map::new(),
            args: Map::new(),
            event: None,
            registry,
            steps: Vec::new(),
            cursor: 0,
            advance: false,
            branch: None,
            mapping: None,
            error: None,
            denial: None,
        }
    }

    /// Install decoded metadata; its payload becomes the raw value.
    pub(crate) fn set_metadata(&mut self, mut metadata: Metadata) {
        self.value = metadata.payload.take().unwrap_or_default();
        self.metadata = metadata;
    }

    // ---------------------------------------------------------------------
    // Chain control
    // ---------------------------------------------------------------------

    /// Let the chain continue with the next pending step.
    pub fn next(&mut self) {
        self.advance = true;
    }

    pub(crate) fn clear(&mut self) {
        self.steps.clear();
        self.cursor = 0;
    }

    pub(crate) fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub(crate) fn push_hooks<'a>(&mut self, hooks: impl IntoIterator<Item = &'a CtxFn>) {
        self.steps
            .extend(hooks.into_iter().map(|h| Step::Hook(Arc::clone(h))));
    }

    /// Drive the pending steps until one declines to continue or none remain.
    pub(crate) fn run(&mut self) {
        self.advance = true;
        while self.advance {
            self.advance = false;
            let Some(step) = self.steps.get(self.cursor).cloned() else {
                break;
            };
            self.cursor += 1;
            match step {
                Step::Stage(stage) => pipeline::stage(self, stage),
                Step::Hook(hook) => hook(self),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Terminal branches
    // ---------------------------------------------------------------------

    /// Divert to the not-found chain.
    pub fn found(&mut self) {
        self.divert(Branch::Found);
    }

    /// Divert to the error chain, recording `err`.
    pub fn error(&mut self, err: impl Into<anyhow::Error>) {
        self.error = Some(err.into());
        self.divert(Branch::Error);
    }

    /// Divert to the failed chain, recording the mapping result.
    pub fn failed(&mut self, mapping: Mapping) {
        self.mapping = Some(mapping);
        self.divert(Branch::Failed);
    }

    /// Divert to the denied chain.
    pub fn denied(&mut self, reason: impl Into<String>) {
        self.denial = Some(reason.into());
        self.divert(Branch::Denied);
    }

    /// Replace the pending steps with the per-event override for `branch`
    /// (if any) followed by the global handlers for it.
    fn divert(&mut self, branch: Branch) {
        debug!(
            event = self.name.as_str(),
            alias = self.alias.as_str(),
            connection = self.connection.as_str(),
            branch = branch.as_str(),
            "Diverted to terminal chain"
        );
        self.branch = Some(branch);
        self.clear();
        if let Some(hook) = self.event.as_ref().and_then(|e| e.terminal(branch)) {
            let hook = Arc::clone(hook);
            self.push(Step::Hook(hook));
        }
        let registry = Arc::clone(&self.registry);
        self.push_hooks(registry.handlers_for(branch));
        self.advance = true;
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// The matched event, if the alias resolved.
    pub fn event(&self) -> Option<&EventDefinition> {
        self.event.as_deref()
    }

    /// The terminal branch taken most recently.
    pub fn branch(&self) -> Option<Branch> {
        self.branch
    }

    pub fn mapping(&self) -> Option<&Mapping> {
        self.mapping.as_ref()
    }

    pub fn last_error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    pub fn denial(&self) -> Option<&str> {
        self.denial.as_deref()
    }

    /// Offset used to read naive timestamps in the payload.
    pub fn timezone(&self) -> FixedOffset {
        self.metadata.offset()
    }

    /// The matched event's opaque settings.
    pub fn setting(&self) -> Option<&Map> {
        self.event.as_ref().map(|e| &e.setting)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("connection", &self.connection)
            .field("args", &self.args)
            .field("branch", &self.branch)
            .field("pending", &(self.steps.len() - self.cursor.min(self.steps.len())))
            .finish()
    }
}
