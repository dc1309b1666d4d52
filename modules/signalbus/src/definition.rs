//! Registrable definitions: events, notices, filters, handlers.

use std::fmt;
use std::sync::Arc;

use signalbus_mapping::Vars;

use crate::context::{Branch, Context};
use crate::Map;

/// A pipeline function. Calls `ctx.next()` to let the chain continue, or one
/// of the branch methods (`found`, `error`, `failed`, `denied`) to divert it.
/// Returning without doing either ends the current chain.
pub type CtxFn = Arc<dyn Fn(&mut Context) + Send + Sync>;

/// Wrap a closure as a [`CtxFn`].
pub fn hook<F>(f: F) -> CtxFn
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An inbound message kind.
#[derive(Clone, Default)]
pub struct EventDefinition {
    /// Canonical name. Filled in at registration.
    pub name: String,
    pub text: String,
    /// Wire-level names. Defaults to `[name]` at registration.
    pub alias: Vec<String>,
    /// Tolerate missing required arguments.
    pub nullable: bool,
    pub args: Option<Vars>,
    pub setting: Map,

    pub action: Option<CtxFn>,
    /// Run in order before `action`.
    pub actions: Vec<CtxFn>,

    pub found: Option<CtxFn>,
    pub error: Option<CtxFn>,
    pub failed: Option<CtxFn>,
    pub denied: Option<CtxFn>,

    /// Owning role or partition. Documentation only.
    pub group: String,
    /// Connection this event is subscribed on. Empty means every connection.
    pub connect: String,
    /// Take `group` from the node role when it is empty.
    pub grouping: bool,
    /// Cap on concurrent executions of this event on one node.
    pub concurrency: Option<usize>,
}

impl EventDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.action = Some(hook(f));
        self
    }

    pub fn with_pre_action<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.actions.push(hook(f));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_alias<I, S>(mut self, alias: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alias = alias.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args(mut self, args: Vars) -> Self {
        self.args = Some(args);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_setting(mut self, setting: Map) -> Self {
        self.setting = setting;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn grouping(mut self) -> Self {
        self.grouping = true;
        self
    }

    pub fn with_connect(mut self, connect: impl Into<String>) -> Self {
        self.connect = connect.into();
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Per-event override for one terminal branch.
    pub fn on<F>(mut self, branch: Branch, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        let slot = match branch {
            Branch::Found => &mut self.found,
            Branch::Error => &mut self.error,
            Branch::Failed => &mut self.failed,
            Branch::Denied => &mut self.denied,
        };
        *slot = Some(hook(f));
        self
    }

    pub(crate) fn terminal(&self, branch: Branch) -> Option<&CtxFn> {
        match branch {
            Branch::Found => self.found.as_ref(),
            Branch::Error => self.error.as_ref(),
            Branch::Failed => self.failed.as_ref(),
            Branch::Denied => self.denied.as_ref(),
        }
    }
}

impl fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDefinition")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("nullable", &self.nullable)
            .field("args", &self.args)
            .field("actions", &(self.actions.len() + usize::from(self.action.is_some())))
            .field("group", &self.group)
            .field("connect", &self.connect)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// An event this node promises to emit. Only shapes outbound payloads.
#[derive(Debug, Clone, Default)]
pub struct NoticeDefinition {
    pub name: String,
    pub text: String,
    pub nullable: bool,
    pub args: Option<Vars>,
}

impl NoticeDefinition {
    pub fn new(args: Vars) -> Self {
        Self {
            args: Some(args),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Middleware run for every event.
#[derive(Clone, Default)]
pub struct FilterDefinition {
    pub name: String,
    pub text: String,
    pub request: Option<CtxFn>,
    pub execute: Option<CtxFn>,
    pub response: Option<CtxFn>,
}

impl FilterDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.request = Some(hook(f));
        self
    }

    pub fn on_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.execute = Some(hook(f));
        self
    }

    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.response = Some(hook(f));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDefinition")
            .field("name", &self.name)
            .field("request", &self.request.is_some())
            .field("execute", &self.execute.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

/// Global terminal-branch hooks. Run after any per-event override.
#[derive(Clone, Default)]
pub struct HandlerDefinition {
    pub name: String,
    pub text: String,
    pub found: Option<CtxFn>,
    pub error: Option<CtxFn>,
    pub failed: Option<CtxFn>,
    pub denied: Option<CtxFn>,
}

impl HandlerDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, branch: Branch, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        let slot = match branch {
            Branch::Found => &mut self.found,
            Branch::Error => &mut self.error,
            Branch::Failed => &mut self.failed,
            Branch::Denied => &mut self.denied,
        };
        *slot = Some(hook(f));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub(crate) fn terminal(&self, branch: Branch) -> Option<&CtxFn> {
        match branch {
            Branch::Found => self.found.as_ref(),
            Branch::Error => self.error.as_ref(),
            Branch::Failed => self.failed.as_ref(),
            Branch::Denied => self.denied.as_ref(),
        }
    }
}

impl fmt::Debug for HandlerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("name", &self.name)
            .field("found", &self.found.is_some())
            .field("error", &self.error.is_some())
            .field("failed", &self.failed.is_some())
            .field("denied", &self.denied.is_some())
            .finish()
    }
}
