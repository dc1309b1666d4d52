//! Definition registry.
//!
//! Pure data plus registration rules. Mutated through `&mut self` while the
//! bus is being assembled; [`crate::EventBus::start`] moves it behind an `Arc`,
//! after which it is read-only for every instance and context.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use signalbus_mapping::Vars;
use tracing::{debug, warn};

use crate::config::{Config, DEFAULT};
use crate::context::Branch;
use crate::definition::{
    CtxFn, EventDefinition, FilterDefinition, HandlerDefinition, NoticeDefinition,
};
use crate::error::BusError;

/// Connection placeholder for events that did not name one.
const ANY: &str = "*";

/// Reverse-lookup key: the same alias may mean different events on
/// different connections.
pub fn relate(connection: &str, alias: &str) -> String {
    format!("{connection}-{alias}")
}

struct Named {
    name: String,
    hook: CtxFn,
}

/// A wire name a connection must subscribe to, and the event it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub group: String,
    pub alias: String,
    pub name: String,
}

#[derive(Default)]
pub struct Registry {
    events: HashMap<String, Arc<EventDefinition>>,
    notices: HashMap<String, NoticeDefinition>,
    filters: HashMap<String, FilterDefinition>,
    handlers: HashMap<String, HandlerDefinition>,
    configs: HashMap<String, Config>,

    relates: HashMap<String, String>,
    subscriptions: HashMap<String, Vec<Subscription>>,

    request_filters: Vec<Named>,
    execute_filters: Vec<Named>,
    response_filters: Vec<Named>,

    found_handlers: Vec<Named>,
    error_handlers: Vec<Named>,
    failed_handlers: Vec<Named>,
    denied_handlers: Vec<Named>,

    authorizer: Option<CtxFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register an inbound event. Without `override_existing`, a second
    /// registration under the same name is refused and the first stays intact.
    /// Repeated aliases collapse to one.
    pub fn register_event(
        &mut self,
        name: impl Into<String>,
        mut def: EventDefinition,
        override_existing: bool,
    ) -> Result<(), BusError> {
        let name = name.into();
        let mut released = Vec::new();
        if self.events.contains_key(&name) {
            if !override_existing {
                return Err(BusError::DuplicateEvent(name));
            }
            released = self
                .relates
                .iter()
                .filter(|(_, target)| **target == name)
                .map(|(key, _)| key.clone())
                .collect();
            self.relates.retain(|_, target| *target != name);
        }

        def.name = name.clone();
        if def.alias.is_empty() {
            def.alias = vec![name.clone()];
        }
        let mut seen = HashSet::new();
        def.alias.retain(|alias| seen.insert(alias.clone()));

        let connection = bound_connection(&def);
        for alias in &def.alias {
            if let Some(previous) = self.relates.insert(relate(connection, alias), name.clone()) {
                if previous != name {
                    warn!(
                        alias = alias.as_str(),
                        connection,
                        previous = previous.as_str(),
                        event = name.as_str(),
                        "Alias rebound to a different event"
                    );
                }
            }
        }

        debug!(event = name.as_str(), alias = ?def.alias, "Registered event");
        self.events.insert(name.clone(), Arc::new(def));
        self.restore(&name, released);
        Ok(())
    }

    /// Hand aliases an overridden event let go of back to another event that
    /// still declares them. Claimants are tried in name order.
    fn restore(&mut self, replaced: &str, released: Vec<String>) {
        let mut claimants: Vec<(&String, &Arc<EventDefinition>)> = self
            .events
            .iter()
            .filter(|(name, _)| name.as_str() != replaced)
            .collect();
        claimants.sort_by(|a, b| a.0.cmp(b.0));

        for key in released {
            if self.relates.contains_key(&key) {
                continue;
            }
            let claimant = claimants.iter().find(|(_, def)| {
                let connection = bound_connection(def);
                def.alias.iter().any(|alias| relate(connection, alias) == key)
            });
            match claimant {
                Some((other, _)) => {
                    warn!(
                        key = key.as_str(),
                        released_by = replaced,
                        event = other.as_str(),
                        "Alias returned to earlier event"
                    );
                    self.relates.insert(key, (*other).clone());
                }
                None => debug!(key = key.as_str(), event = replaced, "Alias released"),
            }
        }
    }

    pub fn register_notice(
        &mut self,
        name: impl Into<String>,
        mut def: NoticeDefinition,
        override_existing: bool,
    ) -> Result<(), BusError> {
        let name = name.into();
        if !override_existing && self.notices.contains_key(&name) {
            return Err(BusError::DuplicateNotice(name));
        }
        def.name = name.clone();
        debug!(notice = name.as_str(), "Registered notice");
        self.notices.insert(name, def);
        Ok(())
    }

    /// Register a filter. A taken name is skipped unless `override_existing`,
    /// in which case the new hooks replace the old ones in place.
    /// Returns whether the filter was accepted.
    pub fn register_filter(
        &mut self,
        name: impl Into<String>,
        mut def: FilterDefinition,
        override_existing: bool,
    ) -> bool {
        let name = name.into();
        if !override_existing && self.filters.contains_key(&name) {
            debug!(filter = name.as_str(), "Filter already registered, skipping");
            return false;
        }
        def.name = name.clone();
        place(&mut self.request_filters, &name, def.request.as_ref());
        place(&mut self.execute_filters, &name, def.execute.as_ref());
        place(&mut self.response_filters, &name, def.response.as_ref());
        self.filters.insert(name, def);
        true
    }

    /// Same conflict rules as [`Self::register_filter`].
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        mut def: HandlerDefinition,
        override_existing: bool,
    ) -> bool {
        let name = name.into();
        if !override_existing && self.handlers.contains_key(&name) {
            debug!(handler = name.as_str(), "Handler already registered, skipping");
            return false;
        }
        def.name = name.clone();
        for branch in Branch::ALL {
            let hook = def.terminal(branch);
            place(self.chain_mut(branch), &name, hook);
        }
        self.handlers.insert(name, def);
        true
    }

    /// Same conflict rules as filters. An empty name means [`DEFAULT`].
    pub fn register_config(
        &mut self,
        name: impl Into<String>,
        config: Config,
        override_existing: bool,
    ) -> bool {
        let mut name = name.into();
        if name.is_empty() {
            name = DEFAULT.to_string();
        }
        if !override_existing && self.configs.contains_key(&name) {
            return false;
        }
        self.configs.insert(name, config);
        true
    }

    pub fn register_configs<I, S>(&mut self, configs: I, override_existing: bool)
    where
        I: IntoIterator<Item = (S, Config)>,
        S: Into<String>,
    {
        for (name, config) in configs {
            self.register_config(name, config, override_existing);
        }
    }

    /// Replace the pass-through `authorizing` stage.
    pub fn register_authorizer<F>(&mut self, f: F)
    where
        F: Fn(&mut crate::Context) + Send + Sync + 'static,
    {
        self.authorizer = Some(Arc::new(f));
    }

    fn chain_mut(&mut self, branch: Branch) -> &mut Vec<Named> {
        match branch {
            Branch::Found => &mut self.found_handlers,
            Branch::Error => &mut self.error_handlers,
            Branch::Failed => &mut self.failed_handlers,
            Branch::Denied => &mut self.denied_handlers,
        }
    }

    // ---------------------------------------------------------------------
    // Sealing
    // ---------------------------------------------------------------------

    /// Materialize per-connection lookups for the connections about to open.
    /// Events without a connection are bound on all of them; an explicit
    /// binding for the same alias takes precedence.
    pub(crate) fn bind(&mut self, connections: &[String], role: &str) {
        for def in self.events.values_mut() {
            if def.grouping && def.group.is_empty() {
                Arc::make_mut(def).group = role.to_string();
            }
        }

        let any_prefix = relate(ANY, "");
        let wildcard: Vec<(String, String)> = self
            .relates
            .iter()
            .filter_map(|(key, name)| {
                key.strip_prefix(&any_prefix)
                    .map(|alias| (alias.to_string(), name.clone()))
            })
            .collect();
        for (alias, name) in wildcard {
            self.relates.remove(&relate(ANY, &alias));
            for connection in connections {
                self.relates
                    .entry(relate(connection, &alias))
                    .or_insert_with(|| name.clone());
            }
        }

        self.subscriptions.clear();
        for (name, def) in &self.events {
            let targets: Vec<&String> = if def.connect.is_empty() {
                connections.iter().collect()
            } else {
                match connections.iter().find(|c| **c == def.connect) {
                    Some(connection) => vec![connection],
                    None => {
                        warn!(
                            event = name.as_str(),
                            connection = def.connect.as_str(),
                            "Event bound to a connection that is not configured"
                        );
                        continue;
                    }
                }
            };
            for connection in targets {
                for alias in &def.alias {
                    if self.relates.get(&relate(connection, alias)) == Some(name) {
                        self.subscriptions
                            .entry(connection.clone())
                            .or_default()
                            .push(Subscription {
                                group: def.group.clone(),
                                alias: alias.clone(),
                                name: name.clone(),
                            });
                    }
                }
            }
        }
        for subs in self.subscriptions.values_mut() {
            subs.sort_by(|a, b| a.alias.cmp(&b.alias));
        }
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Canonical event name for `alias` as received on `connection`.
    pub fn resolve(&self, connection: &str, alias: &str) -> Option<&str> {
        self.relates
            .get(&relate(connection, alias))
            .or_else(|| self.relates.get(&relate(ANY, alias)))
            .map(String::as_str)
    }

    pub fn event(&self, name: &str) -> Option<Arc<EventDefinition>> {
        self.events.get(name).cloned()
    }

    pub fn events(&self) -> impl Iterator<Item = (&str, &EventDefinition)> {
        self.events.iter().map(|(n, def)| (n.as_str(), def.as_ref()))
    }

    pub fn notice(&self, name: &str) -> Option<&NoticeDefinition> {
        self.notices.get(name)
    }

    pub fn filter(&self, name: &str) -> Option<&FilterDefinition> {
        self.filters.get(name)
    }

    pub fn handler(&self, name: &str) -> Option<&HandlerDefinition> {
        self.handlers.get(name)
    }

    pub fn config(&self, name: &str) -> Option<&Config> {
        self.configs.get(name)
    }

    pub fn configs(&self) -> &HashMap<String, Config> {
        &self.configs
    }

    /// Subscriptions a connection must declare. Empty until the bus starts.
    pub fn subscriptions(&self, connection: &str) -> &[Subscription] {
        self.subscriptions
            .get(connection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn request_filters(&self) -> impl Iterator<Item = &CtxFn> {
        self.request_filters.iter().map(|n| &n.hook)
    }

    pub(crate) fn execute_filters(&self) -> impl Iterator<Item = &CtxFn> {
        self.execute_filters.iter().map(|n| &n.hook)
    }

    pub(crate) fn response_filters(&self) -> impl Iterator<Item = &CtxFn> {
        self.response_filters.iter().map(|n| &n.hook)
    }

    pub(crate) fn handlers_for(&self, branch: Branch) -> impl Iterator<Item = &CtxFn> {
        let chain = match branch {
            Branch::Found => &self.found_handlers,
            Branch::Error => &self.error_handlers,
            Branch::Failed => &self.failed_handlers,
            Branch::Denied => &self.denied_handlers,
        };
        chain.iter().map(|n| &n.hook)
    }

    pub(crate) fn authorizer(&self) -> Option<&CtxFn> {
        self.authorizer.as_ref()
    }

    // ---------------------------------------------------------------------
    // Catalog
    // ---------------------------------------------------------------------

    /// Everything this node consumes and emits, sorted by name.
    pub fn catalog(&self) -> Catalog {
        let mut events: Vec<EventDoc> = self
            .events
            .values()
            .map(|def| EventDoc {
                name: def.name.clone(),
                text: def.text.clone(),
                alias: def.alias.clone(),
                args: def.args.clone(),
                group: def.group.clone(),
                connect: def.connect.clone(),
            })
            .collect();
        events.sort_by(|a, b| a.name.cmp(&b.name));

        let mut notices: Vec<NoticeDoc> = self
            .notices
            .values()
            .map(|def| NoticeDoc {
                name: def.name.clone(),
                text: def.text.clone(),
                nullable: def.nullable,
                args: def.args.clone(),
            })
            .collect();
        notices.sort_by(|a, b| a.name.cmp(&b.name));

        Catalog { events, notices }
    }
}

fn bound_connection(def: &EventDefinition) -> &str {
    if def.connect.is_empty() {
        ANY
    } else {
        def.connect.as_str()
    }
}

/// Replace `name`'s hook in `chain` in place, append it, or drop it when the
/// new definition no longer implements this stage.
fn place(chain: &mut Vec<Named>, name: &str, hook: Option<&CtxFn>) {
    match (chain.iter().position(|n| n.name == name), hook) {
        (Some(pos), Some(hook)) => chain[pos].hook = Arc::clone(hook),
        (Some(pos), None) => {
            chain.remove(pos);
        }
        (None, Some(hook)) => chain.push(Named {
            name: name.to_string(),
            hook: Arc::clone(hook),
        }),
        (None, None) => {}
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub events: Vec<EventDoc>,
    pub notices: Vec<NoticeDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDoc {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub alias: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vars>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub connect: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoticeDoc {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vars>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalbus_mapping::Var;

    fn names(connections: &[&str]) -> Vec<String> {
        connections.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn relate_joins_with_dash() {
        assert_eq!(relate("primary", "pay.finish"), "primary-pay.finish");
    }

    #[test]
    fn duplicate_event_is_refused_and_first_kept() {
        let mut registry = Registry::new();
        registry
            .register_event("pay.finish", EventDefinition::new().with_text("first"), false)
            .unwrap();

        let err = registry
            .register_event("pay.finish", EventDefinition::new().with_text("second"), false)
            .unwrap_err();

        assert!(matches!(err, BusError::DuplicateEvent(ref n) if n == "pay.finish"));
        assert_eq!(registry.event("pay.finish").unwrap().text, "first");
    }

    #[test]
    fn override_replaces_event_and_its_aliases() {
        let mut registry = Registry::new();
        registry
            .register_event(
                "pay.finish",
                EventDefinition::new().with_alias(["pay.done"]),
                false,
            )
            .unwrap();
        registry
            .register_event(
                "pay.finish",
                EventDefinition::new().with_alias(["pay.complete"]),
                true,
            )
            .unwrap();

        assert_eq!(registry.resolve("any", "pay.done"), None);
        assert_eq!(registry.resolve("any", "pay.complete"), Some("pay.finish"));
    }

    #[test]
    fn alias_defaults_to_name() {
        let mut registry = Registry::new();
        registry
            .register_event("pay.finish", EventDefinition::new(), false)
            .unwrap();
        assert_eq!(registry.event("pay.finish").unwrap().alias, vec!["pay.finish"]);
    }

    #[test]
    fn repeated_aliases_collapse() {
        let mut registry = Registry::new();
        registry
            .register_event(
                "job",
                EventDefinition::new().with_alias(["job", "job", "task", "job"]),
                false,
            )
            .unwrap();
        assert_eq!(registry.event("job").unwrap().alias, vec!["job", "task"]);

        registry.bind(&names(&[DEFAULT]), "");
        assert_eq!(registry.subscriptions(DEFAULT).len(), 2);
    }

    #[test]
    fn override_returns_released_alias_to_earlier_claimant() {
        let mut registry = Registry::new();
        registry
            .register_event("a", EventDefinition::new().with_alias(["job"]), false)
            .unwrap();
        registry
            .register_event("b", EventDefinition::new().with_alias(["job"]), false)
            .unwrap();
        assert_eq!(registry.resolve("any", "job"), Some("b"));

        registry
            .register_event("b", EventDefinition::new().with_alias(["other"]), true)
            .unwrap();

        assert_eq!(registry.resolve("any", "job"), Some("a"));
        assert_eq!(registry.resolve("any", "other"), Some("b"));
    }

    #[test]
    fn restored_alias_respects_connection() {
        let mut registry = Registry::new();
        registry
            .register_event(
                "legacy",
                EventDefinition::new().with_alias(["job"]).with_connect("old"),
                false,
            )
            .unwrap();
        registry
            .register_event("b", EventDefinition::new().with_alias(["job"]), false)
            .unwrap();
        registry
            .register_event("b", EventDefinition::new().with_alias(["other"]), true)
            .unwrap();

        assert_eq!(registry.resolve("new", "job"), None);
        assert_eq!(registry.resolve("old", "job"), Some("legacy"));
    }

    #[test]
    fn duplicate_notice_is_refused() {
        let mut registry = Registry::new();
        let args = Vars::new().with("id", Var::string());
        registry
            .register_notice("pay.finish", NoticeDefinition::new(args.clone()), false)
            .unwrap();
        assert!(matches!(
            registry.register_notice("pay.finish", NoticeDefinition::new(args), false),
            Err(BusError::DuplicateNotice(_))
        ));
    }

    #[test]
    fn filter_conflict_is_skipped_quietly() {
        let mut registry = Registry::new();
        assert!(registry.register_filter(
            "audit",
            FilterDefinition::new().with_text("first").on_request(|ctx| ctx.next()),
            false
        ));
        assert!(!registry.register_filter(
            "audit",
            FilterDefinition::new().with_text("second").on_execute(|ctx| ctx.next()),
            false
        ));

        assert_eq!(registry.filter("audit").unwrap().text, "first");
        assert_eq!(registry.request_filters().count(), 1);
        assert_eq!(registry.execute_filters().count(), 0);
    }

    #[test]
    fn filter_override_keeps_each_stage_once() {
        let mut registry = Registry::new();
        registry.register_filter(
            "audit",
            FilterDefinition::new()
                .on_request(|ctx| ctx.next())
                .on_response(|ctx| ctx.next()),
            false,
        );
        registry.register_filter(
            "audit",
            FilterDefinition::new()
                .on_request(|ctx| ctx.next())
                .on_execute(|ctx| ctx.next()),
            true,
        );

        assert_eq!(registry.request_filters().count(), 1);
        assert_eq!(registry.execute_filters().count(), 1);
        assert_eq!(registry.response_filters().count(), 0);
    }

    #[test]
    fn handler_contributes_to_several_branches() {
        let mut registry = Registry::new();
        registry.register_handler(
            "log",
            HandlerDefinition::new()
                .on(Branch::Found, |ctx| ctx.next())
                .on(Branch::Failed, |ctx| ctx.next()),
            false,
        );

        assert_eq!(registry.handlers_for(Branch::Found).count(), 1);
        assert_eq!(registry.handlers_for(Branch::Failed).count(), 1);
        assert_eq!(registry.handlers_for(Branch::Error).count(), 0);
        assert_eq!(registry.handlers_for(Branch::Denied).count(), 0);
    }

    #[test]
    fn empty_config_name_is_default() {
        let mut registry = Registry::new();
        assert!(registry.register_config("", Config::default(), false));
        assert!(registry.config(DEFAULT).is_some());
        assert!(!registry.register_config(DEFAULT, Config::builder().weight(5).build(), false));
        assert_eq!(registry.config(DEFAULT).unwrap().weight, 1);
    }

    #[test]
    fn bind_expands_unbound_events_to_every_connection() {
        let mut registry = Registry::new();
        registry
            .register_event("pay.finish", EventDefinition::new(), false)
            .unwrap();
        registry
            .register_event(
                "audit.log",
                EventDefinition::new().with_connect("b").with_group("ops"),
                false,
            )
            .unwrap();

        registry.bind(&names(&["a", "b"]), "node");

        assert_eq!(registry.resolve("a", "pay.finish"), Some("pay.finish"));
        assert_eq!(registry.resolve("b", "pay.finish"), Some("pay.finish"));
        assert_eq!(registry.resolve("a", "audit.log"), None);
        assert_eq!(registry.resolve("b", "audit.log"), Some("audit.log"));

        let b: Vec<&str> = registry
            .subscriptions("b")
            .iter()
            .map(|s| s.alias.as_str())
            .collect();
        assert_eq!(b, vec!["audit.log", "pay.finish"]);
        assert_eq!(registry.subscriptions("b")[0].group, "ops");
        assert_eq!(registry.subscriptions("a").len(), 1);
    }

    #[test]
    fn explicit_binding_beats_wildcard() {
        let mut registry = Registry::new();
        registry
            .register_event(
                "generic",
                EventDefinition::new().with_alias(["order"]),
                false,
            )
            .unwrap();
        registry
            .register_event(
                "legacy.order",
                EventDefinition::new().with_alias(["order"]).with_connect("old"),
                false,
            )
            .unwrap();

        registry.bind(&names(&["new", "old"]), "");

        assert_eq!(registry.resolve("new", "order"), Some("generic"));
        assert_eq!(registry.resolve("old", "order"), Some("legacy.order"));
        assert_eq!(registry.subscriptions("old").len(), 1);
        assert_eq!(registry.subscriptions("old")[0].name, "legacy.order");
    }

    #[test]
    fn grouping_takes_node_role() {
        let mut registry = Registry::new();
        registry
            .register_event("pay.finish", EventDefinition::new().grouping(), false)
            .unwrap();
        registry.bind(&names(&[DEFAULT]), "payments");
        assert_eq!(registry.event("pay.finish").unwrap().group, "payments");
    }

    #[test]
    fn catalog_is_sorted_and_serializable() {
        let mut registry = Registry::new();
        registry
            .register_event("b.event", EventDefinition::new(), false)
            .unwrap();
        registry
            .register_event(
                "a.event",
                EventDefinition::new()
                    .with_text("first")
                    .with_args(Vars::new().with("id", Var::int().required())),
                false,
            )
            .unwrap();
        registry
            .register_notice(
                "c.notice",
                NoticeDefinition::new(Vars::new().with("id", Var::int())),
                false,
            )
            .unwrap();

        let catalog = registry.catalog();
        let names: Vec<&str> = catalog.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.event", "b.event"]);

        let json = serde_json::to_value(&catalog).unwrap();
        assert_eq!(json["events"][0]["text"], "first");
        assert_eq!(json["events"][0]["args"]["id"]["required"], true);
        assert_eq!(json["notices"][0]["name"], "c.notice");
    }
}
