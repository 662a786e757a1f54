//! Action dispatch: requested action name → registered handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use buildloop_core::{ActionDefinition, ActionHandler, ActionName, ActionOutcome};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// The handlers one role exposes, keyed by the closed set of action names.
///
/// Built once per loop run. A name outside the set, or one this role did
/// not register, is answered with `{"error": "unknown action"}`.
#[derive(Clone, Default)]
pub struct ActionDispatcher {
    handlers: BTreeMap<ActionName, Arc<dyn ActionHandler>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same action.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.action(), handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    /// Schemas sent to the service, in a stable order.
    pub fn definitions(&self) -> Vec<ActionDefinition> {
        self.handlers.values().map(|h| h.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<ActionName> {
        self.handlers.keys().copied().collect()
    }

    /// The registered terminal action, if any.
    pub fn terminal_action(&self) -> Option<ActionName> {
        self.handlers.keys().copied().find(|name| name.is_terminal())
    }

    /// Run the handler for `name`. Never fails: unknown names and handler
    /// failures come back as error outcomes.
    pub async fn dispatch(&self, name: &str, input: Value) -> ActionOutcome {
        let handler = name
            .parse::<ActionName>()
            .ok()
            .and_then(|action| self.handlers.get(&action));

        let Some(handler) = handler else {
            warn!(action = %name, "Unknown action requested");
            return ActionOutcome::Failed(json!({
                "error": "unknown action",
                "action": name,
                "available": self.handlers.keys().map(|a| a.as_str()).collect::<Vec<_>>(),
            }));
        };

        debug!(action = %name, "Dispatching action");
        handler.execute(input).await
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("actions", &self.names())
            .finish()
    }
}
