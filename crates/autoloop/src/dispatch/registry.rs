//! Handler registry keyed by directive kind

use std::collections::HashMap;
use std::sync::Arc;

use super::ActionHandler;
use crate::directive::DirectiveKind;

/// Registry of available action handlers
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<DirectiveKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same kind
    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    /// Get the handler for a kind
    pub fn get(&self, kind: DirectiveKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds in priority order
    pub fn kinds(&self) -> Vec<DirectiveKind> {
        DirectiveKind::PRIORITY
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// `kind: description` lines for display
    pub fn describe(&self) -> Vec<String> {
        self.kinds()
            .into_iter()
            .filter_map(|k| self.handlers.get(&k))
            .map(|h| format!("{}: {}", h.kind(), h.description()))
            .collect()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
