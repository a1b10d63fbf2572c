//! Enum-keyed action dispatch
//!
//! Handlers are plain function pointers bound into named tables when the
//! controller is built. A dispatcher holds an ordered list of tables and
//! walks it front to back: a table that has no handler for the action, or
//! whose handler declines it, passes the action on to the next one.

use crate::view_state::DecodeMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Actions a view understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    // Navigation
    FirstPage,
    PrevPage,
    NextPage,
    LastPage,
    GoToPage,

    // Viewport
    ZoomIn,
    ZoomOut,
    ResetZoom,
    ScrollUp,
    ScrollDown,

    // Rendering
    ToggleNightMode,
    SetDecodeMode,
}

impl ActionId {
    pub const ALL: [ActionId; 12] = [
        Self::FirstPage,
        Self::PrevPage,
        Self::NextPage,
        Self::LastPage,
        Self::GoToPage,
        Self::ZoomIn,
        Self::ZoomOut,
        Self::ResetZoom,
        Self::ScrollUp,
        Self::ScrollDown,
        Self::ToggleNightMode,
        Self::SetDecodeMode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstPage => "first_page",
            Self::PrevPage => "prev_page",
            Self::NextPage => "next_page",
            Self::LastPage => "last_page",
            Self::GoToPage => "go_to_page",
            Self::ZoomIn => "zoom_in",
            Self::ZoomOut => "zoom_out",
            Self::ResetZoom => "reset_zoom",
            Self::ScrollUp => "scroll_up",
            Self::ScrollDown => "scroll_down",
            Self::ToggleNightMode => "toggle_night_mode",
            Self::SetDecodeMode => "set_decode_mode",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|action| action.name() == wanted)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// Optional parameters carried with an action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    pub page: Option<usize>,
    /// Scroll distance in layout units
    pub amount: Option<f32>,
    pub mode: Option<DecodeMode>,
}

impl ActionArgs {
    pub fn page(page: usize) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }

    pub fn amount(amount: f32) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn mode(mode: DecodeMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Handler bound to an action; returns whether it handled the action
pub type ActionHandler<C> = fn(&mut C, &ActionArgs) -> bool;

/// Named set of handlers
pub struct ActionTable<C> {
    name: &'static str,
    handlers: HashMap<ActionId, ActionHandler<C>>,
}

impl<C> ActionTable<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: HashMap::new(),
        }
    }

    pub fn bind(mut self, action: ActionId, handler: ActionHandler<C>) -> Self {
        self.handlers.insert(action, handler);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handles(&self, action: ActionId) -> bool {
        self.handlers.contains_key(&action)
    }
}

impl<C> fmt::Debug for ActionTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<_> = self.handlers.keys().map(ActionId::name).collect();
        actions.sort_unstable();
        f.debug_struct("ActionTable")
            .field("name", &self.name)
            .field("actions", &actions)
            .finish()
    }
}

/// Ordered chain of handler tables
pub struct ActionDispatcher<C> {
    tables: Vec<ActionTable<C>>,
}

impl<C> Default for ActionDispatcher<C> {
    fn default() -> Self {
        Self { tables: Vec::new() }
    }
}

impl<C> ActionDispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a table; earlier tables take precedence
    pub fn with_table(mut self, table: ActionTable<C>) -> Self {
        self.tables.push(table);
        self
    }

    /// Run the first handler that accepts `action`
    pub fn dispatch(&self, target: &mut C, action: ActionId, args: &ActionArgs) -> bool {
        for table in &self.tables {
            let Some(handler) = table.handlers.get(&action) else {
                continue;
            };
            if handler(target, args) {
                trace!(action = %action, table = table.name, "action handled");
                return true;
            }
        }
        trace!(action = %action, "action not handled");
        false
    }

    /// Name of the table that would receive `action` first
    pub fn resolve(&self, action: ActionId) -> Option<&'static str> {
        self.tables
            .iter()
            .find(|table| table.handles(action))
            .map(|table| table.name)
    }
}

impl<C> fmt::Debug for ActionDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.tables).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        page: usize,
        calls: Vec<&'static str>,
    }

    fn next(c: &mut Counter, _: &ActionArgs) -> bool {
        c.calls.push("document");
        c.page += 1;
        true
    }

    fn decline(c: &mut Counter, _: &ActionArgs) -> bool {
        c.calls.push("declined");
        false
    }

    fn goto(c: &mut Counter, args: &ActionArgs) -> bool {
        c.calls.push("viewer");
        match args.page {
            Some(page) => {
                c.page = page;
                true
            }
            None => false,
        }
    }

    fn dispatcher() -> ActionDispatcher<Counter> {
        ActionDispatcher::new()
            .with_table(
                ActionTable::new("document")
                    .bind(ActionId::NextPage, next)
                    .bind(ActionId::GoToPage, decline),
            )
            .with_table(ActionTable::new("viewer").bind(ActionId::GoToPage, goto))
    }

    #[test]
    fn test_first_table_wins() {
        let mut target = Counter::default();
        assert!(dispatcher().dispatch(&mut target, ActionId::NextPage, &ActionArgs::default()));
        assert_eq!(target.page, 1);
        assert_eq!(target.calls, vec!["document"]);
    }

    #[test]
    fn test_declined_action_falls_through() {
        let mut target = Counter::default();
        assert!(dispatcher().dispatch(&mut target, ActionId::GoToPage, &ActionArgs::page(7)));
        assert_eq!(target.page, 7);
        assert_eq!(target.calls, vec!["declined", "viewer"]);
    }

    #[test]
    fn test_unbound_action_is_not_handled() {
        let mut target = Counter::default();
        let dispatcher = dispatcher();
        assert!(!dispatcher.dispatch(&mut target, ActionId::ZoomIn, &ActionArgs::default()));
        assert!(!dispatcher.dispatch(&mut target, ActionId::GoToPage, &ActionArgs::default()));
        assert_eq!(dispatcher.resolve(ActionId::GoToPage), Some("document"));
        assert_eq!(dispatcher.resolve(ActionId::ZoomIn), None);
    }

    #[test]
    fn test_action_names_parse() {
        for action in ActionId::ALL {
            assert_eq!(action.name().parse::<ActionId>(), Ok(action));
        }
        assert_eq!("Next-Page".parse::<ActionId>(), Ok(ActionId::NextPage));
        assert!("rotate".parse::<ActionId>().is_err());
    }
}
