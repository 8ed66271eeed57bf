// Breakpoint registry
//
// Breakpoint definitions outlive debugging sessions; sessions only reference
// them and keep their own translation to engine-assigned protocol IDs. By
// routing all breakpoint management through the registry, listeners see one
// consistent stream of add/change/remove notifications.

use crate::snapshot::SourceLocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registry-assigned breakpoint identity. Never reused, even after removal.
pub type BreakpointId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakpointKind {
    Location,
    Function,
}

/// A location- or function-based breakpoint definition.
///
/// The kind and its target are fixed at creation; display name, enabled
/// flag, condition and ignore count are mutable through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    id: BreakpointId,
    kind: BreakpointKind,
    location: Option<SourceLocation>,
    function_name: Option<String>,
    display_name: Option<String>,
    enabled: bool,
    condition: Option<String>,
    ignore_count: u32,
}

impl Breakpoint {
    fn at_location(id: BreakpointId, location: SourceLocation) -> Self {
        Self {
            id,
            kind: BreakpointKind::Location,
            location: Some(location),
            function_name: None,
            display_name: None,
            enabled: true,
            condition: None,
            ignore_count: 0,
        }
    }

    fn for_function(id: BreakpointId, function_name: String) -> Self {
        Self {
            id,
            kind: BreakpointKind::Function,
            location: None,
            function_name: Some(function_name),
            display_name: None,
            enabled: true,
            condition: None,
            ignore_count: 0,
        }
    }

    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn kind(&self) -> BreakpointKind {
        self.kind
    }

    /// The source location, for location breakpoints only.
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// The target function name, for function breakpoints only.
    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn ignore_count(&self) -> u32 {
        self.ignore_count
    }
}

/// Receives breakpoint list notifications.
pub trait BreakpointListener: Send {
    fn on_breakpoint_add(&mut self, _breakpoint: &Breakpoint) {}
    fn on_breakpoint_change(&mut self, _breakpoint: &Breakpoint) {}
    fn on_breakpoint_remove(&mut self, _breakpoint: &Breakpoint) {}
}

/// The engine-independent breakpoint list.
#[derive(Default)]
pub struct BreakpointRegistry {
    next_id: BreakpointId,
    breakpoints: HashMap<BreakpointId, Breakpoint>,
    by_location: HashMap<SourceLocation, BreakpointId>,
    by_function: HashMap<String, BreakpointId>,
    listener: Option<Box<dyn BreakpointListener>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: Box<dyn BreakpointListener>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::default()
        }
    }

    fn next_id(&mut self) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Creates a breakpoint at the given location, or returns `None` if one
    /// already exists there.
    pub fn create_at_location(&mut self, location: SourceLocation) -> Option<BreakpointId> {
        if self.by_location.contains_key(&location) {
            return None;
        }
        let id = self.next_id();
        let breakpoint = Breakpoint::at_location(id, location.clone());
        self.by_location.insert(location, id);
        self.install(breakpoint);
        Some(id)
    }

    /// Creates a breakpoint on calls to the named function, or returns
    /// `None` if one already exists for that name.
    pub fn create_for_function(&mut self, function_name: &str) -> Option<BreakpointId> {
        if self.by_function.contains_key(function_name) {
            return None;
        }
        let id = self.next_id();
        let breakpoint = Breakpoint::for_function(id, function_name.to_string());
        self.by_function.insert(function_name.to_string(), id);
        self.install(breakpoint);
        Some(id)
    }

    fn install(&mut self, breakpoint: Breakpoint) {
        let id = breakpoint.id;
        self.breakpoints.insert(id, breakpoint);
        if let (Some(listener), Some(breakpoint)) =
            (self.listener.as_mut(), self.breakpoints.get(&id))
        {
            listener.on_breakpoint_add(breakpoint);
        }
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    pub fn at_location(&self, location: &SourceLocation) -> Option<&Breakpoint> {
        self.by_location
            .get(location)
            .and_then(|id| self.breakpoints.get(id))
    }

    pub fn for_function(&self, function_name: &str) -> Option<&Breakpoint> {
        self.by_function
            .get(function_name)
            .and_then(|id| self.breakpoints.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Removes a breakpoint and its lookup entries.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.remove(&id)?;
        if let Some(location) = &breakpoint.location {
            self.by_location.remove(location);
        }
        if let Some(function_name) = &breakpoint.function_name {
            self.by_function.remove(function_name);
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.on_breakpoint_remove(&breakpoint);
        }
        Some(breakpoint)
    }

    pub fn set_display_name(&mut self, id: BreakpointId, value: Option<String>) {
        self.mutate(id, |breakpoint| {
            if breakpoint.display_name == value {
                return false;
            }
            breakpoint.display_name = value;
            true
        });
    }

    pub fn set_enabled(&mut self, id: BreakpointId, value: bool) {
        self.mutate(id, |breakpoint| {
            if breakpoint.enabled == value {
                return false;
            }
            breakpoint.enabled = value;
            true
        });
    }

    pub fn set_condition(&mut self, id: BreakpointId, value: Option<String>) {
        self.mutate(id, |breakpoint| {
            if breakpoint.condition == value {
                return false;
            }
            breakpoint.condition = value;
            true
        });
    }

    pub fn set_ignore_count(&mut self, id: BreakpointId, value: u32) {
        self.mutate(id, |breakpoint| {
            if breakpoint.ignore_count == value {
                return false;
            }
            breakpoint.ignore_count = value;
            true
        });
    }

    fn mutate(&mut self, id: BreakpointId, apply: impl FnOnce(&mut Breakpoint) -> bool) {
        let Some(breakpoint) = self.breakpoints.get_mut(&id) else {
            return;
        };
        if !apply(breakpoint) {
            return;
        }
        if let (Some(listener), Some(breakpoint)) =
            (self.listener.as_mut(), self.breakpoints.get(&id))
        {
            listener.on_breakpoint_change(breakpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingListener {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl BreakpointListener for RecordingListener {
        fn on_breakpoint_add(&mut self, breakpoint: &Breakpoint) {
            self.events
                .lock()
                .unwrap()
                .push(format!("add {}", breakpoint.id()));
        }
        fn on_breakpoint_change(&mut self, breakpoint: &Breakpoint) {
            self.events
                .lock()
                .unwrap()
                .push(format!("change {}", breakpoint.id()));
        }
        fn on_breakpoint_remove(&mut self, breakpoint: &Breakpoint) {
            self.events
                .lock()
                .unwrap()
                .push(format!("remove {}", breakpoint.id()));
        }
    }

    fn location() -> SourceLocation {
        SourceLocation::new("app.js", 10, 1)
    }

    #[test]
    fn create_refuses_duplicates() {
        let mut registry = BreakpointRegistry::new();
        let id = registry.create_at_location(location()).unwrap();
        assert!(registry.create_at_location(location()).is_none());
        assert_eq!(registry.at_location(&location()).unwrap().id(), id);

        registry.create_for_function("init").unwrap();
        assert!(registry.create_for_function("init").is_none());
        assert!(registry.for_function("init").is_some());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut registry = BreakpointRegistry::new();
        let first = registry.create_at_location(location()).unwrap();
        registry.remove(first);
        let second = registry.create_at_location(location()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn remove_clears_lookup_entries() {
        let mut registry = BreakpointRegistry::new();
        let id = registry.create_for_function("tick").unwrap();
        assert!(registry.remove(id).is_some());
        assert!(registry.for_function("tick").is_none());
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn mutators_notify_only_on_change() {
        let listener = RecordingListener::default();
        let events = listener.events.clone();
        let mut registry = BreakpointRegistry::with_listener(Box::new(listener));

        let id = registry.create_at_location(location()).unwrap();
        registry.set_enabled(id, true); // unchanged, no event
        registry.set_enabled(id, false);
        registry.set_condition(id, Some("x > 1".to_string()));
        registry.set_ignore_count(id, 3);
        registry.remove(id);

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                format!("add {}", id),
                format!("change {}", id),
                format!("change {}", id),
                format!("change {}", id),
                format!("remove {}", id),
            ]
        );
        drop(events);
    }

    #[test]
    fn new_breakpoints_default_enabled() {
        let mut registry = BreakpointRegistry::new();
        let id = registry.create_at_location(location()).unwrap();
        let breakpoint = registry.get(id).unwrap();
        assert!(breakpoint.is_enabled());
        assert_eq!(breakpoint.kind(), BreakpointKind::Location);
        assert_eq!(breakpoint.ignore_count(), 0);
        assert!(breakpoint.condition().is_none());
    }
}
