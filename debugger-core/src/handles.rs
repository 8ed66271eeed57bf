// Handle graph for paused-state inspection
//
// The engine reports runtime values as a flat list of "ref" objects addressed
// by handle ID. Values reference each other by ID only - prototype and
// constructor links routinely form cycles, so the graph is stored as one flat
// table and traversals carry an explicit visited set.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// Engine-assigned value identifier, stable for the lifetime of a paused
/// state. Transient refs can be negative.
pub type HandleId = i64;

/// One named slot on an object or function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub ref_id: HandleId,
    pub property_type: i32,
    pub attributes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub id: HandleId,
    pub class_name: String,
    pub constructor_ref: HandleId,
    pub prototype_ref: HandleId,
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionHandle {
    pub id: HandleId,
    pub class_name: String,
    pub constructor_ref: HandleId,
    pub prototype_ref: HandleId,
    pub properties: Vec<Property>,
    pub name: String,
    pub inferred_name: String,
}

/// A single runtime value as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Handle {
    Undefined { id: HandleId },
    Null { id: HandleId },
    Boolean { id: HandleId, value: bool },
    Number { id: HandleId, value: f64 },
    String { id: HandleId, value: String },
    Script { id: HandleId, uri: String },
    Object(ObjectHandle),
    Function(FunctionHandle),
}

impl Handle {
    pub fn id(&self) -> HandleId {
        match self {
            Handle::Undefined { id }
            | Handle::Null { id }
            | Handle::Boolean { id, .. }
            | Handle::Number { id, .. }
            | Handle::String { id, .. }
            | Handle::Script { id, .. } => *id,
            Handle::Object(obj) => obj.id,
            Handle::Function(func) => func.id,
        }
    }

    /// Short single-line rendering, no recursion into referenced handles.
    pub fn describe(&self) -> String {
        match self {
            Handle::Undefined { .. } => "undefined".to_string(),
            Handle::Null { .. } => "null".to_string(),
            Handle::Boolean { value, .. } => value.to_string(),
            Handle::Number { value, .. } => value.to_string(),
            Handle::String { value, .. } => format!("\"{}\"", value),
            Handle::Script { uri, .. } => format!("script {}", uri),
            Handle::Object(obj) => format!("[object {}]", obj.class_name),
            Handle::Function(func) => {
                let name = if !func.name.is_empty() {
                    &func.name
                } else {
                    &func.inferred_name
                };
                format!("function {}()", name)
            }
        }
    }

    fn properties(&self) -> Option<&[Property]> {
        match self {
            Handle::Object(obj) => Some(&obj.properties),
            Handle::Function(func) => Some(&func.properties),
            _ => None,
        }
    }
}

/// A flat table of handles addressed by ID.
///
/// Successive queries (backtrace, lookup, scopes) each deliver a partial ref
/// list; merging composes them into one logical snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandleSet {
    values: HashMap<HandleId, Handle>,
}

impl HandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: Handle) {
        self.values.insert(handle.id(), handle);
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HandleId, &Handle)> {
        self.values.iter()
    }

    /// Union with another set. Idempotent; for IDs present in both, the
    /// incoming value wins.
    pub fn merge(&mut self, other: HandleSet) {
        self.values.extend(other.values);
    }

    /// Resolves a script handle to its source URI.
    pub fn script_uri(&self, id: HandleId) -> Option<&str> {
        match self.values.get(&id) {
            Some(Handle::Script { uri, .. }) => Some(uri),
            _ => None,
        }
    }

    /// Renders the value behind `id`, descending into object properties.
    ///
    /// `visited` carries every handle already rendered during this dump;
    /// a handle found there is rendered by its short form only, which keeps
    /// cyclic prototype/constructor graphs terminating.
    pub fn dump_value(
        &self,
        id: HandleId,
        out: &mut String,
        indent: usize,
        visited: &mut HashSet<HandleId>,
    ) {
        let pad = "  ".repeat(indent);
        let handle = match self.values.get(&id) {
            Some(handle) => handle,
            None => {
                let _ = writeln!(out, "{}<unresolved ref {}>", pad, id);
                return;
            }
        };
        if !visited.insert(id) {
            let _ = writeln!(out, "{}{} <ref {}>", pad, handle.describe(), id);
            return;
        }
        let _ = writeln!(out, "{}{}", pad, handle.describe());
        if let Some(properties) = handle.properties() {
            for property in properties {
                let _ = write!(out, "{}  {} = ", pad, property.name);
                self.dump_property(property.ref_id, out, indent + 1, visited);
            }
        }
    }

    fn dump_property(
        &self,
        id: HandleId,
        out: &mut String,
        indent: usize,
        visited: &mut HashSet<HandleId>,
    ) {
        let handle = match self.values.get(&id) {
            Some(handle) => handle,
            None => {
                let _ = writeln!(out, "<unresolved ref {}>", id);
                return;
            }
        };
        if !visited.insert(id) {
            let _ = writeln!(out, "{} <ref {}>", handle.describe(), id);
            return;
        }
        let _ = writeln!(out, "{}", handle.describe());
        if let Some(properties) = handle.properties() {
            let pad = "  ".repeat(indent + 1);
            for property in properties {
                let _ = write!(out, "{}{} = ", pad, property.name);
                self.dump_property(property.ref_id, out, indent + 1, visited);
            }
        }
    }
}
