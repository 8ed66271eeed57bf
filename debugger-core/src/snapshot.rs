// Paused-state value objects
//
// Frames, scopes and snapshots are produced fresh per backtrace query and
// never mutated. Runtime values are referenced by handle ID into the
// snapshot's HandleSet.

use crate::handles::{HandleId, HandleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fmt::Write;

/// A position in source, one-based line and column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub uri: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(uri: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            uri: uri.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.uri, self.line, self.column)
    }
}

/// A named reference to a runtime value. Argument slots can be anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRef {
    pub name: Option<String>,
    pub ref_id: HandleId,
}

/// One stack activation record from a backtrace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub ordinal: u32,
    pub location: SourceLocation,
    pub is_constructor_call: bool,
    pub is_at_return: bool,
    pub function_ref: HandleId,
    pub this_ref: HandleId,
    pub arguments: Vec<ValueRef>,
    pub locals: Vec<ValueRef>,
}

/// Lexical binding context attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    Global,
    Local,
    With,
    Closure,
    Catch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub ordinal: u32,
    pub kind: ScopeKind,
    pub object_ref: HandleId,
}

/// A point-in-time bundle of call frames and resolved handle values, taken
/// while execution is suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub location: SourceLocation,
    pub handles: HandleSet,
    pub frames: Vec<Frame>,
}

impl Snapshot {
    /// Folds additional query results (lookup/scopes) into the snapshot.
    pub fn absorb(&mut self, handles: HandleSet) {
        self.handles.merge(handles);
    }

    /// Renders every frame with its arguments and locals. Cycle-safe: one
    /// visited set spans the whole dump.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut visited = HashSet::new();
        for frame in &self.frames {
            let _ = writeln!(out, "frame {}: {}", frame.ordinal, frame.location);
            let _ = writeln!(out, "  is_constructor: {}", frame.is_constructor_call);
            let _ = writeln!(out, "  is_at_return: {}", frame.is_at_return);
            let _ = write!(out, "  function: ");
            self.describe_ref(frame.function_ref, &mut out);
            let _ = write!(out, "  this: ");
            self.describe_ref(frame.this_ref, &mut out);
            let _ = writeln!(out, "  arguments:");
            for var in &frame.arguments {
                let name = var.name.as_deref().unwrap_or("<anonymous>");
                let _ = write!(out, "    {} = ", name);
                self.dump_ref(var.ref_id, &mut out, &mut visited);
            }
            let _ = writeln!(out, "  locals:");
            for var in &frame.locals {
                let name = var.name.as_deref().unwrap_or("<anonymous>");
                let _ = write!(out, "    {} = ", name);
                self.dump_ref(var.ref_id, &mut out, &mut visited);
            }
        }
        out
    }

    fn describe_ref(&self, id: HandleId, out: &mut String) {
        match self.handles.get(id) {
            Some(handle) => {
                let _ = writeln!(out, "{}", handle.describe());
            }
            None => {
                let _ = writeln!(out, "<unresolved ref {}>", id);
            }
        }
    }

    fn dump_ref(&self, id: HandleId, out: &mut String, visited: &mut HashSet<i64>) {
        let mut rendered = String::new();
        self.handles.dump_value(id, &mut rendered, 2, visited);
        // dump_value indents from column zero; splice its first line onto the
        // "name = " prefix already written.
        let trimmed = rendered.trim_start_matches(' ');
        out.push_str(trimmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Handle;

    #[test]
    fn source_location_display() {
        let location = SourceLocation::new("app.js", 12, 4);
        assert_eq!(location.to_string(), "app.js@12:4");
    }

    #[test]
    fn dump_renders_frames_and_values() {
        let mut handles = HandleSet::new();
        handles.insert(Handle::Number { id: 1, value: 7.0 });
        handles.insert(Handle::Undefined { id: 2 });
        handles.insert(Handle::Null { id: 3 });

        let snapshot = Snapshot {
            location: SourceLocation::new("app.js", 3, 1),
            handles,
            frames: vec![Frame {
                ordinal: 0,
                location: SourceLocation::new("app.js", 3, 1),
                is_constructor_call: false,
                is_at_return: false,
                function_ref: 2,
                this_ref: 3,
                arguments: vec![ValueRef {
                    name: Some("x".to_string()),
                    ref_id: 1,
                }],
                locals: vec![],
            }],
        };

        let dump = snapshot.dump();
        assert!(dump.contains("frame 0: app.js@3:1"));
        assert!(dump.contains("x = 7"));
    }

    #[test]
    fn absorb_merges_handles() {
        let mut snapshot = Snapshot {
            location: SourceLocation::new("app.js", 1, 1),
            handles: HandleSet::new(),
            frames: vec![],
        };
        let mut extra = HandleSet::new();
        extra.insert(Handle::Null { id: 4 });
        snapshot.absorb(extra);
        assert!(snapshot.handles.contains(4));
    }
}
