// Engine-independent debugger session core
//
// Provides the pieces every engine client builds on:
// - Protocol contract (operations, typed responses, event stream)
// - Session state machine with breakpoint translation and queueing
// - Breakpoint registry living across sessions
// - Handle graphs, frames, scopes and snapshots for paused-state inspection

pub mod breakpoints;
pub mod handles;
pub mod protocol;
pub mod session;
pub mod snapshot;

pub use breakpoints::{Breakpoint, BreakpointId, BreakpointKind, BreakpointRegistry};
pub use protocol::{DebuggerProtocol, ProtocolError, ProtocolEvent, ProtocolResult, StepAction};
pub use session::{Debugger, SessionListener, SessionState};
pub use snapshot::{Frame, Scope, ScopeKind, Snapshot, SourceLocation};
