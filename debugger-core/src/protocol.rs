// Debugger protocol contract
//
// Protocols implement asynchronous command channels for controlling remote
// script engines. The operation set is normalized here; the transmission
// mechanism is up to the implementation.

use crate::breakpoints::Breakpoint;
use crate::handles::{HandleId, HandleSet};
use crate::snapshot::{Frame, Scope, SourceLocation};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("transport detached")]
    Detached,
}

/// Engine-assigned breakpoint identifier, distinct from the registry's
/// breakpoint IDs. Only exists after an add round trip completes.
pub type ProtocolBreakpointId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Over,
    In,
    Out,
}

/// Plain acknowledgement carrying the engine's running flag.
#[derive(Debug, Clone)]
pub struct Ack {
    pub running: bool,
}

/// Backtrace result: the frames plus every handle referenced by them.
#[derive(Debug, Clone)]
pub struct SnapshotResponse {
    pub running: bool,
    pub handles: HandleSet,
    pub frames: Vec<Frame>,
}

/// Value lookup result.
#[derive(Debug, Clone)]
pub struct ValuesResponse {
    pub running: bool,
    pub handles: HandleSet,
}

/// Frame scope query result.
#[derive(Debug, Clone)]
pub struct ScopesResponse {
    pub running: bool,
    pub handles: HandleSet,
    pub scopes: Vec<Scope>,
}

/// Breakpoint add result carrying the engine-assigned identifier.
#[derive(Debug, Clone)]
pub struct AddBreakpointResponse {
    pub running: bool,
    pub protocol_id: ProtocolBreakpointId,
}

/// Live source patch result.
#[derive(Debug, Clone)]
pub struct ChangeSourceResponse {
    pub running: bool,
    pub step_in_required: bool,
}

/// Session-initiated notifications from the engine. Delivered on the stream
/// claimed via [`DebuggerProtocol::take_events`] rather than as responses to
/// caller requests.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Break {
        location: SourceLocation,
        breakpoint_ids: Vec<ProtocolBreakpointId>,
    },
    Exception {
        location: SourceLocation,
        uncaught: bool,
        exception: serde_json::Value,
    },
    Detached {
        reason: Option<String>,
    },
}

/// Capability contract for an engine-specific debugger transport.
///
/// Every operation is asynchronous and resolves exactly once, or never when
/// the transport is torn down first - in that case the future resolves to
/// [`ProtocolError::Detached`] and no response value is ever delivered.
#[async_trait]
pub trait DebuggerProtocol: Send + Sync {
    /// The target instance URI this protocol talks to.
    fn uri(&self) -> &str;

    /// Claims the event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ProtocolEvent>>;

    /// Begins attaching to the instance; resolves when the engine has
    /// acknowledged the session. Connection failures surface as a synthetic
    /// `Detached` event, not as a caller-visible fault.
    async fn attach(&self) -> ProtocolResult<()>;

    /// Detaches from the instance, optionally terminating the target.
    /// Idempotent; completion is reported through the event stream.
    async fn detach(&self, terminate: bool);

    /// Suspends execution and captures the stack at the pause point.
    async fn suspend(&self) -> ProtocolResult<SnapshotResponse>;

    /// Resumes execution from the current pause point.
    async fn resume(&self) -> ProtocolResult<Ack>;

    /// Steps execution, then captures the stack at the new pause point.
    async fn step(&self, action: StepAction, count: u32) -> ProtocolResult<SnapshotResponse>;

    /// Patches source at runtime. `Ok(None)` means the target script could
    /// not be resolved unambiguously and the patch was silently skipped.
    async fn change_source(
        &self,
        uri: &str,
        new_source: &str,
    ) -> ProtocolResult<Option<ChangeSourceResponse>>;

    /// Installs a breakpoint, yielding the engine-assigned protocol ID.
    async fn add_breakpoint(&self, breakpoint: &Breakpoint)
        -> ProtocolResult<AddBreakpointResponse>;

    /// Updates the enabled flag and condition of an installed breakpoint.
    async fn change_breakpoint(
        &self,
        protocol_id: ProtocolBreakpointId,
        enabled: bool,
        condition: Option<&str>,
    ) -> ProtocolResult<Ack>;

    /// Updates the ignore count of an installed breakpoint.
    async fn ignore_breakpoint(
        &self,
        protocol_id: ProtocolBreakpointId,
        ignore_count: u32,
    ) -> ProtocolResult<Ack>;

    /// Removes an installed breakpoint.
    async fn remove_breakpoint(&self, protocol_id: ProtocolBreakpointId) -> ProtocolResult<Ack>;

    /// Captures the current backtrace.
    async fn query_state(&self) -> ProtocolResult<SnapshotResponse>;

    /// Resolves handle IDs to values.
    async fn query_values(&self, handle_ids: &[HandleId]) -> ProtocolResult<ValuesResponse>;

    /// Queries the scope chain of one frame.
    async fn query_frame_scopes(&self, frame: &Frame) -> ProtocolResult<ScopesResponse>;
}
