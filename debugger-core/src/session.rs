// Debugger session state machine
//
// A session drives one protocol instance through its lifecycle and owns all
// per-session state: the breakpoint translation maps, the pending-mutation
// queue and the listener. Protocol events and breakpoint-add completions
// land on a single internal queue; every state mutation happens inside this
// type's own methods, so no locking is needed beyond the queue itself.

use crate::breakpoints::{Breakpoint, BreakpointId};
use crate::handles::HandleId;
use crate::protocol::{
    DebuggerProtocol, ProtocolBreakpointId, ProtocolEvent, ProtocolResult, ScopesResponse,
    StepAction, ValuesResponse,
};
use crate::snapshot::{Frame, Snapshot, SourceLocation};
use bimap::BiHashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Attaching,
    Attached,
    Detached,
}

/// Receives session notifications. One listener per session.
pub trait SessionListener: Send {
    /// The session successfully attached to the instance.
    fn on_attach(&mut self) {}

    /// The session ended. `reason` is `None` when user initiated.
    fn on_detach(&mut self, _reason: Option<&str>) {}

    /// The target entered the paused state.
    fn on_suspend(&mut self) {}

    /// The target entered the running state.
    fn on_resume(&mut self) {}

    /// The target hit a break. `breakpoints_hit` holds the registry
    /// breakpoints resolved from the wire identifiers.
    fn on_break(
        &mut self,
        _location: &SourceLocation,
        _breakpoints_hit: &[Breakpoint],
        _snapshot: &Snapshot,
    ) {
    }

    /// The target threw an exception.
    fn on_exception(
        &mut self,
        _location: &SourceLocation,
        _uncaught: bool,
        _exception: &serde_json::Value,
        _snapshot: &Snapshot,
    ) {
    }
}

/// Internal queue items: forwarded protocol events plus completions of
/// spawned breakpoint adds.
enum SessionEvent {
    Protocol(ProtocolEvent),
    BreakpointAdded {
        breakpoint: BreakpointId,
        protocol_id: ProtocolBreakpointId,
    },
}

/// A breakpoint mutation waiting for its breakpoint's protocol ID.
///
/// Change and ignore entries capture the breakpoint's fields at enqueue
/// time; a later registry edit does not rewrite an already-queued mutation.
enum PendingOp {
    Change {
        breakpoint: BreakpointId,
        enabled: bool,
        condition: Option<String>,
    },
    Ignore {
        breakpoint: BreakpointId,
        ignore_count: u32,
    },
    Remove {
        breakpoint: BreakpointId,
    },
}

impl PendingOp {
    fn breakpoint(&self) -> BreakpointId {
        match self {
            PendingOp::Change { breakpoint, .. }
            | PendingOp::Ignore { breakpoint, .. }
            | PendingOp::Remove { breakpoint } => *breakpoint,
        }
    }
}

/// A mutation released from the queue, bound to its protocol ID and handed
/// to the sequential sender task.
enum DispatchedOp {
    Change {
        protocol_id: ProtocolBreakpointId,
        enabled: bool,
        condition: Option<String>,
    },
    Ignore {
        protocol_id: ProtocolBreakpointId,
        ignore_count: u32,
    },
    Remove {
        protocol_id: ProtocolBreakpointId,
    },
}

/// Stateful instance debugger. Controls a debugging session while attached
/// to an instance.
pub struct Debugger {
    protocol: Arc<dyn DebuggerProtocol>,
    listener: Box<dyn SessionListener>,
    state: SessionState,
    running: bool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    dispatch_tx: mpsc::UnboundedSender<DispatchedOp>,
    protocol_ids: BiHashMap<BreakpointId, ProtocolBreakpointId>,
    tracked: HashMap<BreakpointId, Breakpoint>,
    pending_ops: VecDeque<PendingOp>,
}

impl Debugger {
    pub fn new(protocol: Arc<dyn DebuggerProtocol>, listener: Box<dyn SessionListener>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        match protocol.take_events() {
            Some(mut protocol_events) => {
                let forward = events_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = protocol_events.recv().await {
                        if forward.send(SessionEvent::Protocol(event)).is_err() {
                            break;
                        }
                    }
                });
            }
            None => warn!("protocol event stream already claimed"),
        }

        let dispatch_tx = spawn_mutation_sender(Arc::clone(&protocol));

        Self {
            protocol,
            listener,
            state: SessionState::Attaching,
            running: false,
            events_tx,
            events_rx,
            dispatch_tx,
            protocol_ids: BiHashMap::new(),
            tracked: HashMap::new(),
            pending_ops: VecDeque::new(),
        }
    }

    pub fn protocol(&self) -> &Arc<dyn DebuggerProtocol> {
        &self.protocol
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == SessionState::Attached
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The protocol ID currently bound to a breakpoint, if its add has
    /// completed.
    pub fn protocol_id_for(&self, breakpoint: BreakpointId) -> Option<ProtocolBreakpointId> {
        self.protocol_ids.get_by_left(&breakpoint).copied()
    }

    /// Queued breakpoint mutations not yet released to the wire.
    pub fn pending_op_count(&self) -> usize {
        self.pending_ops.len()
    }

    fn set_running(&mut self, value: bool) {
        if self.running == value {
            return;
        }
        self.running = value;
        if value {
            self.listener.on_resume();
        } else {
            self.listener.on_suspend();
        }
    }

    /// Attaches the session to the target instance.
    ///
    /// A connection failure does not surface here; the transport reports it
    /// as a detach event with a reason, delivered through [`process_next`].
    ///
    /// [`process_next`]: Debugger::process_next
    pub async fn attach(&mut self) {
        if self.state != SessionState::Attaching {
            return;
        }
        match self.protocol.attach().await {
            Ok(()) => {
                self.state = SessionState::Attached;
                self.set_running(true);
                self.listener.on_attach();
            }
            Err(error) => {
                debug!(%error, "attach did not complete");
            }
        }
    }

    /// Detaches from the target instance. Idempotent; completion arrives as
    /// a detach event on the session queue.
    pub async fn detach(&mut self, terminate: bool) {
        if self.state == SessionState::Detached {
            return;
        }
        self.protocol.detach(terminate).await;
    }

    pub fn can_suspend(&self) -> bool {
        self.state == SessionState::Attached && self.running
    }

    pub async fn suspend(&mut self) {
        if !self.can_suspend() {
            return;
        }
        self.set_running(false);
        match self.protocol.suspend().await {
            Ok(response) => self.set_running(response.running),
            Err(error) => debug!(%error, "suspend did not complete"),
        }
    }

    pub fn can_resume(&self) -> bool {
        self.state == SessionState::Attached && !self.running
    }

    pub async fn resume(&mut self) {
        if !self.can_resume() {
            return;
        }
        self.set_running(true);
        match self.protocol.resume().await {
            Ok(ack) => self.set_running(ack.running),
            Err(error) => debug!(%error, "resume did not complete"),
        }
    }

    async fn step(&mut self, action: StepAction) {
        if self.state != SessionState::Attached || self.running {
            return;
        }
        match self.protocol.step(action, 1).await {
            Ok(response) => self.set_running(response.running),
            Err(error) => debug!(%error, "step did not complete"),
        }
    }

    pub fn can_step_over(&self) -> bool {
        self.can_resume()
    }

    pub async fn step_over(&mut self) {
        self.step(StepAction::Over).await;
    }

    pub fn can_step_in(&self) -> bool {
        self.can_resume()
    }

    pub async fn step_in(&mut self) {
        self.step(StepAction::In).await;
    }

    pub fn can_step_out(&self) -> bool {
        self.can_resume()
    }

    pub async fn step_out(&mut self) {
        self.step(StepAction::Out).await;
    }

    /// Installs a breakpoint on the live target. The add is dispatched
    /// immediately without blocking the caller; its completion installs the
    /// breakpoint/protocol ID mapping and releases queued mutations.
    pub fn add_breakpoint(&mut self, breakpoint: &Breakpoint) {
        if self.state == SessionState::Detached {
            return;
        }
        self.tracked.insert(breakpoint.id(), breakpoint.clone());
        let protocol = Arc::clone(&self.protocol);
        let events = self.events_tx.clone();
        let breakpoint = breakpoint.clone();
        tokio::spawn(async move {
            match protocol.add_breakpoint(&breakpoint).await {
                Ok(response) => {
                    let _ = events.send(SessionEvent::BreakpointAdded {
                        breakpoint: breakpoint.id(),
                        protocol_id: response.protocol_id,
                    });
                }
                Err(error) => {
                    warn!(id = breakpoint.id(), %error, "breakpoint add failed");
                }
            }
        });
    }

    /// Queues an enabled/condition update. Sent once the breakpoint's add
    /// has produced a protocol ID and every earlier queued mutation has been
    /// released.
    pub fn change_breakpoint(&mut self, breakpoint: &Breakpoint) {
        if self.state == SessionState::Detached {
            return;
        }
        self.tracked.insert(breakpoint.id(), breakpoint.clone());
        self.pending_ops.push_back(PendingOp::Change {
            breakpoint: breakpoint.id(),
            enabled: breakpoint.is_enabled(),
            condition: breakpoint.condition().map(str::to_owned),
        });
        self.pump_breakpoint_ops();
    }

    /// Queues an ignore-count update, same ordering rules as
    /// [`change_breakpoint`](Debugger::change_breakpoint).
    pub fn ignore_breakpoint(&mut self, breakpoint: &Breakpoint) {
        if self.state == SessionState::Detached {
            return;
        }
        self.tracked.insert(breakpoint.id(), breakpoint.clone());
        self.pending_ops.push_back(PendingOp::Ignore {
            breakpoint: breakpoint.id(),
            ignore_count: breakpoint.ignore_count(),
        });
        self.pump_breakpoint_ops();
    }

    /// Queues a breakpoint removal. Once sent, both translation map entries
    /// are erased.
    pub fn remove_breakpoint(&mut self, breakpoint: BreakpointId) {
        if self.state == SessionState::Detached {
            return;
        }
        self.pending_ops.push_back(PendingOp::Remove { breakpoint });
        self.pump_breakpoint_ops();
    }

    /// Releases queued mutations from the front of the queue while the
    /// front entry's breakpoint has a protocol ID. One queue serves all
    /// breakpoints: a mutation for a mapped breakpoint waits behind an
    /// earlier entry whose breakpoint is still unmapped.
    fn pump_breakpoint_ops(&mut self) {
        while let Some(front) = self.pending_ops.front() {
            let breakpoint = front.breakpoint();
            let Some(protocol_id) = self.protocol_ids.get_by_left(&breakpoint).copied() else {
                break;
            };
            let Some(op) = self.pending_ops.pop_front() else {
                break;
            };
            match op {
                PendingOp::Change {
                    enabled, condition, ..
                } => {
                    let _ = self.dispatch_tx.send(DispatchedOp::Change {
                        protocol_id,
                        enabled,
                        condition,
                    });
                }
                PendingOp::Ignore { ignore_count, .. } => {
                    let _ = self.dispatch_tx.send(DispatchedOp::Ignore {
                        protocol_id,
                        ignore_count,
                    });
                }
                PendingOp::Remove { breakpoint } => {
                    let _ = self.dispatch_tx.send(DispatchedOp::Remove { protocol_id });
                    self.protocol_ids.remove_by_left(&breakpoint);
                    self.tracked.remove(&breakpoint);
                }
            }
        }
    }

    /// Patches source on the live target. An ambiguous target is silently
    /// skipped; when the engine reports that the patch landed under the
    /// instruction pointer, a step-in is issued automatically.
    pub async fn change_source(&mut self, uri: &str, new_source: &str) {
        if self.state != SessionState::Attached {
            return;
        }
        match self.protocol.change_source(uri, new_source).await {
            Ok(Some(response)) => {
                self.set_running(response.running);
                if response.step_in_required {
                    match self.protocol.step(StepAction::In, 1).await {
                        Ok(after) => self.set_running(after.running),
                        Err(error) => debug!(%error, "step after source change failed"),
                    }
                }
            }
            Ok(None) => {}
            Err(error) => debug!(%error, "source change failed"),
        }
    }

    /// Resolves handle IDs to values; merge the result into a snapshot via
    /// [`Snapshot::absorb`](crate::snapshot::Snapshot::absorb).
    pub async fn query_values(&self, handle_ids: &[HandleId]) -> ProtocolResult<ValuesResponse> {
        self.protocol.query_values(handle_ids).await
    }

    /// Queries the scope chain of one frame.
    pub async fn query_frame_scopes(&self, frame: &Frame) -> ProtocolResult<ScopesResponse> {
        self.protocol.query_frame_scopes(frame).await
    }

    /// Processes the next queued event. Returns `false` when the queue is
    /// closed. Run this from the task that owns the session.
    pub async fn process_next(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Drives the session until it detaches.
    pub async fn run(&mut self) {
        while self.state != SessionState::Detached {
            if !self.process_next().await {
                break;
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Protocol(event) => self.handle_protocol_event(event).await,
            SessionEvent::BreakpointAdded {
                breakpoint,
                protocol_id,
            } => {
                if self.state != SessionState::Attached {
                    debug!(breakpoint, "dropping add completion outside attached state");
                    return;
                }
                self.protocol_ids.insert(breakpoint, protocol_id);
                self.pump_breakpoint_ops();
            }
        }
    }

    async fn handle_protocol_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Break {
                location,
                breakpoint_ids,
            } => {
                if self.state != SessionState::Attached {
                    return;
                }
                self.set_running(false);
                let response = match self.protocol.query_state().await {
                    Ok(response) => response,
                    Err(error) => {
                        debug!(%error, "state query after break failed");
                        return;
                    }
                };
                let snapshot = Snapshot {
                    location: location.clone(),
                    handles: response.handles,
                    frames: response.frames,
                };
                let hits: Vec<Breakpoint> = breakpoint_ids
                    .iter()
                    .filter_map(|protocol_id| self.protocol_ids.get_by_right(protocol_id))
                    .filter_map(|breakpoint| self.tracked.get(breakpoint))
                    .cloned()
                    .collect();
                self.listener.on_break(&location, &hits, &snapshot);
            }
            ProtocolEvent::Exception {
                location,
                uncaught,
                exception,
            } => {
                if self.state != SessionState::Attached {
                    return;
                }
                self.set_running(false);
                let response = match self.protocol.query_state().await {
                    Ok(response) => response,
                    Err(error) => {
                        debug!(%error, "state query after exception failed");
                        return;
                    }
                };
                let snapshot = Snapshot {
                    location: location.clone(),
                    handles: response.handles,
                    frames: response.frames,
                };
                self.listener
                    .on_exception(&location, uncaught, &exception, &snapshot);
            }
            ProtocolEvent::Detached { reason } => {
                if self.state == SessionState::Detached {
                    return;
                }
                self.state = SessionState::Detached;
                self.set_running(false);
                self.pending_ops.clear();
                self.protocol_ids.clear();
                self.tracked.clear();
                self.listener.on_detach(reason.as_deref());
            }
        }
    }
}

/// Spawns the sequential sender for released breakpoint mutations. One task
/// consumes the channel in order, so the wire sees mutations exactly in the
/// order the pump released them.
fn spawn_mutation_sender(
    protocol: Arc<dyn DebuggerProtocol>,
) -> mpsc::UnboundedSender<DispatchedOp> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchedOp>();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let result = match op {
                DispatchedOp::Change {
                    protocol_id,
                    enabled,
                    condition,
                } => protocol
                    .change_breakpoint(protocol_id, enabled, condition.as_deref())
                    .await
                    .map(|_| ()),
                DispatchedOp::Ignore {
                    protocol_id,
                    ignore_count,
                } => protocol
                    .ignore_breakpoint(protocol_id, ignore_count)
                    .await
                    .map(|_| ()),
                DispatchedOp::Remove { protocol_id } => protocol
                    .remove_breakpoint(protocol_id)
                    .await
                    .map(|_| ()),
            };
            if let Err(error) = result {
                debug!(%error, "breakpoint mutation dropped");
            }
        }
    });
    tx
}
