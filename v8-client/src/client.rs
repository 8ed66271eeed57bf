// V8 debug agent client
//
// Implements the debugger protocol contract against a node/V8 process
// started with --debug. Instance URIs look like v8://host:port.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use debugger_core::breakpoints::{Breakpoint, BreakpointKind};
use debugger_core::handles::HandleId;
use debugger_core::protocol::{
    Ack, AddBreakpointResponse, ChangeSourceResponse, DebuggerProtocol, ProtocolBreakpointId,
    ProtocolError, ProtocolEvent, ProtocolResult, ScopesResponse, SnapshotResponse, StepAction,
    ValuesResponse,
};
use debugger_core::snapshot::Frame;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::decode::ResponseBody;
use crate::eventloop::{spawn_transport, CommandRequest, LoopMessage, TransportHandle};

/// How many frames a backtrace requests. Matches the engine's practical
/// stack depth limit.
const BACKTRACE_DEPTH: u32 = 1024;

/// A debugger protocol that talks to a V8 instance.
///
/// The engine must be started with `--debug` (or `--debug=N` for a specific
/// port), so that `node --debug=5858 script.js` is addressed as
/// `v8://localhost:5858`.
pub struct V8Protocol {
    uri: String,
    host: String,
    port: u16,
    next_seq: AtomicU32,
    transport: Mutex<Option<TransportHandle>>,
    events_tx: mpsc::UnboundedSender<ProtocolEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ProtocolEvent>>>,
}

impl V8Protocol {
    /// Creates a protocol for a `v8://host:port` instance URI.
    pub fn new(uri: &str) -> ProtocolResult<Self> {
        let (host, port) = parse_uri(uri)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            uri: uri.to_string(),
            host,
            port,
            next_seq: AtomicU32::new(0),
            transport: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn transport(&self) -> ProtocolResult<TransportHandle> {
        let guard = self
            .transport
            .lock()
            .map_err(|_| ProtocolError::Detached)?;
        guard.clone().ok_or(ProtocolError::Detached)
    }

    /// Sends a command and awaits its typed response.
    async fn request(
        &self,
        command: &'static str,
        arguments: Option<Value>,
    ) -> ProtocolResult<ResponseBody> {
        let transport = self.transport()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        transport.send(LoopMessage::Command(CommandRequest {
            seq: self.next_seq(),
            command,
            arguments,
            reply: Some(reply_tx),
        }))?;
        reply_rx.await.map_err(|_| ProtocolError::Detached)?
    }

    /// Sends a command whose response will be discarded on arrival.
    fn post(&self, command: &'static str, arguments: Option<Value>) -> ProtocolResult<()> {
        let transport = self.transport()?;
        transport.send(LoopMessage::Command(CommandRequest {
            seq: self.next_seq(),
            command,
            arguments,
            reply: None,
        }))
    }

    async fn backtrace(&self) -> ProtocolResult<SnapshotResponse> {
        let body = self
            .request(
                "backtrace",
                Some(json!({"fromFrame": 0, "toFrame": BACKTRACE_DEPTH})),
            )
            .await?;
        expect_snapshot(body)
    }
}

fn parse_uri(uri: &str) -> ProtocolResult<(String, u16)> {
    let rest = uri.strip_prefix("v8://").ok_or_else(|| {
        ProtocolError::Decode(format!("unsupported instance URI: {}", uri))
    })?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| ProtocolError::Decode(format!("instance URI missing port: {}", uri)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ProtocolError::Decode(format!("bad port in instance URI: {}", uri)))?;
    Ok((host.to_string(), port))
}

/// Refused and unreachable targets are session-level outcomes, not faults.
fn is_connect_failure(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::TimedOut
    )
}

fn step_action_name(action: StepAction) -> &'static str {
    match action {
        StepAction::Over => "next",
        StepAction::In => "in",
        StepAction::Out => "out",
    }
}

/// Wraps raw file contents in the module function wrapper node applies at
/// load time, so the patched source lines up with what the engine compiled.
fn wrap_module_source(source: &str) -> String {
    format!(
        "(function (exports, require, module, __filename, __dirname) {{ {} }});",
        source
    )
}

fn expect_ack(body: ResponseBody) -> ProtocolResult<Ack> {
    match body {
        ResponseBody::Ack(ack) => Ok(ack),
        other => Err(unexpected_shape(&other)),
    }
}

fn expect_snapshot(body: ResponseBody) -> ProtocolResult<SnapshotResponse> {
    match body {
        ResponseBody::Snapshot(response) => Ok(response),
        other => Err(unexpected_shape(&other)),
    }
}

fn expect_values(body: ResponseBody) -> ProtocolResult<ValuesResponse> {
    match body {
        ResponseBody::Values(response) => Ok(response),
        other => Err(unexpected_shape(&other)),
    }
}

fn expect_scopes(body: ResponseBody) -> ProtocolResult<ScopesResponse> {
    match body {
        ResponseBody::Scopes(response) => Ok(response),
        other => Err(unexpected_shape(&other)),
    }
}

fn expect_breakpoint_added(body: ResponseBody) -> ProtocolResult<AddBreakpointResponse> {
    match body {
        ResponseBody::BreakpointAdded(response) => Ok(response),
        other => Err(unexpected_shape(&other)),
    }
}

fn expect_source_changed(body: ResponseBody) -> ProtocolResult<ChangeSourceResponse> {
    match body {
        ResponseBody::SourceChanged(response) => Ok(response),
        other => Err(unexpected_shape(&other)),
    }
}

fn expect_scripts(body: ResponseBody) -> ProtocolResult<Vec<i64>> {
    match body {
        ResponseBody::Scripts(ids) => Ok(ids),
        other => Err(unexpected_shape(&other)),
    }
}

fn unexpected_shape(body: &ResponseBody) -> ProtocolError {
    ProtocolError::Decode(format!("unexpected response shape: {:?}", body))
}

#[async_trait]
impl DebuggerProtocol for V8Protocol {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ProtocolEvent>> {
        self.events_rx.lock().ok().and_then(|mut guard| guard.take())
    }

    async fn attach(&self) -> ProtocolResult<()> {
        info!(uri = %self.uri, "attach");
        {
            let guard = self
                .transport
                .lock()
                .map_err(|_| ProtocolError::Detached)?;
            if guard.is_some() {
                return Err(ProtocolError::Command("already attached".to_string()));
            }
        }

        let stream = match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => stream,
            Err(error) if is_connect_failure(&error) => {
                warn!(%error, "unable to connect");
                let _ = self.events_tx.send(ProtocolEvent::Detached {
                    reason: Some("Unable to connect".to_string()),
                });
                return Err(ProtocolError::Detached);
            }
            Err(error) => return Err(error.into()),
        };

        let (attach_tx, attach_rx) = oneshot::channel();
        let handle = spawn_transport(stream, self.events_tx.clone(), attach_tx);
        {
            let mut guard = self
                .transport
                .lock()
                .map_err(|_| ProtocolError::Detached)?;
            *guard = Some(handle.clone());
        }

        handle.send(LoopMessage::Command(CommandRequest {
            seq: self.next_seq(),
            command: "version",
            arguments: None,
            reply: None,
        }))?;

        attach_rx.await.map_err(|_| ProtocolError::Detached)
    }

    async fn detach(&self, terminate: bool) {
        let handle = {
            let Ok(mut guard) = self.transport.lock() else {
                return;
            };
            guard.take()
        };
        let Some(handle) = handle else {
            // Already detached.
            return;
        };
        info!(terminate, "detach");
        if terminate {
            let _ = handle.send(LoopMessage::Command(CommandRequest {
                seq: self.next_seq(),
                command: "evaluate",
                arguments: Some(json!({"expression": "process.exit(0)", "global": true})),
                reply: None,
            }));
        }
        let _ = handle.send(LoopMessage::Command(CommandRequest {
            seq: self.next_seq(),
            command: "disconnect",
            arguments: None,
            reply: None,
        }));
        let _ = handle.send(LoopMessage::Shutdown);
    }

    async fn suspend(&self) -> ProtocolResult<SnapshotResponse> {
        debug!("suspend");
        self.post("suspend", None)?;
        self.backtrace().await
    }

    async fn resume(&self) -> ProtocolResult<Ack> {
        debug!("resume");
        let body = self.request("continue", None).await?;
        expect_ack(body)
    }

    async fn step(&self, action: StepAction, count: u32) -> ProtocolResult<SnapshotResponse> {
        debug!(action = step_action_name(action), count, "step");
        self.post(
            "continue",
            Some(json!({
                "stepaction": step_action_name(action),
                "stepcount": count,
            })),
        )?;
        self.backtrace().await
    }

    async fn change_source(
        &self,
        uri: &str,
        new_source: &str,
    ) -> ProtocolResult<Option<ChangeSourceResponse>> {
        // Only script sources can be patched live.
        if !uri.ends_with(".js") {
            return Ok(None);
        }
        debug!(uri, "change source");
        let body = self
            .request(
                "scripts",
                Some(json!({"includeSource": true, "filter": uri})),
            )
            .await?;
        let ids = expect_scripts(body)?;
        if ids.len() != 1 {
            info!(uri, matches = ids.len(), "ambiguous source target, skipping patch");
            return Ok(None);
        }
        let body = self
            .request(
                "changelive",
                Some(json!({
                    "script_id": ids[0],
                    "preview_only": false,
                    "new_source": wrap_module_source(new_source),
                })),
            )
            .await?;
        expect_source_changed(body).map(Some)
    }

    async fn add_breakpoint(
        &self,
        breakpoint: &Breakpoint,
    ) -> ProtocolResult<AddBreakpointResponse> {
        debug!(id = breakpoint.id(), "add breakpoint");
        let arguments = match breakpoint.kind() {
            BreakpointKind::Location => {
                let location = breakpoint.location().ok_or_else(|| {
                    ProtocolError::Decode("location breakpoint without location".to_string())
                })?;
                // Stored coordinates are one-based; the wire is zero-based.
                json!({
                    "type": "script",
                    "target": location.uri,
                    "line": location.line.saturating_sub(1),
                    "column": location.column.saturating_sub(1),
                    "enabled": breakpoint.is_enabled(),
                    "condition": breakpoint.condition(),
                })
            }
            BreakpointKind::Function => {
                let target = breakpoint.function_name().ok_or_else(|| {
                    ProtocolError::Decode("function breakpoint without function name".to_string())
                })?;
                json!({
                    "type": "function",
                    "target": target,
                    "enabled": breakpoint.is_enabled(),
                    "condition": breakpoint.condition(),
                })
            }
        };
        let body = self.request("setbreakpoint", Some(arguments)).await?;
        expect_breakpoint_added(body)
    }

    async fn change_breakpoint(
        &self,
        protocol_id: ProtocolBreakpointId,
        enabled: bool,
        condition: Option<&str>,
    ) -> ProtocolResult<Ack> {
        debug!(protocol_id, "change breakpoint");
        let body = self
            .request(
                "changebreakpoint",
                Some(json!({
                    "breakpoint": protocol_id,
                    "enabled": enabled,
                    "condition": condition,
                })),
            )
            .await?;
        expect_ack(body)
    }

    async fn ignore_breakpoint(
        &self,
        protocol_id: ProtocolBreakpointId,
        ignore_count: u32,
    ) -> ProtocolResult<Ack> {
        debug!(protocol_id, ignore_count, "ignore breakpoint");
        let body = self
            .request(
                "changebreakpoint",
                Some(json!({
                    "breakpoint": protocol_id,
                    "ignoreCount": ignore_count,
                })),
            )
            .await?;
        expect_ack(body)
    }

    async fn remove_breakpoint(&self, protocol_id: ProtocolBreakpointId) -> ProtocolResult<Ack> {
        debug!(protocol_id, "remove breakpoint");
        let body = self
            .request("clearbreakpoint", Some(json!({"breakpoint": protocol_id})))
            .await?;
        expect_ack(body)
    }

    async fn query_state(&self) -> ProtocolResult<SnapshotResponse> {
        debug!("query state");
        self.backtrace().await
    }

    async fn query_values(&self, handle_ids: &[HandleId]) -> ProtocolResult<ValuesResponse> {
        debug!(?handle_ids, "query values");
        let body = self
            .request("lookup", Some(json!({"handles": handle_ids})))
            .await?;
        expect_values(body)
    }

    async fn query_frame_scopes(&self, frame: &Frame) -> ProtocolResult<ScopesResponse> {
        debug!(frame = frame.ordinal, "query frame scopes");
        let body = self
            .request("scopes", Some(json!({"frameNumber": frame.ordinal})))
            .await?;
        expect_scopes(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uri_accepts_host_and_port() {
        let (host, port) = parse_uri("v8://localhost:5858").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 5858);
    }

    #[test]
    fn parse_uri_rejects_other_schemes() {
        assert!(parse_uri("webkit://localhost:9222").is_err());
        assert!(parse_uri("v8://localhost").is_err());
        assert!(parse_uri("v8://localhost:notaport").is_err());
    }

    #[test]
    fn step_actions_use_engine_names() {
        assert_eq!(step_action_name(StepAction::Over), "next");
        assert_eq!(step_action_name(StepAction::In), "in");
        assert_eq!(step_action_name(StepAction::Out), "out");
    }

    #[test]
    fn module_wrapper_matches_node_loader() {
        let wrapped = wrap_module_source("var x = 1;");
        assert!(wrapped.starts_with("(function (exports, require, module"));
        assert!(wrapped.contains("var x = 1;"));
        assert!(wrapped.ends_with("});"));
    }
}
