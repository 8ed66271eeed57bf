// Transport loop
//
// Two spawned tasks per connection: a reader that blocks on the socket and
// appends parsed frames to a queue, and the loop proper that writes
// outgoing command frames, correlates responses to their pending one-shot
// sinks by sequence ID, and forwards engine events. Only the loop touches
// the pending map. When the loop exits - user shutdown or read failure -
// the pending map is dropped, so every outstanding sink is dropped unfired.

use std::collections::HashMap;

use debugger_core::protocol::{ProtocolError, ProtocolEvent, ProtocolResult};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::decode::{self, ResponseBody};
use crate::framing;
use crate::wire::{WireMessage, WireRequest, WireResponse};

/// Detach reason reported when the reader side fails or the target closes
/// the connection.
pub const NETWORK_READ_ERROR: &str = "Network read error";

/// An outgoing command with its pre-assigned sequence ID. When `reply` is
/// present the response is routed back through it; otherwise the response
/// is discarded on arrival.
pub(crate) struct CommandRequest {
    pub seq: u32,
    pub command: &'static str,
    pub arguments: Option<Value>,
    pub reply: Option<oneshot::Sender<ProtocolResult<ResponseBody>>>,
}

pub(crate) enum LoopMessage {
    Command(CommandRequest),
    Shutdown,
}

/// Cheap cloneable handle for feeding the transport loop.
#[derive(Clone)]
pub(crate) struct TransportHandle {
    tx: mpsc::UnboundedSender<LoopMessage>,
}

impl TransportHandle {
    pub fn send(&self, message: LoopMessage) -> ProtocolResult<()> {
        self.tx.send(message).map_err(|_| ProtocolError::Detached)
    }
}

/// Spawns the transport loop for a freshly connected socket. `attach_reply`
/// fires once, when the engine answers the initial version command.
pub(crate) fn spawn_transport(
    stream: TcpStream,
    events: mpsc::UnboundedSender<ProtocolEvent>,
    attach_reply: oneshot::Sender<()>,
) -> TransportHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(transport_task(
        read_half,
        write_half,
        rx,
        events,
        attach_reply,
    ));
    TransportHandle { tx }
}

struct PendingRequest {
    command: &'static str,
    reply: oneshot::Sender<ProtocolResult<ResponseBody>>,
}

/// Reads frames off the socket and appends them, parsed, to the transport
/// loop's queue. This is the only context that touches the read half.
async fn reader_task(
    read_half: OwnedReadHalf,
    frames: mpsc::UnboundedSender<ProtocolResult<WireMessage>>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        match framing::read_frame(&mut reader).await {
            Ok(Some(message)) => {
                if frames.send(Ok(message)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = frames.send(Err(err));
                break;
            }
        }
    }
}

async fn transport_task(
    read_half: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut messages: mpsc::UnboundedReceiver<LoopMessage>,
    events: mpsc::UnboundedSender<ProtocolEvent>,
    attach_reply: oneshot::Sender<()>,
) {
    debug!("transport loop started");

    let (frame_tx, mut frames) = mpsc::unbounded_channel();
    tokio::spawn(reader_task(read_half, frame_tx));

    let mut pending: HashMap<u32, PendingRequest> = HashMap::new();
    let mut attach_reply = Some(attach_reply);

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(LoopMessage::Command(command)) => {
                    debug!(seq = command.seq, command = command.command, "sending command");
                    let request = WireRequest::new(
                        command.seq,
                        command.command,
                        command.arguments.as_ref(),
                    );
                    let frame = match framing::encode_frame(&request) {
                        Ok(frame) => frame,
                        Err(err) => {
                            error!(%err, "failed to encode command");
                            if let Some(reply) = command.reply {
                                let _ = reply.send(Err(err));
                            }
                            continue;
                        }
                    };
                    if let Err(err) = writer.write_all(&frame).await {
                        error!(%err, "failed to write command");
                        if let Some(reply) = command.reply {
                            let _ = reply.send(Err(err.into()));
                        }
                        continue;
                    }
                    if let Err(err) = writer.flush().await {
                        error!(%err, "failed to flush command");
                        if let Some(reply) = command.reply {
                            let _ = reply.send(Err(err.into()));
                        }
                        continue;
                    }
                    if let Some(reply) = command.reply {
                        pending.insert(command.seq, PendingRequest {
                            command: command.command,
                            reply,
                        });
                    }
                }
                Some(LoopMessage::Shutdown) => {
                    debug!("shutting down transport");
                    let _ = writer.shutdown().await;
                    let _ = events.send(ProtocolEvent::Detached { reason: None });
                    break;
                }
                None => {
                    debug!("transport handle dropped");
                    break;
                }
            },

            frame = frames.recv() => match frame {
                Some(Ok(message)) => {
                    handle_frame(message, &mut pending, &mut attach_reply, &events);
                }
                Some(Err(err)) => {
                    error!(%err, "failed to read frame");
                    let _ = events.send(ProtocolEvent::Detached {
                        reason: Some(NETWORK_READ_ERROR.to_string()),
                    });
                    break;
                }
                None => {
                    info!("connection closed by target");
                    let _ = events.send(ProtocolEvent::Detached {
                        reason: Some(NETWORK_READ_ERROR.to_string()),
                    });
                    break;
                }
            }
        }
    }

    debug!(outstanding = pending.len(), "transport loop terminated");
    // `pending` drops here; outstanding sinks are never fired.
}

fn handle_frame(
    message: WireMessage,
    pending: &mut HashMap<u32, PendingRequest>,
    attach_reply: &mut Option<oneshot::Sender<()>>,
    events: &mpsc::UnboundedSender<ProtocolEvent>,
) {
    match message {
        WireMessage::Response(response) => handle_response(response, pending, attach_reply),
        WireMessage::Event(event) => match event.event.as_str() {
            "break" => match decode::break_event(event.body.as_ref()) {
                Ok(event) => {
                    let _ = events.send(event);
                }
                Err(err) => warn!(%err, "dropping undecodable break event"),
            },
            "exception" => match decode::exception_event(event.body.as_ref()) {
                Ok(event) => {
                    let _ = events.send(event);
                }
                Err(err) => warn!(%err, "dropping undecodable exception event"),
            },
            other => debug!(event = other, "ignoring event"),
        },
    }
}

fn handle_response(
    response: WireResponse,
    pending: &mut HashMap<u32, PendingRequest>,
    attach_reply: &mut Option<oneshot::Sender<()>>,
) {
    // The attach round trip completes on the version response, which
    // arrives without a usable request_seq on some engines.
    if response.command == "version" {
        if let Some(reply) = attach_reply.take() {
            debug!("attach acknowledged");
            let _ = reply.send(());
            return;
        }
    }
    let Some(seq) = response.request_seq else {
        debug!(command = %response.command, "discarding response without request_seq");
        return;
    };
    // Remove before resolving: at-most-once delivery.
    let Some(entry) = pending.remove(&seq) else {
        debug!(seq, "discarding unmatched response");
        return;
    };
    let typed = decode::type_response(entry.command, response);
    let _ = entry.reply.send(typed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use debugger_core::protocol::Ack;
    use serde_json::json;

    fn raw_response(payload: Value) -> WireResponse {
        let WireMessage::Response(response) = serde_json::from_value(payload).unwrap() else {
            panic!("expected response");
        };
        response
    }

    #[test]
    fn version_response_fires_attach_exactly_once() {
        let mut pending = HashMap::new();
        let (tx, mut rx) = oneshot::channel();
        let mut attach = Some(tx);

        let response = raw_response(json!({
            "type": "response", "command": "version", "success": true, "running": true,
        }));
        handle_response(response, &mut pending, &mut attach);
        assert!(attach.is_none());
        assert!(rx.try_recv().is_ok());

        // A second version response has no armed sink and no request_seq,
        // so it is discarded.
        let response = raw_response(json!({
            "type": "response", "command": "version", "success": true, "running": true,
        }));
        handle_response(response, &mut pending, &mut attach);
    }

    #[test]
    fn response_resolves_pending_entry_at_most_once() {
        let mut pending = HashMap::new();
        let (reply, mut rx) = oneshot::channel();
        pending.insert(
            4,
            PendingRequest {
                command: "continue",
                reply,
            },
        );
        let mut attach = None;

        let response = raw_response(json!({
            "type": "response", "request_seq": 4, "command": "continue",
            "success": true, "running": true,
        }));
        handle_response(response, &mut pending, &mut attach);

        assert!(pending.is_empty());
        let typed = rx.try_recv().unwrap().unwrap();
        assert!(matches!(typed, ResponseBody::Ack(Ack { running: true })));

        // Same sequence again: no stored sink, silently discarded.
        let response = raw_response(json!({
            "type": "response", "request_seq": 4, "command": "continue",
            "success": true, "running": true,
        }));
        handle_response(response, &mut pending, &mut attach);
    }

    #[test]
    fn unmatched_response_is_discarded() {
        let mut pending: HashMap<u32, PendingRequest> = HashMap::new();
        let mut attach = None;
        let response = raw_response(json!({
            "type": "response", "request_seq": 77, "command": "lookup", "success": true,
        }));
        handle_response(response, &mut pending, &mut attach);
        assert!(pending.is_empty());
    }
}
