// Decoding engine payloads into the core model
//
// Ref lists become HandleSets, backtrace bodies become Frames, and raw
// responses are typed by the name of the command that produced them. A
// decode failure fails the whole operation; graph traversal downstream
// assumes every materialized handle is fully typed.

use debugger_core::handles::{FunctionHandle, Handle, HandleSet, ObjectHandle, Property};
use debugger_core::protocol::{
    Ack, AddBreakpointResponse, ChangeSourceResponse, ProtocolError, ProtocolEvent,
    ProtocolResult, ScopesResponse, SnapshotResponse, ValuesResponse,
};
use debugger_core::snapshot::{Frame, Scope, ScopeKind, SourceLocation, ValueRef};
use serde_json::Value;

use crate::wire::{
    WireBacktraceBody, WireBreakpointBody, WireChangeLiveBody, WireEventBody, WireFrame,
    WireProperty, WireRef, WireResponse, WireScope, WireScopesBody, WireScriptEntry,
};

/// A response after typing, selected by the originating command name.
#[derive(Debug)]
pub enum ResponseBody {
    Ack(Ack),
    Snapshot(SnapshotResponse),
    Values(ValuesResponse),
    Scopes(ScopesResponse),
    BreakpointAdded(AddBreakpointResponse),
    SourceChanged(ChangeSourceResponse),
    Scripts(Vec<i64>),
}

/// Builds the typed response for a raw wire response. `command` is the name
/// of the originating request, recorded when the request was sent.
pub fn type_response(command: &str, response: WireResponse) -> ProtocolResult<ResponseBody> {
    if !response.success {
        let message = response
            .message
            .unwrap_or_else(|| format!("{} failed", command));
        return Err(ProtocolError::Command(message));
    }
    let running = response.running;
    match command {
        "backtrace" => {
            let handles = handle_set_from_refs(&response.refs)?;
            let frames = frames_from_body(response.body.as_ref(), &handles)?;
            Ok(ResponseBody::Snapshot(SnapshotResponse {
                running,
                handles,
                frames,
            }))
        }
        "lookup" => {
            let body = response
                .body
                .as_ref()
                .ok_or_else(|| ProtocolError::Decode("lookup response missing body".to_string()))?;
            let handles = handle_set_from_map(body)?;
            Ok(ResponseBody::Values(ValuesResponse { running, handles }))
        }
        "scopes" => {
            let handles = handle_set_from_refs(&response.refs)?;
            let body = response
                .body
                .ok_or_else(|| ProtocolError::Decode("scopes response missing body".to_string()))?;
            let body: WireScopesBody = serde_json::from_value(body)?;
            let scopes = body
                .scopes
                .into_iter()
                .map(scope_from_wire)
                .collect::<ProtocolResult<Vec<_>>>()?;
            Ok(ResponseBody::Scopes(ScopesResponse {
                running,
                handles,
                scopes,
            }))
        }
        "setbreakpoint" => {
            let body = response.body.ok_or_else(|| {
                ProtocolError::Decode("setbreakpoint response missing body".to_string())
            })?;
            let body: WireBreakpointBody = serde_json::from_value(body)?;
            Ok(ResponseBody::BreakpointAdded(AddBreakpointResponse {
                running,
                protocol_id: body.breakpoint,
            }))
        }
        "changelive" => {
            let step_in_required = match response.body {
                Some(body) => {
                    serde_json::from_value::<WireChangeLiveBody>(body)?.stepin_recommended
                }
                None => false,
            };
            Ok(ResponseBody::SourceChanged(ChangeSourceResponse {
                running,
                step_in_required,
            }))
        }
        "scripts" => {
            let ids = match response.body {
                Some(body) => serde_json::from_value::<Vec<WireScriptEntry>>(body)?
                    .into_iter()
                    .map(|entry| entry.id)
                    .collect(),
                None => Vec::new(),
            };
            Ok(ResponseBody::Scripts(ids))
        }
        _ => Ok(ResponseBody::Ack(Ack { running })),
    }
}

/// Decodes a flat ref list (backtrace/scopes payloads) into a HandleSet.
pub fn handle_set_from_refs(refs: &[Value]) -> ProtocolResult<HandleSet> {
    let mut handles = HandleSet::new();
    for ref_obj in refs {
        handles.insert(handle_from_ref(ref_obj)?);
    }
    Ok(handles)
}

/// Decodes a lookup body, which maps handle IDs to ref objects.
pub fn handle_set_from_map(body: &Value) -> ProtocolResult<HandleSet> {
    let map = body
        .as_object()
        .ok_or_else(|| ProtocolError::Decode("lookup body is not an object".to_string()))?;
    let mut handles = HandleSet::new();
    for ref_obj in map.values() {
        handles.insert(handle_from_ref(ref_obj)?);
    }
    Ok(handles)
}

fn handle_from_ref(value: &Value) -> ProtocolResult<Handle> {
    let wire_ref: WireRef = serde_json::from_value(value.clone())
        .map_err(|error| ProtocolError::Decode(format!("unrecognized handle ref: {}", error)))?;
    Ok(match wire_ref {
        WireRef::Undefined { handle } => Handle::Undefined { id: handle },
        WireRef::Null { handle } => Handle::Null { id: handle },
        WireRef::Boolean { handle, value } => Handle::Boolean { id: handle, value },
        WireRef::Number { handle, value } => Handle::Number { id: handle, value },
        WireRef::String { handle, value } => Handle::String { id: handle, value },
        WireRef::Script { handle, name } => Handle::Script {
            id: handle,
            uri: name,
        },
        WireRef::Object {
            handle,
            class_name,
            constructor_function,
            prototype_object,
            properties,
        } => Handle::Object(ObjectHandle {
            id: handle,
            class_name,
            constructor_ref: constructor_function.ref_id,
            prototype_ref: prototype_object.ref_id,
            properties: properties.into_iter().map(property_from_wire).collect(),
        }),
        WireRef::Function {
            handle,
            class_name,
            constructor_function,
            prototype_object,
            properties,
            name,
            inferred_name,
        } => Handle::Function(FunctionHandle {
            id: handle,
            class_name,
            constructor_ref: constructor_function.ref_id,
            prototype_ref: prototype_object.ref_id,
            properties: properties.into_iter().map(property_from_wire).collect(),
            name,
            inferred_name,
        }),
    })
}

fn property_from_wire(property: WireProperty) -> Property {
    Property {
        name: name_to_string(&property.name),
        ref_id: property.ref_id,
        property_type: property.property_type,
        attributes: property.attributes,
    }
}

/// Property and variable names arrive as strings or as numeric array
/// indices.
fn name_to_string(name: &Value) -> String {
    match name {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

/// Decodes backtrace frames, resolving each frame's script through the
/// already-decoded handle set. Wire coordinates are zero-based.
pub fn frames_from_body(body: Option<&Value>, handles: &HandleSet) -> ProtocolResult<Vec<Frame>> {
    let Some(body) = body else {
        return Ok(Vec::new());
    };
    let body: WireBacktraceBody = serde_json::from_value(body.clone())?;
    body.frames
        .into_iter()
        .map(|frame| frame_from_wire(frame, handles))
        .collect()
}

fn frame_from_wire(frame: WireFrame, handles: &HandleSet) -> ProtocolResult<Frame> {
    let uri = handles.script_uri(frame.script.ref_id).ok_or_else(|| {
        ProtocolError::Decode(format!(
            "frame {} references unknown script ref {}",
            frame.index, frame.script.ref_id
        ))
    })?;
    let location = SourceLocation::new(uri, frame.line + 1, frame.column + 1);
    let variable = |var: crate::wire::WireVariable| ValueRef {
        name: var.name.as_ref().map(name_to_string),
        ref_id: var.value.ref_id,
    };
    Ok(Frame {
        ordinal: frame.index,
        location,
        is_constructor_call: frame.construct_call,
        is_at_return: frame.at_return,
        function_ref: frame.func.ref_id,
        this_ref: frame.receiver.ref_id,
        arguments: frame.arguments.into_iter().map(variable).collect(),
        locals: frame.locals.into_iter().map(variable).collect(),
    })
}

fn scope_from_wire(scope: WireScope) -> ProtocolResult<Scope> {
    let kind = match scope.scope_type {
        0 => ScopeKind::Global,
        1 => ScopeKind::Local,
        2 => ScopeKind::With,
        3 => ScopeKind::Closure,
        4 => ScopeKind::Catch,
        other => {
            return Err(ProtocolError::Decode(format!(
                "unknown scope type {}",
                other
            )))
        }
    };
    Ok(Scope {
        ordinal: scope.index,
        kind,
        object_ref: scope.object.ref_id,
    })
}

/// Decodes a break event body into the protocol event.
pub fn break_event(body: Option<&Value>) -> ProtocolResult<ProtocolEvent> {
    let body = parse_event_body(body)?;
    Ok(ProtocolEvent::Break {
        location: event_location(&body),
        breakpoint_ids: body.breakpoints,
    })
}

/// Decodes an exception event body into the protocol event.
pub fn exception_event(body: Option<&Value>) -> ProtocolResult<ProtocolEvent> {
    let body = parse_event_body(body)?;
    let location = event_location(&body);
    Ok(ProtocolEvent::Exception {
        location,
        uncaught: body.uncaught,
        exception: body.exception,
    })
}

fn parse_event_body(body: Option<&Value>) -> ProtocolResult<WireEventBody> {
    let body = body.ok_or_else(|| ProtocolError::Decode("event missing body".to_string()))?;
    serde_json::from_value(body.clone())
        .map_err(|error| ProtocolError::Decode(format!("malformed event body: {}", error)))
}

fn event_location(body: &WireEventBody) -> SourceLocation {
    SourceLocation::new(
        body.script.name.clone(),
        body.source_line + 1,
        body.source_column + 1,
    )
}
