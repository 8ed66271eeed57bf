// Wire-level JSON shapes for the V8 debug agent protocol
//
// Every message is a JSON object framed by a Content-Length header. Incoming
// traffic decodes once, at the transport boundary, into the tagged unions
// below; handle refs with an unrecognized type tag fail to decode rather
// than producing half-typed values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing command object: `{"seq", "type": "request", "command", "arguments"?}`.
#[derive(Debug, Serialize)]
pub struct WireRequest<'a> {
    pub seq: u32,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<&'a Value>,
}

impl<'a> WireRequest<'a> {
    pub fn new(seq: u32, command: &'a str, arguments: Option<&'a Value>) -> Self {
        Self {
            seq,
            message_type: "request",
            command,
            arguments,
        }
    }
}

/// Incoming traffic is either a response to one of our requests or an
/// engine-initiated event.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Response(WireResponse),
    Event(WireEvent),
}

#[derive(Debug, Deserialize)]
pub struct WireResponse {
    pub request_seq: Option<u32>,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub refs: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WireEvent {
    pub event: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// A reference to another handle, `{"ref": id}` on the wire.
#[derive(Debug, Deserialize)]
pub struct RefSlot {
    #[serde(rename = "ref")]
    pub ref_id: i64,
}

/// One property slot on an object or function ref. Names of array indices
/// arrive as JSON numbers.
#[derive(Debug, Deserialize)]
pub struct WireProperty {
    pub name: Value,
    #[serde(rename = "ref")]
    pub ref_id: i64,
    #[serde(default, rename = "propertyType")]
    pub property_type: i32,
    #[serde(default)]
    pub attributes: i32,
}

/// A flat "ref" object from a backtrace/lookup/scopes payload. The `type`
/// tag selects the variant; an unknown tag is a decode error.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireRef {
    Undefined {
        handle: i64,
    },
    Null {
        handle: i64,
    },
    Boolean {
        handle: i64,
        value: bool,
    },
    Number {
        handle: i64,
        value: f64,
    },
    String {
        handle: i64,
        value: String,
    },
    Script {
        handle: i64,
        name: String,
    },
    Object {
        handle: i64,
        #[serde(rename = "className")]
        class_name: String,
        #[serde(rename = "constructorFunction")]
        constructor_function: RefSlot,
        #[serde(rename = "prototypeObject")]
        prototype_object: RefSlot,
        #[serde(default)]
        properties: Vec<WireProperty>,
    },
    Function {
        handle: i64,
        #[serde(rename = "className")]
        class_name: String,
        #[serde(rename = "constructorFunction")]
        constructor_function: RefSlot,
        #[serde(rename = "prototypeObject")]
        prototype_object: RefSlot,
        #[serde(default)]
        properties: Vec<WireProperty>,
        #[serde(default)]
        name: String,
        #[serde(default, rename = "inferredName")]
        inferred_name: String,
    },
}

/// One local or argument slot in a backtrace frame. Argument slots can be
/// anonymous.
#[derive(Debug, Deserialize)]
pub struct WireVariable {
    #[serde(default)]
    pub name: Option<Value>,
    pub value: RefSlot,
}

/// One activation record in a backtrace body. Line and column are
/// zero-based on the wire.
#[derive(Debug, Deserialize)]
pub struct WireFrame {
    pub index: u32,
    pub script: RefSlot,
    pub line: u32,
    pub column: u32,
    #[serde(default, rename = "constructCall")]
    pub construct_call: bool,
    #[serde(default, rename = "atReturn")]
    pub at_return: bool,
    pub func: RefSlot,
    pub receiver: RefSlot,
    #[serde(default)]
    pub arguments: Vec<WireVariable>,
    #[serde(default)]
    pub locals: Vec<WireVariable>,
}

#[derive(Debug, Deserialize)]
pub struct WireBacktraceBody {
    #[serde(default)]
    pub frames: Vec<WireFrame>,
}

#[derive(Debug, Deserialize)]
pub struct WireScope {
    pub index: u32,
    #[serde(rename = "type")]
    pub scope_type: i64,
    pub object: RefSlot,
}

#[derive(Debug, Deserialize)]
pub struct WireScopesBody {
    pub scopes: Vec<WireScope>,
}

/// Break/exception event body. Line and column are zero-based.
#[derive(Debug, Deserialize)]
pub struct WireEventBody {
    pub script: WireScriptName,
    #[serde(rename = "sourceLine")]
    pub source_line: u32,
    #[serde(rename = "sourceColumn")]
    pub source_column: u32,
    #[serde(default)]
    pub breakpoints: Vec<i64>,
    #[serde(default)]
    pub uncaught: bool,
    #[serde(default)]
    pub exception: Value,
}

#[derive(Debug, Deserialize)]
pub struct WireScriptName {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WireBreakpointBody {
    pub breakpoint: i64,
}

#[derive(Debug, Deserialize)]
pub struct WireChangeLiveBody {
    #[serde(default)]
    pub stepin_recommended: bool,
}

#[derive(Debug, Deserialize)]
pub struct WireScriptEntry {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_without_empty_arguments() {
        let request = WireRequest::new(3, "version", None);
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({"seq": 3, "type": "request", "command": "version"})
        );
    }

    #[test]
    fn request_serializes_arguments() {
        let arguments = json!({"fromFrame": 0, "toFrame": 1024});
        let request = WireRequest::new(7, "backtrace", Some(&arguments));
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["arguments"]["toFrame"], 1024);
    }

    #[test]
    fn message_tag_discriminates_response_and_event() {
        let response: WireMessage = serde_json::from_value(json!({
            "type": "response",
            "request_seq": 4,
            "command": "continue",
            "running": true,
            "success": true,
        }))
        .unwrap();
        assert!(matches!(
            response,
            WireMessage::Response(WireResponse { request_seq: Some(4), .. })
        ));

        let event: WireMessage = serde_json::from_value(json!({
            "type": "event",
            "event": "break",
            "body": {},
        }))
        .unwrap();
        assert!(matches!(event, WireMessage::Event(WireEvent { .. })));
    }

    #[test]
    fn response_without_request_seq_decodes() {
        let message: WireMessage = serde_json::from_value(json!({
            "type": "response",
            "command": "version",
            "running": true,
            "success": true,
            "body": {"V8Version": "3.14.5.9"},
        }))
        .unwrap();
        let WireMessage::Response(response) = message else {
            panic!("expected response");
        };
        assert_eq!(response.request_seq, None);
        assert_eq!(response.command, "version");
    }

    #[test]
    fn unknown_ref_type_is_a_decode_error() {
        let result: Result<WireRef, _> =
            serde_json::from_value(json!({"type": "frame", "handle": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn object_ref_decodes_nested_slots() {
        let wire_ref: WireRef = serde_json::from_value(json!({
            "type": "object",
            "handle": 10,
            "className": "Point",
            "constructorFunction": {"ref": 11},
            "prototypeObject": {"ref": 12},
            "properties": [
                {"name": "x", "ref": 13, "propertyType": 1, "attributes": 0},
                {"name": 0, "ref": 14},
            ],
        }))
        .unwrap();
        let WireRef::Object {
            handle,
            constructor_function,
            properties,
            ..
        } = wire_ref
        else {
            panic!("expected object ref");
        };
        assert_eq!(handle, 10);
        assert_eq!(constructor_function.ref_id, 11);
        assert_eq!(properties.len(), 2);
        assert!(properties[1].name.is_number());
    }
}
