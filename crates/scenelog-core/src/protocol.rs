//! obs-websocket v5 wire protocol: frame envelope, typed payloads, and
//! extraction helpers for the handful of events and requests the tracker
//! cares about.
//!
//! Every frame is a JSON object `{"op": <int>, "d": <payload>}`. Frames
//! missing the opcode or their type discriminant are rejected by
//! [`parse_frame`] and dropped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Opcodes and constants
// ---------------------------------------------------------------------------

pub const OP_HELLO: u64 = 0;
pub const OP_IDENTIFY: u64 = 1;
pub const OP_IDENTIFIED: u64 = 2;
pub const OP_EVENT: u64 = 5;
pub const OP_REQUEST: u64 = 6;
pub const OP_REQUEST_RESPONSE: u64 = 7;

/// Protocol version declared in the Identify frame.
pub const RPC_VERSION: u64 = 1;

/// Event-category subscription bits: General, Scenes, SceneItems.
pub const SUB_GENERAL: u64 = 1;
pub const SUB_SCENES: u64 = 1 << 4;
pub const SUB_SCENE_ITEMS: u64 = 1 << 5;

/// The bitmask the tracker subscribes with.
pub const EVENT_SUBSCRIPTIONS: u64 = SUB_GENERAL | SUB_SCENES | SUB_SCENE_ITEMS;

/// The one unsolicited event kind the tracker recognizes.
pub const EVENT_SCENE_ITEM_ENABLE_STATE_CHANGED: &str = "SceneItemEnableStateChanged";

pub const REQUEST_GET_SCENE_LIST: &str = "GetSceneList";
pub const REQUEST_GET_SCENE_ITEM_LIST: &str = "GetSceneItemList";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is missing its `op` field")]
    MissingOpcode,

    #[error("op {op} frame has a malformed payload: {detail}")]
    MalformedPayload { op: u64, detail: String },
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Server greeting (op 0).
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    #[serde(rename = "rpcVersion")]
    pub rpc_version: u64,
}

/// Unsolicited event (op 5).
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default, rename = "eventData")]
    pub event_data: Value,
}

/// Remote-reported request outcome, embedded in op 7 frames.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    #[serde(default)]
    pub code: Option<i64>,
}

/// Response to a correlated request (op 7).
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsePayload {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "requestStatus")]
    pub request_status: RequestStatus,
    #[serde(default, rename = "responseData")]
    pub response_data: Option<Value>,
}

/// Every inbound frame kind the client routes on.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Hello(HelloPayload),
    Identified,
    Event(EventPayload),
    Response(ResponsePayload),
    /// Recognized envelope, unrecognized opcode. Logged and dropped upstream.
    Unknown(u64),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one inbound text frame into a routable [`InboundFrame`].
pub fn parse_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let op = value
        .get("op")
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::MissingOpcode)?;
    let payload = value.get("d").cloned().unwrap_or(Value::Null);

    let malformed = |detail: serde_json::Error| ProtocolError::MalformedPayload {
        op,
        detail: detail.to_string(),
    };

    match op {
        OP_HELLO => {
            let hello: HelloPayload = serde_json::from_value(payload).map_err(malformed)?;
            Ok(InboundFrame::Hello(hello))
        }
        OP_IDENTIFIED => Ok(InboundFrame::Identified),
        OP_EVENT => {
            let event: EventPayload = serde_json::from_value(payload).map_err(malformed)?;
            Ok(InboundFrame::Event(event))
        }
        OP_REQUEST_RESPONSE => {
            let response: ResponsePayload = serde_json::from_value(payload).map_err(malformed)?;
            Ok(InboundFrame::Response(response))
        }
        other => Ok(InboundFrame::Unknown(other)),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    op: u64,
    d: T,
}

/// Encode the Identify frame (op 1) sent in response to Hello.
pub fn encode_identify() -> String {
    serde_json::to_string(&Envelope {
        op: OP_IDENTIFY,
        d: serde_json::json!({
            "rpcVersion": RPC_VERSION,
            "eventSubscriptions": EVENT_SUBSCRIPTIONS,
        }),
    })
    .expect("identify frame serializes")
}

/// Encode a correlated request frame (op 6).
pub fn encode_request(request_type: &str, request_id: &str, request_data: Value) -> String {
    serde_json::to_string(&Envelope {
        op: OP_REQUEST,
        d: serde_json::json!({
            "requestType": request_type,
            "requestId": request_id,
            "requestData": request_data,
        }),
    })
    .expect("request frame serializes")
}

// ---------------------------------------------------------------------------
// Extraction helpers
// ---------------------------------------------------------------------------

/// Extract (source name, visible) from a `SceneItemEnableStateChanged`
/// event. Returns `None` for every other event kind or a malformed payload.
pub fn scene_item_visibility(event: &EventPayload) -> Option<(String, bool)> {
    if event.event_type != EVENT_SCENE_ITEM_ENABLE_STATE_CHANGED {
        return None;
    }
    let name = event.event_data.get("sceneItemName")?.as_str()?.to_string();
    let visible = event.event_data.get("sceneItemEnabled")?.as_bool()?;
    Some((name, visible))
}

/// Scene names from a `GetSceneList` response body. Entries without a
/// `sceneName` are skipped.
pub fn scene_names(response_data: &Value) -> Vec<String> {
    response_data
        .get("scenes")
        .and_then(Value::as_array)
        .map(|scenes| {
            scenes
                .iter()
                .filter_map(|s| s.get("sceneName").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// (source name, visible) pairs from a `GetSceneItemList` response body.
pub fn scene_item_states(response_data: &Value) -> Vec<(String, bool)> {
    response_data
        .get("sceneItems")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("sourceName").and_then(Value::as_str)?;
                    let visible = item.get("sceneItemEnabled").and_then(Value::as_bool)?;
                    Some((name.to_string(), visible))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
