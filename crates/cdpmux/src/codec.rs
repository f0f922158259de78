//! Envelope encoding and inbound frame classification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::types::{CdpEvent, SessionId};

/// Outgoing command envelope.
#[derive(Debug, Serialize)]
pub(crate) struct CdpRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a SessionId>,
}

/// `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct CdpErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InboundFrame {
    Response { id: u64, result: Value },
    Error { id: u64, error: CdpErrorBody },
    Event(CdpEvent),
}

/// Serialize a command. Missing params are sent as `{}`.
pub(crate) fn encode(
    id: u64,
    method: &str,
    params: Option<&Value>,
    session_id: Option<&SessionId>,
) -> Result<String, serde_json::Error> {
    let empty = Value::Object(Map::new());
    let request = CdpRequest {
        id,
        method,
        params: params.unwrap_or(&empty),
        session_id,
    };
    serde_json::to_string(&request)
}

/// Parse and classify one inbound text frame.
pub(crate) fn decode(text: &str) -> Result<InboundFrame, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut frame) = value else {
        return Err(DecodeError::NotAnObject);
    };

    if let Some(id) = frame.get("id").map(Value::as_u64) {
        let id = id.ok_or(DecodeError::Unclassifiable)?;
        if let Some(error) = frame.remove("error") {
            let error: CdpErrorBody = serde_json::from_value(error)
                .map_err(|e| DecodeError::MalformedError(e.to_string()))?;
            return Ok(InboundFrame::Error { id, error });
        }
        return match frame.remove("result") {
            Some(result) => Ok(InboundFrame::Response { id, result }),
            None => Err(DecodeError::Unclassifiable),
        };
    }

    let method = match frame.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err(DecodeError::Unclassifiable),
    };
    let params = match frame.remove("params") {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(params) => params,
    };
    let session_id = match frame.remove("sessionId") {
        Some(Value::String(id)) if !id.is_empty() => Some(SessionId::from(id)),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(_) => return Err(DecodeError::Unclassifiable),
    };

    Ok(InboundFrame::Event(CdpEvent {
        method,
        params,
        session_id,
    }))
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
