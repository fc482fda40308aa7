//! Newline-delimited frame encoding and decoding.
//!
//! One frame is one line of JSON: a single message object or a batch array.
//! Decoding classifies each object by its keys; anything that parses as JSON
//! but is not a message yields [`CodecError::InvalidMessage`].

use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::message::{Frame, Message, Notification, Request, Response};

/// Encode a frame as a single line (without the trailing newline)
pub fn encode(frame: &Frame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode one line into a frame
pub fn decode(line: &str) -> Result<Frame, CodecError> {
    let value: Value = serde_json::from_str(line.trim())?;
    decode_value(value)
}

/// Decode an already-parsed JSON value into a frame
pub fn decode_value(value: Value) -> Result<Frame, CodecError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(CodecError::InvalidMessage("empty batch".to_string()));
            }
            let messages = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => decode_object(map),
                    _ => Err(CodecError::InvalidMessage(
                        "batch entries must be objects".to_string(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Frame::Batch(messages))
        }
        Value::Object(map) => Ok(Frame::Single(decode_object(map)?)),
        _ => Err(CodecError::InvalidMessage(
            "frame must be an object or an array".to_string(),
        )),
    }
}

fn decode_object(map: Map<String, Value>) -> Result<Message, CodecError> {
    let invalid = |e: serde_json::Error| CodecError::InvalidMessage(e.to_string());

    if map.contains_key("method") {
        if map.contains_key("id") {
            let request: Request = serde_json::from_value(Value::Object(map)).map_err(invalid)?;
            Ok(Message::Request(request))
        } else {
            let notification: Notification =
                serde_json::from_value(Value::Object(map)).map_err(invalid)?;
            Ok(Message::Notification(notification))
        }
    } else if map.contains_key("result") || map.contains_key("error") {
        if map.contains_key("result") && map.contains_key("error") {
            return Err(CodecError::InvalidMessage(
                "response carries both result and error".to_string(),
            ));
        }
        let response: Response = serde_json::from_value(Value::Object(map)).map_err(invalid)?;
        Ok(Message::Response(response))
    } else {
        Err(CodecError::InvalidMessage(
            "object is neither a request, a response nor a notification".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorObject;
    use crate::message::ResponsePayload;
    use serde_json::json;

    #[test]
    fn test_decode_classifies_messages() {
        let request = decode(r#"{"jsonrpc":"2.0","id":"1","method":"echo","params":[1]}"#).unwrap();
        assert!(matches!(request, Frame::Single(Message::Request(ref r)) if r.method == "echo"));

        let notification = decode(r#"{"jsonrpc":"2.0","method":"tick"}"#).unwrap();
        assert!(matches!(notification, Frame::Single(Message::Notification(_))));

        let response = decode(r#"{"jsonrpc":"2.0","id":"1","result":{"ok":true}}"#).unwrap();
        match response {
            Frame::Single(Message::Response(r)) => {
                assert_eq!(r.payload, ResponsePayload::Result(json!({"ok": true})));
            }
            other => panic!("expected response, got {:?}", other),
        }

        let error =
            decode(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#)
                .unwrap();
        match error {
            Frame::Single(Message::Response(r)) => {
                assert!(r.id.is_none());
                assert_eq!(r.into_result().unwrap_err(), RpcErrorObject::parse_error());
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err, CodecError::Parse(_)));
        assert_eq!(err.to_error_object().code, -32700);
    }

    #[test]
    fn test_valid_json_that_is_not_a_message_is_an_invalid_request() {
        for line in [r#"{"hello":"world"}"#, "42", "[]", r#"{"jsonrpc":"1.0","id":"1","method":"x"}"#] {
            let err = decode(line).unwrap_err();
            assert!(matches!(err, CodecError::InvalidMessage(_)), "line {line}");
            assert_eq!(err.to_error_object().code, -32600);
        }
    }

    #[test]
    fn test_batch_frames() {
        let line = r#"[{"jsonrpc":"2.0","id":"a","method":"add","params":[1,2]},{"jsonrpc":"2.0","id":"b","method":"add","params":[3,4]}]"#;
        match decode(line).unwrap() {
            Frame::Batch(messages) => {
                let ids: Vec<_> = messages.iter().filter_map(|m| m.id()).map(|id| id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_encoded_frames_are_single_lines() {
        let frame = Frame::Batch(vec![
            Request::new("1", "multi\nline", Some(json!({"text": "a\nb"}))).into(),
            Notification::new("n", None).into(),
        ]);
        let line = encode(&frame).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode(&line).unwrap(), frame);
    }
}
