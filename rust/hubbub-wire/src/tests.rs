use super::*;
use serde_json::json;

#[test]
fn invocation_decodes_with_camel_case_fields() {
    let msg = Message::from_slice(
        br#"{"type":1,"invocationId":"123","target":"add","arguments":[1,2],"streamIds":["s1"]}"#,
    )
    .unwrap();
    let Message::Invocation(inv) = msg else {
        panic!("expected Invocation, got {msg:?}");
    };
    assert_eq!(inv.invocation_id.as_deref(), Some("123"));
    assert_eq!(inv.target, "add");
    assert_eq!(inv.arguments, vec![json!(1), json!(2)]);
    assert_eq!(inv.stream_ids, vec!["s1".to_string()]);
}

#[test]
fn invocation_id_and_stream_ids_are_optional() {
    let msg = Message::from_slice(br#"{"type":1,"target":"fire"}"#).unwrap();
    let Message::Invocation(inv) = msg else {
        panic!("expected Invocation");
    };
    assert_eq!(inv.invocation_id, None);
    assert!(inv.arguments.is_empty());
    assert!(inv.stream_ids.is_empty());
}

#[test]
fn type_4_decodes_as_stream_invocation() {
    let msg = Message::from_slice(br#"{"type":4,"invocationId":"a","target":"counter"}"#).unwrap();
    assert!(matches!(msg, Message::StreamInvocation(_)));
}

#[test]
fn stream_item_round_trips() {
    let item = StreamItem::new("s1", json!(42.5));
    let bytes = Message::StreamItem(item.clone()).to_vec().unwrap();
    let decoded = Message::from_slice(&bytes).unwrap();
    assert_eq!(decoded, Message::StreamItem(item));
}

#[test]
fn completion_with_null_result_counts_as_absent() {
    let msg = Message::from_slice(br#"{"type":3,"invocationId":"s1","result":null}"#).unwrap();
    let Message::Completion(c) = msg else {
        panic!("expected Completion");
    };
    assert_eq!(c.result, None);
}

#[test]
fn completion_constructors_fix_the_discriminant() {
    assert_eq!(Completion::done("a").kind, 3);
    assert_eq!(Completion::result("a", json!(7)).result, Some(json!(7)));
    let err = Completion::error("a", "boom");
    assert_eq!(err.error.as_deref(), Some("boom"));
    assert_eq!(err.result, None);
}

#[test]
fn unknown_fields_are_ignored() {
    let msg = Message::from_slice(
        br#"{"type":5,"invocationId":"x","headers":{"traceparent":"00-ab"},"extra":1}"#,
    )
    .unwrap();
    assert!(matches!(msg, Message::CancelInvocation(_)));
}

#[test]
fn ping_has_no_payload() {
    assert!(matches!(
        Message::from_slice(br#"{"type":6}"#).unwrap(),
        Message::Ping
    ));
    assert_eq!(Message::Ping.to_vec().unwrap(), br#"{"type":6}"#.to_vec());
}

#[test]
fn unknown_type_is_rejected() {
    let err = Message::from_slice(br#"{"type":99}"#).unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownType(99)));
}

#[test]
fn missing_or_non_integer_type_is_rejected() {
    assert!(matches!(
        Message::from_slice(br#"{"target":"x"}"#).unwrap_err(),
        ProtocolError::MissingDiscriminant
    ));
    assert!(matches!(
        Message::from_slice(br#"{"type":"1"}"#).unwrap_err(),
        ProtocolError::MissingDiscriminant
    ));
}

#[test]
fn malformed_json_is_rejected() {
    assert!(matches!(
        Message::from_slice(br#"{"type":1"#).unwrap_err(),
        ProtocolError::Malformed(_)
    ));
}

#[test]
fn close_with_junk_error_field_still_closes() {
    let msg = Message::from_slice(br#"{"type":7,"error":1}"#).unwrap();
    assert_eq!(msg, Message::Close(Close { kind: 7, error: None }));
}

#[test]
fn close_keeps_a_string_error() {
    let msg = Message::from_slice(br#"{"type":7,"error":"server shutting down"}"#).unwrap();
    let Message::Close(c) = msg else {
        panic!("expected Close");
    };
    assert_eq!(c.error.as_deref(), Some("server shutting down"));
}

#[test]
fn successful_handshake_response_is_the_empty_object() {
    let bytes = serde_json::to_vec(&HandshakeResponse::ok()).unwrap();
    assert_eq!(bytes, b"{}".to_vec());
}

#[test]
fn handshake_request_parses_with_extra_whitespace() {
    let req: HandshakeRequest =
        serde_json::from_slice(br#"{"protocol": "json","version": 1}"#).unwrap();
    assert_eq!(req.protocol, "json");
    assert_eq!(req.version, 1);
}

#[test]
fn handshake_error_response_carries_the_reason() {
    let resp = HandshakeResponse::error("unsupported protocol \"bson\"");
    let value: Value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["error"], json!("unsupported protocol \"bson\""));
}
