use super::*;

#[test]
fn success_response() {
    let response = Response::Success(SuccessResponse::new(
        12345u64.into(),
        serde_json::json!({"answer": 42}),
    ));

    let serialized = serde_json::to_string(&response).unwrap();

    assert_eq!(
        &serialized,
        r#"{"jsonrpc":"2.0","id":12345,"result":{"answer":42}}"#
    );

    let deserialized: Response = serde_json::from_str(&serialized).unwrap();

    assert_eq!(&response, &deserialized)
}

#[test]
fn error_response() {
    let response = Response::Error(ErrorResponse::new(
        "req-7".into(),
        RpcError::method_not_found("calc", "divide"),
    ));

    let serialized = serde_json::to_string(&response).unwrap();

    assert_eq!(
        &serialized,
        r#"{"jsonrpc":"2.0","id":"req-7","error":{"code":-32601,"message":"the method calc_divide does not exist/is not available"}}"#
    );

    let deserialized: Response = serde_json::from_str(&serialized).unwrap();

    assert_eq!(&response, &deserialized)
}

#[test]
fn error_response_with_info() {
    let response = ErrorResponse::with_info(
        RequestId::Null,
        RpcError::Shutdown,
        serde_json::json!("draining connections"),
    );

    assert_eq!(
        serde_json::to_string(&response).unwrap(),
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"server is shutting down","data":"draining connections"}}"#
    );
}

#[test]
fn notification() {
    let id = SubscriptionId::from("c0ffee");
    let notification = Notification::new(id, "eth", serde_json::json!({"number": 1}));

    assert_eq!(
        serde_json::to_string(&notification).unwrap(),
        r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"c0ffee","result":{"number":1}}}"#
    );
}

#[test]
fn parse_single_request() {
    let (calls, batch) = parse_requests(
        r#"{"jsonrpc":"2.0","id":12345,"method":"test_echoWithCtx","params":["string arg",1122,{"S":"abcde"}]}"#,
    )
    .unwrap();

    assert!(!batch);
    assert_eq!(calls.len(), 1);

    let call = calls.first().unwrap();
    assert_eq!(call.id, 12345u64.into());
    assert_eq!(call.service, "test");
    assert_eq!(call.method, "echoWithCtx");
    assert!(!call.is_pubsub);
    assert!(call.err.is_none());
    assert_eq!(
        call.params.as_ref().unwrap().get(),
        r#"["string arg",1122,{"S":"abcde"}]"#
    );
}

#[test]
fn parse_request_without_id_is_rejected() {
    assert!(matches!(
        parse_requests(r#"{"jsonrpc":"2.0","method":"test_ping"}"#),
        Err(RpcError::InvalidMessage(_))
    ));
}

#[test]
fn parse_request_with_null_id() {
    let (calls, _) =
        parse_requests(r#"{"jsonrpc":"2.0","id":null,"method":"test_ping"}"#).unwrap();

    assert_eq!(calls.first().unwrap().id, RequestId::Null);
}

#[test]
fn parse_rejects_structured_id() {
    assert!(matches!(
        parse_requests(r#"{"jsonrpc":"2.0","id":[1],"method":"test_ping"}"#),
        Err(RpcError::InvalidMessage(_))
    ));

    assert!(matches!(
        parse_requests(r#"{"jsonrpc":"2.0","id":{"a":1},"method":"test_ping"}"#),
        Err(RpcError::InvalidMessage(_))
    ));
}

#[test]
fn parse_rejects_malformed_json() {
    assert!(matches!(
        parse_requests(r#"{"jsonrpc":"#),
        Err(RpcError::InvalidMessage(_))
    ));
}

#[test]
fn parse_batch_request() {
    let (calls, batch) = parse_requests(
        r#" [{"id":1,"method":"test_echo","params":[1]},{"id":2,"method":"test_doesNotExist","params":[]}]"#,
    )
    .unwrap();

    assert!(batch);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls.first().unwrap().method, "echo");
    assert_eq!(calls.get(1).unwrap().method, "doesNotExist");
}

#[test]
fn parse_attaches_method_not_found_for_bad_names() {
    // No separator at all, and too many separators.
    for method in ["modules", "a_b_c"] {
        let msg = format!(r#"{{"id":1,"method":"{method}"}}"#);
        let (calls, _) = parse_requests(&msg).unwrap();
        let call = calls.first().unwrap();

        assert!(matches!(
            call.err,
            Some(RpcError::MethodNotFound { .. })
        ));
    }
}

#[test]
fn parse_subscribe_request() {
    let (calls, _) = parse_requests(
        r#"{"id":5,"method":"eth_subscribe","params":["newHeads",{"depth":3}]}"#,
    )
    .unwrap();

    let call = calls.first().unwrap();
    assert_eq!(call.service, "eth");
    assert_eq!(call.method, "newHeads");
    assert!(call.is_pubsub);
    // The method-name element stays in the raw params; binding strips it.
    assert_eq!(
        call.params.as_ref().unwrap().get(),
        r#"["newHeads",{"depth":3}]"#
    );
}

#[test]
fn parse_subscribe_request_without_params_fails() {
    assert!(matches!(
        parse_requests(r#"{"id":5,"method":"eth_subscribe"}"#),
        Err(RpcError::InvalidRequest(_))
    ));

    assert!(matches!(
        parse_requests(r#"{"id":5,"method":"eth_subscribe","params":[]}"#),
        Err(RpcError::InvalidRequest(_))
    ));

    assert!(matches!(
        parse_requests(r#"{"id":5,"method":"eth_subscribe","params":[42]}"#),
        Err(RpcError::InvalidRequest(_))
    ));
}

#[test]
fn parse_unsubscribe_request() {
    let (calls, _) = parse_requests(
        r#"{"id":6,"method":"eth_unsubscribe","params":["c0ffee"]}"#,
    )
    .unwrap();

    let call = calls.first().unwrap();
    assert!(call.is_pubsub);
    assert_eq!(call.method, "eth_unsubscribe");
}

#[test]
fn request_round_trip() {
    let request = Request::new(
        1659980684711969u64.into(),
        "eth_subscribe",
        Some(serde_json::value::to_raw_value(&["newHeads"]).unwrap()),
    );

    assert_eq!(
        serde_json::to_string(&request).unwrap(),
        r#"{"id":1659980684711969,"jsonrpc":"2.0","method":"eth_subscribe","params":["newHeads"]}"#
    );
}
