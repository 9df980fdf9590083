use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::ErrorPayload;

use super::*;

fn create_test_connection() -> (
	Arc<Connection>,
	mpsc::UnboundedReceiver<String>,
	broadcast::Receiver<TransportEvent>,
) {
	let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
	let (events_tx, events_rx) = broadcast::channel(16);
	(Arc::new(Connection::new(outbound_tx, events_tx)), outbound_rx, events_rx)
}

#[test]
fn test_request_id_increments() {
	let (connection, _, _) = create_test_connection();

	let id1 = connection.last_id.fetch_add(1, Ordering::SeqCst);
	let id2 = connection.last_id.fetch_add(1, Ordering::SeqCst);

	assert_eq!(id1, 1);
	assert_eq!(id2, 2);
}

#[tokio::test]
async fn test_send_message_writes_frame_and_resolves() {
	let (connection, mut outbound_rx, _) = create_test_connection();

	let sender = Arc::clone(&connection);
	let task = tokio::spawn(async move {
		sender
			.send_message("Runtime.evaluate", serde_json::json!({"expression": "1"}), Some("S1"))
			.await
	});

	let frame = outbound_rx.recv().await.unwrap();
	let request: Request = serde_json::from_str(&frame).unwrap();
	assert_eq!(request.method, "Runtime.evaluate");
	assert_eq!(request.session_id.as_deref(), Some("S1"));

	connection
		.dispatch(Message::Response(Response {
			id: request.id,
			result: Some(serde_json::json!({"result": {"type": "number", "value": 1}})),
			error: None,
			session_id: Some("S1".to_string()),
		}))
		.unwrap();

	let result = task.await.unwrap().unwrap();
	assert_eq!(result["result"]["value"], 1);
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_dispatch_response_error_is_classified() {
	let (connection, _, _) = create_test_connection();

	let id = connection.last_id.fetch_add(1, Ordering::SeqCst);
	let (tx, rx) = oneshot::channel();
	connection.callbacks.lock().insert(id, tx);

	connection
		.dispatch(Message::Response(Response {
			id,
			result: None,
			error: Some(ErrorPayload {
				code: -32000,
				message: "Cannot find context with specified id".to_string(),
				data: None,
			}),
			session_id: None,
		}))
		.unwrap();

	let err = rx.await.unwrap().unwrap_err();
	assert!(err.is_target_gone(), "Expected target gone, got: {:?}", err);
}

#[tokio::test]
async fn test_late_response_is_discarded() {
	let (connection, _outbound_rx, _) = create_test_connection();

	let result = tokio::time::timeout(
		Duration::from_millis(10),
		connection.send_message("Runtime.evaluate", serde_json::json!({}), None),
	)
	.await;
	assert!(result.is_err());
	assert_eq!(connection.pending_count(), 0);

	connection
		.dispatch(Message::Response(Response {
			id: 1,
			result: Some(Value::Null),
			error: None,
			session_id: None,
		}))
		.unwrap();
}

#[tokio::test]
async fn test_events_are_broadcast_with_session() {
	let (connection, _, mut events_rx) = create_test_connection();

	connection.dispatch_text(r#"{"method": "Runtime.executionContextsCleared", "params": {}, "sessionId": "S2"}"#);

	match events_rx.recv().await.unwrap() {
		TransportEvent::Protocol(event) => {
			assert_eq!(event.method, "Runtime.executionContextsCleared");
			assert_eq!(event.session_id.as_deref(), Some("S2"));
		}
		other => panic!("Expected protocol event, got {other:?}"),
	}
}

#[tokio::test]
async fn test_fail_pending_rejects_waiters() {
	let (connection, _outbound_rx, _) = create_test_connection();

	let sender = Arc::clone(&connection);
	let task = tokio::spawn(async move { sender.send_message("Page.enable", Value::Null, None).await });

	while connection.pending_count() == 0 {
		tokio::task::yield_now().await;
	}
	connection.fail_pending("socket closed");

	let err = task.await.unwrap().unwrap_err();
	assert!(err.is_target_gone());
}
