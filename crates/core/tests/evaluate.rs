mod common;

use std::time::{Duration, Instant};

use cdp_bridge::{Error, EvaluateOptions, JsFunction, Session, SessionConfig, Value};
use common::{FakeTransport, Reply, default_reply, evaluated, settle};
use serde_json::json;

#[tokio::test]
async fn test_evaluate_returns_decoded_result() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => evaluated("42"),
		other => default_reply(other),
	});
	let session = Session::new(transport.clone(), SessionConfig::default());

	let function = JsFunction::new("() => 40 + 2").unwrap();
	let result = session.evaluate(&function, vec![]).await.unwrap();
	assert_eq!(result, Value::from(42));

	let command = &transport.commands_named("Runtime.evaluate")[0];
	assert_eq!(command.session_id, None);
	assert_eq!(command.params["awaitPromise"], json!(true));
	assert_eq!(command.params["returnByValue"], json!(false));
	assert_eq!(command.params["generatePreview"], json!(false));
	assert_eq!(command.params["throwOnSideEffect"], json!(false));
	assert!(command.params.get("contextId").is_none());
	assert!(command.expression().contains("const fn = (() => 40 + 2);"));
}

#[tokio::test]
async fn test_evaluate_round_trips_dates() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => evaluated(r#"{"$t":"date","v":1500}"#),
		other => default_reply(other),
	});
	let session = Session::new(transport.clone(), SessionConfig::default());

	let function = JsFunction::new("(a, b) => new Date(a.getTime() + b)").unwrap();
	let result = session
		.evaluate(&function, vec![Value::date_millis(1000.0), Value::from(500)])
		.await
		.unwrap();
	assert_eq!(result, Value::Date(1500.0));

	let expression = transport.commands_named("Runtime.evaluate")[0].expression().to_string();
	assert!(expression.contains(r#"\"$t\":\"date\""#), "{expression}");
}

#[tokio::test]
async fn test_evaluate_typed_deserializes() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => evaluated(r#"{"title":"Example","links":3}"#),
		other => default_reply(other),
	});
	let session = Session::new(transport, SessionConfig::default());

	#[derive(serde::Deserialize)]
	struct Summary {
		title: String,
		links: u32,
	}

	let function = JsFunction::new("() => ({ title: document.title, links: document.links.length })").unwrap();
	let summary: Summary = session.evaluate_typed(&function, vec![]).await.unwrap();
	assert_eq!(summary.title, "Example");
	assert_eq!(summary.links, 3);
}

#[tokio::test]
async fn test_evaluate_typed_integer_result() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => evaluated("42"),
		other => default_reply(other),
	});
	let session = Session::new(transport, SessionConfig::default());

	let function = JsFunction::new("() => 40 + 2").unwrap();
	let sum: i64 = session.evaluate_typed(&function, vec![]).await.unwrap();
	assert_eq!(sum, 42);
}

#[tokio::test]
async fn test_thrown_error_is_reconstructed() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => Reply::Ok(json!({
			"result": { "type": "string", "value": "ignored" },
			"exceptionDetails": {
				"exceptionId": 1,
				"text": "Uncaught",
				"lineNumber": 4,
				"columnNumber": 7,
				"exception": {
					"type": "string",
					"value": r#"{"$t":"error","name":"Error","message":"boom","stack":"Error: boom\n    at fn"}"#
				}
			}
		})),
		other => default_reply(other),
	});
	let session = Session::new(transport, SessionConfig::default());

	let function = JsFunction::new("() => { throw new Error(\"boom\"); }").unwrap();
	let err = session.evaluate(&function, vec![]).await.unwrap_err();
	assert!(err.to_string().contains("boom"));
	assert_eq!(err.error_name(), Some("Error"));
	assert!(err.stack_trace().unwrap().contains("at fn"));
}

#[tokio::test]
async fn test_evaluate_timeout_is_prompt() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => Reply::Hang,
		other => default_reply(other),
	});
	let session = Session::new(transport, SessionConfig::default());

	let function = JsFunction::new("() => new Promise((resolve) => setTimeout(resolve, 10000))").unwrap();
	let started = Instant::now();
	let err = session
		.evaluate_with(EvaluateOptions::new().timeout(10), &function, vec![])
		.await
		.unwrap_err();

	assert!(err.is_timeout(), "{err:?}");
	assert!(started.elapsed() < Duration::from_millis(100), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_pass_through_params_cannot_override_policy() {
	let transport = FakeTransport::new();
	let session = Session::new(transport.clone(), SessionConfig::default());
	let function = JsFunction::new("() => 1").unwrap();

	let options = EvaluateOptions::new()
		.param("awaitPromise", false)
		.param("returnByValue", true)
		.param("expression", "alert(1)");
	let err = session.evaluate_with(options, &function, vec![]).await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");
	assert!(transport.commands_named("Runtime.evaluate").is_empty());

	session
		.evaluate_with(EvaluateOptions::new().param("includeCommandLineAPI", true), &function, vec![])
		.await
		.unwrap();
	let command = transport.commands_named("Runtime.evaluate").pop().unwrap();
	assert_eq!(command.params["includeCommandLineAPI"], json!(true));
	assert_eq!(command.params["awaitPromise"], json!(true));
	assert_eq!(command.params["returnByValue"], json!(false));
	assert!(command.expression().contains("const fn = (() => 1);"));
}

#[tokio::test]
async fn test_evaluate_requires_attached_transport() {
	let transport = FakeTransport::new();
	let session = Session::new(transport.clone(), SessionConfig::default());
	transport.set_attached(false);

	let function = JsFunction::new("() => 1").unwrap();
	let err = session.evaluate(&function, vec![]).await.unwrap_err();
	assert!(matches!(err, Error::NotAttached { session: None }), "{err:?}");
	assert!(transport.commands_named("Runtime.evaluate").is_empty());
}

#[tokio::test]
async fn test_destroyed_context_fails_in_flight_evaluation() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => Reply::Hang,
		other => default_reply(other),
	});
	let session = Session::new(transport.clone(), SessionConfig::default());
	assert!(session.enable_track_execution_contexts().await.unwrap());

	transport.context_created(7, "main", None);
	let context = session
		.wait_for_execution_context(7, Duration::from_secs(1))
		.await
		.unwrap();

	let function = JsFunction::new("() => new Promise(() => {})").unwrap();
	let pending = tokio::spawn(async move { context.evaluate(&function, vec![]).await });

	transport
		.wait_for_command(|c| c.method == "Runtime.evaluate" && c.params["contextId"] == json!(7))
		.await;
	transport.emit_protocol("Runtime.executionContextDestroyed", json!({ "executionContextId": 7 }), None);

	let result = tokio::time::timeout(Duration::from_secs(1), pending)
		.await
		.expect("evaluation hung after its context was destroyed")
		.unwrap();
	assert!(result.unwrap_err().is_target_gone());
	assert!(session.execution_context(7).is_none());
}

#[tokio::test]
async fn test_stale_context_handle_fails_fast() {
	let transport = FakeTransport::new();
	let session = Session::new(transport.clone(), SessionConfig::default());
	session.enable_track_execution_contexts().await.unwrap();

	transport.context_created(3, "main", None);
	let context = session
		.wait_for_execution_context(3, Duration::from_secs(1))
		.await
		.unwrap();
	transport.emit_protocol("Runtime.executionContextsCleared", json!({}), None);
	settle().await;

	assert!(!context.is_alive());
	let err = context
		.evaluate(&JsFunction::new("() => 1").unwrap(), vec![])
		.await
		.unwrap_err();
	assert!(err.is_target_gone());
}

#[tokio::test]
async fn test_preloaded_codec_is_awaited_not_inlined() {
	let transport = FakeTransport::new();
	let session = Session::attach(transport.clone(), SessionConfig::default().preload_codec(true))
		.await
		.unwrap();

	let added = transport.commands_named("Page.addScriptToEvaluateOnNewDocument");
	assert_eq!(added.len(), 1);
	assert_eq!(added[0].params["runImmediately"], json!(true));

	let function = JsFunction::new("function title() { return document.title; }").unwrap();
	session.evaluate(&function, vec![]).await.unwrap();

	let last = transport.commands_named("Runtime.evaluate").pop().unwrap();
	assert!(last.expression().contains("CodecUnavailableError"));
	assert!(last.expression().contains("while evaluating function 'title'"));
}

#[tokio::test]
async fn test_codec_unavailable_names_function_and_context() {
	let transport = FakeTransport::with_responder(|method, _, _| match method {
		"Runtime.evaluate" => Reply::Ok(json!({
			"result": { "type": "object", "subtype": "error" },
			"exceptionDetails": {
				"exceptionId": 2,
				"text": "Uncaught",
				"lineNumber": 0,
				"columnNumber": 0,
				"exception": {
					"type": "object",
					"subtype": "error",
					"className": "Error",
					"description": "CodecUnavailableError: codec not available\n    at <anonymous>:14:15"
				}
			}
		})),
		other => default_reply(other),
	});
	let session = Session::attach(transport, SessionConfig::default().preload_codec(true).codec_timeout(50))
		.await
		.unwrap();

	let function = JsFunction::new("function load() { return 1; }").unwrap();
	match session.evaluate(&function, vec![]).await.unwrap_err() {
		Error::CodecUnavailable { function, context } => {
			assert_eq!(function, "load");
			assert_eq!(context, "default");
		}
		other => panic!("expected CodecUnavailable, got {other:?}"),
	}
}

#[tokio::test]
async fn test_command_timeout_applies_to_send() {
	let transport = FakeTransport::with_responder(|_, _, _| Reply::Hang);
	let session = Session::new(transport, SessionConfig::default().command_timeout(20));

	let err = session.send("Page.reload", json!({})).await.unwrap_err();
	assert!(err.is_timeout());

	let err = session
		.send_with_timeout("Page.reload", json!({}), Duration::from_millis(5))
		.await
		.unwrap_err();
	assert!(err.is_timeout());
}
