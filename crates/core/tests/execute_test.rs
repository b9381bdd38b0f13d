// Integration tests for collected queries
//
// Tests cover:
// - k-chunk responses for k in {0, 1, many}
// - parameter bindings on the wire
// - server error statuses
// - multiplexing onto a single connection
// - the connection bound under concurrent load
// - authentication and malformed frame isolation

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, delayed_echo, session};
use gremlin::Error;
use gremlin::protocol::{RequestMessage, ResponseMessage, StatusCode};
use gremlin::runtime::test_util::{FakeServer, Reply, chunked_responder, echo_responder};
use serde_json::{Map, json};

#[tokio::test]
async fn test_execute_empty_result() {
	let server = FakeServer::builder().responder(chunked_responder(0)).build();
	let session = session(config(&server));

	let chunks = session.execute("g.V().drop()").await.expect("Failed to execute");

	assert!(chunks.is_empty());
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_execute_single_chunk() {
	let server = FakeServer::new();
	let session = session(config(&server));

	let chunks = session.execute("g.V().count()").await.expect("Failed to execute");

	assert_eq!(chunks.len(), 1);
	assert_eq!(chunks[0].payload, json!(["g.V().count()"]));
	assert_eq!(chunks[0].status_code, StatusCode::SUCCESS);
	assert!(chunks[0].is_final);
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_execute_many_chunks_in_order() {
	let server = FakeServer::builder().responder(chunked_responder(5)).build();
	let session = session(config(&server));

	let chunks = session.execute("g.V()").await.expect("Failed to execute");

	assert_eq!(chunks.len(), 5);
	for (index, chunk) in chunks.iter().enumerate() {
		assert_eq!(chunk.payload, json!(["g.V()", index]));
		assert_eq!(chunk.is_final, index == 4);
	}
	assert_eq!(chunks[0].status_code, StatusCode::PARTIAL_CONTENT);
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_bindings_are_sent() -> anyhow::Result<()> {
	let server = FakeServer::new();
	let session = session(config(&server));

	let mut bindings = Map::new();
	bindings.insert("name".to_string(), json!("marko"));
	session.execute_with_bindings("g.V().has('name', name)", bindings).await?;

	let requests = server.requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].op, "eval");
	assert_eq!(requests[0].args["bindings"], json!({"name": "marko"}));
	assert_eq!(requests[0].args["language"], json!("gremlin-groovy"));
	session.stop().await?;
	Ok(())
}

#[tokio::test]
async fn test_server_error_is_returned() {
	let server = FakeServer::builder()
		.responder(Arc::new(|request: &RequestMessage| {
			vec![Reply::Message(
				ResponseMessage::new(request.request_id, StatusCode::SCRIPT_EVALUATION_ERROR, json!(null))
					.with_message("No such property: nope"),
			)]
		}))
		.build();
	let session = session(config(&server));

	let err = session.execute("g.V().nope()").await.unwrap_err();

	match err {
		Error::Server { code, message } => {
			assert_eq!(code, StatusCode::SCRIPT_EVALUATION_ERROR);
			assert_eq!(message, "No such property: nope");
		}
		other => panic!("unexpected error: {other:?}"),
	}
	assert!(session.is_healthy());
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_single_connection_multiplexes_two_queries() {
	let server = FakeServer::builder()
		.responder(delayed_echo(|script| {
			if script.contains("'A'") { Duration::from_millis(50) } else { Duration::ZERO }
		}))
		.build();
	let session = session(config(&server).with_max_active_connections(1));

	let (a, b) = tokio::join!(session.execute("g.addV('A')"), session.execute("g.addV('B')"));
	let a = a.expect("Failed to execute A");
	let b = b.expect("Failed to execute B");

	assert_eq!(a.len(), 1);
	assert_eq!(b.len(), 1);
	assert_eq!(a[0].payload, json!(["g.addV('A')"]));
	assert_eq!(b[0].payload, json!(["g.addV('B')"]));
	assert_eq!(server.connections_opened(), 1);
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_pool_bound_under_load() {
	let server = FakeServer::builder()
		.responder(delayed_echo(|_| Duration::from_millis(10)))
		.build();
	let session = Arc::new(session(config(&server).with_max_active_connections(3)));

	let mut tasks = Vec::new();
	for i in 0..50 {
		let session = Arc::clone(&session);
		tasks.push(tokio::spawn(async move {
			let script = format!("g.V({i})");
			let chunks = session.execute(&script).await?;
			assert_eq!(chunks[0].payload, json!([script]));
			Ok::<_, Error>(())
		}));
	}
	for task in tasks {
		task.await.expect("Task panicked").expect("Failed to execute");
	}

	assert!(server.peak_connections() <= 3, "peak {}", server.peak_connections());
	assert!(session.stats().pool.connections <= 3);
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_authenticated_session() -> anyhow::Result<()> {
	let server = FakeServer::builder().credentials("/dbs/db/colls/graph", "key").build();
	let session = session(config(&server).with_credentials("/dbs/db/colls/graph", "key"));

	let chunks = session.execute("g.V()").await?;

	assert_eq!(chunks.len(), 1);
	assert_eq!(server.requests()[0].op, "authentication");
	session.stop().await?;
	Ok(())
}

#[tokio::test]
async fn test_rejected_credentials() {
	let server = FakeServer::builder().credentials("/dbs/db/colls/graph", "key").build();
	let session = session(config(&server).with_credentials("/dbs/db/colls/graph", "wrong"));

	let err = session.execute("g.V()").await.unwrap_err();

	assert!(matches!(err, Error::AuthenticationRejected(_)), "got {err:?}");
	assert_eq!(session.stats().pending, 0);
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_unavailable_server_exhausts_pool() {
	let server = FakeServer::new();
	server.set_fail_dial(true);
	let session = session(config(&server));

	let err = session.execute("g.V()").await.unwrap_err();

	assert!(matches!(err, Error::PoolExhausted(_)), "got {err:?}");
	session.stop().await.expect("Failed to stop");
}

#[tokio::test]
async fn test_malformed_frame_fails_only_its_query() {
	let server = FakeServer::builder()
		.responder(Arc::new(|request: &RequestMessage| match request.script() {
			Some("bad") => vec![Reply::Raw(
				format!(r#"{{"requestId":"{}","status":42}}"#, request.request_id).into_bytes(),
			)],
			_ => echo_responder()(request),
		}))
		.build();
	let session = session(config(&server).with_max_active_connections(1));

	let (bad, good) = tokio::join!(session.execute("bad"), session.execute("good"));

	assert!(matches!(bad, Err(Error::ProtocolError(_))), "got {bad:?}");
	assert_eq!(good.expect("Failed to execute")[0].payload, json!(["good"]));
	assert!(session.is_healthy());
	session.stop().await.expect("Failed to stop");
}
