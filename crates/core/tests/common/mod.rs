// Shared helpers for session manager integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gremlin::protocol::{RequestMessage, ResponseMessage, StatusCode};
use gremlin::runtime::test_util::{FakeServer, Reply, Responder};
use gremlin::{SessionConfig, SessionConfigBuilder, SessionManager};
use serde_json::json;

pub const URL: &str = "ws://fake:8182/gremlin";

/// Installs a fmt subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn config(server: &FakeServer) -> SessionConfigBuilder {
	SessionConfig::builder().with_transport_factory(Arc::new(server.clone()))
}

pub fn session(builder: SessionConfigBuilder) -> SessionManager {
	init_tracing();
	SessionManager::new(URL, builder.build().expect("Failed to build config")).expect("Failed to create session")
}

/// Echoes the script back after a per-script delay.
pub fn delayed_echo(delay_for: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Responder {
	Arc::new(move |request: &RequestMessage| {
		let script = request.script().unwrap_or_default().to_string();
		vec![
			Reply::Delay(delay_for(&script)),
			Reply::Message(ResponseMessage::new(request.request_id, StatusCode::SUCCESS, json!([script]))),
		]
	})
}
