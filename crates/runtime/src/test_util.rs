//! Scripted in-memory Gremlin server for tests.
//!
//! [`FakeServer`] implements [`TransportFactory`]: every `open` creates an
//! in-memory transport pair and spawns a task that plays the server side. The
//! reply to each `eval` request comes from a [`Responder`]; keepalive, dialing,
//! reading, and authentication behaviour can be toggled while connections are
//! live.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use gremlin_protocol::{RequestId, RequestMessage, ResponseMessage, StatusCode, ops, sasl_plain, split_request_frame};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::transport::memory::{self, MemoryPeerSender};
use crate::transport::{DialSettings, Frame, TransportFactory, TransportFuture, TransportParts};

/// One step of the server's reply to a request.
#[derive(Debug, Clone)]
pub enum Reply {
	/// Send a response message.
	Message(ResponseMessage),
	/// Send raw bytes as a binary frame.
	Raw(Vec<u8>),
	/// Pause before the next step.
	Delay(Duration),
}

/// Produces the replies to one `eval` request.
pub type Responder = Arc<dyn Fn(&RequestMessage) -> Vec<Reply> + Send + Sync>;

/// Replies with a single `200` chunk whose data is `[script]`.
pub fn echo_responder() -> Responder {
	Arc::new(|request: &RequestMessage| {
		let script = request.script().unwrap_or_default().to_string();
		vec![Reply::Message(ResponseMessage::new(request.request_id, StatusCode::SUCCESS, json!([script])))]
	})
}

/// Replies with `count` chunks (`206` … `200`) carrying `[script, index]`; `count == 0` yields a `204`.
pub fn chunked_responder(count: usize) -> Responder {
	Arc::new(move |request: &RequestMessage| {
		let script = request.script().unwrap_or_default().to_string();
		if count == 0 {
			return vec![Reply::Message(ResponseMessage::new(request.request_id, StatusCode::NO_CONTENT, Value::Null))];
		}
		(0..count)
			.map(|index| {
				let code = if index + 1 == count { StatusCode::SUCCESS } else { StatusCode::PARTIAL_CONTENT };
				Reply::Message(ResponseMessage::new(request.request_id, code, json!([script, index])))
			})
			.collect()
	})
}

/// Never replies.
pub fn silent_responder() -> Responder {
	Arc::new(|_: &RequestMessage| Vec::new())
}

struct ServerState {
	responder: Mutex<Responder>,
	credentials: Option<(String, String)>,
	challenge_evals: AtomicBool,
	answer_pings: AtomicBool,
	reading: AtomicBool,
	resume_reading: Notify,
	fail_dial: AtomicBool,
	handshake_delay: Mutex<Option<Duration>>,
	queue_capacity: usize,
	opened: AtomicUsize,
	live: AtomicUsize,
	peak_live: AtomicUsize,
	peers: Mutex<Vec<MemoryPeerSender>>,
	requests: Mutex<Vec<RequestMessage>>,
	dials: Mutex<Vec<DialSettings>>,
}

/// In-memory stand-in for a Gremlin Server.
#[derive(Clone)]
pub struct FakeServer {
	state: Arc<ServerState>,
}

impl fmt::Debug for FakeServer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakeServer")
			.field("opened", &self.connections_opened())
			.field("live", &self.live_connections())
			.finish()
	}
}

impl Default for FakeServer {
	fn default() -> Self {
		FakeServerBuilder::default().build()
	}
}

impl FakeServer {
	/// A server answering every request with [`echo_responder`].
	pub fn new() -> Self {
		Self::default()
	}

	pub fn builder() -> FakeServerBuilder {
		FakeServerBuilder::default()
	}

	/// Replaces the responder used for subsequent requests.
	pub fn set_responder(&self, responder: Responder) {
		*self.state.responder.lock() = responder;
	}

	/// When set, every `eval` is first answered with a `407` challenge and only
	/// served once the client authenticates under the same request id.
	pub fn set_challenge_evals(&self, challenge: bool) {
		self.state.challenge_evals.store(challenge, Ordering::SeqCst);
	}

	/// Controls whether pings are answered with pongs.
	pub fn set_answer_pings(&self, answer: bool) {
		self.state.answer_pings.store(answer, Ordering::SeqCst);
	}

	/// Stops or resumes reading client frames on every connection.
	///
	/// While stopped, frames queue up to the queue capacity and further
	/// client writes stall.
	pub fn set_reading(&self, reading: bool) {
		self.state.reading.store(reading, Ordering::SeqCst);
		if reading {
			self.state.resume_reading.notify_waiters();
		}
	}

	/// Makes subsequent dials fail with a transport error.
	pub fn set_fail_dial(&self, fail: bool) {
		self.state.fail_dial.store(fail, Ordering::SeqCst);
	}

	/// Delays every subsequent dial.
	pub fn set_handshake_delay(&self, delay: Option<Duration>) {
		*self.state.handshake_delay.lock() = delay;
	}

	/// Injects a stream-level error into every live connection.
	pub fn break_connections(&self) {
		for peer in self.state.peers.lock().drain(..) {
			peer.send_error(Error::Transport("connection reset by fake server".to_string()));
		}
	}

	/// Sends a frame to every live connection.
	pub fn broadcast(&self, frame: Frame) {
		for peer in self.state.peers.lock().iter() {
			peer.send(frame.clone());
		}
	}

	/// Every request received so far, authentication included.
	pub fn requests(&self) -> Vec<RequestMessage> {
		self.state.requests.lock().clone()
	}

	/// Scripts of the `eval` requests received so far.
	pub fn scripts(&self) -> Vec<String> {
		self.state
			.requests
			.lock()
			.iter()
			.filter_map(|r| r.script().map(str::to_string))
			.collect()
	}

	/// Settings passed to every dial attempt so far.
	pub fn dials(&self) -> Vec<DialSettings> {
		self.state.dials.lock().clone()
	}

	pub fn connections_opened(&self) -> usize {
		self.state.opened.load(Ordering::SeqCst)
	}

	pub fn live_connections(&self) -> usize {
		self.state.live.load(Ordering::SeqCst)
	}

	/// Highest number of simultaneously live connections observed.
	pub fn peak_connections(&self) -> usize {
		self.state.peak_live.load(Ordering::SeqCst)
	}
}

impl TransportFactory for FakeServer {
	fn open<'a>(&'a self, settings: &'a DialSettings) -> TransportFuture<'a, Result<TransportParts>> {
		Box::pin(async move {
			self.state.dials.lock().push(settings.clone());
			let delay = *self.state.handshake_delay.lock();
			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}
			if self.state.fail_dial.load(Ordering::SeqCst) {
				return Err(Error::Transport("connection refused".to_string()));
			}

			let (parts, peer) = memory::pair(self.state.queue_capacity);
			let (peer_tx, peer_rx) = peer.split();
			self.state.peers.lock().push(peer_tx.clone());

			self.state.opened.fetch_add(1, Ordering::SeqCst);
			let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
			self.state.peak_live.fetch_max(live, Ordering::SeqCst);

			tokio::spawn(serve(Arc::clone(&self.state), peer_tx, peer_rx));
			Ok(parts)
		})
	}
}

/// Builder for [`FakeServer`].
pub struct FakeServerBuilder {
	responder: Responder,
	credentials: Option<(String, String)>,
	challenge_evals: bool,
	queue_capacity: usize,
}

impl Default for FakeServerBuilder {
	fn default() -> Self {
		Self {
			responder: echo_responder(),
			credentials: None,
			challenge_evals: false,
			queue_capacity: 64,
		}
	}
}

impl FakeServerBuilder {
	pub fn responder(mut self, responder: Responder) -> Self {
		self.responder = responder;
		self
	}

	/// Requires SASL PLAIN authentication with these credentials.
	pub fn credentials(mut self, username: &str, password: &str) -> Self {
		self.credentials = Some((username.to_string(), password.to_string()));
		self
	}

	/// See [`FakeServer::set_challenge_evals`].
	pub fn challenge_evals(mut self) -> Self {
		self.challenge_evals = true;
		self
	}

	/// Bounds how many frames a client may write before the server reads them.
	pub fn queue_capacity(mut self, capacity: usize) -> Self {
		self.queue_capacity = capacity;
		self
	}

	pub fn build(self) -> FakeServer {
		FakeServer {
			state: Arc::new(ServerState {
				responder: Mutex::new(self.responder),
				credentials: self.credentials,
				challenge_evals: AtomicBool::new(self.challenge_evals),
				answer_pings: AtomicBool::new(true),
				reading: AtomicBool::new(true),
				resume_reading: Notify::new(),
				fail_dial: AtomicBool::new(false),
				handshake_delay: Mutex::new(None),
				queue_capacity: self.queue_capacity,
				opened: AtomicUsize::new(0),
				live: AtomicUsize::new(0),
				peak_live: AtomicUsize::new(0),
				peers: Mutex::new(Vec::new()),
				requests: Mutex::new(Vec::new()),
				dials: Mutex::new(Vec::new()),
			}),
		}
	}
}

async fn serve(state: Arc<ServerState>, tx: MemoryPeerSender, mut rx: tokio::sync::mpsc::Receiver<Frame>) {
	let mut authenticated = state.credentials.is_none();
	let mut challenged: HashMap<RequestId, RequestMessage> = HashMap::new();

	loop {
		wait_for_reading(&state).await;
		let Some(frame) = rx.recv().await else {
			break;
		};
		let bytes = match frame {
			Frame::Binary(bytes) => bytes,
			Frame::Text(text) => text.into_bytes(),
			Frame::Ping(payload) => {
				if state.answer_pings.load(Ordering::SeqCst) {
					tx.send(Frame::Pong(payload));
				}
				continue;
			}
			Frame::Pong(_) => continue,
			Frame::Close => {
				tx.send(Frame::Close);
				break;
			}
		};

		let Some(request) = split_request_frame(&bytes).and_then(|(_, body)| serde_json::from_slice::<RequestMessage>(body).ok())
		else {
			continue;
		};
		state.requests.lock().push(request.clone());

		if request.op == ops::AUTHENTICATION {
			let accepted = state
				.credentials
				.as_ref()
				.is_some_and(|(user, pass)| request.args.get("sasl").and_then(Value::as_str) == Some(sasl_plain(user, pass).as_str()));
			if !accepted {
				let reply = ResponseMessage::new(request.request_id, StatusCode::UNAUTHORIZED, Value::Null).with_message("invalid credentials");
				send_message(&tx, &reply);
				continue;
			}
			authenticated = true;
			match challenged.remove(&request.request_id) {
				Some(original) => respond(&state, &tx, original),
				None => {
					send_message(&tx, &ResponseMessage::new(request.request_id, StatusCode::NO_CONTENT, Value::Null));
				}
			}
			continue;
		}

		if state.challenge_evals.load(Ordering::SeqCst) {
			send_message(&tx, &ResponseMessage::new(request.request_id, StatusCode::AUTHENTICATE, Value::Null));
			challenged.insert(request.request_id, request);
			continue;
		}

		if !authenticated {
			let reply = ResponseMessage::new(request.request_id, StatusCode::UNAUTHORIZED, Value::Null).with_message("authentication required");
			send_message(&tx, &reply);
			continue;
		}

		respond(&state, &tx, request);
	}

	state.live.fetch_sub(1, Ordering::SeqCst);
}

async fn wait_for_reading(state: &ServerState) {
	loop {
		let resumed = state.resume_reading.notified();
		if state.reading.load(Ordering::SeqCst) {
			return;
		}
		resumed.await;
	}
}

fn respond(state: &Arc<ServerState>, tx: &MemoryPeerSender, request: RequestMessage) {
	let responder = state.responder.lock().clone();
	let replies = responder(&request);
	let tx = tx.clone();
	tokio::spawn(async move {
		for reply in replies {
			match reply {
				Reply::Message(message) => {
					send_message(&tx, &message);
				}
				Reply::Raw(bytes) => {
					tx.send(Frame::Binary(bytes));
				}
				Reply::Delay(delay) => tokio::time::sleep(delay).await,
			}
		}
	});
}

fn send_message(tx: &MemoryPeerSender, message: &ResponseMessage) -> bool {
	match serde_json::to_vec(message) {
		Ok(bytes) => tx.send(Frame::Binary(bytes)),
		Err(_) => false,
	}
}
