//! Transport connection: one persistent duplex stream to the server.
//!
//! A connection is opened by the pool, authenticates if credentials are
//! configured, and then runs three tasks until it closes or fails:
//!
//! - **writer**: the only mutator of the outbound stream; drains a FIFO queue
//!   of frames and acknowledges each write to its sender
//! - **reader**: decodes inbound frames and resolves them in the [`Registry`]
//! - **keepalive**: pings every interval and fails the connection when a whole
//!   interval passes without inbound traffic
//!
//! # State machine
//!
//! ```text
//! Connecting ─► Authenticating ─► Ready ─► Draining ─► Closed
//!      │              │             │
//!      └──────────────┴─────────────┴────► Failed
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gremlin_protocol::{Codec, RequestId, RequestMessage, StatusCode};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::chunk::ResponseChunk;
use crate::config::{Credentials, SessionConfig};
use crate::error::{Error, Result};
use crate::registry::{Registry, Resolution};
use crate::transport::{DialSettings, Frame, TransportParts, TransportReceiver, TransportSender};

/// Identifier of a connection within its pool.
pub type ConnectionId = u64;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Connecting,
	Authenticating,
	Ready,
	Draining,
	Closed,
	Failed,
}

impl ConnectionState {
	/// Returns true for states a connection never leaves.
	pub fn is_terminal(self) -> bool {
		matches!(self, ConnectionState::Closed | ConnectionState::Failed)
	}
}

/// Callback invoked exactly once when a connection fails.
pub type FailureHook = Arc<dyn Fn(&Arc<Connection>, &Error) + Send + Sync>;

/// A frame queued for the writer, optionally acknowledged once written.
struct Outbound {
	frame: Frame,
	ack: Option<oneshot::Sender<Result<()>>>,
}

/// One persistent connection shared by any number of concurrent requests.
pub struct Connection {
	id: ConnectionId,
	state: Mutex<ConnectionState>,
	/// Last request traffic (sends and response chunks); drives idle eviction.
	last_activity: Mutex<Instant>,
	/// Last inbound frame of any kind; drives keepalive health.
	last_seen: Mutex<Instant>,
	in_flight: Mutex<HashSet<RequestId>>,
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	config: Arc<SessionConfig>,
	registry: Arc<Registry>,
	on_failure: FailureHook,
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("id", &self.id)
			.field("state", &self.state())
			.field("in_flight", &self.in_flight_count())
			.finish()
	}
}

impl Connection {
	/// Dials, authenticates, and starts the connection's tasks.
	///
	/// Dialing and authentication together are bounded by the handshake
	/// timeout. The returned connection is `Ready`.
	pub async fn open(
		id: ConnectionId,
		settings: DialSettings,
		config: Arc<SessionConfig>,
		registry: Arc<Registry>,
		on_failure: FailureHook,
	) -> Result<Arc<Self>> {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let now = Instant::now();
		let conn = Arc::new(Self {
			id,
			state: Mutex::new(ConnectionState::Connecting),
			last_activity: Mutex::new(now),
			last_seen: Mutex::new(now),
			in_flight: Mutex::new(HashSet::new()),
			outbound_tx,
			outbound_rx: Mutex::new(Some(outbound_rx)),
			tasks: Mutex::new(Vec::new()),
			config,
			registry,
			on_failure,
		});

		tracing::debug!(conn = id, url = %settings.url, "Opening connection");

		let handshake_timeout = conn.config.handshake_timeout();
		let parts = match tokio::time::timeout(handshake_timeout, conn.handshake(&settings)).await {
			Ok(Ok(parts)) => parts,
			Ok(Err(e)) => {
				conn.set_state(ConnectionState::Failed);
				return Err(e);
			}
			Err(_) => {
				conn.set_state(ConnectionState::Failed);
				return Err(Error::HandshakeTimeout(handshake_timeout));
			}
		};

		conn.start(parts);
		tracing::info!(conn = id, "Connection ready");
		Ok(conn)
	}

	async fn handshake(&self, settings: &DialSettings) -> Result<TransportParts> {
		let mut parts = self.config.transport_factory().open(settings).await?;

		if let Some(credentials) = self.config.credentials() {
			self.set_state(ConnectionState::Authenticating);
			authenticate(&mut parts, self.config.codec().as_ref(), credentials).await?;
			tracing::debug!(conn = self.id, "Authenticated");
		}

		Ok(parts)
	}

	fn start(self: &Arc<Self>, parts: TransportParts) {
		let TransportParts { sender, receiver } = parts;
		let Some(outbound_rx) = self.outbound_rx.lock().take() else {
			return;
		};

		*self.last_seen.lock() = Instant::now();
		self.set_state(ConnectionState::Ready);

		let writer = tokio::spawn(Arc::clone(self).write_loop(sender, outbound_rx));
		let reader = tokio::spawn(Arc::clone(self).read_loop(receiver));
		let keepalive = tokio::spawn(Arc::clone(self).keepalive_loop());
		self.tasks.lock().extend([writer, reader, keepalive]);
	}

	pub fn id(&self) -> ConnectionId {
		self.id
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.lock()
	}

	pub fn is_ready(&self) -> bool {
		self.state() == ConnectionState::Ready
	}

	/// Number of requests currently assigned to this connection.
	pub fn in_flight_count(&self) -> usize {
		self.in_flight.lock().len()
	}

	/// Time since the last request traffic.
	pub fn idle_for(&self) -> Duration {
		self.last_activity.lock().elapsed()
	}

	pub(crate) fn touch_activity(&self) {
		*self.last_activity.lock() = Instant::now();
	}

	fn last_seen(&self) -> Instant {
		*self.last_seen.lock()
	}

	fn set_state(&self, state: ConnectionState) {
		*self.state.lock() = state;
	}

	/// Writes an encoded request and waits for the writer to flush it.
	///
	/// The request id is assigned to this connection until [`release`](Self::release)
	/// or until the connection fails. If the write fails, or the returned future
	/// is dropped before the writer acknowledges it, the id is released here.
	pub async fn send(&self, request_id: RequestId, encoded: Vec<u8>) -> Result<()> {
		if !self.is_ready() {
			return Err(Error::ConnectionClosed);
		}

		self.in_flight.lock().insert(request_id);
		self.touch_activity();
		let assignment = Assignment {
			conn: self,
			request_id,
			committed: false,
		};

		let result = self.write_acked(Frame::Binary(encoded)).await;
		match &result {
			Ok(()) => assignment.commit(),
			Err(e) => tracing::debug!(conn = self.id, %request_id, error = %e, "Send failed"),
		}
		result
	}

	/// Unassigns a request from this connection.
	pub fn release(&self, request_id: RequestId) {
		self.in_flight.lock().remove(&request_id);
	}

	async fn write_acked(&self, frame: Frame) -> Result<()> {
		let deadline = self.config.write_deadline();
		let (ack_tx, ack_rx) = oneshot::channel();
		self.outbound_tx
			.send(Outbound {
				frame,
				ack: Some(ack_tx),
			})
			.map_err(|_| Error::ConnectionClosed)?;

		match tokio::time::timeout(deadline, ack_rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::ConnectionClosed),
			Err(_) => Err(Error::WriteTimeout(deadline)),
		}
	}

	fn enqueue(&self, frame: Frame) {
		if self.outbound_tx.send(Outbound { frame, ack: None }).is_err() {
			tracing::debug!(conn = self.id, "Writer gone, frame discarded");
		}
	}

	/// Drains the connection: flushes queued writes, sends a close frame, and
	/// stops the tasks. Bounded by the write deadline; idempotent.
	pub async fn close(self: &Arc<Self>) -> Result<()> {
		{
			let mut state = self.state.lock();
			match *state {
				ConnectionState::Ready => *state = ConnectionState::Draining,
				ConnectionState::Connecting | ConnectionState::Authenticating => {
					*state = ConnectionState::Closed;
					return Ok(());
				}
				ConnectionState::Draining | ConnectionState::Closed | ConnectionState::Failed => return Ok(()),
			}
		}

		tracing::info!(conn = self.id, in_flight = self.in_flight_count(), "Closing connection");
		let result = self.write_acked(Frame::Close).await;
		self.finish_close();
		result
	}

	/// Stops the connection immediately without flushing.
	pub fn force_close(&self) {
		tracing::debug!(conn = self.id, "Force closing connection");
		self.finish_close();
	}

	fn finish_close(&self) {
		{
			let mut state = self.state.lock();
			if *state != ConnectionState::Failed {
				*state = ConnectionState::Closed;
			}
		}
		self.abort_tasks();

		for request_id in self.take_in_flight() {
			self.registry
				.fail(request_id, Error::ConnectionLost(format!("connection {} closed", self.id)));
		}
	}

	/// Marks the connection failed and notifies its owner. Only the first call has any effect.
	pub fn fail(self: &Arc<Self>, error: Error) {
		{
			let mut state = self.state.lock();
			if state.is_terminal() {
				return;
			}
			*state = ConnectionState::Failed;
		}

		tracing::warn!(conn = self.id, %error, in_flight = self.in_flight_count(), "Connection failed");
		self.abort_tasks();
		(self.on_failure)(self, &error);
	}

	/// Removes and returns every request assigned to this connection.
	pub fn take_in_flight(&self) -> Vec<RequestId> {
		self.in_flight.lock().drain().collect()
	}

	fn abort_tasks(&self) {
		for handle in self.tasks.lock().drain(..) {
			handle.abort();
		}
	}

	async fn write_loop(self: Arc<Self>, mut sender: Box<dyn TransportSender>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
		let deadline = self.config.write_deadline();

		while let Some(Outbound { frame, ack }) = rx.recv().await {
			let closing = frame == Frame::Close;
			let write = async {
				if closing { sender.close().await } else { sender.send(frame).await }
			};
			let result = match tokio::time::timeout(deadline, write).await {
				Ok(result) => result,
				Err(_) => Err(Error::WriteTimeout(deadline)),
			};

			match result {
				Ok(()) => {
					if let Some(ack) = ack {
						let _ = ack.send(Ok(()));
					}
					if closing {
						break;
					}
				}
				Err(e) => {
					let reason = format!("write failed: {e}");
					if let Some(ack) = ack {
						let _ = ack.send(Err(e));
					}
					if !closing {
						self.fail(Error::ConnectionLost(reason));
					}
					break;
				}
			}
		}

		tracing::debug!(conn = self.id, "Writer stopped");
	}

	async fn read_loop(self: Arc<Self>, mut receiver: Box<dyn TransportReceiver>) {
		let deadline = self.config.read_deadline();

		loop {
			let next = match tokio::time::timeout(deadline, receiver.recv()).await {
				Ok(next) => next,
				Err(_) => {
					self.fail(Error::ReadTimeout(deadline));
					return;
				}
			};

			let frame = match next {
				Some(Ok(frame)) => frame,
				Some(Err(e)) => {
					self.fail(e);
					return;
				}
				None => {
					self.fail(Error::ConnectionLost("stream ended".to_string()));
					return;
				}
			};

			*self.last_seen.lock() = Instant::now();

			match frame {
				Frame::Binary(bytes) => self.handle_data(&bytes),
				Frame::Text(text) => self.handle_data(text.as_bytes()),
				Frame::Ping(payload) => self.enqueue(Frame::Pong(payload)),
				Frame::Pong(_) => tracing::trace!(conn = self.id, "Pong received"),
				Frame::Close => {
					if self.state() != ConnectionState::Draining {
						self.fail(Error::ConnectionLost("closed by server".to_string()));
					}
					return;
				}
			}
		}
	}

	fn handle_data(&self, data: &[u8]) {
		let codec = self.config.codec();
		let message = match codec.decode(data) {
			Ok(message) => message,
			Err(e) => {
				match e.request_id() {
					Some(request_id) => {
						self.registry.fail(request_id, Error::ProtocolError(e.to_string()));
						self.release(request_id);
					}
					None => tracing::warn!(conn = self.id, error = %e, "Dropping undecodable frame"),
				}
				return;
			}
		};

		let Some(request_id) = message.request_id else {
			tracing::warn!(conn = self.id, status = %message.code(), status_message = %message.status.message, "Response without request id");
			return;
		};

		if message.code().is_auth_challenge() {
			self.answer_challenge(request_id);
			return;
		}

		self.touch_activity();
		let chunk = ResponseChunk::from_message(request_id, message);
		tracing::debug!(conn = self.id, %request_id, status = %chunk.status_code, is_final = chunk.is_final, "Chunk received");

		match self.registry.resolve(chunk) {
			Resolution::Delivered => {}
			Resolution::Completed | Resolution::Dropped => self.release(request_id),
		}
	}

	/// Answers a mid-session SASL challenge for `request_id`.
	fn answer_challenge(&self, request_id: RequestId) {
		let Some(credentials) = self.config.credentials() else {
			self.registry.fail(
				request_id,
				Error::AuthenticationRejected("server requested authentication but no credentials are configured".to_string()),
			);
			self.release(request_id);
			return;
		};

		tracing::debug!(conn = self.id, %request_id, "Answering authentication challenge");
		let request = RequestMessage::authentication(request_id, &credentials.username, &credentials.password);
		match self.config.codec().encode(&request) {
			Ok(encoded) => self.enqueue(Frame::Binary(encoded)),
			Err(e) => {
				self.registry.fail(request_id, Error::Codec(e));
				self.release(request_id);
			}
		}
	}

	async fn keepalive_loop(self: Arc<Self>) {
		let interval = self.config.ping_interval();
		let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut ping_sent_at: Option<Instant> = None;

		loop {
			ticker.tick().await;
			if !self.is_ready() {
				return;
			}

			let unanswered = ping_sent_at.is_some_and(|sent| self.last_seen() < sent);
			if unanswered {
				self.fail(Error::ConnectionLost(format!("no traffic within keepalive interval {interval:?}")));
				return;
			}

			self.enqueue(Frame::Ping(Vec::new()));
			ping_sent_at = Some(Instant::now());
		}
	}
}

/// A request id assigned to a connection while its write is outstanding.
struct Assignment<'a> {
	conn: &'a Connection,
	request_id: RequestId,
	committed: bool,
}

impl Assignment<'_> {
	fn commit(mut self) {
		self.committed = true;
	}
}

impl Drop for Assignment<'_> {
	fn drop(&mut self) {
		if !self.committed {
			self.conn.release(self.request_id);
		}
	}
}

/// Performs the SASL PLAIN handshake on a freshly dialed transport.
///
/// The server may accept the credentials directly or first answer with a
/// `407` challenge, which is answered once under the same request id.
async fn authenticate(parts: &mut TransportParts, codec: &dyn Codec, credentials: &Credentials) -> Result<()> {
	let request_id = Uuid::new_v4();
	let request = RequestMessage::authentication(request_id, &credentials.username, &credentials.password);
	let encoded = codec.encode(&request)?;
	parts.sender.send(Frame::Binary(encoded.clone())).await?;

	let mut challenged = false;
	loop {
		let frame = match parts.receiver.recv().await {
			Some(Ok(frame)) => frame,
			Some(Err(e)) => return Err(e),
			None => return Err(Error::ConnectionLost("stream ended during authentication".to_string())),
		};

		let data = match &frame {
			Frame::Close => return Err(Error::ConnectionLost("closed during authentication".to_string())),
			Frame::Ping(payload) => {
				parts.sender.send(Frame::Pong(payload.clone())).await?;
				continue;
			}
			Frame::Pong(_) => continue,
			Frame::Binary(_) | Frame::Text(_) => frame.data().unwrap_or_default(),
		};

		let response = codec.decode(data).map_err(|e| Error::ProtocolError(e.to_string()))?;
		if response.request_id != Some(request_id) {
			tracing::debug!(request_id = ?response.request_id, "Ignoring unrelated frame during authentication");
			continue;
		}

		match response.code() {
			code if code.is_success() => return Ok(()),
			StatusCode::AUTHENTICATE if !challenged => {
				challenged = true;
				parts.sender.send(Frame::Binary(encoded.clone())).await?;
			}
			code => {
				return Err(Error::AuthenticationRejected(format!("{code}: {}", response.status.message)));
			}
		}
	}
}
