//! Request registry: correlates response chunks with their waiting callers.
//!
//! Every in-flight request owns one entry keyed by its request id. An entry
//! leaves the map exactly once, through [`Registry::resolve`] (final chunk),
//! [`Registry::fail`], or [`Registry::cancel`]; removal from the map is the
//! commit point and the sink is taken under the entry's own lock, so a chunk
//! racing a failure can never be delivered after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use gremlin_protocol::RequestId;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use crate::chunk::ResponseChunk;
use crate::error::{Error, Result};

/// Channel half that receives streamed chunks.
pub type ChunkSender = mpsc::UnboundedSender<Result<ResponseChunk>>;

/// Receiver for a collected response.
pub type CollectReceiver = oneshot::Receiver<Result<Vec<ResponseChunk>>>;

/// How chunks reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
	/// Accumulate chunks and release them together on the final chunk.
	Collect,
	/// Forward each chunk as it arrives.
	Stream,
}

/// Destination of a request's chunks.
pub enum ResultSink {
	Collect {
		chunks: Vec<ResponseChunk>,
		waiter: oneshot::Sender<Result<Vec<ResponseChunk>>>,
	},
	Stream(ChunkSender),
}

impl ResultSink {
	/// Creates an accumulating sink and the receiver its caller awaits.
	pub fn collect() -> (Self, CollectReceiver) {
		let (waiter, rx) = oneshot::channel();
		(
			ResultSink::Collect {
				chunks: Vec::new(),
				waiter,
			},
			rx,
		)
	}

	/// Creates a sink forwarding onto a caller-supplied channel.
	pub fn stream(tx: ChunkSender) -> Self {
		ResultSink::Stream(tx)
	}

	pub fn mode(&self) -> DeliveryMode {
		match self {
			ResultSink::Collect { .. } => DeliveryMode::Collect,
			ResultSink::Stream(_) => DeliveryMode::Stream,
		}
	}

	fn push(&mut self, chunk: ResponseChunk) {
		match self {
			ResultSink::Collect { chunks, .. } => chunks.push(chunk),
			ResultSink::Stream(tx) => {
				if tx.send(Ok(chunk)).is_err() {
					tracing::debug!("Stream receiver dropped, chunk discarded");
				}
			}
		}
	}

	fn finish(self, chunk: ResponseChunk) {
		match self {
			ResultSink::Collect { mut chunks, waiter } => {
				if !chunk.is_no_content() {
					chunks.push(chunk);
				}
				let _ = waiter.send(Ok(chunks));
			}
			ResultSink::Stream(tx) => {
				let _ = tx.send(Ok(chunk));
			}
		}
	}

	fn fail(self, error: Error) {
		match self {
			ResultSink::Collect { waiter, .. } => {
				let _ = waiter.send(Err(error));
			}
			ResultSink::Stream(tx) => {
				let _ = tx.send(Err(error));
			}
		}
	}
}

/// Outcome of routing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	/// A non-final chunk was appended or forwarded.
	Delivered,
	/// The request reached a terminal state and its entry was removed.
	Completed,
	/// No entry exists; the chunk arrived after cancellation, timeout, or failure.
	Dropped,
}

struct Pending {
	sink: Option<ResultSink>,
}

/// Concurrency-safe map from request id to pending waiter.
#[derive(Default)]
pub struct Registry {
	pending: DashMap<RequestId, Arc<Mutex<Pending>>>,
	closed: RwLock<bool>,
	dropped: AtomicU64,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a pending request.
	///
	/// Fails with [`Error::DuplicateRequestId`] if the id is already in flight
	/// and with [`Error::ManagerStopped`] once the registry is closed.
	pub fn register(&self, request_id: RequestId, sink: ResultSink) -> Result<()> {
		let closed = self.closed.read();
		if *closed {
			return Err(Error::ManagerStopped);
		}
		match self.pending.entry(request_id) {
			MapEntry::Occupied(_) => Err(Error::DuplicateRequestId(request_id)),
			MapEntry::Vacant(slot) => {
				tracing::debug!(%request_id, mode = ?sink.mode(), "Registered request");
				slot.insert(Arc::new(Mutex::new(Pending { sink: Some(sink) })));
				Ok(())
			}
		}
	}

	/// Routes a chunk to its waiter.
	///
	/// Error statuses terminate the request with [`Error::Server`].
	pub fn resolve(&self, chunk: ResponseChunk) -> Resolution {
		let request_id = chunk.request_id;

		if !chunk.status_code.is_success() {
			let error = Error::Server {
				code: chunk.status_code,
				message: chunk.status_message,
			};
			return if self.fail(request_id, error) {
				Resolution::Completed
			} else {
				self.record_drop(request_id)
			};
		}

		if chunk.is_final {
			let Some((_, entry)) = self.pending.remove(&request_id) else {
				return self.record_drop(request_id);
			};
			let sink = entry.lock().sink.take();
			return match sink {
				Some(sink) => {
					sink.finish(chunk);
					Resolution::Completed
				}
				None => self.record_drop(request_id),
			};
		}

		let Some(entry) = self.pending.get(&request_id).map(|e| Arc::clone(e.value())) else {
			return self.record_drop(request_id);
		};
		let mut pending = entry.lock();
		match pending.sink.as_mut() {
			Some(sink) => {
				sink.push(chunk);
				Resolution::Delivered
			}
			None => self.record_drop(request_id),
		}
	}

	/// Terminates a request with an error. Returns `false` if it was not pending.
	pub fn fail(&self, request_id: RequestId, error: Error) -> bool {
		match self.take_sink(request_id) {
			Some(sink) => {
				tracing::debug!(%request_id, %error, "Request failed");
				sink.fail(error);
				true
			}
			None => false,
		}
	}

	/// Removes a request without delivering anything. Returns `false` if it was not pending.
	pub fn cancel(&self, request_id: RequestId) -> bool {
		let cancelled = self.take_sink(request_id).is_some();
		if cancelled {
			tracing::debug!(%request_id, "Request cancelled");
		}
		cancelled
	}

	/// Rejects all future registrations with [`Error::ManagerStopped`].
	pub fn close(&self) {
		*self.closed.write() = true;
	}

	pub fn is_closed(&self) -> bool {
		*self.closed.read()
	}

	/// Fails every pending request, building one error per request.
	pub fn fail_all(&self, mut error: impl FnMut() -> Error) -> usize {
		let ids: Vec<RequestId> = self.pending.iter().map(|e| *e.key()).collect();
		ids.into_iter().filter(|id| self.fail(*id, error())).count()
	}

	pub fn contains(&self, request_id: &RequestId) -> bool {
		self.pending.contains_key(request_id)
	}

	/// Number of pending requests.
	pub fn len(&self) -> usize {
		self.pending.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Number of chunks that arrived for requests no longer pending.
	pub fn dropped_chunks(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	fn take_sink(&self, request_id: RequestId) -> Option<ResultSink> {
		let (_, entry) = self.pending.remove(&request_id)?;
		entry.lock().sink.take()
	}

	fn record_drop(&self, request_id: RequestId) -> Resolution {
		self.dropped.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(%request_id, "Dropped chunk for request that is no longer pending");
		Resolution::Dropped
	}
}

#[cfg(test)]
mod tests {
	use gremlin_protocol::StatusCode;
	use serde_json::{Map, Value, json};
	use uuid::Uuid;

	use super::*;

	fn chunk(request_id: RequestId, code: StatusCode, payload: Value) -> ResponseChunk {
		ResponseChunk {
			request_id,
			status_code: code,
			status_message: String::new(),
			payload,
			meta: Map::new(),
			is_final: code.is_final(),
		}
	}

	#[tokio::test]
	async fn test_collect_releases_chunks_in_order_on_final() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		let (sink, rx) = ResultSink::collect();
		registry.register(id, sink).unwrap();

		assert_eq!(registry.resolve(chunk(id, StatusCode::PARTIAL_CONTENT, json!(1))), Resolution::Delivered);
		assert_eq!(registry.resolve(chunk(id, StatusCode::PARTIAL_CONTENT, json!(2))), Resolution::Delivered);
		assert_eq!(registry.resolve(chunk(id, StatusCode::SUCCESS, json!(3))), Resolution::Completed);

		let chunks = rx.await.unwrap().unwrap();
		let payloads: Vec<_> = chunks.iter().map(|c| c.payload.clone()).collect();
		assert_eq!(payloads, vec![json!(1), json!(2), json!(3)]);
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn test_collect_no_content_yields_empty_result() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		let (sink, rx) = ResultSink::collect();
		registry.register(id, sink).unwrap();

		registry.resolve(chunk(id, StatusCode::NO_CONTENT, Value::Null));

		assert!(rx.await.unwrap().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_stream_forwards_each_chunk_and_closes_channel() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		let (tx, mut rx) = mpsc::unbounded_channel();
		registry.register(id, ResultSink::stream(tx)).unwrap();

		registry.resolve(chunk(id, StatusCode::PARTIAL_CONTENT, json!("a")));
		assert_eq!(rx.recv().await.unwrap().unwrap().payload, json!("a"));

		registry.resolve(chunk(id, StatusCode::SUCCESS, json!("b")));
		let last = rx.recv().await.unwrap().unwrap();
		assert!(last.is_final);
		assert!(rx.recv().await.is_none(), "channel closes after the final chunk");
	}

	#[test]
	fn test_duplicate_request_id_rejected() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		registry.register(id, ResultSink::collect().0).unwrap();

		let err = registry.register(id, ResultSink::collect().0).unwrap_err();
		assert!(matches!(err, Error::DuplicateRequestId(dup) if dup == id));
	}

	#[test]
	fn test_unknown_chunk_is_dropped_and_counted() {
		let registry = Registry::new();
		let resolution = registry.resolve(chunk(Uuid::new_v4(), StatusCode::SUCCESS, Value::Null));

		assert_eq!(resolution, Resolution::Dropped);
		assert_eq!(registry.dropped_chunks(), 1);
	}

	#[tokio::test]
	async fn test_cancel_drops_late_chunks() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		let (sink, rx) = ResultSink::collect();
		registry.register(id, sink).unwrap();

		assert!(registry.cancel(id));
		assert!(!registry.cancel(id));
		assert_eq!(registry.resolve(chunk(id, StatusCode::SUCCESS, json!(1))), Resolution::Dropped);
		assert!(rx.await.is_err(), "waiter is released without a value");
	}

	#[tokio::test]
	async fn test_fail_delivers_error_once() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		let (sink, rx) = ResultSink::collect();
		registry.register(id, sink).unwrap();

		assert!(registry.fail(id, Error::ConnectionLost("test".into())));
		assert!(!registry.fail(id, Error::ConnectionLost("again".into())));

		let err = rx.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::ConnectionLost(msg) if msg == "test"));
	}

	#[tokio::test]
	async fn test_error_status_fails_request() {
		let registry = Registry::new();
		let id = Uuid::new_v4();
		let (sink, rx) = ResultSink::collect();
		registry.register(id, sink).unwrap();

		let mut bad = chunk(id, StatusCode::SCRIPT_EVALUATION_ERROR, Value::Null);
		bad.status_message = "No such property: foo".to_string();
		assert_eq!(registry.resolve(bad), Resolution::Completed);

		let err = rx.await.unwrap().unwrap_err();
		assert_eq!(err.status_code(), Some(StatusCode::SCRIPT_EVALUATION_ERROR));
		assert!(err.to_string().contains("No such property"));
	}

	#[test]
	fn test_closed_registry_rejects_registration() {
		let registry = Registry::new();
		registry.close();

		let err = registry.register(Uuid::new_v4(), ResultSink::collect().0).unwrap_err();
		assert!(matches!(err, Error::ManagerStopped));
	}

	#[tokio::test]
	async fn test_fail_all_reaches_every_mode() {
		let registry = Registry::new();
		let (collect_sink, collect_rx) = ResultSink::collect();
		let (tx, mut stream_rx) = mpsc::unbounded_channel();
		registry.register(Uuid::new_v4(), collect_sink).unwrap();
		registry.register(Uuid::new_v4(), ResultSink::stream(tx)).unwrap();

		assert_eq!(registry.fail_all(|| Error::ManagerStopped), 2);

		assert!(matches!(collect_rx.await.unwrap(), Err(Error::ManagerStopped)));
		assert!(matches!(stream_rx.recv().await, Some(Err(Error::ManagerStopped))));
		assert!(stream_rx.recv().await.is_none());
		assert!(registry.is_empty());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_terminal_operations_resolve_once() {
		let registry = Arc::new(Registry::new());

		for round in 0..200 {
			let id = Uuid::new_v4();
			let (sink, rx) = ResultSink::collect();
			registry.register(id, sink).unwrap();

			let mut handles = Vec::new();
			for worker in 0..4 {
				let registry = Arc::clone(&registry);
				handles.push(tokio::spawn(async move {
					match (round + worker) % 4 {
						0 => registry.resolve(chunk(id, StatusCode::SUCCESS, json!(worker))) == Resolution::Completed,
						1 => registry.fail(id, Error::ConnectionLost("fuzz".into())),
						2 => registry.cancel(id),
						_ => {
							registry.resolve(chunk(id, StatusCode::PARTIAL_CONTENT, json!(worker)));
							false
						}
					}
				}));
			}

			let mut terminal = 0;
			for handle in handles {
				if handle.await.unwrap() {
					terminal += 1;
				}
			}
			assert_eq!(terminal, 1, "exactly one terminal transition per request");
			assert!(!registry.contains(&id));
			// The waiter saw at most one outcome; a cancel leaves it without a value.
			let _ = rx.await;
		}
	}
}
