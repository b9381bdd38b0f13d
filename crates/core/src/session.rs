//! Session manager: the public entry point for issuing Gremlin queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gremlin_protocol::{RequestId, RequestMessage};
use gremlin_runtime::{
	ChunkSender, Connection, Error, Pool, PoolStats, Registry, ResponseChunk, Result, ResultSink, SessionConfig,
};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Point-in-time counters for a [`SessionManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
	pub pool: PoolStats,
	/// Requests registered and not yet resolved.
	pub pending: usize,
	/// Chunks that arrived after their request was cancelled, timed out, or failed.
	pub dropped_chunks: u64,
}

/// Pooled Gremlin client.
///
/// Queries are multiplexed over a bounded pool of persistent connections and
/// their responses are correlated back to the caller by request id. A manager
/// is shared by reference (or `Arc`) across tasks.
///
/// ```ignore
/// use gremlin::{SessionConfig, SessionManager};
///
/// let config = SessionConfig::builder()
///     .with_credentials("/dbs/db/colls/graph", "primary-key")
///     .with_max_active_connections(4)
///     .build()?;
/// let session = SessionManager::new("wss://example.gremlin.cosmos.azure.com:443/", config)?;
///
/// let chunks = session.execute("g.V().count()").await?;
/// session.stop().await?;
/// ```
pub struct SessionManager {
	url: String,
	config: Arc<SessionConfig>,
	registry: Arc<Registry>,
	pool: Pool,
	stopped: AtomicBool,
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionManager")
			.field("url", &self.url)
			.field("stopped", &self.stopped.load(Ordering::Relaxed))
			.field("stats", &self.stats())
			.finish()
	}
}

impl SessionManager {
	/// Creates a manager for the server at `url`.
	///
	/// No connection is opened until the first query. Must be called from
	/// within a tokio runtime.
	pub fn new(url: impl Into<String>, config: SessionConfig) -> Result<Self> {
		let url = url.into();
		if !(url.starts_with("ws://") || url.starts_with("wss://")) {
			return Err(Error::InvalidConfig(format!("url must use ws:// or wss://, got {url:?}")));
		}
		if tokio::runtime::Handle::try_current().is_err() {
			return Err(Error::InvalidConfig("a session manager must be created inside a tokio runtime".to_string()));
		}

		let config = Arc::new(config);
		let registry = Arc::new(Registry::new());
		let pool = Pool::new(url.clone(), Arc::clone(&config), Arc::clone(&registry));

		tracing::info!(
			%url,
			max_active_connections = config.max_active_connections(),
			authenticated = config.credentials().is_some(),
			"Session manager created"
		);

		Ok(Self {
			url,
			config,
			registry,
			pool,
			stopped: AtomicBool::new(false),
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Runs a query and returns every response chunk in arrival order.
	///
	/// Bounded by the configured request timeout.
	pub async fn execute(&self, query: &str) -> Result<Vec<ResponseChunk>> {
		self.execute_with_bindings(query, Map::new()).await
	}

	/// Runs a parameterised query; `bindings` are substituted server-side.
	pub async fn execute_with_bindings(&self, query: &str, bindings: Map<String, Value>) -> Result<Vec<ResponseChunk>> {
		self.execute_with_timeout(query, bindings, self.config.request_timeout()).await
	}

	/// Runs a query with an explicit deadline covering lease, send, and all chunks.
	///
	/// When the deadline elapses the request is abandoned with
	/// [`Error::Timeout`]; chunks arriving later are discarded.
	pub async fn execute_with_timeout(
		&self,
		query: &str,
		bindings: Map<String, Value>,
		deadline: Duration,
	) -> Result<Vec<ResponseChunk>> {
		let request_id = Uuid::new_v4();
		let (sink, rx) = ResultSink::collect();
		self.registry.register(request_id, sink)?;
		let mut guard = PendingGuard::new(request_id, &self.registry);

		let exchange = async {
			let conn = self.submit(request_id, query, bindings).await?;
			guard.conn = Some(conn);
			match rx.await {
				Ok(result) => result,
				Err(_) => Err(Error::Cancelled),
			}
		};

		match tokio::time::timeout(deadline, exchange).await {
			Ok(result) => {
				if let Err(e) = &result {
					tracing::debug!(%request_id, error = %e, "Query failed");
				}
				result
			}
			Err(_) => {
				tracing::debug!(%request_id, ?deadline, "Query timed out");
				Err(Error::Timeout(deadline))
			}
		}
	}

	/// Sends a query whose chunks are pushed onto `sender` as they arrive.
	///
	/// Returns once the request has been written. Each chunk arrives as `Ok`;
	/// a failure arrives as a single `Err`. After the final chunk or the error
	/// the manager drops `sender`, so the channel closes once the caller holds
	/// no other clone of it.
	pub async fn execute_async(&self, query: &str, sender: ChunkSender) -> Result<()> {
		self.execute_async_with_bindings(query, Map::new(), sender).await
	}

	/// Streaming variant of [`execute_with_bindings`](Self::execute_with_bindings).
	pub async fn execute_async_with_bindings(
		&self,
		query: &str,
		bindings: Map<String, Value>,
		sender: ChunkSender,
	) -> Result<()> {
		let request_id = Uuid::new_v4();
		self.registry.register(request_id, ResultSink::stream(sender))?;
		let guard = PendingGuard::new(request_id, &self.registry);

		self.submit(request_id, query, bindings).await?;
		guard.disarm();
		Ok(())
	}

	/// Encodes the request and writes it to a leased connection.
	///
	/// A connection that closes between lease and write is replaced once.
	async fn submit(&self, request_id: RequestId, query: &str, bindings: Map<String, Value>) -> Result<Arc<Connection>> {
		let request = RequestMessage::eval(request_id, query, bindings);
		let encoded = self.config.codec().encode(&request)?;

		let mut retried = false;
		loop {
			let conn = self.pool.lease().await?;
			match conn.send(request_id, encoded.clone()).await {
				Ok(()) => {
					tracing::debug!(conn = conn.id(), %request_id, "Request sent");
					return Ok(conn);
				}
				Err(Error::ConnectionClosed) if !retried => {
					tracing::debug!(conn = conn.id(), %request_id, "Connection closed before write, leasing another");
					retried = true;
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Stops the manager.
	///
	/// New queries fail with [`Error::ManagerStopped`], as does every request
	/// still pending. Connections are closed within the shutdown timeout; if
	/// some had to be force-closed, [`Error::Timeout`] is returned, and a
	/// connection that could not close cleanly surfaces its error. The manager
	/// is stopped either way. Only the first call does any work; later calls
	/// return `Ok(())`.
	pub async fn stop(&self) -> Result<()> {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		tracing::info!(url = %self.url, pending = self.registry.len(), "Stopping session manager");
		self.registry.close();
		let failed = self.registry.fail_all(|| Error::ManagerStopped);
		let drained = self.pool.drain(self.config.shutdown_timeout()).await;
		match &drained {
			Ok(()) => tracing::info!(failed, "Session manager stopped"),
			Err(e) => tracing::warn!(failed, error = %e, "Session manager stopped without a clean drain"),
		}
		drained
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// Returns true while queries can be served.
	pub fn is_healthy(&self) -> bool {
		!self.is_stopped() && self.pool.is_healthy()
	}

	pub fn stats(&self) -> SessionStats {
		SessionStats {
			pool: self.pool.stats(),
			pending: self.registry.len(),
			dropped_chunks: self.registry.dropped_chunks(),
		}
	}
}

/// Abandons a registered request unless disarmed.
///
/// Dropping the guard (error, timeout, or the caller dropping the future)
/// removes the registry entry and unassigns the request from its connection.
struct PendingGuard<'a> {
	request_id: RequestId,
	registry: &'a Registry,
	conn: Option<Arc<Connection>>,
	armed: bool,
}

impl<'a> PendingGuard<'a> {
	fn new(request_id: RequestId, registry: &'a Registry) -> Self {
		Self {
			request_id,
			registry,
			conn: None,
			armed: true,
		}
	}

	fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		if self.registry.cancel(self.request_id) {
			tracing::debug!(request_id = %self.request_id, "Abandoned pending request");
		}
		if let Some(conn) = self.conn.take() {
			conn.release(self.request_id);
		}
	}
}
