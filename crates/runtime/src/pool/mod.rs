//! Bounded pool of persistent connections.
//!
//! The pool owns every [`Connection`] it opens. Callers lease a connection,
//! send on it, and never return it: connections are shared, so a lease is only
//! a routing decision. Selection prefers a `Ready` connection with no requests
//! in flight, grows the pool while below `max_active_connections`, and
//! otherwise spreads load round-robin.
//!
//! A background sweeper closes connections that stay idle past the idle
//! timeout. A connection that fails removes itself from the pool, and the
//! requests it was carrying are failed with [`Error::ConnectionLost`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SessionConfig;
use crate::connection::{Connection, ConnectionId, FailureHook};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::transport::DialSettings;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
	/// Connections currently owned by the pool.
	pub connections: usize,
	/// Connections accepting requests.
	pub ready: usize,
	/// Requests sent and not yet resolved, across all connections.
	pub in_flight: usize,
}

/// Connection pool bound to one server endpoint.
pub struct Pool {
	inner: Arc<PoolInner>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

struct PoolInner {
	settings: DialSettings,
	config: Arc<SessionConfig>,
	registry: Arc<Registry>,
	connections: Mutex<Vec<Arc<Connection>>>,
	/// Serialises growth so concurrent leases re-check after an open completes.
	open_lock: tokio::sync::Mutex<()>,
	cursor: AtomicUsize,
	next_id: AtomicU64,
	closed: AtomicBool,
}

impl Pool {
	/// Creates an empty pool and starts its idle sweeper.
	///
	/// No connection is opened until the first [`lease`](Self::lease). Must be
	/// called from within a tokio runtime.
	pub fn new(url: impl Into<String>, config: Arc<SessionConfig>, registry: Arc<Registry>) -> Self {
		let settings = DialSettings {
			url: url.into(),
			read_buffer_size: config.read_buffer_size(),
			write_buffer_size: config.write_buffer_size(),
		};
		let inner = Arc::new(PoolInner {
			settings,
			config,
			registry,
			connections: Mutex::new(Vec::new()),
			open_lock: tokio::sync::Mutex::new(()),
			cursor: AtomicUsize::new(0),
			next_id: AtomicU64::new(1),
			closed: AtomicBool::new(false),
		});
		let sweeper = spawn_sweeper(&inner);

		Self {
			inner,
			sweeper: Mutex::new(Some(sweeper)),
		}
	}

	/// Selects a connection for a new request, opening one if the pool may grow.
	pub async fn lease(&self) -> Result<Arc<Connection>> {
		self.inner.lease().await
	}

	/// Closes and removes connections idle past the idle timeout with nothing in flight.
	///
	/// Runs periodically on the sweeper; returns the number of evicted connections.
	pub async fn evict_idle(&self) -> usize {
		self.inner.evict_idle().await
	}

	/// Stops leasing and closes every connection.
	///
	/// Connections are closed concurrently; any still open when `timeout`
	/// elapses are force-closed and [`Error::Timeout`] is returned. Otherwise
	/// the first close error, if any, is returned once every connection is closed.
	pub async fn drain(&self, timeout: Duration) -> Result<()> {
		self.inner.closed.store(true, Ordering::SeqCst);
		if let Some(sweeper) = self.sweeper.lock().take() {
			sweeper.abort();
		}

		let connections = std::mem::take(&mut *self.inner.connections.lock());
		tracing::info!(connections = connections.len(), "Draining pool");

		let closing = join_all(connections.iter().map(|conn| conn.close()));
		let results = match tokio::time::timeout(timeout, closing).await {
			Ok(results) => results,
			Err(_) => {
				tracing::warn!(?timeout, "Drain timed out, force closing remaining connections");
				for conn in &connections {
					conn.force_close();
				}
				return Err(Error::Timeout(timeout));
			}
		};

		let mut first_error = None;
		for (conn, result) in connections.iter().zip(results) {
			if let Err(e) = result {
				tracing::debug!(conn = conn.id(), error = %e, "Close did not complete cleanly");
				first_error.get_or_insert(e);
			}
		}
		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Returns true while the pool can serve requests: it is open and either
	/// holds a ready connection or may still open one.
	pub fn is_healthy(&self) -> bool {
		if self.is_closed() {
			return false;
		}
		let mut connections = self.inner.connections.lock();
		prune_terminal(&mut connections);
		connections.len() < self.inner.config.max_active_connections() || connections.iter().any(|c| c.is_ready())
	}

	pub fn stats(&self) -> PoolStats {
		let connections = self.inner.connections.lock();
		PoolStats {
			connections: connections.len(),
			ready: connections.iter().filter(|c| c.is_ready()).count(),
			in_flight: connections.iter().map(|c| c.in_flight_count()).sum(),
		}
	}
}

impl Drop for Pool {
	fn drop(&mut self) {
		if let Some(sweeper) = self.sweeper.get_mut().take() {
			sweeper.abort();
		}
		for conn in self.inner.connections.lock().drain(..) {
			conn.force_close();
		}
	}
}

impl PoolInner {
	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ManagerStopped);
		}
		Ok(())
	}

	fn has_capacity(&self) -> bool {
		let mut connections = self.connections.lock();
		prune_terminal(&mut connections);
		connections.len() < self.config.max_active_connections()
	}

	async fn lease(self: &Arc<Self>) -> Result<Arc<Connection>> {
		self.ensure_open()?;
		if let Some(conn) = self.pick_idle() {
			return Ok(conn);
		}
		if !self.has_capacity() {
			if let Some(conn) = self.pick_round_robin() {
				return Ok(conn);
			}
		}

		let _open = self.open_lock.lock().await;
		self.ensure_open()?;
		if let Some(conn) = self.pick_idle() {
			return Ok(conn);
		}
		if !self.has_capacity() {
			return self
				.pick_round_robin()
				.ok_or_else(|| Error::PoolExhausted("no ready connection at capacity".to_string()));
		}

		match self.open_connection().await {
			Ok(conn) => Ok(conn),
			Err(e) => {
				if let Some(conn) = self.pick_round_robin() {
					tracing::debug!(error = %e, conn = conn.id(), "Open failed, reusing existing connection");
					return Ok(conn);
				}
				Err(match e {
					Error::HandshakeTimeout(_) | Error::AuthenticationRejected(_) | Error::ManagerStopped => e,
					other => Error::PoolExhausted(format!("could not open a connection: {other}")),
				})
			}
		}
	}

	/// First ready connection with nothing in flight.
	fn pick_idle(&self) -> Option<Arc<Connection>> {
		let connections = self.connections.lock();
		let conn = connections.iter().find(|c| c.is_ready() && c.in_flight_count() == 0)?;
		conn.touch_activity();
		Some(Arc::clone(conn))
	}

	fn pick_round_robin(&self) -> Option<Arc<Connection>> {
		let connections = self.connections.lock();
		let ready: Vec<&Arc<Connection>> = connections.iter().filter(|c| c.is_ready()).collect();
		if ready.is_empty() {
			return None;
		}
		let conn = ready[self.cursor.fetch_add(1, Ordering::Relaxed) % ready.len()];
		conn.touch_activity();
		Some(Arc::clone(conn))
	}

	async fn open_connection(self: &Arc<Self>) -> Result<Arc<Connection>> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let hook = failure_hook(Arc::downgrade(self), Arc::clone(&self.registry));
		let conn = Connection::open(
			id,
			self.settings.clone(),
			Arc::clone(&self.config),
			Arc::clone(&self.registry),
			hook,
		)
		.await?;

		{
			let mut connections = self.connections.lock();
			if self.closed.load(Ordering::SeqCst) {
				drop(connections);
				conn.force_close();
				return Err(Error::ManagerStopped);
			}
			if !conn.is_ready() {
				return Err(Error::ConnectionLost(format!("connection {id} failed during setup")));
			}
			conn.touch_activity();
			connections.push(Arc::clone(&conn));
			tracing::info!(conn = id, connections = connections.len(), "Connection added to pool");
		}

		Ok(conn)
	}

	fn remove(&self, id: ConnectionId) -> bool {
		let mut connections = self.connections.lock();
		let before = connections.len();
		connections.retain(|c| c.id() != id);
		before != connections.len()
	}

	async fn evict_idle(&self) -> usize {
		let idle_timeout = self.config.idle_timeout();
		let evicted: Vec<Arc<Connection>> = {
			let mut connections = self.connections.lock();
			let (evicted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *connections)
				.into_iter()
				.partition(|c| c.is_ready() && c.in_flight_count() == 0 && c.idle_for() >= idle_timeout);
			*connections = kept;
			evicted
		};

		if evicted.is_empty() {
			return 0;
		}

		for conn in &evicted {
			tracing::debug!(conn = conn.id(), idle = ?conn.idle_for(), "Evicting idle connection");
		}
		for result in join_all(evicted.iter().map(|conn| conn.close())).await {
			if let Err(e) = result {
				tracing::debug!(error = %e, "Idle connection did not close cleanly");
			}
		}
		evicted.len()
	}
}

/// Drops members that already failed or closed. A failed connection stops
/// counting toward capacity as soon as its state changes, before its failure
/// hook has removed it.
fn prune_terminal(connections: &mut Vec<Arc<Connection>>) {
	connections.retain(|c| !c.state().is_terminal());
}

fn failure_hook(pool: Weak<PoolInner>, registry: Arc<Registry>) -> FailureHook {
	Arc::new(move |conn: &Arc<Connection>, error: &Error| {
		if let Some(pool) = pool.upgrade() {
			pool.remove(conn.id());
		}

		let lost = conn.take_in_flight();
		if !lost.is_empty() {
			tracing::warn!(conn = conn.id(), requests = lost.len(), "Failing requests of lost connection");
		}
		for request_id in lost {
			registry.fail(request_id, Error::ConnectionLost(format!("connection {} failed: {error}", conn.id())));
		}
	})
}

fn spawn_sweeper(inner: &Arc<PoolInner>) -> JoinHandle<()> {
	let pool = Arc::downgrade(inner);
	let period = inner.config.idle_sweep_interval();

	tokio::spawn(async move {
		let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			ticker.tick().await;
			let Some(pool) = pool.upgrade() else {
				return;
			};
			if pool.closed.load(Ordering::SeqCst) {
				return;
			}
			let evicted = pool.evict_idle().await;
			if evicted > 0 {
				tracing::debug!(evicted, "Idle sweep");
			}
		}
	})
}
