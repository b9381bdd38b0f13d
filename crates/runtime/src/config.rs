//! Session configuration.
//!
//! [`SessionConfig`] is an immutable, validated record built once with
//! [`SessionConfig::builder`] and captured by the session manager at
//! construction. Every option has a default:
//!
//! | option | default |
//! |--------|---------|
//! | credentials | none |
//! | handshake timeout | 5 s |
//! | ping interval | 15 s |
//! | write deadline | 15 s |
//! | read deadline | 30 s (must exceed the ping interval) |
//! | read / write buffer | 8192 / 8192 bytes |
//! | max active connections | 10 |
//! | idle timeout | 30 s |
//! | request timeout | 30 s |
//! | shutdown timeout | 5 s |
//! | idle sweep interval | idle timeout / 2, clamped to 10 ms..5 s |
//! | transport | WebSocket |
//! | codec | GraphSON v2 |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gremlin_protocol::{Codec, GraphSonCodec};

use crate::error::{Error, Result};
use crate::transport::{TransportFactory, WebSocketTransportFactory};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(30);
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_MAX_ACTIVE_CONNECTIONS: usize = 10;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Username and password for SASL PLAIN authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// Validated session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	credentials: Option<Credentials>,
	handshake_timeout: Duration,
	ping_interval: Duration,
	write_deadline: Duration,
	read_deadline: Duration,
	read_buffer_size: usize,
	write_buffer_size: usize,
	max_active_connections: usize,
	idle_timeout: Duration,
	idle_sweep_interval: Duration,
	request_timeout: Duration,
	shutdown_timeout: Duration,
	transport_factory: Arc<dyn TransportFactory>,
	codec: Arc<dyn Codec>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		SessionConfigBuilder::default().assemble()
	}
}

impl SessionConfig {
	/// Starts building a configuration from the defaults.
	pub fn builder() -> SessionConfigBuilder {
		SessionConfigBuilder::default()
	}

	pub fn credentials(&self) -> Option<&Credentials> {
		self.credentials.as_ref()
	}

	/// Time allowed for dialing plus the authentication handshake.
	pub fn handshake_timeout(&self) -> Duration {
		self.handshake_timeout
	}

	/// Period between keepalive pings.
	pub fn ping_interval(&self) -> Duration {
		self.ping_interval
	}

	/// Time a queued write may take to flush.
	pub fn write_deadline(&self) -> Duration {
		self.write_deadline
	}

	/// Longest silence tolerated on a connection before it is failed.
	pub fn read_deadline(&self) -> Duration {
		self.read_deadline
	}

	pub fn read_buffer_size(&self) -> usize {
		self.read_buffer_size
	}

	pub fn write_buffer_size(&self) -> usize {
		self.write_buffer_size
	}

	pub fn max_active_connections(&self) -> usize {
		self.max_active_connections
	}

	/// Idle time after which a connection without in-flight requests is evicted.
	pub fn idle_timeout(&self) -> Duration {
		self.idle_timeout
	}

	/// Period of the idle-eviction sweep.
	pub fn idle_sweep_interval(&self) -> Duration {
		self.idle_sweep_interval
	}

	/// Default deadline for collecting a complete response.
	pub fn request_timeout(&self) -> Duration {
		self.request_timeout
	}

	/// Time allowed for connections to close gracefully on stop.
	pub fn shutdown_timeout(&self) -> Duration {
		self.shutdown_timeout
	}

	pub fn transport_factory(&self) -> &Arc<dyn TransportFactory> {
		&self.transport_factory
	}

	pub fn codec(&self) -> &Arc<dyn Codec> {
		&self.codec
	}
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
	credentials: Option<Credentials>,
	handshake_timeout: Duration,
	ping_interval: Duration,
	write_deadline: Duration,
	read_deadline: Duration,
	read_buffer_size: usize,
	write_buffer_size: usize,
	max_active_connections: usize,
	idle_timeout: Duration,
	idle_sweep_interval: Option<Duration>,
	request_timeout: Duration,
	shutdown_timeout: Duration,
	transport_factory: Arc<dyn TransportFactory>,
	codec: Arc<dyn Codec>,
}

impl Default for SessionConfigBuilder {
	fn default() -> Self {
		Self {
			credentials: None,
			handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
			ping_interval: DEFAULT_PING_INTERVAL,
			write_deadline: DEFAULT_WRITE_DEADLINE,
			read_deadline: DEFAULT_READ_DEADLINE,
			read_buffer_size: DEFAULT_BUFFER_SIZE,
			write_buffer_size: DEFAULT_BUFFER_SIZE,
			max_active_connections: DEFAULT_MAX_ACTIVE_CONNECTIONS,
			idle_timeout: DEFAULT_IDLE_TIMEOUT,
			idle_sweep_interval: None,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
			transport_factory: Arc::new(WebSocketTransportFactory),
			codec: Arc::new(GraphSonCodec::default()),
		}
	}
}

impl SessionConfigBuilder {
	/// Authenticates every connection with SASL PLAIN.
	pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.credentials = Some(Credentials {
			username: username.into(),
			password: password.into(),
		});
		self
	}

	pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
		self.handshake_timeout = timeout;
		self
	}

	pub fn with_ping_interval(mut self, interval: Duration) -> Self {
		self.ping_interval = interval;
		self
	}

	pub fn with_write_deadline(mut self, deadline: Duration) -> Self {
		self.write_deadline = deadline;
		self
	}

	pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
		self.read_deadline = deadline;
		self
	}

	/// Sets the transport read and write buffer sizes in bytes.
	pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
		self.read_buffer_size = read;
		self.write_buffer_size = write;
		self
	}

	pub fn with_max_active_connections(mut self, max: usize) -> Self {
		self.max_active_connections = max;
		self
	}

	pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
		self.idle_timeout = timeout;
		self
	}

	/// Overrides the idle sweep period derived from the idle timeout.
	pub fn with_idle_sweep_interval(mut self, interval: Duration) -> Self {
		self.idle_sweep_interval = Some(interval);
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
		self.shutdown_timeout = timeout;
		self
	}

	/// Substitutes the transport, e.g. with an in-memory double in tests.
	pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
		self.transport_factory = factory;
		self
	}

	pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
		self.codec = codec;
		self
	}

	/// Validates the options and produces the immutable configuration.
	pub fn build(self) -> Result<SessionConfig> {
		self.validate()?;
		Ok(self.assemble())
	}

	fn validate(&self) -> Result<()> {
		let non_zero = [
			("handshake timeout", self.handshake_timeout),
			("ping interval", self.ping_interval),
			("write deadline", self.write_deadline),
			("read deadline", self.read_deadline),
			("idle timeout", self.idle_timeout),
			("request timeout", self.request_timeout),
		];
		for (name, value) in non_zero {
			if value.is_zero() {
				return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
			}
		}
		if self.idle_sweep_interval.is_some_and(|interval| interval.is_zero()) {
			return Err(Error::InvalidConfig("idle sweep interval must be greater than zero".to_string()));
		}
		if self.max_active_connections == 0 {
			return Err(Error::InvalidConfig("max active connections must be at least 1".to_string()));
		}
		if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
			return Err(Error::InvalidConfig("buffer sizes must be greater than zero".to_string()));
		}
		// Keepalive pongs are what keep an idle connection inside its read deadline.
		if self.read_deadline <= self.ping_interval {
			return Err(Error::InvalidConfig(format!(
				"read deadline ({:?}) must exceed ping interval ({:?})",
				self.read_deadline, self.ping_interval
			)));
		}
		if self.credentials.as_ref().is_some_and(|c| c.username.is_empty()) {
			return Err(Error::InvalidConfig("username must not be empty".to_string()));
		}
		Ok(())
	}

	fn assemble(self) -> SessionConfig {
		let idle_sweep_interval = self
			.idle_sweep_interval
			.unwrap_or_else(|| (self.idle_timeout / 2).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL));

		SessionConfig {
			credentials: self.credentials,
			handshake_timeout: self.handshake_timeout,
			ping_interval: self.ping_interval,
			write_deadline: self.write_deadline,
			read_deadline: self.read_deadline,
			read_buffer_size: self.read_buffer_size,
			write_buffer_size: self.write_buffer_size,
			max_active_connections: self.max_active_connections,
			idle_timeout: self.idle_timeout,
			idle_sweep_interval,
			request_timeout: self.request_timeout,
			shutdown_timeout: self.shutdown_timeout,
			transport_factory: self.transport_factory,
			codec: self.codec,
		}
	}
}
