//! WebSocket transport backed by tokio-tungstenite.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};

use super::{DialSettings, Frame, TransportFactory, TransportFuture, TransportParts, TransportReceiver, TransportSender};
use crate::error::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` and `wss://` endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
	fn open<'a>(&'a self, settings: &'a DialSettings) -> TransportFuture<'a, Result<TransportParts>> {
		Box::pin(async move {
			let config = websocket_config(settings);

			let (ws, response) = connect_async_with_config(settings.url.as_str(), Some(config), true).await?;
			tracing::debug!(url = %settings.url, status = %response.status(), "WebSocket connected");

			let (sink, stream) = ws.split();
			Ok(TransportParts {
				sender: Box::new(WebSocketSender { sink }),
				receiver: Box::new(WebSocketReceiver { stream }),
			})
		})
	}
}

/// Applies the dial buffer sizes. The write buffer cap stays above the
/// target size, as tungstenite requires.
fn websocket_config(settings: &DialSettings) -> WebSocketConfig {
	let mut config = WebSocketConfig::default();
	config.read_buffer_size = settings.read_buffer_size;
	config.write_buffer_size = settings.write_buffer_size;
	config.max_write_buffer_size = config.max_write_buffer_size.max(settings.write_buffer_size + 1);
	config
}

/// Write half of a WebSocket connection.
pub struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl TransportSender for WebSocketSender {
	fn send(&mut self, frame: Frame) -> TransportFuture<'_, Result<()>> {
		let message = match frame {
			Frame::Binary(bytes) => Message::Binary(bytes.into()),
			Frame::Text(text) => Message::Text(text.into()),
			Frame::Ping(bytes) => Message::Ping(bytes.into()),
			Frame::Pong(bytes) => Message::Pong(bytes.into()),
			Frame::Close => Message::Close(None),
		};
		Box::pin(async move {
			self.sink.send(message).await?;
			Ok(())
		})
	}

	fn close(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			self.sink.close().await?;
			Ok(())
		})
	}
}

/// Read half of a WebSocket connection.
pub struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
}

impl TransportReceiver for WebSocketReceiver {
	fn recv(&mut self) -> TransportFuture<'_, Option<Result<Frame>>> {
		Box::pin(async move {
			loop {
				let frame = match self.stream.next().await? {
					Ok(Message::Binary(bytes)) => Frame::Binary(bytes.to_vec()),
					Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
					Ok(Message::Ping(bytes)) => Frame::Ping(bytes.to_vec()),
					Ok(Message::Pong(bytes)) => Frame::Pong(bytes.to_vec()),
					Ok(Message::Close(reason)) => {
						tracing::debug!(?reason, "WebSocket close frame received");
						Frame::Close
					}
					// Raw frames are only produced on the write side.
					Ok(Message::Frame(_)) => continue,
					Err(e) => return Some(Err(e.into())),
				};
				return Some(Ok(frame));
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_carries_both_buffer_sizes() {
		let settings = DialSettings {
			url: "ws://localhost:8182/gremlin".to_string(),
			read_buffer_size: 1024,
			write_buffer_size: 2048,
		};

		let config = websocket_config(&settings);

		assert_eq!(config.read_buffer_size, 1024);
		assert_eq!(config.write_buffer_size, 2048);
		assert!(config.max_write_buffer_size > config.write_buffer_size);
	}
}
