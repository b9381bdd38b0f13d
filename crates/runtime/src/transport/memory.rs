//! In-memory transport pair.
//!
//! [`pair`] returns the client half as [`TransportParts`] together with a
//! [`MemoryPeer`] playing the server. The client-to-peer direction is bounded,
//! so a peer that stops reading eventually stalls the client's writes.

use tokio::sync::mpsc;

use super::{Frame, TransportFuture, TransportParts, TransportReceiver, TransportSender};
use crate::error::{Error, Result};

/// Creates a connected transport/peer pair. `capacity` bounds the number of
/// frames the client may write before the peer reads them.
pub fn pair(capacity: usize) -> (TransportParts, MemoryPeer) {
	let (client_tx, peer_rx) = mpsc::channel(capacity.max(1));
	let (peer_tx, client_rx) = mpsc::unbounded_channel();

	let parts = TransportParts {
		sender: Box::new(MemorySender { tx: Some(client_tx) }),
		receiver: Box::new(MemoryReceiver { rx: client_rx }),
	};
	let peer = MemoryPeer { tx: peer_tx, rx: peer_rx };

	(parts, peer)
}

/// Server side of an in-memory transport.
pub struct MemoryPeer {
	tx: mpsc::UnboundedSender<Result<Frame>>,
	rx: mpsc::Receiver<Frame>,
}

impl MemoryPeer {
	/// Delivers a frame to the client's read loop. Returns `false` if the client is gone.
	pub fn send(&self, frame: Frame) -> bool {
		self.tx.send(Ok(frame)).is_ok()
	}

	/// Delivers a stream-level error to the client's read loop.
	pub fn send_error(&self, error: Error) -> bool {
		self.tx.send(Err(error)).is_ok()
	}

	/// Receives the next frame written by the client; `None` once the client half is dropped.
	pub async fn recv(&mut self) -> Option<Frame> {
		self.rx.recv().await
	}

	/// Splits the peer so reading and writing can happen on different tasks.
	pub fn split(self) -> (MemoryPeerSender, mpsc::Receiver<Frame>) {
		(MemoryPeerSender { tx: self.tx }, self.rx)
	}
}

/// Cloneable write handle of a [`MemoryPeer`].
#[derive(Clone)]
pub struct MemoryPeerSender {
	tx: mpsc::UnboundedSender<Result<Frame>>,
}

impl MemoryPeerSender {
	pub fn send(&self, frame: Frame) -> bool {
		self.tx.send(Ok(frame)).is_ok()
	}

	pub fn send_error(&self, error: Error) -> bool {
		self.tx.send(Err(error)).is_ok()
	}
}

struct MemorySender {
	tx: Option<mpsc::Sender<Frame>>,
}

impl TransportSender for MemorySender {
	fn send(&mut self, frame: Frame) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
			tx.send(frame).await.map_err(|_| Error::Transport("memory peer dropped".to_string()))
		})
	}

	fn close(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			if let Some(tx) = self.tx.take() {
				// The peer may already be gone; closing is still complete.
				let _ = tx.send(Frame::Close).await;
			}
			Ok(())
		})
	}
}

struct MemoryReceiver {
	rx: mpsc::UnboundedReceiver<Result<Frame>>,
}

impl TransportReceiver for MemoryReceiver {
	fn recv(&mut self) -> TransportFuture<'_, Option<Result<Frame>>> {
		Box::pin(async move { self.rx.recv().await })
	}
}
