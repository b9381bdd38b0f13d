use std::time::Duration;

use super::*;
use crate::error::Error;

#[tokio::test]
async fn test_memory_pair_delivers_frames_both_ways() {
	let (mut parts, mut peer) = memory::pair(8);

	parts.sender.send(Frame::Binary(vec![1, 2, 3])).await.unwrap();
	assert_eq!(peer.recv().await, Some(Frame::Binary(vec![1, 2, 3])));

	assert!(peer.send(Frame::Text("hello".to_string())));
	let received = parts.receiver.recv().await.unwrap().unwrap();
	assert_eq!(received.data(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn test_memory_pair_preserves_order() {
	let (mut parts, mut peer) = memory::pair(16);

	for i in 0..5u8 {
		parts.sender.send(Frame::Binary(vec![i])).await.unwrap();
	}
	for i in 0..5u8 {
		assert_eq!(peer.recv().await, Some(Frame::Binary(vec![i])));
	}
}

#[tokio::test]
async fn test_memory_sender_stalls_when_peer_stops_reading() {
	let (mut parts, _peer) = memory::pair(1);

	parts.sender.send(Frame::Binary(vec![0])).await.unwrap();
	let stalled = tokio::time::timeout(Duration::from_millis(50), parts.sender.send(Frame::Binary(vec![1]))).await;
	assert!(stalled.is_err(), "second write should block on a full queue");
}

#[tokio::test]
async fn test_memory_close_sends_close_frame_and_rejects_writes() {
	let (mut parts, mut peer) = memory::pair(4);

	parts.sender.close().await.unwrap();
	assert_eq!(peer.recv().await, Some(Frame::Close));

	let err = parts.sender.send(Frame::Binary(vec![])).await.unwrap_err();
	assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_memory_receiver_ends_when_peer_dropped() {
	let (mut parts, peer) = memory::pair(4);
	drop(peer);

	assert!(parts.receiver.recv().await.is_none());
	let err = parts.sender.send(Frame::Binary(vec![])).await.unwrap_err();
	assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn test_memory_peer_injects_stream_error() {
	let (mut parts, peer) = memory::pair(4);
	assert!(peer.send_error(Error::Transport("reset by peer".to_string())));

	let err = parts.receiver.recv().await.unwrap().unwrap_err();
	assert!(err.to_string().contains("reset by peer"));
}

#[test]
fn test_frame_data_only_for_data_frames() {
	assert_eq!(Frame::Binary(vec![7]).data(), Some(&[7u8][..]));
	assert!(Frame::Ping(vec![7]).data().is_none());
	assert!(Frame::Close.data().is_none());
}
