//! Two sessions wired through the loopback network and a queued relay.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use duo::{
	ChannelCallbacks, ChannelConfig, ConnectionKind, NegotiationState, Observers, Session, SessionBuilder,
	SessionConfig, SignalingEnvelope,
};
use duo_runtime::MediaCapture;
use duo_runtime::loopback::{LoopbackEndpoint, LoopbackNetwork, MemoryCapture, MemorySink};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

pub const LOCAL: &str = "local-video";
pub const REMOTE: &str = "remote-video";
pub const TEXT: &str = "text";

pub struct Peer {
	pub session: Arc<Session>,
	pub endpoint: LoopbackEndpoint,
	pub capture: Arc<MemoryCapture>,
	pub sink: Arc<MemorySink>,
	/// Observer and channel callback invocations, in order.
	pub log: Arc<Mutex<Vec<String>>>,
	/// Payloads delivered on the `text` channel.
	pub received: Arc<Mutex<Vec<Value>>>,
	outbox: mpsc::UnboundedReceiver<SignalingEnvelope>,
	/// Every envelope this peer emitted.
	pub sent: Vec<SignalingEnvelope>,
}

pub fn config() -> SessionConfig {
	SessionConfig::new(LOCAL, REMOTE).with_channel(ChannelConfig::new(TEXT))
}

pub fn observers(log: &Arc<Mutex<Vec<String>>>) -> Observers {
	let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
	Observers::new()
		.on_connected(move || a.lock().push("connected".into()))
		.on_media_stream_connected(move || b.lock().push("mediaStreamConnected".into()))
		.on_media_stream_removed(move || c.lock().push("mediaStreamRemoved".into()))
		.on_media_stream_remote_removed(move || d.lock().push("mediaStreamRemoteRemoved".into()))
}

pub fn peer(endpoint: LoopbackEndpoint, capture: Arc<dyn MediaCapture>, memory: Arc<MemoryCapture>) -> Peer {
	let log = Arc::new(Mutex::new(Vec::new()));
	let received = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::new(MemorySink::new());
	let (tx, outbox) = mpsc::unbounded_channel();

	let text_log = log.clone();
	let close_log = log.clone();
	let text_received = received.clone();
	let text = ChannelCallbacks::new()
		.on_open(move |name| text_log.lock().push(format!("open:{name}")))
		.on_close(move |name| close_log.lock().push(format!("close:{name}")))
		.on_message(move |_, payload| text_received.lock().push(payload));

	let session = SessionBuilder::new()
		.config(config())
		.signaling(move |envelope| {
			let _ = tx.send(envelope);
		})
		.transport_factory(Arc::new(endpoint.clone()))
		.media_capture(capture)
		.video_sink(sink.clone())
		.observers(observers(&log))
		.channel(TEXT, text)
		.build()
		.unwrap();

	Peer {
		session,
		endpoint,
		capture: memory,
		sink,
		log,
		received,
		outbox,
		sent: Vec::new(),
	}
}

/// Two peers sharing one loopback network.
pub fn pair() -> (Peer, Peer) {
	let (a, b) = LoopbackNetwork::pair();
	let capture_a = Arc::new(MemoryCapture::new());
	let capture_b = Arc::new(MemoryCapture::new());
	(
		peer(a, capture_a.clone(), capture_a),
		peer(b, capture_b.clone(), capture_b),
	)
}

impl Peer {
	pub fn logged(&self, entry: &str) -> usize {
		self.log.lock().iter().filter(|e| *e == entry).count()
	}

	pub async fn state(&self, kind: ConnectionKind) -> NegotiationState {
		self.session.connection_state(kind).await
	}
}

/// Moves everything `from` emitted into `to`. Returns how many envelopes
/// were delivered.
pub async fn relay(from: &mut Peer, to: &Peer) -> usize {
	let mut moved = 0;
	while let Ok(envelope) = from.outbox.try_recv() {
		from.sent.push(envelope.clone());
		// Answers to superseded offers are expected to fail.
		let _ = to.session.handle_signaling(envelope).await;
		moved += 1;
	}
	moved
}

/// Relays in both directions until neither side has anything left to say
/// and the event pumps had time to run.
pub async fn settle(a: &mut Peer, b: &mut Peer) {
	let mut idle = 0;
	for _ in 0..100 {
		tokio::time::sleep(Duration::from_millis(5)).await;
		let moved = relay(a, b).await + relay(b, a).await;
		if moved == 0 {
			idle += 1;
			if idle == 4 {
				return;
			}
		} else {
			idle = 0;
		}
	}
}

/// Connects the data channel of both peers, `a` offering.
pub async fn connected_pair() -> (Peer, Peer) {
	let (mut a, mut b) = pair();
	a.session.connect(None).await.unwrap();
	settle(&mut a, &mut b).await;
	assert!(a.session.check_connection(None).await, "offerer data connection open");
	assert!(b.session.check_connection(None).await, "answerer data connection open");
	(a, b)
}
