use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use duo_protocol::{
	ConnectionKind, DataChannelInit, IceCandidate, OfferOptions, RtcConfiguration, SdpType, SessionDescription,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{
	ChannelState, DataChannel, EventSender, MediaStream, PeerTransport, PeerTransportFactory, TransportEvent,
	TransportState,
};

/// One end of a [`LoopbackNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
	A,
	B,
}

impl Side {
	pub fn other(self) -> Side {
		match self {
			Side::A => Side::B,
			Side::B => Side::A,
		}
	}
}

#[derive(Default)]
struct Hub {
	transports: Mutex<HashMap<(Side, ConnectionKind), Arc<LoopbackTransport>>>,
	/// Serializes pairing so both ends connect exactly once.
	link: Mutex<()>,
	next_id: AtomicU64,
	reject_a: AtomicBool,
	reject_b: AtomicBool,
	created: Mutex<HashMap<(Side, ConnectionKind), usize>>,
}

impl Hub {
	fn current(&self, side: Side, kind: ConnectionKind) -> Option<Arc<LoopbackTransport>> {
		self.transports.lock().get(&(side, kind)).cloned()
	}

	fn rejects(&self, side: Side) -> bool {
		match side {
			Side::A => self.reject_a.load(Ordering::SeqCst),
			Side::B => self.reject_b.load(Ordering::SeqCst),
		}
	}
}

/// Two in-memory peers.
pub struct LoopbackNetwork;

impl LoopbackNetwork {
	/// Returns the factories for both ends of a fresh network.
	pub fn pair() -> (LoopbackEndpoint, LoopbackEndpoint) {
		let hub = Arc::new(Hub::default());
		(
			LoopbackEndpoint {
				side: Side::A,
				hub: Arc::clone(&hub),
			},
			LoopbackEndpoint { side: Side::B, hub },
		)
	}
}

/// Transport factory for one side of the network.
#[derive(Clone)]
pub struct LoopbackEndpoint {
	side: Side,
	hub: Arc<Hub>,
}

impl LoopbackEndpoint {
	pub fn side(&self) -> Side {
		self.side
	}

	/// Makes offer/answer generation on this side fail.
	pub fn reject_descriptions(&self, reject: bool) {
		let flag = match self.side {
			Side::A => &self.hub.reject_a,
			Side::B => &self.hub.reject_b,
		};
		flag.store(reject, Ordering::SeqCst);
	}

	/// The most recently created transport of `kind` on this side.
	pub fn transport(&self, kind: ConnectionKind) -> Option<Arc<LoopbackTransport>> {
		self.hub.current(self.side, kind)
	}

	/// How many transports of `kind` this side has created.
	pub fn created(&self, kind: ConnectionKind) -> usize {
		self.hub.created.lock().get(&(self.side, kind)).copied().unwrap_or(0)
	}
}

impl PeerTransportFactory for LoopbackEndpoint {
	fn create(
		&self,
		kind: ConnectionKind,
		_config: &RtcConfiguration,
		events: EventSender,
	) -> Result<Arc<dyn PeerTransport>> {
		let id = self.hub.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		let transport = Arc::new(LoopbackTransport {
			id,
			side: self.side,
			kind,
			hub: Arc::downgrade(&self.hub),
			events,
			inner: Mutex::new(TransportInner::default()),
		});
		self.hub.transports.lock().insert((self.side, kind), Arc::clone(&transport));
		*self.hub.created.lock().entry((self.side, kind)).or_default() += 1;
		debug!(id, side = ?self.side, %kind, "loopback transport created");
		Ok(transport)
	}
}

#[derive(Default)]
struct TransportInner {
	local: Option<SessionDescription>,
	remote: Option<SessionDescription>,
	remote_candidates: usize,
	connected: bool,
	closed: bool,
	channels: Vec<Arc<LoopbackChannel>>,
	/// Channels the peer announced to us.
	announced: Vec<Arc<LoopbackChannel>>,
	stream: Option<MediaStream>,
}

/// In-memory peer transport.
pub struct LoopbackTransport {
	id: u64,
	side: Side,
	kind: ConnectionKind,
	hub: Weak<Hub>,
	events: EventSender,
	inner: Mutex<TransportInner>,
}

impl LoopbackTransport {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn is_connected(&self) -> bool {
		self.inner.lock().connected
	}

	pub fn is_closed(&self) -> bool {
		self.inner.lock().closed
	}

	/// Remote candidates accepted for the paired transport.
	pub fn applied_candidates(&self) -> usize {
		self.inner.lock().remote_candidates
	}

	pub fn local_description(&self) -> Option<SessionDescription> {
		self.inner.lock().local.clone()
	}

	pub fn remote_description(&self) -> Option<SessionDescription> {
		self.inner.lock().remote.clone()
	}

	pub fn stream(&self) -> Option<MediaStream> {
		self.inner.lock().stream.clone()
	}

	fn send_event(&self, event: TransportEvent) {
		trace!(id = self.id, ?event, "loopback event");
		// The receiver is gone once the owning negotiator moved on.
		let _ = self.events.send(event);
	}

	fn describe(&self, sdp_type: SdpType) -> SessionDescription {
		let role = match sdp_type {
			SdpType::Offer => "offer",
			_ => "answer",
		};
		SessionDescription {
			sdp_type,
			sdp: format!(
				"v=0\r\no=duo {} 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=duo-kind:{}\r\na=duo-role:{}\r\n",
				self.id, self.kind, role
			),
		}
	}

	fn gather(&self) {
		for (index, port) in [(1u32, 50_000 + self.id), (2, 60_000 + self.id)] {
			let candidate = IceCandidate::new(
				0,
				self.kind.as_str(),
				format!(
					"candidate:{index} 1 udp 2122260223 127.0.0.1 {port} typ host ufrag duo{}",
					self.id
				),
			);
			self.send_event(TransportEvent::IceCandidate(Some(candidate)));
		}
		self.send_event(TransportEvent::IceCandidate(None));
	}

	fn ready_for(&self, peer_id: u64) -> bool {
		let inner = self.inner.lock();
		!inner.closed
			&& !inner.connected
			&& inner.local.is_some()
			&& inner.remote_candidates > 0
			&& inner.remote.as_ref().and_then(|d| sdp_origin(&d.sdp)) == Some(peer_id)
	}

	/// The peer transport this one is connected to, if any.
	fn linked_peer(&self) -> Option<Arc<LoopbackTransport>> {
		let hub = self.hub.upgrade()?;
		let peer = hub.current(self.side.other(), self.kind)?;
		let remote_origin = self.inner.lock().remote.as_ref().and_then(|d| sdp_origin(&d.sdp));
		(remote_origin == Some(peer.id) && peer.is_connected()).then_some(peer)
	}

	fn check_link(&self) {
		let Some(hub) = self.hub.upgrade() else {
			return;
		};
		let _guard = hub.link.lock();
		let Some(peer) = hub.current(self.side.other(), self.kind) else {
			return;
		};
		let Some(this) = hub.current(self.side, self.kind) else {
			return;
		};
		if this.id != self.id || !self.ready_for(peer.id) || !peer.ready_for(self.id) {
			return;
		}
		this.establish(&peer);
		peer.establish(&this);
	}

	fn establish(&self, peer: &Arc<LoopbackTransport>) {
		let (channels, stream) = {
			let mut inner = self.inner.lock();
			inner.connected = true;
			(inner.channels.clone(), inner.stream.clone())
		};
		debug!(id = self.id, peer = peer.id, kind = %self.kind, "loopback connected");
		self.send_event(TransportEvent::StateChanged(TransportState::Connected));
		for channel in channels.iter().filter(|c| c.ready_state() != ChannelState::Closed) {
			self.open_channel(channel, peer);
		}
		if let Some(stream) = stream {
			peer.send_event(TransportEvent::RemoteStream(stream));
		}
	}

	fn open_channel(&self, channel: &Arc<LoopbackChannel>, peer: &Arc<LoopbackTransport>) {
		*channel.state.lock() = ChannelState::Open;
		self.send_event(TransportEvent::ChannelOpen {
			label: channel.label.clone(),
		});
		let announced = Arc::new(LoopbackChannel {
			label: channel.label.clone(),
			owner: Arc::downgrade(peer),
			state: Mutex::new(ChannelState::Open),
			announced: true,
		});
		peer.inner.lock().announced.push(Arc::clone(&announced));
		peer.send_event(TransportEvent::DataChannel(announced));
	}

	/// The linked peer went away: every channel on this side closes.
	fn peer_lost(&self) {
		let mut labels: Vec<String> = Vec::new();
		{
			let mut inner = self.inner.lock();
			inner.connected = false;
			for channel in inner.channels.iter().chain(inner.announced.iter()) {
				let previous = std::mem::replace(&mut *channel.state.lock(), ChannelState::Closed);
				if previous != ChannelState::Closed && !labels.contains(&channel.label) {
					labels.push(channel.label.clone());
				}
			}
		}
		for label in labels {
			self.send_event(TransportEvent::ChannelClose { label });
		}
		self.send_event(TransportEvent::StateChanged(TransportState::Disconnected));
	}

	fn deliver(&self, label: &str, data: String) -> Result<()> {
		let peer = self
			.linked_peer()
			.ok_or_else(|| Error::Transport(format!("{} peer unavailable", self.kind)))?;
		peer.send_event(TransportEvent::ChannelMessage {
			label: label.to_string(),
			data,
		});
		Ok(())
	}

	fn ensure_usable(&self) -> Result<()> {
		if self.inner.lock().closed {
			return Err(Error::Transport(format!("{} transport closed", self.kind)));
		}
		Ok(())
	}
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
	async fn create_offer(&self, _options: OfferOptions) -> Result<SessionDescription> {
		self.ensure_usable()?;
		if self.hub.upgrade().is_some_and(|hub| hub.rejects(self.side)) {
			return Err(Error::Transport("offer generation rejected".into()));
		}
		Ok(self.describe(SdpType::Offer))
	}

	async fn create_answer(&self, _options: OfferOptions) -> Result<SessionDescription> {
		self.ensure_usable()?;
		if self.hub.upgrade().is_some_and(|hub| hub.rejects(self.side)) {
			return Err(Error::Transport("answer generation rejected".into()));
		}
		let has_offer = matches!(
			self.inner.lock().remote.as_ref().map(|d| d.sdp_type),
			Some(SdpType::Offer)
		);
		if !has_offer {
			return Err(Error::Transport("cannot answer without a remote offer".into()));
		}
		Ok(self.describe(SdpType::Answer))
	}

	async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
		self.ensure_usable()?;
		self.inner.lock().local = Some(description);
		self.gather();
		self.check_link();
		Ok(())
	}

	async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
		self.ensure_usable()?;
		if sdp_origin(&description.sdp).is_none() {
			return Err(Error::Transport("unparseable remote description".into()));
		}
		self.inner.lock().remote = Some(description);
		self.check_link();
		Ok(())
	}

	async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
		{
			let mut inner = self.inner.lock();
			if inner.closed {
				return Err(Error::Transport(format!("{} transport closed", self.kind)));
			}
			let Some(remote) = inner.remote.as_ref() else {
				return Err(Error::Transport("remote description not set".into()));
			};
			if candidate_ufrag(&candidate.candidate) == sdp_origin(&remote.sdp) {
				inner.remote_candidates += 1;
			} else {
				debug!(id = self.id, "ignoring candidate for another transport");
			}
		}
		self.check_link();
		Ok(())
	}

	async fn create_data_channel(&self, label: &str, _init: DataChannelInit) -> Result<Arc<dyn DataChannel>> {
		self.ensure_usable()?;
		let channel = Arc::new(LoopbackChannel {
			label: label.to_string(),
			owner: self.self_ref(),
			state: Mutex::new(ChannelState::Connecting),
			announced: false,
		});
		let connected = {
			let mut inner = self.inner.lock();
			inner.channels.push(Arc::clone(&channel));
			inner.connected
		};
		if connected {
			if let Some(peer) = self.linked_peer() {
				self.open_channel(&channel, &peer);
			}
		}
		Ok(channel)
	}

	fn add_stream(&self, stream: &MediaStream) -> Result<()> {
		self.ensure_usable()?;
		self.inner.lock().stream = Some(stream.clone());
		if let Some(peer) = self.linked_peer() {
			peer.send_event(TransportEvent::RemoteStream(stream.clone()));
		}
		Ok(())
	}

	fn remove_stream(&self, stream: &MediaStream) {
		let mut inner = self.inner.lock();
		if inner.stream.as_ref() == Some(stream) {
			inner.stream = None;
		}
	}

	fn close(&self) {
		let peer = self.linked_peer();
		{
			let mut inner = self.inner.lock();
			if inner.closed {
				return;
			}
			inner.closed = true;
			inner.connected = false;
			for channel in inner.channels.iter().chain(inner.announced.iter()) {
				*channel.state.lock() = ChannelState::Closed;
			}
		}
		if let Some(peer) = peer {
			peer.peer_lost();
		}
		if let Some(hub) = self.hub.upgrade() {
			let mut transports = hub.transports.lock();
			if transports.get(&(self.side, self.kind)).is_some_and(|t| t.id == self.id) {
				transports.remove(&(self.side, self.kind));
			}
		}
		debug!(id = self.id, kind = %self.kind, "loopback transport closed");
	}
}

impl LoopbackTransport {
	fn self_ref(&self) -> Weak<LoopbackTransport> {
		self.hub
			.upgrade()
			.and_then(|hub| hub.current(self.side, self.kind))
			.filter(|t| t.id == self.id)
			.map(|t| Arc::downgrade(&t))
			.unwrap_or_default()
	}

	fn channel_closed(&self, label: &str) {
		self.send_event(TransportEvent::ChannelClose {
			label: label.to_string(),
		});
	}
}

/// In-memory data channel. Frames go to the linked peer transport.
pub struct LoopbackChannel {
	label: String,
	owner: Weak<LoopbackTransport>,
	state: Mutex<ChannelState>,
	/// Created by the peer and announced to us.
	announced: bool,
}

impl LoopbackChannel {
	pub fn is_announced(&self) -> bool {
		self.announced
	}
}

#[async_trait]
impl DataChannel for LoopbackChannel {
	fn label(&self) -> &str {
		&self.label
	}

	fn ready_state(&self) -> ChannelState {
		*self.state.lock()
	}

	async fn send_text(&self, text: String) -> Result<()> {
		if self.ready_state() != ChannelState::Open {
			return Err(Error::Transport(format!("channel {} is not open", self.label)));
		}
		let owner = self
			.owner
			.upgrade()
			.ok_or_else(|| Error::Transport(format!("channel {} lost its transport", self.label)))?;
		owner.deliver(&self.label, text)
	}

	fn close(&self) {
		let previous = std::mem::replace(&mut *self.state.lock(), ChannelState::Closed);
		if previous == ChannelState::Closed || self.announced {
			return;
		}
		if let Some(owner) = self.owner.upgrade() {
			owner.channel_closed(&self.label);
		}
	}
}

fn sdp_origin(sdp: &str) -> Option<u64> {
	sdp.lines()
		.find_map(|line| line.strip_prefix("o=duo "))
		.and_then(|rest| rest.split_whitespace().next())
		.and_then(|id| id.parse().ok())
}

fn candidate_ufrag(candidate: &str) -> Option<u64> {
	candidate
		.split_whitespace()
		.skip_while(|token| *token != "ufrag")
		.nth(1)
		.and_then(|ufrag| ufrag.strip_prefix("duo"))
		.and_then(|id| id.parse().ok())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sdp_origin_parses_loopback_descriptions() {
		assert_eq!(sdp_origin("v=0\r\no=duo 42 0 IN IP4 127.0.0.1\r\n"), Some(42));
		assert_eq!(sdp_origin("v=0\r\no=- 42 0 IN IP4 127.0.0.1\r\n"), None);
	}

	#[test]
	fn candidate_ufrag_parses_loopback_candidates() {
		assert_eq!(
			candidate_ufrag("candidate:1 1 udp 2122260223 127.0.0.1 50001 typ host ufrag duo7"),
			Some(7)
		);
		assert_eq!(candidate_ufrag("candidate:1 1 udp 1 127.0.0.1 1 typ host"), None);
	}

	#[test]
	fn factory_replaces_current_transport() {
		let (a, _b) = LoopbackNetwork::pair();
		let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
		let first = a.create(ConnectionKind::Data, &RtcConfiguration::default(), tx.clone()).unwrap();
		let _second = a.create(ConnectionKind::Data, &RtcConfiguration::default(), tx).unwrap();
		assert_eq!(a.created(ConnectionKind::Data), 2);
		first.close();
		assert!(a.transport(ConnectionKind::Data).is_some(), "closing a stale transport keeps the live one");
	}
}
