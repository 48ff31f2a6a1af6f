//! The session façade.
//!
//! A [`Session`] coordinates two negotiators (`data` and `media`), the
//! channel registry and the media manager behind a single async mutex, so
//! public operations and transport events are applied one at a time.
//!
//! # Event flow
//!
//! Every transport gets its own pump task (see [`EventPump`]). The task holds
//! only a weak reference to the session and tags each event with the
//! generation of the negotiator that created the transport; events from a
//! superseded transport are dropped under the lock.
//!
//! # Cancellation
//!
//! [`disconnect`](Session::disconnect) advances the session [`Epoch`] before
//! taking the lock. Operations compare the epoch after each await and give up
//! with [`Error::Cancelled`] once it moved.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use duo_protocol::{
	BinaryType, ConnectionKind, ControlEnvelope, ControlMessage, DEFAULT_CHANNEL, MediaAction,
	MediaConstraints, MediaOptions, SessionDescription, SignalingEnvelope,
};
use duo_runtime::{
	ChannelError, Epoch, EventPump, EventStream, MediaCapture, MediaStream, NegotiationError, NegotiationState,
	Negotiator, NegotiatorContext, PeerTransportFactory, Role, SendSignaling, TransportEvent, TransportState,
	VideoSink,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::callbacks::{ChannelCallbacks, Observers};
use crate::channels::ChannelRegistry;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::media::{MediaManager, MediaState};

/// Everything [`SessionBuilder`](crate::SessionBuilder) validated.
pub(crate) struct SessionParts {
	pub config: SessionConfig,
	pub signaling: SendSignaling,
	pub factory: Arc<dyn PeerTransportFactory>,
	pub capture: Arc<dyn MediaCapture>,
	pub sink: Arc<dyn VideoSink>,
	pub observers: Observers,
	pub channel_callbacks: HashMap<String, ChannelCallbacks>,
}

struct SessionState {
	data: Negotiator,
	media: Negotiator,
	channels: ChannelRegistry,
	av: MediaManager,
}

impl SessionState {
	fn negotiator(&mut self, kind: ConnectionKind) -> &mut Negotiator {
		match kind {
			ConnectionKind::Data => &mut self.data,
			ConnectionKind::Media => &mut self.media,
		}
	}
}

/// One two-peer session.
pub struct Session {
	config: SessionConfig,
	observers: Observers,
	capture: Arc<dyn MediaCapture>,
	epoch: Epoch,
	state: Mutex<SessionState>,
}

impl Session {
	pub(crate) fn new(parts: SessionParts) -> Arc<Self> {
		let SessionParts {
			config,
			signaling,
			factory,
			capture,
			sink,
			observers,
			channel_callbacks,
		} = parts;

		Arc::new_cyclic(|weak: &Weak<Session>| {
			let epoch = Epoch::new();
			let pump_target = weak.clone();
			let pump: EventPump = Arc::new(move |stream: EventStream| tokio::spawn(run_pump(pump_target.clone(), stream)));
			let ctx = NegotiatorContext {
				factory,
				config: config.rtc_configuration(),
				signaling,
				pump,
				epoch: epoch.clone(),
			};

			let state = SessionState {
				data: Negotiator::new(ConnectionKind::Data, ctx.clone()),
				media: Negotiator::new(ConnectionKind::Media, ctx),
				channels: ChannelRegistry::new(config.datachannels.clone(), channel_callbacks),
				av: MediaManager::new(
					Arc::clone(&capture),
					sink,
					config.video_id_local.clone(),
					config.video_id_remote.clone(),
				),
			};

			Session {
				config,
				observers,
				capture,
				epoch,
				state: Mutex::new(state),
			}
		})
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Current state of one connection kind.
	pub async fn connection_state(&self, kind: ConnectionKind) -> NegotiationState {
		self.state.lock().await.negotiator(kind).state()
	}

	/// Snapshot of local and remote media.
	pub async fn media_state(&self) -> MediaState {
		self.state.lock().await.av.state().clone()
	}

	/// Names of the channels on the current data connection.
	pub async fn channel_names(&self) -> Vec<String> {
		self.state.lock().await.channels.names()
	}

	/// Starts the data connection as offerer, or answers `offer`.
	///
	/// With no offer, fails with [`NegotiationError::InProgress`] while a data
	/// connection is negotiating or open.
	pub async fn connect(&self, offer: Option<SignalingEnvelope>) -> Result<()> {
		let mut state = self.state.lock().await;
		match offer {
			None => {
				if state.data.is_negotiating() || state.data.is_open() {
					return Err(NegotiationError::InProgress(ConnectionKind::Data).into());
				}
				info!("connecting");
				self.open_data(&mut state, None).await
			}
			Some(SignalingEnvelope::ReceiveOffer { connection_type, data }) => {
				info!(kind = %connection_type, "connecting (offer)");
				self.accept_offer(&mut state, connection_type, data).await
			}
			Some(other) => Err(Error::Protocol(format!(
				"connect expects an offer, got {}",
				other.signal_type().as_str()
			))),
		}
	}

	/// Tears the whole session down. Never fails and may be called repeatedly.
	pub async fn disconnect(&self) {
		self.epoch.advance();
		let mut state = self.state.lock().await;
		let state = &mut *state;
		state.channels.close_all();
		state.media.close();
		state.data.close();
		state.av.reset();
		info!("disconnected");
	}

	/// Routes one inbound signaling envelope.
	pub async fn handle_signaling(&self, envelope: SignalingEnvelope) -> Result<()> {
		match envelope {
			offer @ SignalingEnvelope::ReceiveOffer { .. } => self.connect(Some(offer)).await,
			SignalingEnvelope::ReceiveAnswer { connection_type, data } => {
				let mut state = self.state.lock().await;
				state.negotiator(connection_type).apply_answer(data).await
			}
			SignalingEnvelope::ReceiveCandidate { connection_type, data } => {
				let mut state = self.state.lock().await;
				state.negotiator(connection_type).apply_candidate(data).await
			}
		}
	}

	/// Decodes and routes a raw signaling frame. Unknown types are ignored.
	pub async fn handle_signaling_json(&self, text: &str) -> Result<()> {
		let decoded = SignalingEnvelope::from_json(text).inspect_err(|e| warn!(error = %e, "malformed signaling frame"))?;
		match decoded {
			Some(envelope) => self.handle_signaling(envelope).await,
			None => {
				debug!("ignoring signaling message of unknown type");
				Ok(())
			}
		}
	}

	/// Starts or stops local media, or drops the peer's.
	pub async fn media(&self, action: MediaAction, options: MediaOptions) -> Result<()> {
		match action {
			MediaAction::Start => self.start_media(options).await,
			MediaAction::Stop => {
				let mut state = self.state.lock().await;
				self.stop_local_media(&mut state, options.no_reset, !options.no_message, options.voice)
					.await;
				Ok(())
			}
			MediaAction::StopRemote => {
				let mut state = self.state.lock().await;
				state.av.reset_remote(options.no_reset);
				debug!("remote stream reset");
				if !options.no_message {
					self.send_control(&state, ControlMessage::stop_remote(options.voice, options.no_reset))
						.await;
				}
				Ok(())
			}
		}
	}

	/// Sends `message` as JSON on `channel`.
	pub async fn send(&self, channel: &str, message: &Value) -> Result<()> {
		let text = serde_json::to_string(message)?;
		let state = self.state.lock().await;
		state.channels.send_text(channel, text).await
	}

	/// Whether `channel` (default [`DEFAULT_CHANNEL`]) is open on the data
	/// connection.
	pub async fn check_connection(&self, channel: Option<&str>) -> bool {
		let state = self.state.lock().await;
		state.data.has_transport() && state.channels.is_open(channel.unwrap_or(DEFAULT_CHANNEL))
	}

	/// Adds an application channel to the live data connection.
	pub async fn add_channel(&self, name: &str, callbacks: ChannelCallbacks, binary_type: BinaryType) -> Result<()> {
		let mut state = self.state.lock().await;
		let transport = state.data.transport();
		state.channels.add(transport.as_ref(), name, callbacks, binary_type).await
	}

	pub async fn remove_channel(&self, name: &str) -> Result<()> {
		if name == DEFAULT_CHANNEL {
			return Err(ChannelError::Reserved(name.to_string()).into());
		}
		self.state.lock().await.channels.remove(name)
	}

	async fn open_data(&self, state: &mut SessionState, remote: Option<SessionDescription>) -> Result<()> {
		let ticket = self.epoch.current();
		let role = if remote.is_some() { Role::Answering } else { Role::Offering };
		let transport = state.data.prepare(role, None)?;
		state.channels.open_all(&transport).await?;
		self.ensure_live(ticket)?;
		match remote {
			None => state.data.offer().await,
			Some(remote) => state.data.answer(remote).await,
		}
	}

	async fn accept_offer(&self, state: &mut SessionState, kind: ConnectionKind, remote: SessionDescription) -> Result<()> {
		let negotiator = state.negotiator(kind);
		if negotiator.state() == NegotiationState::Negotiating(Role::Offering) {
			// Glare: the offer whose text sorts higher wins on both sides.
			if let Some(ours) = negotiator.local_description() {
				if ours.sdp > remote.sdp {
					info!(%kind, "glare, keeping our offer");
					return Ok(());
				}
			}
			info!(%kind, "glare, yielding to remote offer");
		}
		match kind {
			ConnectionKind::Data => self.open_data(state, Some(remote)).await,
			ConnectionKind::Media => {
				let local = state.av.local_stream().cloned();
				state.media.begin_as_answerer(remote, local.as_ref()).await
			}
		}
	}

	async fn start_media(&self, options: MediaOptions) -> Result<()> {
		let ticket = self.epoch.current();
		let stream = self
			.capture
			.acquire(MediaConstraints::from_options(&options))
			.await
			.inspect_err(|e| warn!(error = %e, "media capture failed"))?;

		let mut state = self.state.lock().await;
		if !self.epoch.is_current(ticket) {
			state.av.discard(&stream);
			return Err(Error::Cancelled);
		}
		state.av.activate_local(stream.clone());
		info!(stream = stream.id(), voice = options.voice, "local media started");

		if state.media.is_open() {
			state.media.attach_stream(&stream)?;
		} else {
			state.media.begin_as_offerer(Some(&stream)).await?;
		}
		self.send_control(&state, ControlMessage::start(options.voice)).await;
		Ok(())
	}

	async fn stop_local_media(&self, state: &mut SessionState, no_reset: bool, notify: bool, voice: bool) {
		if let Some(stream) = state.av.local_stream().cloned() {
			state.media.detach_stream(&stream);
		}
		if !state.av.stop_local(no_reset) {
			debug!("media stop without local stream");
			return;
		}
		info!("local media stopped");
		if notify {
			self.send_control(state, ControlMessage::stop(voice, no_reset)).await;
		}
	}

	/// Best effort: the peer simply misses the message when the control
	/// channel is not open.
	async fn send_control(&self, state: &SessionState, message: ControlMessage) {
		if !state.channels.is_open(DEFAULT_CHANNEL) {
			debug!(message = message.type_name(), "control channel not open, message skipped");
			return;
		}
		let text = match ControlEnvelope::new(message).to_json() {
			Ok(text) => text,
			Err(e) => {
				warn!(error = %e, "failed to encode control message");
				return;
			}
		};
		match state.channels.send_text(DEFAULT_CHANNEL, text).await {
			Ok(()) => debug!(message = message.type_name(), "control message sent"),
			Err(e) => warn!(message = message.type_name(), error = %e, "failed to send control message"),
		}
	}

	async fn on_transport_event(&self, kind: ConnectionKind, generation: u64, event: TransportEvent) {
		let mut guard = self.state.lock().await;
		let state = &mut *guard;
		if !state.negotiator(kind).accepts(generation) {
			trace!(%kind, generation, ?event, "dropping event from stale transport");
			return;
		}

		match event {
			TransportEvent::IceCandidate(candidate) => state.negotiator(kind).on_local_candidate(candidate),
			TransportEvent::DataChannel(channel) => {
				if kind == ConnectionKind::Data && state.channels.announce(channel) {
					self.offer_media_if_active(state).await;
				}
			}
			TransportEvent::ChannelOpen { label } if label == DEFAULT_CHANNEL => {
				info!("control channel open");
				state.data.mark_open();
				self.observers.connected();
			}
			TransportEvent::ChannelOpen { label } => state.channels.opened(&label),
			TransportEvent::ChannelMessage { label, data } if label == DEFAULT_CHANNEL => {
				self.on_control(state, &data).await;
			}
			TransportEvent::ChannelMessage { label, data } => state.channels.message(&label, &data),
			TransportEvent::ChannelError { label, error } => state.channels.errored(&label, &error),
			TransportEvent::ChannelClose { label } => state.channels.closed(&label),
			TransportEvent::RemoteStream(stream) => self.on_remote_stream(state, kind, stream),
			TransportEvent::StateChanged(transport_state) => match transport_state {
				// One-way media never sees a remote stream on the sending side.
				TransportState::Connected if kind == ConnectionKind::Media => {
					state.media.mark_open();
				}
				TransportState::Disconnected | TransportState::Failed => {
					warn!(%kind, state = ?transport_state, "transport lost its peer")
				}
				_ => debug!(%kind, state = ?transport_state, "transport state changed"),
			},
		}
	}

	async fn offer_media_if_active(&self, state: &mut SessionState) {
		let Some(stream) = state.av.local_stream().cloned() else {
			return;
		};
		if state.media.is_open() {
			return;
		}
		info!("peer connected while local media is active, offering media");
		if let Err(e) = state.media.begin_as_offerer(Some(&stream)).await {
			warn!(error = %e, "automatic media offer failed");
		}
	}

	fn on_remote_stream(&self, state: &mut SessionState, kind: ConnectionKind, stream: MediaStream) {
		if kind != ConnectionKind::Media {
			debug!(%kind, stream = stream.id(), "ignoring stream on non-media connection");
			return;
		}
		if state.av.attach_remote(stream) {
			info!("remote media attached");
		}
		state.media.mark_open();
	}

	async fn on_control(&self, state: &mut SessionState, data: &str) {
		let envelope = match ControlEnvelope::from_json(data) {
			Ok(Some(envelope)) => envelope,
			Ok(None) => {
				debug!("ignoring unknown control message");
				return;
			}
			Err(e) => {
				warn!(error = %e, "dropping malformed control message");
				return;
			}
		};
		debug!(message = envelope.message.type_name(), "control message received");

		match envelope.message {
			ControlMessage::MediaStreamStart { .. } => self.observers.media_stream_connected(),
			message @ ControlMessage::MediaStreamStop { .. } => {
				state.av.reset_remote(message.no_reset());
				self.observers.media_stream_removed();
			}
			message @ ControlMessage::MediaStreamStopRemote { .. } => {
				self.stop_local_media(state, message.no_reset(), false, false).await;
				self.observers.media_stream_remote_removed();
			}
		}
	}

	fn ensure_live(&self, ticket: u64) -> Result<()> {
		if self.epoch.is_current(ticket) {
			Ok(())
		} else {
			Err(Error::Cancelled)
		}
	}
}

async fn run_pump(session: Weak<Session>, mut stream: EventStream) {
	while let Some(event) = stream.receiver.recv().await {
		let Some(session) = session.upgrade() else {
			break;
		};
		session.on_transport_event(stream.kind, stream.generation, event).await;
	}
	trace!(kind = %stream.kind, generation = stream.generation, "event pump finished");
}
