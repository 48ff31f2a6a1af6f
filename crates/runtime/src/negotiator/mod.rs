//! Offer/answer state machine for one connection kind.
//!
//! A [`Negotiator`] owns at most one [`PeerTransport`] and drives it through
//!
//! ```text
//! Idle -> Negotiating(Offering | Answering) -> Open -> Closed
//! ```
//!
//! It handles:
//! - Creating the transport and the event pump that feeds its events back
//! - Emitting offer, answer and candidate envelopes in order
//! - Queueing remote candidates until the remote description is applied
//! - Holding local candidates until our own description has been emitted
//!
//! # Ordering
//!
//! Every operation takes `&mut self` and is expected to run under the owning
//! session's lock, so at most one operation per kind is in flight. A new
//! transport always supersedes the previous one: its pump is aborted and the
//! generation counter moves on, so events still queued for the old transport
//! are recognized as stale.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use duo_protocol::{ConnectionKind, IceCandidate, OfferOptions, RtcConfiguration, SessionDescription, SignalingEnvelope};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, NegotiationError, Result};
use crate::transport::{MediaStream, PeerTransport, PeerTransportFactory, SendSignaling, TransportEvent};


/// Upper bound on remote candidates held without a remote description.
/// The oldest are dropped first.
pub const MAX_EARLY_CANDIDATES: usize = 32;

/// Which side of the offer/answer exchange we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Offering,
	Answering,
}

/// Lifecycle of one connection kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
	Idle,
	Negotiating(Role),
	Open,
	Closed,
}

impl fmt::Display for NegotiationState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NegotiationState::Idle => f.write_str("idle"),
			NegotiationState::Negotiating(Role::Offering) => f.write_str("offering"),
			NegotiationState::Negotiating(Role::Answering) => f.write_str("answering"),
			NegotiationState::Open => f.write_str("open"),
			NegotiationState::Closed => f.write_str("closed"),
		}
	}
}

/// Session-wide cancellation counter.
///
/// `disconnect` advances it before taking the session lock; an operation that
/// observes a different value after an await drops its result.
#[derive(Debug, Clone, Default)]
pub struct Epoch(Arc<AtomicU64>);

impl Epoch {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn current(&self) -> u64 {
		self.0.load(Ordering::SeqCst)
	}

	pub fn advance(&self) -> u64 {
		self.0.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub fn is_current(&self, ticket: u64) -> bool {
		self.current() == ticket
	}
}

/// Events of one transport, tagged with the generation that created it.
pub struct EventStream {
	pub kind: ConnectionKind,
	pub generation: u64,
	pub receiver: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Spawns the task draining an [`EventStream`].
pub type EventPump = Arc<dyn Fn(EventStream) -> JoinHandle<()> + Send + Sync>;

/// Collaborators shared by both negotiators of a session.
#[derive(Clone)]
pub struct NegotiatorContext {
	pub factory: Arc<dyn PeerTransportFactory>,
	pub config: RtcConfiguration,
	pub signaling: SendSignaling,
	pub pump: EventPump,
	pub epoch: Epoch,
}

/// Offer/answer driver for one [`ConnectionKind`].
pub struct Negotiator {
	kind: ConnectionKind,
	ctx: NegotiatorContext,
	state: NegotiationState,
	transport: Option<Arc<dyn PeerTransport>>,
	generation: u64,
	pump: Option<JoinHandle<()>>,
	/// Remote description applied to the current transport.
	remote_applied: bool,
	/// Our offer/answer envelope has been emitted.
	local_emitted: bool,
	/// Description we applied locally on the current transport.
	local: Option<SessionDescription>,
	/// Remote candidates waiting for the remote description.
	inbound: Vec<IceCandidate>,
	/// Local candidates waiting for our description to be emitted.
	outbound: Vec<IceCandidate>,
}

impl Negotiator {
	pub fn new(kind: ConnectionKind, ctx: NegotiatorContext) -> Self {
		Self {
			kind,
			ctx,
			state: NegotiationState::Idle,
			transport: None,
			generation: 0,
			pump: None,
			remote_applied: false,
			local_emitted: false,
			local: None,
			inbound: Vec::new(),
			outbound: Vec::new(),
		}
	}

	pub fn kind(&self) -> ConnectionKind {
		self.kind
	}

	pub fn state(&self) -> NegotiationState {
		self.state
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn transport(&self) -> Option<Arc<dyn PeerTransport>> {
		self.transport.clone()
	}

	pub fn has_transport(&self) -> bool {
		self.transport.is_some()
	}

	pub fn is_open(&self) -> bool {
		self.state == NegotiationState::Open
	}

	pub fn is_negotiating(&self) -> bool {
		matches!(self.state, NegotiationState::Negotiating(_))
	}

	/// Our offer or answer on the current transport, once applied.
	pub fn local_description(&self) -> Option<&SessionDescription> {
		self.local.as_ref()
	}

	/// Number of remote candidates waiting for the remote description.
	pub fn queued_candidates(&self) -> usize {
		self.inbound.len()
	}

	/// Whether an event tagged with `generation` belongs to the live transport.
	pub fn accepts(&self, generation: u64) -> bool {
		self.transport.is_some() && generation == self.generation
	}

	/// Starts the exchange as the offering side.
	///
	/// Supersedes any transport of this kind. Rejections are logged and
	/// returned; the kind then stays `Negotiating` until closed.
	pub async fn begin_as_offerer(&mut self, local_stream: Option<&MediaStream>) -> Result<()> {
		self.prepare(Role::Offering, local_stream)?;
		self.offer().await
	}

	/// Starts the exchange as the answering side of `remote`.
	pub async fn begin_as_answerer(
		&mut self,
		remote: SessionDescription,
		local_stream: Option<&MediaStream>,
	) -> Result<()> {
		self.prepare(Role::Answering, local_stream)?;
		self.answer(remote).await
	}

	/// Replaces the transport of this kind with a fresh one and enters
	/// `Negotiating(role)`.
	///
	/// Callers that need channels on the transport before the description is
	/// generated create them between `prepare` and [`offer`](Self::offer) /
	/// [`answer`](Self::answer).
	pub fn prepare(&mut self, role: Role, local_stream: Option<&MediaStream>) -> Result<Arc<dyn PeerTransport>> {
		let early = std::mem::take(&mut self.inbound);
		self.close();
		if role == Role::Answering {
			self.inbound = early;
		}

		let (tx, rx) = mpsc::unbounded_channel();
		let transport = self.ctx.factory.create(self.kind, &self.ctx.config, tx)?;
		if let Some(stream) = local_stream {
			transport.add_stream(stream)?;
			debug!(kind = %self.kind, stream = stream.id(), "local stream added");
		}

		self.pump = Some((self.ctx.pump)(EventStream {
			kind: self.kind,
			generation: self.generation,
			receiver: rx,
		}));
		self.transport = Some(Arc::clone(&transport));
		self.state = NegotiationState::Negotiating(role);
		debug!(kind = %self.kind, generation = self.generation, ?role, "transport created");
		Ok(transport)
	}

	/// Generates, applies and emits our offer on the prepared transport.
	pub async fn offer(&mut self) -> Result<()> {
		let transport = self.prepared(Role::Offering, "send offer")?;
		let ticket = self.ctx.epoch.current();

		let offer = transport
			.create_offer(OfferOptions::for_kind(self.kind))
			.await
			.map_err(|e| self.rejected("create offer", e))?;
		self.ensure_live(ticket)?;

		transport
			.set_local_description(offer.clone())
			.await
			.map_err(|e| self.rejected("set local offer", e))?;
		self.ensure_live(ticket)?;

		self.local = Some(offer.clone());
		self.emit(SignalingEnvelope::offer(self.kind, offer));
		info!(kind = %self.kind, generation = self.generation, "offer sent");
		self.release_local_candidates();
		Ok(())
	}

	/// Applies `remote`, then generates, applies and emits our answer.
	///
	/// Remote candidates that arrived before the offer are applied right
	/// after the offer itself.
	pub async fn answer(&mut self, remote: SessionDescription) -> Result<()> {
		let transport = self.prepared(Role::Answering, "send answer")?;
		let ticket = self.ctx.epoch.current();
		debug!(kind = %self.kind, "offer received");

		transport
			.set_remote_description(remote)
			.await
			.map_err(|e| self.rejected("set remote offer", e))?;
		self.ensure_live(ticket)?;
		self.remote_applied = true;
		self.flush_inbound(&transport, ticket).await?;

		let answer = transport
			.create_answer(OfferOptions::for_kind(self.kind))
			.await
			.map_err(|e| self.rejected("create answer", e))?;
		self.ensure_live(ticket)?;

		transport
			.set_local_description(answer.clone())
			.await
			.map_err(|e| self.rejected("set local answer", e))?;
		self.ensure_live(ticket)?;

		self.local = Some(answer.clone());
		self.emit(SignalingEnvelope::answer(self.kind, answer));
		info!(kind = %self.kind, generation = self.generation, "answer sent");
		self.release_local_candidates();
		Ok(())
	}

	/// Applies the peer's answer to our pending offer.
	pub async fn apply_answer(&mut self, remote: SessionDescription) -> Result<()> {
		if self.state != NegotiationState::Negotiating(Role::Offering) {
			return Err(self.invalid_state("apply answer"));
		}
		let Some(transport) = self.transport.clone() else {
			return Err(self.invalid_state("apply answer"));
		};
		let ticket = self.ctx.epoch.current();
		debug!(kind = %self.kind, "answer received");

		transport
			.set_remote_description(remote)
			.await
			.map_err(|e| self.rejected("set remote answer", e))?;
		self.ensure_live(ticket)?;
		self.remote_applied = true;
		self.flush_inbound(&transport, ticket).await
	}

	/// Hands a peer candidate to the transport, or queues it until the remote
	/// description is in place.
	pub async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
		let transport = match (&self.transport, self.remote_applied) {
			(Some(transport), true) => Arc::clone(transport),
			_ => {
				debug!(kind = %self.kind, state = %self.state, "queueing early candidate");
				if self.inbound.len() == MAX_EARLY_CANDIDATES {
					warn!(kind = %self.kind, limit = MAX_EARLY_CANDIDATES, "early candidate queue full, dropping oldest");
					self.inbound.remove(0);
				}
				self.inbound.push(candidate);
				return Ok(());
			}
		};
		transport
			.add_ice_candidate(candidate)
			.await
			.map_err(|e| Error::Transport(format!("{} candidate rejected: {e}", self.kind)))
	}

	/// Called for every locally gathered candidate.
	pub fn on_local_candidate(&mut self, candidate: Option<IceCandidate>) {
		let Some(candidate) = candidate else {
			debug!(kind = %self.kind, "candidate gathering complete");
			return;
		};
		if self.local_emitted {
			self.emit(SignalingEnvelope::candidate(self.kind, candidate));
		} else {
			self.outbound.push(candidate);
		}
	}

	/// Moves a negotiating kind to `Open`. Returns true on the transition.
	pub fn mark_open(&mut self) -> bool {
		if !self.is_negotiating() {
			return false;
		}
		self.state = NegotiationState::Open;
		info!(kind = %self.kind, generation = self.generation, "connection open");
		true
	}

	pub fn attach_stream(&self, stream: &MediaStream) -> Result<()> {
		match &self.transport {
			Some(transport) => transport.add_stream(stream),
			None => Ok(()),
		}
	}

	pub fn detach_stream(&self, stream: &MediaStream) {
		if let Some(transport) = &self.transport {
			transport.remove_stream(stream);
		}
	}

	/// Releases the transport. Safe to call in any state.
	pub fn close(&mut self) {
		if let Some(pump) = self.pump.take() {
			pump.abort();
		}
		if let Some(transport) = self.transport.take() {
			transport.close();
			info!(kind = %self.kind, generation = self.generation, "connection closed");
		}
		if self.state != NegotiationState::Idle {
			self.state = NegotiationState::Closed;
		}
		self.generation += 1;
		self.remote_applied = false;
		self.local_emitted = false;
		self.local = None;
		self.inbound.clear();
		self.outbound.clear();
	}

	fn prepared(&self, role: Role, operation: &'static str) -> Result<Arc<dyn PeerTransport>> {
		match (&self.transport, self.state) {
			(Some(transport), NegotiationState::Negotiating(r)) if r == role && !self.local_emitted => {
				Ok(Arc::clone(transport))
			}
			_ => Err(self.invalid_state(operation)),
		}
	}

	async fn flush_inbound(&mut self, transport: &Arc<dyn PeerTransport>, ticket: u64) -> Result<()> {
		let queued = std::mem::take(&mut self.inbound);
		if !queued.is_empty() {
			debug!(kind = %self.kind, count = queued.len(), "applying queued candidates");
		}
		for candidate in queued {
			if let Err(e) = transport.add_ice_candidate(candidate).await {
				warn!(kind = %self.kind, error = %e, "queued candidate rejected");
			}
			self.ensure_live(ticket)?;
		}
		Ok(())
	}

	fn release_local_candidates(&mut self) {
		self.local_emitted = true;
		for candidate in std::mem::take(&mut self.outbound) {
			self.emit(SignalingEnvelope::candidate(self.kind, candidate));
		}
	}

	fn emit(&self, envelope: SignalingEnvelope) {
		(self.ctx.signaling)(envelope);
	}

	fn ensure_live(&self, ticket: u64) -> Result<()> {
		if self.ctx.epoch.is_current(ticket) {
			Ok(())
		} else {
			debug!(kind = %self.kind, "discarding completion after disconnect");
			Err(Error::Cancelled)
		}
	}

	fn rejected(&self, step: &str, err: Error) -> Error {
		warn!(kind = %self.kind, step, error = %err, "negotiation rejected");
		NegotiationError::Rejected {
			kind: self.kind,
			reason: format!("{step}: {err}"),
		}
		.into()
	}

	fn invalid_state(&self, operation: &'static str) -> Error {
		NegotiationError::InvalidState {
			kind: self.kind,
			operation,
			state: self.state.to_string(),
		}
		.into()
	}
}

impl Drop for Negotiator {
	fn drop(&mut self) {
		if let Some(pump) = self.pump.take() {
			pump.abort();
		}
	}
}
