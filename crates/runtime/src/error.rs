//! Error types for duo-rtc sessions.

use duo_protocol::ConnectionKind;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a session could not be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigurationError {
	/// The configuration, the signaling callback, or a collaborator is missing.
	#[error("Parameters not set")]
	ParametersNotSet,
	/// The configuration lacks a render surface id or an observer callback.
	#[error("Parameters not correctly set")]
	ParametersIncomplete,
}

/// Failure of a data-channel operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
	/// No channel with that name is registered.
	#[error("Datachannel not found: {0}")]
	NotFound(String),
	/// The channel exists but its transport channel is not open.
	#[error("Datachannel not open: {0}")]
	NotOpen(String),
	/// Channels can only be added once a data connection exists.
	#[error("No data connection")]
	NoDataConnection,
	/// The channel name is reserved for internal use.
	#[error("Datachannel name is reserved: {0}")]
	Reserved(String),
}

/// Failure while driving offer/answer for one connection kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
	/// The peer transport rejected description generation or application.
	#[error("{kind} negotiation rejected: {reason}")]
	Rejected { kind: ConnectionKind, reason: String },
	/// The operation is not valid in the current state of the kind.
	#[error("{kind} connection cannot {operation} while {state}")]
	InvalidState {
		kind: ConnectionKind,
		operation: &'static str,
		state: String,
	},
	/// A negotiation for the kind is already in flight or established.
	#[error("{0} connection is already negotiating or open")]
	InProgress(ConnectionKind),
}

/// Errors surfaced by a session.
#[derive(Debug, Error)]
pub enum Error {
	#[error("Configuration error: {0}")]
	Configuration(#[from] ConfigurationError),

	#[error("Channel error: {0}")]
	Channel(#[from] ChannelError),

	#[error("Negotiation failure: {0}")]
	Negotiation(#[from] NegotiationError),

	/// Camera/microphone denied or unavailable.
	#[error("Capture failure: {0}")]
	Capture(String),

	/// The peer transport failed outside of negotiation.
	#[error("Transport error: {0}")]
	Transport(String),

	/// A malformed wire message.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// The session was disconnected while the operation was in flight.
	#[error("Operation cancelled by disconnect")]
	Cancelled,

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns the configuration reason if this is a construction error.
	pub fn configuration(&self) -> Option<ConfigurationError> {
		match self {
			Error::Configuration(reason) => Some(*reason),
			_ => None,
		}
	}

	/// Returns the channel error if this is a channel failure.
	pub fn channel(&self) -> Option<&ChannelError> {
		match self {
			Error::Channel(err) => Some(err),
			_ => None,
		}
	}

	/// Returns true if the failure does not affect the session.
	pub fn is_recoverable(&self) -> bool {
		!matches!(self, Error::Configuration(_))
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Error::Cancelled)
	}
}
