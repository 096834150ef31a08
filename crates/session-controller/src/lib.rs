//! Teleconsult Session Controller Library
//!
//! Orchestrates one live audio/video session between a client and a
//! therapist over a third-party real-time transport:
//!
//! - Connection state machine with join/leave/dispose lifecycle
//! - Bounded exponential-backoff reconnection after abnormal disconnects
//! - Local camera/microphone track lifecycle, tolerant of missing hardware
//! - Multi-subscriber state broadcasting with per-observer fault isolation
//!
//! # Architecture
//!
//! ```text
//! SessionController (one per active call)
//! ├── TokenSource          credential for (channel, uid)
//! ├── RtcTransport         opaque channel client, events via mpsc
//! ├── MediaTrackManager    at most one track per media kind
//! │   └── DeviceProbe      fresh device snapshot per operation
//! ├── ReconnectionManager  attempt counter + cancellable timer
//! └── StateBroadcaster     callbacks + watch channel
//! ```
//!
//! Transport events are drained in order by a single event-pump task per
//! controller. Join, leave and reconnection attempts are serialized by an
//! operation lock; `leave`/`dispose` bump a session epoch so an in-flight
//! join detects it was abandoned and cleans up instead of connecting.
//!
//! # Modules
//!
//! - [`controller`] - `SessionController`, the public entry point
//! - [`config`] - Session and controller configuration
//! - [`errors`] - Error taxonomy surfaced to callers
//! - [`state`] - Observable session state
//! - [`broadcaster`] - State fan-out to observers
//! - [`devices`] - Device probing and media capability traits
//! - [`tracks`] - Local track management
//! - [`token`] - Credential acquisition
//! - [`transport`] - Real-time transport capability
//! - [`reconnect`] - Reconnection policy and retry state
//! - [`observability`] - Metrics

pub mod broadcaster;
pub mod config;
pub mod controller;
pub mod devices;
pub mod errors;
pub mod observability;
pub mod reconnect;
pub mod state;
pub mod token;
pub mod tracks;
pub mod transport;

// Re-export primary types
pub use broadcaster::{StateBroadcaster, Subscription};
pub use config::{ControllerConfig, ParticipantRole, SessionConfig};
pub use controller::SessionController;
pub use devices::{DeviceInfo, DeviceProbe, DeviceSnapshot, LocalTrack, MediaDevices, MediaError, MediaKind};
pub use errors::SessionError;
pub use reconnect::{ReconnectionManager, RetryPolicy};
pub use state::{ConnectionStatus, RemoteParticipant, SessionState};
pub use token::{HttpTokenProvider, IdentityProvider, TokenError, TokenSource};
pub use tracks::{MediaTrackManager, PublishedMedia};
pub use transport::{
    DisconnectReason, NoopTransportFactory, RtcTransport, TransportConnectionState, TransportError,
    TransportEvent, TransportFactory,
};
