pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fsm;
pub mod health;
pub mod listener;
pub mod policy;
pub mod sfu;
pub mod socket;
pub mod state;
pub mod state_service;
pub mod token;
pub mod transport;

pub use codec::{Inbound, WireCodec};
pub use config::ConnectionConfig;
pub use coordinator::CoordinatorConnection;
pub use error::{DisconnectCause, ErrorCode, NetworkError, SocketError};
pub use sfu::SfuConnection;
pub use state::{ConnectionKind, DisconnectReason, RestartReason, SocketState, StateEvent};
