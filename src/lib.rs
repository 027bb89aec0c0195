#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

//! panel-console library — the real-time console transport for a game-server
//! panel client.
//!
//! - `provisioner` — fetches single-use console credentials from the panel
//! - `transport` — WebSocket text-frame pipe to the daemon
//! - `session` — connection lifecycle, auth handshake, auto-reconnect
//! - `reassembly` — turns output chunks into lines
//! - `ansi` — strips terminal escape sequences
//! - `protocol` — daemon frame encoding and decoding
//! - `scrollback` — bounded line store for a console view
//! - `config` — configuration loading

pub mod ansi;
pub mod config;
pub mod error;
pub mod protocol;
pub mod provisioner;
pub mod reassembly;
pub mod scrollback;
pub mod session;
pub mod transport;

pub use error::{ConfigError, ProvisionError, SessionFault, TransportError};
pub use provisioner::{ConnectionCredential, CredentialSource, TokenProvisioner};
pub use reassembly::LineReassembler;
pub use session::{ConsoleEvent, ConsoleSession, SessionOptions, SessionState};
pub use transport::{Connector, TransportHandle, WsConnector};
