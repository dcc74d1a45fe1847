//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS over TCP, Unix socket)
//! * Session lifecycle (handshake, authentication, command execution)
//! * State machine enforcement
//! * TLS configuration and result delivery

mod config;
mod result;
mod session;
mod state;
mod tls;
mod transport;

pub use config::{
    CharacterEncoding, ConnectionConfig, ConnectionConfigBuilder, DEFAULT_LONG_DATA_THRESHOLD,
    DEFAULT_PORT,
};
pub(crate) use config::{latin1_byte, parse_bool};
pub(crate) use result::DiscardRows;
pub use result::{QueryResult, ResultSink, Row};
pub use session::{AbortHandle, ServerInfo, Session, StatementMetadata};
pub use state::ConnectionState;
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
