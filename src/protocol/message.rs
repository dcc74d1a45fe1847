//! Protocol message types

use super::constants::{column_flag, column_type};
use bytes::Bytes;

/// Command sent by the client (payload only, framing is added by the session)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Close the session
    Quit,
    /// Select the default database, in the session encoding
    InitDb(Bytes),
    /// Text query, in the session encoding
    Query(Bytes),
    /// Column list of a table (deprecated by servers but still served)
    FieldList {
        /// Table name
        table: String,
        /// Column wildcard
        wildcard: String,
    },
    /// Server shutdown
    Shutdown,
    /// Server statistics string
    Statistics,
    /// Liveness check
    Ping,
    /// Re-authenticate on the same connection
    ChangeUser(ChangeUser),
    /// Reset session state without re-authenticating
    ResetConnection,
    /// Toggle a server option
    SetOption(u16),
    /// Prepare a statement server-side; SQL in the session encoding
    StmtPrepare(Bytes),
    /// Execute a prepared statement; `body` follows the statement id
    StmtExecute {
        /// Statement identifier
        statement_id: u32,
        /// Flags, iteration count, null bitmap, types and values
        body: Bytes,
    },
    /// Execute a prepared statement for many parameter rows (MariaDB)
    StmtBulkExecute {
        /// Statement identifier
        statement_id: u32,
        /// Bulk flags, types and indicator-prefixed values
        body: Bytes,
    },
    /// Upload one chunk of a long parameter
    StmtSendLongData {
        /// Statement identifier
        statement_id: u32,
        /// 0-based parameter index
        param_id: u16,
        /// Chunk bytes
        data: Bytes,
    },
    /// Release a prepared statement (no server response)
    StmtClose(u32),
    /// Discard long data and cursors of a prepared statement
    StmtReset(u32),
    /// SSL request, sent in place of the handshake response before TLS upgrade
    SslRequest {
        /// Requested capabilities
        capabilities: u64,
        /// Max packet size announced to the server
        max_packet_size: u32,
        /// Requested collation
        charset: u8,
    },
    /// Handshake response
    HandshakeResponse(HandshakeResponse),
    /// Raw authentication data during a plugin exchange
    AuthData(Bytes),
}

impl FrontendMessage {
    /// Metric label for this command
    pub fn label(&self) -> &'static str {
        match self {
            FrontendMessage::Quit => "quit",
            FrontendMessage::InitDb(_) => "init_db",
            FrontendMessage::Query(_) => "query",
            FrontendMessage::FieldList { .. } => "field_list",
            FrontendMessage::Shutdown => "shutdown",
            FrontendMessage::Statistics => "statistics",
            FrontendMessage::Ping => "ping",
            FrontendMessage::ChangeUser(_) => "change_user",
            FrontendMessage::ResetConnection => "reset_connection",
            FrontendMessage::SetOption(_) => "set_option",
            FrontendMessage::StmtPrepare(_) => "stmt_prepare",
            FrontendMessage::StmtExecute { .. } => "stmt_execute",
            FrontendMessage::StmtBulkExecute { .. } => "stmt_bulk_execute",
            FrontendMessage::StmtSendLongData { .. } => "stmt_send_long_data",
            FrontendMessage::StmtClose(_) => "stmt_close",
            FrontendMessage::StmtReset(_) => "stmt_reset",
            FrontendMessage::SslRequest { .. } => "ssl_request",
            FrontendMessage::HandshakeResponse(_) => "handshake_response",
            FrontendMessage::AuthData(_) => "auth_data",
        }
    }
}

/// Handshake response fields
#[derive(Debug, Clone, Default)]
pub struct HandshakeResponse {
    /// Requested capabilities (MariaDB extended bits in the upper half)
    pub capabilities: u64,
    /// Max packet size announced to the server
    pub max_packet_size: u32,
    /// Requested collation
    pub charset: u8,
    /// User name
    pub user: String,
    /// Initial authentication response
    pub auth_response: Vec<u8>,
    /// Initial database
    pub database: Option<String>,
    /// Plugin that produced `auth_response`
    pub plugin: String,
    /// Connection attributes
    pub attributes: Vec<(String, String)>,
}

/// COM_CHANGE_USER fields
#[derive(Debug, Clone, Default)]
pub struct ChangeUser {
    /// Negotiated capabilities, selects field encodings
    pub capabilities: u64,
    /// New user
    pub user: String,
    /// Authentication response for the current seed
    pub auth_response: Vec<u8>,
    /// New default database
    pub database: Option<String>,
    /// Collation
    pub charset: u8,
    /// Plugin that produced `auth_response`
    pub plugin: String,
    /// Connection attributes
    pub attributes: Vec<(String, String)>,
}

/// Initial handshake (server greeting)
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    /// Protocol version (10)
    pub protocol_version: u8,
    /// Server version string
    pub server_version: String,
    /// Server-side connection (thread) id
    pub connection_id: u32,
    /// Authentication seed
    pub seed: Vec<u8>,
    /// Server capabilities, MariaDB extended bits in the upper half
    pub capabilities: u64,
    /// Server default collation
    pub charset: u8,
    /// Status flags
    pub status_flags: u16,
    /// Default authentication plugin
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    /// MariaDB servers prefix their version with `5.5.5-` or include "MariaDB"
    pub fn is_mariadb(&self) -> bool {
        self.server_version.contains("MariaDB")
    }
}

/// OK packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Rows affected by the statement
    pub affected_rows: u64,
    /// Last AUTO_INCREMENT value
    pub last_insert_id: u64,
    /// Status flags
    pub status_flags: u16,
    /// Warning count
    pub warnings: u16,
    /// Human readable info
    pub info: String,
}

/// Error packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Error number
    pub code: u16,
    /// SQLSTATE (HY000 when absent)
    pub sql_state: String,
    /// Message
    pub message: String,
}

impl std::fmt::Display for ErrPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.sql_state, self.message)
    }
}

impl From<ErrPacket> for crate::Error {
    fn from(err: ErrPacket) -> Self {
        crate::Error::Server {
            code: err.code,
            sql_state: err.sql_state,
            message: err.message,
        }
    }
}

/// EOF packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    /// Warning count
    pub warnings: u16,
    /// Status flags
    pub status_flags: u16,
}

/// Column definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Schema of the source table
    pub schema: String,
    /// Table alias
    pub table: String,
    /// Physical table name
    pub org_table: String,
    /// Column alias
    pub name: String,
    /// Physical column name
    pub org_name: String,
    /// Collation id
    pub character_set: u16,
    /// Maximum display length
    pub column_length: u32,
    /// Column type code
    pub column_type: u8,
    /// Column flags
    pub flags: u16,
    /// Decimal digits
    pub decimals: u8,
}

impl ColumnDefinition {
    /// UNSIGNED flag set
    pub fn is_unsigned(&self) -> bool {
        self.flags & column_flag::UNSIGNED != 0
    }

    /// Numeric column types
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.column_type,
            column_type::DECIMAL
                | column_type::NEWDECIMAL
                | column_type::TINY
                | column_type::SHORT
                | column_type::LONG
                | column_type::INT24
                | column_type::LONGLONG
                | column_type::FLOAT
                | column_type::DOUBLE
                | column_type::YEAR
        )
    }
}

/// Authentication plugin switch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    /// Plugin the server wants
    pub plugin_name: String,
    /// Fresh challenge data
    pub data: Vec<u8>,
}

/// Response to COM_STMT_PREPARE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOk {
    /// Statement identifier
    pub statement_id: u32,
    /// Result columns
    pub num_columns: u16,
    /// Parameters
    pub num_params: u16,
    /// Warning count
    pub warnings: u16,
}

/// First response to a command, by discriminator
#[derive(Debug, Clone)]
pub enum CommandResponse {
    /// OK (or EOF-as-OK)
    Ok(OkPacket),
    /// Error
    Err(ErrPacket),
    /// Server requests the contents of a local file
    LocalInfile {
        /// File name from the LOAD DATA LOCAL statement
        filename: String,
    },
    /// Result set follows with this many columns
    ResultSet {
        /// Column count
        column_count: u64,
    },
}
