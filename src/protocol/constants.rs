//! MariaDB/MySQL protocol constants

/// Only protocol version 10 handshakes are accepted
pub const PROTOCOL_VERSION: u8 = 10;

/// Packet header size: 3-byte little-endian length + 1-byte sequence
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single physical packet can carry (2^24 - 1)
pub const MAX_PACKET_PAYLOAD: usize = 0xFF_FFFF;

/// Default `max_allowed_packet` assumed when none is configured (16 MiB)
pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 16 * 1024 * 1024;

/// utf8mb4_general_ci, requested in the handshake response
pub const UTF8MB4_GENERAL_CI: u8 = 45;

/// Capability flags (lower 32 bits)
pub mod capability {
    pub const CLIENT_MYSQL: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 2;
    pub const CLIENT_LONG_FLAG: u32 = 4;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 8;
    pub const CLIENT_COMPRESS: u32 = 32;
    pub const CLIENT_LOCAL_FILES: u32 = 128;
    pub const CLIENT_IGNORE_SPACE: u32 = 256;
    pub const CLIENT_PROTOCOL_41: u32 = 512;
    pub const CLIENT_INTERACTIVE: u32 = 1024;
    pub const CLIENT_SSL: u32 = 2048;
    pub const CLIENT_TRANSACTIONS: u32 = 8192;
    pub const CLIENT_SECURE_CONNECTION: u32 = 32768;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;
}

/// MariaDB extended capabilities (upper 32 bits, carried in the reserved filler)
pub mod mariadb_capability {
    pub const MARIADB_CLIENT_PROGRESS: u64 = 1 << 32;
    pub const MARIADB_CLIENT_STMT_BULK_OPERATIONS: u64 = 1 << 34;
    pub const MARIADB_CLIENT_EXTENDED_METADATA: u64 = 1 << 35;
}

/// Server status flags
pub mod status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 1;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 2;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 8;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 64;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 128;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 512;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 1 << 14;
}

/// Command opcodes (first payload byte of every command)
pub mod command {
    pub const COM_QUIT: u8 = 0x01;
    pub const COM_INIT_DB: u8 = 0x02;
    pub const COM_QUERY: u8 = 0x03;
    pub const COM_FIELD_LIST: u8 = 0x04;
    pub const COM_SHUTDOWN: u8 = 0x08;
    pub const COM_STATISTICS: u8 = 0x09;
    pub const COM_PING: u8 = 0x0E;
    pub const COM_CHANGE_USER: u8 = 0x11;
    pub const COM_RESET_CONNECTION: u8 = 0x1F;
    pub const COM_STMT_PREPARE: u8 = 0x16;
    pub const COM_STMT_EXECUTE: u8 = 0x17;
    pub const COM_STMT_SEND_LONG_DATA: u8 = 0x18;
    pub const COM_STMT_CLOSE: u8 = 0x19;
    pub const COM_STMT_RESET: u8 = 0x1A;
    pub const COM_SET_OPTION: u8 = 0x1B;
    pub const COM_STMT_FETCH: u8 = 0x1C;
    pub const COM_STMT_BULK_EXECUTE: u8 = 0xFA;
}

/// First-byte discriminators of server responses
pub mod response {
    pub const OK: u8 = 0x00;
    pub const AUTH_MORE_DATA: u8 = 0x01;
    pub const LOCAL_INFILE: u8 = 0xFB;
    pub const EOF: u8 = 0xFE;
    pub const ERR: u8 = 0xFF;
}

/// Length-encoded integer markers
pub mod lenenc {
    /// Largest value encoded in the marker byte itself
    pub const MAX_ONE_BYTE: u8 = 250;
    pub const NULL: u8 = 0xFB;
    pub const TWO_BYTES: u8 = 0xFC;
    pub const THREE_BYTES: u8 = 0xFD;
    pub const EIGHT_BYTES: u8 = 0xFE;
}

/// Column type codes
#[allow(missing_docs)]
pub mod column_type {
    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const ENUM: u8 = 247;
    pub const SET: u8 = 248;
    pub const TINY_BLOB: u8 = 249;
    pub const MEDIUM_BLOB: u8 = 250;
    pub const LONG_BLOB: u8 = 251;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
    pub const GEOMETRY: u8 = 255;
}

/// Column definition flags
pub mod column_flag {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
}

/// Binary collation id; marks byte (not character) strings
pub const BINARY_COLLATION: u16 = 63;

/// COM_SET_OPTION values
pub mod set_option {
    pub const MULTI_STATEMENTS_ON: u16 = 0;
    pub const MULTI_STATEMENTS_OFF: u16 = 1;
}

/// COM_STMT_BULK_EXECUTE flags and per-value indicators
pub mod bulk {
    pub const SEND_UNIT_RESULTS: u16 = 64;
    pub const SEND_TYPES_TO_SERVER: u16 = 128;
    pub const INDICATOR_NONE: u8 = 0;
    pub const INDICATOR_NULL: u8 = 1;
}

/// Authentication plugin names
pub mod plugin {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}
