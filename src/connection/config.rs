//! Session configuration

use super::tls::SslMode;
use crate::auth::PluginRegistry;
use crate::protocol::constants::{BINARY_COLLATION, DEFAULT_MAX_ALLOWED_PACKET, UTF8MB4_GENERAL_CI};
use crate::{Error, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default MariaDB/MySQL port
pub const DEFAULT_PORT: u16 = 3306;

/// Default chunk size for long-data uploads (1 MiB)
pub const DEFAULT_LONG_DATA_THRESHOLD: usize = 1024 * 1024;

/// Session character encoding (`characterEncoding`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CharacterEncoding {
    /// utf8mb4, up to 4 bytes per character
    #[default]
    Utf8mb4,
    /// utf8mb3, up to 3 bytes per character
    Utf8mb3,
    /// latin1, single byte
    Latin1,
    /// binary, single byte
    Binary,
}

impl CharacterEncoding {
    /// Collation id sent in the handshake response
    pub fn collation_id(&self) -> u8 {
        match self {
            Self::Utf8mb4 => UTF8MB4_GENERAL_CI,
            Self::Utf8mb3 => 33,
            Self::Latin1 => 8,
            Self::Binary => BINARY_COLLATION as u8,
        }
    }

    /// Largest number of bytes [`encode`](Self::encode) emits for one character
    ///
    /// Everything but latin1 is sent as UTF-8, so supplementary-plane
    /// characters take four bytes even under utf8mb3.
    pub fn max_encoded_char_len(&self) -> usize {
        match self {
            Self::Latin1 => 1,
            Self::Utf8mb4 | Self::Utf8mb3 | Self::Binary => 4,
        }
    }

    /// Text as sent on the wire
    ///
    /// latin1 takes one byte per character and replaces unrepresentable
    /// characters with `?`; the other encodings pass the UTF-8 bytes through.
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        match self {
            Self::Latin1 if !s.is_ascii() => Cow::Owned(s.chars().map(latin1_byte).collect()),
            _ => Cow::Borrowed(s.as_bytes()),
        }
    }
}

/// latin1 byte for `c`, or `?` when latin1 cannot hold it
pub(crate) fn latin1_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

impl std::str::FromStr for CharacterEncoding {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8mb4" | "utf-8" => Ok(Self::Utf8mb4),
            "utf8" | "utf8mb3" => Ok(Self::Utf8mb3),
            "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            "binary" => Ok(Self::Binary),
            other => Err(Error::Config(format!(
                "unsupported characterEncoding '{}'",
                other
            ))),
        }
    }
}

/// Session configuration
///
/// Use `ConnectionConfig::builder()` for the full option set, or build one
/// from a resolved topology endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Unix socket path; replaces TCP when set
    pub local_socket: Option<PathBuf>,
    /// Initial database
    pub database: Option<String>,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// SSL/TLS mode
    pub ssl_mode: SslMode,
    /// CA certificate (path or inline PEM)
    pub server_ssl_cert: Option<String>,
    /// Connect timeout (socket + handshake)
    pub connect_timeout: Option<Duration>,
    /// Default statement timeout
    pub query_timeout: Option<Duration>,
    /// On timeout, abort the session instead of issuing KILL QUERY
    pub timeout_kills_connection: bool,
    /// Answer LOCAL INFILE requests with a caller-supplied source
    pub allow_local_infile: bool,
    /// Prepare statements on the server
    pub use_server_prep_stmts: bool,
    /// Use COM_STMT_BULK_EXECUTE for server-side batches when available
    pub use_bulk_stmts: bool,
    /// Send client-side batches as one multi-statement query
    pub allow_multi_queries: bool,
    /// Largest command payload the server accepts
    pub max_allowed_packet: usize,
    /// Chunk size for long-data uploads
    pub long_data_threshold: usize,
    /// Authentication plugins (with `restrictedAuth` applied)
    pub auth_plugins: PluginRegistry,
    /// Extra connection attributes
    pub connection_attributes: Vec<(String, String)>,
    /// Track session state locally instead of querying the server
    pub use_local_session_state: bool,
    /// Session character encoding
    pub character_encoding: CharacterEncoding,
    /// Every property seen, including keys the engine does not interpret
    pub params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    ///
    /// # Defaults
    ///
    /// - port 3306, no database, no password
    /// - `ssl_mode`: disable
    /// - no timeouts, `KILL QUERY` on statement timeout
    /// - `max_allowed_packet`: 16 MiB, `long_data_threshold`: 1 MiB
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(host, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder("db.internal", "app")
    ///     .password("secret")
    ///     .database("shop")
    ///     .query_timeout(Duration::from_secs(30))
    ///     .build();
    /// ```
    pub fn builder(host: impl Into<String>, user: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                host: host.into(),
                port: DEFAULT_PORT,
                local_socket: None,
                database: None,
                user: user.into(),
                password: None,
                ssl_mode: SslMode::default(),
                server_ssl_cert: None,
                connect_timeout: None,
                query_timeout: None,
                timeout_kills_connection: false,
                allow_local_infile: false,
                use_server_prep_stmts: false,
                use_bulk_stmts: true,
                allow_multi_queries: false,
                max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
                long_data_threshold: DEFAULT_LONG_DATA_THRESHOLD,
                auth_plugins: PluginRegistry::new(),
                connection_attributes: Vec::new(),
                use_local_session_state: false,
                character_encoding: CharacterEncoding::default(),
                params: BTreeMap::new(),
            },
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// `host:port` (or socket path) for logs
    pub fn address(&self) -> String {
        match &self.local_socket {
            Some(path) => path.display().to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

/// Builder for creating `ConnectionConfig`
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the TCP port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Connect through a Unix socket
    pub fn local_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_socket = Some(path.into());
        self
    }

    /// Set the initial database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set SSL/TLS mode
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.config.ssl_mode = mode;
        self
    }

    /// Trust anchor for the server certificate (path or inline PEM)
    pub fn server_ssl_cert(mut self, cert: impl Into<String>) -> Self {
        self.config.server_ssl_cert = Some(cert.into());
        self
    }

    /// Set connect timeout
    ///
    /// Default: None (no timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = Some(duration);
        self
    }

    /// Set the default statement timeout
    ///
    /// Default: None (unlimited)
    pub fn query_timeout(mut self, duration: Duration) -> Self {
        self.config.query_timeout = Some(duration);
        self
    }

    /// Abort the session on statement timeout instead of sending `KILL QUERY`
    pub fn timeout_kills_connection(mut self, enabled: bool) -> Self {
        self.config.timeout_kills_connection = enabled;
        self
    }

    /// Permit LOAD DATA LOCAL INFILE
    pub fn allow_local_infile(mut self, enabled: bool) -> Self {
        self.config.allow_local_infile = enabled;
        self
    }

    /// Prefer server-side prepared statements
    pub fn use_server_prep_stmts(mut self, enabled: bool) -> Self {
        self.config.use_server_prep_stmts = enabled;
        self
    }

    /// Use bulk execution for server-side batches when the server supports it
    pub fn use_bulk_stmts(mut self, enabled: bool) -> Self {
        self.config.use_bulk_stmts = enabled;
        self
    }

    /// Send client-side batches as multi-statement queries
    pub fn allow_multi_queries(mut self, enabled: bool) -> Self {
        self.config.allow_multi_queries = enabled;
        self
    }

    /// Largest command payload the server accepts
    pub fn max_allowed_packet(mut self, bytes: usize) -> Self {
        self.config.max_allowed_packet = bytes;
        self
    }

    /// Chunk size for long-data uploads
    pub fn long_data_threshold(mut self, bytes: usize) -> Self {
        self.config.long_data_threshold = bytes.max(1);
        self
    }

    /// Only allow these authentication plugins
    pub fn restricted_auth<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.auth_plugins.restrict(plugins);
        self
    }

    /// Replace the plugin registry
    pub fn auth_plugins(mut self, registry: PluginRegistry) -> Self {
        self.config.auth_plugins = registry;
        self
    }

    /// Add a connection attribute
    pub fn connection_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.connection_attributes.push((key.into(), value.into()));
        self
    }

    /// Track session state locally
    pub fn use_local_session_state(mut self, enabled: bool) -> Self {
        self.config.use_local_session_state = enabled;
        self
    }

    /// Session character encoding
    pub fn character_encoding(mut self, encoding: CharacterEncoding) -> Self {
        self.config.character_encoding = encoding;
        self
    }

    /// Add a raw property without interpreting it
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.params.insert(key.into(), value.into());
        self
    }

    /// Apply descriptor properties
    ///
    /// Recognised keys update the matching field; every key is also kept in
    /// `params`.
    pub fn properties(mut self, props: &BTreeMap<String, String>) -> Result<Self> {
        for (key, value) in props {
            self = self.property(key, value)?;
        }
        Ok(self)
    }

    fn property(mut self, key: &str, value: &str) -> Result<Self> {
        let c = &mut self.config;
        match key {
            "user" => c.user = value.to_string(),
            "password" => c.password = Some(value.to_string()),
            "sslMode" => c.ssl_mode = value.parse()?,
            "serverSslCert" => c.server_ssl_cert = Some(value.to_string()),
            "connectTimeout" => {
                c.connect_timeout = non_zero(parse_u64(key, value)?).map(Duration::from_millis)
            }
            "queryTimeout" => {
                c.query_timeout = non_zero(parse_u64(key, value)?).map(Duration::from_secs)
            }
            "timeoutKillsConnection" => c.timeout_kills_connection = parse_bool(key, value)?,
            "allowLocalInfile" => c.allow_local_infile = parse_bool(key, value)?,
            "useServerPrepStmts" => c.use_server_prep_stmts = parse_bool(key, value)?,
            "useBulkStmts" => c.use_bulk_stmts = parse_bool(key, value)?,
            "allowMultiQueries" => c.allow_multi_queries = parse_bool(key, value)?,
            "maxAllowedPacket" => c.max_allowed_packet = parse_u64(key, value)? as usize,
            "longDataThreshold" => c.long_data_threshold = (parse_u64(key, value)? as usize).max(1),
            "restrictedAuth" => c.auth_plugins.restrict(value.split(',')),
            "localSocket" => c.local_socket = Some(PathBuf::from(value)),
            "connectionAttributes" => c.connection_attributes = parse_attributes(value)?,
            "useLocalSessionState" => c.use_local_session_state = parse_bool(key, value)?,
            "characterEncoding" => c.character_encoding = value.parse()?,
            _ => {}
        }
        c.params.insert(key.to_string(), value.to_string());
        Ok(self)
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

fn non_zero(v: u64) -> Option<u64> {
    (v != 0).then_some(v)
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("option '{}' expects a number, got '{}'", key, value))
    })
}

/// Boolean option; an empty value (bare `?key`) means true
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "option '{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}

/// `k1:v1,k2:v2`
fn parse_attributes(value: &str) -> Result<Vec<(String, String)>> {
    value
        .split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(Error::Config(format!(
                "connectionAttributes entry '{}' is not key:value",
                pair
            ))),
        })
        .collect()
}
