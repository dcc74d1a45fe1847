//! Wire session
//!
//! One `Session` owns one physical connection. Commands are strictly
//! half-duplex: the caller writes a complete command and then reads its whole
//! response before the next command may start. Any failure that leaves the
//! stream in an unknown position closes the session.

use super::config::ConnectionConfig;
use super::result::{QueryResult, ResultSink, Row};
use super::state::ConnectionState;
use super::tls::TlsConfig;
use super::transport::Transport;
use crate::auth::{AuthContext, AuthPlugin};
use crate::cancel::{CancelTarget, StatementCancel};
use crate::protocol::constants::{
    capability, mariadb_capability, response, set_option, status, PROTOCOL_VERSION,
};
use crate::protocol::decode::{
    classify_response, decode_auth_switch, decode_column_definition, decode_eof, decode_err,
    decode_handshake, decode_ok, decode_prepare_ok, is_eof_packet, is_result_terminator,
};
use crate::protocol::encode::encode_message;
use crate::protocol::packet::{take_message, write_packets};
use crate::protocol::{
    ChangeUser, ColumnDefinition, CommandResponse, FrontendMessage, HandshakeResponse, OkPacket,
};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tracing::Instrument;

/// Chunk size used when streaming a LOCAL INFILE source
const LOCAL_INFILE_CHUNK: usize = 64 * 1024;

/// Force-close signal shared between a session and other tasks
///
/// Aborting wakes a read that is blocked on the socket; the session then drops
/// its transport and reports [`Error::ConnectionClosed`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortSignal>,
}

#[derive(Debug, Default)]
struct AbortSignal {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    /// Abort the session
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Whether `abort` was called
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.inner.notify.notified().await
    }
}

/// What the server announced in its greeting
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Version string
    pub server_version: String,
    /// Connection (thread) id, the target of `KILL QUERY`
    pub thread_id: u32,
    /// Server capabilities
    pub capabilities: u64,
    /// Authentication seed from the greeting
    pub seed: Vec<u8>,
    /// Default authentication plugin
    pub auth_plugin_name: String,
    /// MariaDB (as opposed to MySQL) server
    pub is_mariadb: bool,
}

/// Server-side prepared statement as returned by COM_STMT_PREPARE
#[derive(Debug, Clone)]
pub struct StatementMetadata {
    /// Statement id
    pub id: u32,
    /// Parameter metadata
    pub params: Arc<[ColumnDefinition]>,
    /// Result column metadata
    pub columns: Arc<[ColumnDefinition]>,
    /// Warnings raised by the prepare
    pub warnings: u16,
}

/// MariaDB/MySQL session
pub struct Session {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    write_buf: BytesMut,
    sequence: u8,
    config: Arc<ConnectionConfig>,
    server: ServerInfo,
    capabilities: u64,
    status_flags: u16,
    response_pending: bool,
    abort: AbortHandle,
    local_infile: Option<Box<dyn AsyncRead + Send + Unpin>>,
    open_statements: HashSet<u32>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.config.address())
            .field("state", &self.state)
            .field("thread_id", &self.server.thread_id)
            .field("server_version", &self.server.server_version)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a transport, negotiate TLS and authenticate
    ///
    /// `connect_timeout` bounds the socket connect and the whole handshake.
    pub async fn connect(config: impl Into<Arc<ConnectionConfig>>) -> Result<Self> {
        let config = config.into();
        let span = tracing::info_span!(
            "handshake",
            host = %config.address(),
            user = %config.user
        );
        let establish = Self::establish(Arc::clone(&config)).instrument(span);
        match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, establish).await.map_err(|_| {
                Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out after {:?}", config.address(), limit),
                ))
            })?,
            None => establish.await,
        }
    }

    async fn establish(config: Arc<ConnectionConfig>) -> Result<Self> {
        let transport = match &config.local_socket {
            Some(path) => Transport::connect_unix(path).await?,
            None => Transport::connect_tcp(&config.host, config.port).await?,
        };
        let mut session = Self::new(transport, config);
        session.handshake().await?;
        tracing::info!(
            thread_id = session.server.thread_id,
            server_version = %session.server.server_version,
            "session established"
        );
        Ok(session)
    }

    fn new(transport: Transport, config: Arc<ConnectionConfig>) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(1024),
            sequence: 0,
            config,
            server: ServerInfo::default(),
            capabilities: 0,
            status_flags: 0,
            response_pending: false,
            abort: AbortHandle::default(),
            local_infile: None,
            open_statements: HashSet::new(),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let auth_start = Instant::now();
        let packet = self.read_packet().await?;
        if packet.first() == Some(&response::ERR) {
            return Err(decode_err(&packet)?.into());
        }
        let greeting = decode_handshake(&packet)?;
        if greeting.protocol_version != PROTOCOL_VERSION {
            return Err(Error::Handshake(format!(
                "unsupported protocol version {}",
                greeting.protocol_version
            )));
        }
        if greeting.capabilities & u64::from(capability::CLIENT_PROTOCOL_41) == 0 {
            return Err(Error::Handshake(
                "server does not support protocol 4.1".into(),
            ));
        }
        tracing::debug!(
            server_version = %greeting.server_version,
            thread_id = greeting.connection_id,
            plugin = %greeting.auth_plugin_name,
            "server greeting"
        );

        self.server = ServerInfo {
            is_mariadb: greeting.is_mariadb(),
            server_version: greeting.server_version,
            thread_id: greeting.connection_id,
            capabilities: greeting.capabilities,
            seed: greeting.seed,
            auth_plugin_name: greeting.auth_plugin_name,
        };
        self.status_flags = greeting.status_flags;

        // Unix sockets are already confidential
        let tls = if self.is_confidential() {
            None
        } else {
            TlsConfig::for_mode(self.config.ssl_mode, self.config.server_ssl_cert.as_deref())?
        };
        if tls.is_some() && greeting.capabilities & u64::from(capability::CLIENT_SSL) == 0 {
            return Err(Error::Tls(format!(
                "server does not support TLS (sslMode={})",
                self.config.ssl_mode
            )));
        }
        self.capabilities = self.requested_capabilities(tls.is_some()) & greeting.capabilities;

        if let Some(tls) = tls {
            self.state.transition(ConnectionState::NegotiatingTls)?;
            self.send(&FrontendMessage::SslRequest {
                capabilities: self.capabilities,
                max_packet_size: self.announced_max_packet(),
                charset: self.config.character_encoding.collation_id(),
            })
            .await?;
            let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
            self.transport = Some(transport.upgrade_to_tls(&tls, &self.config.host).await?);
            tracing::debug!("TLS connection established");
        }
        self.state.transition(ConnectionState::Authenticating)?;

        let mut plugin = self
            .config
            .auth_plugins
            .initial(&self.server.auth_plugin_name)?;
        crate::metrics::counters::auth_attempted(plugin.name());
        let seed = self.server.seed.clone();
        let auth_response = self
            .plugin_step(plugin.as_mut(), &seed)?
            .into_iter()
            .next()
            .unwrap_or_default();

        let response = HandshakeResponse {
            capabilities: self.capabilities,
            max_packet_size: self.announced_max_packet(),
            charset: self.config.character_encoding.collation_id(),
            user: self.config.user.clone(),
            auth_response: auth_response.to_vec(),
            database: self.config.database.clone(),
            plugin: plugin.name().to_string(),
            attributes: self.connection_attributes(),
        };
        self.send(&FrontendMessage::HandshakeResponse(response))
            .await?;

        self.authenticate(plugin, auth_start).await?;
        self.state.transition(ConnectionState::Idle)?;
        self.response_pending = false;
        Ok(())
    }

    fn requested_capabilities(&self, tls: bool) -> u64 {
        let mut caps = capability::CLIENT_MYSQL
            | capability::CLIENT_LONG_FLAG
            | capability::CLIENT_PROTOCOL_41
            | capability::CLIENT_TRANSACTIONS
            | capability::CLIENT_SECURE_CONNECTION
            | capability::CLIENT_MULTI_RESULTS
            | capability::CLIENT_PS_MULTI_RESULTS
            | capability::CLIENT_PLUGIN_AUTH
            | capability::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | capability::CLIENT_CONNECT_ATTRS
            | capability::CLIENT_DEPRECATE_EOF;
        if self.config.database.is_some() {
            caps |= capability::CLIENT_CONNECT_WITH_DB;
        }
        if self.config.allow_local_infile {
            caps |= capability::CLIENT_LOCAL_FILES;
        }
        if self.config.allow_multi_queries {
            caps |= capability::CLIENT_MULTI_STATEMENTS;
        }
        if tls {
            caps |= capability::CLIENT_SSL;
        }
        let mut caps = u64::from(caps);
        if self.config.use_bulk_stmts {
            caps |= mariadb_capability::MARIADB_CLIENT_STMT_BULK_OPERATIONS;
        }
        caps
    }

    fn announced_max_packet(&self) -> u32 {
        u32::try_from(self.config.max_allowed_packet).unwrap_or(u32::MAX)
    }

    fn connection_attributes(&self) -> Vec<(String, String)> {
        let mut attributes = vec![
            ("_client_name".to_string(), env!("CARGO_PKG_NAME").to_string()),
            ("_client_version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ("_os".to_string(), std::env::consts::OS.to_string()),
            ("_pid".to_string(), std::process::id().to_string()),
        ];
        attributes.extend(self.config.connection_attributes.iter().cloned());
        attributes
    }

    fn plugin_step(&self, plugin: &mut dyn AuthPlugin, challenge: &[u8]) -> Result<Vec<Bytes>> {
        let confidential = self.is_confidential();
        if plugin.requires_confidentiality() && !confidential {
            crate::metrics::counters::auth_failed(plugin.name(), "confidentiality_required");
            return Err(Error::Authentication(format!(
                "plugin '{}' requires TLS or a Unix socket",
                plugin.name()
            )));
        }
        let ctx = AuthContext {
            user: &self.config.user,
            password: self.config.password.as_deref(),
            confidential,
        };
        plugin.step(challenge, &ctx)
    }

    /// Plugin exchange after the handshake response or COM_CHANGE_USER
    async fn authenticate(&mut self, mut plugin: Box<dyn AuthPlugin>, start: Instant) -> Result<()> {
        loop {
            let packet = self.read_packet().await?;
            match packet.first() {
                Some(&response::OK) => {
                    let ok = decode_ok(&packet)?;
                    self.status_flags = ok.status_flags;
                    tracing::debug!(plugin = plugin.name(), "authentication successful");
                    crate::metrics::counters::auth_successful(plugin.name());
                    crate::metrics::histograms::auth_duration(
                        plugin.name(),
                        start.elapsed().as_millis() as u64,
                    );
                    return Ok(());
                }
                Some(&response::ERR) => {
                    let err = decode_err(&packet)?;
                    crate::metrics::counters::auth_failed(plugin.name(), "server_error");
                    return Err(Error::Authentication(err.to_string()));
                }
                Some(&response::EOF) => {
                    let switch = decode_auth_switch(&packet)?;
                    tracing::debug!(from = plugin.name(), to = %switch.plugin_name, "auth switch");
                    crate::metrics::counters::auth_switched(&switch.plugin_name);
                    if !(plugin.name() == switch.plugin_name && plugin.reusable()) {
                        plugin = self.config.auth_plugins.negotiate(&switch.plugin_name)?;
                        crate::metrics::counters::auth_attempted(plugin.name());
                    }
                    let responses = self.plugin_step(plugin.as_mut(), &switch.data)?;
                    if responses.is_empty() {
                        self.send(&FrontendMessage::AuthData(Bytes::new())).await?;
                    }
                    for data in responses {
                        self.send(&FrontendMessage::AuthData(data)).await?;
                    }
                }
                Some(&response::AUTH_MORE_DATA) => {
                    for data in self.plugin_step(plugin.as_mut(), &packet[1..])? {
                        self.send(&FrontendMessage::AuthData(data)).await?;
                    }
                }
                Some(&other) => {
                    return Err(Error::Protocol(format!(
                        "unexpected packet 0x{:02X} during authentication",
                        other
                    )))
                }
                None => {
                    return Err(Error::Protocol(
                        "empty packet during authentication".into(),
                    ))
                }
            }
        }
    }

    // ---- framing ----

    fn encode_text(&self, s: &str) -> Bytes {
        Bytes::from(self.config.character_encoding.encode(s).into_owned())
    }

    async fn send(&mut self, msg: &FrontendMessage) -> Result<()> {
        let payload = encode_message(msg)?;
        self.write_payload(&payload).await?;
        crate::metrics::counters::command_sent(msg.label());
        Ok(())
    }

    async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_allowed_packet {
            return Err(Error::Protocol(format!(
                "packet of {} bytes exceeds max_allowed_packet ({})",
                payload.len(),
                self.config.max_allowed_packet
            )));
        }
        let mut buf = std::mem::take(&mut self.write_buf);
        buf.clear();
        write_packets(&mut buf, payload, &mut self.sequence);
        self.response_pending = true;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        let written = async {
            transport.write_all(&buf).await?;
            transport.flush().await
        }
        .await;
        self.write_buf = buf;
        written
    }

    async fn read_packet(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = take_message(&mut self.read_buf, &mut self.sequence)? {
                return Ok(payload);
            }
            if self.abort.is_aborted() {
                return Err(Error::ConnectionClosed);
            }
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let abort = &self.abort;
            let n = tokio::select! {
                n = transport.read_buf(&mut self.read_buf) => n?,
                _ = abort.notified() => {
                    tracing::debug!("session aborted while reading");
                    return Err(Error::ConnectionClosed);
                }
            };
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    // ---- command bracket ----

    fn begin_command(&mut self) -> Result<()> {
        if self.abort.is_aborted() {
            self.force_close();
        }
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            other => {
                return Err(Error::ConnectionBusy(format!(
                    "connection in state: {}",
                    other
                )))
            }
        }
        self.state.transition(ConnectionState::CommandInProgress)?;
        self.sequence = 0;
        self.response_pending = false;
        Ok(())
    }

    fn end_command<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.state = ConnectionState::Idle,
            Err(e) if !e.is_fatal() && !self.response_pending => {
                self.state = ConnectionState::Idle
            }
            Err(e) => {
                tracing::debug!(error = %e, "closing session after failure");
                self.force_close();
            }
        }
        self.response_pending = false;
        result
    }

    fn force_close(&mut self) {
        self.state = ConnectionState::Closed;
        self.transport = None;
        self.read_buf.clear();
        self.open_statements.clear();
    }

    async fn read_ok(&mut self) -> Result<OkPacket> {
        let packet = self.read_packet().await?;
        match classify_response(&packet)? {
            CommandResponse::Ok(ok) => {
                self.response_pending = false;
                self.status_flags = ok.status_flags;
                Ok(ok)
            }
            CommandResponse::Err(err) => {
                self.response_pending = false;
                Err(err.into())
            }
            other => Err(Error::Protocol(format!(
                "expected OK packet, got {:?}",
                other
            ))),
        }
    }

    async fn simple_command(&mut self, msg: &FrontendMessage) -> Result<OkPacket> {
        self.begin_command()?;
        let result = async {
            self.send(msg).await?;
            self.read_ok().await
        }
        .await;
        self.end_command(result)
    }

    // ---- result sets ----

    fn deprecate_eof(&self) -> bool {
        self.capabilities & u64::from(capability::CLIENT_DEPRECATE_EOF) != 0
    }

    fn more_results(&self) -> bool {
        self.status_flags & status::SERVER_MORE_RESULTS_EXISTS != 0
    }

    async fn read_column_definitions(&mut self, count: usize) -> Result<Arc<[ColumnDefinition]>> {
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let packet = self.read_packet().await?;
            columns.push(decode_column_definition(&packet)?);
        }
        if count > 0 && !self.deprecate_eof() {
            let packet = self.read_packet().await?;
            if !is_eof_packet(&packet) {
                return Err(Error::Protocol(
                    "missing EOF after column definitions".into(),
                ));
            }
        }
        Ok(columns.into())
    }

    /// Rows up to and including the terminator; returns the terminator as OK
    async fn read_rows(
        &mut self,
        columns: &Arc<[ColumnDefinition]>,
        sink: &mut dyn ResultSink,
        binary: bool,
    ) -> Result<OkPacket> {
        let deprecate_eof = self.deprecate_eof();
        let mut rows = 0u64;
        loop {
            let packet = self.read_packet().await?;
            if packet.first() == Some(&response::ERR) {
                self.response_pending = false;
                return Err(decode_err(&packet)?.into());
            }
            if is_result_terminator(&packet, deprecate_eof) {
                crate::metrics::histograms::rows_returned(rows);
                if deprecate_eof {
                    return Ok(decode_ok(&packet)?);
                }
                let eof = decode_eof(&packet)?;
                return Ok(OkPacket {
                    status_flags: eof.status_flags,
                    warnings: eof.warnings,
                    ..Default::default()
                });
            }
            let row = if binary {
                Row::binary(packet, Arc::clone(columns))?
            } else {
                Row::text(packet, Arc::clone(columns))?
            };
            rows += 1;
            sink.row(row)?;
        }
    }

    /// Every result of the current command, following MORE_RESULTS_EXISTS
    async fn read_results(&mut self, sink: &mut dyn ResultSink, binary: bool) -> Result<()> {
        loop {
            let packet = self.read_packet().await?;
            let ok = match classify_response(&packet)? {
                CommandResponse::Ok(ok) => ok,
                CommandResponse::Err(err) => {
                    self.response_pending = false;
                    return Err(err.into());
                }
                CommandResponse::LocalInfile { filename } => {
                    self.send_local_infile(&filename).await?;
                    continue;
                }
                CommandResponse::ResultSet { column_count } => {
                    self.state.transition(ConnectionState::ReadingResults)?;
                    let count = usize::try_from(column_count).map_err(|_| {
                        Error::Protocol(format!("column count {} out of range", column_count))
                    })?;
                    let columns = self.read_column_definitions(count).await?;
                    sink.columns(&columns)?;
                    self.read_rows(&columns, sink, binary).await?
                }
            };
            self.status_flags = ok.status_flags;
            let more = self.more_results();
            if !more {
                self.response_pending = false;
            }
            sink.complete(&ok)?;
            if !more {
                return Ok(());
            }
            if self.state == ConnectionState::ReadingResults {
                self.state.transition(ConnectionState::CommandInProgress)?;
            }
        }
    }

    async fn send_local_infile(&mut self, filename: &str) -> Result<()> {
        match (self.config.allow_local_infile, self.local_infile.take()) {
            (true, Some(mut source)) => {
                tracing::debug!(filename, "streaming local infile");
                let mut chunk = vec![0u8; LOCAL_INFILE_CHUNK];
                loop {
                    let n = source.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    self.write_payload(&chunk[..n]).await?;
                }
            }
            (allowed, _) => {
                tracing::debug!(filename, allowed, "no local infile source, sending empty file");
            }
        }
        self.write_payload(&[]).await
    }

    // ---- text commands ----

    /// Run a text query and collect every result
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        self.query_with(sql, &mut result).await?;
        Ok(result)
    }

    /// Run a text query, delivering results to `sink`
    ///
    /// The configured `query_timeout` applies.
    pub async fn query_with(&mut self, sql: &str, sink: &mut dyn ResultSink) -> Result<()> {
        let scope = self.cancel_scope(self.config.query_timeout);
        self.query_in_scope(sql, sink, scope).await
    }

    /// Run a text query under an explicit cancellation scope
    pub async fn query_in_scope(
        &mut self,
        sql: &str,
        sink: &mut dyn ResultSink,
        scope: StatementCancel,
    ) -> Result<()> {
        let result = self.query_raw(sql, sink).await;
        scope.finish(result).await
    }

    pub(crate) async fn query_raw(&mut self, sql: &str, sink: &mut dyn ResultSink) -> Result<()> {
        self.begin_command()?;
        let span = tracing::debug_span!("query", thread_id = self.server.thread_id);
        let result = async {
            self.send(&FrontendMessage::Query(self.encode_text(sql))).await?;
            self.read_results(sink, false).await
        }
        .instrument(span)
        .await;
        self.end_command(result)
    }

    /// COM_PING
    pub async fn ping(&mut self) -> Result<()> {
        self.simple_command(&FrontendMessage::Ping).await.map(|_| ())
    }

    /// COM_INIT_DB
    pub async fn select_database(&mut self, database: &str) -> Result<()> {
        self.simple_command(&FrontendMessage::InitDb(self.encode_text(database)))
            .await?;
        let mut config = (*self.config).clone();
        config.database = Some(database.to_string());
        self.config = Arc::new(config);
        Ok(())
    }

    /// COM_FIELD_LIST: column definitions of `table`
    pub async fn field_list(&mut self, table: &str, wildcard: &str) -> Result<Vec<ColumnDefinition>> {
        self.begin_command()?;
        let result = async {
            self.send(&FrontendMessage::FieldList {
                table: table.to_string(),
                wildcard: wildcard.to_string(),
            })
            .await?;
            let deprecate_eof = self.deprecate_eof();
            let mut columns = Vec::new();
            loop {
                let packet = self.read_packet().await?;
                if packet.first() == Some(&response::ERR) {
                    self.response_pending = false;
                    return Err(decode_err(&packet)?.into());
                }
                if is_result_terminator(&packet, deprecate_eof) {
                    self.response_pending = false;
                    return Ok(columns);
                }
                columns.push(decode_column_definition(&packet)?);
            }
        }
        .await;
        self.end_command(result)
    }

    /// COM_SET_OPTION
    pub async fn set_option(&mut self, option: u16) -> Result<()> {
        self.simple_command(&FrontendMessage::SetOption(option))
            .await
            .map(|_| ())
    }

    /// Toggle multi-statement support for this session
    pub async fn set_multi_statements(&mut self, enabled: bool) -> Result<()> {
        let option = if enabled {
            set_option::MULTI_STATEMENTS_ON
        } else {
            set_option::MULTI_STATEMENTS_OFF
        };
        self.set_option(option).await
    }

    /// COM_RESET_CONNECTION; server-side prepared statements are dropped
    pub async fn reset_connection(&mut self) -> Result<()> {
        self.simple_command(&FrontendMessage::ResetConnection)
            .await?;
        self.open_statements.clear();
        Ok(())
    }

    /// COM_SHUTDOWN
    pub async fn shutdown(&mut self) -> Result<()> {
        self.simple_command(&FrontendMessage::Shutdown)
            .await
            .map(|_| ())
    }

    /// COM_STATISTICS: the server's status line
    pub async fn statistics(&mut self) -> Result<String> {
        self.begin_command()?;
        let result = async {
            self.send(&FrontendMessage::Statistics).await?;
            let packet = self.read_packet().await?;
            self.response_pending = false;
            if packet.first() == Some(&response::ERR) {
                return Err(decode_err(&packet)?.into());
            }
            Ok(String::from_utf8_lossy(&packet).into_owned())
        }
        .await;
        self.end_command(result)
    }

    /// Re-authenticate as another user without reconnecting
    ///
    /// Session state is reset by the server; prepared statements are gone.
    pub async fn change_user(
        &mut self,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Result<()> {
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            other => {
                return Err(Error::ConnectionBusy(format!(
                    "connection in state: {}",
                    other
                )))
            }
        }
        self.state.transition(ConnectionState::Authenticating)?;
        self.sequence = 0;

        let mut config = (*self.config).clone();
        config.user = user.to_string();
        config.password = password.map(str::to_string);
        config.database = database.map(str::to_string);
        self.config = Arc::new(config);
        self.open_statements.clear();

        let span = tracing::info_span!("change_user", user = %user);
        let result = self.change_user_exchange().instrument(span).await;
        match result {
            Ok(()) => {
                self.state.transition(ConnectionState::Idle)?;
                self.response_pending = false;
                Ok(())
            }
            Err(e) => {
                self.force_close();
                Err(e)
            }
        }
    }

    async fn change_user_exchange(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut plugin = self
            .config
            .auth_plugins
            .initial(&self.server.auth_plugin_name)?;
        crate::metrics::counters::auth_attempted(plugin.name());
        let seed = self.server.seed.clone();
        let auth_response = self
            .plugin_step(plugin.as_mut(), &seed)?
            .into_iter()
            .next()
            .unwrap_or_default();
        let change = ChangeUser {
            capabilities: self.capabilities,
            user: self.config.user.clone(),
            auth_response: auth_response.to_vec(),
            database: self.config.database.clone(),
            charset: self.config.character_encoding.collation_id(),
            plugin: plugin.name().to_string(),
            attributes: self.connection_attributes(),
        };
        self.send(&FrontendMessage::ChangeUser(change)).await?;
        self.authenticate(plugin, start).await
    }

    /// Send COM_QUIT and shut the transport down
    pub async fn close(mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        self.sequence = 0;
        let _ = self.send(&FrontendMessage::Quit).await;
        if let Some(transport) = self.transport.as_mut() {
            transport.shutdown().await?;
        }
        Ok(())
    }

    // ---- prepared statement primitives ----

    pub(crate) async fn prepare_statement(&mut self, sql: &str) -> Result<StatementMetadata> {
        self.begin_command()?;
        let result = async {
            self.send(&FrontendMessage::StmtPrepare(self.encode_text(sql)))
                .await?;
            let packet = self.read_packet().await?;
            if packet.first() == Some(&response::ERR) {
                self.response_pending = false;
                return Err(decode_err(&packet)?.into());
            }
            let ok = decode_prepare_ok(&packet)?;
            let params = self.read_column_definitions(ok.num_params.into()).await?;
            let columns = self.read_column_definitions(ok.num_columns.into()).await?;
            self.response_pending = false;
            self.open_statements.insert(ok.statement_id);
            tracing::debug!(
                statement_id = ok.statement_id,
                params = ok.num_params,
                columns = ok.num_columns,
                "statement prepared"
            );
            Ok(StatementMetadata {
                id: ok.statement_id,
                params,
                columns,
                warnings: ok.warnings,
            })
        }
        .await;
        self.end_command(result)
    }

    pub(crate) async fn execute_statement(
        &mut self,
        statement_id: u32,
        body: Bytes,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        self.run_statement(FrontendMessage::StmtExecute { statement_id, body }, sink)
            .await
    }

    pub(crate) async fn bulk_execute_statement(
        &mut self,
        statement_id: u32,
        body: Bytes,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        self.run_statement(FrontendMessage::StmtBulkExecute { statement_id, body }, sink)
            .await
    }

    async fn run_statement(&mut self, msg: FrontendMessage, sink: &mut dyn ResultSink) -> Result<()> {
        self.begin_command()?;
        let span = tracing::debug_span!("execute", thread_id = self.server.thread_id);
        let result = async {
            self.send(&msg).await?;
            self.read_results(sink, true).await
        }
        .instrument(span)
        .await;
        self.end_command(result)
    }

    /// One COM_STMT_SEND_LONG_DATA chunk; the server does not answer
    pub(crate) async fn send_long_data(
        &mut self,
        statement_id: u32,
        param_id: u16,
        data: Bytes,
    ) -> Result<()> {
        self.begin_command()?;
        let len = data.len() as u64;
        let result = self
            .send(&FrontendMessage::StmtSendLongData {
                statement_id,
                param_id,
                data,
            })
            .await;
        self.response_pending = false;
        if result.is_ok() {
            crate::metrics::histograms::long_data_bytes(len);
        }
        self.end_command(result)
    }

    pub(crate) async fn close_statement(&mut self, statement_id: u32) -> Result<()> {
        if !self.open_statements.remove(&statement_id) {
            return Ok(());
        }
        self.begin_command()?;
        let result = self.send(&FrontendMessage::StmtClose(statement_id)).await;
        self.response_pending = false;
        self.end_command(result)
    }

    pub(crate) async fn reset_statement(&mut self, statement_id: u32) -> Result<()> {
        self.simple_command(&FrontendMessage::StmtReset(statement_id))
            .await
            .map(|_| ())
    }

    // ---- local infile, cancellation, accessors ----

    /// Source answered to the next LOCAL INFILE request
    ///
    /// Ignored unless `allow_local_infile` is set; without a source the server
    /// receives an empty file.
    pub fn set_local_infile_source(&mut self, source: impl AsyncRead + Send + Unpin + 'static) {
        self.local_infile = Some(Box::new(source));
    }

    /// Handle that force-closes this session from another task
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Everything a cancellation routine needs to reach this session
    pub fn cancel_target(&self) -> CancelTarget {
        CancelTarget {
            thread_id: self.server.thread_id,
            config: Arc::clone(&self.config),
            abort: self.abort.clone(),
        }
    }

    /// Arm a cancellation scope for the next statement
    pub fn cancel_scope(&self, timeout: Option<std::time::Duration>) -> StatementCancel {
        StatementCancel::arm(self.cancel_target(), timeout)
    }

    /// Session configuration (reflects `change_user` and `select_database`)
    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the session can no longer be used
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Greeting information
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Connection id assigned by the server
    pub fn thread_id(&self) -> u32 {
        self.server.thread_id
    }

    /// Server version string
    pub fn server_version(&self) -> &str {
        &self.server.server_version
    }

    /// Connected to MariaDB
    pub fn is_mariadb(&self) -> bool {
        self.server.is_mariadb
    }

    /// Status flags from the last OK/EOF packet
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// Autocommit enabled
    pub fn autocommit(&self) -> bool {
        self.status_flags & status::SERVER_STATUS_AUTOCOMMIT != 0
    }

    /// Inside a transaction
    pub fn in_transaction(&self) -> bool {
        self.status_flags & status::SERVER_STATUS_IN_TRANS != 0
    }

    /// Backslash is not an escape character in string literals
    pub fn no_backslash_escapes(&self) -> bool {
        self.status_flags & status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> u64 {
        self.capabilities
    }

    /// Server accepts COM_STMT_BULK_EXECUTE
    pub fn supports_bulk(&self) -> bool {
        self.capabilities & mariadb_capability::MARIADB_CLIENT_STMT_BULK_OPERATIONS != 0
    }

    /// Secrets may travel in clear
    pub fn is_confidential(&self) -> bool {
        self.transport
            .as_ref()
            .map_or(false, Transport::is_confidential)
    }

    /// Statements prepared on this session and not yet closed
    pub fn open_statement_count(&self) -> usize {
        self.open_statements.len()
    }

    /// Largest payload this session will send (`maxAllowedPacket`)
    pub fn max_allowed_packet(&self) -> usize {
        self.config.max_allowed_packet
    }
}
