//! Session, binder and cancellation tests against a scripted in-process server
//!
//! Each test binds a listener on 127.0.0.1:0 and runs a script that plays the
//! server side of the protocol packet by packet, asserting on what the client
//! sends.

use mariadb_wire::auth::scramble_native;
use mariadb_wire::client::Connector;
use mariadb_wire::protocol::codec::RawValue;
use mariadb_wire::protocol::constants::{capability, column_type, command, status};
use mariadb_wire::connection::{CharacterEncoding, ConnectionConfigBuilder};
use mariadb_wire::statement::{
    BatchResult, BindValue, ClientPreparedStatement, PreparedStatement, Statement,
};
use mariadb_wire::{ConnectionConfig, Error, Session};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const THREAD_ID: u32 = 42;
const SEED: &[u8; 20] = b"abcdefghijklmnopqrst";
const PASSWORD: &str = "secret";

const SERVER_CAPS: u32 = capability::CLIENT_LONG_FLAG
    | capability::CLIENT_CONNECT_WITH_DB
    | capability::CLIENT_LOCAL_FILES
    | capability::CLIENT_PROTOCOL_41
    | capability::CLIENT_TRANSACTIONS
    | capability::CLIENT_SECURE_CONNECTION
    | capability::CLIENT_MULTI_STATEMENTS
    | capability::CLIENT_MULTI_RESULTS
    | capability::CLIENT_PS_MULTI_RESULTS
    | capability::CLIENT_PLUGIN_AUTH
    | capability::CLIENT_CONNECT_ATTRS
    | capability::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | capability::CLIENT_DEPRECATE_EOF;

/// MariaDB extended capability word advertising bulk execution
const SERVER_EXT_CAPS: u32 = 4;

static INIT_LOGGING: Once = Once::new();

/// Session logs in test output, filtered by `RUST_LOG`
fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Server side helpers
// ============================================================================

struct Peer {
    stream: TcpStream,
    seq: u8,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.expect("accept");
        Self { stream, seq: 0 }
    }

    async fn read(&mut self) -> Vec<u8> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await.expect("read header");
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        assert_eq!(header[3], self.seq, "client packet sequence");
        self.seq = self.seq.wrapping_add(1);
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.expect("read payload");
        payload
    }

    async fn write(&mut self, payload: &[u8]) {
        let mut packet = Vec::with_capacity(4 + payload.len());
        packet.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        packet.push(self.seq);
        packet.extend_from_slice(payload);
        self.seq = self.seq.wrapping_add(1);
        self.stream.write_all(&packet).await.expect("write packet");
    }

    /// Next command; sequence restarts at zero
    async fn command(&mut self) -> Vec<u8> {
        self.seq = 0;
        self.read().await
    }

    async fn expect_quit(&mut self) {
        assert_eq!(self.command().await, vec![command::COM_QUIT]);
    }

    /// Greeting, handshake response check and OK
    async fn handshake(&mut self, user: &str) {
        self.write(&greeting("mysql_native_password")).await;
        let response = self.read().await;
        assert!(contains(&response, user.as_bytes()), "user in handshake response");
        let scramble = scramble_native(PASSWORD.as_bytes(), SEED);
        assert!(contains(&response, &scramble), "native scramble in handshake response");
        self.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;
    }

    /// One-column result set followed by the terminator
    async fn result_set(&mut self, name: &str, col_type: u8, rows: &[Vec<u8>]) {
        self.write(&[1]).await;
        self.write(&column(name, col_type)).await;
        for row in rows {
            self.write(row).await;
        }
        self.write(&eof_ok(status::SERVER_STATUS_AUTOCOMMIT)).await;
    }
}

async fn server<F, Fut>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpListener) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (port, tokio::spawn(script(listener)))
}

fn config(port: u16) -> ConnectionConfigBuilder {
    ConnectionConfig::builder("127.0.0.1", "app")
        .port(port)
        .password(PASSWORD)
        .database("shop")
        .connect_timeout(Duration::from_secs(5))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

fn greeting(plugin: &str) -> Vec<u8> {
    let mut v = vec![10];
    v.extend_from_slice(b"11.4.2-MariaDB\0");
    v.extend_from_slice(&THREAD_ID.to_le_bytes());
    v.extend_from_slice(&SEED[..8]);
    v.push(0);
    v.extend_from_slice(&(SERVER_CAPS as u16).to_le_bytes());
    v.push(45);
    v.extend_from_slice(&status::SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
    v.extend_from_slice(&((SERVER_CAPS >> 16) as u16).to_le_bytes());
    v.push(21);
    v.extend_from_slice(&[0; 6]);
    v.extend_from_slice(&SERVER_EXT_CAPS.to_le_bytes());
    v.extend_from_slice(&SEED[8..]);
    v.push(0);
    v.extend_from_slice(plugin.as_bytes());
    v.push(0);
    v
}

fn ok(affected_rows: u8, status_flags: u16) -> Vec<u8> {
    let mut v = vec![0x00, affected_rows, 0];
    v.extend_from_slice(&status_flags.to_le_bytes());
    v.extend_from_slice(&0u16.to_le_bytes());
    v
}

/// Result-set terminator under CLIENT_DEPRECATE_EOF
fn eof_ok(status_flags: u16) -> Vec<u8> {
    let mut v = ok(0, status_flags);
    v[0] = 0xFE;
    v
}

fn err(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut v = vec![0xFF];
    v.extend_from_slice(&code.to_le_bytes());
    v.push(b'#');
    v.extend_from_slice(sql_state.as_bytes());
    v.extend_from_slice(message.as_bytes());
    v
}

fn lenenc_str(v: &mut Vec<u8>, s: &[u8]) {
    v.push(s.len() as u8);
    v.extend_from_slice(s);
}

fn column(name: &str, col_type: u8) -> Vec<u8> {
    let mut v = Vec::new();
    for part in [&b"def"[..], b"shop", b"t", b"t", name.as_bytes(), name.as_bytes()] {
        lenenc_str(&mut v, part);
    }
    v.push(0x0C);
    v.extend_from_slice(&45u16.to_le_bytes());
    v.extend_from_slice(&20u32.to_le_bytes());
    v.push(col_type);
    v.extend_from_slice(&0u16.to_le_bytes());
    v.push(0);
    v.extend_from_slice(&[0, 0]);
    v
}

fn prepare_ok(statement_id: u32, columns: u16, params: u16) -> Vec<u8> {
    let mut v = vec![0x00];
    v.extend_from_slice(&statement_id.to_le_bytes());
    v.extend_from_slice(&columns.to_le_bytes());
    v.extend_from_slice(&params.to_le_bytes());
    v.push(0);
    v.extend_from_slice(&0u16.to_le_bytes());
    v
}

fn stmt_header(cmd: u8, statement_id: u32) -> Vec<u8> {
    let mut v = vec![cmd];
    v.extend_from_slice(&statement_id.to_le_bytes());
    v
}

// ============================================================================
// Handshake and authentication
// ============================================================================

#[tokio::test]
async fn test_handshake_and_text_query() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;

        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_QUERY);
        assert_eq!(&cmd[1..], b"SELECT 1");
        peer.result_set("1", column_type::LONGLONG, &[vec![1, b'1']])
            .await;

        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    assert_eq!(session.thread_id(), THREAD_ID);
    assert_eq!(session.server_version(), "11.4.2-MariaDB");
    assert!(session.is_mariadb());
    assert!(session.supports_bulk());
    assert!(session.autocommit());
    assert!(!session.in_transaction());

    let result = session.query("SELECT 1").await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].raw(0).unwrap(), RawValue::Bytes(b"1"));
    assert_eq!(result.columns.unwrap()[0].name, "1");

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_switch_uses_new_plugin() {
    let new_seed: &[u8; 20] = b"ZYXWVUTSRQPONMLKJIHG";
    let (port, server) = server(move |listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.write(&greeting("caching_sha2_password")).await;
        let _response = peer.read().await;

        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"mysql_native_password\0");
        switch.extend_from_slice(new_seed);
        switch.push(0);
        peer.write(&switch).await;

        let auth = peer.read().await;
        assert_eq!(auth, scramble_native(PASSWORD.as_bytes(), new_seed));
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let session = Session::connect(config(port).build()).await.unwrap();
    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_error_is_authentication_failure() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.write(&greeting("mysql_native_password")).await;
        let _response = peer.read().await;
        peer.write(&err(1045, "28000", "Access denied for user 'app'"))
            .await;
    })
    .await;

    let err = Session::connect(config(port).build()).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(ref m) if m.contains("Access denied")));
    assert!(!err.is_endpoint_failure());
    server.await.unwrap();
}

#[tokio::test]
async fn test_error_greeting() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.write(&err(1040, "08004", "Too many connections")).await;
    })
    .await;

    let err = Session::connect(config(port).build()).await.unwrap_err();
    assert!(matches!(err, Error::Server { code: 1040, .. }));
    assert!(err.is_endpoint_failure());
    server.await.unwrap();
}

#[tokio::test]
async fn test_change_user_reauthenticates() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;

        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_CHANGE_USER);
        assert!(contains(&cmd, b"auditor\0"));
        assert!(contains(&cmd, b"audit\0"));
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;

        let cmd = peer.command().await;
        assert_eq!(cmd, vec![command::COM_PING]);
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    session
        .change_user("auditor", Some("pw"), Some("audit"))
        .await
        .unwrap();
    assert_eq!(session.config().user, "auditor");
    assert_eq!(session.config().database.as_deref(), Some("audit"));
    session.ping().await.unwrap();
    session.close().await.unwrap();
    server.await.unwrap();
}

// ============================================================================
// Command dispatch
// ============================================================================

#[tokio::test]
async fn test_server_error_keeps_session_usable() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;

        let _ = peer.command().await;
        peer.write(&err(1064, "42000", "You have an error in your SQL syntax"))
            .await;

        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_INIT_DB);
        assert_eq!(&cmd[1..], b"archive");
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;

        let cmd = peer.command().await;
        assert_eq!(cmd, vec![command::COM_STATISTICS]);
        peer.write(b"Uptime: 5  Threads: 1").await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    let err = session.query("SELEC 1").await.unwrap_err();
    assert!(matches!(err, Error::Server { code: 1064, ref sql_state, .. } if sql_state == "42000"));
    assert!(!session.is_closed());

    session.select_database("archive").await.unwrap();
    assert_eq!(session.config().database.as_deref(), Some("archive"));
    assert_eq!(session.statistics().await.unwrap(), "Uptime: 5  Threads: 1");
    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_local_infile_streams_source() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;

        let _ = peer.command().await;
        let mut request = vec![0xFB];
        request.extend_from_slice(b"data.csv");
        peer.write(&request).await;

        assert_eq!(peer.read().await, b"1\n2\n3\n".to_vec());
        assert!(peer.read().await.is_empty());
        peer.write(&ok(3, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).allow_local_infile(true).build())
        .await
        .unwrap();
    session.set_local_infile_source(&b"1\n2\n3\n"[..]);
    let result = session
        .query("LOAD DATA LOCAL INFILE 'data.csv' INTO TABLE t")
        .await
        .unwrap();
    assert_eq!(result.affected_rows, 3);
    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_client_batch_joins_statements() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;

        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_QUERY);
        assert_eq!(
            String::from_utf8_lossy(&cmd[1..]),
            r"INSERT INTO t VALUES (1, 'a\'b');INSERT INTO t VALUES (2, NULL)"
        );
        peer.write(&ok(
            1,
            status::SERVER_STATUS_AUTOCOMMIT | status::SERVER_MORE_RESULTS_EXISTS,
        ))
        .await;
        peer.write(&ok(1, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).allow_multi_queries(true).build())
        .await
        .unwrap();
    let stmt = ClientPreparedStatement::for_session(&session, "INSERT INTO t VALUES (?, ?)");
    let mut batch = vec![
        stmt.parameters().with(1, 1).unwrap().with(2, "a'b").unwrap(),
        stmt.parameters()
            .with(1, 2)
            .unwrap()
            .with(2, BindValue::Null)
            .unwrap(),
    ];
    let result = stmt.execute_batch(&mut session, &mut batch).await.unwrap();
    assert_eq!(
        result,
        BatchResult {
            affected_rows: 2,
            chunks: 1,
            rows: 2
        }
    );

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_client_batch_without_multi_statements() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        for expected in [&b"DELETE FROM t WHERE id = 1"[..], b"DELETE FROM t WHERE id = 2"] {
            let cmd = peer.command().await;
            assert_eq!(&cmd[1..], expected);
            peer.write(&ok(1, status::SERVER_STATUS_AUTOCOMMIT)).await;
        }
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    let stmt = ClientPreparedStatement::for_session(&session, "DELETE FROM t WHERE id = ?");
    let mut batch = vec![
        stmt.parameters().with(1, 1).unwrap(),
        stmt.parameters().with(1, 2).unwrap(),
    ];
    let result = stmt.execute_batch(&mut session, &mut batch).await.unwrap();
    assert_eq!(result.chunks, 2);
    assert_eq!(result.affected_rows, 2);

    session.close().await.unwrap();
    server.await.unwrap();
}

// ============================================================================
// Server-side prepared statements
// ============================================================================

const STMT_ID: u32 = 7;

async fn prepare_one_param(peer: &mut Peer, sql: &[u8]) {
    let cmd = peer.command().await;
    assert_eq!(cmd[0], command::COM_STMT_PREPARE);
    assert_eq!(&cmd[1..], sql);
    peer.write(&prepare_ok(STMT_ID, 1, 1)).await;
    peer.write(&column("?", column_type::LONGLONG)).await;
    peer.write(&column("id", column_type::LONGLONG)).await;
}

#[tokio::test]
async fn test_prepare_execute_close() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"SELECT id FROM t WHERE id = ?").await;

        // First execution announces the parameter types
        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_EXECUTE, STMT_ID);
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0, 1, column_type::LONGLONG, 0]);
        expected.extend_from_slice(&5i64.to_le_bytes());
        assert_eq!(cmd, expected);
        let mut row = vec![0x00, 0x00];
        row.extend_from_slice(&5i64.to_le_bytes());
        peer.result_set("id", column_type::LONGLONG, &[row]).await;

        // Same types: no type block
        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_EXECUTE, STMT_ID);
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0]);
        expected.extend_from_slice(&6i64.to_le_bytes());
        assert_eq!(cmd, expected);
        peer.result_set("id", column_type::LONGLONG, &[]).await;

        let cmd = peer.command().await;
        assert_eq!(cmd, stmt_header(command::COM_STMT_CLOSE, STMT_ID));
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    let mut stmt = PreparedStatement::prepare(&mut session, "SELECT id FROM t WHERE id = ?")
        .await
        .unwrap();
    assert_eq!(stmt.id(), STMT_ID);
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.columns().len(), 1);
    assert_eq!(session.open_statement_count(), 1);

    let mut params = stmt.parameters().with(1, 5i64).unwrap();
    let result = stmt.execute(&mut session, &mut params).await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].raw(0).unwrap(), RawValue::Int(5));

    let mut params = stmt.parameters().with(1, 6i64).unwrap();
    let result = stmt.execute(&mut session, &mut params).await.unwrap();
    assert!(result.rows.is_empty());

    stmt.close(&mut session).await.unwrap();
    assert_eq!(session.open_statement_count(), 0);
    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_missing_parameter_is_rejected_before_sending() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"SELECT id FROM t WHERE id = ?").await;
        // Nothing is sent for the failed execution
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    let mut stmt = PreparedStatement::prepare(&mut session, "SELECT id FROM t WHERE id = ?")
        .await
        .unwrap();
    let mut params = stmt.parameters();
    let err = stmt.execute(&mut session, &mut params).await.unwrap_err();
    assert!(matches!(err, Error::MissingParameter { .. }));
    assert!(!session.is_closed());

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_stream_parameter_sent_as_long_data() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"UPDATE t SET doc = ?").await;

        for chunk in [&b"0123"[..], b"4567", b"89"] {
            let cmd = peer.command().await;
            let mut expected = stmt_header(command::COM_STMT_SEND_LONG_DATA, STMT_ID);
            expected.extend_from_slice(&[0, 0]);
            expected.extend_from_slice(chunk);
            assert_eq!(cmd, expected);
        }

        // Parameter flagged non-null with no inline value
        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_EXECUTE, STMT_ID);
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0, 1, column_type::BLOB, 0]);
        assert_eq!(cmd, expected);
        peer.write(&ok(1, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).long_data_threshold(4).build())
        .await
        .unwrap();
    let mut stmt = PreparedStatement::prepare(&mut session, "UPDATE t SET doc = ?")
        .await
        .unwrap();
    let mut params = stmt
        .parameters()
        .with(1, BindValue::byte_stream(&b"0123456789"[..]))
        .unwrap();
    let result = stmt.execute(&mut session, &mut params).await.unwrap();
    assert_eq!(result.affected_rows, 1);
    assert!(params.get(1).is_none(), "stream consumed by execution");

    session.close().await.unwrap();
    server.await.unwrap();
}

/// Yields its data once, then fails
struct BrokenReader {
    data: Option<&'static [u8]>,
}

impl AsyncRead for BrokenReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(data);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "source gone"))),
        }
    }
}

#[tokio::test]
async fn test_failed_upload_resets_statement() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"UPDATE t SET doc = ?").await;

        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_SEND_LONG_DATA, STMT_ID);
        expected.extend_from_slice(&[0, 0]);
        expected.extend_from_slice(b"0123");
        assert_eq!(cmd, expected);

        // The partial upload is discarded before the error surfaces
        let cmd = peer.command().await;
        assert_eq!(cmd, stmt_header(command::COM_STMT_RESET, STMT_ID));
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;

        // Next execution carries its value inline
        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_EXECUTE, STMT_ID);
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0, 1, column_type::LONGLONG, 0]);
        expected.extend_from_slice(&9i64.to_le_bytes());
        assert_eq!(cmd, expected);
        peer.write(&ok(1, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).long_data_threshold(4).build())
        .await
        .unwrap();
    let mut stmt = PreparedStatement::prepare(&mut session, "UPDATE t SET doc = ?")
        .await
        .unwrap();
    let mut params = stmt
        .parameters()
        .with(1, BindValue::byte_stream(BrokenReader { data: Some(b"0123") }))
        .unwrap();
    let err = stmt.execute(&mut session, &mut params).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{:?}", err);
    assert!(!session.is_closed());

    let mut params = stmt.parameters().with(1, 9i64).unwrap();
    let result = stmt.execute(&mut session, &mut params).await.unwrap();
    assert_eq!(result.affected_rows, 1);

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_latin1_session_sends_single_byte_text() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.write(&greeting("mysql_native_password")).await;
        let response = peer.read().await;
        assert_eq!(response[8], 8, "latin1 collation in handshake response");
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;

        let cmd = peer.command().await;
        assert_eq!(&cmd[..], b"\x03SELECT 'caf\xE9'");
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;

        // Client-side literal: unrepresentable characters become '?'
        let cmd = peer.command().await;
        assert_eq!(&cmd[..], b"\x03SELECT '\xE9?'");
        peer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;

        // Binary protocol: one byte per character in the lenenc string
        prepare_one_param(&mut peer, b"UPDATE t SET s = ?").await;
        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_EXECUTE, STMT_ID);
        expected.extend_from_slice(&[0, 1, 0, 0, 0, 0, 1, column_type::VAR_STRING, 0]);
        expected.extend_from_slice(&[1, 0xE9]);
        assert_eq!(cmd, expected);
        peer.write(&ok(1, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(
        config(port)
            .character_encoding(CharacterEncoding::Latin1)
            .build(),
    )
    .await
    .unwrap();
    session.query("SELECT 'caf\u{e9}'").await.unwrap();

    let stmt = ClientPreparedStatement::for_session(&session, "SELECT ?");
    let mut params = stmt.parameters().with(1, "\u{e9}\u{20ac}").unwrap();
    stmt.execute(&mut session, &mut params).await.unwrap();

    let mut stmt = PreparedStatement::prepare(&mut session, "UPDATE t SET s = ?")
        .await
        .unwrap();
    let mut params = stmt.parameters().with(1, "\u{e9}").unwrap();
    let result = stmt.execute(&mut session, &mut params).await.unwrap();
    assert_eq!(result.affected_rows, 1);

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_bulk_batch_single_command() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"INSERT INTO t VALUES (?)").await;

        let cmd = peer.command().await;
        let mut expected = stmt_header(command::COM_STMT_BULK_EXECUTE, STMT_ID);
        expected.extend_from_slice(&128u16.to_le_bytes());
        expected.extend_from_slice(&[column_type::LONGLONG, 0]);
        for v in 1i64..=3 {
            expected.push(0);
            expected.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(cmd, expected);
        peer.write(&ok(3, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).build()).await.unwrap();
    let mut stmt = PreparedStatement::prepare(&mut session, "INSERT INTO t VALUES (?)")
        .await
        .unwrap();
    let mut batch: Vec<_> = (1i64..=3)
        .map(|v| stmt.parameters().with(1, v).unwrap())
        .collect();
    let result = stmt.execute_batch(&mut session, &mut batch).await.unwrap();
    assert_eq!(
        result,
        BatchResult {
            affected_rows: 3,
            chunks: 1,
            rows: 3
        }
    );

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_batch_falls_back_to_single_executions() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"INSERT INTO t VALUES (?)").await;
        for _ in 0..2 {
            let cmd = peer.command().await;
            assert_eq!(cmd[0], command::COM_STMT_EXECUTE);
            peer.write(&ok(1, status::SERVER_STATUS_AUTOCOMMIT)).await;
        }
        peer.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(config(port).use_bulk_stmts(false).build())
        .await
        .unwrap();
    assert!(!session.supports_bulk());
    let mut stmt = PreparedStatement::prepare(&mut session, "INSERT INTO t VALUES (?)")
        .await
        .unwrap();
    let mut batch = vec![
        stmt.parameters().with(1, 1).unwrap(),
        stmt.parameters().with(1, "two").unwrap(),
    ];
    let result = stmt.execute_batch(&mut session, &mut batch).await.unwrap();
    assert_eq!(result.chunks, 2);
    assert_eq!(result.affected_rows, 2);

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_statement_mode_follows_configuration() {
    let (port, server) = server(|listener| async move {
        // Client-side: no prepare round trip, literal in the text query
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_QUERY);
        assert_eq!(&cmd[1..], b"UPDATE t SET n = 9");
        peer.write(&ok(4, status::SERVER_STATUS_AUTOCOMMIT)).await;
        peer.expect_quit().await;

        // Server-side: prepare, execute, close
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        prepare_one_param(&mut peer, b"UPDATE t SET n = ?").await;
        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_STMT_EXECUTE);
        peer.write(&ok(4, status::SERVER_STATUS_AUTOCOMMIT)).await;
        let cmd = peer.command().await;
        assert_eq!(cmd[0], command::COM_STMT_CLOSE);
        peer.expect_quit().await;
    })
    .await;

    for server_side in [false, true] {
        let mut session = Session::connect(config(port).use_server_prep_stmts(server_side).build())
            .await
            .unwrap();
        let mut stmt = Statement::prepare(&mut session, "UPDATE t SET n = ?")
            .await
            .unwrap();
        assert_eq!(matches!(stmt, Statement::Server(_)), server_side);
        let mut params = stmt.parameters().with(1, 9).unwrap();
        let result = stmt.execute(&mut session, &mut params).await.unwrap();
        assert_eq!(result.affected_rows, 4);
        stmt.close(&mut session).await.unwrap();
        session.close().await.unwrap();
    }
    server.await.unwrap();
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_timeout_sends_kill_query() {
    let (port, server) = server(|listener| async move {
        let mut main = Peer::accept(&listener).await;
        main.handshake("app").await;
        let cmd = main.command().await;
        assert_eq!(&cmd[1..], b"SELECT SLEEP(10)");

        let mut killer = Peer::accept(&listener).await;
        killer.handshake("app").await;
        let cmd = killer.command().await;
        assert_eq!(cmd[0], command::COM_QUERY);
        assert_eq!(
            String::from_utf8_lossy(&cmd[1..]),
            format!("KILL QUERY {}", THREAD_ID)
        );
        killer.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;
        killer.expect_quit().await;

        main.write(&err(1317, "70100", "Query execution was interrupted"))
            .await;
        let cmd = main.command().await;
        assert_eq!(cmd, vec![command::COM_PING]);
        main.write(&ok(0, status::SERVER_STATUS_AUTOCOMMIT)).await;
        main.expect_quit().await;
    })
    .await;

    let mut session = Session::connect(
        config(port)
            .query_timeout(Duration::from_millis(200))
            .build(),
    )
    .await
    .unwrap();
    let err = session.query("SELECT SLEEP(10)").await.unwrap_err();
    assert!(matches!(err, Error::QueryTimeout), "got {:?}", err);
    assert!(!session.is_closed());
    session.ping().await.unwrap();

    session.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_timeout_kills_connection() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        let _ = peer.command().await;
        // Hold the query open until the client drops the socket
        let mut rest = Vec::new();
        let _ = peer.stream.read_to_end(&mut rest).await;
    })
    .await;

    let mut session = Session::connect(
        config(port)
            .query_timeout(Duration::from_millis(100))
            .timeout_kills_connection(true)
            .build(),
    )
    .await
    .unwrap();
    let err = session.query("SELECT SLEEP(10)").await.unwrap_err();
    assert!(matches!(err, Error::QueryTimeout), "got {:?}", err);
    assert!(session.is_closed());
    assert!(matches!(session.ping().await, Err(Error::ConnectionClosed)));

    drop(session);
    server.await.unwrap();
}

#[tokio::test]
async fn test_user_cancel_through_handle() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        let _ = peer.command().await;
        let mut rest = Vec::new();
        let _ = peer.stream.read_to_end(&mut rest).await;
    })
    .await;

    let mut session = Session::connect(config(port).timeout_kills_connection(true).build())
        .await
        .unwrap();
    let scope = session.cancel_scope(None);
    let handle = scope.handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel().await;
    });

    let mut result = mariadb_wire::QueryResult::default();
    let err = session
        .query_in_scope("SELECT SLEEP(10)", &mut result, scope)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueryCancelled), "got {:?}", err);
    assert!(session.is_closed());

    canceller.await.unwrap();
    drop(session);
    server.await.unwrap();
}

// ============================================================================
// Topology
// ============================================================================

#[tokio::test]
async fn test_failover_skips_unreachable_endpoint() {
    let (port, server) = server(|listener| async move {
        let mut peer = Peer::accept(&listener).await;
        peer.handshake("app").await;
        peer.expect_quit().await;
    })
    .await;

    let raw = format!(
        "mariadb:failover://app:{}@127.0.0.1:1,127.0.0.1:{}/shop?connectTimeout=2000",
        PASSWORD, port
    );
    let connector = Connector::from_descriptor(&raw, &Default::default()).unwrap();
    let session = connector.connect().await.unwrap();
    assert_eq!(session.config().port, port);
    assert!(session.config().use_local_session_state);

    session.close().await.unwrap();
    server.await.unwrap();
}
