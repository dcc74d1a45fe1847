//! Protocol message encoding

use super::codec::{encode_lenenc_bytes, encode_lenenc_int, lenenc_int_size};
use super::constants::{capability, command};
use super::message::{ChangeUser, FrontendMessage, HandshakeResponse};
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into a logical payload (unframed)
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Quit => buf.put_u8(command::COM_QUIT),
        FrontendMessage::InitDb(db) => {
            buf.put_u8(command::COM_INIT_DB);
            buf.put_slice(db);
        }
        FrontendMessage::Query(sql) => {
            buf.reserve(1 + sql.len());
            buf.put_u8(command::COM_QUERY);
            buf.put_slice(sql);
        }
        FrontendMessage::FieldList { table, wildcard } => {
            buf.put_u8(command::COM_FIELD_LIST);
            put_null_terminated(&mut buf, table)?;
            buf.put_slice(wildcard.as_bytes());
        }
        FrontendMessage::Shutdown => {
            buf.put_u8(command::COM_SHUTDOWN);
            buf.put_u8(0); // SHUTDOWN_DEFAULT
        }
        FrontendMessage::Statistics => buf.put_u8(command::COM_STATISTICS),
        FrontendMessage::Ping => buf.put_u8(command::COM_PING),
        FrontendMessage::ChangeUser(change) => encode_change_user(&mut buf, change)?,
        FrontendMessage::ResetConnection => buf.put_u8(command::COM_RESET_CONNECTION),
        FrontendMessage::SetOption(option) => {
            buf.put_u8(command::COM_SET_OPTION);
            buf.put_u16_le(*option);
        }
        FrontendMessage::StmtPrepare(sql) => {
            buf.put_u8(command::COM_STMT_PREPARE);
            buf.put_slice(sql);
        }
        FrontendMessage::StmtExecute { statement_id, body } => {
            buf.reserve(5 + body.len());
            buf.put_u8(command::COM_STMT_EXECUTE);
            buf.put_u32_le(*statement_id);
            buf.put_slice(body);
        }
        FrontendMessage::StmtBulkExecute { statement_id, body } => {
            buf.reserve(5 + body.len());
            buf.put_u8(command::COM_STMT_BULK_EXECUTE);
            buf.put_u32_le(*statement_id);
            buf.put_slice(body);
        }
        FrontendMessage::StmtSendLongData {
            statement_id,
            param_id,
            data,
        } => {
            buf.reserve(7 + data.len());
            buf.put_u8(command::COM_STMT_SEND_LONG_DATA);
            buf.put_u32_le(*statement_id);
            buf.put_u16_le(*param_id);
            buf.put_slice(data);
        }
        FrontendMessage::StmtClose(id) => {
            buf.put_u8(command::COM_STMT_CLOSE);
            buf.put_u32_le(*id);
        }
        FrontendMessage::StmtReset(id) => {
            buf.put_u8(command::COM_STMT_RESET);
            buf.put_u32_le(*id);
        }
        FrontendMessage::SslRequest {
            capabilities,
            max_packet_size,
            charset,
        } => encode_client_header(&mut buf, *capabilities, *max_packet_size, *charset),
        FrontendMessage::HandshakeResponse(response) => {
            encode_handshake_response(&mut buf, response)?
        }
        FrontendMessage::AuthData(data) => buf.put_slice(data),
    }

    Ok(buf)
}

/// Fixed 32-byte prefix shared by the SSL request and the handshake response
fn encode_client_header(buf: &mut BytesMut, capabilities: u64, max_packet_size: u32, charset: u8) {
    buf.put_u32_le(capabilities as u32);
    buf.put_u32_le(max_packet_size);
    buf.put_u8(charset);
    buf.put_slice(&[0u8; 19]);
    // MariaDB extended capabilities occupy the last 4 reserved bytes
    buf.put_u32_le((capabilities >> 32) as u32);
}

fn encode_handshake_response(buf: &mut BytesMut, r: &HandshakeResponse) -> io::Result<()> {
    let caps = r.capabilities as u32;
    encode_client_header(buf, r.capabilities, r.max_packet_size, r.charset);
    put_null_terminated(buf, &r.user)?;
    put_auth_response(buf, caps, &r.auth_response)?;
    if caps & capability::CLIENT_CONNECT_WITH_DB != 0 {
        put_null_terminated(buf, r.database.as_deref().unwrap_or(""))?;
    }
    if caps & capability::CLIENT_PLUGIN_AUTH != 0 {
        put_null_terminated(buf, &r.plugin)?;
    }
    if caps & capability::CLIENT_CONNECT_ATTRS != 0 {
        put_attributes(buf, &r.attributes);
    }
    Ok(())
}

fn encode_change_user(buf: &mut BytesMut, c: &ChangeUser) -> io::Result<()> {
    let caps = c.capabilities as u32;
    buf.put_u8(command::COM_CHANGE_USER);
    put_null_terminated(buf, &c.user)?;
    if caps & capability::CLIENT_SECURE_CONNECTION != 0 {
        let len = u8::try_from(c.auth_response.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "auth response too long")
        })?;
        buf.put_u8(len);
        buf.put_slice(&c.auth_response);
    } else {
        buf.put_slice(&c.auth_response);
        buf.put_u8(0);
    }
    put_null_terminated(buf, c.database.as_deref().unwrap_or(""))?;
    buf.put_u16_le(u16::from(c.charset));
    if caps & capability::CLIENT_PLUGIN_AUTH != 0 {
        put_null_terminated(buf, &c.plugin)?;
    }
    if caps & capability::CLIENT_CONNECT_ATTRS != 0 {
        put_attributes(buf, &c.attributes);
    }
    Ok(())
}

fn put_auth_response(buf: &mut BytesMut, caps: u32, auth: &[u8]) -> io::Result<()> {
    if caps & capability::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        encode_lenenc_bytes(buf, auth);
    } else if caps & capability::CLIENT_SECURE_CONNECTION != 0 {
        let len = u8::try_from(auth.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "auth response too long")
        })?;
        buf.put_u8(len);
        buf.put_slice(auth);
    } else {
        buf.put_slice(auth);
        buf.put_u8(0);
    }
    Ok(())
}

fn put_attributes(buf: &mut BytesMut, attributes: &[(String, String)]) {
    let total: usize = attributes
        .iter()
        .map(|(k, v)| {
            lenenc_int_size(k.len() as u64) + k.len() + lenenc_int_size(v.len() as u64) + v.len()
        })
        .sum();
    encode_lenenc_int(buf, total as u64);
    for (key, value) in attributes {
        encode_lenenc_bytes(buf, key.as_bytes());
        encode_lenenc_bytes(buf, value.as_bytes());
    }
}

fn put_null_terminated(buf: &mut BytesMut, s: &str) -> io::Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "string contains an embedded NUL byte",
        ));
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{mariadb_capability, UTF8MB4_GENERAL_CI};
    use bytes::Bytes;

    #[test]
    fn test_encode_query() {
        let buf = encode_message(&FrontendMessage::Query(Bytes::from_static(b"SELECT 1"))).unwrap();
        assert_eq!(buf[0], command::COM_QUERY);
        assert_eq!(&buf[1..], b"SELECT 1");
    }

    #[test]
    fn test_encode_quit_and_ping() {
        assert_eq!(&encode_message(&FrontendMessage::Quit).unwrap()[..], &[0x01]);
        assert_eq!(&encode_message(&FrontendMessage::Ping).unwrap()[..], &[0x0E]);
    }

    #[test]
    fn test_encode_ssl_request() {
        let caps = u64::from(capability::CLIENT_SSL | capability::CLIENT_PROTOCOL_41)
            | mariadb_capability::MARIADB_CLIENT_STMT_BULK_OPERATIONS;
        let buf = encode_message(&FrontendMessage::SslRequest {
            capabilities: caps,
            max_packet_size: 0x00FF_FFFF,
            charset: UTF8MB4_GENERAL_CI,
        })
        .unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(
            u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            capability::CLIENT_SSL | capability::CLIENT_PROTOCOL_41
        );
        assert_eq!(buf[8], UTF8MB4_GENERAL_CI);
        assert_eq!(u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]), 1 << 2);
    }

    #[test]
    fn test_encode_handshake_response_lenenc_auth() {
        let response = HandshakeResponse {
            capabilities: u64::from(
                capability::CLIENT_PROTOCOL_41
                    | capability::CLIENT_SECURE_CONNECTION
                    | capability::CLIENT_PLUGIN_AUTH
                    | capability::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
                    | capability::CLIENT_CONNECT_WITH_DB,
            ),
            max_packet_size: 1024,
            charset: UTF8MB4_GENERAL_CI,
            user: "app".into(),
            auth_response: vec![0xAA; 20],
            database: Some("shop".into()),
            plugin: "mysql_native_password".into(),
            attributes: vec![],
        };
        let buf = encode_message(&FrontendMessage::HandshakeResponse(response)).unwrap();
        assert_eq!(&buf[32..36], b"app\0");
        assert_eq!(buf[36], 20);
        assert_eq!(&buf[57..62], b"shop\0");
        assert!(buf.ends_with(b"mysql_native_password\0"));
    }

    #[test]
    fn test_encode_connect_attributes() {
        let mut buf = BytesMut::new();
        put_attributes(&mut buf, &[("_client_name".into(), "x".into())]);
        // total length = 1 + 12 + 1 + 1
        assert_eq!(buf[0], 15);
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_encode_send_long_data() {
        let buf = encode_message(&FrontendMessage::StmtSendLongData {
            statement_id: 7,
            param_id: 2,
            data: Bytes::from_static(b"abc"),
        })
        .unwrap();
        assert_eq!(&buf[..], &[0x18, 7, 0, 0, 0, 2, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_change_user() {
        let change = ChangeUser {
            capabilities: u64::from(
                capability::CLIENT_SECURE_CONNECTION | capability::CLIENT_PLUGIN_AUTH,
            ),
            user: "bob".into(),
            auth_response: vec![1, 2],
            database: None,
            charset: UTF8MB4_GENERAL_CI,
            plugin: "mysql_native_password".into(),
            attributes: vec![],
        };
        let buf = encode_message(&FrontendMessage::ChangeUser(change)).unwrap();
        assert_eq!(&buf[..8], &[0x11, b'b', b'o', b'b', 0, 2, 1, 2]);
        assert_eq!(buf[8], 0, "empty database");
        assert_eq!(&buf[9..11], &[45, 0]);
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let err = encode_message(&FrontendMessage::FieldList {
            table: "a\0b".into(),
            wildcard: String::new(),
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
