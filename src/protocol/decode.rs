//! Protocol message decoding
//!
//! Every function takes one reassembled logical payload (see
//! [`take_message`](super::packet::take_message)) and never reads past it.

use super::codec::{decode_lenenc_bytes, decode_lenenc_int, decode_null_terminated, decode_uint, ByteOrder};
use super::constants::{capability, response, MAX_PACKET_PAYLOAD};
use super::message::{
    AuthSwitchRequest, ColumnDefinition, CommandResponse, EofPacket, ErrPacket, InitialHandshake,
    OkPacket, PrepareOk,
};
use std::io;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn expect_header(data: &[u8], header: u8, what: &str) -> io::Result<()> {
    match data.first() {
        Some(&b) if b == header => Ok(()),
        Some(&b) => Err(invalid(format!(
            "{}: unexpected header byte 0x{:02X}",
            what, b
        ))),
        None => Err(invalid(format!("{}: empty payload", what))),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn u16_at(data: &[u8], offset: usize) -> io::Result<u16> {
    Ok(decode_uint(data, offset, 2, ByteOrder::Little)? as u16)
}

fn u32_at(data: &[u8], offset: usize) -> io::Result<u32> {
    Ok(decode_uint(data, offset, 4, ByteOrder::Little)? as u32)
}

/// Decode the server greeting (protocol version 10)
pub fn decode_handshake(data: &[u8]) -> io::Result<InitialHandshake> {
    let protocol_version = *data.first().ok_or_else(|| invalid("empty handshake"))?;
    let mut pos = 1;

    let (version, consumed) = decode_null_terminated(data, pos)?;
    let server_version = lossy(version.slice(data));
    pos += consumed;

    let connection_id = u32_at(data, pos)?;
    pos += 4;

    if data.len() < pos + 9 {
        return Err(invalid("handshake truncated in seed"));
    }
    let mut seed = data[pos..pos + 8].to_vec();
    pos += 9; // seed part 1 + filler

    let cap_low = u16_at(data, pos)?;
    pos += 2;

    // Pre-4.1 servers end the greeting here
    if pos >= data.len() {
        return Ok(InitialHandshake {
            protocol_version,
            server_version,
            connection_id,
            seed,
            capabilities: u64::from(cap_low),
            charset: 0,
            status_flags: 0,
            auth_plugin_name: String::new(),
        });
    }

    let charset = data[pos];
    pos += 1;
    let status_flags = u16_at(data, pos)?;
    pos += 2;
    let cap_high = u16_at(data, pos)?;
    pos += 2;
    let mut capabilities = u64::from(cap_low) | (u64::from(cap_high) << 16);

    if data.len() < pos + 11 {
        return Err(invalid("handshake truncated in reserved bytes"));
    }
    let auth_data_len = data[pos] as usize;
    pos += 1;
    pos += 6;
    if capabilities & u64::from(capability::CLIENT_MYSQL) == 0 {
        capabilities |= u64::from(u32_at(data, pos)?) << 32;
    }
    pos += 4;

    if capabilities & u64::from(capability::CLIENT_SECURE_CONNECTION) != 0 {
        let part2_len = auth_data_len.saturating_sub(8).max(13);
        let end = (pos + part2_len).min(data.len());
        let part2 = &data[pos..end];
        // Trailing NUL is not part of the seed
        let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
        seed.extend_from_slice(part2);
        pos = end;
    }

    let mut auth_plugin_name = String::new();
    if capabilities & u64::from(capability::CLIENT_PLUGIN_AUTH) != 0 && pos < data.len() {
        let rest = &data[pos..];
        let name = match rest.iter().position(|&b| b == 0) {
            Some(nul) => &rest[..nul],
            None => rest,
        };
        auth_plugin_name = lossy(name);
    }

    Ok(InitialHandshake {
        protocol_version,
        server_version,
        connection_id,
        seed,
        capabilities,
        charset,
        status_flags,
        auth_plugin_name,
    })
}

/// Decode an OK packet (header 0x00, or 0xFE when it terminates a result set)
pub fn decode_ok(data: &[u8]) -> io::Result<OkPacket> {
    match data.first() {
        Some(&response::OK) | Some(&response::EOF) => {}
        _ => return Err(invalid("not an OK packet")),
    }
    let mut pos = 1;
    let (affected, consumed) = decode_lenenc_int(data, pos)?;
    pos += consumed;
    let (last_id, consumed) = decode_lenenc_int(data, pos)?;
    pos += consumed;

    let mut ok = OkPacket {
        affected_rows: affected.unwrap_or(0),
        last_insert_id: last_id.unwrap_or(0),
        ..Default::default()
    };
    if data.len() >= pos + 4 {
        ok.status_flags = u16_at(data, pos)?;
        ok.warnings = u16_at(data, pos + 2)?;
        pos += 4;
        ok.info = lossy(&data[pos..]);
    }
    Ok(ok)
}

/// Decode an ERR packet
pub fn decode_err(data: &[u8]) -> io::Result<ErrPacket> {
    expect_header(data, response::ERR, "error packet")?;
    let code = u16_at(data, 1)?;
    let mut pos = 3;
    let sql_state = if data.get(pos) == Some(&b'#') && data.len() >= pos + 6 {
        let state = lossy(&data[pos + 1..pos + 6]);
        pos += 6;
        state
    } else {
        "HY000".to_string()
    };
    Ok(ErrPacket {
        code,
        sql_state,
        message: lossy(data.get(pos..).unwrap_or_default()),
    })
}

/// Whether `data` is a classic EOF packet
pub fn is_eof_packet(data: &[u8]) -> bool {
    data.first() == Some(&response::EOF) && data.len() < 9
}

/// Whether `data` ends a row stream
///
/// With `CLIENT_DEPRECATE_EOF` the terminator is an OK packet carrying the EOF
/// header, which can be longer than a classic EOF but never a full packet.
pub fn is_result_terminator(data: &[u8], deprecate_eof: bool) -> bool {
    if deprecate_eof {
        data.first() == Some(&response::EOF) && data.len() < MAX_PACKET_PAYLOAD
    } else {
        is_eof_packet(data)
    }
}

/// Decode an EOF packet
pub fn decode_eof(data: &[u8]) -> io::Result<EofPacket> {
    expect_header(data, response::EOF, "EOF packet")?;
    if data.len() < 5 {
        return Ok(EofPacket::default());
    }
    Ok(EofPacket {
        warnings: u16_at(data, 1)?,
        status_flags: u16_at(data, 3)?,
    })
}

/// Decode a column definition (protocol 4.1 layout)
pub fn decode_column_definition(data: &[u8]) -> io::Result<ColumnDefinition> {
    let mut pos = 0;
    let next_string = |pos: &mut usize| -> io::Result<String> {
        let (window, consumed) = decode_lenenc_bytes(data, *pos)?;
        *pos += consumed;
        Ok(window.map(|w| lossy(w.slice(data))).unwrap_or_default())
    };

    let _catalog = next_string(&mut pos)?;
    let schema = next_string(&mut pos)?;
    let table = next_string(&mut pos)?;
    let org_table = next_string(&mut pos)?;
    let name = next_string(&mut pos)?;
    let org_name = next_string(&mut pos)?;

    // Length of the fixed fields, always 0x0C
    let (_, consumed) = decode_lenenc_int(data, pos)?;
    pos += consumed;
    if data.len() < pos + 10 {
        return Err(invalid("column definition truncated"));
    }

    Ok(ColumnDefinition {
        schema,
        table,
        org_table,
        name,
        org_name,
        character_set: u16_at(data, pos)?,
        column_length: u32_at(data, pos + 2)?,
        column_type: data[pos + 6],
        flags: u16_at(data, pos + 7)?,
        decimals: data[pos + 9],
    })
}

/// Decode an authentication switch request
pub fn decode_auth_switch(data: &[u8]) -> io::Result<AuthSwitchRequest> {
    expect_header(data, response::EOF, "auth switch request")?;
    // Pre-plugin servers send a bare 0xFE asking for the old password scheme
    if data.len() == 1 {
        return Ok(AuthSwitchRequest {
            plugin_name: "mysql_old_password".to_string(),
            data: Vec::new(),
        });
    }
    let (name, consumed) = decode_null_terminated(data, 1)?;
    let rest = &data[1 + consumed..];
    let rest = rest.strip_suffix(&[0]).unwrap_or(rest);
    Ok(AuthSwitchRequest {
        plugin_name: lossy(name.slice(data)),
        data: rest.to_vec(),
    })
}

/// Decode the first packet of a COM_STMT_PREPARE response
pub fn decode_prepare_ok(data: &[u8]) -> io::Result<PrepareOk> {
    expect_header(data, response::OK, "prepare response")?;
    if data.len() < 9 {
        return Err(invalid("prepare response truncated"));
    }
    Ok(PrepareOk {
        statement_id: u32_at(data, 1)?,
        num_columns: u16_at(data, 5)?,
        num_params: u16_at(data, 7)?,
        warnings: if data.len() >= 12 { u16_at(data, 10)? } else { 0 },
    })
}

/// Classify the first response packet to a command
pub fn classify_response(data: &[u8]) -> io::Result<CommandResponse> {
    match data.first() {
        None => Err(invalid("empty response")),
        Some(&response::OK) => Ok(CommandResponse::Ok(decode_ok(data)?)),
        Some(&response::ERR) => Ok(CommandResponse::Err(decode_err(data)?)),
        Some(&response::LOCAL_INFILE) => Ok(CommandResponse::LocalInfile {
            filename: lossy(&data[1..]),
        }),
        Some(&response::EOF) if is_eof_packet(data) => {
            let eof = decode_eof(data)?;
            Ok(CommandResponse::Ok(OkPacket {
                status_flags: eof.status_flags,
                warnings: eof.warnings,
                ..Default::default()
            }))
        }
        Some(_) => {
            let (count, _) = decode_lenenc_int(data, 0)?;
            let column_count =
                count.ok_or_else(|| invalid("NULL column count in result set header"))?;
            Ok(CommandResponse::ResultSet { column_count })
        }
    }
}
