//! MySQL packet parser
//!
//! Framed packet reader/writer plus handshake encode/decode. The reader is
//! used on both the upstream socket and the recorder's in-memory pipe.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec::*;
use super::packets::*;
use crate::error::{ProxyError, Result};

// ============================================================================
// Packet I/O
// ============================================================================

/// Read a complete MySQL packet from a stream.
///
/// Reads exactly 4 header bytes, then exactly `length` payload bytes. A
/// stream that ends inside the payload is a framing error; a stream that
/// ends cleanly before the header is ordinary EOF (surfaced as `Io`).
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let length = read_u24(&header[..3])?;
    let sequence_id = header[3];

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProxyError::Framing(format!("packet body truncated (want {} bytes)", length))
        } else {
            ProxyError::Io(e)
        }
    })?;

    Ok(Packet {
        length,
        sequence_id,
        payload,
    })
}

/// Frame a payload and write it out in full.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    sequence_id: u8,
    payload: &[u8],
) -> Result<()> {
    writer.write_all(&wrap_packet(payload, sequence_id)).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// HandshakeV10 (server greeting)
// ============================================================================

/// Parse a HandshakeV10 greeting from payload bytes.
pub fn parse_handshake_v10(payload: &[u8]) -> Result<HandshakeV10> {
    let mut cursor = 0;

    let protocol_version = read_u8(payload)?;
    cursor += 1;

    if protocol_version != PROTOCOL_VERSION {
        return Err(ProxyError::Unsupported(format!(
            "greeting protocol version {}",
            protocol_version
        )));
    }

    let (server_version, consumed) = read_string_null(&payload[cursor..])?;
    cursor += consumed;

    let connection_id = read_u32(&payload[cursor..])?;
    cursor += 4;

    // auth-plugin-data part 1 (8 bytes)
    let mut auth_plugin_data = [0u8; AUTH_PLUGIN_DATA_LEN];
    if payload.len() < cursor + 8 {
        return Err(ProxyError::Framing("greeting auth data truncated".into()));
    }
    auth_plugin_data[..8].copy_from_slice(&payload[cursor..cursor + 8]);
    cursor += 8;

    // filler byte after the first scramble half
    cursor += 1;
    if cursor > payload.len() {
        return Err(ProxyError::Framing("greeting truncated after scramble".into()));
    }

    let capability_lower = read_u16(&payload[cursor..])?;
    cursor += 2;

    let character_set = read_u8(&payload[cursor..])?;
    cursor += 1;

    let status_flags = read_u16(&payload[cursor..])?;
    cursor += 2;

    let capability_upper = read_u16(&payload[cursor..])?;
    cursor += 2;

    // auth-plugin-data length (expected 21, not enforced) plus 10 reserved bytes
    cursor += 1 + 10;
    if cursor > payload.len() {
        return Err(ProxyError::Framing("greeting reserved bytes truncated".into()));
    }

    // auth-plugin-data part 2, null-terminated, kept with its terminator
    let part2_end = payload[cursor..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProxyError::Framing("greeting auth data part 2 unterminated".into()))?;
    let part2 = &payload[cursor..cursor + part2_end + 1];
    let copy_len = part2.len().min(AUTH_PLUGIN_DATA_LEN - 8);
    auth_plugin_data[8..8 + copy_len].copy_from_slice(&part2[..copy_len]);
    cursor += part2.len();

    let (auth_plugin_name, _) = read_string_null(&payload[cursor..])?;

    Ok(HandshakeV10 {
        protocol_version,
        server_version,
        connection_id,
        character_set,
        status_flags,
        capability_flags: (capability_upper as u32) << 16 | capability_lower as u32,
        auth_plugin_data,
        auth_plugin_name,
    })
}

/// Build a HandshakeV10 payload.
///
/// The proxy always advertises utf8mb4_general_ci and autocommit status in
/// its rewritten greeting, whatever the upstream reported; capability flags
/// and the scramble are taken from the struct.
pub fn build_handshake_v10(handshake: &HandshakeV10) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);

    payload.push(handshake.protocol_version);
    write_string_null(&mut payload, &handshake.server_version);
    payload.extend_from_slice(&handshake.connection_id.to_le_bytes());

    // first 8 scramble bytes, then the 0x00 filler
    payload.extend_from_slice(&handshake.auth_plugin_data[..8]);
    payload.push(0);

    payload.extend_from_slice(&(handshake.capability_flags as u16).to_le_bytes());
    payload.push(CHARSET_UTF8MB4_GENERAL_CI);
    payload.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
    payload.extend_from_slice(&((handshake.capability_flags >> 16) as u16).to_le_bytes());

    // auth plugin data length is always 21 (8 + 13) on the wire
    payload.push(AUTH_PLUGIN_DATA_LEN as u8);
    payload.extend_from_slice(&[0u8; 10]);

    // second scramble half carries its own 0x00 terminator
    payload.extend_from_slice(&handshake.auth_plugin_data[8..]);

    write_string_null(&mut payload, &handshake.auth_plugin_name);

    payload
}

// ============================================================================
// HandshakeResponse (client reply)
// ============================================================================

/// Parse a HandshakeResponse from payload bytes.
///
/// Clients that do not advertise CLIENT_PROTOCOL_41 and CLIENT_PLUGIN_AUTH
/// are refused.
pub fn parse_handshake_response(payload: &[u8], sequence_id: u8) -> Result<HandshakeResponse> {
    let mut cursor = 0;

    let capability_flags = read_u32(payload)?;
    cursor += 4;

    if capability_flags & CLIENT_PROTOCOL_41 == 0 {
        return Err(ProxyError::Unsupported(
            "client does not speak CLIENT_PROTOCOL_41".into(),
        ));
    }
    if capability_flags & CLIENT_PLUGIN_AUTH == 0 {
        return Err(ProxyError::Unsupported(
            "client does not speak CLIENT_PLUGIN_AUTH".into(),
        ));
    }

    let max_packet_size = read_u32(&payload[cursor..])?;
    cursor += 4;

    let character_set = read_u8(&payload[cursor..])?;
    cursor += 1;

    // 23 reserved zero bytes
    cursor += 23;
    if cursor > payload.len() {
        return Err(ProxyError::Framing("response reserved bytes truncated".into()));
    }

    let (username, consumed) = read_string_null(&payload[cursor..])?;
    cursor += consumed;

    let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        let (len, consumed) = read_lenenc_int(&payload[cursor..])?;
        cursor += consumed;
        let end = cursor + len as usize;
        if end > payload.len() {
            return Err(ProxyError::Framing("auth response truncated".into()));
        }
        let bytes = payload[cursor..end].to_vec();
        cursor = end;
        bytes
    } else {
        let len = read_u8(&payload[cursor..])? as usize;
        cursor += 1;
        let end = cursor + len;
        if end > payload.len() {
            return Err(ProxyError::Framing("auth response truncated".into()));
        }
        let bytes = payload[cursor..end].to_vec();
        cursor = end;
        bytes
    };

    let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && cursor < payload.len() {
        let (db, consumed) = read_string_null(&payload[cursor..])?;
        cursor += consumed;
        Some(db)
    } else {
        None
    };

    // CLIENT_PLUGIN_AUTH is mandatory here, but tolerate a missing trailing name
    let auth_plugin_name = if cursor < payload.len() {
        let (name, consumed) = read_string_null(&payload[cursor..])?;
        cursor += consumed;
        Some(name)
    } else {
        None
    };

    let connect_attrs = if capability_flags & CLIENT_CONNECT_ATTRS != 0 && cursor < payload.len() {
        match parse_connect_attrs(&payload[cursor..]) {
            Ok(attrs) => Some(attrs),
            Err(e) => {
                warn!("failed to parse client connect attrs: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(HandshakeResponse {
        capability_flags,
        max_packet_size,
        character_set,
        username,
        auth_response,
        database,
        auth_plugin_name,
        connect_attrs,
        sequence_id,
    })
}

/// Build a HandshakeResponse payload.
pub fn build_handshake_response(response: &HandshakeResponse) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);

    payload.extend_from_slice(&response.capability_flags.to_le_bytes());
    payload.extend_from_slice(&response.max_packet_size.to_le_bytes());
    payload.push(response.character_set);
    payload.extend_from_slice(&[0u8; 23]);

    write_string_null(&mut payload, &response.username);

    if response.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        write_lenenc_bytes(&mut payload, &response.auth_response);
    } else {
        payload.push(response.auth_response.len() as u8);
        payload.extend_from_slice(&response.auth_response);
    }

    if response.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
        if let Some(ref db) = response.database {
            write_string_null(&mut payload, db);
        }
    }

    if response.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
        if let Some(ref name) = response.auth_plugin_name {
            write_string_null(&mut payload, name);
        }
    }

    if response.capability_flags & CLIENT_CONNECT_ATTRS != 0 {
        if let Some(ref attrs) = response.connect_attrs {
            let mut attr_bytes = Vec::new();
            for (key, value) in attrs {
                write_lenenc_bytes(&mut attr_bytes, key.as_bytes());
                write_lenenc_bytes(&mut attr_bytes, value.as_bytes());
            }
            if !attr_bytes.is_empty() {
                write_lenenc_int(&mut payload, attr_bytes.len() as u64);
                payload.extend_from_slice(&attr_bytes);
            }
        }
    }

    payload
}

/// Parse connection attributes: a length-encoded total byte length, then
/// repeated (length-encoded key, length-encoded value) pairs. Order is kept.
fn parse_connect_attrs(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();

    let (total_len, consumed) = read_lenenc_int(data)?;
    let mut cursor = consumed;
    let end = cursor + total_len as usize;
    if end > data.len() {
        return Err(ProxyError::Framing("connect attrs truncated".into()));
    }

    while cursor < end {
        let (key_len, consumed) = read_lenenc_int(&data[cursor..])?;
        cursor += consumed;
        if cursor + key_len as usize > end {
            return Err(ProxyError::Framing("connect attr key truncated".into()));
        }
        let key = String::from_utf8_lossy(&data[cursor..cursor + key_len as usize]).into_owned();
        cursor += key_len as usize;

        let (value_len, consumed) = read_lenenc_int(&data[cursor..])?;
        cursor += consumed;
        if cursor + value_len as usize > end {
            return Err(ProxyError::Framing("connect attr value truncated".into()));
        }
        let value =
            String::from_utf8_lossy(&data[cursor..cursor + value_len as usize]).into_owned();
        cursor += value_len as usize;

        attrs.push((key, value));
    }

    Ok(attrs)
}
