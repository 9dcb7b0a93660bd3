//! MySQL packet structures
//!
//! Wire protocol structures for the connection phase and the command stream.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

/// A framed unit of MySQL wire traffic: 3-byte length, 1-byte sequence id,
/// then exactly `length` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Payload length (24-bit on the wire, max 16MB - 1)
    pub length: u32,
    /// Per-exchange sequence id assigned by the peer that produced the packet
    pub sequence_id: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialize as `u24_le(length) + u8(sequence_id) + payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        super::codec::wrap_packet(&self.payload, self.sequence_id)
    }
}

/// Server greeting (protocol version 10, server -> client).
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_v10.html>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeV10 {
    /// Protocol version (always 10)
    pub protocol_version: u8,
    /// Server version string (null-terminated on the wire)
    pub server_version: String,
    /// Connection ID
    pub connection_id: u32,
    /// Character set / collation id
    pub character_set: u8,
    /// Server status flags
    pub status_flags: u16,
    /// Combined 32-bit capability flags (lower and upper halves reassembled)
    pub capability_flags: u32,
    /// Full 21-byte auth plugin data (8-byte part 1 + 13-byte part 2, the
    /// last byte of part 2 being the 0x00 terminator)
    pub auth_plugin_data: [u8; AUTH_PLUGIN_DATA_LEN],
    /// Auth plugin name
    pub auth_plugin_name: String,
}

/// Client reply to the greeting (client -> server).
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Client capability flags (4 bytes)
    pub capability_flags: u32,
    /// Max packet size
    pub max_packet_size: u32,
    /// Character set
    pub character_set: u8,
    /// Username (null-terminated on the wire)
    pub username: String,
    /// Auth response bytes (length-encoded or 1-byte-length-prefixed)
    pub auth_response: Vec<u8>,
    /// Database name (if CLIENT_CONNECT_WITH_DB)
    pub database: Option<String>,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: Option<String>,
    /// Connection attributes in wire order (if CLIENT_CONNECT_ATTRS)
    pub connect_attrs: Option<Vec<(String, String)>>,
    /// Sequence id the client used; preserved when re-emitting upstream
    pub sequence_id: u8,
}

/// Wire length of the full auth plugin data (scramble + terminator)
pub const AUTH_PLUGIN_DATA_LEN: usize = 21;

/// The only protocol version this proxy understands
pub const PROTOCOL_VERSION: u8 = 10;

/// utf8mb4_general_ci collation id, advertised in every rewritten greeting
pub const CHARSET_UTF8MB4_GENERAL_CI: u8 = 45;

// ============================================================================
// Capability Flags
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
// ============================================================================

/// Can specify db on connect
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
/// Can use compression protocol
pub const CLIENT_COMPRESS: u32 = 0x0000_0020;
/// New 4.1 protocol
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
/// Switch to SSL after handshake
pub const CLIENT_SSL: u32 = 0x0000_0800;
/// Client supports plugin authentication
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
/// Client supports connection attributes
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
/// Length of auth response can be > 255
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;

// ============================================================================
// Status Flags
// ============================================================================

/// Server status: auto-commit enabled
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

// ============================================================================
// Response packet markers
// ============================================================================

/// First payload byte of an OK packet
pub const OK_PACKET: u8 = 0x00;
/// First payload byte of an ERR packet
pub const ERR_PACKET: u8 = 0xFF;

// ============================================================================
// Command bytes inspected by the query recorder
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/my__command_8h.html
// ============================================================================

/// Execute SQL query (COM_QUERY)
pub const COM_QUERY: u8 = 0x03;
/// Prepare statement (COM_STMT_PREPARE)
pub const COM_STMT_PREPARE: u8 = 0x16;
/// Execute prepared statement (COM_STMT_EXECUTE)
pub const COM_STMT_EXECUTE: u8 = 0x17;
/// Close prepared statement (COM_STMT_CLOSE)
pub const COM_STMT_CLOSE: u8 = 0x19;

// ============================================================================
// Binary protocol field types (COM_STMT_EXECUTE argument values)
// ============================================================================

/// 1-byte integer
pub const FIELD_TYPE_TINY: u8 = 0x01;
/// 4-byte integer
pub const FIELD_TYPE_LONG: u8 = 0x03;
/// 8-byte integer
pub const FIELD_TYPE_LONGLONG: u8 = 0x08;
/// 4-byte integer (3-byte column type, but 4 bytes in the binary protocol)
pub const FIELD_TYPE_INT24: u8 = 0x09;
/// Bit field, 1 byte in the binary protocol
pub const FIELD_TYPE_BIT: u8 = 0x10;
