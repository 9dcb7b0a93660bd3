//! MySQL wire protocol
//!
//! This module contains:
//! - Packet and handshake structures plus protocol constants
//! - Pure byte-slice transcoders (integers, strings, length-encoded values)
//! - Framed packet reader/writer and handshake encode/decode

pub mod codec;
pub mod packets;
pub mod parser;

pub use codec::*;
pub use packets::*;
pub use parser::*;
