//! COM_STMT_EXECUTE binary argument parsing
//!
//! Payload layout after the command byte: statement id (u32), flags (u8),
//! iteration count (u32), null bitmap (one bit per placeholder), the
//! new-params-bound flag, then per-placeholder type/unsigned pairs followed
//! by the non-null values.

use crate::error::{ProxyError, Result};
use crate::protocol::codec::read_lenenc_int;
use crate::protocol::packets::{
    FIELD_TYPE_BIT, FIELD_TYPE_INT24, FIELD_TYPE_LONG, FIELD_TYPE_LONGLONG, FIELD_TYPE_TINY,
};

/// One bound argument of an executed prepared statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindArg {
    /// Binary protocol field type code
    pub field_type: u8,
    /// Unsigned flag byte as sent by the client (carried, not interpreted)
    pub unsigned: u8,
    /// Decoded value
    pub value: BindValue,
}

/// Decoded argument value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Null,
    UInt(u64),
    Text(String),
}

fn truncated(what: &str) -> ProxyError {
    ProxyError::ParseArgs(format!("execute payload truncated at {}", what))
}

/// Parse the bound arguments of a COM_STMT_EXECUTE payload.
///
/// `placeholders` is the number of `?` markers in the statement's SQL; it
/// determines the null bitmap width. An empty payload or a statement without
/// placeholders yields no arguments.
pub fn parse_stmt_args(placeholders: usize, payload: &[u8]) -> Result<Vec<BindArg>> {
    if placeholders == 0 || payload.is_empty() {
        return Ok(Vec::new());
    }

    // command (1) + statement id (4) + flags (1) + iteration count (4)
    let mut cursor = 1 + 4 + 1 + 4;

    let bitmap_len = placeholders.div_ceil(8);
    if payload.len() < cursor + bitmap_len + 1 {
        return Err(truncated("null bitmap"));
    }
    let null_bitmap = &payload[cursor..cursor + bitmap_len];
    cursor += bitmap_len;

    let new_params_bound = payload[cursor];
    cursor += 1;

    if new_params_bound != 0x01 {
        return Err(ProxyError::ParseArgs(
            "new-params-bound flag not set, parameter types unavailable".into(),
        ));
    }

    if payload.len() < cursor + placeholders * 2 {
        return Err(truncated("parameter types"));
    }
    let mut args = Vec::with_capacity(placeholders);
    for _ in 0..placeholders {
        args.push(BindArg {
            field_type: payload[cursor],
            unsigned: payload[cursor + 1],
            value: BindValue::Null,
        });
        cursor += 2;
    }

    for (i, arg) in args.iter_mut().enumerate() {
        // bit i lives in byte i/8 at position i%8
        if null_bitmap[i / 8] & (1 << (i % 8)) != 0 {
            continue;
        }

        match arg.field_type {
            FIELD_TYPE_TINY | FIELD_TYPE_BIT => {
                if payload.len() < cursor + 1 {
                    return Err(truncated("tiny value"));
                }
                arg.value = BindValue::UInt(payload[cursor] as u64);
                cursor += 1;
            }
            FIELD_TYPE_INT24 | FIELD_TYPE_LONG => {
                if payload.len() < cursor + 4 {
                    return Err(truncated("long value"));
                }
                let bytes = [
                    payload[cursor],
                    payload[cursor + 1],
                    payload[cursor + 2],
                    payload[cursor + 3],
                ];
                arg.value = BindValue::UInt(u32::from_le_bytes(bytes) as u64);
                cursor += 4;
            }
            FIELD_TYPE_LONGLONG => {
                if payload.len() < cursor + 8 {
                    return Err(truncated("longlong value"));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&payload[cursor..cursor + 8]);
                arg.value = BindValue::UInt(u64::from_le_bytes(bytes));
                cursor += 8;
            }
            // every other type arrives as a length-encoded string
            _ => {
                let (len, consumed) = read_lenenc_int(&payload[cursor..])
                    .map_err(|e| ProxyError::ParseArgs(e.to_string()))?;
                cursor += consumed;
                let end = cursor + len as usize;
                if payload.len() < end {
                    return Err(truncated("string value"));
                }
                arg.value =
                    BindValue::Text(String::from_utf8_lossy(&payload[cursor..end]).into_owned());
                cursor = end;
            }
        }
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::write_lenenc_bytes;
    use crate::protocol::packets::COM_STMT_EXECUTE;

    /// Build an execute payload: header fields, bitmap, types, values.
    fn execute_payload(bitmap: &[u8], types: &[(u8, u8)], values: &[u8]) -> Vec<u8> {
        let mut payload = vec![COM_STMT_EXECUTE];
        payload.extend_from_slice(&1u32.to_le_bytes()); // statement id
        payload.push(0); // flags
        payload.extend_from_slice(&1u32.to_le_bytes()); // iteration count
        payload.extend_from_slice(bitmap);
        payload.push(0x01); // new-params-bound
        for (t, u) in types {
            payload.push(*t);
            payload.push(*u);
        }
        payload.extend_from_slice(values);
        payload
    }

    #[test]
    fn test_no_placeholders_yields_no_args() {
        assert!(parse_stmt_args(0, &[COM_STMT_EXECUTE]).unwrap().is_empty());
        assert!(parse_stmt_args(3, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_two_long_args() {
        let mut values = Vec::new();
        values.extend_from_slice(&7u32.to_le_bytes());
        values.extend_from_slice(&35u32.to_le_bytes());
        let payload = execute_payload(&[0x00], &[(FIELD_TYPE_LONG, 0), (FIELD_TYPE_LONG, 0)], &values);

        let args = parse_stmt_args(2, &payload).unwrap();
        assert_eq!(args[0].value, BindValue::UInt(7));
        assert_eq!(args[1].value, BindValue::UInt(35));
    }

    #[test]
    fn test_tiny_longlong_and_string() {
        let mut values = vec![0x05]; // tiny
        values.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
        write_lenenc_bytes(&mut values, b"ok");
        let payload = execute_payload(
            &[0x00],
            &[(FIELD_TYPE_TINY, 0), (FIELD_TYPE_LONGLONG, 0), (0xFD, 0)],
            &values,
        );

        let args = parse_stmt_args(3, &payload).unwrap();
        assert_eq!(args[0].value, BindValue::UInt(5));
        assert_eq!(args[1].value, BindValue::UInt(0x1_0000_0000));
        assert_eq!(args[2].value, BindValue::Text("ok".to_string()));
    }

    #[test]
    fn test_null_bitmap_marks_nulls() {
        // first arg null, second bound
        let mut values = Vec::new();
        write_lenenc_bytes(&mut values, b"ok");
        let payload = execute_payload(&[0x01], &[(FIELD_TYPE_LONG, 0), (0xFD, 0)], &values);

        let args = parse_stmt_args(2, &payload).unwrap();
        assert_eq!(args[0].value, BindValue::Null);
        assert_eq!(args[1].value, BindValue::Text("ok".to_string()));
    }

    #[test]
    fn test_null_bitmap_bit_positions() {
        // 10 placeholders, nulls at 0, 7, 8: bits span two bitmap bytes
        let null_set = [0usize, 7, 8];
        let mut bitmap = [0u8; 2];
        for &i in &null_set {
            bitmap[i / 8] |= 1 << (i % 8);
        }

        let types: Vec<(u8, u8)> = vec![(FIELD_TYPE_TINY, 0); 10];
        let values: Vec<u8> = vec![9; 10 - null_set.len()];
        let payload = execute_payload(&bitmap, &types, &values);

        let args = parse_stmt_args(10, &payload).unwrap();
        for (i, arg) in args.iter().enumerate() {
            if null_set.contains(&i) {
                assert_eq!(arg.value, BindValue::Null, "arg {}", i);
            } else {
                assert_eq!(arg.value, BindValue::UInt(9), "arg {}", i);
            }
        }
    }

    #[test]
    fn test_null_bitmap_all_widths() {
        // every placeholder count up to 64, nulls at every third position
        for n in 1..=64usize {
            let null_set: Vec<usize> = (0..n).filter(|i| i % 3 == 0).collect();
            let mut bitmap = vec![0u8; n.div_ceil(8)];
            for &i in &null_set {
                bitmap[i / 8] |= 1 << (i % 8);
            }

            let types: Vec<(u8, u8)> = vec![(FIELD_TYPE_TINY, 0); n];
            let values: Vec<u8> = vec![1; n - null_set.len()];
            let payload = execute_payload(&bitmap, &types, &values);

            let args = parse_stmt_args(n, &payload).unwrap();
            for (i, arg) in args.iter().enumerate() {
                let expect_null = i % 3 == 0;
                assert_eq!(
                    arg.value == BindValue::Null,
                    expect_null,
                    "n={} arg={}",
                    n,
                    i
                );
            }
        }
    }

    #[test]
    fn test_new_params_bound_required() {
        let mut payload = execute_payload(&[0x00], &[], &[]);
        // flip the new-params-bound flag (last header byte before types)
        let flag_pos = 1 + 4 + 1 + 4 + 1;
        payload[flag_pos] = 0x00;

        let err = parse_stmt_args(1, &payload).unwrap_err();
        assert!(matches!(err, ProxyError::ParseArgs(_)));
    }

    #[test]
    fn test_truncated_value_is_parse_args_error() {
        let payload = execute_payload(&[0x00], &[(FIELD_TYPE_LONG, 0)], &[0x01, 0x02]);
        let err = parse_stmt_args(1, &payload).unwrap_err();
        assert!(matches!(err, ProxyError::ParseArgs(_)));
    }
}
