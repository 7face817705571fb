//! TLV primitives for the NDN packet format.
//!
//! Only what the engine needs: variable-length numbers, nonNegativeInteger
//! values, and framed element readers over [`bytes`] buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NdnRtcError, NdnRtcResult};

/// Writes a TLV variable-length number (type or length).
pub(crate) fn write_var_number(buf: &mut BytesMut, value: u64) {
    if value < 253 {
        buf.put_u8(value as u8);
    } else if value <= u16::MAX as u64 {
        buf.put_u8(253);
        buf.put_u16(value as u16);
    } else if value <= u32::MAX as u64 {
        buf.put_u8(254);
        buf.put_u32(value as u32);
    } else {
        buf.put_u8(255);
        buf.put_u64(value);
    }
}

/// Reads a TLV variable-length number.
pub(crate) fn read_var_number(buf: &mut Bytes) -> NdnRtcResult<u64> {
    if buf.is_empty() {
        return Err(NdnRtcError::MalformedPacket("truncated tlv number".into()));
    }
    let first = buf.get_u8();
    let needed = match first {
        253 => 2,
        254 => 4,
        255 => 8,
        _ => return Ok(first as u64),
    };
    if buf.remaining() < needed {
        return Err(NdnRtcError::MalformedPacket("truncated tlv number".into()));
    }
    Ok(match needed {
        2 => buf.get_u16() as u64,
        4 => buf.get_u32() as u64,
        _ => buf.get_u64(),
    })
}

/// Writes one TLV element: type, length, value.
pub(crate) fn write_tlv(buf: &mut BytesMut, typ: u64, value: &[u8]) {
    write_var_number(buf, typ);
    write_var_number(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Reads one TLV element, returning its type and value.
pub(crate) fn read_tlv(buf: &mut Bytes) -> NdnRtcResult<(u64, Bytes)> {
    let typ = read_var_number(buf)?;
    let len = read_var_number(buf)? as usize;
    if buf.remaining() < len {
        return Err(NdnRtcError::MalformedPacket(format!(
            "tlv {} claims {} bytes, {} available",
            typ,
            len,
            buf.remaining()
        )));
    }
    Ok((typ, buf.split_to(len)))
}

/// Encodes a nonNegativeInteger into its shortest 1/2/4/8-byte form.
pub(crate) fn encode_nonneg_integer(value: u64) -> Vec<u8> {
    if value <= u8::MAX as u64 {
        vec![value as u8]
    } else if value <= u16::MAX as u64 {
        (value as u16).to_be_bytes().to_vec()
    } else if value <= u32::MAX as u64 {
        (value as u32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

/// Decodes a nonNegativeInteger (1, 2, 4, or 8 big-endian bytes).
pub(crate) fn decode_nonneg_integer(bytes: &[u8]) -> NdnRtcResult<u64> {
    let mut padded = [0u8; 8];
    match bytes.len() {
        1 | 2 | 4 | 8 => {
            padded[8 - bytes.len()..].copy_from_slice(bytes);
            Ok(u64::from_be_bytes(padded))
        }
        n => Err(NdnRtcError::MalformedPacket(format!(
            "nonNegativeInteger of invalid length {}",
            n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_number_round_trips_all_widths() {
        for v in [0u64, 252, 253, 65535, 65536, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            write_var_number(&mut buf, v);
            let mut r = buf.freeze();
            assert_eq!(read_var_number(&mut r).unwrap(), v);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn nonneg_integer_uses_shortest_form() {
        assert_eq!(encode_nonneg_integer(5), vec![5]);
        assert_eq!(encode_nonneg_integer(256).len(), 2);
        assert_eq!(encode_nonneg_integer(1 << 20).len(), 4);
        assert_eq!(encode_nonneg_integer(1 << 40).len(), 8);
        for v in [0u64, 255, 256, 1 << 20, 1 << 40] {
            assert_eq!(
                decode_nonneg_integer(&encode_nonneg_integer(v)).unwrap(),
                v
            );
        }
    }

    #[test]
    fn tlv_element_round_trips() {
        let mut buf = BytesMut::new();
        write_tlv(&mut buf, 8, b"camera");
        write_tlv(&mut buf, 50, &[7]);
        let mut r = buf.freeze();
        let (t1, v1) = read_tlv(&mut r).unwrap();
        assert_eq!((t1, v1.as_ref()), (8, b"camera".as_ref()));
        let (t2, v2) = read_tlv(&mut r).unwrap();
        assert_eq!((t2, v2.as_ref()), (50, [7].as_ref()));
    }

    #[test]
    fn truncated_tlv_is_rejected() {
        let mut buf = BytesMut::new();
        write_var_number(&mut buf, 8);
        write_var_number(&mut buf, 10); // claims 10 bytes, provides none
        assert!(read_tlv(&mut buf.freeze()).is_err());
    }
}
