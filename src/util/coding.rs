//! Varint and length-prefixed primitives of the manifest record format.
//!
//! Decoders take a cursor (`&mut &[u8]`) and advance it past what they read.
//! They return `None` on truncated or malformed input; callers turn that into
//! a corrupt-manifest error.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum bytes needed to encode a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Append `value` as an unsigned LEB128 varint.
pub fn encode_varint64(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned varint.
///
/// A tenth byte may only contribute the top bit of the value; anything more
/// overflows 64 bits and is rejected.
pub fn decode_varint64(buf: &mut &[u8]) -> Option<u64> {
    let mut result = 0u64;
    for i in 0..MAX_VARINT64_LEN {
        if buf.is_empty() {
            return None;
        }
        let byte = buf.get_u8();
        if i == MAX_VARINT64_LEN - 1 && byte > 1 {
            return None;
        }
        result |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some(result);
        }
    }
    None
}

/// Append `data` preceded by its length as a varint.
pub fn encode_length_prefixed(buf: &mut BytesMut, data: &[u8]) {
    encode_varint64(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Read a varint length followed by that many bytes.
pub fn decode_length_prefixed(buf: &mut &[u8]) -> Option<Bytes> {
    let len = usize::try_from(decode_varint64(buf)?).ok()?;
    if buf.len() < len {
        return None;
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Some(data)
}

/// Read one byte.
pub fn decode_u8(buf: &mut &[u8]) -> Option<u8> {
    if buf.is_empty() {
        return None;
    }
    Some(buf.get_u8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint64_boundaries() {
        let cases: [(u64, usize); 6] = [
            (0, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (1 << 35, 6),
            (u64::MAX, 10),
        ];
        for (val, len) in cases {
            let mut buf = BytesMut::new();
            encode_varint64(&mut buf, val);
            assert_eq!(buf.len(), len, "length for {}", val);

            let mut slice: &[u8] = &buf;
            assert_eq!(decode_varint64(&mut slice), Some(val));
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_varint64_overflow() {
        let mut too_big = vec![0xFF; 9];
        too_big.push(0x02);
        assert_eq!(decode_varint64(&mut too_big.as_slice()), None);

        let mut too_long = vec![0x80; 10];
        too_long.push(0x00);
        assert_eq!(decode_varint64(&mut too_long.as_slice()), None);
    }

    #[test]
    fn test_length_prefixed() {
        let mut buf = BytesMut::new();
        encode_length_prefixed(&mut buf, b"leveldb.BytewiseComparator");
        encode_length_prefixed(&mut buf, b"");

        let mut slice: &[u8] = &buf;
        assert_eq!(
            decode_length_prefixed(&mut slice).unwrap(),
            Bytes::from_static(b"leveldb.BytewiseComparator")
        );
        assert_eq!(decode_length_prefixed(&mut slice).unwrap().len(), 0);
        assert!(slice.is_empty());

        // Length runs past the end of the record.
        let mut short: &[u8] = &[5, b'a', b'b'];
        assert!(decode_length_prefixed(&mut short).is_none());
    }

    #[test]
    fn test_decode_truncated() {
        let mut empty: &[u8] = &[];
        assert!(decode_varint64(&mut empty).is_none());
        assert!(decode_u8(&mut empty).is_none());

        let mut incomplete: &[u8] = &[0x80, 0x80];
        assert!(decode_varint64(&mut incomplete).is_none());
    }
}
