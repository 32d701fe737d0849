//! Wire primitives shared by both directions of the bridge.
//!
//! Integers use Hadoop's zero-compressed VLong layout: values in
//! `[-112, 127]` take a single byte, anything else is a marker byte carrying
//! sign and length followed by up to eight big-endian magnitude bytes.
//! Strings and byte buffers are a VInt length followed by the raw bytes.
//! Floats are four big-endian IEEE-754 bytes.

use crate::error::{ErrorCode, PipesError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

pub fn write_vlong(buf: &mut Vec<u8>, value: i64) {
    if (-112..=127).contains(&value) {
        buf.push(value as u8);
        return;
    }

    let (mut marker, magnitude) = if value < 0 {
        (-120i32, value ^ -1)
    } else {
        (-112i32, value)
    };

    let mut tmp = magnitude;
    while tmp != 0 {
        tmp >>= 8;
        marker -= 1;
    }
    buf.push(marker as i8 as u8);

    let len = if marker < -120 {
        -(marker + 120)
    } else {
        -(marker + 112)
    };
    for idx in (0..len).rev() {
        buf.push((magnitude >> (idx * 8)) as u8);
    }
}

pub fn write_vint(buf: &mut Vec<u8>, value: i32) {
    write_vlong(buf, i64::from(value));
}

pub fn write_bool(buf: &mut Vec<u8>, value: bool) {
    write_vint(buf, i32::from(value));
}

pub fn write_float(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Length-prefixed bytes. Buffers longer than `i32::MAX` cannot be framed.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    write_vint(buf, length_prefix(bytes.len())?);
    buf.extend_from_slice(bytes);
    Ok(())
}

pub fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    write_bytes(buf, s.as_bytes())
}

fn length_prefix(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        PipesError::serialization_with_code(
            ErrorCode::SERIAL_ENCODE,
            format!("{} bytes exceed the largest frameable field", len),
        )
    })
}

/// Upper bound on the buffer reserved before a declared length is read.
const READ_CHUNK: usize = 64 * 1024;

/// Total encoded size (marker byte included) implied by the first byte.
pub fn decode_vint_size(first: i8) -> usize {
    if first >= -112 {
        1
    } else if first < -120 {
        (-119 - i32::from(first)) as usize
    } else {
        (-111 - i32::from(first)) as usize
    }
}

fn is_negative_vint(first: i8) -> bool {
    first < -120 || (-112..0).contains(&first)
}

fn assemble_vlong(first: i8, rest: &[u8]) -> i64 {
    let magnitude = rest
        .iter()
        .fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
    if is_negative_vint(first) {
        magnitude ^ -1
    } else {
        magnitude
    }
}

fn narrow_vint(value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        PipesError::protocol_with_code(
            ErrorCode::PROTOCOL_MALFORMED_MESSAGE,
            format!("VInt value {} does not fit in 32 bits", value),
        )
    })
}

fn checked_length(len: i32) -> Result<usize> {
    usize::try_from(len).map_err(|_| {
        PipesError::protocol_with_code(
            ErrorCode::PROTOCOL_MALFORMED_MESSAGE,
            format!("Negative length {}", len),
        )
    })
}

fn into_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        PipesError::protocol_with_code(ErrorCode::PROTOCOL_MALFORMED_MESSAGE, "String is not UTF-8")
            .with_source(e)
    })
}

/// Finish decoding a VLong whose first byte was already consumed.
pub async fn read_vlong_after<R>(first: i8, reader: &mut R) -> Result<i64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let size = decode_vint_size(first);
    if size == 1 {
        return Ok(i64::from(first));
    }
    let mut rest = [0u8; 8];
    reader.read_exact(&mut rest[..size - 1]).await?;
    Ok(assemble_vlong(first, &rest[..size - 1]))
}

pub async fn read_vlong<R>(reader: &mut R) -> Result<i64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let first = reader.read_i8().await?;
    read_vlong_after(first, reader).await
}

pub async fn read_vint<R>(reader: &mut R) -> Result<i32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    narrow_vint(read_vlong(reader).await?)
}

pub async fn read_bool<R>(reader: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(read_vint(reader).await? != 0)
}

pub async fn read_float<R>(reader: &mut R) -> Result<f32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(reader.read_f32().await?)
}

pub async fn read_bytes<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = checked_length(read_vint(reader).await?)?;
    let mut bytes = Vec::with_capacity(len.min(READ_CHUNK));
    (&mut *reader).take(len as u64).read_to_end(&mut bytes).await?;
    if bytes.len() < len {
        return Err(PipesError::protocol_with_code(
            ErrorCode::PROTOCOL_UNEXPECTED_EOF,
            format!("Expected {} bytes, stream ended after {}", len, bytes.len()),
        ));
    }
    Ok(bytes)
}

pub async fn read_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    into_string(read_bytes(reader).await?)
}

/// Synchronous decoder over an in-memory buffer.
#[derive(Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(PipesError::protocol_with_code(
                ErrorCode::PROTOCOL_UNEXPECTED_EOF,
                format!(
                    "Needed {} bytes at offset {} but only {} remain",
                    n,
                    self.pos,
                    self.data.len() - self.pos
                ),
            )),
        }
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_vlong(&mut self) -> Result<i64> {
        let first = self.take(1)?[0] as i8;
        let size = decode_vint_size(first);
        if size == 1 {
            return Ok(i64::from(first));
        }
        let rest = self.take(size - 1)?;
        Ok(assemble_vlong(first, rest))
    }

    pub fn read_vint(&mut self) -> Result<i32> {
        narrow_vint(self.read_vlong()?)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = checked_length(self.read_vint()?)?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        into_string(self.read_bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_vlong(&mut buf, value);
        buf
    }

    #[test]
    fn test_single_byte_range() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(-112), vec![0x90]);
        assert_eq!(encoded(-1), vec![0xff]);
    }

    #[test]
    fn test_multi_byte_layout_matches_hadoop() {
        // 128 -> marker -113, one magnitude byte
        assert_eq!(encoded(128), vec![0x8f, 0x80]);
        assert_eq!(encoded(255), vec![0x8f, 0xff]);
        assert_eq!(encoded(256), vec![0x8e, 0x01, 0x00]);
        // -113 -> one's complement 112, marker -121
        assert_eq!(encoded(-113), vec![0x87, 0x70]);
        assert_eq!(encoded(i64::MAX).len(), 9);
        assert_eq!(encoded(i64::MIN).len(), 9);
    }

    #[test]
    fn test_slice_reader_decodes_boundaries() {
        let values = [
            0,
            1,
            -1,
            127,
            128,
            -112,
            -113,
            65_535,
            -65_536,
            i64::from(i32::MAX),
            i64::from(i32::MIN),
            i64::MAX,
            i64::MIN,
        ];
        let mut buf = Vec::new();
        for v in values {
            write_vlong(&mut buf, v);
        }

        let mut reader = SliceReader::new(&buf);
        for v in values {
            assert_eq!(reader.read_vlong().unwrap(), v);
        }
        assert!(reader.is_empty());
    }

    #[test]
    fn test_vint_rejects_wide_values() {
        let buf = encoded(i64::from(i32::MAX) + 1);
        let err = SliceReader::new(&buf).read_vint().unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_MALFORMED_MESSAGE);
    }

    #[test]
    fn test_truncated_buffer() {
        let mut buf = Vec::new();
        write_string(&mut buf, "hello").unwrap();
        buf.truncate(3);
        let err = SliceReader::new(&buf).read_string().unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_UNEXPECTED_EOF);
    }

    #[test]
    fn test_negative_length_rejected() {
        let buf = encoded(-5);
        let err = SliceReader::new(&buf).read_bytes().unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_MALFORMED_MESSAGE);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_field_is_not_framed() {
        let err = length_prefix(i32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SERIAL_ENCODE);
        assert_eq!(length_prefix(i32::MAX as usize).unwrap(), i32::MAX);
    }

    #[tokio::test]
    async fn test_declared_length_beyond_stream() {
        let mut buf = Vec::new();
        write_vint(&mut buf, i32::MAX);
        buf.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_bytes(&mut cursor).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_UNEXPECTED_EOF);
    }

    #[tokio::test]
    async fn test_async_readers() {
        let mut buf = Vec::new();
        write_vint(&mut buf, 300);
        write_float(&mut buf, 0.5);
        write_string(&mut buf, "héllo").unwrap();
        write_bytes(&mut buf, &[]).unwrap();
        write_bool(&mut buf, true);

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_vint(&mut cursor).await.unwrap(), 300);
        assert_eq!(read_float(&mut cursor).await.unwrap(), 0.5);
        assert_eq!(read_string(&mut cursor).await.unwrap(), "héllo");
        assert!(read_bytes(&mut cursor).await.unwrap().is_empty());
        assert!(read_bool(&mut cursor).await.unwrap());
    }

    #[tokio::test]
    async fn test_async_invalid_utf8() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[0xff, 0xfe]).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_string(&mut cursor).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }
}
