//! World-session frame codec and shared wire primitives.
//!
//! Outbound frames carry an adaptive 2–3 byte big-endian length followed by a
//! little-endian u16 opcode. Inbound frames are read through a fixed 6-byte
//! window (length u16 BE, opcode u16 LE, two trailing opcode bytes). The two
//! shapes differ on purpose; the client expects exactly this.

use bytes::{Buf, BufMut, BytesMut};

use super::crypt::SessionCipher;

/// Size of the inbound header window.
pub const CLIENT_HEADER_SIZE: usize = 6;

/// Largest length value the 2-byte form can carry.
pub const SHORT_LENGTH_MAX: usize = 0x7FFF;

/// Largest length value the 3-byte form can carry.
pub const LONG_LENGTH_MAX: usize = 0x7F_FFFF;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Truncated data: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Declared frame length {0} is shorter than the opcode field")]
    BadLength(u16),

    #[error("Frame cursor {cursor} ran past buffer end {len}")]
    CursorOverrun { cursor: usize, len: usize },

    #[error("Payload of {0} bytes does not fit in a frame")]
    FrameTooLarge(usize),

    #[error("String field is not terminated")]
    UnterminatedString,

    #[error("String field is not valid UTF-8")]
    InvalidString,
}

/// One decoded (opcode, payload) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub payload: Vec<u8>,
}

/// Frames `payload` under `opcode`. When `cipher` is present only the header
/// bytes are enciphered.
pub fn encode_frame(
    opcode: u16,
    payload: &[u8],
    cipher: Option<&mut SessionCipher>,
) -> Result<Vec<u8>, ProtocolError> {
    let size = payload.len() + 2;
    if size > LONG_LENGTH_MAX {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut header = BytesMut::with_capacity(5);
    if size > SHORT_LENGTH_MAX {
        header.put_u8(0x80 | ((size >> 16) & 0xFF) as u8);
    }
    header.put_u8(((size >> 8) & 0xFF) as u8);
    header.put_u8((size & 0xFF) as u8);
    header.put_u16_le(opcode);

    if let Some(cipher) = cipher {
        cipher.encrypt(&mut header);
    }

    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Reads `(length, opcode)` from an inbound header window, deciphering it in
/// place first when a cipher is active.
pub fn decode_header(
    header: &mut [u8; CLIENT_HEADER_SIZE],
    cipher: Option<&mut SessionCipher>,
) -> (u16, u16) {
    if let Some(cipher) = cipher {
        cipher.decrypt(header);
    }
    let length = u16::from_be_bytes([header[0], header[1]]);
    let opcode = u16::from_le_bytes([header[2], header[3]]);
    (length, opcode)
}

/// Splits one received chunk into frames, strictly in arrival order.
///
/// Any malformed frame fails the whole chunk; callers tear the connection
/// down rather than try to resynchronize.
pub fn split_stream(
    buffer: &[u8],
    mut cipher: Option<&mut SessionCipher>,
) -> Result<Vec<Frame>, ProtocolError> {
    let mut frames = Vec::new();
    let mut index = 0usize;

    while index < buffer.len() {
        if index + CLIENT_HEADER_SIZE > buffer.len() {
            return Err(ProtocolError::Truncated {
                needed: CLIENT_HEADER_SIZE,
                available: buffer.len() - index,
            });
        }

        let mut header = [0u8; CLIENT_HEADER_SIZE];
        header.copy_from_slice(&buffer[index..index + CLIENT_HEADER_SIZE]);
        let (length, opcode) = decode_header(&mut header, cipher.as_deref_mut());
        if length < 4 {
            return Err(ProtocolError::BadLength(length));
        }

        let body = length as usize - 4;
        let start = index + CLIENT_HEADER_SIZE;
        if start + body > buffer.len() {
            return Err(ProtocolError::Truncated {
                needed: body,
                available: buffer.len() - start,
            });
        }
        frames.push(Frame {
            opcode,
            payload: buffer[start..start + body].to_vec(),
        });

        index += 2 + (length as usize - 1);
        index += 1;
    }

    if index != buffer.len() {
        return Err(ProtocolError::CursorOverrun {
            cursor: index,
            len: buffer.len(),
        });
    }
    Ok(frames)
}

/// Appends a packed identifier: a presence mask followed by the non-zero
/// bytes of the little-endian id.
pub fn write_packed_guid<B: BufMut>(buf: &mut B, guid: u64) {
    let bytes = guid.to_le_bytes();
    let mut mask = 0u8;
    for (i, b) in bytes.iter().enumerate() {
        if *b != 0 {
            mask |= 1 << i;
        }
    }
    buf.put_u8(mask);
    for b in bytes.iter().filter(|b| **b != 0) {
        buf.put_u8(*b);
    }
}

/// Returns the packed form of `guid` as a fresh buffer.
pub fn packed_guid(guid: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    write_packed_guid(&mut out, guid);
    out
}

/// Writes a NUL-terminated string.
pub fn write_cstring<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Bounds-checked little-endian reader over a received payload.
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16_le(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32_le(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64_le(&mut self) -> Result<u64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn f32_le(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(n)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn cstring(&mut self) -> Result<String, ProtocolError> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or(ProtocolError::UnterminatedString)?;
        let s = std::str::from_utf8(&self.buf[..end])
            .map_err(|_| ProtocolError::InvalidString)?
            .to_string();
        self.buf.advance(end + 1);
        Ok(s)
    }

    pub fn packed_guid(&mut self) -> Result<u64, ProtocolError> {
        let mask = self.u8()?;
        let mut bytes = [0u8; 8];
        for (i, slot) in bytes.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                *slot = self.u8()?;
            }
        }
        Ok(u64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds an inbound frame the way the client does: BE length covering a
    /// 4-byte opcode, then the payload.
    fn client_frame(opcode: u32, payload: &[u8]) -> Vec<u8> {
        let length = (payload.len() + 4) as u16;
        let mut out = Vec::new();
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&opcode.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_encode_frame_short_header() {
        let pkt = encode_frame(0x1EC, &[1, 2, 3, 4], None).unwrap();
        assert_eq!(&pkt[..4], &[0x00, 0x06, 0xEC, 0x01]);
        assert_eq!(&pkt[4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_frame_long_header() {
        let payload = vec![0xAB; 0x8000];
        let pkt = encode_frame(0x00A9, &payload, None).unwrap();
        let size = payload.len() + 2;
        assert_eq!(pkt[0], 0x80 | ((size >> 16) as u8));
        assert_eq!(pkt[1], (size >> 8) as u8);
        assert_eq!(pkt[2], size as u8);
        assert_eq!(&pkt[3..5], &[0xA9, 0x00]);
        assert_eq!(pkt.len(), 5 + payload.len());
    }

    #[test]
    fn test_encode_frame_rejects_oversized() {
        let payload = vec![0u8; LONG_LENGTH_MAX];
        assert_eq!(
            encode_frame(1, &payload, None),
            Err(ProtocolError::FrameTooLarge(LONG_LENGTH_MAX))
        );
    }

    #[test]
    fn test_decode_header_plain() {
        let mut header = [0x00, 0x0C, 0xED, 0x01, 0x00, 0x00];
        assert_eq!(decode_header(&mut header, None), (0x0C, 0x1ED));
    }

    #[test]
    fn test_split_stream_multiple_frames_in_order() {
        let mut chunk = client_frame(0x1DC, &[9, 0, 0, 0, 0, 0, 0, 0]);
        chunk.extend(client_frame(0x37, &[]));
        chunk.extend(client_frame(0x3D, &[1, 0, 0, 0, 0, 0, 0, 0]));

        let frames = split_stream(&chunk, None).unwrap();
        let opcodes: Vec<u16> = frames.iter().map(|f| f.opcode).collect();
        assert_eq!(opcodes, vec![0x1DC, 0x37, 0x3D]);
        assert_eq!(frames[0].payload.len(), 8);
        assert!(frames[1].payload.is_empty());
    }

    #[test]
    fn test_split_stream_short_payload_is_fatal() {
        let mut chunk = client_frame(0x1DC, &[1, 2, 3, 4]);
        chunk.truncate(chunk.len() - 1);
        assert!(matches!(
            split_stream(&chunk, None),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_split_stream_trailing_garbage_is_fatal() {
        let mut chunk = client_frame(0x37, &[]);
        chunk.extend_from_slice(&[0x00, 0x04]);
        assert!(split_stream(&chunk, None).is_err());
    }

    #[test]
    fn test_split_stream_rejects_length_below_opcode() {
        let chunk = [0x00, 0x03, 0x37, 0x00, 0x00, 0x00];
        assert_eq!(split_stream(&chunk, None), Err(ProtocolError::BadLength(3)));
    }

    #[test]
    fn test_split_stream_with_cipher() {
        let key = [0x5Au8; 40];
        let mut client = SessionCipher::new(&key);
        let mut server = SessionCipher::new(&key);

        let mut chunk = Vec::new();
        for (opcode, payload) in [(0x1DCu32, vec![7u8; 8]), (0x4B, vec![])] {
            let mut frame = client_frame(opcode, &payload);
            client.encrypt(&mut frame[..CLIENT_HEADER_SIZE]);
            chunk.extend(frame);
        }

        let frames = split_stream(&chunk, Some(&mut server)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, 0x1DC);
        assert_eq!(frames[0].payload, vec![7u8; 8]);
        assert_eq!(frames[1].opcode, 0x4B);
    }

    #[test]
    fn test_packed_guid_layout() {
        assert_eq!(packed_guid(0), vec![0x00]);
        assert_eq!(packed_guid(0x01), vec![0x01, 0x01]);
        assert_eq!(packed_guid(0xF130_0000_0000_0042), vec![0xC1, 0x42, 0x30, 0xF1]);
    }

    #[test]
    fn test_reader_cstring_and_bounds() {
        let data = b"JOHN\0\x01\x02";
        let mut r = PacketReader::new(data);
        assert_eq!(r.cstring().unwrap(), "JOHN");
        assert_eq!(r.u16_le().unwrap(), 0x0201);
        assert!(r.u8().is_err());
    }
}
