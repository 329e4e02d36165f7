// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ packet header parsing and serialization for async streams.

use crate::error::FramingError;
use crate::{FLAG_SINGLE_CONNECT, FLAG_UNENCRYPTED, MAJOR_VERSION, MAX_BODY_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub packet_type: u8,
    pub seq_no: u8,
    pub flags: u8,
    pub session_id: u32,
    pub length: u32,
}

impl Header {
    pub fn response(&self, length: u32) -> Header {
        Header {
            version: self.version,
            packet_type: self.packet_type,
            seq_no: self.seq_no.wrapping_add(1),
            flags: self.flags, // mirrors request flags, including single-connect
            session_id: self.session_id,
            length,
        }
    }

    pub fn is_single_connect(&self) -> bool {
        self.flags & FLAG_SINGLE_CONNECT != 0
    }

    pub fn minor_version(&self) -> u8 {
        self.version & 0x0f
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.packet_type;
        buf[2] = self.seq_no;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.session_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Header {
        Header {
            version: buf[0],
            packet_type: buf[1],
            seq_no: buf[2],
            flags: buf[3],
            session_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

/// Reads one header. `Ok(None)` means the peer closed cleanly on a packet boundary.
pub async fn read_header<R>(reader: &mut R) -> Result<Option<Header>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FramingError::TruncatedHeader(filled));
        }
        filled += n;
    }
    Ok(Some(Header::from_bytes(&buf)))
}

pub async fn write_header<W>(writer: &mut W, header: &Header) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.to_bytes()).await?;
    Ok(())
}

/// Checks the fields a daemon can reject before touching the body.
pub fn validate_header(header: &Header, allowed_flags: u8) -> Result<(), FramingError> {
    if header.version >> 4 != MAJOR_VERSION {
        return Err(FramingError::UnsupportedVersion(header.version >> 4));
    }
    if header.flags & FLAG_UNENCRYPTED != 0 {
        return Err(FramingError::Unencrypted);
    }
    if header.flags & !allowed_flags != 0 {
        return Err(FramingError::UnsupportedFlags(header.flags & !allowed_flags));
    }
    if header.length > MAX_BODY_LEN {
        return Err(FramingError::BodyTooLarge(header.length));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ALLOWED_FLAGS;
    use std::io::Cursor;

    fn make_header(
        version: u8,
        packet_type: u8,
        seq_no: u8,
        flags: u8,
        session_id: u32,
        length: u32,
    ) -> Header {
        Header {
            version,
            packet_type,
            seq_no,
            flags,
            session_id,
            length,
        }
    }

    #[test]
    fn header_response_increments_seq_no() {
        let request = make_header(0xC0, 0x01, 1, 0, 12345, 100);
        let response = request.response(50);

        assert_eq!(response.seq_no, 2);
        assert_eq!(response.length, 50);
        assert_eq!(response.session_id, request.session_id);
        assert_eq!(response.version, request.version);
        assert_eq!(response.packet_type, request.packet_type);
        assert_eq!(response.flags, request.flags);
    }

    #[tokio::test]
    async fn header_read_exact_bytes() {
        let bytes: [u8; 12] = [
            0xC1, // version (major 12, minor 1)
            0x01, // packet_type (authen)
            0x05, // seq_no
            0x04, // flags (single-connect)
            0x12, 0x34, 0x56, 0x78, // session_id (big-endian)
            0x00, 0x00, 0x01, 0x00, // length = 256 (big-endian)
        ];

        let mut cursor = Cursor::new(bytes);
        let header = read_header(&mut cursor).await.unwrap().unwrap();

        assert_eq!(header.version, 0xC1);
        assert_eq!(header.minor_version(), 1);
        assert_eq!(header.packet_type, 0x01);
        assert_eq!(header.seq_no, 0x05);
        assert!(header.is_single_connect());
        assert_eq!(header.session_id, 0x12345678);
        assert_eq!(header.length, 256);
    }

    #[tokio::test]
    async fn header_written_bytes_parse_back() {
        let original = make_header(0xC0, 0x02, 3, 0x04, 0xDEADBEEF, 256);
        let mut buf = Vec::new();
        write_header(&mut buf, &original).await.unwrap();
        assert_eq!(buf.len(), HEADER_LEN);

        let parsed = read_header(&mut Cursor::new(buf)).await.unwrap().unwrap();
        assert_eq!(parsed, original);
    }

    #[tokio::test]
    async fn header_read_clean_eof_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_header(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn header_read_truncated_fails() {
        let bytes: [u8; 8] = [0xC0, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01];
        let mut cursor = Cursor::new(bytes);

        let err = read_header(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FramingError::TruncatedHeader(8)));
    }

    #[test]
    fn validate_header_accepts_both_minor_versions() {
        assert!(validate_header(&make_header(0xC0, 1, 1, 0, 1, 10), ALLOWED_FLAGS).is_ok());
        assert!(validate_header(&make_header(0xC1, 1, 1, 0x04, 1, 10), ALLOWED_FLAGS).is_ok());
    }

    #[test]
    fn validate_header_wrong_major_version() {
        let header = make_header(0xB0, 0x01, 1, 0x00, 12345, 100);
        let err = validate_header(&header, ALLOWED_FLAGS).unwrap_err();
        assert!(matches!(err, FramingError::UnsupportedVersion(0x0B)));
    }

    #[test]
    fn validate_header_refuses_unencrypted() {
        let header = make_header(0xC0, 0x01, 1, 0x01, 12345, 100);
        let err = validate_header(&header, ALLOWED_FLAGS).unwrap_err();
        assert!(matches!(err, FramingError::Unencrypted));
    }

    #[test]
    fn validate_header_disallowed_flags() {
        let header = make_header(0xC0, 0x01, 1, 0xF0, 12345, 100);
        let err = validate_header(&header, ALLOWED_FLAGS).unwrap_err();
        assert!(err.to_string().contains("flags"));
    }

    #[test]
    fn validate_header_oversized_body() {
        let header = make_header(0xC0, 0x01, 1, 0, 12345, MAX_BODY_LEN + 1);
        let err = validate_header(&header, ALLOWED_FLAGS).unwrap_err();
        assert!(matches!(err, FramingError::BodyTooLarge(_)));
    }
}
