// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ protocol helpers: headers, authn/authz/acct bodies, and shared-secret body crypto.
//! Focused on async IO parsing/encoding for server-side use; `client` holds the inverse
//! direction for test harnesses and tooling.
//! The `legacy-md5` feature (on by default) enables the TACACS+ MD5 body obfuscation;
//! disable it for FIPS-only builds.

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

mod accounting;
mod authen;
mod author;
pub mod client;
pub mod crypto;
mod error;
pub mod header;
mod util;

pub use accounting::{
    AccountingReply, AccountingRequest, AcctKind, encode_accounting_reply,
    encode_accounting_request, parse_accounting_body, parse_accounting_reply,
};
pub use authen::{
    AuthenContinue, AuthenData, AuthenPacket, AuthenReply, AuthenStart, CHAP_RESPONSE_LEN,
    encode_authen_continue, encode_authen_reply, encode_authen_start, parse_authen_body,
    parse_authen_reply,
};
pub use author::{
    AuthorizationRequest, AuthorizationResponse, encode_author_request, encode_author_response,
    parse_author_body, parse_author_response,
};
pub use crypto::{decrypt, encrypt};
pub use error::FramingError;
pub use header::{HEADER_LEN, Header};
pub use util::Attribute;

pub const MAJOR_VERSION: u8 = 0xc;
pub const VERSION: u8 = MAJOR_VERSION << 4; // Major version 0xC, minor 0
pub const VERSION_MINOR_ONE: u8 = VERSION | 0x01;

/// Upper bound on a declared body length; larger values are treated as hostile.
pub const MAX_BODY_LEN: u32 = 64 * 1024;

pub const TYPE_AUTHEN: u8 = 0x01;
pub const TYPE_AUTHOR: u8 = 0x02;
pub const TYPE_ACCT: u8 = 0x03;

pub const FLAG_UNENCRYPTED: u8 = 0x01;
pub const FLAG_SINGLE_CONNECT: u8 = 0x04;
pub const ALLOWED_FLAGS: u8 = FLAG_UNENCRYPTED | FLAG_SINGLE_CONNECT;

pub const AUTHEN_ACTION_LOGIN: u8 = 0x01;
pub const AUTHEN_ACTION_CHPASS: u8 = 0x02;
pub const AUTHEN_ACTION_SENDAUTH: u8 = 0x04;

pub const AUTHEN_STATUS_PASS: u8 = 0x01;
pub const AUTHEN_STATUS_FAIL: u8 = 0x02;
pub const AUTHEN_STATUS_GETDATA: u8 = 0x03;
pub const AUTHEN_STATUS_GETUSER: u8 = 0x04;
pub const AUTHEN_STATUS_GETPASS: u8 = 0x05;
pub const AUTHEN_STATUS_RESTART: u8 = 0x06;
pub const AUTHEN_STATUS_ERROR: u8 = 0x07;
pub const AUTHEN_STATUS_FOLLOW: u8 = 0x21;

pub const AUTHEN_FLAG_NOECHO: u8 = 0x01;
pub const AUTHEN_CONTINUE_FLAG_ABORT: u8 = 0x01;

pub const AUTHEN_TYPE_ASCII: u8 = 0x01;
pub const AUTHEN_TYPE_PAP: u8 = 0x02;
pub const AUTHEN_TYPE_CHAP: u8 = 0x03;
pub const AUTHEN_TYPE_ARAP: u8 = 0x04;

pub const AUTHEN_SVC_NONE: u8 = 0x00;
pub const AUTHEN_SVC_LOGIN: u8 = 0x01;
pub const AUTHEN_SVC_ENABLE: u8 = 0x02;
pub const AUTHEN_SVC_PPP: u8 = 0x03;

pub const AUTHEN_METH_TACACSPLUS: u8 = 0x06;

pub const AUTHOR_STATUS_PASS_ADD: u8 = 0x01;
pub const AUTHOR_STATUS_PASS_REPL: u8 = 0x02;
pub const AUTHOR_STATUS_FAIL: u8 = 0x10;
pub const AUTHOR_STATUS_ERROR: u8 = 0x11;

pub const ACCT_STATUS_SUCCESS: u8 = 0x01;
pub const ACCT_STATUS_ERROR: u8 = 0x02;
pub const ACCT_FLAG_START: u8 = 0x02;
pub const ACCT_FLAG_STOP: u8 = 0x04;
pub const ACCT_FLAG_WATCHDOG: u8 = 0x08;

/// Returns true when the AUTHEN reply status ends the exchange.
pub fn authen_status_is_terminal(status: u8) -> bool {
    matches!(
        status,
        AUTHEN_STATUS_PASS
            | AUTHEN_STATUS_FAIL
            | AUTHEN_STATUS_ERROR
            | AUTHEN_STATUS_RESTART
            | AUTHEN_STATUS_FOLLOW
    )
}

#[derive(Debug, Clone)]
pub enum Packet {
    Authentication(AuthenPacket),
    Authorization(AuthorizationRequest),
    Accounting(AccountingRequest),
}

impl Packet {
    pub fn header(&self) -> &Header {
        match self {
            Packet::Authentication(p) => p.header(),
            Packet::Authorization(r) => &r.header,
            Packet::Accounting(r) => &r.header,
        }
    }
}

/// Splits one complete wire frame into its header and decrypted body.
pub fn decode_frame(bytes: &[u8], secret: &[u8]) -> Result<(Header, Vec<u8>), FramingError> {
    let raw: &[u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(FramingError::TruncatedHeader(bytes.len().min(HEADER_LEN)))?;
    let header = Header::from_bytes(raw);
    header::validate_header(&header, ALLOWED_FLAGS)?;
    let received = bytes.len() - HEADER_LEN;
    if header.length as usize != received {
        return Err(FramingError::LengthMismatch {
            declared: header.length,
            received,
        });
    }
    let mut body = bytes[HEADER_LEN..].to_vec();
    crypto::apply_body_crypto(&header, &mut body, secret)?;
    Ok((header, body))
}

/// Encrypts `body` and prefixes a header whose length field is set to match.
pub fn encode_frame(header: &Header, body: &[u8], secret: &[u8]) -> Result<Vec<u8>, FramingError> {
    let length = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_BODY_LEN)
        .ok_or_else(|| FramingError::BodyTooLarge(u32::try_from(body.len()).unwrap_or(u32::MAX)))?;
    let header = Header { length, ..*header };
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&header.to_bytes());
    let mut sealed = body.to_vec();
    crypto::apply_body_crypto(&header, &mut sealed, secret)?;
    frame.extend_from_slice(&sealed);
    Ok(frame)
}

pub fn decode_packet(header: Header, body: &[u8]) -> Result<Packet, FramingError> {
    match header.packet_type {
        TYPE_AUTHEN => parse_authen_body(header, body)
            .map(Packet::Authentication)
            .map_err(|e| FramingError::body("authentication", e)),
        TYPE_AUTHOR => parse_author_body(header, body)
            .map(Packet::Authorization)
            .map_err(|e| FramingError::body("authorization", e)),
        TYPE_ACCT => parse_accounting_body(header, body)
            .map(Packet::Accounting)
            .map_err(|e| FramingError::body("accounting", e)),
        other => Err(FramingError::UnknownType(other)),
    }
}

/// Reads one frame. `Ok(None)` means the peer closed the stream between packets.
pub async fn read_frame<R>(
    reader: &mut R,
    secret: &[u8],
) -> Result<Option<(Header, Vec<u8>)>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let Some(header) = header::read_header(reader).await? else {
        return Ok(None);
    };
    header::validate_header(&header, ALLOWED_FLAGS)?;
    if !matches!(header.packet_type, TYPE_AUTHEN | TYPE_AUTHOR | TYPE_ACCT) {
        return Err(FramingError::UnknownType(header.packet_type));
    }

    let mut body = vec![0u8; header.length as usize];
    let mut filled = 0;
    while filled < body.len() {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(FramingError::LengthMismatch {
                declared: header.length,
                received: filled,
            });
        }
        filled += n;
    }
    crypto::apply_body_crypto(&header, &mut body, secret)?;
    Ok(Some((header, body)))
}

pub async fn read_packet<R>(reader: &mut R, secret: &[u8]) -> Result<Option<Packet>, FramingError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, secret).await? {
        Some((header, body)) => decode_packet(header, &body).map(Some),
        None => Ok(None),
    }
}

/// Writes `body` as a single frame. The header's length field is recomputed.
pub async fn write_frame<W>(
    writer: &mut W,
    header: &Header,
    body: &[u8],
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(header, body, secret)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    debug!(
        "wrote TACACS+ frame type={} seq={} session={:#010x} len={}",
        header.packet_type,
        header.seq_no,
        header.session_id,
        body.len()
    );
    Ok(())
}

pub async fn write_authen_reply<W>(
    writer: &mut W,
    request_header: &Header,
    reply: &AuthenReply,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_authen_reply(reply).map_err(|e| FramingError::body("authentication", e))?;
    write_frame(writer, &request_header.response(0), &body, secret).await
}

pub async fn write_author_response<W>(
    writer: &mut W,
    request_header: &Header,
    response: &AuthorizationResponse,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body =
        encode_author_response(response).map_err(|e| FramingError::body("authorization", e))?;
    write_frame(writer, &request_header.response(0), &body, secret).await
}

pub async fn write_accounting_reply<W>(
    writer: &mut W,
    request_header: &Header,
    reply: &AccountingReply,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_accounting_reply(reply).map_err(|e| FramingError::body("accounting", e))?;
    write_frame(writer, &request_header.response(0), &body, secret).await
}
