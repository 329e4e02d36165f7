// SPDX-License-Identifier: AGPL-3.0-only
//! Minimal client-side helpers: send requests and read validated TACACS+ replies.
//! Used by integration tests and diagnostic tooling; the daemon never calls these.

use crate::{
    AccountingReply, AccountingRequest, AuthenContinue, AuthenReply, AuthenStart,
    AuthorizationRequest, AuthorizationResponse, FramingError, TYPE_ACCT, TYPE_AUTHEN,
    TYPE_AUTHOR, encode_accounting_request, encode_authen_continue, encode_authen_start,
    encode_author_request, parse_accounting_reply, parse_author_response, parse_authen_reply,
    read_frame, write_frame,
};
use tokio::io::{AsyncRead, AsyncWrite};

pub async fn send_authen_start<W>(
    writer: &mut W,
    start: &AuthenStart,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_authen_start(start).map_err(|e| FramingError::body("authentication", e))?;
    write_frame(writer, &start.header, &body, secret).await
}

pub async fn send_authen_continue<W>(
    writer: &mut W,
    cont: &AuthenContinue,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body =
        encode_authen_continue(cont).map_err(|e| FramingError::body("authentication", e))?;
    write_frame(writer, &cont.header, &body, secret).await
}

pub async fn send_author_request<W>(
    writer: &mut W,
    request: &AuthorizationRequest,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body =
        encode_author_request(request).map_err(|e| FramingError::body("authorization", e))?;
    write_frame(writer, &request.header, &body, secret).await
}

pub async fn send_accounting_request<W>(
    writer: &mut W,
    request: &AccountingRequest,
    secret: &[u8],
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body =
        encode_accounting_request(request).map_err(|e| FramingError::body("accounting", e))?;
    write_frame(writer, &request.header, &body, secret).await
}

async fn recv_body<R>(
    reader: &mut R,
    secret: &[u8],
    expected_type: u8,
) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, secret).await? {
        Some((header, _)) if header.packet_type != expected_type => {
            Err(FramingError::UnknownType(header.packet_type))
        }
        Some((_, body)) => Ok(Some(body)),
        None => Ok(None),
    }
}

pub async fn recv_authen_reply<R>(
    reader: &mut R,
    secret: &[u8],
) -> Result<Option<AuthenReply>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let Some(body) = recv_body(reader, secret, TYPE_AUTHEN).await? else {
        return Ok(None);
    };
    parse_authen_reply(&body)
        .map(Some)
        .map_err(|e| FramingError::body("authentication", e))
}

pub async fn recv_author_response<R>(
    reader: &mut R,
    secret: &[u8],
) -> Result<Option<AuthorizationResponse>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let Some(body) = recv_body(reader, secret, TYPE_AUTHOR).await? else {
        return Ok(None);
    };
    parse_author_response(&body)
        .map(Some)
        .map_err(|e| FramingError::body("authorization", e))
}

pub async fn recv_accounting_reply<R>(
    reader: &mut R,
    secret: &[u8],
) -> Result<Option<AccountingReply>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let Some(body) = recv_body(reader, secret, TYPE_ACCT).await? else {
        return Ok(None);
    };
    parse_accounting_reply(&body)
        .map(Some)
        .map_err(|e| FramingError::body("accounting", e))
}
