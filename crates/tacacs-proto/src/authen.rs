// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ authentication packet structures plus parsing/encoding helpers.

use crate::header::Header;
use crate::util::{checked_u16_len, checked_u8_len, ensure_consumed, read_bytes, read_string};
use crate::{AUTHEN_CONTINUE_FLAG_ABORT, AUTHEN_TYPE_CHAP, AUTHEN_TYPE_PAP};
use anyhow::{Result, ensure};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone)]
pub struct AuthenStart {
    pub header: Header,
    pub action: u8,
    pub priv_lvl: u8,
    pub authen_type: u8,
    pub service: u8,
    pub user: String,
    pub port: String,
    pub rem_addr: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AuthenContinue {
    pub header: Header,
    pub user_msg: Vec<u8>,
    pub data: Vec<u8>,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenReply {
    pub status: u8,
    pub flags: u8,
    pub server_msg: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum AuthenPacket {
    Start(AuthenStart),
    Continue(AuthenContinue),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenData {
    Pap {
        password: Vec<u8>,
    },
    /// Full RFC 8907 CHAP payload: identifier, challenge, and 16-byte MD5 response.
    Chap {
        chap_id: u8,
        challenge: Vec<u8>,
        response: Vec<u8>,
    },
    /// Only the CHAP identifier; the server must issue the challenge.
    ChapIdOnly {
        chap_id: u8,
    },
    Raw(Vec<u8>),
}

pub const CHAP_RESPONSE_LEN: usize = 16;

impl AuthenPacket {
    pub fn header(&self) -> &Header {
        match self {
            AuthenPacket::Start(start) => &start.header,
            AuthenPacket::Continue(cont) => &cont.header,
        }
    }
}

impl AuthenStart {
    pub fn parsed_data(&self) -> AuthenData {
        match self.authen_type {
            AUTHEN_TYPE_PAP => AuthenData::Pap {
                password: self.data.clone(),
            },
            AUTHEN_TYPE_CHAP if self.data.len() == 1 => AuthenData::ChapIdOnly {
                chap_id: self.data[0],
            },
            AUTHEN_TYPE_CHAP if self.data.len() > 1 + CHAP_RESPONSE_LEN => {
                let split = self.data.len() - CHAP_RESPONSE_LEN;
                AuthenData::Chap {
                    chap_id: self.data[0],
                    challenge: self.data[1..split].to_vec(),
                    response: self.data[split..].to_vec(),
                }
            }
            _ => AuthenData::Raw(self.data.clone()),
        }
    }
}

impl AuthenContinue {
    pub fn is_abort(&self) -> bool {
        self.flags & AUTHEN_CONTINUE_FLAG_ABORT != 0
    }

    /// The operator's answer: `user_msg` per RFC 8907, `data` from clients that put it there.
    pub fn answer(&self) -> &[u8] {
        if self.user_msg.is_empty() {
            &self.data
        } else {
            &self.user_msg
        }
    }
}

impl AuthenReply {
    pub fn new(status: u8, server_msg: impl Into<String>) -> Self {
        AuthenReply {
            status,
            flags: 0,
            server_msg: server_msg.into(),
            data: Vec::new(),
        }
    }
}

/// Sequence number 1 always carries a START; every later client packet is a CONTINUE.
pub fn parse_authen_body(header: Header, body: &[u8]) -> Result<AuthenPacket> {
    if header.seq_no == 1 {
        parse_authen_start(header, body).map(AuthenPacket::Start)
    } else {
        parse_authen_continue(header, body).map(AuthenPacket::Continue)
    }
}

fn parse_authen_start(header: Header, body: &[u8]) -> Result<AuthenStart> {
    ensure!(body.len() >= 8, "authentication start body too short");
    let user_len = body[4] as usize;
    let port_len = body[5] as usize;
    let rem_addr_len = body[6] as usize;
    let data_len = body[7] as usize;

    let mut cursor = 8;
    let (user, next) = read_string(body, cursor, user_len, "user")?;
    cursor = next;
    let (port, next) = read_string(body, cursor, port_len, "port")?;
    cursor = next;
    let (rem_addr, next) = read_string(body, cursor, rem_addr_len, "rem_addr")?;
    cursor = next;
    let (data, next) = read_bytes(body, cursor, data_len, "data")?;
    ensure_consumed(body, next, "authentication start")?;

    Ok(AuthenStart {
        header,
        action: body[0],
        priv_lvl: body[1],
        authen_type: body[2],
        service: body[3],
        user,
        port,
        rem_addr,
        data,
    })
}

fn parse_authen_continue(header: Header, body: &[u8]) -> Result<AuthenContinue> {
    ensure!(body.len() >= 5, "authentication continue body too short");
    let user_msg_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let data_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let flags = body[4];
    let (user_msg, next) = read_bytes(body, 5, user_msg_len, "user_msg")?;
    let (data, next) = read_bytes(body, next, data_len, "data")?;
    ensure_consumed(body, next, "authentication continue")?;

    Ok(AuthenContinue {
        header,
        user_msg,
        data,
        flags,
    })
}

pub fn encode_authen_start(start: &AuthenStart) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_u8(start.action);
    buf.put_u8(start.priv_lvl);
    buf.put_u8(start.authen_type);
    buf.put_u8(start.service);
    buf.put_u8(checked_u8_len(start.user.len(), "user")?);
    buf.put_u8(checked_u8_len(start.port.len(), "port")?);
    buf.put_u8(checked_u8_len(start.rem_addr.len(), "rem_addr")?);
    buf.put_u8(checked_u8_len(start.data.len(), "data")?);
    buf.extend_from_slice(start.user.as_bytes());
    buf.extend_from_slice(start.port.as_bytes());
    buf.extend_from_slice(start.rem_addr.as_bytes());
    buf.extend_from_slice(&start.data);
    Ok(buf.to_vec())
}

pub fn encode_authen_continue(cont: &AuthenContinue) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_u16(checked_u16_len(cont.user_msg.len(), "user_msg")?);
    buf.put_u16(checked_u16_len(cont.data.len(), "data")?);
    buf.put_u8(cont.flags);
    buf.extend_from_slice(&cont.user_msg);
    buf.extend_from_slice(&cont.data);
    Ok(buf.to_vec())
}

pub fn encode_authen_reply(reply: &AuthenReply) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_u8(reply.status);
    buf.put_u8(reply.flags);
    buf.put_u16(checked_u16_len(reply.server_msg.len(), "server_msg")?);
    buf.put_u16(checked_u16_len(reply.data.len(), "data")?);
    buf.extend_from_slice(reply.server_msg.as_bytes());
    buf.extend_from_slice(&reply.data);
    Ok(buf.to_vec())
}

pub fn parse_authen_reply(body: &[u8]) -> Result<AuthenReply> {
    ensure!(body.len() >= 6, "authentication reply body too short");
    let status = body[0];
    let flags = body[1];
    let msg_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let data_len = u16::from_be_bytes([body[4], body[5]]) as usize;
    let (server_msg, next) = read_string(body, 6, msg_len, "server_msg")?;
    let (data, next) = read_bytes(body, next, data_len, "data")?;
    ensure_consumed(body, next, "authentication reply")?;

    Ok(AuthenReply {
        status,
        flags,
        server_msg,
        data,
    })
}
