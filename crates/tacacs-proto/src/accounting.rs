// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ accounting packet structures plus parsing/encoding helpers.

use crate::author::{attribute_value, command_line};
use crate::header::Header;
use crate::util::{
    Attribute, checked_u8_len, checked_u16_len, ensure_consumed, parse_attributes,
    read_arg_lengths, read_args, read_string, validate_attributes,
};
use crate::{ACCT_FLAG_START, ACCT_FLAG_STOP, ACCT_FLAG_WATCHDOG};
use anyhow::{Result, bail, ensure};
use bytes::{BufMut, BytesMut};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcctKind {
    Start,
    Stop,
    /// Interim update; `START|WATCHDOG` is a watchdog that also carries start data.
    Watchdog,
}

impl AcctKind {
    pub fn from_flags(flags: u8) -> Result<Self> {
        match flags {
            ACCT_FLAG_START => Ok(AcctKind::Start),
            ACCT_FLAG_STOP => Ok(AcctKind::Stop),
            ACCT_FLAG_WATCHDOG => Ok(AcctKind::Watchdog),
            f if f == ACCT_FLAG_WATCHDOG | ACCT_FLAG_START => Ok(AcctKind::Watchdog),
            other => bail!("accounting flags invalid: {other:#04x}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AcctKind::Start => "start",
            AcctKind::Stop => "stop",
            AcctKind::Watchdog => "watchdog",
        }
    }
}

impl fmt::Display for AcctKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AccountingRequest {
    pub header: Header,
    pub flags: u8,
    pub kind: AcctKind,
    pub authen_method: u8,
    pub priv_lvl: u8,
    pub authen_type: u8,
    pub authen_service: u8,
    pub user: String,
    pub port: String,
    pub rem_addr: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingReply {
    pub status: u8,
    pub server_msg: String,
    pub data: String,
}

impl AccountingRequest {
    pub fn attributes(&self) -> Vec<Attribute> {
        parse_attributes(&self.args)
    }

    pub fn service(&self) -> Option<String> {
        attribute_value(&self.args, "service")
    }

    pub fn task_id(&self) -> Option<String> {
        attribute_value(&self.args, "task_id")
    }

    pub fn command_string(&self) -> Option<String> {
        command_line(&self.args)
    }
}

pub fn parse_accounting_body(header: Header, body: &[u8]) -> Result<AccountingRequest> {
    ensure!(body.len() >= 9, "accounting body too short");
    let flags = body[0];
    let kind = AcctKind::from_flags(flags)?;
    let authen_method = body[1];
    let priv_lvl = body[2];
    let authen_type = body[3];
    let authen_service = body[4];
    let user_len = body[5] as usize;
    let port_len = body[6] as usize;
    let rem_addr_len = body[7] as usize;
    let arg_cnt = body[8] as usize;

    let (arg_lens, mut cursor) = read_arg_lengths(body, 9, arg_cnt)?;
    let (user, next) = read_string(body, cursor, user_len, "user")?;
    cursor = next;
    let (port, next) = read_string(body, cursor, port_len, "port")?;
    cursor = next;
    let (rem_addr, next) = read_string(body, cursor, rem_addr_len, "rem_addr")?;
    cursor = next;
    let (args, next) = read_args(body, cursor, &arg_lens)?;
    ensure_consumed(body, next, "accounting request")?;
    validate_attributes(&args)?;

    Ok(AccountingRequest {
        header,
        flags,
        kind,
        authen_method,
        priv_lvl,
        authen_type,
        authen_service,
        user,
        port,
        rem_addr,
        args,
    })
}

pub fn encode_accounting_request(request: &AccountingRequest) -> Result<Vec<u8>> {
    let mut buf: BytesMut = BytesMut::new();
    buf.put_u8(request.flags);
    buf.put_u8(request.authen_method);
    buf.put_u8(request.priv_lvl);
    buf.put_u8(request.authen_type);
    buf.put_u8(request.authen_service);
    buf.put_u8(checked_u8_len(request.user.len(), "user")?);
    buf.put_u8(checked_u8_len(request.port.len(), "port")?);
    buf.put_u8(checked_u8_len(request.rem_addr.len(), "rem_addr")?);
    buf.put_u8(checked_u8_len(request.args.len(), "arg count")?);
    for arg in &request.args {
        buf.put_u8(checked_u8_len(arg.len(), "arg")?);
    }
    buf.extend_from_slice(request.user.as_bytes());
    buf.extend_from_slice(request.port.as_bytes());
    buf.extend_from_slice(request.rem_addr.as_bytes());
    for arg in &request.args {
        buf.extend_from_slice(arg.as_bytes());
    }
    Ok(buf.to_vec())
}

pub fn encode_accounting_reply(reply: &AccountingReply) -> Result<Vec<u8>> {
    let mut buf: BytesMut = BytesMut::new();
    buf.put_u16(checked_u16_len(reply.server_msg.len(), "server_msg")?);
    buf.put_u16(checked_u16_len(reply.data.len(), "data")?);
    buf.put_u8(reply.status);
    buf.extend_from_slice(reply.server_msg.as_bytes());
    buf.extend_from_slice(reply.data.as_bytes());
    Ok(buf.to_vec())
}

pub fn parse_accounting_reply(body: &[u8]) -> Result<AccountingReply> {
    ensure!(body.len() >= 5, "accounting reply too short");
    let server_msg_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let data_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let status = body[4];
    let (server_msg, cursor) = read_string(body, 5, server_msg_len, "server_msg")?;
    let (data, cursor) = read_string(body, cursor, data_len, "data")?;
    ensure_consumed(body, cursor, "accounting reply")?;
    Ok(AccountingReply {
        status,
        server_msg,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ACCT_STATUS_SUCCESS, TYPE_ACCT, VERSION};

    fn request(flags: u8, args: &[&str]) -> AccountingRequest {
        AccountingRequest {
            header: Header {
                version: VERSION,
                packet_type: TYPE_ACCT,
                seq_no: 1,
                flags: 0,
                session_id: 77,
                length: 0,
            },
            flags,
            kind: AcctKind::Start,
            authen_method: crate::AUTHEN_METH_TACACSPLUS,
            priv_lvl: 15,
            authen_type: crate::AUTHEN_TYPE_ASCII,
            authen_service: crate::AUTHEN_SVC_LOGIN,
            user: "alice".into(),
            port: "tty2".into(),
            rem_addr: "192.0.2.1".into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn flag_combinations() {
        assert_eq!(AcctKind::from_flags(ACCT_FLAG_START).unwrap(), AcctKind::Start);
        assert_eq!(AcctKind::from_flags(ACCT_FLAG_STOP).unwrap(), AcctKind::Stop);
        assert_eq!(
            AcctKind::from_flags(ACCT_FLAG_START | ACCT_FLAG_WATCHDOG).unwrap(),
            AcctKind::Watchdog
        );
        assert!(AcctKind::from_flags(ACCT_FLAG_START | ACCT_FLAG_STOP).is_err());
        assert!(AcctKind::from_flags(0).is_err());
    }

    #[test]
    fn request_exposes_command_and_task() {
        let req = request(
            ACCT_FLAG_STOP,
            &["task_id=12", "service=shell", "cmd=show", "cmd-arg=version", "cmd-arg=<cr>"],
        );
        let body = encode_accounting_request(&req).unwrap();
        let parsed = parse_accounting_body(req.header, &body).unwrap();
        assert_eq!(parsed.kind, AcctKind::Stop);
        assert_eq!(parsed.task_id().as_deref(), Some("12"));
        assert_eq!(parsed.service().as_deref(), Some("shell"));
        assert_eq!(parsed.command_string().as_deref(), Some("show version"));
    }

    #[test]
    fn request_with_conflicting_flags_is_rejected() {
        let req = request(ACCT_FLAG_START | ACCT_FLAG_STOP, &["task_id=1"]);
        let body = encode_accounting_request(&req).unwrap();
        assert!(parse_accounting_body(req.header, &body).is_err());
    }

    #[test]
    fn reply_puts_status_after_lengths() {
        let reply = AccountingReply {
            status: ACCT_STATUS_SUCCESS,
            server_msg: "ok".into(),
            data: String::new(),
        };
        let body = encode_accounting_reply(&reply).unwrap();
        assert_eq!(&body[..5], &[0, 2, 0, 0, ACCT_STATUS_SUCCESS]);
        assert_eq!(parse_accounting_reply(&body).unwrap(), reply);
    }
}
