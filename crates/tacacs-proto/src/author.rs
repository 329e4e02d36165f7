// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ authorization packet structures plus parsing/encoding helpers.

use crate::header::Header;
use crate::util::{
    Attribute, checked_u8_len, checked_u16_len, ensure_consumed, parse_attributes,
    read_arg_lengths, read_args, read_string, validate_attributes,
};
use crate::{
    AUTHOR_STATUS_ERROR, AUTHOR_STATUS_FAIL, AUTHOR_STATUS_PASS_ADD, AUTHOR_STATUS_PASS_REPL,
};
use anyhow::{Result, ensure};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub header: Header,
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
pub struct AuthorizationResponse {
    pub status: u8,
    pub server_msg: String,
    pub data: String,
    pub args: Vec<String>,
}

/// Cisco devices terminate command argument lists with a literal `<cr>`.
const CMD_ARG_TERMINATOR: &str = "<cr>";

impl AuthorizationRequest {
    pub fn builder(session_id: u32) -> AuthorizationRequest {
        AuthorizationRequest {
            header: Header {
                version: crate::VERSION,
                seq_no: 1,
                session_id,
                length: 0,
                packet_type: crate::TYPE_AUTHOR,
                flags: 0,
            },
            authen_method: crate::AUTHEN_METH_TACACSPLUS,
            priv_lvl: 1,
            authen_type: crate::AUTHEN_TYPE_ASCII,
            authen_service: crate::AUTHEN_SVC_LOGIN,
            user: String::new(),
            port: String::new(),
            rem_addr: String::new(),
            args: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.header.flags = flags;
        self
    }

    /// Set or replace the service attribute (enforced to appear first).
    pub fn with_service(mut self, service: impl AsRef<str>) -> Self {
        self.args
            .retain(|a| !a.to_lowercase().starts_with("service="));
        self.args.insert(0, format!("service={}", service.as_ref()));
        self
    }

    /// Set or replace the cmd attribute.
    pub fn with_cmd(mut self, cmd: impl AsRef<str>) -> Self {
        self.args.retain(|a| !a.to_lowercase().starts_with("cmd="));
        self.args.push(format!("cmd={}", cmd.as_ref()));
        self
    }

    /// Add a cmd-arg attribute (multiple allowed).
    pub fn add_cmd_arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(format!("cmd-arg={}", arg.as_ref()));
        self
    }

    pub fn add_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn attributes(&self) -> Vec<Attribute> {
        parse_attributes(&self.args)
    }

    pub fn service(&self) -> Option<String> {
        attribute_value(&self.args, "service")
    }

    /// `cmd` value; `Some("")` is a service start carrying an empty command.
    pub fn cmd(&self) -> Option<String> {
        attribute_value(&self.args, "cmd")
    }

    /// Full command line: `cmd` followed by every `cmd-arg`, minus the `<cr>` terminator.
    /// `None` when the request is not a command check.
    pub fn command_string(&self) -> Option<String> {
        command_line(&self.args)
    }
}

pub(crate) fn attribute_value(args: &[String], name: &str) -> Option<String> {
    parse_attributes(args)
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .map(|a| a.value)
}

pub(crate) fn command_line(args: &[String]) -> Option<String> {
    let mut base = None;
    let mut arguments = Vec::new();
    for attr in parse_attributes(args) {
        if attr.name.eq_ignore_ascii_case("cmd") {
            base = Some(attr.value);
        } else if attr.name.eq_ignore_ascii_case("cmd-arg") && attr.value != CMD_ARG_TERMINATOR {
            arguments.push(attr.value);
        }
    }
    let mut cmd = base.filter(|c| !c.is_empty())?;
    for arg in arguments {
        cmd.push(' ');
        cmd.push_str(&arg);
    }
    Some(cmd)
}

pub fn parse_author_body(header: Header, body: &[u8]) -> Result<AuthorizationRequest> {
    ensure!(body.len() >= 8, "authorization body too short");
    let authen_method = body[0];
    let priv_lvl = body[1];
    let authen_type = body[2];
    let authen_service = body[3];
    ensure!(priv_lvl <= 0x0f, "authorization priv_lvl invalid");
    let user_len = body[4] as usize;
    let port_len = body[5] as usize;
    let rem_addr_len = body[6] as usize;
    let arg_cnt = body[7] as usize;

    let (arg_lens, mut cursor) = read_arg_lengths(body, 8, arg_cnt)?;
    let (user, next) = read_string(body, cursor, user_len, "user")?;
    cursor = next;
    let (port, next) = read_string(body, cursor, port_len, "port")?;
    cursor = next;
    let (rem_addr, next) = read_string(body, cursor, rem_addr_len, "rem_addr")?;
    cursor = next;
    let (args, next) = read_args(body, cursor, &arg_lens)?;
    ensure_consumed(body, next, "authorization request")?;
    validate_attributes(&args)?;

    Ok(AuthorizationRequest {
        header,
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

pub fn encode_author_request(request: &AuthorizationRequest) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
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

pub fn encode_author_response(response: &AuthorizationResponse) -> Result<Vec<u8>> {
    ensure!(
        response.status == AUTHOR_STATUS_PASS_REPL
            || response.status == AUTHOR_STATUS_PASS_ADD
            || response.status == AUTHOR_STATUS_FAIL
            || response.status == AUTHOR_STATUS_ERROR,
        "authorization response status invalid"
    );
    let mut buf = BytesMut::new();
    buf.put_u8(response.status);
    buf.put_u8(checked_u8_len(response.args.len(), "arg count")?);
    buf.put_u16(checked_u16_len(response.server_msg.len(), "server_msg")?);
    buf.put_u16(checked_u16_len(response.data.len(), "data")?);
    for arg in &response.args {
        buf.put_u8(checked_u8_len(arg.len(), "arg")?);
    }
    buf.extend_from_slice(response.server_msg.as_bytes());
    buf.extend_from_slice(response.data.as_bytes());
    for arg in &response.args {
        buf.extend_from_slice(arg.as_bytes());
    }
    Ok(buf.to_vec())
}

pub fn parse_author_response(body: &[u8]) -> Result<AuthorizationResponse> {
    ensure!(body.len() >= 6, "authorization response too short");
    let status = body[0];
    let arg_cnt = body[1] as usize;
    let server_msg_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let data_len = u16::from_be_bytes([body[4], body[5]]) as usize;
    let (arg_lens, cursor) = read_arg_lengths(body, 6, arg_cnt)?;
    let (server_msg, cursor) = read_string(body, cursor, server_msg_len, "server_msg")?;
    let (data, cursor) = read_string(body, cursor, data_len, "data")?;
    let (args, cursor) = read_args(body, cursor, &arg_lens)?;
    ensure_consumed(body, cursor, "authorization response")?;

    Ok(AuthorizationResponse {
        status,
        server_msg,
        data,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_string_joins_args_and_drops_terminator() {
        let req = AuthorizationRequest::builder(1)
            .with_user("alice")
            .with_service("shell")
            .with_cmd("show")
            .add_cmd_arg("running-config")
            .add_cmd_arg("<cr>");
        assert_eq!(req.service().as_deref(), Some("shell"));
        assert_eq!(req.command_string().as_deref(), Some("show running-config"));
    }

    #[test]
    fn service_start_has_no_command() {
        let req = AuthorizationRequest::builder(1)
            .with_service("shell")
            .add_arg("cmd=");
        assert_eq!(req.cmd().as_deref(), Some(""));
        assert!(req.command_string().is_none());
    }

    #[test]
    fn request_body_places_arg_lengths_before_strings() {
        let req = AuthorizationRequest::builder(9)
            .with_user("bob")
            .with_service("shell")
            .with_cmd("reload");
        let body = encode_author_request(&req).unwrap();
        assert_eq!(body[7], 2);
        assert_eq!(body[8] as usize, "service=shell".len());
        assert_eq!(body[9] as usize, "cmd=reload".len());
        assert_eq!(&body[10..13], b"bob");

        let parsed = parse_author_body(req.header, &body).unwrap();
        assert_eq!(parsed.user, "bob");
        assert_eq!(parsed.args, req.args);
    }

    #[test]
    fn request_with_malformed_attribute_is_rejected() {
        let req = AuthorizationRequest::builder(9)
            .with_user("bob")
            .add_arg("garbage");
        let body = encode_author_request(&req).unwrap();
        assert!(parse_author_body(req.header, &body).is_err());
    }

    #[test]
    fn response_encoding_parses_back() {
        let response = AuthorizationResponse {
            status: AUTHOR_STATUS_PASS_ADD,
            server_msg: String::new(),
            data: String::new(),
            args: vec!["priv-lvl=15".into()],
        };
        let body = encode_author_response(&response).unwrap();
        assert_eq!(&body[..6], &[AUTHOR_STATUS_PASS_ADD, 1, 0, 0, 0, 0]);
        assert_eq!(parse_author_response(&body).unwrap(), response);
    }

    #[test]
    fn response_with_unknown_status_is_refused() {
        let response = AuthorizationResponse {
            status: 0x77,
            server_msg: String::new(),
            data: String::new(),
            args: Vec::new(),
        };
        assert!(encode_author_response(&response).is_err());
    }
}
