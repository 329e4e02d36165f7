// SPDX-License-Identifier: AGPL-3.0-only
//! `tacd`: a TACACS+ (RFC 8907) authentication, authorization and accounting daemon.

pub mod accounting;
pub mod ascii;
pub mod auth;
pub mod authorize;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod policy;
pub mod server;
pub mod session;
pub mod sink;
