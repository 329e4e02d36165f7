// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ shared-secret body obfuscation (MD5 pseudo-pad).
//!
//! The pad is `MD5(session_id || key || version || seq_no)` for the first block and
//! `MD5(session_id || key || version || seq_no || previous_block)` for every block
//! after it, truncated to the body length. XOR makes the operation its own inverse.

use crate::error::FramingError;
use crate::header::Header;
#[cfg(feature = "legacy-md5")]
use openssl::hash::{MessageDigest, hash};

const MD5_LEN: usize = 16;

#[cfg(feature = "legacy-md5")]
pub fn pseudo_pad(
    key: &[u8],
    session_id: u32,
    version: u8,
    seq_no: u8,
    len: usize,
) -> Result<Vec<u8>, FramingError> {
    let mut pad: Vec<u8> = Vec::with_capacity(len.div_ceil(MD5_LEN) * MD5_LEN);
    let mut seed: Vec<u8> = Vec::with_capacity(4 + key.len() + 2 + MD5_LEN);
    while pad.len() < len {
        seed.clear();
        seed.extend_from_slice(&session_id.to_be_bytes());
        seed.extend_from_slice(key);
        seed.push(version);
        seed.push(seq_no);
        if pad.len() >= MD5_LEN {
            seed.extend_from_slice(&pad[pad.len() - MD5_LEN..]);
        }
        let digest = hash(MessageDigest::md5(), &seed)?;
        pad.extend_from_slice(&digest);
    }
    pad.truncate(len);
    Ok(pad)
}

#[cfg(not(feature = "legacy-md5"))]
pub fn pseudo_pad(
    _key: &[u8],
    _session_id: u32,
    _version: u8,
    _seq_no: u8,
    _len: usize,
) -> Result<Vec<u8>, FramingError> {
    Err(FramingError::ObfuscationDisabled)
}

pub fn encrypt(
    body: &[u8],
    key: &[u8],
    session_id: u32,
    version: u8,
    seq_no: u8,
) -> Result<Vec<u8>, FramingError> {
    if key.is_empty() {
        return Err(FramingError::EmptySecret);
    }
    let pad = pseudo_pad(key, session_id, version, seq_no, body.len())?;
    Ok(body.iter().zip(pad.iter()).map(|(b, p)| b ^ p).collect())
}

pub fn decrypt(
    body: &[u8],
    key: &[u8],
    session_id: u32,
    version: u8,
    seq_no: u8,
) -> Result<Vec<u8>, FramingError> {
    encrypt(body, key, session_id, version, seq_no)
}

/// In-place variant keyed by a packet header.
pub(crate) fn apply_body_crypto(
    header: &Header,
    body: &mut [u8],
    secret: &[u8],
) -> Result<(), FramingError> {
    if secret.is_empty() {
        return Err(FramingError::EmptySecret);
    }
    let pad = pseudo_pad(
        secret,
        header.session_id,
        header.version,
        header.seq_no,
        body.len(),
    )?;
    for (b, p) in body.iter_mut().zip(pad.iter()) {
        *b ^= *p;
    }
    Ok(())
}
