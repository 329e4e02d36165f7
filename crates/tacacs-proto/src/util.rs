// SPDX-License-Identifier: AGPL-3.0-only
//! Shared parsing utilities for TACACS+ packet bodies.

use anyhow::{Context, Result, anyhow, ensure};

pub fn read_bytes(body: &[u8], offset: usize, len: usize, label: &str) -> Result<(Vec<u8>, usize)> {
    let next = offset
        .checked_add(len)
        .ok_or_else(|| anyhow!("overflow parsing {label}"))?;
    let slice = body
        .get(offset..next)
        .ok_or_else(|| anyhow!("{label} truncated"))?;
    Ok((slice.to_vec(), next))
}

pub fn read_string(body: &[u8], offset: usize, len: usize, label: &str) -> Result<(String, usize)> {
    let (raw, next) = read_bytes(body, offset, len, label)?;
    let value = String::from_utf8(raw).with_context(|| format!("decoding {label} as UTF-8"))?;
    Ok((value, next))
}

/// Reads `count` one-byte argument lengths followed later by the argument strings.
pub fn read_arg_lengths(body: &[u8], offset: usize, count: usize) -> Result<(Vec<usize>, usize)> {
    let lens = body
        .get(offset..offset + count)
        .ok_or_else(|| anyhow!("argument lengths truncated"))?;
    Ok((lens.iter().map(|l| *l as usize).collect(), offset + count))
}

pub fn read_args(body: &[u8], offset: usize, lens: &[usize]) -> Result<(Vec<String>, usize)> {
    let mut cursor = offset;
    let mut args = Vec::with_capacity(lens.len());
    for (idx, len) in lens.iter().enumerate() {
        let (arg, next) = read_string(body, cursor, *len, &format!("arg[{idx}]"))?;
        cursor = next;
        args.push(arg);
    }
    Ok((args, cursor))
}

/// Fails when bytes remain after the last declared field.
pub fn ensure_consumed(body: &[u8], cursor: usize, kind: &str) -> Result<()> {
    ensure!(
        cursor == body.len(),
        "{kind} carries {} trailing bytes",
        body.len().saturating_sub(cursor)
    );
    Ok(())
}

pub fn checked_u8_len(len: usize, label: &str) -> Result<u8> {
    u8::try_from(len).map_err(|_| anyhow!("{label} exceeds 255 bytes"))
}

pub fn checked_u16_len(len: usize, label: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| anyhow!("{label} exceeds 65535 bytes"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    /// `name*value` attributes are optional; the NAS may ignore them.
    pub optional: bool,
}

impl Attribute {
    pub fn parse(raw: &str) -> Option<Attribute> {
        let idx = raw.find(&['=', '*'][..])?;
        let (name, rest) = raw.split_at(idx);
        if name.is_empty() {
            return None;
        }
        Some(Attribute {
            name: name.to_string(),
            value: rest[1..].to_string(),
            optional: rest.starts_with('*'),
        })
    }
}

pub fn parse_attributes(args: &[String]) -> Vec<Attribute> {
    args.iter().filter_map(|s| Attribute::parse(s)).collect()
}

pub fn validate_attributes(args: &[String]) -> Result<()> {
    for (idx, arg) in args.iter().enumerate() {
        ensure!(!arg.is_empty(), "attr[{idx}] is empty");
        ensure!(
            Attribute::parse(arg).is_some(),
            "attr[{idx}] must be name=value or name*value"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_parse_mandatory_and_optional() {
        let a = Attribute::parse("priv-lvl=15").unwrap();
        assert_eq!(a.name, "priv-lvl");
        assert_eq!(a.value, "15");
        assert!(!a.optional);

        let b = Attribute::parse("timeout*30").unwrap();
        assert_eq!(b.name, "timeout");
        assert!(b.optional);
    }

    #[test]
    fn attribute_value_may_contain_separators() {
        let a = Attribute::parse("cmd-arg=a=b*c").unwrap();
        assert_eq!(a.name, "cmd-arg");
        assert_eq!(a.value, "a=b*c");
    }

    #[test]
    fn attribute_empty_value_allowed() {
        let a = Attribute::parse("cmd=").unwrap();
        assert_eq!(a.value, "");
    }

    #[test]
    fn validate_rejects_nameless_and_separatorless() {
        assert!(validate_attributes(&["=x".into()]).is_err());
        assert!(validate_attributes(&["service".into()]).is_err());
        assert!(validate_attributes(&["".into()]).is_err());
        assert!(validate_attributes(&["service=shell".into(), "cmd=".into()]).is_ok());
    }

    #[test]
    fn read_bytes_truncated() {
        let err = read_bytes(&[1, 2, 3], 2, 4, "user").unwrap_err();
        assert!(err.to_string().contains("user truncated"));
    }
}
