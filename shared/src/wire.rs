//! Byte-level codecs for the small side protocols around the session server
//!
//! - Firewall control: one action byte (`b'a'` add, `b'r'` remove) followed by
//!   the four octets of an IPv4 address.
//! - Auth codes: both the request (username) and the reply (code) are a
//!   little-endian `u16` length followed by that many UTF-8 bytes.

use std::net::Ipv4Addr;
use thiserror::Error;

pub const FIREWALL_FRAME_LEN: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("string of {0} bytes does not fit a u16 length prefix")]
    TooLong(usize),

    #[error("invalid UTF-8 in length-prefixed string")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallAction {
    Add,
    Remove,
}

impl FirewallAction {
    pub fn as_byte(self) -> u8 {
        match self {
            FirewallAction::Add => b'a',
            FirewallAction::Remove => b'r',
        }
    }
}

pub fn encode_firewall_frame(action: FirewallAction, ip: Ipv4Addr) -> [u8; FIREWALL_FRAME_LEN] {
    let [a, b, c, d] = ip.octets();
    [action.as_byte(), a, b, c, d]
}

/// Encodes `value` as a `u16` little-endian length followed by its bytes.
pub fn encode_prefixed(value: &str) -> Result<Vec<u8>, WireError> {
    let len = u16::try_from(value.len()).map_err(|_| WireError::TooLong(value.len()))?;

    let mut out = Vec::with_capacity(2 + value.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(out)
}

/// Decodes a length-prefixed string. Bytes past the declared length are ignored.
pub fn decode_prefixed(data: &[u8]) -> Result<String, WireError> {
    if data.len() < 2 {
        return Err(WireError::Truncated {
            expected: 2,
            actual: data.len(),
        });
    }

    let len = u16::from_le_bytes([data[0], data[1]]) as usize;
    let body = data.get(2..2 + len).ok_or(WireError::Truncated {
        expected: 2 + len,
        actual: data.len(),
    })?;

    String::from_utf8(body.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

pub fn encode_auth_request(username: &str) -> Result<Vec<u8>, WireError> {
    encode_prefixed(username)
}

pub fn decode_auth_request(data: &[u8]) -> Result<String, WireError> {
    decode_prefixed(data)
}

pub fn encode_auth_reply(code: &str) -> Result<Vec<u8>, WireError> {
    encode_prefixed(code)
}

pub fn decode_auth_reply(data: &[u8]) -> Result<String, WireError> {
    decode_prefixed(data)
}
