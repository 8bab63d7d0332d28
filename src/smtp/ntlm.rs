//! NTLM messages for `AUTH NTLM`, with NTLMv2 responses.
//!
//! Message layouts follow MS-NLMP: a 32-byte type 1 (negotiate), the
//! server's type 2 (challenge), and a type 3 (authenticate) carrying LMv2
//! and NTLMv2 responses.

use chrono::Utc;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};

use crate::error::{MailError, Result};

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// Fields of a type 2 message used to build the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

/// Type 1 message with no domain or workstation supplied.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
    // Empty domain and workstation security buffers.
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

/// Parse a type 2 message.
pub fn parse_challenge(raw: &[u8]) -> Result<Challenge> {
    let bad = |why: &str| MailError::AuthFailed(format!("NTLM: malformed challenge ({why})"));
    if raw.len() < 32 || &raw[..8] != SIGNATURE {
        return Err(bad("signature"));
    }
    if read_u32(raw, 8) != Some(2) {
        return Err(bad("message type"));
    }
    let flags = read_u32(raw, 20).ok_or_else(|| bad("flags"))?;
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&raw[24..32]);

    let target_info = if raw.len() >= 48 {
        let len = read_u16(raw, 40).unwrap_or(0) as usize;
        let offset = read_u32(raw, 44).unwrap_or(0) as usize;
        raw.get(offset..offset + len)
            .ok_or_else(|| bad("target info out of range"))?
            .to_vec()
    } else {
        Vec::new()
    };
    Ok(Challenge {
        flags,
        server_challenge,
        target_info,
    })
}

/// Type 3 message with LMv2 and NTLMv2 responses.
pub fn authenticate_message(
    challenge: &Challenge,
    username: &str,
    password: &str,
    domain: &str,
    workstation: &str,
    client_challenge: [u8; 8],
    timestamp: u64,
) -> Vec<u8> {
    let v2_hash = ntlmv2_hash(username, password, domain);

    let mut lm = hmac_md5(&v2_hash, &[challenge.server_challenge.as_slice(), client_challenge.as_slice()]).to_vec();
    lm.extend_from_slice(&client_challenge);

    let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0u8; 4]);
    let mut nt = hmac_md5(&v2_hash, &[challenge.server_challenge.as_slice(), blob.as_slice()]).to_vec();
    nt.extend_from_slice(&blob);

    let domain = utf16le(domain);
    let user = utf16le(username);
    let workstation = utf16le(workstation);

    const HEADER_LEN: usize = 64;
    let mut payload = Vec::new();
    let mut buffers = Vec::new();
    for field in [&lm, &nt, &domain, &user, &workstation] {
        buffers.push(((HEADER_LEN + payload.len()) as u32, field.len() as u16));
        payload.extend_from_slice(field);
    }
    let session_key_offset = (HEADER_LEN + payload.len()) as u32;

    let mut msg = Vec::with_capacity(HEADER_LEN + payload.len());
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());
    for (offset, len) in buffers {
        push_security_buffer(&mut msg, len, offset);
    }
    push_security_buffer(&mut msg, 0, session_key_offset);
    let flags = NEGOTIATE_UNICODE
        | NEGOTIATE_NTLM
        | NEGOTIATE_ALWAYS_SIGN
        | (challenge.flags & NEGOTIATE_EXTENDED_SESSIONSECURITY);
    msg.extend_from_slice(&flags.to_le_bytes());
    msg.extend_from_slice(&payload);
    msg
}

/// Current time as a Windows FILETIME (100 ns ticks since 1601).
pub fn timestamp_now() -> u64 {
    let now = Utc::now();
    let secs = (now.timestamp() + FILETIME_EPOCH_OFFSET).max(0) as u64;
    secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100)
}

/// `HMAC-MD5(MD4(UTF-16LE(password)), UTF-16LE(UPPER(user) + domain))`.
pub fn ntlmv2_hash(username: &str, password: &str, domain: &str) -> [u8; 16] {
    let nt_hash = Md4::digest(utf16le(password));
    let identity = utf16le(&format!("{}{domain}", username.to_uppercase()));
    hmac_md5(nt_hash.as_slice(), &[identity.as_slice()])
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match Hmac::<md5::Md5>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return [0u8; 16],
    };
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn push_security_buffer(msg: &mut Vec<u8>, len: u16, offset: u32) {
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());
}

fn read_u16(raw: &[u8], at: usize) -> Option<u16> {
    raw.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(raw: &[u8], at: usize) -> Option<u32> {
    raw.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
