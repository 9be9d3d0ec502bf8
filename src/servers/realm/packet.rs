//! World protocol opcodes and payload layouts.

use bytes::BufMut;
use sha1::{Digest, Sha1};

use crate::game::update::Position;
use crate::network::packet::{PacketReader, ProtocolError};

pub const CMSG_PLAYER_LOGIN: u16 = 0x03D;
pub const CMSG_LOGOUT_REQUEST: u16 = 0x04B;
pub const SMSG_LOGOUT_RESPONSE: u16 = 0x04C;
pub const SMSG_LOGOUT_COMPLETE: u16 = 0x04D;
pub const CMSG_PING: u16 = 0x1DC;
pub const SMSG_PONG: u16 = 0x1DD;
pub const SMSG_AUTH_CHALLENGE: u16 = 0x1EC;
pub const CMSG_AUTH_SESSION: u16 = 0x1ED;
pub const SMSG_AUTH_RESPONSE: u16 = 0x1EE;
pub const SMSG_LOGIN_VERIFY_WORLD: u16 = 0x236;

// SMSG_AUTH_RESPONSE result codes
pub const AUTH_OK: u8 = 0x0C;
pub const AUTH_FAILED: u8 = 0x0D;
pub const AUTH_UNKNOWN_ACCOUNT: u8 = 0x15;
pub const AUTH_BANNED: u8 = 0x1C;
pub const AUTH_DB_BUSY: u8 = 0x1F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub build: u32,
    pub account: String,
    pub client_seed: u32,
    pub digest: [u8; 20],
}

/// Parses `CMSG_AUTH_SESSION`. Trailing addon data is ignored.
pub fn parse_auth_session(payload: &[u8]) -> Result<AuthSession, ProtocolError> {
    let mut r = PacketReader::new(payload);
    let build = r.u32_le()?;
    r.u32_le()?; // server id
    let account = r.cstring()?;
    let client_seed = r.u32_le()?;
    let digest = r.array()?;
    Ok(AuthSession { build, account, client_seed, digest })
}

/// `SHA1(UPPER(account) | 0u32 | client_seed | server_seed | K)`
pub fn auth_session_digest(account: &str, client_seed: u32, server_seed: u32, key: &[u8; 40]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(account.to_uppercase().as_bytes());
    hasher.update(0u32.to_le_bytes());
    hasher.update(client_seed.to_le_bytes());
    hasher.update(server_seed.to_le_bytes());
    hasher.update(key);
    hasher.finalize().into()
}

pub fn build_auth_challenge(server_seed: u32) -> Vec<u8> {
    server_seed.to_le_bytes().to_vec()
}

pub fn build_auth_ok() -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    buf.put_u8(AUTH_OK);
    buf.put_u32_le(0); // billing time remaining
    buf.put_u8(0); // billing flags
    buf.put_u32_le(0); // rested time
    buf
}

pub fn build_auth_failure(code: u8) -> Vec<u8> {
    vec![code]
}

/// `CMSG_PING` carries (sequence, latency); only the sequence is echoed.
pub fn parse_ping(payload: &[u8]) -> Result<(u32, u32), ProtocolError> {
    let mut r = PacketReader::new(payload);
    Ok((r.u32_le()?, r.u32_le()?))
}

pub fn build_pong(sequence: u32) -> Vec<u8> {
    sequence.to_le_bytes().to_vec()
}

pub fn parse_player_login(payload: &[u8]) -> Result<u64, ProtocolError> {
    PacketReader::new(payload).u64_le()
}

pub fn build_login_verify_world(map_id: u32, pos: &Position) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.put_u32_le(map_id);
    buf.put_f32_le(pos.x);
    buf.put_f32_le(pos.y);
    buf.put_f32_le(pos.z);
    buf.put_f32_le(pos.o);
    buf
}

pub fn build_logout_response() -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.put_u32_le(0); // reason
    buf.put_u8(1); // instant
    buf
}
