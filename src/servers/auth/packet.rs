//! Wire format of the login protocol. Every message starts with a one-byte
//! command; integers are little-endian.

use anyhow::{bail, Result};
use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::srp::ServerChallenge;
use super::AuthResult;
use crate::config::ClientVersion;
use crate::database::Realm;
use crate::network::packet::{write_cstring, PacketReader, ProtocolError};

pub const CMD_AUTH_LOGON_CHALLENGE: u8 = 0x00;
pub const CMD_AUTH_LOGON_PROOF: u8 = 0x01;
pub const CMD_REALM_LIST: u8 = 0x10;

/// Bytes after the command byte in a proof request.
pub const PROOF_REQUEST_LEN: usize = 32 + 20 + 20 + 1 + 1;

/// Bytes after the command byte in a realm list request.
pub const REALM_LIST_REQUEST_LEN: usize = 4;

/// Fixed part of the challenge body, up to and including the username length.
const CHALLENGE_FIXED_LEN: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub version: ClientVersion,
    pub build: u16,
    pub ip: [u8; 4],
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    pub a_pub: [u8; 32],
    pub m1: [u8; 20],
    pub crc_hash: [u8; 20],
    pub key_count: u8,
    pub security_flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    Challenge(ChallengeRequest),
    Proof(ProofRequest),
    RealmList,
}

/// Parses a challenge body (the bytes after error and size).
pub fn parse_challenge(body: &[u8]) -> Result<ChallengeRequest, ProtocolError> {
    let mut r = PacketReader::new(body);
    r.bytes(4)?; // game name
    let version = ClientVersion::new(r.u8()?, r.u8()?, r.u8()?);
    let build = r.u16_le()?;
    r.bytes(4 + 4 + 4 + 4)?; // platform, os, locale, timezone
    let ip = r.array::<4>()?;
    let len = r.u8()? as usize;
    let name = r.bytes(len)?;
    let username = std::str::from_utf8(name)
        .map_err(|_| ProtocolError::InvalidString)?
        .to_string();
    Ok(ChallengeRequest { version, build, ip, username })
}

pub fn parse_proof(body: &[u8]) -> Result<ProofRequest, ProtocolError> {
    let mut r = PacketReader::new(body);
    Ok(ProofRequest {
        a_pub: r.array()?,
        m1: r.array()?,
        crc_hash: r.array()?,
        key_count: r.u8()?,
        security_flags: r.u8()?,
    })
}

/// Reads the next message. `Ok(None)` means the peer closed the connection
/// between messages.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<AuthMessage>> {
    let mut cmd = [0u8; 1];
    if stream.read(&mut cmd).await? == 0 {
        return Ok(None);
    }

    match cmd[0] {
        CMD_AUTH_LOGON_CHALLENGE => {
            let mut head = [0u8; 3];
            stream.read_exact(&mut head).await?;
            let size = u16::from_le_bytes([head[1], head[2]]) as usize;
            if size < CHALLENGE_FIXED_LEN {
                bail!("challenge size {} below minimum {}", size, CHALLENGE_FIXED_LEN);
            }
            let mut body = vec![0u8; size];
            stream.read_exact(&mut body).await?;
            Ok(Some(AuthMessage::Challenge(parse_challenge(&body)?)))
        }
        CMD_AUTH_LOGON_PROOF => {
            let mut body = [0u8; PROOF_REQUEST_LEN];
            stream.read_exact(&mut body).await?;
            Ok(Some(AuthMessage::Proof(parse_proof(&body)?)))
        }
        CMD_REALM_LIST => {
            let mut reserved = [0u8; REALM_LIST_REQUEST_LEN];
            stream.read_exact(&mut reserved).await?;
            Ok(Some(AuthMessage::RealmList))
        }
        other => bail!("unknown auth command {:02X}", other),
    }
}

/// Two-byte rejection: command, result.
pub fn build_reject(cmd: u8, result: AuthResult) -> Vec<u8> {
    vec![cmd, result.code()]
}

pub fn build_challenge_ok(c: &ServerChallenge) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + 32 + 2 + 1 + 32 + 32 + 16 + 1);
    buf.put_u8(CMD_AUTH_LOGON_CHALLENGE);
    buf.put_u8(AuthResult::Success.code());
    buf.put_u8(0);
    buf.put_slice(&c.b_pub);
    buf.put_u8(1);
    buf.put_u8(c.g);
    buf.put_u8(c.n.len() as u8);
    buf.put_slice(&c.n);
    buf.put_slice(&c.salt);
    buf.put_slice(&rand::random::<[u8; 16]>()); // CRC salt
    buf.put_u8(0); // security flags
    buf
}

pub fn build_proof_ok(server_proof: &[u8; 20]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + 20 + 4);
    buf.put_u8(CMD_AUTH_LOGON_PROOF);
    buf.put_u8(AuthResult::Success.code());
    buf.put_slice(server_proof);
    buf.put_u32_le(0);
    buf
}

/// Realm list response. Each realm is paired with the account's character
/// count on it.
pub fn build_realm_list(realms: &[(Realm, u8)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.put_u32_le(0);
    body.put_u8(realms.len().min(u8::MAX as usize) as u8);
    for (realm, characters) in realms.iter().take(u8::MAX as usize) {
        body.put_u32_le(realm.realm_type);
        body.put_u8(realm.flags);
        write_cstring(&mut body, &realm.name);
        write_cstring(&mut body, &realm.address);
        body.put_f32_le(realm.population);
        body.put_u8(*characters);
        body.put_u8(realm.timezone);
        body.put_u8(0x01);
    }
    body.put_u16_le(0x0002);

    let mut buf = Vec::with_capacity(3 + body.len());
    buf.put_u8(CMD_REALM_LIST);
    buf.put_u16_le(body.len() as u16);
    buf.extend_from_slice(&body);
    buf
}
