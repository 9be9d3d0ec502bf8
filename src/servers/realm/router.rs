//! Opcode dispatch for authenticated world sessions.
//!
//! Every owned opcode names the stage a session must have reached before its
//! handler runs. Opcodes not listed belong to gameplay handlers outside this
//! crate and are logged and dropped.

use tokio::sync::Mutex;

use super::packet::*;
use super::{ConnectionError, RealmState};
use crate::database::AccountStore;
use crate::game::entity::{Entity, STAND_STATE_SIT, UNIT_FLAG_STUNNED};
use crate::game::fields::{UNIT_FIELD_BYTES_1, UNIT_FIELD_FLAGS};
use crate::game::update::{pack_update, UpdateBlock, UpdatePacket};
use crate::network::packet::Frame;
use crate::servers::auth::srp::digests_match;
use crate::session::{Outbound, Session, SessionStage};

/// What the connection loop does after a frame is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Decipher inbound headers with this key from the next read on.
    InstallCipher([u8; 40]),
    Close,
}

pub fn required_stage(opcode: u16) -> Option<SessionStage> {
    match opcode {
        CMSG_AUTH_SESSION => Some(SessionStage::ChallengeIssued),
        CMSG_PING | CMSG_PLAYER_LOGIN => Some(SessionStage::ProofVerified),
        CMSG_LOGOUT_REQUEST => Some(SessionStage::CharacterBound),
        _ => None,
    }
}

pub async fn dispatch<S: AccountStore>(
    state: &RealmState<S>,
    session: &Mutex<Session>,
    frame: Frame,
) -> Result<Disposition, ConnectionError> {
    let mut s = session.lock().await;
    tracing::debug!(
        "[realm] [packet_in] session={} opcode={:04X} len={}",
        s.id, frame.opcode, frame.payload.len()
    );

    let Some(required) = required_stage(frame.opcode) else {
        tracing::debug!("[realm] [packet_unhandled] session={} opcode={:04X}", s.id, frame.opcode);
        return Ok(Disposition::Continue);
    };
    if !s.is_ready(required) {
        tracing::warn!(
            "[realm] [stage_gate] session={} opcode={:04X} stage={:?} required={:?}",
            s.id, frame.opcode, s.stage(), required
        );
        return Ok(Disposition::Continue);
    }

    match frame.opcode {
        CMSG_AUTH_SESSION => handle_auth_session(state, &mut s, &frame.payload).await,
        CMSG_PING => handle_ping(&s, &frame.payload).await,
        CMSG_PLAYER_LOGIN => handle_player_login(state, &mut s, &frame.payload).await,
        CMSG_LOGOUT_REQUEST => handle_logout(state, &mut s).await,
        _ => Ok(Disposition::Continue),
    }
}

async fn reject_auth(s: &Session, code: u8) -> Result<Disposition, ConnectionError> {
    s.send(SMSG_AUTH_RESPONSE, build_auth_failure(code)).await?;
    Ok(Disposition::Close)
}

async fn handle_auth_session<S: AccountStore>(
    state: &RealmState<S>,
    s: &mut Session,
    payload: &[u8],
) -> Result<Disposition, ConnectionError> {
    if s.stage() != SessionStage::ChallengeIssued {
        tracing::warn!("[realm] [auth_repeat] session={}", s.id);
        return Ok(Disposition::Continue);
    }

    let req = parse_auth_session(payload)?;
    let account = req.account.to_uppercase();
    tracing::info!("[realm] [auth_session] session={} user={} build={}", s.id, account, req.build);

    let banned = match state.store.find_account(&account).await {
        Ok(Some(a)) => a.is_banned(),
        Ok(None) => return reject_auth(s, AUTH_UNKNOWN_ACCOUNT).await,
        Err(e) => {
            tracing::warn!("[realm] [store_error] session={} user={} err={}", s.id, account, e);
            return reject_auth(s, AUTH_DB_BUSY).await;
        }
    };
    if banned {
        return reject_auth(s, AUTH_BANNED).await;
    }

    let key = match state.store.session_key(&account).await {
        Ok(Some(k)) => k,
        Ok(None) => return reject_auth(s, AUTH_UNKNOWN_ACCOUNT).await,
        Err(e) => {
            tracing::warn!("[realm] [store_error] session={} user={} err={}", s.id, account, e);
            return reject_auth(s, AUTH_DB_BUSY).await;
        }
    };

    let expected = auth_session_digest(&account, req.client_seed, s.server_seed, &key);
    if !digests_match(&expected, &req.digest) {
        tracing::info!("[realm] [auth_failed] session={} user={}", s.id, account);
        return reject_auth(s, AUTH_FAILED).await;
    }

    s.advance(SessionStage::ProofVerified)?;
    s.account = Some(account);
    s.push(Outbound::InstallCipher(key)).await?;
    s.send(SMSG_AUTH_RESPONSE, build_auth_ok()).await?;
    Ok(Disposition::InstallCipher(key))
}

async fn handle_ping(s: &Session, payload: &[u8]) -> Result<Disposition, ConnectionError> {
    let (sequence, latency) = parse_ping(payload)?;
    tracing::trace!("[realm] [ping] session={} seq={} latency={}", s.id, sequence, latency);
    s.send(SMSG_PONG, build_pong(sequence)).await?;
    Ok(Disposition::Continue)
}

async fn send_update(s: &Session, blocks: Vec<UpdateBlock>, threshold: usize) -> Result<(), ConnectionError> {
    let payload = UpdatePacket::new(blocks).encode()?;
    let (opcode, payload) = pack_update(payload, threshold)?;
    s.send(opcode, payload).await?;
    Ok(())
}

async fn handle_player_login<S: AccountStore>(
    state: &RealmState<S>,
    s: &mut Session,
    payload: &[u8],
) -> Result<Disposition, ConnectionError> {
    let guid = parse_player_login(payload)?;
    if s.entity.is_some() {
        tracing::warn!("[realm] [login_while_bound] session={} guid={}", s.id, guid);
        return Ok(Disposition::Continue);
    }

    let character = match state.store.find_character(guid).await {
        Ok(Some(c))
            if s.account.as_deref() == Some(c.account.as_str())
                && c.realm_id == state.config.realm_id =>
        {
            c
        }
        Ok(_) => {
            tracing::warn!("[realm] [login_unknown_character] session={} guid={}", s.id, guid);
            return Ok(Disposition::Continue);
        }
        Err(e) => {
            tracing::warn!("[realm] [store_error] session={} guid={} err={}", s.id, guid, e);
            return Ok(Disposition::Continue);
        }
    };

    let entity = Entity::player(&character)?;
    s.send(SMSG_LOGIN_VERIFY_WORLD, build_login_verify_world(entity.map_id, &entity.position()))
        .await?;
    send_update(s, vec![entity.create_block(true, state.tick())], state.config.compress_threshold)
        .await?;

    tracing::info!("[realm] [player_login] session={} guid={} name={}", s.id, guid, character.name);
    s.entity = Some(entity);
    s.advance(SessionStage::CharacterBound)?;
    Ok(Disposition::Continue)
}

async fn handle_logout<S: AccountStore>(
    state: &RealmState<S>,
    s: &mut Session,
) -> Result<Disposition, ConnectionError> {
    s.send(SMSG_LOGOUT_RESPONSE, build_logout_response()).await?;

    if let Some(mut entity) = s.entity.take() {
        entity.set_u32(UNIT_FIELD_FLAGS, entity.get_u32(UNIT_FIELD_FLAGS).unwrap_or(0) | UNIT_FLAG_STUNNED)?;
        entity.set_byte(UNIT_FIELD_BYTES_1, 0, STAND_STATE_SIT)?;
        if let Some(block) = entity.take_values_block() {
            send_update(s, vec![block], state.config.compress_threshold).await?;
        }
        tracing::info!("[realm] [logout] session={} guid={}", s.id, entity.guid);
    }

    s.send(SMSG_LOGOUT_COMPLETE, Vec::new()).await?;
    Ok(Disposition::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_stages() {
        assert_eq!(required_stage(CMSG_AUTH_SESSION), Some(SessionStage::ChallengeIssued));
        assert_eq!(required_stage(CMSG_PING), Some(SessionStage::ProofVerified));
        assert_eq!(required_stage(CMSG_PLAYER_LOGIN), Some(SessionStage::ProofVerified));
        assert_eq!(required_stage(CMSG_LOGOUT_REQUEST), Some(SessionStage::CharacterBound));
        // CMSG_MESSAGECHAT belongs to gameplay handlers
        assert_eq!(required_stage(0x095), None);
    }
}
