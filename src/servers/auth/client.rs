use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::packet::{
    build_challenge_ok, build_proof_ok, build_realm_list, build_reject, read_message,
    AuthMessage, ChallengeRequest, ProofRequest, CMD_AUTH_LOGON_CHALLENGE, CMD_AUTH_LOGON_PROOF,
};
use super::srp::{Exchange, ProofOutcome};
use super::{AuthResult, AuthState};
use crate::config::ClientVersion;
use crate::database::AccountStore;
use crate::session::SessionStage;

/// Outcome of a logon challenge. A rejection carries no key material.
#[derive(Debug)]
pub enum ChallengeOutcome {
    Issued(Exchange),
    Rejected(AuthResult),
}

/// Version gate, then account lookup. The server ephemeral is only
/// generated for an existing, unbanned account.
pub async fn begin_challenge<S: AccountStore>(
    store: &S,
    supported: &[ClientVersion],
    req: &ChallengeRequest,
) -> ChallengeOutcome {
    if !supported.contains(&req.version) {
        return ChallengeOutcome::Rejected(AuthResult::VersionInvalid);
    }

    let account = match store.find_account(&req.username).await {
        Ok(Some(a)) => a,
        Ok(None) => return ChallengeOutcome::Rejected(AuthResult::UnknownAccount),
        Err(e) => {
            tracing::warn!("[auth] [store_error] user={} err={}", req.username, e);
            return ChallengeOutcome::Rejected(AuthResult::DbBusy);
        }
    };

    if account.is_banned() {
        return ChallengeOutcome::Rejected(AuthResult::Banned);
    }

    ChallengeOutcome::Issued(Exchange::new(&account.username, account.salt, &account.verifier))
}

/// Verifies the proof against `exchange`, consuming it, and persists the
/// session key on success.
pub async fn finish_proof<S: AccountStore>(
    store: &S,
    exchange: Exchange,
    req: &ProofRequest,
) -> ProofOutcome {
    let username = exchange.username().to_string();
    let outcome = exchange.verify(&req.a_pub, &req.m1);

    if let ProofOutcome::Authenticated { session_key, .. } = &outcome {
        if let Err(e) = store.set_session_key(&username, session_key).await {
            tracing::warn!("[auth] [store_error] user={} err={}", username, e);
            return ProofOutcome::Rejected(AuthResult::DbBusy);
        }
    }
    outcome
}

async fn realm_list<S: AccountStore>(store: &S, username: &str) -> Vec<u8> {
    let realms = match store.realms().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("[auth] [store_error] user={} err={}", username, e);
            Vec::new()
        }
    };

    let mut entries = Vec::with_capacity(realms.len());
    for realm in realms {
        let count = store
            .character_count(realm.id, username)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("[auth] [store_error] user={} realm={} err={}", username, realm.id, e);
                0
            });
        entries.push((realm, count));
    }
    build_realm_list(&entries)
}

pub async fn handle_client<S: AccountStore>(state: Arc<AuthState<S>>, mut stream: TcpStream, conn_id: u32) {
    let mut stage = SessionStage::Unauthenticated;
    let mut exchange: Option<Exchange> = None;
    let mut account: Option<String> = None;

    loop {
        let msg = match read_message(&mut stream).await {
            Ok(Some(m)) => m,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("[auth] [protocol_error] conn={} err={}", conn_id, e);
                return;
            }
        };

        let reply = match msg {
            AuthMessage::Challenge(req) => {
                tracing::debug!("[auth] [packet_in] conn={} cmd=00", conn_id);
                if stage != SessionStage::Unauthenticated {
                    tracing::warn!("[auth] [out_of_order] conn={} cmd=00 stage={:?}", conn_id, stage);
                    let reject = build_reject(CMD_AUTH_LOGON_CHALLENGE, AuthResult::Failed);
                    if let Err(e) = stream.write_all(&reject).await {
                        tracing::debug!("[auth] [write_error] conn={} err={}", conn_id, e);
                    }
                    return;
                }
                match begin_challenge(state.store.as_ref(), &state.config.supported_versions, &req).await {
                    ChallengeOutcome::Issued(ex) => {
                        tracing::info!(
                            "[auth] [challenge] conn={} user={} version={} build={}",
                            conn_id, ex.username(), req.version, req.build
                        );
                        let reply = build_challenge_ok(&ex.challenge());
                        exchange = Some(ex);
                        stage = SessionStage::ChallengeIssued;
                        reply
                    }
                    ChallengeOutcome::Rejected(result) => {
                        tracing::info!(
                            "[auth] [challenge_rejected] conn={} user={} version={} result={:?}",
                            conn_id, req.username, req.version, result
                        );
                        build_reject(CMD_AUTH_LOGON_CHALLENGE, result)
                    }
                }
            }
            AuthMessage::Proof(req) => {
                tracing::debug!("[auth] [packet_in] conn={} cmd=01", conn_id);
                match exchange.take() {
                    None => {
                        tracing::warn!("[auth] [proof_without_challenge] conn={}", conn_id);
                        build_reject(CMD_AUTH_LOGON_PROOF, AuthResult::UnknownAccount)
                    }
                    Some(ex) => {
                        let username = ex.username().to_string();
                        match finish_proof(state.store.as_ref(), ex, &req).await {
                            ProofOutcome::Authenticated { server_proof, .. } => {
                                tracing::info!("[auth] [authenticated] conn={} user={}", conn_id, username);
                                stage = SessionStage::ProofVerified;
                                account = Some(username);
                                build_proof_ok(&server_proof)
                            }
                            ProofOutcome::Rejected(result) => {
                                tracing::info!(
                                    "[auth] [proof_rejected] conn={} user={} result={:?}",
                                    conn_id, username, result
                                );
                                build_reject(CMD_AUTH_LOGON_PROOF, result)
                            }
                        }
                    }
                }
            }
            AuthMessage::RealmList => {
                tracing::debug!("[auth] [packet_in] conn={} cmd=10", conn_id);
                match (&account, stage >= SessionStage::ProofVerified) {
                    (Some(name), true) => realm_list(state.store.as_ref(), name).await,
                    _ => {
                        tracing::warn!("[auth] [out_of_order] conn={} cmd=10 stage={:?}", conn_id, stage);
                        return;
                    }
                }
            }
        };

        if let Err(e) = stream.write_all(&reply).await {
            tracing::debug!("[auth] [write_error] conn={} err={}", conn_id, e);
            return;
        }
    }
}
