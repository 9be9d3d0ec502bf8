use std::sync::Arc;
use std::time::Duration;

use super::RealmState;
use crate::database::AccountStore;
use crate::game::entity::Entity;
use crate::game::update::{pack_update, UpdatePacket};
use crate::session::{SessionError, SessionManager, SessionStage};

/// Pushes pending field changes every `update_interval_ms` until the task is
/// dropped.
pub async fn run_world_updates<S: AccountStore>(state: Arc<RealmState<S>>) {
    let period = Duration::from_millis(state.config.update_interval_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!("[realm] [world_loop] interval_ms={}", period.as_millis());

    loop {
        ticker.tick().await;
        push_dirty_values(&state.sessions, state.config.compress_threshold).await;
    }
}

/// Sends one values block to every bound player with dirty fields. Returns
/// how many sessions were sent an update.
///
/// Never waits on a single session: a session whose lock is held or whose
/// queue is full keeps its dirty mask and is retried on the next tick.
pub async fn push_dirty_values(sessions: &SessionManager, compress_threshold: usize) -> usize {
    let mut pushed = 0;
    for session in sessions.snapshot().await {
        let Ok(mut s) = session.try_lock() else {
            continue;
        };
        if !s.is_ready(SessionStage::CharacterBound) {
            continue;
        }
        let Some(block) = s.entity.as_ref().filter(|e| e.is_dirty()).map(Entity::values_block) else {
            continue;
        };

        let packed = UpdatePacket::new(vec![block])
            .encode()
            .and_then(|payload| pack_update(payload, compress_threshold));
        let (opcode, payload) = match packed {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[realm] [push_encode_failed] session={} err={}", s.id, e);
                continue;
            }
        };

        match s.try_send(opcode, payload) {
            Ok(()) => {
                if let Some(entity) = s.entity.as_mut() {
                    entity.clear_dirty();
                }
                pushed += 1;
            }
            Err(SessionError::QueueFull(_)) => {
                tracing::debug!("[realm] [push_deferred] session={} queue full", s.id)
            }
            Err(e) => tracing::debug!("[realm] [push_dropped] session={} err={}", s.id, e),
        }
    }
    pushed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fields::{TypeId, UNIT_FIELD_HEALTH};
    use crate::game::update::{UpdateBlock, SMSG_UPDATE_OBJECT};
    use crate::network::packet::Frame;
    use crate::session::{Outbound, Session};
    use tokio::sync::{mpsc, Mutex};

    async fn bound_session(
        manager: &SessionManager,
        id: u32,
        entity: Option<Entity>,
        queue: usize,
    ) -> (Arc<Mutex<Session>>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue);
        let mut s = Session::new(id, "127.0.0.1:1".parse().unwrap(), tx);
        s.advance(SessionStage::ChallengeIssued).unwrap();
        s.advance(SessionStage::ProofVerified).unwrap();
        if entity.is_some() {
            s.advance(SessionStage::CharacterBound).unwrap();
        }
        s.entity = entity;
        (manager.insert(s).await.unwrap(), rx)
    }

    fn dirty_player(guid: u64, health: u32) -> Entity {
        let mut e = Entity::new(guid, TypeId::Player);
        e.clear_dirty();
        e.set_u32(UNIT_FIELD_HEALTH, health).unwrap();
        e
    }

    fn pushed_health(item: Option<Outbound>) -> Option<(u64, u32)> {
        let Some(Outbound::Frame(f)) = item else {
            return None;
        };
        assert_eq!(f.opcode, SMSG_UPDATE_OBJECT);
        let packet = UpdatePacket::decode(&f.payload, |_| Some(TypeId::Player)).unwrap();
        match &packet.blocks[..] {
            [UpdateBlock::Values { guid, fields }] => Some((*guid, fields.get(UNIT_FIELD_HEALTH)?)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_push_only_dirty_bound_players() {
        let manager = SessionManager::new();

        let (_, mut rx_dirty) = bound_session(&manager, 1, Some(dirty_player(10, 55)), 8).await;

        let mut clean = Entity::new(11, TypeId::Player);
        clean.clear_dirty();
        let (_, mut rx_clean) = bound_session(&manager, 2, Some(clean), 8).await;

        let (_, mut rx_unbound) = bound_session(&manager, 3, None, 8).await;

        assert_eq!(push_dirty_values(&manager, 1000).await, 1);
        assert_eq!(pushed_health(rx_dirty.try_recv().ok()), Some((10, 55)));
        assert!(rx_clean.try_recv().is_err());
        assert!(rx_unbound.try_recv().is_err());

        // dirty mask was cleared by the first push
        assert_eq!(push_dirty_values(&manager, 1000).await, 0);
    }

    #[tokio::test]
    async fn test_stalled_session_does_not_block_others() {
        let manager = SessionManager::new();

        // queue of one, already full and never drained
        let (stalled, _rx_stalled) = bound_session(&manager, 1, Some(dirty_player(10, 5)), 1).await;
        stalled
            .lock()
            .await
            .push(Outbound::Frame(Frame { opcode: 0x1DD, payload: vec![] }))
            .await
            .unwrap();
        let (_, mut rx_healthy) = bound_session(&manager, 2, Some(dirty_player(20, 7)), 8).await;

        let pushed = tokio::time::timeout(Duration::from_secs(2), push_dirty_values(&manager, 1000))
            .await
            .expect("push must not wait on a full queue");
        assert_eq!(pushed, 1);
        assert_eq!(pushed_health(rx_healthy.try_recv().ok()), Some((20, 7)));

        // the deferred change is still pending for a later tick
        let s = stalled.lock().await;
        assert!(s.entity.as_ref().unwrap().is_dirty());
    }

    #[tokio::test]
    async fn test_locked_session_skipped_and_kept_dirty() {
        let manager = SessionManager::new();
        let (busy, mut rx_busy) = bound_session(&manager, 1, Some(dirty_player(10, 5)), 8).await;
        let (_, mut rx_other) = bound_session(&manager, 2, Some(dirty_player(20, 7)), 8).await;

        let guard = busy.lock().await;
        let pushed = tokio::time::timeout(Duration::from_secs(2), push_dirty_values(&manager, 1000))
            .await
            .expect("push must not wait on a held session lock");
        assert_eq!(pushed, 1);
        assert_eq!(pushed_health(rx_other.try_recv().ok()), Some((20, 7)));
        drop(guard);

        assert_eq!(push_dirty_values(&manager, 1000).await, 1);
        assert_eq!(pushed_health(rx_busy.try_recv().ok()), Some((10, 5)));
    }
}
