//! Per-connection session state and the registry of live sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::game::entity::Entity;
use crate::network::packet::Frame;

/// Maximum number of concurrent sessions
pub const MAX_SESSIONS: usize = 1024;

/// Depth of each session's outbound queue
pub const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Stage {to:?} cannot follow {from:?}")]
    StageSkipped { from: SessionStage, to: SessionStage },

    #[error("Session not found: id={0}")]
    SessionNotFound(u32),

    #[error("Maximum sessions exceeded (limit: {MAX_SESSIONS})")]
    MaxSessionsExceeded,

    #[error("Session id overflow")]
    IdOverflow,

    #[error("Outbound queue closed: id={0}")]
    QueueClosed(u32),

    #[error("Outbound queue full: id={0}")]
    QueueFull(u32),
}

/// Authentication progress of a connection. Only ever moves forward, one
/// step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionStage {
    Unauthenticated,
    ChallengeIssued,
    ProofVerified,
    CharacterBound,
}

impl SessionStage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unauthenticated => Some(Self::ChallengeIssued),
            Self::ChallengeIssued => Some(Self::ProofVerified),
            Self::ProofVerified => Some(Self::CharacterBound),
            Self::CharacterBound => None,
        }
    }
}

/// Work item for a session's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Encipher headers with this session key from the next frame on.
    InstallCipher([u8; 40]),
    Frame(Frame),
    Close,
}

pub struct Session {
    pub id: u32,
    pub peer: SocketAddr,
    stage: SessionStage,
    /// Upper-cased account name once the session is authenticated.
    pub account: Option<String>,
    pub server_seed: u32,
    pub entity: Option<Entity>,
    outbound: mpsc::Sender<Outbound>,
}

impl Session {
    pub fn new(id: u32, peer: SocketAddr, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            peer,
            stage: SessionStage::Unauthenticated,
            account: None,
            server_seed: 0,
            entity: None,
            outbound,
        }
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// True once the session has reached `required`.
    pub fn is_ready(&self, required: SessionStage) -> bool {
        self.stage >= required
    }

    /// Moves to `to`, which must be the current stage or the one directly
    /// after it.
    pub fn advance(&mut self, to: SessionStage) -> Result<(), SessionError> {
        if to == self.stage || self.stage.next() == Some(to) {
            self.stage = to;
            Ok(())
        } else {
            Err(SessionError::StageSkipped { from: self.stage, to })
        }
    }

    pub async fn send(&self, opcode: u16, payload: Vec<u8>) -> Result<(), SessionError> {
        self.push(Outbound::Frame(Frame { opcode, payload })).await
    }

    pub async fn push(&self, item: Outbound) -> Result<(), SessionError> {
        self.outbound
            .send(item)
            .await
            .map_err(|_| SessionError::QueueClosed(self.id))
    }

    /// Enqueues a frame without waiting. Fails with `QueueFull` when the
    /// writer is behind.
    pub fn try_send(&self, opcode: u16, payload: Vec<u8>) -> Result<(), SessionError> {
        self.outbound
            .try_send(Outbound::Frame(Frame { opcode, payload }))
            .map_err(|e| match e {
                TrySendError::Full(_) => SessionError::QueueFull(self.id),
                TrySendError::Closed(_) => SessionError::QueueClosed(self.id),
            })
    }
}

/// Registry of live sessions keyed by connection id
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<u32, Arc<Mutex<Session>>>>>,
    next_id: Mutex<u32>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Mutex::new(1),
        }
    }

    /// Allocate a new connection id
    pub async fn allocate_id(&self) -> Result<u32, SessionError> {
        let mut next = self.next_id.lock().await;
        let id = *next;
        *next = next.checked_add(1).ok_or(SessionError::IdOverflow)?;
        Ok(id)
    }

    pub async fn insert(&self, session: Session) -> Result<Arc<Mutex<Session>>, SessionError> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::MaxSessionsExceeded);
        }

        let id = session.id;
        let session = Arc::new(Mutex::new(session));
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, id: u32) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: u32) -> Option<Arc<Mutex<Session>>> {
        self.sessions.write().await.remove(&id)
    }

    /// Point-in-time copy of the live sessions, ordered by id. The registry
    /// lock is released before the caller touches any session.
    pub async fn snapshot(&self) -> Vec<Arc<Mutex<Session>>> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<u32> = sessions.keys().copied().collect();
        ids.sort_unstable();
        ids.iter().filter_map(|id| sessions.get(id).cloned()).collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn session(id: u32) -> (Session, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (Session::new(id, peer(), tx), rx)
    }

    #[test]
    fn test_session_new() {
        let (s, _rx) = session(1);
        assert_eq!(s.id, 1);
        assert_eq!(s.stage(), SessionStage::Unauthenticated);
        assert!(s.account.is_none());
        assert!(s.entity.is_none());
    }

    #[test]
    fn test_stage_advances_one_step() {
        let (mut s, _rx) = session(1);
        s.advance(SessionStage::ChallengeIssued).unwrap();
        s.advance(SessionStage::ProofVerified).unwrap();
        s.advance(SessionStage::CharacterBound).unwrap();
        assert_eq!(s.stage(), SessionStage::CharacterBound);
    }

    #[test]
    fn test_stage_skip_rejected() {
        let (mut s, _rx) = session(1);
        let err = s.advance(SessionStage::ProofVerified).unwrap_err();
        assert!(matches!(
            err,
            SessionError::StageSkipped {
                from: SessionStage::Unauthenticated,
                to: SessionStage::ProofVerified
            }
        ));
        assert_eq!(s.stage(), SessionStage::Unauthenticated);
    }

    #[test]
    fn test_stage_never_moves_back() {
        let (mut s, _rx) = session(1);
        s.advance(SessionStage::ChallengeIssued).unwrap();
        assert!(s.advance(SessionStage::Unauthenticated).is_err());
        // re-entering the current stage is a no-op
        s.advance(SessionStage::ChallengeIssued).unwrap();
    }

    #[test]
    fn test_try_send_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let s = Session::new(7, peer(), tx);
        s.try_send(0x1DD, vec![1]).unwrap();
        assert!(matches!(s.try_send(0x1DD, vec![2]), Err(SessionError::QueueFull(7))));

        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(f)) if f.payload == vec![1]));
        drop(rx);
        assert!(matches!(s.try_send(0x1DD, vec![3]), Err(SessionError::QueueClosed(7))));
    }

    #[test]
    fn test_is_ready() {
        let (mut s, _rx) = session(1);
        assert!(s.is_ready(SessionStage::Unauthenticated));
        assert!(!s.is_ready(SessionStage::ProofVerified));
        s.advance(SessionStage::ChallengeIssued).unwrap();
        s.advance(SessionStage::ProofVerified).unwrap();
        assert!(s.is_ready(SessionStage::ProofVerified));
        assert!(!s.is_ready(SessionStage::CharacterBound));
    }

    #[tokio::test]
    async fn test_send_enqueues_frame() {
        let (s, mut rx) = session(1);
        s.send(0x1DD, vec![1, 0, 0, 0]).await.unwrap();
        match rx.recv().await {
            Some(Outbound::Frame(f)) => {
                assert_eq!(f.opcode, 0x1DD);
                assert_eq!(f.payload, vec![1, 0, 0, 0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (s, rx) = session(3);
        drop(rx);
        let err = s.send(0x1DD, vec![]).await.unwrap_err();
        assert!(matches!(err, SessionError::QueueClosed(3)));
    }

    #[tokio::test]
    async fn test_session_manager_allocate_id() {
        let manager = SessionManager::new();

        let id1 = manager.allocate_id().await.unwrap();
        let id2 = manager.allocate_id().await.unwrap();

        assert!(id1 > 0);
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_session_manager_insert_get_remove() {
        let manager = SessionManager::new();
        let (s, _rx) = session(5);
        manager.insert(s).await.unwrap();

        let got = manager.get(5).await.unwrap();
        assert_eq!(got.lock().await.id, 5);

        assert!(manager.remove(5).await.is_some());
        assert!(manager.get(5).await.is_none());
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered_and_detached() {
        let manager = SessionManager::new();
        let mut receivers = Vec::new();
        for id in [7, 2, 5] {
            let (s, rx) = session(id);
            receivers.push(rx);
            manager.insert(s).await.unwrap();
        }

        let snap = manager.snapshot().await;
        manager.remove(2).await;

        let mut ids = Vec::new();
        for s in &snap {
            ids.push(s.lock().await.id);
        }
        assert_eq!(ids, vec![2, 5, 7]);
        assert_eq!(manager.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_session_manager_max_sessions() {
        let manager = SessionManager::new();
        let (tx, _rx) = mpsc::channel(1);

        for i in 0..MAX_SESSIONS as u32 {
            manager.insert(Session::new(i, peer(), tx.clone())).await.unwrap();
        }

        let result = manager.insert(Session::new(9999, peer(), tx)).await;
        assert!(matches!(result, Err(SessionError::MaxSessionsExceeded)));
    }
}
