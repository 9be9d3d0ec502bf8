pub mod packet;
pub mod router;
pub mod world;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::config::ServerConfig;
use crate::database::AccountStore;
use crate::game::update::UpdateError;
use crate::network::crypt::SessionCipher;
use crate::network::packet::{encode_frame, split_stream, ProtocolError};
use crate::session::{Outbound, Session, SessionError, SessionManager, SessionStage, OUTBOUND_QUEUE};
use packet::{build_auth_challenge, SMSG_AUTH_CHALLENGE};
use router::Disposition;

/// Bytes requested from the socket per read.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Faults that end a world connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    #[error("{0} frame(s) followed the session auth in the same read")]
    FramesAfterAuth(usize),
}

/// Shared state of the world (realm) server.
pub struct RealmState<S> {
    pub store: Arc<S>,
    pub config: ServerConfig,
    pub sessions: SessionManager,
    started: Instant,
}

impl<S: AccountStore> RealmState<S> {
    pub fn new(store: Arc<S>, config: ServerConfig) -> Self {
        Self {
            store,
            config,
            sessions: SessionManager::new(),
            started: Instant::now(),
        }
    }

    /// Milliseconds since start, as sent in movement blocks.
    pub fn tick(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    pub async fn run(state: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Cannot bind realm server to {}", bind_addr))?;
        tracing::info!("[realm] [ready] addr={}", bind_addr);

        tokio::spawn(world::run_world_updates(Arc::clone(&state)));

        loop {
            let (stream, peer) = listener.accept().await?;
            let s = Arc::clone(&state);
            tokio::spawn(async move {
                Self::handle_new_connection(s, stream, peer).await;
            });
        }
    }

    pub async fn handle_new_connection(state: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = match state.sessions.allocate_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("[realm] [session_alloc_failed] peer={} err={}", peer, e);
                return;
            }
        };

        let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
        let (read_half, write_half) = stream.into_split();
        let writer = tokio::spawn(write_loop(write_half, rx, id));

        let session = match state.sessions.insert(Session::new(id, peer, tx)).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("[realm] [session_insert_failed] peer={} err={}", peer, e);
                writer.abort();
                return;
            }
        };
        tracing::info!("[realm] [connect] session={} peer={}", id, peer);

        match read_loop(&state, read_half, &session).await {
            Ok(()) => {}
            Err(ConnectionError::Io(e)) => {
                tracing::info!("[realm] [io_error] session={} err={}", id, e)
            }
            Err(e) => tracing::warn!("[realm] [protocol_error] session={} err={}", id, e),
        }

        state.sessions.remove(id).await;
        // Queued frames go out before the writer stops.
        let _ = session.lock().await.push(Outbound::Close).await;
        drop(session);
        let _ = writer.await;
        tracing::info!("[realm] [disconnect] session={} peer={}", id, peer);
    }
}

async fn read_loop<S: AccountStore>(
    state: &RealmState<S>,
    mut reader: OwnedReadHalf,
    session: &Mutex<Session>,
) -> Result<(), ConnectionError> {
    {
        let seed = rand::random::<u32>();
        let mut s = session.lock().await;
        s.server_seed = seed;
        s.send(SMSG_AUTH_CHALLENGE, build_auth_challenge(seed)).await?;
        s.advance(SessionStage::ChallengeIssued)?;
    }

    let mut recv_cipher: Option<SessionCipher> = None;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        let mut frames = split_stream(&buf[..n], recv_cipher.as_mut())?.into_iter();
        while let Some(frame) = frames.next() {
            match router::dispatch(state, session, frame).await? {
                Disposition::Continue => {}
                Disposition::Close => return Ok(()),
                Disposition::InstallCipher(key) => {
                    // Later frames in this read were decoded without the key.
                    let rest = frames.as_slice().len();
                    if rest != 0 {
                        return Err(ConnectionError::FramesAfterAuth(rest));
                    }
                    recv_cipher = Some(SessionCipher::new(&key));
                }
            }
        }
    }
}

/// Single writer for one connection. Owns the send half of the header
/// cipher so frames are enciphered in queue order.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Outbound>, id: u32) {
    let mut cipher: Option<SessionCipher> = None;
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::InstallCipher(key) => cipher = Some(SessionCipher::new(&key)),
            Outbound::Frame(frame) => {
                let bytes = match encode_frame(frame.opcode, &frame.payload, cipher.as_mut()) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!("[realm] [encode_failed] session={} opcode={:04X} err={}", id, frame.opcode, e);
                        break;
                    }
                };
                tracing::debug!(
                    "[realm] [packet_out] session={} opcode={:04X} len={}",
                    id, frame.opcode, frame.payload.len()
                );
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}
