pub mod client;
pub mod packet;
pub mod srp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::database::AccountStore;

/// Result byte of the challenge and proof responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthResult {
    Success = 0x00,
    /// Reserved; never produced by this server.
    Failed = 0x01,
    Banned = 0x03,
    UnknownAccount = 0x04,
    IncorrectPassword = 0x05,
    AlreadyOnline = 0x06,
    NoTime = 0x07,
    DbBusy = 0x08,
    VersionInvalid = 0x09,
    DownloadFile = 0x0A,
    Suspended = 0x0C,
    ParentalControl = 0x0F,
}

impl AuthResult {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Shared state of the login (auth) server.
pub struct AuthState<S> {
    pub store: Arc<S>,
    pub config: ServerConfig,
    next_conn: AtomicU32,
}

impl<S: AccountStore> AuthState<S> {
    pub fn new(store: Arc<S>, config: ServerConfig) -> Self {
        Self {
            store,
            config,
            next_conn: AtomicU32::new(1),
        }
    }

    pub async fn run(state: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Cannot bind auth server to {}", bind_addr))?;
        tracing::info!("[auth] [ready] addr={}", bind_addr);
        loop {
            let (stream, peer) = listener.accept().await?;
            let s = Arc::clone(&state);
            tokio::spawn(async move {
                Self::handle_new_connection(s, stream, peer).await;
            });
        }
    }

    pub async fn handle_new_connection(state: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let conn_id = state.next_conn.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[auth] [connect] conn={} peer={}", conn_id, peer);
        client::handle_client(Arc::clone(&state), stream, conn_id).await;
        tracing::info!("[auth] [disconnect] conn={} peer={}", conn_id, peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(AuthResult::Success.code(), 0x00);
        assert_eq!(AuthResult::Banned.code(), 0x03);
        assert_eq!(AuthResult::UnknownAccount.code(), 0x04);
        assert_eq!(AuthResult::DbBusy.code(), 0x08);
        assert_eq!(AuthResult::VersionInvalid.code(), 0x09);
        assert_eq!(AuthResult::DownloadFile.code(), 0x0A);
        assert_eq!(AuthResult::ParentalControl.code(), 0x0F);
    }
}
