//! Account, realm and character persistence.
//!
//! Servers reach storage only through [`AccountStore`]. Two backends ship:
//! [`MemoryStore`] for tests and local runs, [`MySqlStore`] over sqlx.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::game::update::Position;

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Stored {field} for {key} is malformed")]
    Malformed { field: &'static str, key: String },

    #[error("Account store unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: u32,
    /// Upper-cased login name.
    pub username: String,
    pub salt: [u8; 32],
    pub verifier: [u8; 32],
    pub banned_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Realm {
    pub id: u32,
    pub name: String,
    /// `host:port` the client connects to.
    pub address: String,
    pub realm_type: u32,
    pub flags: u8,
    pub timezone: u8,
    pub population: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub guid: u64,
    /// Upper-cased owning account name.
    pub account: String,
    pub name: String,
    pub realm_id: u32,
    pub race: u8,
    pub class: u8,
    pub gender: u8,
    pub skin: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub facial_hair: u8,
    pub level: u8,
    pub health: u32,
    pub power: u32,
    pub display_id: u32,
    pub map_id: u32,
    pub position: Position,
    pub xp: u32,
    pub money: u32,
}

/// Storage collaborator for both servers. Usernames are matched
/// case-insensitively.
pub trait AccountStore: Send + Sync + 'static {
    fn find_account(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<Account>, StoreError>> + Send;

    fn set_session_key(
        &self,
        username: &str,
        key: &[u8; 40],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn session_key(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<[u8; 40]>, StoreError>> + Send;

    fn realms(&self) -> impl Future<Output = Result<Vec<Realm>, StoreError>> + Send;

    fn character_count(
        &self,
        realm_id: u32,
        username: &str,
    ) -> impl Future<Output = Result<u8, StoreError>> + Send;

    fn find_character(
        &self,
        guid: u64,
    ) -> impl Future<Output = Result<Option<Character>, StoreError>> + Send;
}
