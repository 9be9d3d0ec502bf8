use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use super::{Account, AccountStore, Character, Realm, StoreError};
use crate::game::update::Position;
use crate::servers::auth::srp::compute_verifier;

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    session_keys: HashMap<String, [u8; 40]>,
    realms: Vec<Realm>,
    characters: HashMap<u64, Character>,
}

/// In-process store guarded by a tokio `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the stock development data: accounts `john`, `doe`
    /// and the banned `ban` (all with password `doe`), realm Firetree and
    /// one character for `john`.
    pub fn seeded() -> Self {
        let mut t = Tables::default();
        for (id, name, banned) in [(1, "john", false), (2, "doe", false), (3, "ban", true)] {
            let salt = rand::random::<[u8; 32]>();
            let account = Account {
                id,
                username: name.to_uppercase(),
                salt,
                verifier: compute_verifier(name, "doe", &salt),
                banned_at: banned.then(Utc::now),
            };
            t.accounts.insert(account.username.clone(), account);
        }
        t.realms.push(Realm {
            id: 1,
            name: "Firetree".into(),
            address: "127.0.0.1:1001".into(),
            realm_type: 0,
            flags: 0x20,
            timezone: 1,
            population: 1.6,
        });
        t.characters.insert(
            1,
            Character {
                guid: 1,
                account: "JOHN".into(),
                name: "Johnny".into(),
                realm_id: 1,
                race: 1,
                class: 1,
                gender: 0,
                skin: 0,
                face: 0,
                hair_style: 0,
                hair_color: 0,
                facial_hair: 0,
                level: 1,
                health: 60,
                power: 0,
                display_id: 49,
                map_id: 0,
                position: Position::new(-8949.95, -132.493, 83.5312, 0.0),
                xp: 0,
                money: 0,
            },
        );
        Self { tables: RwLock::new(t) }
    }

    pub async fn insert_account(&self, username: &str, password: &str) -> Account {
        let salt = rand::random::<[u8; 32]>();
        let mut t = self.tables.write().await;
        let account = Account {
            id: t.accounts.len() as u32 + 1,
            username: username.to_uppercase(),
            salt,
            verifier: compute_verifier(username, password, &salt),
            banned_at: None,
        };
        t.accounts.insert(account.username.clone(), account.clone());
        account
    }

    pub async fn insert_realm(&self, realm: Realm) {
        self.tables.write().await.realms.push(realm);
    }

    pub async fn set_realms(&self, realms: Vec<Realm>) {
        self.tables.write().await.realms = realms;
    }

    pub async fn insert_character(&self, character: Character) {
        self.tables.write().await.characters.insert(character.guid, character);
    }
}

impl AccountStore for MemoryStore {
    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.accounts.get(&username.to_uppercase()).cloned())
    }

    async fn set_session_key(&self, username: &str, key: &[u8; 40]) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.session_keys.insert(username.to_uppercase(), *key);
        Ok(())
    }

    async fn session_key(&self, username: &str) -> Result<Option<[u8; 40]>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.session_keys.get(&username.to_uppercase()).copied())
    }

    async fn realms(&self) -> Result<Vec<Realm>, StoreError> {
        Ok(self.tables.read().await.realms.clone())
    }

    async fn character_count(&self, realm_id: u32, username: &str) -> Result<u8, StoreError> {
        let t = self.tables.read().await;
        let account = username.to_uppercase();
        let n = t
            .characters
            .values()
            .filter(|c| c.realm_id == realm_id && c.account == account)
            .count();
        Ok(n.min(u8::MAX as usize) as u8)
    }

    async fn find_character(&self, guid: u64) -> Result<Option<Character>, StoreError> {
        Ok(self.tables.read().await.characters.get(&guid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_accounts() {
        let store = MemoryStore::seeded();
        let john = store.find_account("john").await.unwrap().unwrap();
        assert_eq!(john.username, "JOHN");
        assert!(!john.is_banned());
        assert!(store.find_account("BAN").await.unwrap().unwrap().is_banned());
        assert!(store.find_account("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_key_roundtrip() {
        let store = MemoryStore::seeded();
        assert!(store.session_key("john").await.unwrap().is_none());
        store.set_session_key("John", &[9u8; 40]).await.unwrap();
        assert_eq!(store.session_key("JOHN").await.unwrap(), Some([9u8; 40]));
    }

    #[tokio::test]
    async fn test_character_count_per_realm() {
        let store = MemoryStore::seeded();
        assert_eq!(store.character_count(1, "john").await.unwrap(), 1);
        assert_eq!(store.character_count(2, "john").await.unwrap(), 0);
        assert_eq!(store.character_count(1, "doe").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_realm_list() {
        let realms = MemoryStore::seeded().realms().await.unwrap();
        assert_eq!(realms.len(), 1);
        assert_eq!(realms[0].name, "Firetree");
        assert_eq!(realms[0].address, "127.0.0.1:1001");
    }
}
