use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

use super::{Account, AccountStore, Character, Realm, StoreError};
use crate::game::update::Position;

/// Store backed by the `accounts`, `realms` and `characters` tables (see
/// `sql/schema.sql`). Salt, verifier and session key are kept as hex text.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

fn decode_hex<const N: usize>(field: &'static str, key: &str, text: &str) -> Result<[u8; N], StoreError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(text, &mut out).map_err(|_| StoreError::Malformed {
        field,
        key: key.to_string(),
    })?;
    Ok(out)
}

fn character_from_row(row: &MySqlRow) -> Result<Character, StoreError> {
    Ok(Character {
        guid: row.try_get("guid")?,
        account: row.try_get::<String, _>("account")?.to_uppercase(),
        name: row.try_get("name")?,
        realm_id: row.try_get("realm_id")?,
        race: row.try_get("race")?,
        class: row.try_get("class")?,
        gender: row.try_get("gender")?,
        skin: row.try_get("skin")?,
        face: row.try_get("face")?,
        hair_style: row.try_get("hair_style")?,
        hair_color: row.try_get("hair_color")?,
        facial_hair: row.try_get("facial_hair")?,
        level: row.try_get("level")?,
        health: row.try_get("health")?,
        power: row.try_get("power")?,
        display_id: row.try_get("display_id")?,
        map_id: row.try_get("map_id")?,
        position: Position::new(
            row.try_get("position_x")?,
            row.try_get("position_y")?,
            row.try_get("position_z")?,
            row.try_get("orientation")?,
        ),
        xp: row.try_get("xp")?,
        money: row.try_get("money")?,
    })
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl AccountStore for MySqlStore {
    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let username = username.to_uppercase();
        let row: Option<(u32, String, String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT `id`, `salt`, `verifier`, `banned_at` FROM `accounts` WHERE UPPER(`username`) = ?",
        )
        .bind(&username)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, salt, verifier, banned_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Account {
            id,
            salt: decode_hex("salt", &username, &salt)?,
            verifier: decode_hex("verifier", &username, &verifier)?,
            username,
            banned_at,
        }))
    }

    async fn set_session_key(&self, username: &str, key: &[u8; 40]) -> Result<(), StoreError> {
        sqlx::query("UPDATE `accounts` SET `session_key` = ? WHERE UPPER(`username`) = ?")
            .bind(hex::encode_upper(key))
            .bind(username.to_uppercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_key(&self, username: &str) -> Result<Option<[u8; 40]>, StoreError> {
        let username = username.to_uppercase();
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT `session_key` FROM `accounts` WHERE UPPER(`username`) = ?")
                .bind(&username)
                .fetch_optional(&self.pool)
                .await?;

        match row.and_then(|(k,)| k) {
            Some(text) => Ok(Some(decode_hex("session_key", &username, &text)?)),
            None => Ok(None),
        }
    }

    async fn realms(&self) -> Result<Vec<Realm>, StoreError> {
        let rows: Vec<(u32, String, String, u32, u8, u8, f32)> = sqlx::query_as(
            "SELECT `id`, `name`, `address`, `realm_type`, `flags`, `timezone`, `population`
             FROM `realms` ORDER BY `id`",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, address, realm_type, flags, timezone, population)| Realm {
                id,
                name,
                address,
                realm_type,
                flags,
                timezone,
                population,
            })
            .collect())
    }

    async fn character_count(&self, realm_id: u32, username: &str) -> Result<u8, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM `characters` WHERE `realm_id` = ? AND UPPER(`account`) = ?",
        )
        .bind(realm_id)
        .bind(username.to_uppercase())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.clamp(0, u8::MAX as i64) as u8)
    }

    async fn find_character(&self, guid: u64) -> Result<Option<Character>, StoreError> {
        let row = sqlx::query("SELECT * FROM `characters` WHERE `guid` = ?")
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(character_from_row).transpose()
    }
}
