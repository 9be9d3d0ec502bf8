//! World objects as a single tagged type.
//!
//! An [`Entity`] carries the full field table for its category plus a dirty
//! mask; the update loop turns dirty fields into values blocks.

use super::fields::{self, layout, TypeId};
use super::update::{
    CreateBlock, FieldValues, Movement, Placement, Position, UpdateBlock, UpdateError, UpdateFlags,
};
use crate::database::Character;

pub const UNIT_FLAG_STUNNED: u32 = 0x0004_0000;
pub const STAND_STATE_STAND: u8 = 0;
pub const STAND_STATE_SIT: u8 = 1;

#[derive(Debug, Clone)]
pub struct Entity {
    pub guid: u64,
    pub type_id: TypeId,
    pub map_id: u32,
    pub movement: Movement,
    values: Vec<u32>,
    dirty: Vec<u32>,
}

impl Entity {
    pub fn new(guid: u64, type_id: TypeId) -> Self {
        let mut entity = Self {
            guid,
            type_id,
            map_id: 0,
            movement: Movement::default(),
            values: vec![0; type_id.field_end() as usize],
            dirty: vec![0; type_id.mask_words() as usize],
        };
        // Indices below OBJECT_END exist for every category.
        entity.values[fields::OBJECT_FIELD_GUID as usize] = guid as u32;
        entity.values[fields::OBJECT_FIELD_GUID as usize + 1] = (guid >> 32) as u32;
        entity.values[fields::OBJECT_FIELD_TYPE as usize] = type_id.type_mask();
        entity.values[fields::OBJECT_FIELD_SCALE_X as usize] = 1.0f32.to_bits();
        entity
    }

    /// Builds the player object for a stored character.
    pub fn player(c: &Character) -> Result<Self, UpdateError> {
        let mut e = Self::new(c.guid, TypeId::Player);
        e.map_id = c.map_id;
        e.movement.position = c.position;

        e.set_u32(fields::UNIT_FIELD_HEALTH, c.health)?;
        e.set_u32(fields::UNIT_FIELD_MAXHEALTH, c.health)?;
        e.set_u32(fields::UNIT_FIELD_POWER1, c.power)?;
        e.set_u32(fields::UNIT_FIELD_MAXPOWER1, c.power)?;
        e.set_u32(fields::UNIT_FIELD_LEVEL, c.level as u32)?;
        e.set_u32(fields::UNIT_FIELD_FACTIONTEMPLATE, faction_for_race(c.race))?;
        e.set_bytes(fields::UNIT_FIELD_BYTES_0, [c.race, c.class, c.gender, power_type(c.class)])?;
        e.set_f32(fields::UNIT_FIELD_BOUNDINGRADIUS, 0.389)?;
        e.set_f32(fields::UNIT_FIELD_COMBATREACH, 1.5)?;
        e.set_u32(fields::UNIT_FIELD_DISPLAYID, c.display_id)?;
        e.set_u32(fields::UNIT_FIELD_NATIVEDISPLAYID, c.display_id)?;

        e.set_bytes(fields::PLAYER_BYTES, [c.skin, c.face, c.hair_style, c.hair_color])?;
        e.set_bytes(fields::PLAYER_BYTES_2, [c.facial_hair, 0, 0, 0x02])?;
        e.set_u32(fields::PLAYER_XP, c.xp)?;
        e.set_u32(fields::PLAYER_NEXT_LEVEL_XP, next_level_xp(c.level))?;
        e.set_u32(fields::PLAYER_FIELD_COINAGE, c.money)?;
        e.set_u32(fields::PLAYER_FIELD_WATCHED_FACTION_INDEX, u32::MAX)?;

        // A fresh object goes out as a create block, not as a diff.
        e.clear_dirty();
        Ok(e)
    }

    pub fn get_u32(&self, index: u16) -> Option<u32> {
        self.values.get(index as usize).copied()
    }

    pub fn get_f32(&self, index: u16) -> Option<f32> {
        self.get_u32(index).map(f32::from_bits)
    }

    pub fn get_u64(&self, index: u16) -> Option<u64> {
        let low = self.get_u32(index)?;
        let high = self.get_u32(index + 1)?;
        Some(low as u64 | (high as u64) << 32)
    }

    /// Stores `value` at `index`, marking it dirty when it changes.
    pub fn set_u32(&mut self, index: u16, value: u32) -> Result<(), UpdateError> {
        let slot = self
            .values
            .get_mut(index as usize)
            .ok_or(UpdateError::FieldOutOfRange { type_id: self.type_id, index })?;
        if *slot != value {
            *slot = value;
            self.dirty[(index / 32) as usize] |= 1 << (index % 32);
        }
        Ok(())
    }

    pub fn set_f32(&mut self, index: u16, value: f32) -> Result<(), UpdateError> {
        self.set_u32(index, value.to_bits())
    }

    pub fn set_u64(&mut self, index: u16, value: u64) -> Result<(), UpdateError> {
        self.set_u32(index, value as u32)?;
        self.set_u32(index + 1, (value >> 32) as u32)
    }

    pub fn set_bytes(&mut self, index: u16, bytes: [u8; 4]) -> Result<(), UpdateError> {
        self.set_u32(index, u32::from_le_bytes(bytes))
    }

    /// Replaces one byte of a packed four-byte field.
    pub fn set_byte(&mut self, index: u16, offset: usize, value: u8) -> Result<(), UpdateError> {
        let mut bytes = self.get_u32(index).unwrap_or(0).to_le_bytes();
        if let Some(b) = bytes.get_mut(offset) {
            *b = value;
        }
        self.set_bytes(index, bytes)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|w| *w != 0)
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|w| *w = 0);
    }

    fn collect<F: Fn(u16) -> bool>(&self, include: F) -> FieldValues {
        let table = layout(self.type_id);
        let mut out = FieldValues::new(self.type_id);
        for index in 0..self.values.len() as u16 {
            if !include(index) {
                continue;
            }
            out.insert(index, self.values[index as usize]);
            // 64-bit fields always travel whole.
            if let Some(partner) = table.long_partner(index) {
                out.insert(partner, self.values[partner as usize]);
            }
        }
        out
    }

    fn is_dirty_index(&self, index: u16) -> bool {
        self.dirty[(index / 32) as usize] & (1 << (index % 32)) != 0
    }

    /// Values block for the fields changed since the last clear.
    pub fn values_block(&self) -> UpdateBlock {
        UpdateBlock::Values {
            guid: self.guid,
            fields: self.collect(|i| self.is_dirty_index(i)),
        }
    }

    /// Returns the pending values block, if any, and clears the dirty mask.
    pub fn take_values_block(&mut self) -> Option<UpdateBlock> {
        if !self.is_dirty() {
            return None;
        }
        let block = self.values_block();
        self.clear_dirty();
        Some(block)
    }

    /// Full create block carrying every non-zero field. `self_view` selects
    /// the variant sent to the object's own client.
    pub fn create_block(&self, self_view: bool, tick: u32) -> UpdateBlock {
        let mut flags = UpdateFlags::ALL | UpdateFlags::HAS_POSITION;
        let placement = if self.type_id.is_living() {
            flags = flags | UpdateFlags::LIVING;
            Placement::Living(Movement { time: tick, ..self.movement })
        } else {
            Placement::Position(self.movement.position)
        };
        if self_view {
            flags = flags | UpdateFlags::SELF;
        }

        let block = CreateBlock {
            guid: self.guid,
            type_id: self.type_id,
            flags,
            placement,
            full_guid: None,
            high_guid: None,
            all: Some(1),
            transport: None,
            fields: self.collect(|i| self.values[i as usize] != 0),
        };
        if self_view {
            UpdateBlock::CreateObjectSelf(block)
        } else {
            UpdateBlock::CreateObject(block)
        }
    }

    pub fn position(&self) -> Position {
        self.movement.position
    }
}

fn faction_for_race(race: u8) -> u32 {
    match race {
        1 => 1,    // human
        2 => 2,    // orc
        3 => 3,    // dwarf
        4 => 4,    // night elf
        5 => 5,    // undead
        6 => 6,    // tauren
        7 => 115,  // gnome
        8 => 116,  // troll
        _ => 35,
    }
}

fn power_type(class: u8) -> u8 {
    match class {
        1 => 1, // warrior: rage
        4 => 3, // rogue: energy
        _ => 0,
    }
}

fn next_level_xp(level: u8) -> u32 {
    let l = level.max(1) as u32;
    // Approximate 1-60 curve.
    (8 * l + 45) * 5 * l + 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::update::UpdatePacket;

    fn john() -> Character {
        Character {
            guid: 1,
            account: "JOHN".into(),
            name: "Johnny".into(),
            realm_id: 1,
            race: 1,
            class: 1,
            gender: 0,
            skin: 1,
            face: 2,
            hair_style: 3,
            hair_color: 4,
            facial_hair: 5,
            level: 1,
            health: 60,
            power: 0,
            display_id: 49,
            map_id: 0,
            position: Position::new(-8949.95, -132.493, 83.5312, 0.0),
            xp: 0,
            money: 0,
        }
    }

    #[test]
    fn test_new_sets_object_header() {
        let e = Entity::new(0x1_0000_0002, TypeId::GameObject);
        assert_eq!(e.get_u64(fields::OBJECT_FIELD_GUID), Some(0x1_0000_0002));
        assert_eq!(e.get_u32(fields::OBJECT_FIELD_TYPE), Some(0x21));
        assert_eq!(e.get_f32(fields::OBJECT_FIELD_SCALE_X), Some(1.0));
        assert!(!e.is_dirty());
    }

    #[test]
    fn test_set_marks_dirty_only_on_change() {
        let mut e = Entity::player(&john()).unwrap();
        assert!(!e.is_dirty());
        e.set_u32(fields::UNIT_FIELD_HEALTH, 60).unwrap();
        assert!(!e.is_dirty());
        e.set_u32(fields::UNIT_FIELD_HEALTH, 55).unwrap();
        assert!(e.is_dirty());

        let block = e.take_values_block().unwrap();
        match block {
            UpdateBlock::Values { guid, fields } => {
                assert_eq!(guid, 1);
                assert_eq!(fields.len(), 1);
                assert_eq!(fields.get(fields::UNIT_FIELD_HEALTH), Some(55));
            }
            other => panic!("expected values block, got {:?}", other),
        }
        assert!(e.take_values_block().is_none());
    }

    #[test]
    fn test_set_out_of_range() {
        let mut e = Entity::new(5, TypeId::Object);
        assert!(matches!(
            e.set_u32(fields::UNIT_FIELD_HEALTH, 1),
            Err(UpdateError::FieldOutOfRange { .. })
        ));
    }

    #[test]
    fn test_dirty_long_half_sends_whole_field() {
        let mut e = Entity::new(7, TypeId::Unit);
        // Only the high word changes.
        e.set_u64(fields::OBJECT_FIELD_GUID, 7 | 1 << 40).unwrap();
        let UpdateBlock::Values { fields, .. } = e.values_block() else {
            panic!("expected values block");
        };
        assert_eq!(fields.len(), 2);
        assert!(fields.validate().is_ok());
    }

    #[test]
    fn test_player_create_block_encodes() {
        let e = Entity::player(&john()).unwrap();
        let block = e.create_block(true, 1234);
        let packet = UpdatePacket::new(vec![block]);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[5], 3);

        let decoded = UpdatePacket::decode(&bytes, |_| None).unwrap();
        let UpdateBlock::CreateObjectSelf(b) = &decoded.blocks[0] else {
            panic!("expected self create block");
        };
        assert_eq!(b.type_id, TypeId::Player);
        assert_eq!(b.fields.get(fields::UNIT_FIELD_LEVEL), Some(1));
        assert_eq!(b.fields.get(fields::UNIT_FIELD_DISPLAYID), Some(49));
        match b.placement {
            Placement::Living(m) => {
                assert_eq!(m.time, 1234);
                assert_eq!(m.position, john().position);
            }
            other => panic!("expected living placement, got {:?}", other),
        }
    }

    #[test]
    fn test_set_byte() {
        let mut e = Entity::player(&john()).unwrap();
        e.set_byte(fields::UNIT_FIELD_BYTES_1, 0, STAND_STATE_SIT).unwrap();
        assert_eq!(e.get_u32(fields::UNIT_FIELD_BYTES_1), Some(1));
        assert!(e.is_dirty());
    }
}
