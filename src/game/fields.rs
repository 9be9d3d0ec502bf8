//! Static field tables for every object category.
//!
//! Each category extends its parent: object ⊂ item ⊂ container,
//! object ⊂ unit ⊂ player, object ⊂ gameobject / dynamicobject / corpse.
//! Indices are absolute 32-bit word positions; a 64-bit field spans two.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    /// 64-bit value, low word first.
    Long,
    /// Four packed bytes.
    Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    /// Width in 32-bit words.
    pub size: u16,
    pub kind: FieldKind,
}

const fn field(name: &'static str, size: u16, kind: FieldKind) -> FieldDef {
    FieldDef { name, size, kind }
}

use FieldKind::{Bytes, Float, Int, Long};

pub const OBJECT_FIELDS: &[FieldDef] = &[
    field("OBJECT_FIELD_GUID", 2, Long),
    field("OBJECT_FIELD_TYPE", 1, Int),
    field("OBJECT_FIELD_ENTRY", 1, Int),
    field("OBJECT_FIELD_SCALE_X", 1, Float),
    field("OBJECT_FIELD_PADDING", 1, Int),
];

pub const ITEM_FIELDS: &[FieldDef] = &[
    field("ITEM_FIELD_OWNER", 2, Long),
    field("ITEM_FIELD_CONTAINED", 2, Long),
    field("ITEM_FIELD_CREATOR", 2, Long),
    field("ITEM_FIELD_GIFTCREATOR", 2, Long),
    field("ITEM_FIELD_STACK_COUNT", 1, Int),
    field("ITEM_FIELD_DURATION", 1, Int),
    field("ITEM_FIELD_SPELL_CHARGES", 5, Int),
    field("ITEM_FIELD_FLAGS", 1, Int),
    field("ITEM_FIELD_ENCHANTMENT", 21, Int),
    field("ITEM_FIELD_PROPERTY_SEED", 1, Int),
    field("ITEM_FIELD_RANDOM_PROPERTIES_ID", 1, Int),
    field("ITEM_FIELD_ITEM_TEXT_ID", 1, Int),
    field("ITEM_FIELD_DURABILITY", 1, Int),
    field("ITEM_FIELD_MAXDURABILITY", 1, Int),
];

pub const CONTAINER_FIELDS: &[FieldDef] = &[
    field("CONTAINER_FIELD_NUM_SLOTS", 1, Int),
    field("CONTAINER_ALIGN_PAD", 1, Bytes),
    field("CONTAINER_FIELD_SLOT_1", 72, Long),
];

pub const UNIT_FIELDS: &[FieldDef] = &[
    field("UNIT_FIELD_CHARM", 2, Long),
    field("UNIT_FIELD_SUMMON", 2, Long),
    field("UNIT_FIELD_CHARMEDBY", 2, Long),
    field("UNIT_FIELD_SUMMONEDBY", 2, Long),
    field("UNIT_FIELD_CREATEDBY", 2, Long),
    field("UNIT_FIELD_TARGET", 2, Long),
    field("UNIT_FIELD_PERSUADED", 2, Long),
    field("UNIT_FIELD_CHANNEL_OBJECT", 2, Long),
    field("UNIT_FIELD_HEALTH", 1, Int),
    field("UNIT_FIELD_POWER1", 1, Int),
    field("UNIT_FIELD_POWER2", 1, Int),
    field("UNIT_FIELD_POWER3", 1, Int),
    field("UNIT_FIELD_POWER4", 1, Int),
    field("UNIT_FIELD_POWER5", 1, Int),
    field("UNIT_FIELD_MAXHEALTH", 1, Int),
    field("UNIT_FIELD_MAXPOWER1", 1, Int),
    field("UNIT_FIELD_MAXPOWER2", 1, Int),
    field("UNIT_FIELD_MAXPOWER3", 1, Int),
    field("UNIT_FIELD_MAXPOWER4", 1, Int),
    field("UNIT_FIELD_MAXPOWER5", 1, Int),
    field("UNIT_FIELD_LEVEL", 1, Int),
    field("UNIT_FIELD_FACTIONTEMPLATE", 1, Int),
    field("UNIT_FIELD_BYTES_0", 1, Bytes),
    field("UNIT_VIRTUAL_ITEM_SLOT_DISPLAY", 3, Int),
    field("UNIT_VIRTUAL_ITEM_INFO", 6, Bytes),
    field("UNIT_FIELD_FLAGS", 1, Int),
    field("UNIT_FIELD_AURA", 48, Int),
    field("UNIT_FIELD_AURAFLAGS", 6, Bytes),
    field("UNIT_FIELD_AURALEVELS", 12, Bytes),
    field("UNIT_FIELD_AURAAPPLICATIONS", 12, Bytes),
    field("UNIT_FIELD_AURASTATE", 1, Int),
    field("UNIT_FIELD_BASEATTACKTIME", 2, Int),
    field("UNIT_FIELD_RANGEDATTACKTIME", 1, Int),
    field("UNIT_FIELD_BOUNDINGRADIUS", 1, Float),
    field("UNIT_FIELD_COMBATREACH", 1, Float),
    field("UNIT_FIELD_DISPLAYID", 1, Int),
    field("UNIT_FIELD_NATIVEDISPLAYID", 1, Int),
    field("UNIT_FIELD_MOUNTDISPLAYID", 1, Int),
    field("UNIT_FIELD_MINDAMAGE", 1, Float),
    field("UNIT_FIELD_MAXDAMAGE", 1, Float),
    field("UNIT_FIELD_MINOFFHANDDAMAGE", 1, Float),
    field("UNIT_FIELD_MAXOFFHANDDAMAGE", 1, Float),
    field("UNIT_FIELD_BYTES_1", 1, Bytes),
    field("UNIT_FIELD_PETNUMBER", 1, Int),
    field("UNIT_FIELD_PET_NAME_TIMESTAMP", 1, Int),
    field("UNIT_FIELD_PETEXPERIENCE", 1, Int),
    field("UNIT_FIELD_PETNEXTLEVELEXP", 1, Int),
    field("UNIT_DYNAMIC_FLAGS", 1, Int),
    field("UNIT_CHANNEL_SPELL", 1, Int),
    field("UNIT_MOD_CAST_SPEED", 1, Float),
    field("UNIT_CREATED_BY_SPELL", 1, Int),
    field("UNIT_NPC_FLAGS", 1, Int),
    field("UNIT_NPC_EMOTESTATE", 1, Int),
    field("UNIT_TRAINING_POINTS", 1, Int),
    field("UNIT_FIELD_STAT0", 1, Int),
    field("UNIT_FIELD_STAT1", 1, Int),
    field("UNIT_FIELD_STAT2", 1, Int),
    field("UNIT_FIELD_STAT3", 1, Int),
    field("UNIT_FIELD_STAT4", 1, Int),
    field("UNIT_FIELD_RESISTANCES", 7, Int),
    field("UNIT_FIELD_BASE_MANA", 1, Int),
    field("UNIT_FIELD_BASE_HEALTH", 1, Int),
    field("UNIT_FIELD_BYTES_2", 1, Bytes),
    field("UNIT_FIELD_ATTACK_POWER", 1, Int),
    field("UNIT_FIELD_ATTACK_POWER_MODS", 1, Int),
    field("UNIT_FIELD_ATTACK_POWER_MULTIPLIER", 1, Float),
    field("UNIT_FIELD_RANGED_ATTACK_POWER", 1, Int),
    field("UNIT_FIELD_RANGED_ATTACK_POWER_MODS", 1, Int),
    field("UNIT_FIELD_RANGED_ATTACK_POWER_MULTIPLIER", 1, Float),
    field("UNIT_FIELD_MINRANGEDDAMAGE", 1, Float),
    field("UNIT_FIELD_MAXRANGEDDAMAGE", 1, Float),
    field("UNIT_FIELD_POWER_COST_MODIFIER", 7, Int),
    field("UNIT_FIELD_POWER_COST_MULTIPLIER", 7, Float),
    field("UNIT_FIELD_PADDING", 1, Int),
];

pub const PLAYER_FIELDS: &[FieldDef] = &[
    field("PLAYER_DUEL_ARBITER", 2, Long),
    field("PLAYER_FLAGS", 1, Int),
    field("PLAYER_GUILDID", 1, Int),
    field("PLAYER_GUILDRANK", 1, Int),
    field("PLAYER_BYTES", 1, Bytes),
    field("PLAYER_BYTES_2", 1, Bytes),
    field("PLAYER_BYTES_3", 1, Bytes),
    field("PLAYER_DUEL_TEAM", 1, Int),
    field("PLAYER_GUILD_TIMESTAMP", 1, Int),
    field("PLAYER_QUEST_LOG_1_1", 60, Int),
    // 19 slots of 12 words: creator guid, 8 item ids, properties, padding.
    field("PLAYER_VISIBLE_ITEM_1_CREATOR", 228, Int),
    field("PLAYER_FIELD_INV_SLOT_HEAD", 46, Long),
    field("PLAYER_FIELD_PACK_SLOT_1", 32, Long),
    field("PLAYER_FIELD_BANK_SLOT_1", 48, Long),
    field("PLAYER_FIELD_BANKBAG_SLOT_1", 12, Long),
    field("PLAYER_FIELD_VENDORBUYBACK_SLOT_1", 24, Long),
    field("PLAYER_FIELD_KEYRING_SLOT_1", 64, Long),
    field("PLAYER_FARSIGHT", 2, Long),
    field("PLAYER_FIELD_COMBO_TARGET", 2, Long),
    field("PLAYER_XP", 1, Int),
    field("PLAYER_NEXT_LEVEL_XP", 1, Int),
    field("PLAYER_SKILL_INFO_1_1", 384, Int),
    field("PLAYER_CHARACTER_POINTS1", 1, Int),
    field("PLAYER_CHARACTER_POINTS2", 1, Int),
    field("PLAYER_TRACK_CREATURES", 1, Int),
    field("PLAYER_TRACK_RESOURCES", 1, Int),
    field("PLAYER_BLOCK_PERCENTAGE", 1, Float),
    field("PLAYER_DODGE_PERCENTAGE", 1, Float),
    field("PLAYER_PARRY_PERCENTAGE", 1, Float),
    field("PLAYER_CRIT_PERCENTAGE", 1, Float),
    field("PLAYER_RANGED_CRIT_PERCENTAGE", 1, Float),
    field("PLAYER_EXPLORED_ZONES_1", 64, Bytes),
    field("PLAYER_REST_STATE_EXPERIENCE", 1, Int),
    field("PLAYER_FIELD_COINAGE", 1, Int),
    field("PLAYER_FIELD_POSSTAT0", 5, Int),
    field("PLAYER_FIELD_NEGSTAT0", 5, Int),
    field("PLAYER_FIELD_RESISTANCEBUFFMODSPOSITIVE", 7, Int),
    field("PLAYER_FIELD_RESISTANCEBUFFMODSNEGATIVE", 7, Int),
    field("PLAYER_FIELD_MOD_DAMAGE_DONE_POS", 7, Int),
    field("PLAYER_FIELD_MOD_DAMAGE_DONE_NEG", 7, Int),
    field("PLAYER_FIELD_MOD_DAMAGE_DONE_PCT", 7, Float),
    field("PLAYER_FIELD_BYTES", 1, Bytes),
    field("PLAYER_AMMO_ID", 1, Int),
    field("PLAYER_SELF_RES_SPELL", 1, Int),
    field("PLAYER_FIELD_PVP_MEDALS", 1, Int),
    field("PLAYER_FIELD_BUYBACK_PRICE_1", 12, Int),
    field("PLAYER_FIELD_BUYBACK_TIMESTAMP_1", 12, Int),
    field("PLAYER_FIELD_SESSION_KILLS", 1, Bytes),
    field("PLAYER_FIELD_YESTERDAY_KILLS", 1, Bytes),
    field("PLAYER_FIELD_LAST_WEEK_KILLS", 1, Bytes),
    field("PLAYER_FIELD_THIS_WEEK_KILLS", 1, Bytes),
    field("PLAYER_FIELD_THIS_WEEK_CONTRIBUTION", 1, Int),
    field("PLAYER_FIELD_LIFETIME_HONORBALE_KILLS", 1, Int),
    field("PLAYER_FIELD_LIFETIME_DISHONORBALE_KILLS", 1, Int),
    field("PLAYER_FIELD_YESTERDAY_CONTRIBUTION", 1, Int),
    field("PLAYER_FIELD_LAST_WEEK_CONTRIBUTION", 1, Int),
    field("PLAYER_FIELD_LAST_WEEK_RANK", 1, Int),
    field("PLAYER_FIELD_BYTES2", 1, Bytes),
    field("PLAYER_FIELD_WATCHED_FACTION_INDEX", 1, Int),
    field("PLAYER_FIELD_COMBAT_RATING_1", 20, Int),
];

pub const GAMEOBJECT_FIELDS: &[FieldDef] = &[
    field("OBJECT_FIELD_CREATED_BY", 2, Long),
    field("GAMEOBJECT_DISPLAYID", 1, Int),
    field("GAMEOBJECT_FLAGS", 1, Int),
    field("GAMEOBJECT_ROTATION", 4, Float),
    field("GAMEOBJECT_STATE", 1, Int),
    field("GAMEOBJECT_POS_X", 1, Float),
    field("GAMEOBJECT_POS_Y", 1, Float),
    field("GAMEOBJECT_POS_Z", 1, Float),
    field("GAMEOBJECT_FACING", 1, Float),
    field("GAMEOBJECT_DYN_FLAGS", 1, Int),
    field("GAMEOBJECT_FACTION", 1, Int),
    field("GAMEOBJECT_TYPE_ID", 1, Int),
    field("GAMEOBJECT_LEVEL", 1, Int),
    field("GAMEOBJECT_ANIMPROGRESS", 1, Int),
];

pub const DYNAMICOBJECT_FIELDS: &[FieldDef] = &[
    field("DYNAMICOBJECT_CASTER", 2, Long),
    field("DYNAMICOBJECT_BYTES", 1, Bytes),
    field("DYNAMICOBJECT_SPELLID", 1, Int),
    field("DYNAMICOBJECT_RADIUS", 1, Float),
    field("DYNAMICOBJECT_POS_X", 1, Float),
    field("DYNAMICOBJECT_POS_Y", 1, Float),
    field("DYNAMICOBJECT_POS_Z", 1, Float),
    field("DYNAMICOBJECT_FACING", 1, Float),
    field("DYNAMICOBJECT_PAD", 1, Bytes),
];

pub const CORPSE_FIELDS: &[FieldDef] = &[
    field("CORPSE_FIELD_OWNER", 2, Long),
    field("CORPSE_FIELD_FACING", 1, Float),
    field("CORPSE_FIELD_POS_X", 1, Float),
    field("CORPSE_FIELD_POS_Y", 1, Float),
    field("CORPSE_FIELD_POS_Z", 1, Float),
    field("CORPSE_FIELD_DISPLAY_ID", 1, Int),
    field("CORPSE_FIELD_ITEM", 19, Int),
    field("CORPSE_FIELD_BYTES_1", 1, Bytes),
    field("CORPSE_FIELD_BYTES_2", 1, Bytes),
    field("CORPSE_FIELD_GUILD", 1, Int),
    field("CORPSE_FIELD_FLAGS", 1, Int),
    field("CORPSE_FIELD_DYNAMIC_FLAGS", 1, Int),
    field("CORPSE_FIELD_PAD", 1, Int),
];

const fn section_size(fields: &[FieldDef]) -> u16 {
    let mut total = 0;
    let mut i = 0;
    while i < fields.len() {
        total += fields[i].size;
        i += 1;
    }
    total
}

pub const OBJECT_END: u16 = section_size(OBJECT_FIELDS);
pub const ITEM_END: u16 = OBJECT_END + section_size(ITEM_FIELDS);
pub const CONTAINER_END: u16 = ITEM_END + section_size(CONTAINER_FIELDS);
pub const UNIT_END: u16 = OBJECT_END + section_size(UNIT_FIELDS);
pub const PLAYER_END: u16 = UNIT_END + section_size(PLAYER_FIELDS);
pub const GAMEOBJECT_END: u16 = OBJECT_END + section_size(GAMEOBJECT_FIELDS);
pub const DYNAMICOBJECT_END: u16 = OBJECT_END + section_size(DYNAMICOBJECT_FIELDS);
pub const CORPSE_END: u16 = OBJECT_END + section_size(CORPSE_FIELDS);

// Indices the server writes directly.
pub const OBJECT_FIELD_GUID: u16 = 0x00;
pub const OBJECT_FIELD_TYPE: u16 = 0x02;
pub const OBJECT_FIELD_ENTRY: u16 = 0x03;
pub const OBJECT_FIELD_SCALE_X: u16 = 0x04;

pub const UNIT_FIELD_HEALTH: u16 = OBJECT_END + 0x10;
pub const UNIT_FIELD_POWER1: u16 = OBJECT_END + 0x11;
pub const UNIT_FIELD_MAXHEALTH: u16 = OBJECT_END + 0x16;
pub const UNIT_FIELD_MAXPOWER1: u16 = OBJECT_END + 0x17;
pub const UNIT_FIELD_LEVEL: u16 = OBJECT_END + 0x1C;
pub const UNIT_FIELD_FACTIONTEMPLATE: u16 = OBJECT_END + 0x1D;
pub const UNIT_FIELD_BYTES_0: u16 = OBJECT_END + 0x1E;
pub const UNIT_FIELD_FLAGS: u16 = OBJECT_END + 0x28;
pub const UNIT_FIELD_BOUNDINGRADIUS: u16 = OBJECT_END + 0x7B;
pub const UNIT_FIELD_COMBATREACH: u16 = OBJECT_END + 0x7C;
pub const UNIT_FIELD_DISPLAYID: u16 = OBJECT_END + 0x7D;
pub const UNIT_FIELD_NATIVEDISPLAYID: u16 = OBJECT_END + 0x7E;
pub const UNIT_FIELD_BYTES_1: u16 = OBJECT_END + 0x84;
pub const UNIT_FIELD_STAT0: u16 = OBJECT_END + 0x90;
pub const UNIT_FIELD_BASE_HEALTH: u16 = OBJECT_END + 0x9D;

pub const PLAYER_FLAGS: u16 = UNIT_END + 0x02;
pub const PLAYER_BYTES: u16 = UNIT_END + 0x05;
pub const PLAYER_BYTES_2: u16 = UNIT_END + 0x06;
pub const PLAYER_XP: u16 = UNIT_END + 0x210;
pub const PLAYER_NEXT_LEVEL_XP: u16 = UNIT_END + 0x211;
pub const PLAYER_FIELD_COINAGE: u16 = UNIT_END + 0x3DC;
pub const PLAYER_FIELD_WATCHED_FACTION_INDEX: u16 = UNIT_END + 0x431;

/// Object category tag carried in create blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    Object = 0,
    Item = 1,
    Container = 2,
    Unit = 3,
    Player = 4,
    GameObject = 5,
    DynamicObject = 6,
    Corpse = 7,
}

pub const ALL_TYPES: [TypeId; 8] = [
    TypeId::Object,
    TypeId::Item,
    TypeId::Container,
    TypeId::Unit,
    TypeId::Player,
    TypeId::GameObject,
    TypeId::DynamicObject,
    TypeId::Corpse,
];

impl TypeId {
    pub fn from_u8(v: u8) -> Option<Self> {
        ALL_TYPES.get(v as usize).copied()
    }

    /// Field sections from the object root down to this category.
    pub fn sections(self) -> &'static [&'static [FieldDef]] {
        match self {
            TypeId::Object => &[OBJECT_FIELDS],
            TypeId::Item => &[OBJECT_FIELDS, ITEM_FIELDS],
            TypeId::Container => &[OBJECT_FIELDS, ITEM_FIELDS, CONTAINER_FIELDS],
            TypeId::Unit => &[OBJECT_FIELDS, UNIT_FIELDS],
            TypeId::Player => &[OBJECT_FIELDS, UNIT_FIELDS, PLAYER_FIELDS],
            TypeId::GameObject => &[OBJECT_FIELDS, GAMEOBJECT_FIELDS],
            TypeId::DynamicObject => &[OBJECT_FIELDS, DYNAMICOBJECT_FIELDS],
            TypeId::Corpse => &[OBJECT_FIELDS, CORPSE_FIELDS],
        }
    }

    pub fn field_end(self) -> u16 {
        match self {
            TypeId::Object => OBJECT_END,
            TypeId::Item => ITEM_END,
            TypeId::Container => CONTAINER_END,
            TypeId::Unit => UNIT_END,
            TypeId::Player => PLAYER_END,
            TypeId::GameObject => GAMEOBJECT_END,
            TypeId::DynamicObject => DYNAMICOBJECT_END,
            TypeId::Corpse => CORPSE_END,
        }
    }

    /// Number of u32 mask words a field segment of this category carries.
    pub fn mask_words(self) -> u8 {
        self.field_end().div_ceil(32) as u8
    }

    /// Value written to `OBJECT_FIELD_TYPE`: one bit per category in the
    /// ancestry chain.
    pub fn type_mask(self) -> u32 {
        const OBJECT: u32 = 0x01;
        match self {
            TypeId::Object => OBJECT,
            TypeId::Item => OBJECT | 0x02,
            TypeId::Container => OBJECT | 0x02 | 0x04,
            TypeId::Unit => OBJECT | 0x08,
            TypeId::Player => OBJECT | 0x08 | 0x10,
            TypeId::GameObject => OBJECT | 0x20,
            TypeId::DynamicObject => OBJECT | 0x40,
            TypeId::Corpse => OBJECT | 0x80,
        }
    }

    /// Only units and players carry a movement block.
    pub fn is_living(self) -> bool {
        matches!(self, TypeId::Unit | TypeId::Player)
    }
}

/// What occupies one field index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Int,
    Float,
    Bytes,
    LongLow,
    LongHigh,
}

#[derive(Debug)]
pub struct FieldLayout {
    slots: Vec<Slot>,
    names: Vec<(&'static str, u16)>,
}

impl FieldLayout {
    fn build(type_id: TypeId) -> Self {
        let mut slots = Vec::with_capacity(type_id.field_end() as usize);
        let mut names = Vec::new();
        for section in type_id.sections() {
            for def in section.iter() {
                names.push((def.name, slots.len() as u16));
                for i in 0..def.size {
                    slots.push(match def.kind {
                        FieldKind::Int => Slot::Int,
                        FieldKind::Float => Slot::Float,
                        FieldKind::Bytes => Slot::Bytes,
                        FieldKind::Long if i % 2 == 0 => Slot::LongLow,
                        FieldKind::Long => Slot::LongHigh,
                    });
                }
            }
        }
        Self { slots, names }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: u16) -> Option<Slot> {
        self.slots.get(index as usize).copied()
    }

    /// Index of the other half when `index` belongs to a 64-bit field.
    pub fn long_partner(&self, index: u16) -> Option<u16> {
        match self.slot(index)? {
            Slot::LongLow => Some(index + 1),
            Slot::LongHigh => Some(index - 1),
            _ => None,
        }
    }

    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.names.iter().find(|(n, _)| *n == name).map(|(_, i)| *i)
    }
}

static LAYOUTS: OnceLock<[FieldLayout; 8]> = OnceLock::new();

/// Per-index layout for `type_id`, built once on first use.
pub fn layout(type_id: TypeId) -> &'static FieldLayout {
    let all = LAYOUTS.get_or_init(|| std::array::from_fn(|i| FieldLayout::build(ALL_TYPES[i])));
    &all[type_id as usize]
}
