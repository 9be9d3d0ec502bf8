//! Entity update codec: create, values and out-of-range blocks.
//!
//! Encoding validates the whole packet before any byte is produced; a bad
//! block fails the packet rather than emitting a partial one.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::ops::BitOr;

use bytes::BufMut;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::fields::{layout, Slot, TypeId};
use crate::network::packet::{write_packed_guid, PacketReader, ProtocolError};

pub const SMSG_UPDATE_OBJECT: u16 = 0x0A9;
pub const SMSG_COMPRESSED_UPDATE_OBJECT: u16 = 0x1F6;

/// Default payload size above which updates are sent compressed.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 100;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum UpdateError {
    #[error("Unknown update block kind {0}")]
    UnknownBlockKind(u8),

    #[error("Update block kind {0} is not supported")]
    UnsupportedBlockKind(u8),

    #[error("Unknown object type tag {0}")]
    UnknownTypeId(u8),

    #[error("Unknown update flag bits {0:#04X}")]
    UnknownFlags(u8),

    #[error("Living flag on non-living type {0:?}")]
    LivingOnNonUnit(TypeId),

    #[error("Self flag does not match the block kind")]
    SelfFlagMismatch,

    #[error("Flag {0} set without its payload")]
    MissingPayload(&'static str),

    #[error("Payload {0} present without its flag")]
    UnexpectedPayload(&'static str),

    #[error("Field index {index:#X} is beyond the {type_id:?} table")]
    FieldOutOfRange { type_id: TypeId, index: u16 },

    #[error("64-bit field at {0:#X} is missing one half")]
    SplitLongField(u16),

    #[error("Field segment has {found} mask words, {type_id:?} uses {expected}")]
    MaskWordCount { type_id: TypeId, expected: u8, found: u8 },

    #[error("{found:?} field set attached to a {expected:?} block")]
    TypeMismatch { expected: TypeId, found: TypeId },

    #[error("No object type known for guid {0:#X}")]
    UnknownObject(u64),

    #[error("{0} trailing bytes after the last block")]
    TrailingBytes(usize),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Create-block update flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateFlags(u8);

impl UpdateFlags {
    pub const SELF: Self = Self(0x01);
    pub const TRANSPORT: Self = Self(0x02);
    pub const FULL_GUID: Self = Self(0x04);
    pub const HIGH_GUID: Self = Self(0x08);
    pub const ALL: Self = Self(0x10);
    pub const LIVING: Self = Self(0x20);
    pub const HAS_POSITION: Self = Self(0x40);

    const KNOWN: u8 = 0x7F;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Result<Self, UpdateError> {
        if bits & !Self::KNOWN != 0 {
            return Err(UpdateError::UnknownFlags(bits & !Self::KNOWN));
        }
        Ok(Self(bits))
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub o: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32, o: f32) -> Self {
        Self { x, y, z, o }
    }

    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
        buf.put_f32_le(self.o);
    }

    fn read(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: r.f32_le()?,
            y: r.f32_le()?,
            z: r.f32_le()?,
            o: r.f32_le()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speeds {
    pub walk: f32,
    pub run: f32,
    pub run_back: f32,
    pub swim: f32,
    pub swim_back: f32,
    pub turn_rate: f32,
}

impl Default for Speeds {
    fn default() -> Self {
        Self {
            walk: 2.5,
            run: 7.0,
            run_back: 4.5,
            swim: 4.72,
            swim_back: 2.5,
            turn_rate: 3.14159,
        }
    }
}

/// Movement block carried by living objects.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Movement {
    pub flags: u32,
    pub time: u32,
    pub position: Position,
    pub fall_time: f32,
    pub speeds: Speeds,
}

impl Movement {
    fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.time);
        self.position.write(buf);
        buf.put_f32_le(self.fall_time);
        let s = &self.speeds;
        for v in [s.walk, s.run, s.run_back, s.swim, s.swim_back, s.turn_rate] {
            buf.put_f32_le(v);
        }
    }

    fn read(r: &mut PacketReader<'_>) -> Result<Self, ProtocolError> {
        let flags = r.u32_le()?;
        let time = r.u32_le()?;
        let position = Position::read(r)?;
        let fall_time = r.f32_le()?;
        let speeds = Speeds {
            walk: r.f32_le()?,
            run: r.f32_le()?,
            run_back: r.f32_le()?,
            swim: r.f32_le()?,
            swim_back: r.f32_le()?,
            turn_rate: r.f32_le()?,
        };
        Ok(Self { flags, time, position, fall_time, speeds })
    }
}

/// Spatial payload of a create block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    None,
    Position(Position),
    Living(Movement),
}

/// Sparse field-index → value set for one object category.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValues {
    type_id: TypeId,
    values: BTreeMap<u16, u32>,
}

impl FieldValues {
    pub fn new(type_id: TypeId) -> Self {
        Self { type_id, values: BTreeMap::new() }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn insert(&mut self, index: u16, value: u32) {
        self.values.insert(index, value);
    }

    pub fn insert_u64(&mut self, index: u16, value: u64) {
        self.values.insert(index, value as u32);
        self.values.insert(index + 1, (value >> 32) as u32);
    }

    pub fn get(&self, index: u16) -> Option<u32> {
        self.values.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        self.values.iter().map(|(i, v)| (*i, *v))
    }

    /// Every index inside the table, both halves of every 64-bit field.
    pub fn validate(&self) -> Result<(), UpdateError> {
        let table = layout(self.type_id);
        for &index in self.values.keys() {
            match table.slot(index) {
                None => {
                    return Err(UpdateError::FieldOutOfRange { type_id: self.type_id, index })
                }
                Some(Slot::LongLow | Slot::LongHigh) => {
                    let partner = table.long_partner(index).unwrap_or(index);
                    if !self.values.contains_key(&partner) {
                        return Err(UpdateError::SplitLongField(index.min(partner)));
                    }
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Size of the encoded segment: count byte, mask words, 4 bytes per index.
    pub fn encoded_len(&self) -> usize {
        1 + 4 * self.type_id.mask_words() as usize + 4 * self.values.len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), UpdateError> {
        self.validate()?;
        let words = self.type_id.mask_words();
        let mut mask = vec![0u32; words as usize];
        for &index in self.values.keys() {
            mask[(index / 32) as usize] |= 1 << (index % 32);
        }
        buf.put_u8(words);
        for word in &mask {
            buf.put_u32_le(*word);
        }
        for value in self.values.values() {
            buf.put_u32_le(*value);
        }
        Ok(())
    }

    pub fn decode(r: &mut PacketReader<'_>, type_id: TypeId) -> Result<Self, UpdateError> {
        let expected = type_id.mask_words();
        let found = r.u8()?;
        if found != expected {
            return Err(UpdateError::MaskWordCount { type_id, expected, found });
        }

        let mut mask = Vec::with_capacity(found as usize);
        for _ in 0..found {
            mask.push(r.u32_le()?);
        }

        let end = type_id.field_end();
        let mut out = Self::new(type_id);
        for (w, word) in mask.iter().enumerate() {
            for bit in 0..32u16 {
                if word & (1 << bit) == 0 {
                    continue;
                }
                let index = w as u16 * 32 + bit;
                if index >= end {
                    return Err(UpdateError::FieldOutOfRange { type_id, index });
                }
                out.values.insert(index, r.u32_le()?);
            }
        }
        out.validate()?;
        Ok(out)
    }
}

/// Object creation payload shared by the two create block kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateBlock {
    pub guid: u64,
    pub type_id: TypeId,
    pub flags: UpdateFlags,
    pub placement: Placement,
    pub full_guid: Option<u64>,
    pub high_guid: Option<u32>,
    pub all: Option<u32>,
    pub transport: Option<u32>,
    pub fields: FieldValues,
}

fn flag_payload<T>(flags: UpdateFlags, flag: UpdateFlags, payload: &Option<T>, name: &'static str)
    -> Result<(), UpdateError>
{
    match (flags.contains(flag), payload.is_some()) {
        (true, false) => Err(UpdateError::MissingPayload(name)),
        (false, true) => Err(UpdateError::UnexpectedPayload(name)),
        _ => Ok(()),
    }
}

impl CreateBlock {
    fn validate(&self, self_view: bool) -> Result<(), UpdateError> {
        let flags = self.flags;
        if flags.contains(UpdateFlags::LIVING) && !self.type_id.is_living() {
            return Err(UpdateError::LivingOnNonUnit(self.type_id));
        }
        if flags.contains(UpdateFlags::SELF) != self_view {
            return Err(UpdateError::SelfFlagMismatch);
        }

        match (&self.placement, flags.contains(UpdateFlags::LIVING), flags.contains(UpdateFlags::HAS_POSITION)) {
            (Placement::Living(_), true, _) => {}
            (_, true, _) => return Err(UpdateError::MissingPayload("living")),
            (Placement::Living(_), false, _) => return Err(UpdateError::UnexpectedPayload("living")),
            (Placement::Position(_), false, true) => {}
            (Placement::None, false, true) => return Err(UpdateError::MissingPayload("position")),
            (Placement::Position(_), false, false) => {
                return Err(UpdateError::UnexpectedPayload("position"))
            }
            (Placement::None, false, false) => {}
        }

        flag_payload(flags, UpdateFlags::FULL_GUID, &self.full_guid, "full_guid")?;
        flag_payload(flags, UpdateFlags::HIGH_GUID, &self.high_guid, "high_guid")?;
        flag_payload(flags, UpdateFlags::ALL, &self.all, "all")?;
        flag_payload(flags, UpdateFlags::TRANSPORT, &self.transport, "transport")?;

        if self.fields.type_id() != self.type_id {
            return Err(UpdateError::TypeMismatch {
                expected: self.type_id,
                found: self.fields.type_id(),
            });
        }
        self.fields.validate()
    }

    fn encode<B: BufMut>(&self, buf: &mut B, self_view: bool) -> Result<(), UpdateError> {
        self.validate(self_view)?;
        write_packed_guid(buf, self.guid);
        buf.put_u8(self.type_id as u8);
        buf.put_u8(self.flags.bits());
        match &self.placement {
            Placement::Living(m) => m.write(buf),
            Placement::Position(p) => p.write(buf),
            Placement::None => {}
        }
        if let Some(guid) = self.full_guid {
            write_packed_guid(buf, guid);
        }
        if let Some(high) = self.high_guid {
            buf.put_u32_le(high);
        }
        if let Some(all) = self.all {
            buf.put_u32_le(all);
        }
        if let Some(transport) = self.transport {
            buf.put_u32_le(transport);
        }
        self.fields.encode(buf)
    }

    fn decode(r: &mut PacketReader<'_>, self_view: bool) -> Result<Self, UpdateError> {
        let guid = r.packed_guid()?;
        let raw_type = r.u8()?;
        let type_id = TypeId::from_u8(raw_type).ok_or(UpdateError::UnknownTypeId(raw_type))?;
        let flags = UpdateFlags::from_bits(r.u8()?)?;

        if flags.contains(UpdateFlags::LIVING) && !type_id.is_living() {
            return Err(UpdateError::LivingOnNonUnit(type_id));
        }
        if flags.contains(UpdateFlags::SELF) != self_view {
            return Err(UpdateError::SelfFlagMismatch);
        }

        let placement = if flags.contains(UpdateFlags::LIVING) {
            Placement::Living(Movement::read(r)?)
        } else if flags.contains(UpdateFlags::HAS_POSITION) {
            Placement::Position(Position::read(r)?)
        } else {
            Placement::None
        };
        let full_guid = match flags.contains(UpdateFlags::FULL_GUID) {
            true => Some(r.packed_guid()?),
            false => None,
        };
        let high_guid = match flags.contains(UpdateFlags::HIGH_GUID) {
            true => Some(r.u32_le()?),
            false => None,
        };
        let all = match flags.contains(UpdateFlags::ALL) {
            true => Some(r.u32_le()?),
            false => None,
        };
        let transport = match flags.contains(UpdateFlags::TRANSPORT) {
            true => Some(r.u32_le()?),
            false => None,
        };
        let fields = FieldValues::decode(r, type_id)?;

        Ok(Self { guid, type_id, flags, placement, full_guid, high_guid, all, transport, fields })
    }
}

pub const BLOCK_VALUES: u8 = 0;
pub const BLOCK_MOVEMENT: u8 = 1;
pub const BLOCK_CREATE_OBJECT: u8 = 2;
pub const BLOCK_CREATE_OBJECT_SELF: u8 = 3;
pub const BLOCK_OUT_OF_RANGE: u8 = 4;
pub const BLOCK_NEAR_OBJECTS: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateBlock {
    Values { guid: u64, fields: FieldValues },
    CreateObject(CreateBlock),
    CreateObjectSelf(CreateBlock),
    OutOfRange(Vec<u64>),
}

impl UpdateBlock {
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), UpdateError> {
        match self {
            UpdateBlock::Values { guid, fields } => {
                buf.put_u8(BLOCK_VALUES);
                write_packed_guid(buf, *guid);
                fields.encode(buf)
            }
            UpdateBlock::CreateObject(block) => {
                buf.put_u8(BLOCK_CREATE_OBJECT);
                block.encode(buf, false)
            }
            UpdateBlock::CreateObjectSelf(block) => {
                buf.put_u8(BLOCK_CREATE_OBJECT_SELF);
                block.encode(buf, true)
            }
            UpdateBlock::OutOfRange(guids) => {
                buf.put_u8(BLOCK_OUT_OF_RANGE);
                buf.put_u32_le(guids.len() as u32);
                for guid in guids {
                    write_packed_guid(buf, *guid);
                }
                Ok(())
            }
        }
    }
}

/// One `SMSG_UPDATE_OBJECT` payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdatePacket {
    pub has_transport: bool,
    pub blocks: Vec<UpdateBlock>,
}

impl UpdatePacket {
    pub fn new(blocks: Vec<UpdateBlock>) -> Self {
        Self { has_transport: false, blocks }
    }

    pub fn encode(&self) -> Result<Vec<u8>, UpdateError> {
        let mut buf = Vec::with_capacity(64);
        buf.put_u32_le(self.blocks.len() as u32);
        buf.put_u8(self.has_transport as u8);
        for block in &self.blocks {
            block.encode(&mut buf)?;
        }
        Ok(buf)
    }

    /// Reads a payload back. Values blocks carry no type tag, so `resolve`
    /// supplies the category of objects not created earlier in the packet.
    pub fn decode<F>(data: &[u8], resolve: F) -> Result<Self, UpdateError>
    where
        F: Fn(u64) -> Option<TypeId>,
    {
        let mut r = PacketReader::new(data);
        let count = r.u32_le()?;
        let has_transport = r.u8()? != 0;

        let mut created: HashMap<u64, TypeId> = HashMap::new();
        let mut blocks = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count {
            let kind = r.u8()?;
            let block = match kind {
                BLOCK_VALUES => {
                    let guid = r.packed_guid()?;
                    let type_id = created
                        .get(&guid)
                        .copied()
                        .or_else(|| resolve(guid))
                        .ok_or(UpdateError::UnknownObject(guid))?;
                    UpdateBlock::Values { guid, fields: FieldValues::decode(&mut r, type_id)? }
                }
                BLOCK_CREATE_OBJECT | BLOCK_CREATE_OBJECT_SELF => {
                    let block = CreateBlock::decode(&mut r, kind == BLOCK_CREATE_OBJECT_SELF)?;
                    created.insert(block.guid, block.type_id);
                    if kind == BLOCK_CREATE_OBJECT_SELF {
                        UpdateBlock::CreateObjectSelf(block)
                    } else {
                        UpdateBlock::CreateObject(block)
                    }
                }
                BLOCK_OUT_OF_RANGE => {
                    let n = r.u32_le()?;
                    let mut guids = Vec::with_capacity(n.min(256) as usize);
                    for _ in 0..n {
                        guids.push(r.packed_guid()?);
                    }
                    UpdateBlock::OutOfRange(guids)
                }
                BLOCK_MOVEMENT | BLOCK_NEAR_OBJECTS => {
                    return Err(UpdateError::UnsupportedBlockKind(kind))
                }
                other => return Err(UpdateError::UnknownBlockKind(other)),
            };
            blocks.push(block);
        }

        if r.remaining() != 0 {
            return Err(UpdateError::TrailingBytes(r.remaining()));
        }
        Ok(Self { has_transport, blocks })
    }
}

/// Chooses plain or compressed framing for an encoded update payload.
/// Returns the opcode to send it under.
pub fn pack_update(payload: Vec<u8>, threshold: usize) -> Result<(u16, Vec<u8>), UpdateError> {
    if payload.len() <= threshold {
        return Ok((SMSG_UPDATE_OBJECT, payload));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&payload)
        .map_err(|e| UpdateError::Compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| UpdateError::Compression(e.to_string()))?;

    let mut out = Vec::with_capacity(4 + compressed.len());
    out.put_u32_le(payload.len() as u32);
    out.extend_from_slice(&compressed);
    Ok((SMSG_COMPRESSED_UPDATE_OBJECT, out))
}

/// Inflates an `SMSG_COMPRESSED_UPDATE_OBJECT` payload.
pub fn unpack_compressed(payload: &[u8]) -> Result<Vec<u8>, UpdateError> {
    let mut r = PacketReader::new(payload);
    let size = r.u32_le()? as usize;
    // the declared size is untrusted; read one byte past it to catch overruns
    let mut out = Vec::with_capacity(size.min(payload.len().saturating_mul(4)));
    ZlibDecoder::new(&payload[4..])
        .take(size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| UpdateError::Compression(e.to_string()))?;
    if out.len() != size {
        return Err(UpdateError::Compression(format!(
            "inflated {} bytes, header declared {}",
            out.len(),
            size
        )));
    }
    Ok(out)
}
