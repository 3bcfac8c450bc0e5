//! Four-character record and subrecord tags
//!
//! A [`Tag`] is stored as the little-endian `u32` of its four bytes, which makes
//! the mapping between tags and integer codes total and bijective. Unknown
//! tags keep their bytes and print them back verbatim.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A four-byte ASCII tag identifying a record or subrecord kind
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u32);

impl Tag {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Tag(u32::from_le_bytes(bytes))
    }

    pub const fn from_code(code: u32) -> Self {
        Tag(code)
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Whether every byte is printable ASCII
    pub fn is_printable(self) -> bool {
        self.bytes().iter().all(|b| b.is_ascii_graphic() || *b == b' ')
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self)
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s.as_bytes().try_into().map_err(|_| Error::Malformed {
            context: "tag",
            message: format!("expected 4 bytes, got {:?}", s),
        })?;
        Ok(Tag::new(bytes))
    }
}

impl From<[u8; 4]> for Tag {
    fn from(bytes: [u8; 4]) -> Self {
        Tag::new(bytes)
    }
}

// Record tags
pub const TES3: Tag = Tag::new(*b"TES3");
pub const GMST: Tag = Tag::new(*b"GMST");
pub const GLOB: Tag = Tag::new(*b"GLOB");
pub const CLAS: Tag = Tag::new(*b"CLAS");
pub const FACT: Tag = Tag::new(*b"FACT");
pub const RACE: Tag = Tag::new(*b"RACE");
pub const SOUN: Tag = Tag::new(*b"SOUN");
pub const SKIL: Tag = Tag::new(*b"SKIL");
pub const MGEF: Tag = Tag::new(*b"MGEF");
pub const SCPT: Tag = Tag::new(*b"SCPT");
pub const REGN: Tag = Tag::new(*b"REGN");
pub const BSGN: Tag = Tag::new(*b"BSGN");
pub const LTEX: Tag = Tag::new(*b"LTEX");
pub const STAT: Tag = Tag::new(*b"STAT");
pub const DOOR: Tag = Tag::new(*b"DOOR");
pub const MISC: Tag = Tag::new(*b"MISC");
pub const WEAP: Tag = Tag::new(*b"WEAP");
pub const CONT: Tag = Tag::new(*b"CONT");
pub const SPEL: Tag = Tag::new(*b"SPEL");
pub const CREA: Tag = Tag::new(*b"CREA");
pub const BODY: Tag = Tag::new(*b"BODY");
pub const LIGH: Tag = Tag::new(*b"LIGH");
pub const ENCH: Tag = Tag::new(*b"ENCH");
pub const NPC_: Tag = Tag::new(*b"NPC_");
pub const ARMO: Tag = Tag::new(*b"ARMO");
pub const CLOT: Tag = Tag::new(*b"CLOT");
pub const REPA: Tag = Tag::new(*b"REPA");
pub const ACTI: Tag = Tag::new(*b"ACTI");
pub const APPA: Tag = Tag::new(*b"APPA");
pub const LOCK: Tag = Tag::new(*b"LOCK");
pub const PROB: Tag = Tag::new(*b"PROB");
pub const INGR: Tag = Tag::new(*b"INGR");
pub const BOOK: Tag = Tag::new(*b"BOOK");
pub const ALCH: Tag = Tag::new(*b"ALCH");
pub const LEVI: Tag = Tag::new(*b"LEVI");
pub const LEVC: Tag = Tag::new(*b"LEVC");
pub const CELL: Tag = Tag::new(*b"CELL");
pub const LAND: Tag = Tag::new(*b"LAND");
pub const PGRD: Tag = Tag::new(*b"PGRD");
pub const SNDG: Tag = Tag::new(*b"SNDG");
pub const DIAL: Tag = Tag::new(*b"DIAL");
pub const INFO: Tag = Tag::new(*b"INFO");
pub const SSCR: Tag = Tag::new(*b"SSCR");

// Subrecord tags
pub const HEDR: Tag = Tag::new(*b"HEDR");
pub const MAST: Tag = Tag::new(*b"MAST");
pub const DATA: Tag = Tag::new(*b"DATA");
pub const NAME: Tag = Tag::new(*b"NAME");
pub const SCHD: Tag = Tag::new(*b"SCHD");
pub const SCVR: Tag = Tag::new(*b"SCVR");
pub const SCDT: Tag = Tag::new(*b"SCDT");
pub const SCTX: Tag = Tag::new(*b"SCTX");
/// Deletion sentinel shared by every record type
pub const DELE: Tag = Tag::new(*b"DELE");

/// Human-readable names for record tags, keyed by tag code
static RECORD_NAMES: phf::Map<u32, &'static str> = phf::phf_map! {
    0x3353_4554u32 => "file header",
    0x5453_4d47u32 => "game setting",
    0x424f_4c47u32 => "global variable",
    0x5341_4c43u32 => "class",
    0x5443_4146u32 => "faction",
    0x4543_4152u32 => "race",
    0x4e55_4f53u32 => "sound",
    0x4c49_4b53u32 => "skill",
    0x4645_474du32 => "magic effect",
    0x5450_4353u32 => "script",
    0x4e47_4552u32 => "region",
    0x4e47_5342u32 => "birthsign",
    0x5845_544cu32 => "land texture",
    0x5441_5453u32 => "static",
    0x524f_4f44u32 => "door",
    0x4353_494du32 => "misc item",
    0x5041_4557u32 => "weapon",
    0x544e_4f43u32 => "container",
    0x4c45_5053u32 => "spell",
    0x4145_5243u32 => "creature",
    0x5944_4f42u32 => "body part",
    0x4847_494cu32 => "light",
    0x4843_4e45u32 => "enchantment",
    0x5f43_504eu32 => "npc",
    0x4f4d_5241u32 => "armor",
    0x544f_4c43u32 => "clothing",
    0x4150_4552u32 => "repair item",
    0x4954_4341u32 => "activator",
    0x4150_5041u32 => "apparatus",
    0x4b43_4f4cu32 => "lockpick",
    0x424f_5250u32 => "probe",
    0x5247_4e49u32 => "ingredient",
    0x4b4f_4f42u32 => "book",
    0x4843_4c41u32 => "potion",
    0x4956_454cu32 => "leveled item",
    0x4356_454cu32 => "leveled creature",
    0x4c4c_4543u32 => "cell",
    0x444e_414cu32 => "landscape",
    0x4452_4750u32 => "path grid",
    0x4744_4e53u32 => "sound generator",
    0x4c41_4944u32 => "dialogue topic",
    0x4f46_4e49u32 => "dialogue response",
    0x5243_5353u32 => "start script",
};

/// Describe a known record tag
pub fn describe(tag: Tag) -> Option<&'static str> {
    RECORD_NAMES.get(&tag.code()).copied()
}
