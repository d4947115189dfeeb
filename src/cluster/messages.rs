//! Invalidation command protocol
//!
//! Defines the unit message type for cache-invalidation traffic. Commands
//! use serde traits for serialization but are serialized differently based
//! on context:
//!
//! - INTERNAL group communication (UDP broadcast): uses bincode for a
//!   compact binary format, symmetric across every node of one deployment
//! - EXTERNAL admin tooling output: uses serde_json for a human-readable
//!   format
//!
//! A command is immutable and short-lived: it is constructed for exactly
//! one send or one receive and never stored.

use std::fmt;

use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::{AllowedEnumVariants, DecodeError};
use bincode::{BorrowDecode, Decode, Encode};
use serde::{Deserialize, Serialize};

/// Opaque cache-entry key carried by an invalidation command.
///
/// Keys vary in concrete type per call site, so the wire encoding is a
/// tagged union: the variant tag travels with the value and decode
/// reconstructs both the key's type and its content. Decode enforces a
/// nesting budget: keys nested deeper than [`CacheKey::MAX_DEPTH`] levels
/// of `Compound` are rejected as a decode error rather than walked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode)]
pub enum CacheKey {
    /// Placeholder for commands that carry no key (whole-region clears)
    None,
    /// UTF-8 text key
    Text(String),
    /// Integer key
    Int(i64),
    /// Raw byte-string key
    Bytes(Vec<u8>),
    /// Composite key built from multiple parts
    Compound(Vec<CacheKey>),
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey::Text(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey::Text(value)
    }
}

impl From<i64> for CacheKey {
    fn from(value: i64) -> Self {
        CacheKey::Int(value)
    }
}

impl From<i32> for CacheKey {
    fn from(value: i32) -> Self {
        CacheKey::Int(value as i64)
    }
}

impl From<u32> for CacheKey {
    fn from(value: u32) -> Self {
        CacheKey::Int(value as i64)
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(value: Vec<u8>) -> Self {
        CacheKey::Bytes(value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::None => write!(f, "(none)"),
            CacheKey::Text(text) => write!(f, "{}", text),
            CacheKey::Int(n) => write!(f, "{}", n),
            CacheKey::Bytes(bytes) => {
                write!(f, "0x")?;
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            CacheKey::Compound(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
        }
    }
}

impl CacheKey {
    /// Deepest `Compound` nesting accepted off the wire
    pub const MAX_DEPTH: usize = 16;

    /// Tag-dispatched decode matching the derived encode layout (u32
    /// variant tag, u64 element count), with a depth budget so one
    /// datagram cannot drive unbounded recursion through nested keys.
    fn decode_nested<D: Decoder>(
        decoder: &mut D,
        remaining_depth: usize,
    ) -> Result<Self, DecodeError> {
        match u32::decode(decoder)? {
            0 => Ok(CacheKey::None),
            1 => Ok(CacheKey::Text(String::decode(decoder)?)),
            2 => Ok(CacheKey::Int(i64::decode(decoder)?)),
            3 => Ok(CacheKey::Bytes(Vec::decode(decoder)?)),
            4 => {
                if remaining_depth == 0 {
                    return Err(DecodeError::Other("compound key nested too deeply"));
                }
                let len = u64::decode(decoder)?;
                let len = usize::try_from(len)
                    .map_err(|_| DecodeError::Other("compound key length out of range"))?;
                let mut parts = Vec::new();
                for _ in 0..len {
                    parts.push(Self::decode_nested(decoder, remaining_depth - 1)?);
                }
                Ok(CacheKey::Compound(parts))
            }
            variant => Err(DecodeError::UnexpectedVariant {
                type_name: "CacheKey",
                allowed: &AllowedEnumVariants::Range { min: 0, max: 4 },
                found: variant,
            }),
        }
    }
}

impl<Context> Decode<Context> for CacheKey {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Self::decode_nested(decoder, Self::MAX_DEPTH)
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for CacheKey {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Self::decode_nested(decoder, Self::MAX_DEPTH)
    }
}

/// The unit of invalidation traffic: one operator code, the cache region
/// it applies to, and the key it targets.
///
/// The operator stays a raw wire code rather than a Rust enum on purpose:
/// a command with a code outside the closed set must survive decode intact
/// and be rejected at dispatch, not abort the receive path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub struct Command {
    /// Wire operator code; the closed set is [`Command::OPT_DELETE_KEY`]
    /// and [`Command::OPT_CLEAR_KEY`]
    pub operator: u8,
    /// Cache region/namespace the command is scoped to
    pub region: String,
    /// Target entry; meaningful only for `OPT_DELETE_KEY`, receivers
    /// ignore it for `OPT_CLEAR_KEY`
    pub key: CacheKey,
}

impl Command {
    /// Evict a single key from a region on every peer
    pub const OPT_DELETE_KEY: u8 = 1;
    /// Clear a whole region on every peer
    pub const OPT_CLEAR_KEY: u8 = 2;

    /// Build a single-key eviction command
    pub fn evict(region: impl Into<String>, key: impl Into<CacheKey>) -> Self {
        Self {
            operator: Self::OPT_DELETE_KEY,
            region: region.into(),
            key: key.into(),
        }
    }

    /// Build a whole-region clear command; the key field carries the
    /// placeholder value and is ignored by receivers
    pub fn clear(region: impl Into<String>) -> Self {
        Self {
            operator: Self::OPT_CLEAR_KEY,
            region: region.into(),
            key: CacheKey::None,
        }
    }

    /// Serialize for INTERNAL group communication (UDP broadcast)
    pub fn encode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        let config = bincode::config::standard().with_big_endian();
        bincode::encode_to_vec(self, config)
    }

    /// Deserialize from INTERNAL group communication (UDP broadcast).
    ///
    /// Empty, truncated and corrupt buffers come back as a decode error,
    /// never a panic, and keys nested deeper than [`CacheKey::MAX_DEPTH`]
    /// are rejected. Trailing bytes after a complete command are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let config = bincode::config::standard().with_big_endian();
        let (command, _) = bincode::decode_from_slice(data, config)?;
        Ok(command)
    }
}
