//! Fixed-width binary identifiers for registry entities.
//!
//! Every id is an opaque byte string of a known width. The text form is
//! lowercase hex, which is also the serialized form on the wire and in JSON
//! map keys.

use crate::error::{Result, StateError};
use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $width:expr, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $width]);

        impl $name {
            /// Width of the binary form in bytes.
            pub const SIZE: usize = $width;

            /// Build an id from its binary form.
            pub fn from_binary(bytes: &[u8]) -> Result<Self> {
                let raw: [u8; $width] = bytes.try_into().map_err(|_| StateError::InvalidId {
                    kind: $kind,
                    value: hex::encode(bytes),
                })?;
                Ok(Self(raw))
            }

            /// Parse an id from its hex form.
            pub fn from_hex(text: &str) -> Result<Self> {
                let bytes = hex::decode(text).map_err(|_| StateError::InvalidId {
                    kind: $kind,
                    value: text.to_string(),
                })?;
                Self::from_binary(&bytes).map_err(|_| StateError::InvalidId {
                    kind: $kind,
                    value: text.to_string(),
                })
            }

            /// Generate a random id.
            pub fn from_random() -> Self {
                let mut raw = [0u8; $width];
                rand::rng().fill_bytes(&mut raw);
                Self(raw)
            }

            /// The all-zero id.
            pub fn nil() -> Self {
                Self([0u8; $width])
            }

            pub fn is_nil(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn binary(&self) -> &[u8] {
                &self.0
            }

            pub fn hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = StateError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                struct HexVisitor;

                impl<'de> Visitor<'de> for HexVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        write!(f, "a {}-byte hex {} id", $width, $kind)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<$name, E> {
                        $name::from_hex(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(HexVisitor)
            }
        }
    };
}

define_id!(
    /// Identifies a job (driver session).
    JobId, 4, "job"
);
define_id!(ActorId, 16, "actor");
define_id!(TaskId, 24, "task");
define_id!(PlacementGroupId, 18, "placement group");
define_id!(
    /// Identifies a registered node.
    NodeId, 28, "node"
);
define_id!(
    /// Identifies a worker process.
    WorkerId, 28, "worker"
);

impl JobId {
    /// Build a job id from the registry's monotonically increasing counter.
    pub fn from_int(value: u32) -> Self {
        Self(value.to_le_bytes())
    }

    pub fn to_int(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}
