//! Remote object identity and the composite index keys derived from it.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a remote object: `{cell, volume, vnode, unique}`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FileId {
    pub cell: u32,
    pub volume: u32,
    pub vnode: u32,
    pub unique: u32,
}

impl FileId {
    pub const fn new(cell: u32, volume: u32, vnode: u32, unique: u32) -> Self {
        FileId {
            cell,
            volume,
            vnode,
            unique,
        }
    }

    /// Root of the given volume; volumes are named by `vnode == 1 && unique == 1`.
    pub const fn volume_root(cell: u32, volume: u32) -> Self {
        FileId::new(cell, volume, 1, 1)
    }

    /// Key in the volume registry.
    pub fn high_index(&self) -> u64 {
        ((self.cell as u64) << 32) | self.volume as u64
    }

    /// Key in a volume's object registry.
    pub fn low_index(&self) -> u64 {
        ((self.vnode as u64) << 32) | self.unique as u64
    }

    pub fn is_volume(&self) -> bool {
        self.vnode == 1 && self.unique == 1
    }

    /// All four fields are populated.
    pub fn is_complete(&self) -> bool {
        self.cell != 0 && self.volume != 0 && self.vnode != 0 && self.unique != 0
    }

    /// A target identity is known once vnode or unique is non-zero.
    pub fn has_target(&self) -> bool {
        self.vnode != 0 || self.unique != 0
    }

    /// Identity of the volume root this object lives in.
    pub fn to_volume_root(&self) -> FileId {
        FileId::volume_root(self.cell, self.volume)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.cell, self.volume, self.vnode, self.unique
        )
    }
}

/// Parses the `cell.volume.vnode.unique` display form.
impl FromStr for FileId {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('.')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CacheError::invalid_parameter(format!("file id {:?}: {}", s, e)))?;
        match parts.as_slice() {
            [cell, volume, vnode, unique] => Ok(FileId::new(*cell, *volume, *vnode, *unique)),
            _ => Err(CacheError::invalid_parameter(format!(
                "file id {:?} must have four fields",
                s
            ))),
        }
    }
}
