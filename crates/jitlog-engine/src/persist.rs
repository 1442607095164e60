//! Session snapshots.
//!
//! A snapshot is the frozen index as JSON: ordered histories with their
//! tasks, inline trees, flags and attached deopts, plus unresolved deopts
//! and printed assembly that never found its task.
//! Loading one gives back an index equal to the one that was saved.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asm::AssemblyMethod;
use crate::history::{FrozenIndex, MethodHistory};
use crate::model::{CodeCacheSample, DeoptEvent, LogHeader};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub histories: Vec<MethodHistory>,
    pub orphan_deopts: Vec<DeoptEvent>,
    #[serde(default)]
    pub code_cache: Vec<CodeCacheSample>,
    #[serde(default)]
    pub headers: Vec<LogHeader>,
    #[serde(default)]
    pub dropped_deopts: u64,
    #[serde(default)]
    pub orphan_assemblies: Vec<AssemblyMethod>,
}

impl Snapshot {
    pub fn from_index(index: &FrozenIndex) -> Snapshot {
        Snapshot {
            format_version: SNAPSHOT_VERSION,
            histories: index.histories().cloned().collect(),
            orphan_deopts: index.orphan_deopts().to_vec(),
            code_cache: index.code_cache().to_vec(),
            headers: index.headers().to_vec(),
            dropped_deopts: index.dropped_deopts(),
            orphan_assemblies: index.orphan_assemblies().to_vec(),
        }
    }

    pub fn into_index(self) -> FrozenIndex {
        FrozenIndex::from_parts(
            self.histories,
            self.orphan_deopts,
            self.code_cache,
            self.headers,
            self.dropped_deopts,
            self.orphan_assemblies,
        )
    }

    pub fn write_to(&self, writer: impl Write) -> Result<(), PersistError> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn read_from(reader: impl Read) -> Result<Snapshot, PersistError> {
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        if snapshot.format_version != SNAPSHOT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: snapshot.format_version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

pub fn save(index: &FrozenIndex, path: &Path) -> Result<(), PersistError> {
    let mut writer = BufWriter::new(File::create(path)?);
    Snapshot::from_index(index).write_to(&mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn load(path: &Path) -> Result<FrozenIndex, PersistError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(Snapshot::read_from(reader)?.into_index())
}
