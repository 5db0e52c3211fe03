use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use bytes::Buf;

use crate::error::{QuadError, QuadResult};

const INDEX_FILE: &str = "strings.idx";
const DATA_FILE: &str = "strings.dat";

/// Persistent bidirectional `string ↔ u32` mapping shared by every store
/// of one index root.
///
/// Ids are dense and monotonically increasing; they stay stable across
/// process restarts because every interned string is appended to the
/// backing files right away. Reads take a shared lock, interning a new
/// string takes the exclusive one.
pub struct StringTable {
    state: RwLock<State>,
}

struct State {
    ids: HashMap<String, u32>,
    strings: Vec<String>,
    index_file: File,
    data_file: File,
    data_len: u32,
}

impl StringTable {
    /// Opens (or creates) the table under the given directory.
    pub fn open(directory: &Path) -> QuadResult<Self> {
        std::fs::create_dir_all(directory)?;
        let index_path = directory.join(INDEX_FILE);
        let data_path = directory.join(DATA_FILE);

        let mut index_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&index_path)?;
        let mut data_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&data_path)?;

        let mut index_bytes = Vec::new();
        index_file.read_to_end(&mut index_bytes)?;
        let mut data_bytes = Vec::new();
        data_file.read_to_end(&mut data_bytes)?;

        let mut strings = Vec::new();
        let mut ids = HashMap::new();
        let mut offsets = index_bytes.as_slice();
        let mut start = 0_usize;
        while offsets.remaining() >= 4 {
            let end = offsets.get_u32_le() as usize;
            let entry = data_bytes.get(start..end).ok_or_else(|| {
                QuadError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "string table index points past data file",
                ))
            })?;
            let entry = std::str::from_utf8(entry).map_err(|e| {
                QuadError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?;
            ids.insert(entry.to_string(), strings.len() as u32);
            strings.push(entry.to_string());
            start = end;
        }

        let data_len = u32::try_from(data_bytes.len())
            .map_err(|_| QuadError::RecordOverflow("string data length"))?;
        Ok(Self {
            state: RwLock::new(State {
                ids,
                strings,
                index_file,
                data_file,
                data_len,
            }),
        })
    }

    /// The id of `value`, interning and persisting it when unknown.
    pub fn get_id(&self, value: &str) -> QuadResult<u32> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(&id) = state.ids.get(value) {
                return Ok(id);
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have interned the string meanwhile.
        if let Some(&id) = state.ids.get(value) {
            return Ok(id);
        }

        let id = u32::try_from(state.strings.len())
            .map_err(|_| QuadError::RecordOverflow("string id"))?;
        let end = state
            .data_len
            .checked_add(
                u32::try_from(value.len())
                    .map_err(|_| QuadError::RecordOverflow("string length"))?,
            )
            .ok_or(QuadError::RecordOverflow("string data length"))?;

        state.data_file.write_all(value.as_bytes())?;
        state.index_file.write_all(&end.to_le_bytes())?;
        state.data_len = end;
        state.ids.insert(value.to_string(), id);
        state.strings.push(value.to_string());
        Ok(id)
    }

    /// The string interned under `id`.
    pub fn get_string(&self, id: u32) -> QuadResult<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .strings
            .get(id as usize)
            .cloned()
            .ok_or(QuadError::UnknownStringId(id))
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .strings
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
