//! Persistent node state: magic header followed by a bincode payload.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::native::UserInfo;

const MAGIC: &[u8; 4] = b"CLB1";
const STATE_FILE: &str = "loopback.state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRecord {
    pub user_info: UserInfo,
    pub label: String,
}

/// Everything a node keeps across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(with = "bytes_32")]
    pub secret: [u8; 32],
    pub nospam: u32,
    pub self_info: UserInfo,
    /// Keyed by user id.
    pub friends: BTreeMap<String, FriendRecord>,
}

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not a loopback state file")]
    BadMagic,
    #[error("decode error: {0}")]
    Decode(#[source] bincode::Error),
    #[error("encode error: {0}")]
    Encode(#[source] bincode::Error),
}

pub fn state_path(location: &Path) -> PathBuf {
    location.join(STATE_FILE)
}

pub fn encode(state: &PersistedState) -> Result<Vec<u8>, StoreError> {
    let payload = bincode::serialize(state).map_err(StoreError::Encode)?;
    let mut out = Vec::with_capacity(MAGIC.len() + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<PersistedState, StoreError> {
    let payload = bytes.strip_prefix(MAGIC.as_slice()).ok_or(StoreError::BadMagic)?;
    bincode::deserialize(payload).map_err(StoreError::Decode)
}

/// Load the state under `location`. `Ok(None)` when no state file exists yet.
pub fn load(location: &Path) -> Result<Option<PersistedState>, StoreError> {
    let path = state_path(location);
    match fs::read(&path) {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io { path, source }),
    }
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

/// Write the state under `location`, creating the directory. Replaces the file atomically.
pub fn save(location: &Path, state: &PersistedState) -> Result<(), StoreError> {
    fs::create_dir_all(location).map_err(io(location))?;
    let path = state_path(location);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, encode(state)?).map_err(io(&tmp))?;
    fs::rename(&tmp, &path).map_err(io(&path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        let mut friends = BTreeMap::new();
        friends.insert(
            "peer".to_string(),
            FriendRecord {
                user_info: UserInfo {
                    user_id: "peer".into(),
                    name: "Bob".into(),
                    ..UserInfo::default()
                },
                label: "work".into(),
            },
        );
        PersistedState {
            secret: [9; 32],
            nospam: 42,
            self_info: UserInfo::default(),
            friends,
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("nested/node");
        assert!(load(&location).unwrap().is_none());
        save(&location, &sample()).unwrap();
        assert_eq!(load(&location).unwrap(), Some(sample()));
    }

    #[test]
    fn foreign_file_is_rejected() {
        assert!(matches!(decode(b"nope"), Err(StoreError::BadMagic)));
        let mut bytes = encode(&sample()).unwrap();
        bytes.truncate(10);
        assert!(matches!(decode(&bytes), Err(StoreError::Decode(_))));
    }
}
