//! The control-message envelope exchanged inside framed (`0x1`) payloads.
//! A plain tagged enum serialized as self-describing JSON, so any peer can
//! decode any variant without a separate registration step.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    StoreFile {
        owner_id: String,
        hashed_key: String,
        size: u64,
    },
    GetFile {
        owner_id: String,
        hashed_key: String,
    },
    DeleteFile {
        owner_id: String,
        hashed_key: String,
    },
}

impl ControlMessage {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_file_round_trips() {
        let msg = ControlMessage::StoreFile {
            owner_id: "node-a".into(),
            hashed_key: "abcd1234".into(),
            size: 4112,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn get_file_round_trips() {
        let msg = ControlMessage::GetFile {
            owner_id: "node-b".into(),
            hashed_key: "deadbeef".into(),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        assert!(ControlMessage::decode(b"not json").is_err());
    }
}
