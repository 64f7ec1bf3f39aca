//! Recognised event signatures.
//!
//! The table is the union of every contract variant the mirror has been
//! pointed at. Topic 0 of a log is the keccak-256 of the canonical signature.

use sha3::{Digest, Keccak256};

use super::abi::Word;

/// How the fields of a signature are laid out across topics and data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `TaskCreated(uint256 id, string content, bool completed, address owner)`
    Created,
    /// `TaskCompleted(uint256 id, bool completed)`
    Completed,
    /// `TaskEdited(uint256 id, string content, address owner)`
    Edited,
    /// `TaskDeleted(uint256 id, address owner)`
    Deleted,
    /// `TaskTransferred(uint256 id, address indexed from, address indexed to)`
    Transferred,
    /// `TaskStatusChanged(uint256 id, uint8 status)`
    StatusChanged,
    /// `TaskCreated(address indexed user, uint256 taskId, string title, uint256 dueDate)`
    UserCreated,
    /// `TaskDeleted(address indexed user, uint256 taskId)`
    UserDeleted,
    /// `TaskToggled(address indexed user, uint256 taskId, bool isDone)`
    UserToggled,
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub name: &'static str,
    pub canonical: &'static str,
    pub layout: Layout,
    /// Number of indexed parameters (topics after topic 0).
    pub indexed: usize,
    /// Number of head words in `data`.
    pub head_words: usize,
}

pub const SIGNATURES: &[Signature] = &[
    Signature {
        name: "TaskCreated",
        canonical: "TaskCreated(uint256,string,bool,address)",
        layout: Layout::Created,
        indexed: 0,
        head_words: 4,
    },
    Signature {
        name: "TaskCompleted",
        canonical: "TaskCompleted(uint256,bool)",
        layout: Layout::Completed,
        indexed: 0,
        head_words: 2,
    },
    Signature {
        name: "TaskEdited",
        canonical: "TaskEdited(uint256,string,address)",
        layout: Layout::Edited,
        indexed: 0,
        head_words: 3,
    },
    Signature {
        name: "TaskDeleted",
        canonical: "TaskDeleted(uint256,address)",
        layout: Layout::Deleted,
        indexed: 0,
        head_words: 2,
    },
    Signature {
        name: "TaskTransferred",
        canonical: "TaskTransferred(uint256,address,address)",
        layout: Layout::Transferred,
        indexed: 2,
        head_words: 1,
    },
    Signature {
        name: "TaskStatusChanged",
        canonical: "TaskStatusChanged(uint256,uint8)",
        layout: Layout::StatusChanged,
        indexed: 0,
        head_words: 2,
    },
    Signature {
        name: "TaskCreated",
        canonical: "TaskCreated(address,uint256,string,uint256)",
        layout: Layout::UserCreated,
        indexed: 1,
        head_words: 3,
    },
    Signature {
        name: "TaskDeleted",
        canonical: "TaskDeleted(address,uint256)",
        layout: Layout::UserDeleted,
        indexed: 1,
        head_words: 1,
    },
    Signature {
        name: "TaskToggled",
        canonical: "TaskToggled(address,uint256,bool)",
        layout: Layout::UserToggled,
        indexed: 1,
        head_words: 2,
    },
];

pub fn topic0(canonical: &str) -> Word {
    Keccak256::digest(canonical.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keccak_matches_known_erc20_topic() {
        assert_eq!(
            hex::encode(topic0("Transfer(address,address,uint256)")),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn topics_are_distinct() {
        let topics: HashSet<Word> = SIGNATURES.iter().map(|s| topic0(s.canonical)).collect();
        assert_eq!(topics.len(), SIGNATURES.len());
    }
}
