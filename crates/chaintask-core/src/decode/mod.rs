//! Decode - 生ログ → ChainEvent
//!
//! # 設計原則
//! - 対象コントラクト以外のログ、未知の topic0 は `Ok(None)`（無視）
//! - 既知のシグネチャなのに読めないものは `DecodeError`（再試行しない）
//! - 純粋関数。ストアにも通知にも触らない

pub mod abi;
pub mod signatures;

use std::collections::HashMap;

use crate::domain::{Address, ChainEvent, DecodeError, DecodedLog, LogPosition};
use crate::ports::RawLog;

use self::abi::{Payload, Word};
use self::signatures::{Layout, SIGNATURES, Signature, topic0};

/// Decoder bound to one contract address.
pub struct EventDecoder {
    contract: Address,
    by_topic: HashMap<Word, &'static Signature>,
}

impl EventDecoder {
    pub fn new(contract: Address) -> Self {
        let by_topic = SIGNATURES.iter().map(|s| (topic0(s.canonical), s)).collect();
        Self { contract, by_topic }
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    /// Topic-0 values to subscribe to.
    pub fn topics(&self) -> Vec<Word> {
        SIGNATURES.iter().map(|s| topic0(s.canonical)).collect()
    }

    pub fn decode(&self, log: &RawLog) -> Result<Option<DecodedLog>, DecodeError> {
        if log.address != self.contract {
            return Ok(None);
        }
        let Some(signature) = log.topics.first().and_then(|t| self.by_topic.get(t)) else {
            return Ok(None);
        };
        let event = decode_event(signature, &log.topics[1..], &log.data)?;
        Ok(Some(DecodedLog {
            event,
            position: LogPosition {
                block_number: log.block_number,
                log_index: log.log_index,
                tx_hash: log.tx_hash.clone(),
            },
        }))
    }
}

fn decode_event(sig: &Signature, indexed: &[Word], data: &[u8]) -> Result<ChainEvent, DecodeError> {
    let name = sig.name;
    if indexed.len() != sig.indexed {
        return Err(DecodeError::Malformed {
            event: name,
            reason: format!("expected {} indexed topics, got {}", sig.indexed, indexed.len()),
        });
    }
    let p = Payload::new(data, name, sig.head_words)?;

    let event = match sig.layout {
        Layout::Created => ChainEvent::Created {
            task_id: abi::task_id(p.word(0)?, name, "id")?,
            content: p.string(1)?,
            completed: abi::boolean(p.word(2)?, name)?,
            owner: abi::address(p.word(3)?, name)?,
            due_date: None,
        },
        Layout::Completed => ChainEvent::Completed {
            owner: None,
            task_id: abi::task_id(p.word(0)?, name, "id")?,
            completed: abi::boolean(p.word(1)?, name)?,
        },
        Layout::Edited => ChainEvent::Edited {
            task_id: abi::task_id(p.word(0)?, name, "id")?,
            content: p.string(1)?,
            owner: abi::address(p.word(2)?, name)?,
        },
        Layout::Deleted => ChainEvent::Deleted {
            task_id: abi::task_id(p.word(0)?, name, "id")?,
            owner: abi::address(p.word(1)?, name)?,
        },
        Layout::Transferred => ChainEvent::Transferred {
            task_id: abi::task_id(p.word(0)?, name, "id")?,
            from: abi::address(&indexed[0], name)?,
            to: abi::address(&indexed[1], name)?,
        },
        Layout::StatusChanged => ChainEvent::StatusChanged {
            owner: None,
            task_id: abi::task_id(p.word(0)?, name, "id")?,
            status: abi::status(p.word(1)?, name)?,
        },
        Layout::UserCreated => ChainEvent::Created {
            owner: abi::address(&indexed[0], name)?,
            task_id: abi::task_id(p.word(0)?, name, "taskId")?,
            content: p.string(1)?,
            completed: false,
            due_date: abi::due_date(p.word(2)?, name, "dueDate")?,
        },
        Layout::UserDeleted => ChainEvent::Deleted {
            owner: abi::address(&indexed[0], name)?,
            task_id: abi::task_id(p.word(0)?, name, "taskId")?,
        },
        Layout::UserToggled => ChainEvent::Completed {
            owner: Some(abi::address(&indexed[0], name)?),
            task_id: abi::task_id(p.word(0)?, name, "taskId")?,
            completed: abi::boolean(p.word(1)?, name)?,
        },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::abi::encode::{Token, addr, data, uint};
    use super::*;
    use crate::domain::{TaskId, TaskStatus};

    const CONTRACT: [u8; 20] = [0xc0; 20];
    const ALICE: [u8; 20] = [0xa1; 20];
    const BOB: [u8; 20] = [0xb0; 20];

    fn decoder() -> EventDecoder {
        EventDecoder::new(Address::from_bytes(CONTRACT))
    }

    fn log(canonical: &str, indexed: &[Word], data: Vec<u8>) -> RawLog {
        let mut topics = vec![topic0(canonical)];
        topics.extend_from_slice(indexed);
        RawLog {
            address: Address::from_bytes(CONTRACT),
            topics,
            data,
            block_number: 12,
            log_index: 3,
            tx_hash: "0xfeed".into(),
        }
    }

    fn id(n: u64) -> TaskId {
        TaskId::new(n).unwrap()
    }

    #[test]
    fn decodes_owner_variant_created() {
        let raw = log(
            "TaskCreated(uint256,string,bool,address)",
            &[],
            data(&[Token::Uint(1), Token::Str("buy milk"), Token::Bool(false), Token::Address(ALICE)]),
        );
        let decoded = decoder().decode(&raw).unwrap().unwrap();
        assert_eq!(
            decoded.event,
            ChainEvent::Created {
                owner: Address::from_bytes(ALICE),
                task_id: id(1),
                content: "buy milk".into(),
                completed: false,
                due_date: None,
            }
        );
        assert_eq!(decoded.position.block_number, 12);
        assert_eq!(decoded.position.log_index, 3);
    }

    #[test]
    fn decodes_user_variant_created_with_due_date() {
        let raw = log(
            "TaskCreated(address,uint256,string,uint256)",
            &[addr(ALICE)],
            data(&[Token::Uint(9), Token::Str("pay rent"), Token::Uint(1_700_000_000)]),
        );
        match decoder().decode(&raw).unwrap().unwrap().event {
            ChainEvent::Created { owner, task_id, due_date, completed, .. } => {
                assert_eq!(owner, Address::from_bytes(ALICE));
                assert_eq!(task_id, id(9));
                assert!(!completed);
                assert_eq!(due_date.map(|d| d.timestamp()), Some(1_700_000_000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_id_only_and_owner_scoped_completion() {
        let raw = log("TaskCompleted(uint256,bool)", &[], data(&[Token::Uint(7), Token::Bool(true)]));
        assert_eq!(
            decoder().decode(&raw).unwrap().unwrap().event,
            ChainEvent::Completed { owner: None, task_id: id(7), completed: true }
        );

        let raw = log(
            "TaskToggled(address,uint256,bool)",
            &[addr(BOB)],
            data(&[Token::Uint(7), Token::Bool(false)]),
        );
        assert_eq!(
            decoder().decode(&raw).unwrap().unwrap().event,
            ChainEvent::Completed {
                owner: Some(Address::from_bytes(BOB)),
                task_id: id(7),
                completed: false
            }
        );
    }

    #[test]
    fn decodes_transfer_from_topics() {
        let raw = log(
            "TaskTransferred(uint256,address,address)",
            &[addr(ALICE), addr(BOB)],
            data(&[Token::Uint(5)]),
        );
        assert_eq!(
            decoder().decode(&raw).unwrap().unwrap().event,
            ChainEvent::Transferred {
                task_id: id(5),
                from: Address::from_bytes(ALICE),
                to: Address::from_bytes(BOB),
            }
        );
    }

    #[test]
    fn decodes_status_and_edit_and_delete() {
        let d = decoder();
        let status = log("TaskStatusChanged(uint256,uint8)", &[], data(&[Token::Uint(2), Token::Uint(2)]));
        assert_eq!(
            d.decode(&status).unwrap().unwrap().event,
            ChainEvent::StatusChanged { owner: None, task_id: id(2), status: TaskStatus::OnHold }
        );

        let edited = log(
            "TaskEdited(uint256,string,address)",
            &[],
            data(&[Token::Uint(2), Token::Str("new"), Token::Address(ALICE)]),
        );
        assert_eq!(
            d.decode(&edited).unwrap().unwrap().event,
            ChainEvent::Edited { owner: Address::from_bytes(ALICE), task_id: id(2), content: "new".into() }
        );

        let deleted = log("TaskDeleted(address,uint256)", &[addr(ALICE)], data(&[Token::Uint(2)]));
        assert_eq!(
            d.decode(&deleted).unwrap().unwrap().event,
            ChainEvent::Deleted { owner: Address::from_bytes(ALICE), task_id: id(2) }
        );
    }

    #[test]
    fn ignores_foreign_contract_and_unknown_topic() {
        let d = decoder();
        let mut raw = log("TaskCompleted(uint256,bool)", &[], data(&[Token::Uint(1), Token::Bool(true)]));
        raw.address = Address::from_bytes([0xee; 20]);
        assert_eq!(d.decode(&raw).unwrap(), None);

        let raw = log("Transfer(address,address,uint256)", &[], vec![]);
        assert_eq!(d.decode(&raw).unwrap(), None);

        let mut raw = log("TaskCompleted(uint256,bool)", &[], vec![]);
        raw.topics.clear();
        assert_eq!(d.decode(&raw).unwrap(), None);
    }

    #[test]
    fn overflowing_id_is_rejected() {
        let raw = log(
            "TaskCompleted(uint256,bool)",
            &[],
            data(&[Token::Uint(u128::from(u64::MAX)), Token::Bool(true)]),
        );
        assert_eq!(
            decoder().decode(&raw).unwrap_err(),
            DecodeError::Overflow { event: "TaskCompleted", field: "id" }
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let d = decoder();
        let short = log("TaskCompleted(uint256,bool)", &[], uint(1).to_vec());
        assert!(matches!(d.decode(&short), Err(DecodeError::Malformed { .. })));

        let missing_topic = log("TaskTransferred(uint256,address,address)", &[addr(ALICE)], data(&[Token::Uint(5)]));
        assert!(matches!(d.decode(&missing_topic), Err(DecodeError::Malformed { .. })));

        let bad_status = log("TaskStatusChanged(uint256,uint8)", &[], data(&[Token::Uint(2), Token::Uint(9)]));
        assert!(matches!(d.decode(&bad_status), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn subscribes_to_every_signature() {
        assert_eq!(decoder().topics().len(), SIGNATURES.len());
    }
}
