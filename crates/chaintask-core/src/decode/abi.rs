//! Minimal ABI reader for event payloads.
//!
//! Only the static types the task contracts emit are supported: `uint256`,
//! `uint8`, `bool`, `address`, plus one dynamic type, `string`.

use chrono::{DateTime, Utc};

use crate::domain::{Address, DecodeError, TaskId, TaskStatus};

pub const WORD: usize = 32;

pub type Word = [u8; WORD];

fn malformed(event: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed {
        event,
        reason: reason.into(),
    }
}

/// The low 8 bytes of a word, or `None` when the upper 24 are not zero.
fn low_u64(word: &Word) -> Option<u64> {
    if word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);
    Some(u64::from_be_bytes(low))
}

pub fn task_id(word: &Word, event: &'static str, field: &'static str) -> Result<TaskId, DecodeError> {
    low_u64(word)
        .and_then(TaskId::new)
        .ok_or(DecodeError::Overflow { event, field })
}

pub fn boolean(word: &Word, event: &'static str) -> Result<bool, DecodeError> {
    match low_u64(word) {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(malformed(event, "bool word is neither 0 nor 1")),
    }
}

pub fn address(word: &Word, event: &'static str) -> Result<Address, DecodeError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(malformed(event, "address word has non-zero padding"));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address::from_bytes(bytes))
}

pub fn status(word: &Word, event: &'static str) -> Result<TaskStatus, DecodeError> {
    low_u64(word)
        .and_then(TaskStatus::from_code)
        .ok_or_else(|| malformed(event, "unknown status code"))
}

/// Unix seconds; zero means "no due date".
pub fn due_date(
    word: &Word,
    event: &'static str,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, DecodeError> {
    let secs = low_u64(word)
        .and_then(|s| i64::try_from(s).ok())
        .ok_or(DecodeError::Overflow { event, field })?;
    if secs == 0 {
        return Ok(None);
    }
    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or(DecodeError::Overflow { event, field })
}

/// Head/tail view over a log's `data`.
pub struct Payload<'a> {
    data: &'a [u8],
    event: &'static str,
}

impl<'a> Payload<'a> {
    /// Fails when `data` cannot hold `head_words` static slots.
    pub fn new(data: &'a [u8], event: &'static str, head_words: usize) -> Result<Self, DecodeError> {
        if data.len() < head_words * WORD {
            return Err(malformed(
                event,
                format!("data has {} bytes, need at least {}", data.len(), head_words * WORD),
            ));
        }
        Ok(Self { data, event })
    }

    fn word_at(&self, offset: usize) -> Result<&'a Word, DecodeError> {
        let end = offset
            .checked_add(WORD)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed(self.event, format!("word at byte {offset} out of bounds")))?;
        self.data[offset..end]
            .try_into()
            .map_err(|_| malformed(self.event, "word slice"))
    }

    pub fn word(&self, slot: usize) -> Result<&'a Word, DecodeError> {
        self.word_at(slot * WORD)
    }

    /// Dynamic `string` whose offset lives in head `slot`.
    pub fn string(&self, slot: usize) -> Result<String, DecodeError> {
        let offset = low_u64(self.word(slot)?)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(|| malformed(self.event, "string offset out of range"))?;
        let len = low_u64(self.word_at(offset)?)
            .and_then(|l| usize::try_from(l).ok())
            .ok_or_else(|| malformed(self.event, "string length out of range"))?;
        let start = offset + WORD;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed(self.event, "string runs past end of data"))?;
        String::from_utf8(self.data[start..end].to_vec())
            .map_err(|_| malformed(self.event, "string is not valid UTF-8"))
    }
}

#[cfg(test)]
pub(crate) mod encode {
    //! Test-side encoder producing the same layout solc emits.

    use super::{WORD, Word};

    pub enum Token<'a> {
        Uint(u128),
        Bool(bool),
        Address([u8; 20]),
        Str(&'a str),
    }

    pub fn uint(value: u128) -> Word {
        let mut w = [0u8; WORD];
        w[16..].copy_from_slice(&value.to_be_bytes());
        w
    }

    pub fn addr(bytes: [u8; 20]) -> Word {
        let mut w = [0u8; WORD];
        w[12..].copy_from_slice(&bytes);
        w
    }

    pub fn data(tokens: &[Token<'_>]) -> Vec<u8> {
        let mut head = Vec::new();
        let mut tail = Vec::new();
        let head_len = tokens.len() * WORD;
        for token in tokens {
            match token {
                Token::Uint(v) => head.extend_from_slice(&uint(*v)),
                Token::Bool(b) => head.extend_from_slice(&uint(u128::from(*b))),
                Token::Address(a) => head.extend_from_slice(&addr(*a)),
                Token::Str(s) => {
                    head.extend_from_slice(&uint((head_len + tail.len()) as u128));
                    tail.extend_from_slice(&uint(s.len() as u128));
                    tail.extend_from_slice(s.as_bytes());
                    let pad = (WORD - s.len() % WORD) % WORD;
                    tail.extend(std::iter::repeat_n(0u8, pad));
                }
            }
        }
        head.extend(tail);
        head
    }
}

#[cfg(test)]
mod tests {
    use super::encode::{Token, addr, data, uint};
    use super::*;
    use rstest::rstest;

    #[test]
    fn reads_static_and_dynamic_fields() {
        let bytes = data(&[Token::Uint(7), Token::Str("buy milk"), Token::Bool(true), Token::Address([0xab; 20])]);
        let payload = Payload::new(&bytes, "TaskCreated", 4).unwrap();
        assert_eq!(task_id(payload.word(0).unwrap(), "TaskCreated", "id").unwrap().get(), 7);
        assert_eq!(payload.string(1).unwrap(), "buy milk");
        assert!(boolean(payload.word(2).unwrap(), "TaskCreated").unwrap());
        assert_eq!(
            address(payload.word(3).unwrap(), "TaskCreated").unwrap().as_str(),
            "0xabababababababababababababababababababab"
        );
    }

    #[test]
    fn empty_string_is_fine() {
        let bytes = data(&[Token::Str("")]);
        assert_eq!(Payload::new(&bytes, "E", 1).unwrap().string(0).unwrap(), "");
    }

    #[rstest]
    #[case::fits(i64::MAX as u128, true)]
    #[case::too_big(i64::MAX as u128 + 1, false)]
    #[case::beyond_u64(u128::MAX, false)]
    fn task_id_range(#[case] value: u128, #[case] ok: bool) {
        assert_eq!(task_id(&uint(value), "E", "id").is_ok(), ok);
    }

    #[test]
    fn rejects_bad_bool_and_padding() {
        assert!(matches!(boolean(&uint(2), "E"), Err(DecodeError::Malformed { .. })));
        let mut dirty = addr([1; 20]);
        dirty[0] = 1;
        assert!(matches!(address(&dirty, "E"), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn rejects_out_of_bounds_string() {
        let mut bytes = data(&[Token::Str("hello")]);
        // length word says 1000 bytes
        bytes[WORD..2 * WORD].copy_from_slice(&uint(1000));
        assert!(Payload::new(&bytes, "E", 1).unwrap().string(0).is_err());

        let bytes = uint(4096).to_vec();
        assert!(Payload::new(&bytes, "E", 1).unwrap().string(0).is_err());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut bytes = data(&[Token::Str("ab")]);
        bytes[2 * WORD] = 0xff;
        assert!(Payload::new(&bytes, "E", 1).unwrap().string(0).is_err());
    }

    #[test]
    fn short_data_is_malformed() {
        assert!(Payload::new(&[0u8; 40], "E", 2).is_err());
    }

    #[test]
    fn zero_due_date_means_none() {
        assert_eq!(due_date(&uint(0), "E", "dueDate").unwrap(), None);
        assert_eq!(
            due_date(&uint(1_700_000_000), "E", "dueDate").unwrap().map(|d| d.timestamp()),
            Some(1_700_000_000)
        );
    }
}
