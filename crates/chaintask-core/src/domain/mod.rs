//! Domain model (ids, addresses, task and user records, chain events, errors).

pub mod address;
pub mod errors;
pub mod events;
pub mod ids;
pub mod task;
pub mod user;

pub use self::address::{Address, AddressError};
pub use self::errors::{DecodeError, ErrorKind, ReconcileError, StoreError};
pub use self::events::{ChainEvent, DecodedLog, LogPosition};
pub use self::ids::{ParseIdError, SessionId, TaskId, UserId};
pub use self::task::{MetadataPatch, Priority, TaskKey, TaskRecord, TaskStatus};
pub use self::user::{Preferences, UserRecord};
