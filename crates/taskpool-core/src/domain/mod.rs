//! Domain model (keys, records, errors, ids).

pub mod errors;
pub mod ids;
pub mod key;
pub mod record;

pub use self::errors::{CodecError, ErrorKind, GetterError, InsertError, LoadError, StoreError};
pub use self::ids::PoolId;
pub use self::key::{CanonicalKey, KEY_SEPARATOR, Namespace, NamespaceError};
pub use self::record::{CompletedTask, FailedTask, LedgerRecord, PendingTask, RecordKind};
