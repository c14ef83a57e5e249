//! Errors - エラー型と分類
//!
//! # 層ごとのエラー
//! - `CodecError`: key / value のシリアライズ失敗
//! - `StoreError`: 永続化層の障害（"missing" とは別物）
//! - `InsertError`: create-if-absent の結果（Conflict は排他制御そのもの）
//! - `LoadError`: `TaskPool::load` が呼び出し側に返すエラー

use thiserror::Error;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（DB の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Error returned by a getter.
pub type GetterError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Serialization failure for keys or values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("non-finite number not allowed: {0}")]
    NonFiniteNumber(String),
}

/// Persistence-layer failure.
///
/// `Clone` so a single failed bulk query can be fanned out to every waiter of a batch.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("batch loader dropped the request for key={0}")]
    LoaderClosed(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result of an insert that must not overwrite an existing row.
#[derive(Debug, Error)]
pub enum InsertError {
    #[error("record already exists for key={0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error returned from `TaskPool::load`.
///
/// `CachedFailure` is a replay of a persisted getter failure; `Getter` is a fresh one
/// produced by this very call.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to serialize key: {0}")]
    Serialization(#[source] CodecError),

    #[error("failed to decode stored value for key={key}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("lease for key={key} expired before a result was published")]
    LeaseTimeout { key: String },

    #[error("cached failure: {0}")]
    CachedFailure(String),

    #[error("getter failed: {0}")]
    Getter(#[source] GetterError),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Store(_) => ErrorKind::Infrastructure,
            LoadError::LeaseTimeout { .. } => ErrorKind::Transient,
            LoadError::Serialization(_)
            | LoadError::Deserialization { .. }
            | LoadError::CachedFailure(_)
            | LoadError::Getter(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_cached_failure(&self) -> bool {
        matches!(self, LoadError::CachedFailure(_))
    }

    /// Text of the getter failure, whether replayed or fresh.
    pub fn failure_text(&self) -> Option<String> {
        match self {
            LoadError::CachedFailure(text) => Some(text.clone()),
            LoadError::Getter(err) => Some(err.to_string()),
            _ => None,
        }
    }
}
