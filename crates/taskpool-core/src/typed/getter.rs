//! Getter trait - 重い計算（memoize 対象）の定義
//!
//! # 前提
//! - 純粋・冪等であること（lease 期限切れ後の再実行があり得る）
//! - `Send + Sync`: 複数 pod / 複数タスクから同時に呼ばれる
//!
//! 同期関数は `FnGetter` でラップすると `spawn_blocking` 上で実行される。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::GetterError;

/// Getter は key から value を計算する
///
/// # 使用例
/// ```ignore
/// struct ReverseGetter;
///
/// #[async_trait]
/// impl Getter<String, String> for ReverseGetter {
///     async fn get(&self, key: &String) -> Result<String, GetterError> {
///         Ok(key.chars().rev().collect())
///     }
/// }
/// ```
#[async_trait]
pub trait Getter<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    async fn get(&self, key: &K) -> Result<V, GetterError>;
}

/// Adapts a blocking closure into a `Getter`.
pub struct FnGetter<K, V, F> {
    f: Arc<F>,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, F> FnGetter<K, V, F> {
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V, E, F> Getter<K, V> for FnGetter<K, V, F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Into<GetterError>,
    F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<V, GetterError> {
        let f = Arc::clone(&self.f);
        let key = key.clone();
        tokio::task::spawn_blocking(move || f(&key).map_err(Into::into))
            .await
            .map_err(|e| -> GetterError { format!("getter task aborted: {e}").into() })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReverseGetter;

    #[async_trait]
    impl Getter<String, String> for ReverseGetter {
        async fn get(&self, key: &String) -> Result<String, GetterError> {
            Ok(key.chars().rev().collect())
        }
    }

    #[tokio::test]
    async fn async_getter() {
        let getter = ReverseGetter;
        assert_eq!(getter.get(&"abc".to_string()).await.unwrap(), "cba");
    }

    #[tokio::test]
    async fn fn_getter_runs_blocking_closure() {
        let getter = FnGetter::new(|id: &String| id.parse::<i64>());

        assert_eq!(getter.get(&"7".to_string()).await.unwrap(), 7);

        let err = getter.get(&"bad".to_string()).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid digit found in string");
    }

    #[tokio::test]
    async fn fn_getter_is_object_safe() {
        let getter: Arc<dyn Getter<String, usize>> =
            Arc::new(FnGetter::new(|s: &String| Ok::<_, GetterError>(s.len())));
        assert_eq!(getter.get(&"four".to_string()).await.unwrap(), 4);
    }
}
