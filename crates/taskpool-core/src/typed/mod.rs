//! Typed - 型付き API
//!
//! TaskPool は key / value の型でパラメータ化され、
//! 計算本体（Getter）とシリアライズ形式（Codec）を差し替えられる。

pub mod codec;
pub mod getter;

pub use self::codec::{Codec, JsonCodec};
pub use self::getter::{FnGetter, Getter};
