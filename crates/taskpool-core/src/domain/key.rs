//! Namespaces and canonical keys.
//!
//! A canonical key is `<namespace>-<canonical serialized input>`. Namespaces may not
//! contain the separator, so the first `-` of any key always ends the namespace and
//! `"<namespace>-"` selects exactly one getter's rows.

use std::fmt;

use serde::Serialize;

use crate::domain::errors::CodecError;
use crate::typed::Codec;

pub const KEY_SEPARATOR: char = '-';

/// Stable, caller-chosen identity of a getter.
///
/// Changing it orphans every row written under the old value; the reaper removes
/// them once they age past the retention window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("namespace must not be empty")]
    Empty,

    #[error("namespace '{0}' must not contain '-'")]
    ContainsSeparator(String),
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self, NamespaceError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NamespaceError::Empty);
        }
        if name.contains(KEY_SEPARATOR) {
            return Err(NamespaceError::ContainsSeparator(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every canonical key in this namespace.
    pub fn key_prefix(&self) -> String {
        format!("{}{}", self.0, KEY_SEPARATOR)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace-qualified, deterministically serialized identity of a (getter, input) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn new<K, C>(namespace: &Namespace, input: &K, codec: &C) -> Result<Self, CodecError>
    where
        K: Serialize + ?Sized,
        C: Codec,
    {
        let encoded = codec.encode_key(input)?;
        Ok(Self(format!(
            "{}{}{}",
            namespace.as_str(),
            KEY_SEPARATOR,
            encoded
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;
    use serde::Serialize;

    use super::*;
    use crate::typed::JsonCodec;

    #[derive(Serialize)]
    struct SlowInput {
        id: String,
    }

    #[rstest]
    #[case("reverse", true)]
    #[case("svc.lookup_user.v1", true)]
    #[case("", false)]
    #[case("with-dash", false)]
    fn namespace_validation(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(Namespace::new(name).is_ok(), ok);
    }

    #[test]
    fn same_input_gives_identical_key() {
        let ns = Namespace::new("slow").unwrap();
        let a = CanonicalKey::new(&ns, &SlowInput { id: "7".into() }, &JsonCodec).unwrap();
        let b = CanonicalKey::new(&ns, &SlowInput { id: "7".into() }, &JsonCodec).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), r#"slow-{"id":"7"}"#);
    }

    #[test]
    fn map_order_does_not_change_key() {
        let ns = Namespace::new("maps").unwrap();
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }
        let a = CanonicalKey::new(&ns, &first, &JsonCodec).unwrap();
        let b = CanonicalKey::new(&ns, &second, &JsonCodec).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn namespaces_never_collide() {
        let a = Namespace::new("a").unwrap();
        let ab = Namespace::new("ab").unwrap();
        let key_a = CanonicalKey::new(&a, &"x", &JsonCodec).unwrap();
        let key_ab = CanonicalKey::new(&ab, &"x", &JsonCodec).unwrap();

        assert_ne!(key_a, key_ab);
        assert!(key_a.as_str().starts_with(&a.key_prefix()));
        assert!(!key_ab.as_str().starts_with(&a.key_prefix()));
    }

    #[test]
    fn negative_numbers_keep_the_first_separator() {
        let ns = Namespace::new("n").unwrap();
        let key = CanonicalKey::new(&ns, &-1, &JsonCodec).unwrap();
        assert_eq!(key.as_str(), "n--1");
        assert_eq!(key.as_str().split_once(KEY_SEPARATOR), Some(("n", "-1")));
    }

    #[test]
    fn unencodable_input_is_rejected() {
        let ns = Namespace::new("floats").unwrap();
        assert!(matches!(
            CanonicalKey::new(&ns, &f64::NAN, &JsonCodec),
            Err(CodecError::NonFiniteNumber(_))
        ));

        let mut tuple_keys = HashMap::new();
        tuple_keys.insert((1, 2), "x");
        assert!(matches!(
            CanonicalKey::new(&ns, &tuple_keys, &JsonCodec),
            Err(CodecError::Json(_))
        ));
    }
}
