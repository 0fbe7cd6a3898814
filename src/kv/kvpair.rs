// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

use derive_new::new;

use super::{Key, Value};

/// A key with its value.
///
/// Read dispatch returns these sorted ascending by key.
#[derive(Default, Clone, Eq, PartialEq, new)]
pub struct KvPair(pub Key, pub Value);

impl KvPair {
    pub fn key(&self) -> &Key {
        &self.0
    }

    pub fn value(&self) -> &Value {
        &self.1
    }

    pub fn into_key(self) -> Key {
        self.0
    }

    pub fn into_inner(self) -> (Key, Value) {
        (self.0, self.1)
    }
}

impl<K, V> From<(K, V)> for KvPair
where
    K: Into<Key>,
    V: Into<Value>,
{
    fn from((k, v): (K, V)) -> KvPair {
        KvPair(k.into(), v.into())
    }
}

impl fmt::Debug for KvPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KvPair({:?}, {:?})", self.0, self.1)
    }
}
