// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

//! Key and value types routed by this crate.

use std::fmt;

mod key;
mod kvpair;
mod value;

pub use key::Key;
pub use kvpair::KvPair;
pub use value::Value;

struct HexRepr<'a>(pub &'a [u8]);

impl<'a> fmt::Display for HexRepr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
