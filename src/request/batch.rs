// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use crate::kv::{Key, KvPair, Value};
use crate::region::Region;
use crate::transport::{BatchRequest, RegionContext};

/// A dispatch unit: keys (and, on write paths, parallel values) all bound
/// for one region.
///
/// Batches hold at most `max_count` entries and at most `max_bytes`
/// summed key and value bytes, except that a single entry larger than the
/// byte budget forms a batch of its own.
#[derive(Clone, Debug)]
pub struct Batch {
    region: Region,
    keys: Vec<Key>,
    values: Option<Vec<Value>>,
}

impl Batch {
    pub fn new(region: Region, keys: Vec<Key>, values: Option<Vec<Value>>) -> Batch {
        debug_assert!(values.as_ref().map_or(true, |v| v.len() == keys.len()));
        debug_assert!(keys.iter().all(|k| region.contains(k)));
        Batch {
            region,
            keys,
            values,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Summed key bytes, plus value bytes when present.
    pub fn bytes(&self) -> usize {
        let key_bytes: usize = self.keys.iter().map(Key::len).sum();
        let value_bytes: usize = self
            .values
            .iter()
            .flatten()
            .map(Value::len)
            .sum();
        key_bytes + value_bytes
    }

    /// The wire request for this batch, stamped with the routing identity
    /// of the attempt about to be made.
    pub(crate) fn request(&self, context: RegionContext) -> BatchRequest {
        match &self.values {
            None => BatchRequest::Get {
                context,
                keys: self.keys.clone(),
            },
            Some(values) => BatchRequest::Put {
                context,
                pairs: self
                    .keys
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .map(|(k, v)| KvPair(k, v))
                    .collect(),
            },
        }
    }
}

/// Extends `out` with batches partitioning `keys` (and parallel `values`)
/// in order.
///
/// The first entry that would overflow either budget terminates the
/// current batch and starts the next one; an entry that alone exceeds
/// `max_bytes` still ships, as a singleton batch. Concatenating the
/// produced batches reproduces the input order. Empty input is a no-op.
pub fn append_batches(
    out: &mut Vec<Batch>,
    region: &Region,
    keys: Vec<Key>,
    values: Option<Vec<Value>>,
    max_bytes: usize,
    max_count: usize,
) {
    debug_assert!(values.as_ref().map_or(true, |v| v.len() == keys.len()));
    let has_values = values.is_some();
    let entries: Vec<(Key, Option<Value>)> = match values {
        Some(values) => keys.into_iter().zip(values.into_iter().map(Some)).collect(),
        None => keys.into_iter().map(|k| (k, None)).collect(),
    };

    let mut current: Vec<(Key, Option<Value>)> = Vec::new();
    let mut current_bytes = 0usize;
    for entry in entries {
        let entry_bytes = entry.0.len() + entry.1.as_ref().map_or(0, Value::len);
        if !current.is_empty()
            && (current.len() >= max_count || current_bytes + entry_bytes > max_bytes)
        {
            flush(out, region, &mut current, has_values);
            current_bytes = 0;
        }
        current_bytes += entry_bytes;
        current.push(entry);
    }
    flush(out, region, &mut current, has_values);
}

fn flush(
    out: &mut Vec<Batch>,
    region: &Region,
    current: &mut Vec<(Key, Option<Value>)>,
    has_values: bool,
) {
    if current.is_empty() {
        return;
    }
    let (keys, values): (Vec<Key>, Vec<Option<Value>>) = current.drain(..).unzip();
    let values = if has_values {
        Some(values.into_iter().flatten().collect())
    } else {
        None
    };
    out.push(Batch::new(region.clone(), keys, values));
}
