//! Listing iterator
//!
//! Holds the key list captured when `list` was called and looks each key up
//! again as it is consumed. Keys deleted in the meantime are skipped.

use std::sync::Arc;

use super::bucket::BucketCore;
use super::object_from_entry;
use crate::storage::Object;

pub struct LazyObjectIter {
    bucket: String,
    core: Arc<BucketCore>,
    keys: std::vec::IntoIter<String>,
}

impl LazyObjectIter {
    pub(crate) fn new(bucket: &str, core: Arc<BucketCore>, keys: Vec<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            core,
            keys: keys.into_iter(),
        }
    }
}

impl Iterator for LazyObjectIter {
    type Item = Object;

    fn next(&mut self) -> Option<Object> {
        for key in self.keys.by_ref() {
            if let Some(entry) = self.core.index.get(&key) {
                return Some(object_from_entry(&self.bucket, &key, &entry));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}
