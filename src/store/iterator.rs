//! Key enumeration
//!
//! Lazy iterator over the live keys of a store, in directory order.

use std::collections::btree_map;

use crate::directory::KeyDescriptor;

/// Iterator over live keys
///
/// Borrows the store, so no put or delete can run while it is alive.
pub struct Keys<'a> {
    inner: btree_map::Values<'a, u32, KeyDescriptor>,
}

impl<'a> Keys<'a> {
    pub(super) fn new(inner: btree_map::Values<'a, u32, KeyDescriptor>) -> Self {
        Self { inner }
    }
}

impl<'a> Iterator for Keys<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find(|d| !d.deleted)
            .map(|d| d.key.as_slice())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}
