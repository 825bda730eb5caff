// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ops::Index;

use slotmap::{SecondaryMap, SlotMap};

/// A compact mapping from mesh ids to consecutive `u32` indices, in arena
/// iteration order. Used when flattening a mesh into index buffers or text
/// formats.
pub struct MeshMapping<K: slotmap::Key>(pub SecondaryMap<K, u32>);

impl<K: slotmap::Key> Index<K> for MeshMapping<K> {
    type Output = u32;
    fn index(&self, index: K) -> &Self::Output {
        &self.0[index]
    }
}

impl<K: slotmap::Key> MeshMapping<K> {
    pub fn new<V>(arena: &SlotMap<K, V>) -> Self {
        let mut mapping = SecondaryMap::new();
        for (i, (k, _)) in arena.iter().enumerate() {
            mapping.insert(k, i as u32);
        }
        Self(mapping)
    }

    pub fn map_seq(&self, seq: &[K]) -> Vec<u32> {
        seq.iter().map(|x| self[*x]).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
