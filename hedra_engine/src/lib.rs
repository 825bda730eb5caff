// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Some useful re-exports
pub mod prelude;

/// Interior mutability aliases used by the mesh containers
pub mod sync;

/// The halfedge graph data structure, edit operations and the CSG engine
pub mod mesh;

#[cfg(test)]
mod engine_tests;
