// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// The half-edge mesh core and the operator engine built on top of it
pub mod halfedge;

/// The CSG boolean engine: an independent polygon-soup representation used
/// only for union / subtract / intersect
pub mod csg;
