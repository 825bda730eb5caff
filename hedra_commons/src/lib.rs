// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Orderable and hashable wrappers for floating point vectors
pub mod math;

/// Small containers and iterator helpers used across the kernel
pub mod utils;
