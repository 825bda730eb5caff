// Copyright (C) 2026 the hedra contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel is single-threaded by design: at most one logical owner
//! mutates a mesh at a time, and no operation suspends or blocks. These
//! aliases keep that choice in a single place so the rest of the code can
//! name the intent rather than the mechanism.

use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

pub type InteriorMutable<T> = RefCell<T>;

pub type RefCounted<T> = Rc<T>;

pub type BorrowedRef<'a, T> = Ref<'a, T>;

pub type MutableRef<'a, T> = RefMut<'a, T>;
