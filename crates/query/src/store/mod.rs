// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! In-memory implementations of the zone table and of zone and cache databases

mod catalog;
mod in_memory;

pub use self::catalog::ZoneCatalog;
pub use self::in_memory::InMemoryDatabase;
