// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;

use crate::db::{Zone, ZoneTable};
use crate::proto::rr::{LowerName, Name};

/// Set of zones, authorities, served by a view
#[derive(Debug, Default)]
pub struct ZoneCatalog {
    zones: HashMap<LowerName, Zone>,
}

impl ZoneCatalog {
    /// Constructs an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a zone, keyed by its origin
    pub fn upsert(&mut self, zone: Zone) {
        self.zones.insert(LowerName::new(zone.origin()), zone);
    }

    /// Remove a zone from the catalog
    pub fn remove(&mut self, origin: &Name) -> Option<Zone> {
        self.zones.remove(&LowerName::new(origin))
    }

    /// Number of zones
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// True if no zone is served
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    fn find(&self, name: &LowerName) -> Option<&Zone> {
        self.zones.get(name).or_else(|| {
            if name.is_root() {
                None
            } else {
                self.find(&name.base_name())
            }
        })
    }
}

impl ZoneTable for ZoneCatalog {
    fn find_zone(&self, name: &Name, no_exact: bool) -> Option<Zone> {
        let name = LowerName::new(name);
        if !no_exact {
            return self.find(&name).cloned();
        }

        if name.is_root() {
            return None;
        }
        self.find(&name.base_name()).cloned()
    }
}
