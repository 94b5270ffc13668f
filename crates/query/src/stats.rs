// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Counters for the terminal classification of queries

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, Unit};

use crate::proto::rr::Name;

/// How a query ended, as far as statistics are concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryCounter {
    /// Answered with data
    Success,
    /// Answered with a referral
    Referral,
    /// The name does not exist
    NxDomain,
    /// The name exists without data of the type
    NxRrset,
    /// Failed
    Failure,
    /// Handed to the recursive resolver
    Recursion,
}

impl QueryCounter {
    const ALL: [Self; 6] = [
        Self::Success,
        Self::Referral,
        Self::NxDomain,
        Self::NxRrset,
        Self::Failure,
        Self::Recursion,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Label used when exporting the counter
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Referral => "referral",
            Self::NxDomain => "nxdomain",
            Self::NxRrset => "nxrrset",
            Self::Failure => "failure",
            Self::Recursion => "recursion",
        }
    }
}

/// Sink for query statistics, shared by all queries of a view
pub trait QueryStats: Send + Sync {
    /// Count one query, attributed to `zone` when answered from an authoritative zone
    fn increment(&self, counter: QueryCounter, zone: Option<&Name>);
}

/// Counter values at one point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    counts: [u64; 6],
}

impl StatsSnapshot {
    /// Value of `counter`
    pub fn get(&self, counter: QueryCounter) -> u64 {
        self.counts[counter.index()]
    }

    /// Sum of all counters
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// In-process counters, view wide and per zone
#[derive(Debug, Default)]
pub struct AtomicQueryStats {
    totals: [AtomicU64; 6],
    zones: Mutex<HashMap<Name, [u64; 6]>>,
}

impl AtomicQueryStats {
    /// View wide counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        for counter in QueryCounter::ALL {
            snapshot.counts[counter.index()] = self.totals[counter.index()].load(Ordering::Relaxed);
        }
        snapshot
    }

    /// Counters attributed to `zone`
    pub fn zone_snapshot(&self, zone: &Name) -> StatsSnapshot {
        let zones = self.zones.lock().unwrap_or_else(PoisonError::into_inner);
        StatsSnapshot {
            counts: zones.get(zone).copied().unwrap_or_default(),
        }
    }
}

impl QueryStats for AtomicQueryStats {
    fn increment(&self, counter: QueryCounter, zone: Option<&Name>) {
        self.totals[counter.index()].fetch_add(1, Ordering::Relaxed);

        if let Some(zone) = zone {
            let mut zones = self.zones.lock().unwrap_or_else(PoisonError::into_inner);
            zones.entry(zone.clone()).or_default()[counter.index()] += 1;
        }
    }
}

/// Counters exported through the `metrics` facade as `hickory_query_total`
#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
#[derive(Clone, Copy, Debug)]
pub struct MetricsQueryStats {
    view: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsQueryStats {
    /// Counters labelled with the view name
    pub fn new(view: &'static str) -> Self {
        describe_counter!(
            "hickory_query_total",
            Unit::Count,
            "number of queries by terminal classification"
        );
        Self { view }
    }
}

#[cfg(feature = "metrics")]
impl QueryStats for MetricsQueryStats {
    fn increment(&self, counter: QueryCounter, zone: Option<&Name>) {
        let zone = zone.map_or_else(|| "-".to_string(), ToString::to_string);
        counter!(
            "hickory_query_total",
            "view" => self.view,
            "result" => counter.as_str(),
            "zone" => zone
        )
        .increment(1);
    }
}
