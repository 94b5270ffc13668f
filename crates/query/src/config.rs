// Copyright 2015-2018 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration of a view, the unit queries are answered in

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;

use crate::access::Access;
use crate::error::ConfigError;
use crate::pool::MAX_NAME_WIRE_LENGTH;

static DEFAULT_VIEW_NAME: &str = "_default";
static DEFAULT_RECURSIVE_CLIENTS: usize = 1000;
static DEFAULT_POOL_BLOCK_SIZE: usize = 1024;
static DEFAULT_POOL_MAX_BLOCKS: usize = 64;

/// View configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewConfig {
    /// Name of the view, used in logs
    pub name: String,
    /// Offer recursion to clients in `allow_recursion`
    pub recursion: bool,
    /// Number of queries that may be recursing at the same time
    pub recursive_clients: usize,
    /// Additional data may come from authoritative zones other than the one answering
    pub additional_from_auth: bool,
    /// Additional data, and answers, may come from the cache
    pub additional_from_cache: bool,
    /// Set the authoritative flag on NXDOMAIN responses even when not authoritative
    pub auth_nxdomain: bool,
    /// Log every accepted question at info level
    pub log_queries: bool,
    /// Networks which may query this view, all when absent
    pub allow_query: Option<Vec<IpNet>>,
    /// Networks which may recurse through this view, all when absent
    pub allow_recursion: Option<Vec<IpNet>>,
    /// Preferred address ordering per client network
    pub sortlist: Vec<SortListEntry>,
    /// Per-query memory limits
    pub pool: PoolConfig,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_VIEW_NAME.to_string(),
            recursion: true,
            recursive_clients: DEFAULT_RECURSIVE_CLIENTS,
            additional_from_auth: true,
            additional_from_cache: true,
            auth_nxdomain: false,
            log_queries: false,
            allow_query: None,
            allow_recursion: None,
            sortlist: Vec::new(),
            pool: PoolConfig::default(),
        }
    }
}

impl ViewConfig {
    /// Read the configuration from a TOML document
    #[cfg(feature = "toml")]
    #[cfg_attr(docsrs, doc(cfg(feature = "toml")))]
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values which deserialize but make no sense
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.block_size < MAX_NAME_WIRE_LENGTH {
            return Err(ConfigError::Value(
                "pool.block_size",
                format!(
                    "{} is smaller than a maximum length name ({MAX_NAME_WIRE_LENGTH})",
                    self.pool.block_size
                ),
            ));
        }

        if self.pool.max_blocks == 0 {
            return Err(ConfigError::Value("pool.max_blocks", "0".to_string()));
        }

        Ok(())
    }

    /// The allow-query list, `None` when everyone may query
    pub fn query_acl(&self) -> Option<Access> {
        self.allow_query
            .as_ref()
            .map(|networks| Access::from_networks(networks.iter().copied()))
    }

    /// The allow-recursion list, `None` when everyone may recurse
    pub fn recursion_acl(&self) -> Option<Access> {
        self.allow_recursion
            .as_ref()
            .map(|networks| Access::from_networks(networks.iter().copied()))
    }
}

/// One entry of the sort list
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortListEntry {
    /// Clients this entry applies to
    pub clients: Vec<IpNet>,
    /// Address networks in order of preference
    pub preferred: Vec<IpNet>,
}

/// Limits on the memory a single query may hold
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Size of each block names are carved from
    pub block_size: usize,
    /// Blocks a query may allocate before failing
    pub max_blocks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_POOL_BLOCK_SIZE,
            max_blocks: DEFAULT_POOL_MAX_BLOCKS,
        }
    }
}

/// Address ordering applied to one response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortOrder {
    preferred: Vec<IpNet>,
}

impl SortOrder {
    /// Position of the first preferred network containing `ip`; unmatched addresses sort last
    pub fn rank(&self, ip: IpAddr) -> usize {
        self.preferred
            .iter()
            .position(|net| net.contains(&ip))
            .unwrap_or(self.preferred.len())
    }
}

/// Finds the sort order for a client, first matching entry wins
pub(crate) fn sort_order_for(sortlist: &[SortListEntry], client: IpAddr) -> Option<SortOrder> {
    sortlist
        .iter()
        .find(|entry| entry.clients.iter().any(|net| net.contains(&client)))
        .map(|entry| SortOrder {
            preferred: entry.preferred.clone(),
        })
}
