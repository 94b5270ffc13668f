// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// LIBRARY WARNINGS
#![warn(
    clippy::default_trait_access,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::unimplemented,
    clippy::use_self,
    missing_copy_implementations,
    missing_docs,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    unreachable_pub
)]
#![allow(clippy::single_component_path_imports, clippy::upper_case_acronyms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Hickory DNS query resolution
//!
//! Answers one question for a view: finds the authoritative zone or cache holding the best
//!  data, follows CNAME and DNAME chains, refers clients to delegated zones, hands names it has
//!  no data for to a recursive resolver, and fills the authority and additional sections.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hickory_query::proto::rr::{Name, RecordType};
//! use hickory_query::session::ClientSession;
//! use hickory_query::store::{InMemoryDatabase, ZoneCatalog};
//! use hickory_query::{QueryEngine, Request, ViewConfig, Zone};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let origin = Name::from_ascii("example.com.")?;
//! let mut catalog = ZoneCatalog::new();
//! catalog.upsert(Zone::new(Arc::new(InMemoryDatabase::zone(origin))));
//!
//! let engine = QueryEngine::builder(ViewConfig::default(), Arc::new(catalog)).build()?;
//! let session = Arc::new(ClientSession::mortal("192.0.2.1:53000".parse()?));
//! let request = Request::query(Name::from_ascii("www.example.com.")?, RecordType::A);
//! let response = engine.query(session, request).await?;
//! assert_eq!(response.questions().len(), 1);
//! # Ok(())
//! # }
//! ```

pub use hickory_proto as proto;

pub mod access;
pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "logger")]
#[cfg_attr(docsrs, doc(cfg(feature = "logger")))]
pub mod logger;
pub mod message;
pub mod pool;
mod query;
pub mod rdata;
pub mod resolver;
pub mod session;
pub mod stats;
pub mod store;

pub use self::access::{Access, AclDecision, AclEvaluator};
pub use self::config::ViewConfig;
pub use self::db::{Database, DbVersion, FindCode, FindOptions, Found, Zone, ZoneTable};
pub use self::error::{ConfigError, QueryError, QueryResult};
pub use self::message::{Question, Request, Response, Section, SectionKind};
pub use self::query::{QueryEngine, QueryEngineBuilder, MAX_RESTARTS};
pub use self::rdata::{Rdata, Rdataset, RecordTypeExt, Soa, Trust};

/// Returns the current version of Hickory DNS query
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
