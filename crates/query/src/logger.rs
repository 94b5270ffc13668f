// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Default logger configuration for the query engine

use std::env;

use tracing::metadata::LevelFilter;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn get_env() -> String {
    env::var("RUST_LOG").unwrap_or_default()
}

fn get_levels(level: Option<Level>) -> String {
    match level {
        Some(level) => {
            let level = level.to_string().to_lowercase();
            format!("hickory_query={level},hickory_proto={level},{}", get_env())
        }
        None => get_env(),
    }
}

/// Appends hickory-query debug to RUST_LOG
pub fn debug() {
    logger(Some(Level::DEBUG));
}

/// Appends hickory-query info to RUST_LOG
pub fn default() {
    logger(Some(Level::INFO));
}

/// Appends hickory-query error to RUST_LOG
pub fn quiet() {
    logger(Some(Level::ERROR));
}

/// Only uses the RUST_LOG environment variable
pub fn env() {
    logger(None);
}

/// Installs a global subscriber; does nothing if one is already installed
fn logger(level: Option<Level>) {
    let filter = match EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .parse(get_levels(level))
    {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("ignoring invalid RUST_LOG: {e}");
            EnvFilter::default()
        }
    };

    let formatter = tracing_subscriber::fmt::layer().compact();

    let _ = tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .try_init();
}
