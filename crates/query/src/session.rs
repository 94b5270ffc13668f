// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The client session a query arrives on

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{QueryError, QueryResult};

/// The client-facing side of a query
pub trait Session: Send + Sync {
    /// Address of the client
    fn peer(&self) -> SocketAddr;

    /// True if this session will go away after the current request, so it holds no listener
    fn is_mortal(&self) -> bool;

    /// Arranges for a fresh session to take over listening for new requests
    ///
    /// After this returns successfully the session is mortal.
    fn replace(&self) -> QueryResult<()>;

    /// Cancelled when the session is being torn down
    fn shutdown_signal(&self) -> &CancellationToken;

    /// True once shutdown was signalled
    fn is_shutting_down(&self) -> bool {
        self.shutdown_signal().is_cancelled()
    }
}

/// Request to start a new listening session, sent when a session is replaced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Replacement {
    /// The peer of the session which gave up listening
    pub replaced_peer: SocketAddr,
}

/// A session driven by a listener which can spawn replacements
#[derive(Debug)]
pub struct ClientSession {
    peer: SocketAddr,
    mortal: AtomicBool,
    listener: Option<mpsc::Sender<Replacement>>,
    shutdown: CancellationToken,
}

impl ClientSession {
    /// A listening session; replacements are requested through `listener`
    pub fn new(peer: SocketAddr, listener: mpsc::Sender<Replacement>) -> Self {
        Self {
            peer,
            mortal: AtomicBool::new(false),
            listener: Some(listener),
            shutdown: CancellationToken::new(),
        }
    }

    /// A session which only serves the current request
    pub fn mortal(peer: SocketAddr) -> Self {
        Self {
            peer,
            mortal: AtomicBool::new(true),
            listener: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Signals shutdown to any query running on this session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Session for ClientSession {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn is_mortal(&self) -> bool {
        self.mortal.load(Ordering::Acquire)
    }

    fn replace(&self) -> QueryResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| QueryError::server_failure("session has no listener"))?;

        listener
            .try_send(Replacement {
                replaced_peer: self.peer,
            })
            .map_err(|e| {
                debug!(peer = %self.peer, "could not request a replacement session: {e}");
                QueryError::server_failure("no replacement session available")
            })?;

        self.mortal.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown_signal(&self) -> &CancellationToken {
        &self.shutdown
    }
}
