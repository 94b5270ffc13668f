// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-query recycling of name buffers and rdataset handles

use std::fmt;
use std::ops::Deref;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::config::PoolConfig;
use crate::error::{QueryError, QueryResult};
use crate::proto::rr::Name;
use crate::rdata::Rdataset;

/// Longest possible uncompressed domain name on the wire
pub const MAX_NAME_WIRE_LENGTH: usize = 255;

/// Wire length of `name`, uncompressed
pub(crate) fn wire_length(name: &Name) -> usize {
    name.iter().map(|label| label.len() + 1).sum::<usize>() + 1
}

/// A name held by the response, backed by bytes carved out of the query's pool
///
/// The wire bytes outlive the pool entry they came from; they are released when the last
///  reference is dropped.
#[derive(Clone)]
pub struct PooledName {
    name: Name,
    wire: Bytes,
}

impl PooledName {
    /// The uncompressed wire form of the name
    pub fn wire(&self) -> &Bytes {
        &self.wire
    }

    /// The name
    pub fn name(&self) -> &Name {
        &self.name
    }
}

impl Deref for PooledName {
    type Target = Name;

    fn deref(&self) -> &Name {
        &self.name
    }
}

impl fmt::Debug for PooledName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}

impl PartialEq for PooledName {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PooledName {}

/// Scratch space for one name, to be kept or released
#[derive(Debug)]
pub struct NameBuffer {
    buf: BytesMut,
}

impl NameBuffer {
    /// Bytes available for writing
    pub fn headroom(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }
}

/// Name buffers and rdatasets for a single in-flight query
///
/// Name storage comes from fixed size blocks. The pool hands out the unused tail of the current
///  block and takes back whatever was not kept.
pub struct QueryPool {
    tail: BytesMut,
    block_size: usize,
    blocks: usize,
    max_blocks: usize,
    rdatasets: Vec<Rdataset>,
    rdatasets_created: usize,
}

impl QueryPool {
    /// Creates an empty pool; no block is allocated until the first buffer is needed
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            tail: BytesMut::new(),
            block_size: config.block_size.max(MAX_NAME_WIRE_LENGTH),
            blocks: 0,
            max_blocks: config.max_blocks,
            rdatasets: Vec::new(),
            rdatasets_created: 0,
        }
    }

    /// A buffer with room for at least one maximum length name
    pub fn acquire_name_buffer(&mut self) -> QueryResult<NameBuffer> {
        if self.tail.capacity() - self.tail.len() < MAX_NAME_WIRE_LENGTH {
            if self.blocks >= self.max_blocks {
                debug!(blocks = self.blocks, "query pool exhausted");
                return Err(QueryError::server_failure("query name pool exhausted"));
            }

            self.tail = BytesMut::with_capacity(self.block_size);
            self.blocks += 1;
        }

        Ok(NameBuffer {
            buf: self.tail.split_off(self.tail.len()),
        })
    }

    /// Writes `name` into `buffer` and keeps it; the unused remainder goes back to the pool
    pub fn keep_name(&mut self, mut buffer: NameBuffer, name: &Name) -> QueryResult<PooledName> {
        if wire_length(name) > buffer.headroom() {
            self.release_name(buffer);
            return Err(QueryError::server_failure("name buffer too small"));
        }

        for label in name.iter() {
            buffer.buf.put_u8(label.len() as u8);
            buffer.buf.put_slice(label);
        }
        buffer.buf.put_u8(0);

        let wire = buffer.buf.split().freeze();
        self.give_back(buffer.buf);

        Ok(PooledName {
            name: name.clone(),
            wire,
        })
    }

    /// Returns an unused buffer to the pool
    pub fn release_name(&mut self, mut buffer: NameBuffer) {
        buffer.buf.clear();
        self.give_back(buffer.buf);
    }

    /// Convenience for acquire followed by keep
    pub fn pooled_name(&mut self, name: &Name) -> QueryResult<PooledName> {
        let buffer = self.acquire_name_buffer()?;
        self.keep_name(buffer, name)
    }

    fn give_back(&mut self, rest: BytesMut) {
        // `rest` was split off the tail; unless another block was started since, this joins
        // them again without copying
        self.tail.unsplit(rest);
    }

    /// A disassociated rdataset, recycled when one is available
    pub fn acquire_rdataset(&mut self) -> Rdataset {
        self.rdatasets.pop().unwrap_or_else(|| {
            self.rdatasets_created += 1;
            Rdataset::default()
        })
    }

    /// Returns `rdataset` to the free list
    pub fn put_rdataset(&mut self, mut rdataset: Rdataset) {
        rdataset.disassociate();
        self.rdatasets.push(rdataset);
    }

    /// Number of name blocks allocated so far
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Number of rdataset handles created, as opposed to recycled
    pub fn rdatasets_created(&self) -> usize {
        self.rdatasets_created
    }
}

impl fmt::Debug for QueryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPool")
            .field("blocks", &self.blocks)
            .field("free_rdatasets", &self.rdatasets.len())
            .finish()
    }
}
