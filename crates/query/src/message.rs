// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Decoded requests and the responses the engine builds for them

use std::fmt;

use crate::config::SortOrder;
use crate::pool::PooledName;
use crate::proto::op::ResponseCode;
use crate::proto::rr::{Name, RecordType};
use crate::rdata::Rdataset;

/// One entry of the question section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    /// The name asked about
    pub name: Name,
    /// The type asked for
    pub query_type: RecordType,
}

impl Question {
    /// Creates a question
    pub fn new(name: Name, query_type: RecordType) -> Self {
        Self { name, query_type }
    }
}

/// A request as decoded by the transport
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Message id
    pub id: u16,
    /// The question section
    pub questions: Vec<Question>,
    /// RD: the client wants recursion
    pub recursion_desired: bool,
    /// CD: the client does its own validation
    pub checking_disabled: bool,
    /// DO: the client wants DNSSEC records
    pub dnssec_ok: bool,
    /// AD: the client understands authenticated data
    pub authentic_data: bool,
}

impl Request {
    /// A request with a single question
    pub fn query(name: Name, query_type: RecordType) -> Self {
        Self {
            questions: vec![Question::new(name, query_type)],
            ..Self::default()
        }
    }

    /// Set RD
    pub fn with_recursion_desired(mut self, recursion_desired: bool) -> Self {
        self.recursion_desired = recursion_desired;
        self
    }

    /// Set DO
    pub fn with_dnssec_ok(mut self, dnssec_ok: bool) -> Self {
        self.dnssec_ok = dnssec_ok;
        self
    }

    /// Set CD
    pub fn with_checking_disabled(mut self, checking_disabled: bool) -> Self {
        self.checking_disabled = checking_disabled;
        self
    }
}

/// Which part of the response a name goes in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Answer
    Answer,
    /// Authority
    Authority,
    /// Additional
    Additional,
}

impl SectionKind {
    pub(crate) const ALL: [Self; 3] = [Self::Answer, Self::Authority, Self::Additional];
}

/// A name and the rdatasets attached to it in one section
#[derive(Clone, Debug)]
pub struct SectionEntry {
    name: PooledName,
    rdatasets: Vec<Rdataset>,
}

impl SectionEntry {
    /// Owner name
    pub fn name(&self) -> &Name {
        self.name.name()
    }

    /// The name as kept in the query's pool
    pub fn pooled_name(&self) -> &PooledName {
        &self.name
    }

    /// Rdatasets in insertion order
    pub fn rdatasets(&self) -> &[Rdataset] {
        &self.rdatasets
    }
}

/// Where a (name, type, covers) stands relative to a section
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Presence {
    /// The rdataset is already there
    Rdataset,
    /// The name is there, without the rdataset
    Name(usize),
    /// The name is not there
    Absent,
}

/// One of answer, authority or additional; a (name, type, covers) appears at most once
#[derive(Clone, Debug, Default)]
pub struct Section {
    entries: Vec<SectionEntry>,
}

impl Section {
    /// Names in insertion order
    pub fn entries(&self) -> &[SectionEntry] {
        &self.entries
    }

    /// True if nothing was added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records across all rdatasets
    pub fn record_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|entry| entry.rdatasets.iter())
            .map(Rdataset::len)
            .sum()
    }

    /// The name of the entry holding `name`/`rtype`/`covers`, if present
    pub fn find_existing(
        &self,
        name: &Name,
        rtype: RecordType,
        covers: Option<RecordType>,
    ) -> Option<&Name> {
        match self.presence(name, rtype, covers) {
            Presence::Rdataset => self
                .entries
                .iter()
                .find(|entry| entry.name() == name)
                .map(SectionEntry::name),
            _ => None,
        }
    }

    /// The rdataset of `rtype` at `name`
    pub fn rdataset(&self, name: &Name, rtype: RecordType) -> Option<&Rdataset> {
        self.entries
            .iter()
            .filter(|entry| entry.name() == name)
            .flat_map(|entry| entry.rdatasets.iter())
            .find(|rdataset| rdataset.rr_type() == Some(rtype))
    }

    /// True if the section holds `rtype` at `name`
    pub fn contains(&self, name: &Name, rtype: RecordType) -> bool {
        self.rdataset(name, rtype).is_some()
    }

    pub(crate) fn presence(
        &self,
        name: &Name,
        rtype: RecordType,
        covers: Option<RecordType>,
    ) -> Presence {
        let Some(index) = self.entries.iter().position(|entry| entry.name() == name) else {
            return Presence::Absent;
        };

        let present = self.entries[index]
            .rdatasets
            .iter()
            .any(|rdataset| rdataset.rr_type() == Some(rtype) && rdataset.covers() == covers);

        if present {
            Presence::Rdataset
        } else {
            Presence::Name(index)
        }
    }

    /// Adds a name with no rdatasets yet, returning its position
    pub(crate) fn add_name(&mut self, name: PooledName) -> usize {
        self.entries.push(SectionEntry {
            name,
            rdatasets: Vec::new(),
        });
        self.entries.len() - 1
    }

    /// Appends `rdataset` to the entry at `index`
    pub(crate) fn add_rdataset(&mut self, index: usize, rdataset: Rdataset) {
        self.entries[index].rdatasets.push(rdataset);
    }

    fn sort_addresses(&mut self, order: &SortOrder) {
        for rdataset in self
            .entries
            .iter_mut()
            .flat_map(|entry| entry.rdatasets.iter_mut())
        {
            if !matches!(rdataset.rr_type(), Some(RecordType::A | RecordType::AAAA)) {
                continue;
            }

            rdataset.rdata_mut().sort_by_key(|rdata| {
                rdata
                    .ip_addr()
                    .map_or(usize::MAX, |ip| order.rank(ip))
            });
        }
    }
}

/// A response ready for the serializer
#[derive(Clone, Debug)]
pub struct Response {
    id: u16,
    questions: Vec<Question>,
    answers: Section,
    authorities: Section,
    additionals: Section,
    response_code: ResponseCode,
    authoritative: bool,
    recursion_available: bool,
    sort_order: Option<SortOrder>,
}

impl Response {
    pub(crate) fn new(request: &Request) -> Self {
        Self {
            id: request.id,
            questions: request.questions.clone(),
            answers: Section::default(),
            authorities: Section::default(),
            additionals: Section::default(),
            response_code: ResponseCode::NoError,
            authoritative: false,
            recursion_available: false,
            sort_order: None,
        }
    }

    /// A blank response to the same question
    pub(crate) fn empty_like(other: &Self) -> Self {
        Self {
            id: other.id,
            questions: other.questions.clone(),
            answers: Section::default(),
            authorities: Section::default(),
            additionals: Section::default(),
            response_code: ResponseCode::NoError,
            authoritative: false,
            recursion_available: other.recursion_available,
            sort_order: None,
        }
    }

    /// Message id of the request
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The question section, copied from the request
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// The answer section
    pub fn answers(&self) -> &Section {
        &self.answers
    }

    /// The authority section
    pub fn authorities(&self) -> &Section {
        &self.authorities
    }

    /// The additional section
    pub fn additionals(&self) -> &Section {
        &self.additionals
    }

    /// Response code
    pub fn response_code(&self) -> ResponseCode {
        self.response_code
    }

    /// AA
    pub fn authoritative(&self) -> bool {
        self.authoritative
    }

    /// RA
    pub fn recursion_available(&self) -> bool {
        self.recursion_available
    }

    /// The address ordering that was applied
    pub fn sort_order(&self) -> Option<&SortOrder> {
        self.sort_order.as_ref()
    }

    pub(crate) fn section(&self, kind: SectionKind) -> &Section {
        match kind {
            SectionKind::Answer => &self.answers,
            SectionKind::Authority => &self.authorities,
            SectionKind::Additional => &self.additionals,
        }
    }

    pub(crate) fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
        match kind {
            SectionKind::Answer => &mut self.answers,
            SectionKind::Authority => &mut self.authorities,
            SectionKind::Additional => &mut self.additionals,
        }
    }

    /// True if `name`/`rtype`/`covers` is in any section
    pub(crate) fn is_duplicate(
        &self,
        name: &Name,
        rtype: RecordType,
        covers: Option<RecordType>,
    ) -> bool {
        SectionKind::ALL
            .iter()
            .any(|kind| self.section(*kind).presence(name, rtype, covers) == Presence::Rdataset)
    }

    pub(crate) fn set_response_code(&mut self, code: ResponseCode) {
        self.response_code = code;
    }

    pub(crate) fn set_authoritative(&mut self, authoritative: bool) {
        self.authoritative = authoritative;
    }

    pub(crate) fn set_recursion_available(&mut self, recursion_available: bool) {
        self.recursion_available = recursion_available;
    }

    pub(crate) fn set_sort_order(&mut self, order: SortOrder) {
        for kind in SectionKind::ALL {
            self.section_mut(kind).sort_addresses(&order);
        }
        self.sort_order = Some(order);
    }

    /// Drops all section data, for error responses
    pub(crate) fn clear_sections(&mut self) {
        self.answers = Section::default();
        self.authorities = Section::default();
        self.additionals = Section::default();
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{} rcode:{} aa:{} answers:{} authorities:{} additionals:{}",
            self.id,
            self.response_code,
            self.authoritative,
            self.answers.record_count(),
            self.authorities.record_count(),
            self.additionals.record_count()
        )
    }
}
