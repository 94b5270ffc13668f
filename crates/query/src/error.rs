// Copyright 2015-2021 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for query resolution and configuration

use std::borrow::Cow;

use enum_as_inner::EnumAsInner;
use thiserror::Error;

use crate::proto::op::ResponseCode;
use crate::proto::rr::RecordType;

/// A query could not be (fully) answered
#[derive(Clone, Debug, EnumAsInner, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryError {
    /// Access control or policy denied the lookup
    #[error("query refused")]
    Refused,
    /// Resource exhaustion, inconsistent data or an internal failure
    #[error("server failure: {0}")]
    ServerFailure(Cow<'static, str>),
    /// The question was malformed
    #[error("format error: {0}")]
    FormatError(Cow<'static, str>),
    /// The question asked for an unsupported meta type
    #[error("not implemented: {0}")]
    NotImplemented(RecordType),
    /// The query was abandoned because its session shut down
    #[error("query cancelled")]
    Cancelled,
    /// The name does not exist
    #[error("name does not exist")]
    NameError,
    /// The name exists, but not with the requested type
    #[error("no data for the requested type")]
    NoData,
    /// A DNAME substitution produced a name longer than the protocol allows
    #[error("DNAME substitution produced a name that is too long")]
    NameTooLong,
}

impl QueryError {
    /// Build a server failure from a static or owned reason
    pub fn server_failure(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::ServerFailure(reason.into())
    }

    /// Build a format error from a static or owned reason
    pub fn format_error(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::FormatError(reason.into())
    }

    /// The response code a client should see for this error
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::Refused => ResponseCode::Refused,
            Self::ServerFailure(_) | Self::Cancelled => ResponseCode::ServFail,
            Self::FormatError(_) => ResponseCode::FormErr,
            Self::NotImplemented(_) => ResponseCode::NotImp,
            Self::NameError => ResponseCode::NXDomain,
            Self::NoData => ResponseCode::NoError,
            Self::NameTooLong => ResponseCode::YXDomain,
        }
    }

    /// Negative results are terminal, but not failures
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::NameError | Self::NoData)
    }
}

impl From<ResponseCode> for QueryError {
    fn from(code: ResponseCode) -> Self {
        // this should never be a NoError
        debug_assert!(code != ResponseCode::NoError);
        match code {
            ResponseCode::Refused => Self::Refused,
            ResponseCode::FormErr => Self::format_error("malformed request"),
            ResponseCode::NotImp => Self::NotImplemented(RecordType::NULL),
            ResponseCode::NXDomain => Self::NameError,
            ResponseCode::YXDomain => Self::NameTooLong,
            code => Self::server_failure(format!("response code {code}")),
        }
    }
}

/// Result of a step in query resolution
pub type QueryResult<T> = Result<T, QueryError>;

/// An error reading the view configuration
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A value is outside of the range it may take
    #[error("invalid value for {0}: {1}")]
    Value(&'static str, String),
    /// An error parsing the TOML document
    #[cfg(feature = "toml")]
    #[cfg_attr(docsrs, doc(cfg(feature = "toml")))]
    #[error("toml decode error: {0}")]
    Toml(#[from] toml::de::Error),
}
