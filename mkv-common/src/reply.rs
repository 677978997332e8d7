//! # Reply Model
//!
//! Typed responses returned by the store. Exactly one variant is active per
//! reply; a store-side failure is an ordinary `Error` reply, not a Rust error.

use std::fmt;

use thiserror::Error;

/// Store reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `*...` arrays of nested replies.
    Array(Vec<Reply>),
    /// `$...` bulk strings.
    BulkString(String),
    /// `-ERR ...` replies.
    Error(String),
    /// `:123` replies.
    Integer(i64),
    /// `+OK` style replies.
    SimpleString(String),
    /// Null bulk string or null array.
    Null,
}

/// Tag of a [`Reply`], rendered as the type name recorded in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Array,
    BulkString,
    Error,
    Integer,
    SimpleString,
    Null,
}

impl ReplyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyKind::Array => "Array",
            ReplyKind::BulkString => "BulkString",
            ReplyKind::Error => "Error",
            ReplyKind::Integer => "Integer",
            ReplyKind::SimpleString => "String",
            ReplyKind::Null => "Null",
        }
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply did not have the shape the caller asked to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected} reply, got {actual}")]
pub struct DecodeError {
    pub expected: ReplyKind,
    pub actual: ReplyKind,
}

impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Array(_) => ReplyKind::Array,
            Reply::BulkString(_) => ReplyKind::BulkString,
            Reply::Error(_) => ReplyKind::Error,
            Reply::Integer(_) => ReplyKind::Integer,
            Reply::SimpleString(_) => ReplyKind::SimpleString,
            Reply::Null => ReplyKind::Null,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }

    /// Textual rendering defined for every variant.
    ///
    /// Strings and errors render their payload, integers their decimal
    /// form, null the empty string. Arrays join their elements' renderings
    /// with a single space.
    pub fn as_string(&self) -> String {
        match self {
            Reply::BulkString(text) | Reply::SimpleString(text) | Reply::Error(text) => {
                text.clone()
            }
            Reply::Integer(value) => value.to_string(),
            Reply::Null => String::new(),
            Reply::Array(items) => items
                .iter()
                .map(Reply::as_string)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Borrows the elements of an `Array` reply.
    pub fn as_array(&self) -> Result<&[Reply], DecodeError> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(DecodeError {
                expected: ReplyKind::Array,
                actual: other.kind(),
            }),
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>, DecodeError> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(DecodeError {
                expected: ReplyKind::Array,
                actual: other.kind(),
            }),
        }
    }

    /// Payload of an `Error` reply.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Reply::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
