#![forbid(unsafe_code)]

use std::fmt;

/// Identifier of a zone (the ownership domain of a group of arena pages).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ZoneId(pub u32);

/// Identifier of a type registered with a [`crate::metadata::TypeRegistry`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);

/// Index of an arena page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u32);

/// Recoverable errors reported by the registry, the in-memory store and configuration.
///
/// Violated caller contracts are not represented here; they abort through
/// [`precondition_failure`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An argument or descriptor is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No type is registered under this id.
    #[error("unknown type {0}")]
    UnknownType(TypeId),
    /// A field path names a field the type lacks.
    #[error("type {ty} has no field `{field}`")]
    UnknownField { ty: TypeId, field: String },
    /// A field path descends into a field with no registered type.
    #[error("field `{field}` of type {ty} has no resolvable type")]
    UnresolvedFieldType { ty: TypeId, field: String },
    /// The store never created this zone.
    #[error("unknown zone {0}")]
    UnknownZone(ZoneId),
    /// The zone was invalidated and takes no new attributes.
    #[error("zone {0} has been invalidated")]
    ZoneInvalidated(ZoneId),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

/// Logs and aborts the current operation after a violated caller contract.
///
/// Contract violations (resolving a nil reference under
/// `ASSERT_NOT_NIL`, cyclic indirection, dangling record pointers, heap
/// exhaustion) are programmer errors and are never returned as [`Error`].
#[cold]
#[track_caller]
pub fn precondition_failure(args: fmt::Arguments<'_>) -> ! {
    tracing::error!(reason = %args, "precondition failure");
    panic!("precondition failure: {args}");
}

/// Formats its arguments and calls [`precondition_failure`].
#[macro_export]
macro_rules! precondition_failure {
    ($($arg:tt)*) => {
        $crate::types::precondition_failure(format_args!($($arg)*))
    };
}
