#![forbid(unsafe_code)]

//! Error taxonomy for property access and binding construction.
//!
//! Construction-time and assignment-time violations are returned to the
//! caller. Steady-state path resolution never produces an error: a null or
//! unresolvable link mid-path falls back to the target's default value.
//!
//! # Failure Modes
//!
//! | Error | Cause |
//! |-------|-------|
//! | `InvalidArgument` | Empty path, read-only binding target, two-way on a non-observable target |
//! | `UnknownProperty` | Name does not resolve on the object or its class chain |
//! | `ReadOnly` | Public write to a read-only property, or a bad internal write key |
//! | `AccessDenied` | Internal read with a key the property does not accept |
//! | `Type` | Value, default, getter or filter result fails the declared type |
//! | `SelfBinding` | Binding target and source root are the same object + property |

use thiserror::Error;

/// Where a value that failed a type check came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
    /// A value passed to `set`.
    Value,
    /// The descriptor's declared default.
    DefaultValue,
    /// The value returned by a getter override.
    Getter,
    /// The value returned by a read filter.
    ReadFilter,
    /// The value returned by a write filter.
    WriteFilter,
}

impl std::fmt::Display for TypeOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value => write!(f, "value"),
            Self::DefaultValue => write!(f, "default value"),
            Self::Getter => write!(f, "getter result"),
            Self::ReadFilter => write!(f, "read filter result"),
            Self::WriteFilter => write!(f, "write filter result"),
        }
    }
}

/// Errors from property access and binding operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// A constructor or setter argument was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A property name did not resolve.
    #[error("unknown property \"{name}\"")]
    UnknownProperty { name: String },
    /// Write attempted without a valid capability.
    #[error("property \"{property}\" is read-only")]
    ReadOnly { property: String },
    /// Internal read attempted without a valid capability.
    #[error("cannot get internal value of property \"{property}\" using given access key")]
    AccessDenied { property: String },
    /// A value failed the declared type check.
    #[error("{origin} for property \"{property}\" must be of type {expected}")]
    Type {
        property: String,
        expected: String,
        origin: TypeOrigin,
    },
    /// Binding a property to itself.
    #[error("cannot bind property \"{property}\" to itself")]
    SelfBinding { property: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PropertyError>;
