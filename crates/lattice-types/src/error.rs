//! Unified error interface for Lattice crates.
//!
//! Every public error enum in the workspace implements [`ErrorCode`] so
//! that callers (and the outer RPC surface) can branch on stable,
//! machine-readable codes instead of formatted messages.
//!
//! # Code Format
//!
//! - **UPPER_SNAKE_CASE**, prefixed by domain: `PROTO_`, `SEC_`, `WORK_`.
//! - Stable once defined — changing a code is a breaking change.
//!
//! # Recoverability
//!
//! An error is recoverable when retrying may succeed or the caller can
//! take corrective action (rate-limit denial lapses, a peer reconnects).
//! Validation failures and permission denials are not recoverable by
//! retry.
//!
//! # Example
//!
//! ```
//! use lattice_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     NotFound(String),
//!     RateLimited,
//! }
//!
//! impl ErrorCode for MyError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound(_) => "NOT_FOUND",
//!             Self::RateLimited => "RATE_LIMITED",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::RateLimited)
//!     }
//! }
//!
//! let err = MyError::RateLimited;
//! assert_eq!(err.code(), "RATE_LIMITED");
//! assert!(err.is_recoverable());
//! ```
pub trait ErrorCode {
    /// Returns a machine-readable error code (UPPER_SNAKE_CASE, stable).
    fn code(&self) -> &'static str;

    /// Returns whether retrying or corrective action may succeed.
    fn is_recoverable(&self) -> bool;
}
