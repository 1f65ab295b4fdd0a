//! # sqlguard-gateway
//!
//! Decides, statement by statement, whether SQL may run under the current access mode.
//!
//! The pipeline has three stages:
//!
//! 1. [`normalize`] lexes the text: comments are stripped, words case-folded, literals kept
//!    opaque, Unicode-escaped identifiers decoded and the text split on top-level `;`.
//! 2. [`SqlClassifier`] parses each normalized statement with `sqlparser` and tags it with a
//!    [`StatementKind`].
//! 3. [`Gateway::validate`] applies the access-mode policy and returns a [`Decision`].
//!
//! In RESTRICTED mode only a single read-only statement that calls no denied function is
//! allowed. Anything the classifier cannot place is denied. UNRESTRICTED allows everything.
//!
//! ```
//! use sqlguard_core::AccessMode;
//! use sqlguard_gateway::{Gateway, StatementKind};
//!
//! let gateway = Gateway::default();
//! let decision = gateway.validate("SELECT 1; DROP TABLE test_users;--", AccessMode::Restricted);
//! assert_eq!(decision.kind(), StatementKind::Stacked);
//! assert!(!decision.is_allowed());
//! ```

pub mod classify;
pub mod error;
pub mod normalize;
pub mod policy;

pub use classify::{Classification, SqlClassifier, StatementKind, StatementShape};
pub use error::NormalizeError;
pub use normalize::{NormalizedSql, NormalizedStatement, Token, TokenKind, normalize};
pub use policy::{Decision, Denial, DenyReason, Gateway};
