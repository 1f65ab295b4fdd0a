//! # sqlguard-harness
//!
//! Measures how well the gateway and executor hold up against SQL injection.
//!
//! - [`Corpus`] holds the versioned attack cases, rendered against a [`TargetSchema`]
//! - [`InjectionTester`] runs each case under each access mode against a live schema
//!   provisioned by a [`SchemaFixture`]
//! - [`oracle`] turns observations into verdicts without trusting "no error" as "safe"
//! - [`aggregate`] folds the results into a [`SecurityReport`]
//!
//! [`run_assessment`] wires all of it to a configured target.
//!
//! [`TargetSchema`]: sqlguard_core::TargetSchema

pub mod assessment;
pub mod corpus;
pub mod error;
pub mod fixture;
pub mod oracle;
pub mod report;
pub mod tester;

pub use assessment::run_assessment;
pub use corpus::{AttackCategory, AttackTestCase, Corpus, Severity, CORPUS_VERSION};
pub use error::{CorpusError, HarnessError};
pub use fixture::{SchemaFixture, UsersFixture};
pub use oracle::Verdict;
pub use report::{aggregate, Priority, Recommendation, SecurityReport, PASS_THRESHOLD};
pub use tester::{InjectionResult, InjectionTester};
