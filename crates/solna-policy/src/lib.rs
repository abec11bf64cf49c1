#![forbid(unsafe_code)]

//! Security policies for WS-Security messages.
//!
//! A [`Policy`] is a tree of assertions, built in code or parsed from
//! WS-SecurityPolicy XML with [`PolicyBuilder`].  [`evaluate`] checks the
//! tree against the security events an inbound pipeline recorded and
//! reports every assertion that does not hold.

pub mod assertion;
pub mod builder;
pub mod matcher;

pub use assertion::{AlgorithmSuite, Assertion, Binding, BindingKind, Layout, Policy, SupportingTokens};
pub use builder::{PolicyBuilder, PolicyFile, PolicySource};
pub use matcher::{evaluate, PolicyFailure, PolicyOutcome};
