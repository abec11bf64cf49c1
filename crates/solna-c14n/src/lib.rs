#![forbid(unsafe_code)]

//! Exclusive XML Canonicalization for the Solna WS-Security library.
//!
//! Canonicalization runs incrementally: an [`ExcC14nWriter`] is fed one
//! [`XmlEvent`] at a time and writes canonical bytes to any
//! [`std::io::Write`] sink, typically a running digest.  Only Exclusive
//! C14N 1.0 (with and without comments) is supported, which is what the
//! Basic Security Profile mandates for SOAP message security.

pub mod exclusive;
pub mod render;

pub use exclusive::ExcC14nWriter;

use solna_core::{algorithm, Error};
use solna_xml::{Namespace, XmlEvent};

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        match uri {
            algorithm::EXC_C14N => Ok(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Ok(Self::ExclusiveWithComments),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "canonicalization algorithm: {uri}"
            ))),
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::ExclusiveWithComments)
    }
}

/// Canonicalize a captured event range in one call.
///
/// - `inherited`: namespaces in scope at the apex element's parent
/// - `inclusive_prefixes`: the InclusiveNamespaces PrefixList
pub fn canonicalize(
    events: &[XmlEvent],
    mode: C14nMode,
    inherited: &[Namespace],
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let mut writer =
        ExcC14nWriter::new(Vec::new(), mode, inclusive_prefixes).with_inherited(inherited);
    for event in events {
        writer.write(event)?;
    }
    Ok(writer.into_inner())
}
