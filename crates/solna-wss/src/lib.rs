#![forbid(unsafe_code)]

//! Streaming WS-Security processing for SOAP messages.
//!
//! A message is a forward-only sequence of XML events pushed through a
//! [`ProcessorChain`].  Inbound, the chain verifies timestamps, tokens,
//! signatures and SAML assertions and decrypts encrypted parts, logging a
//! [`SecurityEvent`] for everything it establishes.  Outbound, it writes the
//! security header, signs and encrypts.  [`InboundPipeline`] and
//! [`OutboundPipeline`] assemble the chain from configuration.

pub mod chain;
pub mod context;
pub mod dsig;
pub mod event;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod properties;
pub mod replay;
mod resolve;
pub mod saml;
pub mod security;

pub use chain::{ChainHandle, Phase, Processor, ProcessorChain, ProcessorId, ProcessorKind, SubChain};
pub use context::{ContextFlag, DocumentContext};
pub use event::{AlgorithmUsage, SecurityEvent, SecurityEventListener, SubjectConfirmation};
pub use pipeline::{InboundPipeline, OutboundPipeline, ProcessedMessage};
pub use properties::{Action, KeyReference, OutboundProperties, SecurePart, SecurityProperties};
pub use replay::{MemoryReplayCache, ReplayCache};
pub use saml::{SamlAssertion, SamlVersion};
pub use security::SecurityContext;
