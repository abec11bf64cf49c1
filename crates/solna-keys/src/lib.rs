#![forbid(unsafe_code)]

//! Security tokens and key resolution for Solna.
//!
//! Parses the WS-Security ways of naming a key (`SecurityTokenReference`,
//! `KeyInfo`), models the tokens they resolve to, and provides an in-memory
//! [`KeysManager`] implementing the [`KeyResolver`] collaborator.

pub mod key;
pub mod keyinfo;
pub mod loader;
pub mod manager;
pub mod reference;
pub mod resolver;
pub mod token;
pub mod trust;
pub mod x509;

pub use key::Key;
pub use keyinfo::KeyInfoContent;
pub use manager::KeysManager;
pub use reference::TokenReference;
pub use resolver::{KeyResolver, NoKeys};
pub use token::{SecurityToken, TokenKind, TokenOrigin};
pub use trust::TrustAnchors;
pub use x509::X509Certificate;
