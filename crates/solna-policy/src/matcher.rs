#![forbid(unsafe_code)]

//! Evaluation of a policy tree against the security event log.
//!
//! Every assertion is checked on its own against the complete log.  A
//! composite (binding, supporting tokens, `All`) holds when its own
//! constraints and all of its children hold; failures are collected from
//! the whole tree rather than stopping at the first.

use std::fmt;

use solna_core::ns;
use solna_crypto::sign::is_hmac;
use solna_keys::TokenKind;
use solna_wss::{AlgorithmUsage, SecurityEvent};
use solna_xml::{path_to_string, QName};
use tracing::{debug, info};

use crate::assertion::{AlgorithmSuite, Assertion, Binding, BindingKind, Layout, Policy, SupportingTokens};

/// One assertion the message did not satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFailure {
    pub assertion: String,
    pub reason: String,
}

impl fmt::Display for PolicyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.assertion, self.reason)
    }
}

/// Result of matching a policy.  Not an error: the caller decides what an
/// unsatisfied policy means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOutcome {
    failures: Vec<PolicyFailure>,
}

impl PolicyOutcome {
    pub fn is_satisfied(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[PolicyFailure] {
        &self.failures
    }
}

impl fmt::Display for PolicyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("policy satisfied");
        }
        writeln!(f, "policy not satisfied:")?;
        for failure in &self.failures {
            writeln!(f, "  {failure}")?;
        }
        Ok(())
    }
}

/// Match `policy` against the events logged for one message.
pub fn evaluate(policy: &Policy, events: &[SecurityEvent]) -> PolicyOutcome {
    let mut matcher = PolicyMatcher {
        events,
        failures: Vec::new(),
    };
    matcher.assertion(&policy.root);
    let outcome = PolicyOutcome {
        failures: matcher.failures,
    };
    info!(satisfied = outcome.is_satisfied(), failures = outcome.failures.len(), "policy evaluated");
    outcome
}

struct PolicyMatcher<'a> {
    events: &'a [SecurityEvent],
    failures: Vec<PolicyFailure>,
}

impl PolicyMatcher<'_> {
    /// Check one node; returns whether it held.
    fn assertion(&mut self, assertion: &Assertion) -> bool {
        let own = match assertion {
            Assertion::AlgorithmSuite(suite) => self.algorithm_suite(suite),
            Assertion::Layout(layout) => self.layout(*layout),
            Assertion::IncludeTimestamp => self.timestamp(),
            Assertion::SignedElements(paths) => self.signed_elements(paths),
            Assertion::EncryptedElements(paths) => self.encrypted_elements(paths),
            Assertion::Binding(binding) => return self.binding(assertion, binding),
            Assertion::SupportingTokens(tokens) => return self.supporting_tokens(assertion, tokens),
            Assertion::All(children) => return self.all(children),
        };
        self.record(assertion, own)
    }

    fn record(&mut self, assertion: &Assertion, result: Result<(), String>) -> bool {
        match result {
            Ok(()) => true,
            Err(reason) => {
                debug!(%assertion, %reason, "assertion not satisfied");
                self.failures.push(PolicyFailure {
                    assertion: assertion.to_string(),
                    reason,
                });
                false
            }
        }
    }

    fn all(&mut self, children: &[Assertion]) -> bool {
        // no short circuit: every failing child is reported
        children
            .iter()
            .fold(true, |held, child| self.assertion(child) && held)
    }

    fn binding(&mut self, assertion: &Assertion, binding: &Binding) -> bool {
        let mut held = self.all(&binding.children);
        if let Some(suite) = &binding.algorithm_suite {
            held &= self.assertion(&Assertion::AlgorithmSuite(suite.clone()));
        }
        if let Some(layout) = binding.layout {
            held &= self.assertion(&Assertion::Layout(layout));
        }
        let own = self.binding_kind(binding.kind).and_then(|()| {
            if !binding.include_timestamp {
                return Ok(());
            }
            self.timestamp()?;
            if !self.timestamp_signed() {
                return Err("the timestamp is not signed".into());
            }
            Ok(())
        });
        self.record(assertion, own) && held
    }

    fn supporting_tokens(&mut self, assertion: &Assertion, tokens: &SupportingTokens) -> bool {
        let held = self.all(&tokens.children);
        let candidates: Vec<&str> = self
            .events
            .iter()
            .filter_map(|event| match event {
                SecurityEvent::TokenValidated { token, kind } if *kind == tokens.token => Some(token.as_str()),
                _ => None,
            })
            .collect();
        let own = if candidates.is_empty() {
            Err(format!("no {} token was presented", tokens.token))
        } else if tokens.signed && tokens.token != TokenKind::Https {
            let signed = candidates.iter().any(|candidate| {
                self.events
                    .iter()
                    .any(|event| matches!(event, SecurityEvent::SignedElement { id, .. } if id == candidate))
            });
            if signed {
                Ok(())
            } else {
                Err(format!("no {} token is covered by a signature", tokens.token))
            }
        } else {
            Ok(())
        };
        self.record(assertion, own) && held
    }

    fn binding_kind(&self, kind: BindingKind) -> Result<(), String> {
        let signatures = || {
            self.events.iter().filter_map(|event| match event {
                SecurityEvent::SignatureValue { algorithm, .. } => Some(algorithm.as_str()),
                _ => None,
            })
        };
        match kind {
            BindingKind::Transport => {
                let https = self.events.iter().any(|event| {
                    matches!(event, SecurityEvent::TokenValidated { kind: TokenKind::Https, .. })
                });
                if https {
                    Ok(())
                } else {
                    Err("the message did not arrive over an authenticated transport".into())
                }
            }
            BindingKind::Symmetric => match signatures().find(|uri| is_hmac(uri)) {
                Some(_) => Ok(()),
                None => Err("no signature was made with a shared key".into()),
            },
            BindingKind::Asymmetric => match signatures().find(|uri| !is_hmac(uri)) {
                Some(_) => Ok(()),
                None => Err("no signature was made with a public key".into()),
            },
        }
    }

    fn algorithm_suite(&self, suite: &AlgorithmSuite) -> Result<(), String> {
        for event in self.events {
            let SecurityEvent::Algorithm { uri, usage } = event else {
                continue;
            };
            let expected = match usage {
                AlgorithmUsage::Digest => &suite.digest,
                AlgorithmUsage::Encryption => &suite.encryption,
                AlgorithmUsage::Canonicalization => &suite.c14n,
                AlgorithmUsage::Signature if is_hmac(uri) => &suite.symmetric_signature,
                AlgorithmUsage::Signature => &suite.asymmetric_signature,
            };
            if uri != expected {
                return Err(format!("{usage:?} algorithm {uri} used where {expected} is required"));
            }
        }
        Ok(())
    }

    fn layout(&self, layout: Layout) -> Result<(), String> {
        let children: Vec<&QName> = self
            .events
            .iter()
            .filter_map(|event| match event {
                SecurityEvent::HeaderChild { name } => Some(name),
                _ => None,
            })
            .collect();
        let timestamp = children
            .iter()
            .position(|name| name.is(ns::WSU, ns::node::TIMESTAMP));
        let first = || match timestamp {
            Some(position) if position != 0 => Err(format!("the timestamp is header child {}, not the first", position + 1)),
            _ => Ok(()),
        };
        match layout {
            Layout::Lax => Ok(()),
            Layout::LaxTsFirst => first(),
            Layout::LaxTsLast => match timestamp {
                Some(position) if position + 1 != children.len() => {
                    Err(format!("the timestamp is header child {}, not the last", position + 1))
                }
                _ => Ok(()),
            },
            Layout::Strict => {
                first()?;
                self.tokens_declared_before_use()
            }
        }
    }

    fn tokens_declared_before_use(&self) -> Result<(), String> {
        for (position, event) in self.events.iter().enumerate() {
            let SecurityEvent::SignatureValue { token, .. } = event else {
                continue;
            };
            let declared = self.events[..position]
                .iter()
                .any(|earlier| matches!(earlier, SecurityEvent::TokenValidated { token: t, .. } if t == token));
            if !declared {
                return Err(format!("token {token} is used before it is declared"));
            }
        }
        Ok(())
    }

    fn timestamp(&self) -> Result<(), String> {
        if self.events.iter().any(|event| matches!(event, SecurityEvent::Timestamp { .. })) {
            Ok(())
        } else {
            Err("the message has no timestamp".into())
        }
    }

    fn timestamp_signed(&self) -> bool {
        self.events.iter().any(|event| {
            matches!(event, SecurityEvent::SignedElement { path, .. }
                if path.last().is_some_and(|name| name.is(ns::WSU, ns::node::TIMESTAMP)))
        })
    }

    fn signed_elements(&self, paths: &[Vec<QName>]) -> Result<(), String> {
        for wanted in paths {
            let signed = self
                .events
                .iter()
                .any(|event| matches!(event, SecurityEvent::SignedElement { path, .. } if path == wanted));
            if !signed {
                return Err(format!("{} is not signed", path_to_string(wanted)));
            }
        }
        Ok(())
    }

    fn encrypted_elements(&self, paths: &[Vec<QName>]) -> Result<(), String> {
        for wanted in paths {
            let encrypted = self
                .events
                .iter()
                .any(|event| matches!(event, SecurityEvent::EncryptedPart { path, .. } if path == wanted));
            if !encrypted {
                return Err(format!("{} was not encrypted", path_to_string(wanted)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use solna_core::algorithm;

    fn body() -> Vec<QName> {
        Assertion::body_path(ns::SOAP11)
    }

    fn timestamp_path() -> Vec<QName> {
        vec![
            QName::new(ns::SOAP11, ns::node::ENVELOPE),
            QName::new(ns::SOAP11, ns::node::HEADER),
            QName::new(ns::WSSE, ns::node::SECURITY),
            QName::new(ns::WSU, ns::node::TIMESTAMP),
        ]
    }

    fn timestamp_event() -> SecurityEvent {
        SecurityEvent::Timestamp {
            created: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            expires: None,
            violation: None,
        }
    }

    fn signed(path: Vec<QName>, id: &str) -> SecurityEvent {
        SecurityEvent::SignedElement {
            path,
            id: id.into(),
            token: "tls".into(),
        }
    }

    fn https() -> SecurityEvent {
        SecurityEvent::TokenValidated {
            token: "transport".into(),
            kind: TokenKind::Https,
        }
    }

    fn transport_policy() -> Policy {
        Policy::new(Assertion::Binding(
            Binding::new(BindingKind::Transport)
                .with_timestamp()
                .with_child(Assertion::signed_body()),
        ))
    }

    #[test]
    fn test_binding_needs_timestamp_and_signed_body() {
        let policy = transport_policy();
        let signed_ts = signed(timestamp_path(), "TS-1");
        let full = vec![https(), timestamp_event(), signed_ts.clone(), signed(body(), "Body-1")];
        assert!(evaluate(&policy, &full).is_satisfied());

        let without_timestamp = vec![https(), signed(body(), "Body-1")];
        let outcome = evaluate(&policy, &without_timestamp);
        assert!(!outcome.is_satisfied());
        assert_eq!(outcome.failures()[0].assertion, "TransportBinding");

        let without_body = vec![https(), timestamp_event(), signed_ts];
        let outcome = evaluate(&policy, &without_body);
        assert_eq!(outcome.failures().len(), 1);
        assert!(outcome.failures()[0].assertion.starts_with("SignedElements"));
    }

    #[test]
    fn test_signed_path_must_match_exactly() {
        let mut elsewhere = body();
        elsewhere.push(QName::new("urn:example", "Body"));
        let policy = Policy::new(Assertion::signed_body());
        assert!(!evaluate(&policy, &[signed(elsewhere, "x")]).is_satisfied());

        // prefixes do not matter, names do
        let prefixed = vec![
            QName::prefixed("S", ns::SOAP11, ns::node::ENVELOPE),
            QName::prefixed("S", ns::SOAP11, ns::node::BODY),
        ];
        assert!(evaluate(&policy, &[signed(prefixed, "b")]).is_satisfied());
    }

    #[test]
    fn test_transport_binding_requires_signed_timestamp() {
        let policy = transport_policy();
        let unsigned = vec![https(), timestamp_event(), signed(body(), "Body-1")];
        let outcome = evaluate(&policy, &unsigned);
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].assertion, "TransportBinding");
        assert!(outcome.failures()[0].reason.contains("not signed"), "{outcome}");
    }

    #[test]
    fn test_symmetric_binding_signature_kind() {
        let hmac = SecurityEvent::SignatureValue {
            token: "shared".into(),
            algorithm: algorithm::HMAC_SHA256.into(),
        };
        let symmetric = Policy::new(Assertion::Binding(Binding::new(BindingKind::Symmetric)));
        let asymmetric = Policy::new(Assertion::Binding(Binding::new(BindingKind::Asymmetric)));
        assert!(evaluate(&symmetric, std::slice::from_ref(&hmac)).is_satisfied());
        assert!(!evaluate(&asymmetric, &[hmac]).is_satisfied());
    }

    #[test]
    fn test_message_binding_requires_signed_timestamp() {
        let policy = Policy::new(Assertion::Binding(Binding::new(BindingKind::Symmetric).with_timestamp()));
        let signature = SecurityEvent::SignatureValue {
            token: "shared".into(),
            algorithm: algorithm::HMAC_SHA1.into(),
        };
        let unsigned = vec![timestamp_event(), signature.clone()];
        assert!(!evaluate(&policy, &unsigned).is_satisfied());
        let signed_ts = vec![timestamp_event(), signature, signed(timestamp_path(), "TS-1")];
        assert!(evaluate(&policy, &signed_ts).is_satisfied());
    }

    #[test]
    fn test_algorithm_suite() {
        let suite = AlgorithmSuite::by_name("Basic256").unwrap();
        let policy = Policy::new(Assertion::AlgorithmSuite(suite));
        let digest = |uri: &str| SecurityEvent::Algorithm {
            uri: uri.into(),
            usage: AlgorithmUsage::Digest,
        };
        assert!(evaluate(&policy, &[digest(algorithm::SHA1)]).is_satisfied());
        let outcome = evaluate(&policy, &[digest(algorithm::SHA1), digest(algorithm::SHA256)]);
        assert!(outcome.failures()[0].reason.contains(algorithm::SHA256));
    }

    #[test]
    fn test_layouts() {
        let child = |local: &str, ns_uri: &str| SecurityEvent::HeaderChild {
            name: QName::new(ns_uri, local),
        };
        let ts_last = vec![
            child(ns::node::BINARY_SECURITY_TOKEN, ns::WSSE),
            child(ns::node::TIMESTAMP, ns::WSU),
        ];
        let check = |layout, events: &[SecurityEvent]| {
            evaluate(&Policy::new(Assertion::Layout(layout)), events).is_satisfied()
        };
        assert!(check(Layout::Lax, &ts_last));
        assert!(check(Layout::LaxTsLast, &ts_last));
        assert!(!check(Layout::LaxTsFirst, &ts_last));
        assert!(!check(Layout::Strict, &ts_last));

        let used_first = vec![SecurityEvent::SignatureValue {
            token: "X509-1".into(),
            algorithm: algorithm::RSA_SHA256.into(),
        }];
        assert!(!check(Layout::Strict, &used_first));
    }

    #[test]
    fn test_signed_supporting_token() {
        let saml = SecurityEvent::TokenValidated {
            token: "_a1".into(),
            kind: TokenKind::Saml,
        };
        let tokens = |signed| {
            Policy::new(Assertion::SupportingTokens(SupportingTokens {
                token: TokenKind::Saml,
                signed,
                children: Vec::new(),
            }))
        };
        assert!(evaluate(&tokens(false), std::slice::from_ref(&saml)).is_satisfied());
        assert!(!evaluate(&tokens(true), std::slice::from_ref(&saml)).is_satisfied());
        assert!(evaluate(&tokens(true), &[saml, signed(vec![], "_a1")]).is_satisfied());
        assert!(!evaluate(&tokens(false), &[]).is_satisfied());
    }

    #[test]
    fn test_all_reports_every_failure() {
        let policy = Policy::new(Assertion::All(vec![
            Assertion::IncludeTimestamp,
            Assertion::signed_body(),
            Assertion::EncryptedElements(vec![body()]),
        ]));
        let outcome = evaluate(&policy, &[]);
        assert_eq!(outcome.failures().len(), 3);
        assert!(outcome.to_string().starts_with("policy not satisfied"));
        assert!(evaluate(&Policy::empty(), &[]).is_satisfied());
    }
}
