use std::sync::Arc;

use chrono::Duration;
use solna_core::{algorithm, ns};
use solna_keys::{Key, KeysManager};
use solna_policy::{evaluate, PolicyBuilder};
use solna_wss::{InboundPipeline, OutboundPipeline, OutboundProperties, ProcessedMessage, SecurityProperties};

fn shared() -> Key {
    Key::secret("shared", vec![0x42; 32])
}

fn received(outbound: OutboundProperties) -> ProcessedMessage {
    let plain = format!(
        r#"<soap:Envelope xmlns:soap="{}"><soap:Body><m:Ping xmlns:m="urn:example:ping">hello</m:Ping></soap:Body></soap:Envelope>"#,
        ns::SOAP11
    );
    let secured = OutboundPipeline::new(outbound).process_str(&plain).unwrap().to_xml();
    let keys = KeysManager::new().with_key(shared());
    InboundPipeline::new(SecurityProperties::new(Arc::new(keys)))
        .process_str(&secured)
        .unwrap()
}

fn policy(binding: &str) -> String {
    format!(
        r#"<wsp:Policy xmlns:wsp="{wsp}" xmlns:sp="{sp}">
            <sp:{binding}><wsp:Policy>
                <sp:AlgorithmSuite><wsp:Policy><sp:Basic256Sha256/></wsp:Policy></sp:AlgorithmSuite>
                <sp:Layout><wsp:Policy><sp:Lax/></wsp:Policy></sp:Layout>
                <sp:IncludeTimestamp/>
            </wsp:Policy></sp:{binding}>
            <sp:SignedParts><sp:Body/></sp:SignedParts>
        </wsp:Policy>"#,
        wsp = ns::WSP,
        sp = ns::SP12
    )
}

fn signed_and_timestamped() -> OutboundProperties {
    OutboundProperties::new()
        .with_timestamp(Duration::seconds(300))
        .with_signature(shared(), algorithm::HMAC_SHA256)
}

#[test]
fn test_symmetric_policy_satisfied() {
    let message = received(signed_and_timestamped());
    let policy = PolicyBuilder::from_xml(&policy("SymmetricBinding")).unwrap();
    let outcome = evaluate(&policy, &message.security_events);
    assert!(outcome.is_satisfied(), "{outcome}");
}

#[test]
fn test_asymmetric_policy_rejects_shared_key() {
    let message = received(signed_and_timestamped());
    let policy = PolicyBuilder::from_xml(&policy("AsymmetricBinding")).unwrap();
    let outcome = evaluate(&policy, &message.security_events);
    assert!(!outcome.is_satisfied());
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].assertion, "AsymmetricBinding");
}

#[test]
fn test_missing_timestamp_reported() {
    let message = received(OutboundProperties::new().with_signature(shared(), algorithm::HMAC_SHA256));
    let policy = PolicyBuilder::from_xml(&policy("SymmetricBinding")).unwrap();
    let outcome = evaluate(&policy, &message.security_events);
    assert!(
        outcome.failures().iter().any(|failure| failure.reason.contains("no timestamp")),
        "{outcome}"
    );
}
