#![forbid(unsafe_code)]

//! XML namespace constants used across the library.

/// SOAP 1.1 envelope namespace
pub const SOAP11: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SOAP 1.2 envelope namespace
pub const SOAP12: &str = "http://www.w3.org/2003/05/soap-envelope";

/// WS-Security 1.0 secext namespace
pub const WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

/// WS-Security 1.1 namespace
pub const WSSE11: &str = "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd";

/// WS-Security utility namespace
pub const WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

/// XML Digital Signature namespace
pub const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

/// XML Encryption namespace
pub const ENC: &str = "http://www.w3.org/2001/04/xmlenc#";

/// Exclusive C14N namespace
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// SAML 1.x assertion namespace
pub const SAML1: &str = "urn:oasis:names:tc:SAML:1.0:assertion";

/// SAML 2.0 assertion namespace
pub const SAML2: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// WS-Trust 1.3 namespace
pub const WST: &str = "http://docs.oasis-open.org/ws-sx/ws-trust/200512";

/// WS-Trust February 2005 namespace
pub const WST_0502: &str = "http://schemas.xmlsoap.org/ws/2005/02/trust";

/// WS-Policy namespace
pub const WSP: &str = "http://www.w3.org/ns/ws-policy";

/// WS-Policy 1.2 (2004/09) namespace
pub const WSP_2004: &str = "http://schemas.xmlsoap.org/ws/2004/09/policy";

/// WS-SecurityPolicy 1.2 namespace
pub const SP12: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702";

/// WS-SecurityPolicy 1.3 namespace
pub const SP13: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200802";

/// XML namespace
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";

/// Conventional prefixes used when emitting elements.
pub mod prefix {
    pub const SOAP: &str = "soap";
    pub const WSSE: &str = "wsse";
    pub const WSU: &str = "wsu";
    pub const DSIG: &str = "ds";
    pub const ENC: &str = "xenc";
}

// ── Element names ────────────────────────────────────────────────────

pub mod node {
    // SOAP elements
    pub const ENVELOPE: &str = "Envelope";
    pub const HEADER: &str = "Header";
    pub const BODY: &str = "Body";

    // WS-Security elements
    pub const SECURITY: &str = "Security";
    pub const BINARY_SECURITY_TOKEN: &str = "BinarySecurityToken";
    pub const SECURITY_TOKEN_REFERENCE: &str = "SecurityTokenReference";
    pub const REFERENCE: &str = "Reference";
    pub const KEY_IDENTIFIER: &str = "KeyIdentifier";
    pub const ENCRYPTED_HEADER: &str = "EncryptedHeader";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const CREATED: &str = "Created";
    pub const EXPIRES: &str = "Expires";

    // DSig elements
    pub const SIGNATURE: &str = "Signature";
    pub const SIGNED_INFO: &str = "SignedInfo";
    pub const CANONICALIZATION_METHOD: &str = "CanonicalizationMethod";
    pub const SIGNATURE_METHOD: &str = "SignatureMethod";
    pub const SIGNATURE_VALUE: &str = "SignatureValue";
    pub const DIGEST_METHOD: &str = "DigestMethod";
    pub const DIGEST_VALUE: &str = "DigestValue";
    pub const TRANSFORMS: &str = "Transforms";
    pub const TRANSFORM: &str = "Transform";
    pub const INCLUSIVE_NAMESPACES: &str = "InclusiveNamespaces";

    // KeyInfo elements
    pub const KEY_INFO: &str = "KeyInfo";
    pub const KEY_NAME: &str = "KeyName";
    pub const KEY_VALUE: &str = "KeyValue";
    pub const RSA_KEY_VALUE: &str = "RSAKeyValue";
    pub const RSA_MODULUS: &str = "Modulus";
    pub const RSA_EXPONENT: &str = "Exponent";
    pub const X509_DATA: &str = "X509Data";
    pub const X509_CERTIFICATE: &str = "X509Certificate";
    pub const X509_ISSUER_SERIAL: &str = "X509IssuerSerial";
    pub const X509_ISSUER_NAME: &str = "X509IssuerName";
    pub const X509_SERIAL_NUMBER: &str = "X509SerialNumber";

    // Encryption elements
    pub const ENCRYPTED_DATA: &str = "EncryptedData";
    pub const ENCRYPTED_KEY: &str = "EncryptedKey";
    pub const ENCRYPTION_METHOD: &str = "EncryptionMethod";
    pub const CIPHER_DATA: &str = "CipherData";
    pub const CIPHER_VALUE: &str = "CipherValue";
    pub const REFERENCE_LIST: &str = "ReferenceList";
    pub const DATA_REFERENCE: &str = "DataReference";

    // SAML elements
    pub const ASSERTION: &str = "Assertion";
    pub const ISSUER: &str = "Issuer";
    pub const SUBJECT: &str = "Subject";
    pub const SUBJECT_CONFIRMATION: &str = "SubjectConfirmation";
    pub const SUBJECT_CONFIRMATION_DATA: &str = "SubjectConfirmationData";
    pub const CONFIRMATION_METHOD: &str = "ConfirmationMethod";
    pub const CONDITIONS: &str = "Conditions";
    pub const AUTHENTICATION_STATEMENT: &str = "AuthenticationStatement";
    pub const ATTRIBUTE_STATEMENT: &str = "AttributeStatement";

    // WS-Trust elements
    pub const BINARY_SECRET: &str = "BinarySecret";
}

// ── Attribute names ──────────────────────────────────────────────────

pub mod attr {
    pub const ID: &str = "Id";
    pub const SAML2_ID: &str = "ID";
    pub const SAML1_ID: &str = "AssertionID";
    pub const URI: &str = "URI";
    pub const TYPE: &str = "Type";
    pub const ALGORITHM: &str = "Algorithm";
    pub const VALUE_TYPE: &str = "ValueType";
    pub const ENCODING_TYPE: &str = "EncodingType";
    pub const PREFIX_LIST: &str = "PrefixList";
    pub const METHOD: &str = "Method";
    pub const MUST_UNDERSTAND: &str = "mustUnderstand";
    pub const NOT_BEFORE: &str = "NotBefore";
    pub const NOT_ON_OR_AFTER: &str = "NotOnOrAfter";
    pub const MAJOR_VERSION: &str = "MajorVersion";
    pub const VERSION: &str = "Version";
}

/// Returns `true` when `uri` is one of the SOAP envelope namespaces.
pub fn is_soap(uri: &str) -> bool {
    uri == SOAP11 || uri == SOAP12
}
