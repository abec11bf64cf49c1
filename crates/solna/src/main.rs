#![forbid(unsafe_code)]

//! Solna CLI: verify and secure WS-Security SOAP messages.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::Duration;
use clap::{Parser, Subcommand};
use solna_core::{algorithm, Error};
use solna_crypto::KeyMaterial;
use solna_keys::loader::{load_certificate_file, load_key_file};
use solna_keys::{Key, KeysManager};
use solna_policy::{evaluate, Policy, PolicyFile, PolicySource};
use solna_wss::{InboundPipeline, OutboundPipeline, OutboundProperties, SecurityProperties};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Upper bound for timestamp lifetimes, one year.
const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Parser)]
#[command(name = "solna", about = "Solna: streaming WS-Security for SOAP messages", version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify and decrypt a secured SOAP message
    Verify {
        /// Input SOAP message
        file: PathBuf,

        /// WS-SecurityPolicy document the message must satisfy
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Load key with a name (NAME:FILE)
        #[arg(short = 'K', long = "key-name")]
        key_name: Vec<String>,

        /// Client certificate of the transport channel (PEM or DER)
        #[arg(long = "transport-cert")]
        transport_cert: Option<PathBuf>,

        /// Trusted certificate that signing certificates must chain to (PEM or DER)
        #[arg(long)]
        trusted: Vec<PathBuf>,

        /// Untrusted intermediate certificate for chain building (PEM or DER)
        #[arg(long)]
        untrusted: Vec<PathBuf>,

        /// Maximum timestamp age in seconds
        #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(i64).range(0..=MAX_TTL_SECONDS))]
        ttl: i64,

        /// Record timestamp violations instead of rejecting the message
        #[arg(long = "lenient-timestamp")]
        lenient_timestamp: bool,

        /// Accept encrypted data outside the Basic Security Profile
        #[arg(long = "lenient-compliance")]
        lenient_compliance: bool,

        /// Remove the security header from the output
        #[arg(long = "strip-header")]
        strip_header: bool,
    },

    /// Add a security header to a SOAP message
    Secure {
        /// Input SOAP message
        file: PathBuf,

        /// Key used to sign and encrypt (NAME:FILE)
        #[arg(short = 'K', long = "key-name")]
        key_name: String,

        /// Add a timestamp
        #[arg(long)]
        timestamp: bool,

        /// Sign the body (and the timestamp)
        #[arg(long)]
        sign: bool,

        /// Encrypt the body content
        #[arg(long)]
        encrypt: bool,

        /// Timestamp lifetime in seconds
        #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS))]
        ttl: i64,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Verify {
            file,
            policy,
            key_name,
            transport_cert,
            trusted,
            untrusted,
            ttl,
            lenient_timestamp,
            lenient_compliance,
            strip_header,
        } => {
            let options = VerifyOptions {
                transport_cert,
                trusted,
                untrusted,
                ttl,
                lenient_timestamp,
                lenient_compliance,
                strip_header,
            };
            cmd_verify(&file, policy, &key_name, options)
        }

        Commands::Secure {
            file,
            key_name,
            timestamp,
            sign,
            encrypt,
            ttl,
            output,
        } => cmd_secure(&file, &key_name, Actions { timestamp, sign, encrypt }, ttl, output),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e} ({:?})", e.kind());
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct VerifyOptions {
    transport_cert: Option<PathBuf>,
    trusted: Vec<PathBuf>,
    untrusted: Vec<PathBuf>,
    ttl: i64,
    lenient_timestamp: bool,
    lenient_compliance: bool,
    strip_header: bool,
}

/// Returns whether the message satisfied the policy.
fn cmd_verify(
    file: &Path,
    policy: Option<PathBuf>,
    key_names: &[String],
    options: VerifyOptions,
) -> Result<bool, Error> {
    let xml = read_file(file)?;
    let policy = match policy {
        Some(path) => PolicyFile::new(path).policy()?,
        None => Policy::empty(),
    };

    let mut keys = KeysManager::new();
    for spec in key_names {
        keys.add_key(load_named_key(spec)?);
    }
    for path in &options.trusted {
        keys.add_trusted_certificate(load_certificate_file(path)?);
    }
    for path in &options.untrusted {
        keys.add_intermediate_certificate(load_certificate_file(path)?);
    }

    let mut properties = SecurityProperties::new(Arc::new(keys))
        .with_timestamp_ttl(ttl_duration(options.ttl)?)
        .with_strict_timestamp(!options.lenient_timestamp)
        .with_strict_compliance(!options.lenient_compliance)
        .with_strip_security_header(options.strip_header);
    if let Some(path) = &options.transport_cert {
        properties = properties.with_transport_certificate(load_certificate_file(path)?);
    }

    info!(file = %file.display(), "verifying");
    let message = InboundPipeline::new(properties).process_str(&xml)?;
    for event in &message.security_events {
        debug!(?event, "security event");
    }
    println!("{}", message.to_xml());

    let outcome = evaluate(&policy, &message.security_events);
    if outcome.is_satisfied() {
        eprintln!("policy: satisfied");
    } else {
        eprintln!("policy: NOT satisfied");
        eprintln!("{outcome}");
    }
    Ok(outcome.is_satisfied())
}

struct Actions {
    timestamp: bool,
    sign: bool,
    encrypt: bool,
}

fn cmd_secure(
    file: &Path,
    key_name: &str,
    actions: Actions,
    ttl: i64,
    output: Option<PathBuf>,
) -> Result<bool, Error> {
    if !(actions.timestamp || actions.sign || actions.encrypt) {
        return Err(Error::Other(
            "nothing to do: give at least one of --timestamp, --sign, --encrypt".into(),
        ));
    }
    let xml = read_file(file)?;
    let key = load_named_key(key_name)?;

    let mut properties = OutboundProperties::new();
    if actions.timestamp {
        properties = properties.with_timestamp(ttl_duration(ttl)?);
    }
    if actions.sign {
        let method = signature_method(&key.material);
        properties = properties.with_signature(key.clone(), method);
    }
    if actions.encrypt {
        properties = properties.with_encryption(key, algorithm::AES256_CBC);
    }

    info!(file = %file.display(), "securing");
    let message = OutboundPipeline::new(properties).process_str(&xml)?;
    write_output(output, &message.to_xml())?;
    Ok(true)
}

fn signature_method(material: &KeyMaterial) -> &'static str {
    match material {
        KeyMaterial::RsaPrivate(_) | KeyMaterial::RsaPublic(_) => algorithm::RSA_SHA256,
        KeyMaterial::EcP256Private(_) | KeyMaterial::EcP256Public(_) => algorithm::ECDSA_SHA256,
        KeyMaterial::EcP384Private(_) | KeyMaterial::EcP384Public(_) => algorithm::ECDSA_SHA384,
        KeyMaterial::Secret(_) => algorithm::HMAC_SHA256,
    }
}

// ── Utility functions ────────────────────────────────────────────────

fn ttl_duration(seconds: i64) -> Result<Duration, Error> {
    Duration::try_seconds(seconds)
        .filter(|ttl| *ttl >= Duration::zero())
        .ok_or_else(|| Error::Other(format!("invalid ttl: {seconds} seconds")))
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &str) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(|e| Error::Other(format!("{}: {e}", p.display()))),
        None => {
            println!("{data}");
            Ok(())
        }
    }
}

/// Load a key given as `NAME:FILE`.
fn load_named_key(spec: &str) -> Result<Key, Error> {
    let (name, file) = split_key_name(spec)?;
    let material = load_key_file(Path::new(file))?;
    Ok(Key::new(name, material))
}

fn split_key_name(spec: &str) -> Result<(&str, &str), Error> {
    match spec.split_once(':') {
        Some((name, file)) if !name.is_empty() && !file.is_empty() => Ok((name, file)),
        _ => Err(Error::Other(format!(
            "invalid key-name format: {spec} (expected NAME:FILE)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_name() {
        assert_eq!(split_key_name("shared:/tmp/key.bin").unwrap(), ("shared", "/tmp/key.bin"));
        assert!(split_key_name("no-separator").is_err());
        assert!(split_key_name(":file").is_err());
    }

    #[test]
    fn test_cli_parses_verify() {
        let cli = Cli::try_parse_from([
            "solna",
            "verify",
            "message.xml",
            "--key-name",
            "shared:key.bin",
            "--lenient-timestamp",
            "--ttl",
            "60",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Verify { key_name, ttl, lenient_timestamp, strip_header, .. } => {
                assert_eq!(key_name, vec!["shared:key.bin".to_owned()]);
                assert_eq!(ttl, 60);
                assert!(lenient_timestamp);
                assert!(!strip_header);
            }
            Commands::Secure { .. } => panic!("parsed as secure"),
        }
    }

    #[test]
    fn test_ttl_out_of_range_rejected() {
        for ttl in ["-5", "99999999999999", "31536001"] {
            let parsed = Cli::try_parse_from(["solna", "verify", "message.xml", "--ttl", ttl]);
            assert!(parsed.is_err(), "ttl {ttl} accepted");
        }
        let parsed = Cli::try_parse_from(["solna", "secure", "m.xml", "-K", "k:f", "--ttl", "0"]);
        assert!(parsed.is_err());

        assert!(ttl_duration(-1).is_err());
        assert!(ttl_duration(i64::MAX).is_err());
        assert_eq!(ttl_duration(60).unwrap(), Duration::seconds(60));
    }

    #[test]
    fn test_cli_parses_trust_options() {
        let cli = Cli::try_parse_from([
            "solna",
            "verify",
            "message.xml",
            "--trusted",
            "ca.pem",
            "--untrusted",
            "intermediate.pem",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify { trusted, untrusted, .. } => {
                assert_eq!(trusted, vec![PathBuf::from("ca.pem")]);
                assert_eq!(untrusted, vec![PathBuf::from("intermediate.pem")]);
            }
            Commands::Secure { .. } => panic!("parsed as secure"),
        }
    }

    #[test]
    fn test_signature_method_follows_key() {
        let secret = KeyMaterial::Secret(vec![0; 32]);
        assert_eq!(signature_method(&secret), algorithm::HMAC_SHA256);
    }
}
