//! TLS certificate inspection
//!
//! Opens one TLS connection per service and extracts health facts from the
//! leaf certificate. Trust is not enforced during the handshake, so
//! expired or self-signed certificates are still read and reported.

use crate::errors::{JanuscopeError, Result};
use crate::models::{CertificateCheckResult, Service};
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::prelude::*;

pub const NOT_HTTPS: &str = "Not an HTTPS URL";

#[derive(Clone)]
pub struct CertificateInspector {
    connector: TlsConnector,
    timeout: Duration,
}

impl std::fmt::Debug for CertificateInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateInspector")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CertificateInspector {
    /// Create an inspector with a connect and handshake timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = AcceptAnyServerCert {
            algorithms: provider.signature_verification_algorithms,
        };

        let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| JanuscopeError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
        })
    }

    /// Inspect the certificate presented by a service. Never fails: every
    /// error is folded into a result with `valid = false`.
    pub async fn inspect(&self, service: &Service) -> CertificateCheckResult {
        if !service.is_https() {
            return CertificateCheckResult::failure(service.id, "", NOT_HTTPS);
        }

        let (host, port) = match target_of(&service.url) {
            Ok(target) => target,
            Err(e) => return CertificateCheckResult::failure(service.id, "", e.to_string()),
        };

        let der = match self.fetch_leaf(&host, port).await {
            Ok(der) => der,
            Err(e) => {
                warn!("Certificate check for {} failed: {}", host, e);
                return CertificateCheckResult::failure(service.id, host, e.to_string());
            }
        };

        match analyze_certificate(&der, Utc::now()) {
            Ok(facts) => {
                debug!(
                    "Certificate for {} valid={} days_remaining={}",
                    host, facts.valid, facts.days_remaining
                );
                facts.into_result(service.id, host)
            }
            Err(e) => CertificateCheckResult::failure(service.id, host, e.to_string()),
        }
    }

    /// Connect, handshake and return the DER of the leaf certificate
    async fn fetch_leaf(&self, host: &str, port: u16) -> Result<Vec<u8>> {
        let stream = timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| JanuscopeError::Tls(format!("Connection to {}:{} timed out", host, port)))?
            .map_err(|e| JanuscopeError::Tls(format!("Connection to {}:{} failed: {}", host, port, e)))?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| JanuscopeError::Tls(format!("Invalid server name: {}", host)))?;

        let tls = timeout(self.timeout, self.connector.connect(server_name, stream))
            .await
            .map_err(|_| JanuscopeError::Tls(format!("TLS handshake with {} timed out", host)))?
            .map_err(|e| JanuscopeError::Tls(format!("TLS handshake with {} failed: {}", host, e)))?;

        let (_, connection) = tls.get_ref();
        let leaf = connection
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| JanuscopeError::Certificate("No certificate presented".to_string()))?;

        Ok(leaf.as_ref().to_vec())
    }
}

fn target_of(raw: &str) -> Result<(String, u16)> {
    let url = Url::parse(raw.trim())?;
    let host = url
        .host_str()
        .ok_or_else(|| JanuscopeError::Other(format!("URL has no host: {}", raw)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);
    Ok((host, port))
}

/// Facts read from one DER certificate
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateFacts {
    pub issuer: String,
    pub subject: String,
    pub serial_number: String,
    pub algorithm: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub days_remaining: i64,
    pub key_size: Option<u32>,
    pub fingerprint: String,
    pub self_signed: bool,
    pub valid: bool,
}

impl CertificateFacts {
    fn into_result(self, service_id: i64, domain: String) -> CertificateCheckResult {
        CertificateCheckResult {
            id: Uuid::new_v4(),
            service_id,
            domain,
            issuer: Some(self.issuer),
            subject: Some(self.subject),
            valid_from: Some(self.valid_from),
            valid_to: Some(self.valid_to),
            days_remaining: Some(self.days_remaining),
            serial_number: Some(self.serial_number),
            fingerprint: Some(self.fingerprint),
            algorithm: Some(self.algorithm),
            key_size: self.key_size,
            self_signed: self.self_signed,
            valid: self.valid,
            error_message: None,
            checked_at: Utc::now(),
        }
    }
}

/// Parse a DER certificate and evaluate it at `now`
pub fn analyze_certificate(der: &[u8], now: DateTime<Utc>) -> Result<CertificateFacts> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| JanuscopeError::Certificate(format!("Failed to parse certificate: {}", e)))?;

    let validity = cert.validity();
    let valid_from = to_utc(validity.not_before.timestamp())?;
    let valid_to = to_utc(validity.not_after.timestamp())?;

    let issuer = cert.issuer().to_string();
    let subject = cert.subject().to_string();

    let algorithm_oid = &cert.signature_algorithm.algorithm;
    let algorithm = oid2sn(algorithm_oid, oid_registry())
        .map(str::to_string)
        .unwrap_or_else(|_| algorithm_oid.to_id_string());

    let key_size = match cert.public_key().parsed() {
        Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => Some(rsa.key_size() as u32),
        Ok(x509_parser::public_key::PublicKey::EC(ec)) => Some(ec.key_size() as u32),
        _ => None,
    }
    .filter(|bits| *bits > 0);

    Ok(CertificateFacts {
        self_signed: issuer == subject,
        valid: valid_from <= now && now <= valid_to,
        days_remaining: days_between(now, valid_to),
        serial_number: format!("{:X}", cert.serial),
        fingerprint: fingerprint_sha256(der),
        issuer,
        subject,
        algorithm,
        valid_from,
        valid_to,
        key_size,
    })
}

/// Calendar-day difference; negative when `to` is in the past
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

/// SHA-256 over the DER encoding as colon-separated uppercase hex pairs
pub fn fingerprint_sha256(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| JanuscopeError::Certificate(format!("Timestamp out of range: {}", timestamp)))
}

/// Accepts any presented chain but still checks handshake signatures
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
