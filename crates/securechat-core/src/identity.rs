//! Certificate parsing and validation.
//!
//! A [`Certificate`] is parsed once from PEM and holds owned copies of
//! everything the protocol needs: raw issuer/subject names, Common Name,
//! validity window, RSA public key, and the TBS bytes and signature used for
//! chain verification.
//!
//! [`validate`] is a pure function of its inputs. The only side effect is a
//! warning log when [`ChainVerification::Lenient`] lets a bad signature
//! through.

use std::path::Path;

use securechat_crypto::{RsaPrivateKey, RsaPublicKey, sha256_hex, sign};
use thiserror::Error;
use x509_parser::{certificate::X509Certificate, pem::parse_x509_pem, prelude::FromDer};

/// OID of `sha256WithRSAEncryption`.
const SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";

/// Certificate validation failures.
///
/// All variants are fatal for the session (`BAD_CERT`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// PEM or DER could not be parsed.
    #[error("malformed certificate: {0}")]
    Malformed(String),

    /// Subject public key is not RSA.
    #[error("unsupported public key: {0}")]
    UnsupportedKey(String),

    /// Issuer name differs from the trust anchor's subject name.
    #[error("issuer does not match trust anchor")]
    IssuerMismatch,

    /// Signature over the TBS bytes does not verify under the anchor key.
    #[error("certificate signature invalid")]
    SignatureInvalid,

    /// Signature algorithm other than `sha256WithRSAEncryption`.
    #[error("unsupported signature algorithm {0}")]
    UnsupportedSignatureAlgorithm(String),

    /// `now` is before `not_before`.
    #[error("certificate not yet valid (not_before {not_before}, now {now})")]
    NotYetValid {
        /// Start of validity, Unix seconds
        not_before: i64,
        /// Validation time, Unix seconds
        now: i64,
    },

    /// `now` is after `not_after`.
    #[error("certificate expired (not_after {not_after}, now {now})")]
    Expired {
        /// End of validity, Unix seconds
        not_after: i64,
        /// Validation time, Unix seconds
        now: i64,
    },

    /// Common Name missing or different from the expected name.
    #[error("CN mismatch: expected {expected}, got {}", actual.as_deref().unwrap_or("<none>"))]
    NameMismatch {
        /// Required Common Name
        expected: String,
        /// Common Name found in the certificate
        actual: Option<String>,
    },

    /// Private key does not belong to the certificate.
    #[error("private key does not match certificate")]
    KeyMismatch,

    /// File could not be read.
    #[error("failed to read {path}: {reason}")]
    Io {
        /// File path
        path: String,
        /// OS error text
        reason: String,
    },
}

/// How strictly [`validate`] treats the issuer signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainVerification {
    /// Reject certificates whose signature does not verify under the anchor.
    #[default]
    Strict,
    /// Log signature failures and continue. Issuer name, validity and CN are
    /// still enforced.
    Lenient,
}

/// Parsed X.509 certificate with an RSA subject key.
///
/// Immutable after parsing.
#[derive(Clone)]
pub struct Certificate {
    pem: String,
    der: Vec<u8>,
    issuer: Vec<u8>,
    subject: Vec<u8>,
    common_name: Option<String>,
    not_before: i64,
    not_after: i64,
    public_key: RsaPublicKey,
    tbs: Vec<u8>,
    signature: Vec<u8>,
    signature_algorithm: String,
    fingerprint: String,
}

impl Certificate {
    /// Parse a single PEM `CERTIFICATE` block.
    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        let (_, block) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| CertificateError::Malformed(format!("invalid PEM: {e}")))?;

        if block.label != "CERTIFICATE" {
            return Err(CertificateError::Malformed(format!("unexpected PEM label {}", block.label)));
        }

        Self::parse(pem.trim().to_string(), block.contents)
    }

    /// Read and parse a PEM file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CertificateError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| CertificateError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_pem(&pem)
    }

    fn parse(pem: String, der: Vec<u8>) -> Result<Self, CertificateError> {
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| CertificateError::Malformed(format!("invalid DER: {e}")))?;

        let public_key = sign::public_key_from_spki_der(cert.public_key().raw)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let validity = cert.validity();

        Ok(Self {
            issuer: cert.issuer().as_raw().to_vec(),
            subject: cert.subject().as_raw().to_vec(),
            common_name,
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            public_key,
            tbs: cert.tbs_certificate.as_ref().to_vec(),
            signature: cert.signature_value.data.to_vec(),
            signature_algorithm: cert.signature_algorithm.algorithm.to_id_string(),
            fingerprint: sha256_hex(&der),
            pem,
            der,
        })
    }

    /// Original PEM text, trimmed.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Raw DER issuer name.
    pub fn issuer(&self) -> &[u8] {
        &self.issuer
    }

    /// Raw DER subject name.
    pub fn subject(&self) -> &[u8] {
        &self.subject
    }

    /// Subject Common Name.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Start of validity, Unix seconds.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of validity, Unix seconds.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Subject RSA public key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Lowercase hex SHA-256 of the DER encoding.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

/// Validate `cert` against a single trust anchor.
///
/// Checks short-circuit in order: issuer name, issuer signature, validity
/// window, then Common Name (only when `expected_name` is given). CN
/// comparison is exact and case-sensitive.
pub fn validate(
    cert: &Certificate,
    anchor: &Certificate,
    expected_name: Option<&str>,
    now_secs: i64,
    policy: ChainVerification,
) -> Result<(), CertificateError> {
    if cert.issuer != anchor.subject {
        return Err(CertificateError::IssuerMismatch);
    }

    if let Err(err) = verify_issuer_signature(cert, anchor) {
        match policy {
            ChainVerification::Strict => return Err(err),
            ChainVerification::Lenient => {
                tracing::warn!(
                    fingerprint = %cert.fingerprint,
                    error = %err,
                    "accepting certificate without a valid issuer signature"
                );
            },
        }
    }

    if now_secs < cert.not_before {
        return Err(CertificateError::NotYetValid { not_before: cert.not_before, now: now_secs });
    }
    if now_secs > cert.not_after {
        return Err(CertificateError::Expired { not_after: cert.not_after, now: now_secs });
    }

    if let Some(expected) = expected_name {
        if cert.common_name.as_deref() != Some(expected) {
            return Err(CertificateError::NameMismatch {
                expected: expected.to_string(),
                actual: cert.common_name.clone(),
            });
        }
    }

    Ok(())
}

fn verify_issuer_signature(cert: &Certificate, anchor: &Certificate) -> Result<(), CertificateError> {
    if cert.signature_algorithm != SHA256_WITH_RSA {
        return Err(CertificateError::UnsupportedSignatureAlgorithm(
            cert.signature_algorithm.clone(),
        ));
    }

    sign::verify(&anchor.public_key, &cert.tbs, &cert.signature)
        .map_err(|_| CertificateError::SignatureInvalid)
}

/// A certificate paired with its private key.
#[derive(Clone)]
pub struct LocalIdentity {
    certificate: Certificate,
    private_key: RsaPrivateKey,
}

impl LocalIdentity {
    /// Pair a certificate with its key.
    ///
    /// # Errors
    ///
    /// - `CertificateError::KeyMismatch` if the key's public half differs
    ///   from the certificate's
    pub fn new(certificate: Certificate, private_key: RsaPrivateKey) -> Result<Self, CertificateError> {
        if private_key.to_public_key() != certificate.public_key {
            return Err(CertificateError::KeyMismatch);
        }
        Ok(Self { certificate, private_key })
    }

    /// Load a PEM certificate and PEM private key from disk.
    pub fn load(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, CertificateError> {
        let certificate = Certificate::load(cert_path)?;

        let key_path = key_path.as_ref();
        let key_pem = zeroize::Zeroizing::new(std::fs::read_to_string(key_path).map_err(|e| {
            CertificateError::Io { path: key_path.display().to_string(), reason: e.to_string() }
        })?);
        let private_key = sign::private_key_from_pem(&key_pem)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;

        Self::new(certificate, private_key)
    }

    /// Our certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Our signing key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity").field("certificate", &self.certificate).finish_non_exhaustive()
    }
}
