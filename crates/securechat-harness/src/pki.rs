//! Test certificate authority.
//!
//! Built once per test binary (RSA key generation is the slow part) from a
//! fixed seed. Besides the good server and client identities it carries the
//! certificates that must be rejected: expired, not yet valid, wrong name,
//! foreign issuer and a rogue CA that copies the real CA's name.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, PKCS_RSA_SHA256, date_time_ymd,
};
use rsa::{
    RsaPrivateKey,
    pkcs8::{EncodePrivateKey, LineEnding},
};
use securechat_core::{Certificate, LocalIdentity};

const PKI_SEED: u64 = 0x5EC0_C4A7;
const RSA_BITS: usize = 2048;

/// Common Name of the fixture CA (also copied by the rogue CA).
pub const CA_NAME: &str = "SecureChat Test Root CA";
/// Server certificate Common Name.
pub const SERVER_NAME: &str = "server.local";
/// Client certificate Common Name.
pub const CLIENT_NAME: &str = "client.local";

/// A certificate with its private key.
pub struct Party {
    /// Parsed certificate
    pub certificate: Certificate,
    /// Private key
    pub private_key: RsaPrivateKey,
    /// Private key as PKCS#8 PEM
    pub key_pem: String,
}

impl Party {
    /// Identity for a session.
    #[allow(clippy::expect_used)]
    pub fn identity(&self) -> Arc<LocalIdentity> {
        Arc::new(
            LocalIdentity::new(self.certificate.clone(), self.private_key.clone())
                .expect("invariant: fixture key matches its certificate"),
        )
    }
}

/// Fixture PKI.
pub struct Pki {
    /// Trust anchor
    pub ca: Certificate,
    /// `CN=server.local`, signed by the CA
    pub server: Party,
    /// `CN=client.local`, signed by the CA
    pub client: Party,
    /// Client key, validity 2020-01-01..2021-01-01
    pub expired_client: Certificate,
    /// Client key, validity 2040-01-01..2050-01-01
    pub future_client: Certificate,
    /// Server key, `CN=evil.local`, signed by the CA
    pub misnamed_server: Certificate,
    /// Client key, signed by a CA with a different name
    pub foreign_client: Certificate,
    /// Client key, signed by a rogue CA carrying the real CA's name
    pub rogue_client: Certificate,
}

/// Paths written by [`Pki::write_to`].
#[derive(Debug, Clone)]
pub struct PkiFiles {
    /// CA certificate PEM
    pub ca_cert: PathBuf,
    /// Server certificate PEM
    pub server_cert: PathBuf,
    /// Server key PEM
    pub server_key: PathBuf,
    /// Client certificate PEM
    pub client_cert: PathBuf,
    /// Client key PEM
    pub client_key: PathBuf,
}

impl Pki {
    /// Shared trust anchor.
    pub fn anchor(&self) -> Arc<Certificate> {
        Arc::new(self.ca.clone())
    }

    /// Write CA, server and client material as PEM files into `dir`.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PkiFiles> {
        let files = PkiFiles {
            ca_cert: dir.join("ca.crt"),
            server_cert: dir.join("server.crt"),
            server_key: dir.join("server.key"),
            client_cert: dir.join("client.crt"),
            client_key: dir.join("client.key"),
        };

        std::fs::write(&files.ca_cert, self.ca.pem())?;
        std::fs::write(&files.server_cert, self.server.certificate.pem())?;
        std::fs::write(&files.server_key, &self.server.key_pem)?;
        std::fs::write(&files.client_cert, self.client.certificate.pem())?;
        std::fs::write(&files.client_key, &self.client.key_pem)?;

        Ok(files)
    }
}

/// The fixture PKI, generated on first use.
pub fn pki() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(build)
}

struct Signer {
    cert: rcgen::Certificate,
    key: KeyPair,
}

#[allow(clippy::expect_used)]
fn build() -> Pki {
    let mut rng = ChaCha20Rng::seed_from_u64(PKI_SEED);
    let mut rsa_key = || {
        let key = RsaPrivateKey::new(&mut rng, RSA_BITS).expect("invariant: RSA key generation");
        let pem = key.to_pkcs8_pem(LineEnding::LF).expect("invariant: PKCS#8 encoding").to_string();
        (key, pem)
    };

    let (_, ca_pem) = rsa_key();
    let (_, rogue_pem) = rsa_key();
    let (server_key, server_pem) = rsa_key();
    let (client_key, client_pem) = rsa_key();

    let ca = authority(CA_NAME, &ca_pem);
    let rogue = authority(CA_NAME, &rogue_pem);
    let foreign = authority("Some Other Root CA", &rogue_pem);

    let current = (2024, 2034);

    tracing::debug!("fixture PKI generated");

    Pki {
        ca: parse(&ca.cert.pem()),
        server: Party {
            certificate: leaf(&ca, SERVER_NAME, &server_pem, current),
            private_key: server_key,
            key_pem: server_pem.clone(),
        },
        client: Party {
            certificate: leaf(&ca, CLIENT_NAME, &client_pem, current),
            private_key: client_key,
            key_pem: client_pem.clone(),
        },
        expired_client: leaf(&ca, CLIENT_NAME, &client_pem, (2020, 2021)),
        future_client: leaf(&ca, CLIENT_NAME, &client_pem, (2040, 2050)),
        misnamed_server: leaf(&ca, "evil.local", &server_pem, current),
        foreign_client: leaf(&foreign, CLIENT_NAME, &client_pem, current),
        rogue_client: leaf(&rogue, CLIENT_NAME, &client_pem, current),
    }
}

#[allow(clippy::expect_used)]
fn key_pair(pem: &str) -> KeyPair {
    KeyPair::from_pkcs8_pem_and_sign_algo(pem, &PKCS_RSA_SHA256).expect("invariant: RSA PKCS#8 key")
}

#[allow(clippy::expect_used)]
fn authority(name: &str, key_pem: &str) -> Signer {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("invariant: empty SAN list");
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = date_time_ymd(2024, 1, 1);
    params.not_after = date_time_ymd(2034, 1, 1);

    let key = key_pair(key_pem);
    let cert = params.self_signed(&key).expect("invariant: self-signed CA");

    Signer { cert, key }
}

#[allow(clippy::expect_used)]
fn leaf(issuer: &Signer, name: &str, key_pem: &str, (from, until): (i32, i32)) -> Certificate {
    let mut params = CertificateParams::new(vec![name.to_string()]).expect("invariant: valid SAN");
    params.distinguished_name.push(DnType::CommonName, name);
    params.not_before = date_time_ymd(from, 1, 1);
    params.not_after = date_time_ymd(until, 1, 1);

    let key = key_pair(key_pem);
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).expect("invariant: CA signs leaf");

    parse(&cert.pem())
}

#[allow(clippy::expect_used)]
fn parse(pem: &str) -> Certificate {
    Certificate::from_pem(pem).expect("invariant: rcgen emits parseable PEM")
}
