//! Self-signed certificate issuance.
//!
//! Every credential is labeled with `H(chain + proof)`: the digest becomes
//! the certificate serial number and an OU entry. Whether the key itself
//! depends on that digest is a deployment choice ([`KeyMode`]):
//!
//! - `Random`: a fresh ECDSA P-256 key per call. Each node ends up with its
//!   own key even when all of them share the same chain and proof.
//! - `Seeded`: an Ed25519 key whose secret is the digest itself. Every node
//!   that reached quorum on the same chain derives the same key pair, which
//!   also means anyone who learns chain and proof can derive it.

use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SerialNumber};
use time::{Duration, OffsetDateTime};

use conclave_common::ConclaveError;
use conclave_common::digest::sha256;

use crate::config::{CredentialConfig, KeyMode};

/// PEM certificate and private key, held only for the span of one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub certificate: String,
    pub private_key: String,
}

impl CredentialMaterial {
    /// "Not available yet"
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Issues certificate/key pairs from a chain and proof value
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    key_mode: KeyMode,
    common_name: String,
    validity_days: u32,
}

impl CredentialIssuer {
    pub fn new(config: &CredentialConfig) -> Self {
        Self {
            key_mode: config.key_mode,
            common_name: config.common_name.clone(),
            validity_days: config.validity_days,
        }
    }

    /// Issue a credential. Generation failures yield empty material.
    pub fn issue(&self, chain: &str, proof: &str) -> CredentialMaterial {
        match self.try_issue(chain, proof) {
            Ok(material) => material,
            Err(e) => {
                tracing::warn!(error = %e, "Credential generation failed");
                CredentialMaterial::empty()
            }
        }
    }

    fn try_issue(&self, chain: &str, proof: &str) -> Result<CredentialMaterial, ConclaveError> {
        let seed = sha256(format!("{}{}", chain, proof));

        let key_pair = match self.key_mode {
            KeyMode::Random => KeyPair::generate()
                .map_err(|e| ConclaveError::Credential(format!("key generation: {}", e)))?,
            KeyMode::Seeded => seeded_key_pair(&seed)?,
        };

        let now = OffsetDateTime::now_utc();
        let mut params = CertificateParams::default();
        params.not_before = now;
        params.not_after = now + Duration::days(i64::from(self.validity_days));
        params.serial_number = Some(serial_from_seed(&seed));

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, DnValue::Utf8String(self.common_name.clone()));
        name.push(DnType::OrganizationalUnitName, DnValue::Utf8String(hex::encode(seed)));
        params.distinguished_name = name;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| ConclaveError::Credential(format!("self-signing: {}", e)))?;

        Ok(CredentialMaterial {
            certificate: cert.pem(),
            private_key: key_pair.serialize_pem(),
        })
    }
}

/// First 16 digest bytes, high bit cleared so the DER integer stays positive
fn serial_from_seed(seed: &[u8; 32]) -> SerialNumber {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&seed[..16]);
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn seeded_key_pair(seed: &[u8; 32]) -> Result<KeyPair, ConclaveError> {
    use ed25519_dalek::pkcs8::EncodePrivateKey;

    let signing = ed25519_dalek::SigningKey::from_bytes(seed);
    let der = signing
        .to_pkcs8_der()
        .map_err(|e| ConclaveError::Credential(format!("pkcs8 encoding: {}", e)))?;

    KeyPair::try_from(der.as_bytes())
        .map_err(|e| ConclaveError::Credential(format!("seeded key import: {}", e)))
}
