//! Signing-certificate field derivation.

use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use thiserror::Error;
use x509_cert::der::Encode;
use x509_cert::Certificate;

use crate::der::{self, DerError};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error(transparent)]
    Malformed(#[from] DerError),
    #[error("certificate DER encoding failed: {0}")]
    Encode(String),
}

/// Fields derived from the signing certificate, computed once per signing
/// operation and immutable afterwards.
#[derive(Debug, Clone)]
pub struct CertificateParts {
    issuer_name: String,
    serial_decimal: String,
    ca_signature: Vec<u8>,
    digest_b64: String,
    der_b64: String,
}

impl CertificateParts {
    pub fn from_certificate(cert: &Certificate) -> Result<Self, CertificateError> {
        let der = cert
            .to_der()
            .map_err(|e| CertificateError::Encode(e.to_string()))?;
        let der_b64 = Base64::encode_string(&der);
        // ZATCA hashes the base64 text of the DER, and the digest element
        // carries the base64 of the lowercase-hex rendering of that hash.
        let digest_b64 = hex_digest_base64(&Sha256::digest(der_b64.as_bytes()));
        let ca_signature = extract_ca_signature(&der)?;

        let issuer = cert.tbs_certificate.issuer.to_string();
        let issuer_name = issuer
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(", ");
        let serial_decimal = serial_to_decimal(cert.tbs_certificate.serial_number.as_bytes());

        Ok(Self {
            issuer_name,
            serial_decimal,
            ca_signature,
            digest_b64,
            der_b64,
        })
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn serial_decimal(&self) -> &str {
        &self.serial_decimal
    }

    /// Raw signature the certificate authority placed on this certificate.
    pub fn ca_signature(&self) -> &[u8] {
        &self.ca_signature
    }

    pub fn digest_b64(&self) -> &str {
        &self.digest_b64
    }

    pub fn der_b64(&self) -> &str {
        &self.der_b64
    }
}

/// Pulls the CA's raw signature bytes out of a DER-encoded certificate.
///
/// Walks the outer SEQUENCE, then its three siblings in fixed order:
/// tbsCertificate (skipped), signatureAlgorithm (skipped), signatureValue
/// (BIT STRING). The BIT STRING's leading unused-bits octet is dropped.
/// Structural validation only; the signature itself is not verified.
pub fn extract_ca_signature(cert_der: &[u8]) -> Result<Vec<u8>, DerError> {
    let (body, _) = der::expect_tlv(cert_der, 0, 0x30)?;
    let (_tbs, cursor) = der::expect_tlv(body, 0, 0x30)?;
    let (_algorithm, cursor) = der::expect_tlv(body, cursor, 0x30)?;
    let (bits, _) = der::expect_tlv(body, cursor, 0x03)?;
    let (_unused_bits, signature) = bits
        .split_first()
        .ok_or(DerError::Truncated { offset: cursor })?;
    Ok(signature.to_vec())
}

/// Certificate serials exceed u64, so the base-256 bytes are converted to a
/// decimal string by long division.
fn serial_to_decimal(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}

pub(crate) fn hex_digest_base64(digest: &[u8]) -> String {
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    Base64::encode_string(hex.as_bytes())
}
