//! Invoice signing pipeline: canonical digest, XAdES envelope, QR payload.
pub mod qr;
pub mod sign;
pub mod xml;

pub use qr::{InvoiceSummary, QrCodeError, QrPayload, QrResult};
pub use sign::{InvoiceSigner, SigningError};

use chrono::{DateTime, Utc};

/// Final signed document together with the artifacts computed on the way.
/// Nothing is mutated after construction; the pipeline is compute-once,
/// append-once.
#[derive(Debug, Clone)]
pub struct SignedInvoice {
    pub(crate) xml: String,
    pub(crate) qr_code: String,
    pub(crate) invoice_digest: String,
    pub(crate) signature: String,
    pub(crate) public_key: String,
    pub(crate) signed_properties_digest: String,
    pub(crate) certificate_digest: String,
    pub(crate) issuer_name: String,
    pub(crate) serial_number: String,
    pub(crate) signing_time: DateTime<Utc>,
}

impl SignedInvoice {
    /// The complete signed invoice document.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Base64 TLV payload embedded in the QR attachment.
    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    /// Base64 SHA-256 digest of the canonicalized, redacted document.
    pub fn invoice_digest(&self) -> &str {
        &self.invoice_digest
    }

    /// Base64 DER-encoded ECDSA signature over the document digest.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Base64 DER SubjectPublicKeyInfo of the signing key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn signed_properties_digest(&self) -> &str {
        &self.signed_properties_digest
    }

    pub fn certificate_digest(&self) -> &str {
        &self.certificate_digest
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn signing_time(&self) -> DateTime<Utc> {
        self.signing_time
    }
}
