//! Rust toolkit for producing ZATCA-compliant signed e-invoices: enveloped
//! XAdES signature over a canonicalized, redacted view of a UBL invoice,
//! plus the embedded TLV QR payload.
//!
//! # Examples
//! ```no_run
//! use muhr_core::invoice::InvoiceSigner;
//!
//! # fn run(cert_pem: &str, key_pem: &str, invoice_xml: &str) -> Result<(), muhr_core::Error> {
//! let signer = InvoiceSigner::from_pem(cert_pem, key_pem)?;
//! let signed = signer.sign_xml(invoice_xml)?;
//! println!("{}", signed.qr_code());
//! # Ok(())
//! # }
//! ```
pub mod cert;
pub mod der;
pub mod invoice;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Der(#[from] der::DerError),
    #[error(transparent)]
    Certificate(#[from] cert::CertificateError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Qr(#[from] invoice::qr::QrCodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
