#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use k256::ecdsa::SigningKey;
use k256::pkcs8::EncodePublicKey;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::Encode;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/invoices")
        .join(name)
}

pub fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("read fixture invoice")
}

pub fn test_signing_key() -> SigningKey {
    SigningKey::random(&mut rand_core::OsRng)
}

/// Self-signed secp256k1 certificate over the given key.
pub fn build_test_cert(key: &SigningKey) -> Vec<u8> {
    let serial_number = SerialNumber::from(17u32);
    let validity = Validity::from_now(Duration::new(3600, 0)).expect("validity");
    let subject = Name::from_str("CN=Muhr Test CA,O=Muhr,C=SA").expect("subject");
    let spki_der = key.verifying_key().to_public_key_der().expect("public key der");
    let spki = SubjectPublicKeyInfoOwned::try_from(spki_der.as_bytes()).expect("spki");
    let builder = CertificateBuilder::new(Profile::Root, serial_number, validity, subject, spki, key)
        .expect("certificate builder");
    builder
        .build::<k256::ecdsa::DerSignature>()
        .expect("certificate")
        .to_der()
        .expect("cert der")
}

pub fn decode_tlv(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut entries = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        let tag = bytes[idx];
        let len = bytes[idx + 1] as usize;
        let start = idx + 2;
        let end = start + len;
        entries.push((tag, bytes[start..end].to_vec()));
        idx = end;
    }
    entries
}
