//! Canonical digesting, ECDSA signing, and the end-to-end pipeline.

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use k256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use k256::SecretKey;
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
    xpath,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use x509_cert::der::{Decode, DecodePem};
use x509_cert::Certificate;

use crate::cert::{hex_digest_base64, CertificateParts};
use crate::invoice::qr::{InvoiceSummary, QrPayload};
use crate::invoice::xml::constants::{
    CAC_NS, CAC_SIGNATURE_TEMPLATE, CBC_NS, DS_NS, EXT_NS, INVOICE_NS, QR_REFERENCE_TEMPLATE,
    SAC_NS, SBC_NS, SIG_NS, UBL_EXTENSIONS_TEMPLATE, XADES_NS,
};
use crate::invoice::xml::signed_properties_xml_string;
use crate::invoice::SignedInvoice;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to load private key: {0}")]
    KeyLoad(String),
    #[error("failed to load certificate: {0}")]
    CertificateLoad(String),
    #[error("signing failed: {0}")]
    Signature(String),
    #[error("canonicalization failed: {0}")]
    Canonicalize(String),
    #[error("XML parse error: {0}")]
    XmlParse(String),
    #[error("XPath error: {0}")]
    Xpath(String),
    #[error("failed to build signature envelope: {0}")]
    Envelope(String),
    #[error("missing Invoice root element")]
    MissingRoot,
}

/// Subtrees excluded from the canonical form before hashing, applied in
/// order against the live tree. Removing the extension container first
/// also removes any signature nested inside it, so the later selectors may
/// match fewer nodes.
const EXCLUDED_NODES: [&str; 3] = [
    "//*[local-name()='Invoice']//*[local-name()='UBLExtensions']",
    "//*[local-name()='AdditionalDocumentReference'][cbc:ID[normalize-space(text())='QR']]",
    "//*[local-name()='Invoice']//*[local-name()='Signature']",
];

/// Signs UBL invoices with an EC key and its CSID certificate.
///
/// The handle owns the key material for its lifetime; each call to
/// [`InvoiceSigner::sign_xml`] is an independent operation with no state
/// shared across invocations.
pub struct InvoiceSigner {
    certificate: Certificate,
    signing_key: SigningKey,
}

impl InvoiceSigner {
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, SigningError> {
        let certificate = Certificate::from_pem(cert_pem.as_bytes())
            .map_err(|e| SigningError::CertificateLoad(e.to_string()))?;
        let signing_key = signing_key_from_pem(key_pem)?;
        Ok(Self {
            certificate,
            signing_key,
        })
    }

    pub fn from_der(cert_der: &[u8], key_der: &[u8]) -> Result<Self, SigningError> {
        let certificate = Certificate::from_der(cert_der)
            .map_err(|e| SigningError::CertificateLoad(e.to_string()))?;
        let signing_key = signing_key_from_der(key_der)?;
        Ok(Self {
            certificate,
            signing_key,
        })
    }

    /// Accepts the bare-base64 DER forms ZATCA hands out (no PEM framing).
    pub fn from_base64(cert_b64: &str, key_b64: &str) -> Result<Self, SigningError> {
        let cert_der = decode_base64_compact(cert_b64)
            .map_err(|e| SigningError::CertificateLoad(format!("invalid base64: {e}")))?;
        let key_der = decode_base64_compact(key_b64)
            .map_err(|e| SigningError::KeyLoad(format!("invalid base64: {e}")))?;
        Self::from_der(&cert_der, &key_der)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Signs an invoice, stamping the current UTC time as signing time.
    pub fn sign_xml(&self, xml: &str) -> crate::Result<SignedInvoice> {
        self.sign_xml_at(xml, Utc::now())
    }

    /// Signs an invoice with an explicit signing timestamp.
    ///
    /// The timestamp is captured once and used consistently in the hashed
    /// SignedProperties fragment and the SigningTime element spliced into
    /// the document. Any failure aborts the whole operation; no partially
    /// signed document is ever returned.
    pub fn sign_xml_at(
        &self,
        xml: &str,
        signing_time: DateTime<Utc>,
    ) -> crate::Result<SignedInvoice> {
        let public_key_der = public_key_der(&self.signing_key)?;
        let cert_parts = CertificateParts::from_certificate(&self.certificate)?;

        let mut doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::XmlParse(format!("{e:?}")))?;

        remove_excluded_nodes(&doc)?;
        let canonical = canonicalize(&doc)?;
        let digest = Sha256::digest(canonical.as_bytes());
        let invoice_digest_b64 = Base64::encode_string(&digest);
        debug!(digest = %invoice_digest_b64, "canonical invoice digest computed");

        let signature_b64 = sign_digest(&self.signing_key, &digest)?;

        let signing_time_str = format_signing_time(&signing_time);
        let signed_props_xml = signed_properties_xml_string(
            &signing_time_str,
            cert_parts.digest_b64(),
            cert_parts.issuer_name(),
            cert_parts.serial_decimal(),
        );
        let signed_props_digest_b64 = hex_digest_base64(&Sha256::digest(signed_props_xml.as_bytes()));

        let summary = InvoiceSummary::from_document(&doc)?;
        let ca_signature = summary
            .is_simplified()
            .then(|| cert_parts.ca_signature().to_vec());
        let qr_code = QrPayload::from_summary(&summary)
            .with_signing_parts(
                &invoice_digest_b64,
                &signature_b64,
                public_key_der.clone(),
                ca_signature,
            )
            .encode()?;
        debug!(len = qr_code.len(), "QR payload encoded");

        let values = EnvelopeValues {
            signing_time: &signing_time_str,
            cert_digest: cert_parts.digest_b64(),
            issuer_name: cert_parts.issuer_name(),
            serial_number: cert_parts.serial_decimal(),
            invoice_digest: &invoice_digest_b64,
            signed_props_digest: &signed_props_digest_b64,
            signature: &signature_b64,
            certificate_b64: cert_parts.der_b64(),
            qr_code: &qr_code,
        };
        attach_envelope(&mut doc, &values)?;

        Ok(SignedInvoice {
            xml: doc.to_string(),
            qr_code,
            invoice_digest: invoice_digest_b64,
            signature: signature_b64,
            public_key: Base64::encode_string(&public_key_der),
            signed_properties_digest: signed_props_digest_b64,
            certificate_digest: cert_parts.digest_b64().to_string(),
            issuer_name: cert_parts.issuer_name().to_string(),
            serial_number: cert_parts.serial_decimal().to_string(),
            signing_time,
        })
    }
}

/// Base64 SHA-256 digest of the canonicalized, redacted document.
///
/// Works on a duplicate of the document, so it can be called standalone —
/// including on an already signed invoice, where it reproduces the digest
/// the signature was computed over.
pub fn invoice_digest_base64(doc: &Document) -> Result<String, SigningError> {
    let copy = doc
        .dup()
        .map_err(|e| SigningError::Canonicalize(format!("failed to duplicate document: {e:?}")))?;
    remove_excluded_nodes(&copy)?;
    let canonical = canonicalize(&copy)?;
    Ok(Base64::encode_string(&Sha256::digest(canonical.as_bytes())))
}

fn remove_excluded_nodes(doc: &Document) -> Result<(), SigningError> {
    let ctx = xpath_context(doc)?;
    ctx.register_namespace("cbc", CBC_NS)
        .map_err(|_| SigningError::Xpath("failed to register namespace cbc".into()))?;

    for selector in EXCLUDED_NODES {
        for mut node in xpath_nodes(&ctx, selector)? {
            node.unlink();
        }
    }
    Ok(())
}

fn canonicalize(doc: &Document) -> Result<String, SigningError> {
    let options = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::Canonical1_1,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    doc.canonicalize(options, None)
        .map_err(|e| SigningError::Canonicalize(format!("{e:?}")))
}

fn sign_digest(key: &SigningKey, digest: &[u8]) -> Result<String, SigningError> {
    // The digest is signed as the message, so the primitive hashes it once
    // more with SHA-256; the reference signer does the same.
    let signature: Signature = key
        .try_sign(digest)
        .map_err(|e| SigningError::Signature(e.to_string()))?;
    Ok(Base64::encode_string(signature.to_der().as_bytes()))
}

fn public_key_der(key: &SigningKey) -> Result<Vec<u8>, SigningError> {
    let spki = key
        .verifying_key()
        .to_public_key_der()
        .map_err(|e| SigningError::Signature(format!("public key encoding failed: {e}")))?;
    Ok(spki.as_bytes().to_vec())
}

fn signing_key_from_der(key_der: &[u8]) -> Result<SigningKey, SigningError> {
    if let Ok(key) = SigningKey::from_pkcs8_der(key_der) {
        return Ok(key);
    }
    SecretKey::from_sec1_der(key_der)
        .map(SigningKey::from)
        .map_err(|e| SigningError::KeyLoad(format!("not PKCS#8 or SEC1 DER: {e}")))
}

fn signing_key_from_pem(key_pem: &str) -> Result<SigningKey, SigningError> {
    if let Ok(key) = SigningKey::from_pkcs8_pem(key_pem) {
        return Ok(key);
    }
    SecretKey::from_sec1_pem(key_pem)
        .map(SigningKey::from)
        .map_err(|e| SigningError::KeyLoad(format!("not PKCS#8 or SEC1 PEM: {e}")))
}

fn decode_base64_compact(encoded: &str) -> Result<Vec<u8>, base64ct::Error> {
    let compact: String = encoded.split_whitespace().collect();
    Base64::decode_vec(&compact)
}

fn format_signing_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

struct EnvelopeValues<'a> {
    signing_time: &'a str,
    cert_digest: &'a str,
    issuer_name: &'a str,
    serial_number: &'a str,
    invoice_digest: &'a str,
    signed_props_digest: &'a str,
    signature: &'a str,
    certificate_b64: &'a str,
    qr_code: &'a str,
}

/// Splices the signature extension and the QR/Signature reference block
/// into the document and populates their value slots.
///
/// The extension block becomes the first child of the invoice root; the QR
/// reference and `cac:Signature` land immediately before
/// `cac:AccountingSupplierParty`. Both insertion points sit outside the
/// hashed canonical form, which was computed before this point.
fn attach_envelope(doc: &mut Document, values: &EnvelopeValues<'_>) -> Result<(), SigningError> {
    let mut root = doc.get_root_element().ok_or(SigningError::MissingRoot)?;

    let mut ext_node = parse_fragment(doc, UBL_EXTENSIONS_TEMPLATE)?;
    if let Some(mut first_child) = first_element_child(&root) {
        first_child
            .add_prev_sibling(&mut ext_node)
            .map_err(|e| SigningError::Envelope(e.to_string()))?;
    } else {
        root.add_child(&mut ext_node)
            .map_err(|e| SigningError::Envelope(e.to_string()))?;
    }

    let mut qr_node = parse_fragment(doc, QR_REFERENCE_TEMPLATE)?;
    let mut sig_node = parse_fragment(doc, CAC_SIGNATURE_TEMPLATE)?;
    let ctx = xpath_context(doc)?;
    register_namespaces(&ctx)?;
    match xpath_nodes(&ctx, "//cac:AccountingSupplierParty")?.into_iter().next() {
        Some(mut supplier) => {
            supplier
                .add_prev_sibling(&mut qr_node)
                .map_err(|e| SigningError::Envelope(e.to_string()))?;
            supplier
                .add_prev_sibling(&mut sig_node)
                .map_err(|e| SigningError::Envelope(e.to_string()))?;
        }
        None => {
            root.add_child(&mut qr_node)
                .map_err(|e| SigningError::Envelope(e.to_string()))?;
            root.add_child(&mut sig_node)
                .map_err(|e| SigningError::Envelope(e.to_string()))?;
        }
    }

    let ctx = xpath_context(doc)?;
    register_namespaces(&ctx)?;
    populate_signed_properties(&ctx, values)?;
    populate_signature_values(&ctx, values)?;
    set_xpath_text(
        &ctx,
        "//cac:AdditionalDocumentReference[cbc:ID[normalize-space(text())='QR']]/cac:Attachment/cbc:EmbeddedDocumentBinaryObject",
        values.qr_code,
    )?;
    Ok(())
}

fn populate_signed_properties(
    ctx: &xpath::Context,
    values: &EnvelopeValues<'_>,
) -> Result<(), SigningError> {
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:Object/xades:QualifyingProperties/xades:SignedProperties/xades:SignedSignatureProperties/xades:SigningTime",
        values.signing_time,
    )?;
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:Object/xades:QualifyingProperties/xades:SignedProperties/xades:SignedSignatureProperties/xades:SigningCertificate/xades:Cert/xades:CertDigest/ds:DigestValue",
        values.cert_digest,
    )?;
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:Object/xades:QualifyingProperties/xades:SignedProperties/xades:SignedSignatureProperties/xades:SigningCertificate/xades:Cert/xades:IssuerSerial/ds:X509IssuerName",
        values.issuer_name,
    )?;
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:Object/xades:QualifyingProperties/xades:SignedProperties/xades:SignedSignatureProperties/xades:SigningCertificate/xades:Cert/xades:IssuerSerial/ds:X509SerialNumber",
        values.serial_number,
    )?;
    Ok(())
}

fn populate_signature_values(
    ctx: &xpath::Context,
    values: &EnvelopeValues<'_>,
) -> Result<(), SigningError> {
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:SignatureValue",
        values.signature,
    )?;
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
        values.certificate_b64,
    )?;
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:SignedInfo/ds:Reference[@URI='#xadesSignedProperties']/ds:DigestValue",
        values.signed_props_digest,
    )?;
    set_xpath_text(
        ctx,
        "/ubl:Invoice/ext:UBLExtensions/ext:UBLExtension/ext:ExtensionContent/sig:UBLDocumentSignatures/sac:SignatureInformation/ds:Signature/ds:SignedInfo/ds:Reference[@Id='invoiceSignedData']/ds:DigestValue",
        values.invoice_digest,
    )?;
    Ok(())
}

fn parse_fragment(doc: &mut Document, xml: &str) -> Result<Node, SigningError> {
    let fragment = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::XmlParse(format!("{e:?}")))?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SigningError::Envelope("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SigningError::Envelope("failed to import fragment".into()))
}

fn first_element_child(root: &Node) -> Option<Node> {
    let mut current = root.get_first_child();
    while let Some(node) = current {
        if node.is_element_node() {
            return Some(node);
        }
        current = node.get_next_sibling();
    }
    None
}

fn xpath_context(doc: &Document) -> Result<xpath::Context, SigningError> {
    xpath::Context::new(doc)
        .map_err(|_| SigningError::Xpath("failed to create XPath context".into()))
}

fn xpath_nodes(ctx: &xpath::Context, expr: &str) -> Result<Vec<Node>, SigningError> {
    Ok(ctx
        .evaluate(expr)
        .map_err(|_| SigningError::Xpath(format!("evaluation failed for {expr}")))?
        .get_nodes_as_vec())
}

fn set_xpath_text(ctx: &xpath::Context, path: &str, value: &str) -> Result<(), SigningError> {
    let nodes = xpath_nodes(ctx, path)?;
    if nodes.is_empty() {
        return Err(SigningError::Envelope(format!(
            "XPath target not found: {path}"
        )));
    }
    for mut node in nodes {
        node.set_content(value)
            .map_err(|e| SigningError::Envelope(e.to_string()))?;
    }
    Ok(())
}

fn register_namespaces(ctx: &xpath::Context) -> Result<(), SigningError> {
    for (prefix, ns) in [
        ("ubl", INVOICE_NS),
        ("cbc", CBC_NS),
        ("cac", CAC_NS),
        ("ext", EXT_NS),
        ("sig", SIG_NS),
        ("sac", SAC_NS),
        ("sbc", SBC_NS),
        ("ds", DS_NS),
        ("xades", XADES_NS),
    ] {
        ctx.register_namespace(prefix, ns)
            .map_err(|_| SigningError::Xpath(format!("failed to register namespace {prefix}")))?;
    }
    Ok(())
}
