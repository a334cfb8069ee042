//! QR source-field extraction and TLV encoding.

use base64ct::{Base64, Encoding};
use libxml::{tree::Document, xpath};
use thiserror::Error;

use crate::invoice::xml::constants::{CAC_NS, CBC_NS, INVOICE_NS};

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("required invoice field is missing: {field}")]
    MissingField { field: &'static str },
    #[error("TLV field {tag} exceeds 255 bytes (len={len})")]
    ValueTooLong { tag: u8, len: usize },
    #[error("QR payload exceeds 700 characters once base64 encoded (len={len})")]
    EncodedTooLong { len: usize },
    #[error("QR XML error: {0}")]
    Xml(String),
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

/// Invoice metadata feeding the QR payload.
///
/// Every field is required; signing aborts when the document lacks one, it
/// is never silently defaulted.
#[derive(Debug, Clone)]
pub struct InvoiceSummary {
    seller_name: String,
    vat_number: String,
    issue_timestamp: String,
    payable_amount: String,
    vat_amount: String,
    type_code: String,
}

impl InvoiceSummary {
    pub fn from_document(doc: &Document) -> QrResult<Self> {
        let ctx = xpath::Context::new(doc)
            .map_err(|_| QrCodeError::Xml("failed to create XPath context".into()))?;
        for (prefix, ns) in [("ubl", INVOICE_NS), ("cac", CAC_NS), ("cbc", CBC_NS)] {
            ctx.register_namespace(prefix, ns)
                .map_err(|_| QrCodeError::Xml(format!("failed to register namespace {prefix}")))?;
        }

        let seller_name = required_text(
            &ctx,
            "/ubl:Invoice/cac:AccountingSupplierParty/cac:Party/cac:PartyLegalEntity/cbc:RegistrationName",
            "seller name",
        )?;
        let vat_number = required_text(
            &ctx,
            "/ubl:Invoice/cac:AccountingSupplierParty/cac:Party/cac:PartyTaxScheme/cbc:CompanyID",
            "seller VAT number",
        )?;
        let issue_date = required_text(&ctx, "/ubl:Invoice/cbc:IssueDate", "issue date")?;
        let issue_time = required_text(&ctx, "/ubl:Invoice/cbc:IssueTime", "issue time")?;
        let payable_amount = required_text(
            &ctx,
            "/ubl:Invoice/cac:LegalMonetaryTotal/cbc:PayableAmount",
            "payable amount",
        )?;
        let vat_amount = required_text(
            &ctx,
            "/ubl:Invoice/cac:TaxTotal/cbc:TaxAmount",
            "VAT amount",
        )?;
        let type_code = subtype_code(&ctx)?;

        Ok(Self {
            seller_name,
            vat_number,
            issue_timestamp: format!("{issue_date}T{issue_time}"),
            payable_amount,
            vat_amount,
            type_code,
        })
    }

    /// Simplified (B2C) invoices carry a type code whose `name` attribute
    /// starts with `02`; only those embed the CA signature in the QR.
    pub fn is_simplified(&self) -> bool {
        self.type_code.starts_with("02")
    }

    pub fn seller_name(&self) -> &str {
        &self.seller_name
    }

    pub fn vat_number(&self) -> &str {
        &self.vat_number
    }

    pub fn issue_timestamp(&self) -> &str {
        &self.issue_timestamp
    }

    pub fn payable_amount(&self) -> &str {
        &self.payable_amount
    }

    pub fn vat_amount(&self) -> &str {
        &self.vat_amount
    }

    pub fn type_code(&self) -> &str {
        &self.type_code
    }
}

fn required_text(ctx: &xpath::Context, expr: &str, field: &'static str) -> QrResult<String> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|_| QrCodeError::Xml(format!("XPath error for {field}")))?
        .get_nodes_as_vec();
    let node = nodes
        .first()
        .ok_or(QrCodeError::MissingField { field })?;
    let value = node.get_content().trim().to_string();
    if value.is_empty() {
        return Err(QrCodeError::MissingField { field });
    }
    Ok(value)
}

fn subtype_code(ctx: &xpath::Context) -> QrResult<String> {
    let nodes = ctx
        .evaluate("/ubl:Invoice/cbc:InvoiceTypeCode")
        .map_err(|_| QrCodeError::Xml("XPath error for invoice subtype".into()))?
        .get_nodes_as_vec();
    nodes
        .first()
        .and_then(|node| node.get_attribute("name"))
        .filter(|name| !name.trim().is_empty())
        .ok_or(QrCodeError::MissingField {
            field: "invoice subtype",
        })
}

/// Ordered QR field set.
///
/// Built in one step from the invoice summary; the cryptographic fields
/// stay `None` until the signing pipeline provides them and are omitted
/// from the encoding entirely while unset.
#[derive(Debug, Clone)]
pub struct QrPayload {
    seller_name: String,
    vat_number: String,
    timestamp: String,
    invoice_total: String,
    vat_total: String,
    invoice_digest: Option<String>,
    signature: Option<String>,
    public_key: Option<Vec<u8>>,
    ca_signature: Option<Vec<u8>>,
}

impl QrPayload {
    pub fn from_summary(summary: &InvoiceSummary) -> Self {
        Self {
            seller_name: summary.seller_name().to_string(),
            vat_number: summary.vat_number().to_string(),
            timestamp: summary.issue_timestamp().to_string(),
            invoice_total: summary.payable_amount().to_string(),
            vat_total: summary.vat_amount().to_string(),
            invoice_digest: None,
            signature: None,
            public_key: None,
            ca_signature: None,
        }
    }

    /// Attaches the cryptographic proof material. The digest and signature
    /// are embedded as their base64 text; the public key and CA signature
    /// as raw bytes.
    pub fn with_signing_parts(
        mut self,
        invoice_digest: &str,
        signature: &str,
        public_key: Vec<u8>,
        ca_signature: Option<Vec<u8>>,
    ) -> Self {
        self.invoice_digest = Some(invoice_digest.to_string());
        self.signature = Some(signature.to_string());
        self.public_key = Some(public_key);
        self.ca_signature = ca_signature;
        self
    }

    /// Encodes the non-null fields in ascending tag order and base64-frames
    /// the result.
    pub fn encode(&self) -> QrResult<String> {
        let mut tlv = TlvBuilder::new();
        tlv.push_str(1, &self.seller_name)?;
        tlv.push_str(2, &self.vat_number)?;
        tlv.push_str(3, &self.timestamp)?;
        tlv.push_str(4, &self.invoice_total)?;
        tlv.push_str(5, &self.vat_total)?;

        if let Some(digest) = self.invoice_digest.as_deref() {
            tlv.push_str(6, digest)?;
        }
        if let Some(signature) = self.signature.as_deref() {
            tlv.push_str(7, signature)?;
        }
        if let Some(public_key) = self.public_key.as_deref() {
            tlv.push_bytes(8, public_key)?;
        }
        if let Some(ca_signature) = self.ca_signature.as_deref() {
            tlv.push_bytes(9, ca_signature)?;
        }

        tlv.finish()
    }
}

struct TlvBuilder {
    bytes: Vec<u8>,
}

impl TlvBuilder {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    fn push_str(&mut self, tag: u8, value: &str) -> QrResult<()> {
        self.push_bytes(tag, value.as_bytes())
    }

    fn push_bytes(&mut self, tag: u8, value: &[u8]) -> QrResult<()> {
        if value.len() > u8::MAX as usize {
            return Err(QrCodeError::ValueTooLong {
                tag,
                len: value.len(),
            });
        }
        self.bytes.push(tag);
        self.bytes.push(value.len() as u8);
        self.bytes.extend_from_slice(value);
        Ok(())
    }

    fn finish(self) -> QrResult<String> {
        let encoded = Base64::encode_string(&self.bytes);
        if encoded.len() > 700 {
            return Err(QrCodeError::EncodedTooLong { len: encoded.len() });
        }
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libxml::parser::Parser;

    const MINIMAL_INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
    <cbc:ID>INV-1</cbc:ID>
    <cbc:IssueDate>2024-01-01</cbc:IssueDate>
    <cbc:IssueTime>10:00:00</cbc:IssueTime>
    <cbc:InvoiceTypeCode name="0200000">388</cbc:InvoiceTypeCode>
    <cac:AccountingSupplierParty>
        <cac:Party>
            <cac:PartyTaxScheme>
                <cbc:CompanyID>300000000000003</cbc:CompanyID>
            </cac:PartyTaxScheme>
            <cac:PartyLegalEntity>
                <cbc:RegistrationName>ACME</cbc:RegistrationName>
            </cac:PartyLegalEntity>
        </cac:Party>
    </cac:AccountingSupplierParty>
    <cac:TaxTotal>
        <cbc:TaxAmount currencyID="SAR">15.00</cbc:TaxAmount>
    </cac:TaxTotal>
    <cac:LegalMonetaryTotal>
        <cbc:PayableAmount currencyID="SAR">115.00</cbc:PayableAmount>
    </cac:LegalMonetaryTotal>
</Invoice>"#;

    fn decode_tlv(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
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

    fn sample_summary() -> InvoiceSummary {
        let doc = Parser::default()
            .parse_string(MINIMAL_INVOICE)
            .expect("parse invoice");
        InvoiceSummary::from_document(&doc).expect("summary")
    }

    #[test]
    fn summary_reads_all_required_fields() {
        let summary = sample_summary();
        assert_eq!(summary.seller_name(), "ACME");
        assert_eq!(summary.vat_number(), "300000000000003");
        assert_eq!(summary.issue_timestamp(), "2024-01-01T10:00:00");
        assert_eq!(summary.payable_amount(), "115.00");
        assert_eq!(summary.vat_amount(), "15.00");
        assert_eq!(summary.type_code(), "0200000");
        assert!(summary.is_simplified());
    }

    #[test]
    fn missing_vat_number_is_reported() {
        let xml = MINIMAL_INVOICE.replacen(
            "<cbc:CompanyID>300000000000003</cbc:CompanyID>",
            "",
            1,
        );
        let doc = Parser::default().parse_string(&xml).expect("parse invoice");
        match InvoiceSummary::from_document(&doc) {
            Err(QrCodeError::MissingField { field }) => assert_eq!(field, "seller VAT number"),
            other => panic!("expected MissingField error, got {other:?}"),
        }
    }

    #[test]
    fn missing_subtype_attribute_is_reported() {
        let xml = MINIMAL_INVOICE.replacen(" name=\"0200000\"", "", 1);
        let doc = Parser::default().parse_string(&xml).expect("parse invoice");
        match InvoiceSummary::from_document(&doc) {
            Err(QrCodeError::MissingField { field }) => assert_eq!(field, "invoice subtype"),
            other => panic!("expected MissingField error, got {other:?}"),
        }
    }

    #[test]
    fn standard_subtype_is_not_simplified() {
        let xml = MINIMAL_INVOICE.replacen("0200000", "0100000", 1);
        let doc = Parser::default().parse_string(&xml).expect("parse invoice");
        let summary = InvoiceSummary::from_document(&doc).expect("summary");
        assert!(!summary.is_simplified());
    }

    #[test]
    fn null_fields_are_omitted_entirely() {
        let summary = sample_summary();
        let bare = QrPayload::from_summary(&summary).encode().expect("encode");
        let bare_records = decode_tlv(&Base64::decode_vec(&bare).expect("base64"));
        assert_eq!(bare_records.len(), 5);
        assert!(bare_records.iter().all(|(tag, _)| *tag <= 5));

        let full = QrPayload::from_summary(&summary)
            .with_signing_parts("digest==", "signature==", b"spki".to_vec(), None)
            .encode()
            .expect("encode");
        let full_records = decode_tlv(&Base64::decode_vec(&full).expect("base64"));
        assert_eq!(full_records.len(), 8);
        assert!(full_records.iter().all(|(tag, _)| *tag != 9));
    }

    #[test]
    fn encoded_fields_round_trip_in_order() {
        let summary = sample_summary();
        let encoded = QrPayload::from_summary(&summary)
            .with_signing_parts("hash==", "sig==", b"public-key".to_vec(), Some(b"stamp".to_vec()))
            .encode()
            .expect("encode");

        let records = decode_tlv(&Base64::decode_vec(&encoded).expect("base64"));
        let expected = vec![
            (1, b"ACME".to_vec()),
            (2, b"300000000000003".to_vec()),
            (3, b"2024-01-01T10:00:00".to_vec()),
            (4, b"115.00".to_vec()),
            (5, b"15.00".to_vec()),
            (6, b"hash==".to_vec()),
            (7, b"sig==".to_vec()),
            (8, b"public-key".to_vec()),
            (9, b"stamp".to_vec()),
        ];
        assert_eq!(records, expected);
    }

    #[test]
    fn oversized_field_is_rejected() {
        let summary = sample_summary();
        let oversized = "a".repeat(300);
        match QrPayload::from_summary(&summary)
            .with_signing_parts(&oversized, "sig", b"pk".to_vec(), None)
            .encode()
        {
            Err(QrCodeError::ValueTooLong { tag, len }) => {
                assert_eq!(tag, 6);
                assert_eq!(len, 300);
            }
            other => panic!("expected ValueTooLong error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let summary = sample_summary();
        let long_value = "a".repeat(200);
        match QrPayload::from_summary(&summary)
            .with_signing_parts(
                &long_value,
                &long_value,
                vec![b'k'; 200],
                Some(vec![b's'; 200]),
            )
            .encode()
        {
            Err(QrCodeError::EncodedTooLong { .. }) => {}
            other => panic!("expected EncodedTooLong error, got {other:?}"),
        }
    }
}
