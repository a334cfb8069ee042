//! XML building blocks for the signed envelope.
pub(crate) mod constants;

/// Renders the XAdES SignedProperties fragment that gets digested.
///
/// The downstream verifier hashes this fragment as literal text, so the
/// line endings and indentation are load-bearing: the template is authored
/// with LF endings and the exact indentation the reference signer emits,
/// and CRLF sequences are normalized away before the caller hashes it.
pub(crate) fn signed_properties_xml_string(
    signing_time: &str,
    cert_digest_b64: &str,
    issuer_name: &str,
    serial_number: &str,
) -> String {
    format!(
        r#"<xades:SignedProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Id="xadesSignedProperties">
                                    <xades:SignedSignatureProperties>
                                        <xades:SigningTime>{signing_time}</xades:SigningTime>
                                        <xades:SigningCertificate>
                                            <xades:Cert>
                                                <xades:CertDigest>
                                                    <ds:DigestMethod xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
                                                    <ds:DigestValue xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{cert_digest_b64}</ds:DigestValue>
                                                </xades:CertDigest>
                                                <xades:IssuerSerial>
                                                    <ds:X509IssuerName xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{issuer_name}</ds:X509IssuerName>
                                                    <ds:X509SerialNumber xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{serial_number}</ds:X509SerialNumber>
                                                </xades:IssuerSerial>
                                            </xades:Cert>
                                        </xades:SigningCertificate>
                                    </xades:SignedSignatureProperties>
                                </xades:SignedProperties>"#
    )
    .replace("\r\n", "\n")
}
