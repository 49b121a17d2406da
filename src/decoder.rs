//! Payload decoding and issued/received classification.

use std::fmt;
use std::io::{self, Read};

use base64::Engine;
use flate2::read::MultiGzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::company::TaxId;
use crate::protocol::DocumentRecord;

/// Which side of the document the owning company is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The company issued the document.
    Issued,
    /// The company received the document, or its provenance is unknown.
    Received,
}

impl Direction {
    /// Folder name used in the output layout.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Received => "received",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document ready to be classified and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDocument {
    /// Unique document identifier; the storage de-duplication key.
    pub access_key: String,
    /// Tax id found in the issuing-party block.
    pub issuer_tax_id: Option<TaxId>,
    /// Tax id found in the service-taker block.
    pub recipient_tax_id: Option<TaxId>,
    /// Decoded XML text.
    pub body: String,
    /// Generation timestamp as reported by the registry.
    pub generated_at: String,
}

/// Errors surfaced while decoding one document.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The record carried no access key.
    #[error("document has no access key")]
    MissingAccessKey,
    /// The record carried no payload.
    #[error("document has no payload")]
    EmptyPayload,
    /// The payload is not valid base64.
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not a gzip stream.
    #[error("payload decompression failed: {0}")]
    Decompress(#[source] io::Error),
    /// The decompressed body is not well-formed XML.
    #[error("malformed document: {0}")]
    MalformedDocument(String),
}

/// Reverses the transport encoding: base64, then gzip, then UTF-8.
///
/// Whitespace inside the base64 text is ignored and invalid UTF-8 sequences are dropped.
pub fn decode(payload: &str) -> Result<String, DecodeError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    let compressed = base64::engine::general_purpose::STANDARD.decode(compact.as_bytes())?;

    let mut raw = Vec::new();
    MultiGzDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(DecodeError::Decompress)?;

    let mut text = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    Ok(text)
}

/// Decodes a registry record into a document with its parties extracted.
pub fn decode_document(record: &DocumentRecord) -> Result<DecodedDocument, DecodeError> {
    if record.access_key.is_empty() {
        return Err(DecodeError::MissingAccessKey);
    }
    if record.payload.trim().is_empty() {
        return Err(DecodeError::EmptyPayload);
    }
    let body = decode(&record.payload)?;
    let parties = scan_parties(&body)?;
    Ok(DecodedDocument {
        access_key: record.access_key.clone(),
        issuer_tax_id: parties.issuer(),
        recipient_tax_id: parties.recipient(),
        body,
        generated_at: record.generated_at.clone(),
    })
}

/// Labels a document relative to `owner`. Unknown issuers count as received.
pub fn classify(document: &DecodedDocument, owner: &TaxId) -> Direction {
    match &document.issuer_tax_id {
        Some(issuer) if !issuer.is_empty() && issuer == owner => Direction::Issued,
        _ => Direction::Received,
    }
}

const ISSUER_BLOCK: &[u8] = b"emit";
const RECIPIENT_BLOCK: &[u8] = b"toma";

#[derive(Default)]
struct Parties {
    issuer_cnpj: Option<TaxId>,
    issuer_cpf: Option<TaxId>,
    recipient_cnpj: Option<TaxId>,
    recipient_cpf: Option<TaxId>,
}

impl Parties {
    fn issuer(&self) -> Option<TaxId> {
        self.issuer_cnpj.clone().or_else(|| self.issuer_cpf.clone())
    }

    fn recipient(&self) -> Option<TaxId> {
        self.recipient_cnpj.clone().or_else(|| self.recipient_cpf.clone())
    }

    fn slot(&mut self, block: &[u8], field: &[u8]) -> Option<&mut Option<TaxId>> {
        match (block, field) {
            (ISSUER_BLOCK, b"cnpj") => Some(&mut self.issuer_cnpj),
            (ISSUER_BLOCK, b"cpf") => Some(&mut self.issuer_cpf),
            (RECIPIENT_BLOCK, b"cnpj") => Some(&mut self.recipient_cnpj),
            (RECIPIENT_BLOCK, b"cpf") => Some(&mut self.recipient_cpf),
            _ => None,
        }
    }
}

// Walks the whole document so malformed XML is rejected, collecting `CNPJ`/`CPF`
// children of the party blocks by lower-cased local name.
fn scan_parties(body: &str) -> Result<Parties, DecodeError> {
    let mut reader = Reader::from_str(body.trim_start_matches('\u{feff}'));
    reader.config_mut().trim_text(true);

    let mut parties = Parties::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut capture: Option<(Vec<u8>, Vec<u8>, String)> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = start.local_name().as_ref().to_ascii_lowercase();
                if stack.is_empty() {
                    if saw_root {
                        return Err(malformed("multiple root elements"));
                    }
                    saw_root = true;
                }
                if let Some(parent) = stack.last() {
                    if capture.is_none() && parties.slot(parent, &name).is_some() {
                        capture = Some((parent.clone(), name.clone(), String::new()));
                    }
                }
                stack.push(name);
            }
            Ok(Event::Empty(_)) => {
                if stack.is_empty() {
                    if saw_root {
                        return Err(malformed("multiple root elements"));
                    }
                    saw_root = true;
                }
            }
            Ok(Event::Text(text)) => {
                if let Some((_, _, buf)) = capture.as_mut() {
                    let value = text
                        .unescape()
                        .map_err(|err| malformed(err.to_string()))?;
                    buf.push_str(&value);
                }
            }
            Ok(Event::End(_)) => {
                let closed = stack.pop();
                let finished = matches!(
                    (&capture, &closed),
                    (Some((_, field, _)), Some(name)) if field == name && stack_parent_matches(&stack, &capture)
                );
                if finished {
                    if let Some((block, field, value)) = capture.take() {
                        let id = TaxId::normalize(&value);
                        if let Some(slot) = parties.slot(&block, &field) {
                            if slot.is_none() && !id.is_empty() {
                                *slot = Some(id);
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(malformed(err.to_string())),
        }
    }

    if !saw_root {
        return Err(malformed("no root element"));
    }
    if !stack.is_empty() {
        return Err(malformed("unclosed elements at end of document"));
    }
    Ok(parties)
}

fn stack_parent_matches(stack: &[Vec<u8>], capture: &Option<(Vec<u8>, Vec<u8>, String)>) -> bool {
    match (stack.last(), capture) {
        (Some(parent), Some((block, _, _))) => parent == block,
        _ => false,
    }
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedDocument(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn encode_bytes(raw: &[u8]) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).expect("gzip write");
        let gz = encoder.finish().expect("gzip finish");
        base64::engine::general_purpose::STANDARD.encode(gz)
    }

    fn encode(xml: &str) -> String {
        encode_bytes(xml.as_bytes())
    }

    fn record(key: &str, xml: &str) -> DocumentRecord {
        DocumentRecord {
            nsu: 1,
            access_key: key.into(),
            kind: "NFSE".into(),
            payload: encode(xml),
            generated_at: "2024-05-02T08:00:00".into(),
        }
    }

    const NFSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <NFSe xmlns="http://www.sped.fazenda.gov.br/nfse">
          <infNFSe>
            <emit><CNPJ>12.345.678/0001-90</CNPJ><xNome>Acme</xNome></emit>
            <DPS><infDPS><toma><CPF>123.456.789-00</CPF></toma></infDPS></DPS>
          </infNFSe>
        </NFSe>"#;

    #[test]
    fn decodes_base64_gzip_payload() {
        let text = decode(&encode("<a>ção</a>")).expect("decode");
        assert_eq!(text, "<a>ção</a>");
    }

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        let text = decode(&encode_bytes(b"<a>x\xffy</a>")).expect("decode");
        assert_eq!(text, "<a>xy</a>");
    }

    #[test]
    fn base64_with_line_breaks_is_accepted() {
        let encoded = encode("<a/>");
        let wrapped = format!("{}\n{}", &encoded[..4], &encoded[4..]);
        assert_eq!(decode(&wrapped).expect("decode"), "<a/>");
    }

    #[test]
    fn extracts_parties_regardless_of_namespace() {
        let doc = decode_document(&record("K1", NFSE)).expect("decode");
        assert_eq!(doc.issuer_tax_id, Some(TaxId::normalize("12345678000190")));
        assert_eq!(doc.recipient_tax_id, Some(TaxId::normalize("12345678900")));

        let prefixed = r#"<n:NFSe xmlns:n="urn:x"><n:emit><n:cnpj>99</n:cnpj></n:emit></n:NFSe>"#;
        let doc = decode_document(&record("K2", prefixed)).expect("decode");
        assert_eq!(doc.issuer_tax_id, Some(TaxId::normalize("99")));
    }

    #[test]
    fn only_direct_children_of_the_issuer_block_count() {
        let xml = "<r><emit><end><CNPJ>11</CNPJ></end></emit><prest><CNPJ>22</CNPJ></prest></r>";
        let doc = decode_document(&record("K", xml)).expect("decode");
        assert_eq!(doc.issuer_tax_id, None);
    }

    #[test]
    fn classifies_by_issuer() {
        let owner = TaxId::normalize("12345678000190");
        let doc = decode_document(&record("K1", NFSE)).expect("decode");
        assert_eq!(classify(&doc, &owner), Direction::Issued);
        assert_eq!(classify(&doc, &TaxId::normalize("1")), Direction::Received);

        let anonymous = decode_document(&record("K3", "<NFSe><infNFSe/></NFSe>")).expect("decode");
        assert_eq!(classify(&anonymous, &owner), Direction::Received);
        assert_eq!(classify(&anonymous, &TaxId::normalize("")), Direction::Received);
    }

    #[test]
    fn rejects_broken_documents() {
        let mut rec = record("K", "<NFSe><emit></NFSe>");
        assert!(matches!(
            decode_document(&rec),
            Err(DecodeError::MalformedDocument(_))
        ));

        rec.payload = "!!!not base64!!!".into();
        assert!(matches!(decode_document(&rec), Err(DecodeError::Base64(_))));

        rec.payload = base64::engine::general_purpose::STANDARD.encode(b"plain text");
        assert!(matches!(decode_document(&rec), Err(DecodeError::Decompress(_))));

        let mut missing_key = record("", NFSE);
        assert!(matches!(
            decode_document(&missing_key),
            Err(DecodeError::MissingAccessKey)
        ));
        missing_key.access_key = "K".into();
        missing_key.payload.clear();
        assert!(matches!(
            decode_document(&missing_key),
            Err(DecodeError::EmptyPayload)
        ));
    }
}
