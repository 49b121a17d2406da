//! Wire format of the registry's `/contribuintes/DFe/{nsu}` endpoint.

use serde::Deserialize;
use serde_json::Value;

use crate::company::Nsu;

/// Status reported when the page carries documents.
pub const STATUS_DOCUMENTS_FOUND: &str = "DOCUMENTOS_LOCALIZADOS";
/// Status reported when nothing newer than the cursor exists.
pub const STATUS_NO_DOCUMENTS: &str = "NENHUM_DOCUMENTO_LOCALIZADO";

/// Result of one registry call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPage {
    /// Raw `StatusProcessamento` value.
    pub status: String,
    /// Documents from `LoteDFe`, in response order.
    pub documents: Vec<DocumentRecord>,
}

impl FetchPage {
    /// Parses a response body. Malformed list items become empty records instead of
    /// failing the page, so they are skipped one by one downstream.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawPage = serde_json::from_slice(body)?;
        let documents = raw
            .lote
            .unwrap_or_default()
            .iter()
            .map(DocumentRecord::from_value)
            .collect();
        Ok(Self {
            status: raw.status.unwrap_or_default(),
            documents,
        })
    }

    /// True iff the registry located documents and returned at least one.
    pub fn is_productive(&self) -> bool {
        self.status == STATUS_DOCUMENTS_FOUND && !self.documents.is_empty()
    }

    /// Highest sequence number on the page, if any.
    pub fn max_nsu(&self) -> Option<Nsu> {
        self.documents.iter().map(|doc| doc.nsu).max()
    }
}

/// One `LoteDFe` item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentRecord {
    /// Sequence number; 0 when absent or malformed.
    pub nsu: Nsu,
    /// Access key (`ChaveAcesso`), trimmed.
    pub access_key: String,
    /// Document kind (`TipoDocumento`), upper-cased.
    pub kind: String,
    /// Base64 of the gzip-compressed XML (`ArquivoXml`).
    pub payload: String,
    /// Generation timestamp (`DataHoraGeracao`) as sent.
    pub generated_at: String,
}

impl DocumentRecord {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            nsu: value.get("NSU").map(parse_nsu).unwrap_or(0),
            access_key: text("ChaveAcesso").trim().to_string(),
            kind: text("TipoDocumento").to_uppercase(),
            payload: text("ArquivoXml"),
            generated_at: text("DataHoraGeracao"),
        }
    }
}

fn parse_nsu(value: &Value) -> Nsu {
    match value {
        Value::Number(num) => num.as_u64().unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(rename = "StatusProcessamento", default)]
    status: Option<String>,
    #[serde(rename = "LoteDFe", default)]
    lote: Option<Vec<Value>>,
}
