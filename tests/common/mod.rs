#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use dfesync::credentials::CredentialError;
use dfesync::{
    Company, Connector, DocumentRecord, DocumentSource, FetchError, FetchPage, Nsu, TaxId,
    TransportError, STATUS_DOCUMENTS_FOUND, STATUS_NO_DOCUMENTS,
};
use flate2::write::GzEncoder;
use flate2::Compression;

pub const OWNER: &str = "12345678000190";
pub const SUPPLIER: &str = "99888777000166";

pub fn encode_payload(xml: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).expect("gzip write");
    let gz = encoder.finish().expect("gzip finish");
    base64::engine::general_purpose::STANDARD.encode(gz)
}

pub fn nfse_xml(issuer: &str, access_key: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><NFSe xmlns="http://www.sped.fazenda.gov.br/nfse"><infNFSe Id="NFS{access_key}"><emit><CNPJ>{issuer}</CNPJ></emit></infNFSe></NFSe>"#
    )
}

pub fn access_key(nsu: Nsu) -> String {
    format!("KEY{nsu:06}")
}

pub fn record(nsu: Nsu, issuer: &str) -> DocumentRecord {
    let key = access_key(nsu);
    DocumentRecord {
        nsu,
        payload: encode_payload(&nfse_xml(issuer, &key)),
        access_key: key,
        kind: "NFSE".into(),
        generated_at: "2024-03-15T10:20:30.123".into(),
    }
}

pub fn corrupted(nsu: Nsu) -> DocumentRecord {
    DocumentRecord {
        nsu,
        access_key: access_key(nsu),
        kind: "NFSE".into(),
        payload: "%%% definitely not base64 %%%".into(),
        generated_at: "2024-03-15T10:20:30".into(),
    }
}

pub fn page(nsus: &[Nsu]) -> FetchPage {
    FetchPage {
        status: STATUS_DOCUMENTS_FOUND.into(),
        documents: nsus.iter().map(|&nsu| record(nsu, SUPPLIER)).collect(),
    }
}

pub fn empty_page() -> FetchPage {
    FetchPage {
        status: STATUS_NO_DOCUMENTS.into(),
        documents: Vec::new(),
    }
}

pub fn owner_company(cursor: Nsu) -> Company {
    Company::new("Acme Serviços Ltda", "12.345.678/0001-90", "pw", cursor)
}

/// Replays queued responses and records every cursor it is asked for.
#[derive(Clone)]
pub struct ScriptedSource {
    responses: Arc<Mutex<VecDeque<Result<FetchPage, FetchError>>>>,
    fallback: Arc<FetchPage>,
    calls: Arc<Mutex<Vec<Nsu>>>,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<FetchPage, FetchError>>) -> Self {
        Self::with_fallback(responses, empty_page())
    }

    pub fn with_fallback(responses: Vec<Result<FetchPage, FetchError>>, fallback: FetchPage) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            fallback: Arc::new(fallback),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn pages(pages: Vec<FetchPage>) -> Self {
        Self::new(pages.into_iter().map(Ok).collect())
    }

    pub fn calls(&self) -> Vec<Nsu> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn fetch_page(&self, cursor: Nsu) -> Result<FetchPage, FetchError> {
        self.calls.lock().expect("calls lock").push(cursor);
        let next = self.responses.lock().expect("responses lock").pop_front();
        next.unwrap_or_else(|| Ok((*self.fallback).clone()))
    }
}

/// Hands out scripted sources by tax id; unknown tax ids have no certificate.
#[derive(Default)]
pub struct ScriptedConnector {
    sources: HashMap<TaxId, ScriptedSource>,
    opened: Mutex<Vec<TaxId>>,
}

impl ScriptedConnector {
    pub fn with(mut self, tax_id: &str, source: ScriptedSource) -> Self {
        self.sources.insert(TaxId::normalize(tax_id), source);
        self
    }

    pub fn opened(&self) -> Vec<TaxId> {
        self.opened.lock().expect("opened lock").clone()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, company: &Company) -> Result<Box<dyn DocumentSource>, TransportError> {
        self.opened
            .lock()
            .expect("opened lock")
            .push(company.tax_id.clone());
        match self.sources.get(&company.tax_id) {
            Some(source) => Ok(Box::new(source.clone())),
            None => Err(TransportError::Credential(CredentialError::NotFound {
                tax_id: company.tax_id.to_string(),
                path: PathBuf::from(format!("{}.pfx", company.tax_id)),
            })),
        }
    }
}

pub fn xml_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "xml") {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}
