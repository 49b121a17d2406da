mod common;

use std::net::SocketAddr;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::*;
use dfesync::{fetch_round, DocumentSource, FetchError, FsArtifactStore, RegistrySession, StopReason};
use serde_json::json;
use url::Url;

async fn dfe(Path(cursor): Path<u64>) -> Response {
    match cursor {
        0 => {
            let documents: Vec<_> = [5u64, 12, 9]
                .iter()
                .map(|&nsu| {
                    let key = access_key(nsu);
                    json!({
                        "NSU": nsu.to_string(),
                        "ChaveAcesso": key,
                        "TipoDocumento": "NFSE",
                        "ArquivoXml": encode_payload(&nfse_xml(SUPPLIER, &key)),
                        "DataHoraGeracao": "2023-09-27T08:28:28.377",
                    })
                })
                .collect();
            Json(json!({
                "StatusProcessamento": "DOCUMENTOS_LOCALIZADOS",
                "LoteDFe": documents,
            }))
            .into_response()
        }
        401 => StatusCode::UNAUTHORIZED.into_response(),
        503 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        999 => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        _ => Json(json!({ "StatusProcessamento": "NENHUM_DOCUMENTO_LOCALIZADO" })).into_response(),
    }
}

async fn spawn_registry() -> SocketAddr {
    let app = Router::new().route("/contribuintes/DFe/:cursor", get(dfe));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn session(addr: SocketAddr) -> RegistrySession {
    let base = Url::parse(&format!("http://{addr}/")).expect("url");
    RegistrySession::new(reqwest::Client::new(), &base)
}

#[tokio::test]
async fn session_parses_registry_pages() {
    let session = session(spawn_registry().await);

    let page = session.fetch_page(0).await.expect("page");
    assert!(page.is_productive());
    assert_eq!(page.max_nsu(), Some(12));

    let page = session.fetch_page(12).await.expect("page");
    assert!(!page.is_productive());
}

#[tokio::test]
async fn session_maps_failures() {
    let session = session(spawn_registry().await);

    assert!(matches!(
        session.fetch_page(401).await,
        Err(FetchError::Unauthorized(_))
    ));
    assert!(matches!(
        session.fetch_page(503).await,
        Err(FetchError::Status(_))
    ));
    assert!(matches!(
        session.fetch_page(999).await,
        Err(FetchError::Body(_))
    ));
}

#[tokio::test]
async fn full_round_over_http() {
    let session = session(spawn_registry().await);
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsArtifactStore::new(dir.path());

    let outcome = fetch_round(&session, &store, &owner_company(0), 0, 100)
        .await
        .expect("round");

    assert_eq!(outcome.end_cursor, 12);
    assert_eq!(outcome.stored, 3);
    assert_eq!(outcome.stop, StopReason::Drained);
    let received = dir.path().join("Acme Serviços Ltda/092023/received");
    assert!(received.join("KEY000012.xml").is_file());
    assert_eq!(xml_files(dir.path()).len(), 3);
}
