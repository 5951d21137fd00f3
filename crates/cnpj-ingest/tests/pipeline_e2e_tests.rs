//! End-to-end tests for the ingestion pipeline.
//!
//! A wiremock server plays the catalog: an index listing with snapshot
//! folders, a folder listing with archives, and the archive bodies
//! themselves. The pipeline runs against it into a temporary SQLite file.

use std::io::Write;
use std::path::PathBuf;

use cnpj_ingest::catalog::HttpCatalog;
use cnpj_ingest::config::{CsvOptions, ExportOptions, PipelineConfig};
use cnpj_ingest::export::{export_table, ExportFormat};
use cnpj_ingest::pipeline::{ArchiveOutcome, IngestPipeline};
use cnpj_ingest::schema::{Column, ColumnType, TableSchema};
use cnpj_ingest::store::TableStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn empresas_schema() -> TableSchema {
    TableSchema {
        prefix: "Empresas".to_string(),
        columns: vec![
            Column {
                name: "cnpj_basico".to_string(),
                ty: ColumnType::Text,
            },
            Column {
                name: "razao_social".to_string(),
                ty: ColumnType::Text,
            },
            Column {
                name: "capital_social".to_string(),
                ty: ColumnType::Float,
            },
        ],
    }
}

fn cnaes_schema() -> TableSchema {
    TableSchema {
        prefix: "Cnaes".to_string(),
        columns: vec![
            Column {
                name: "codigo".to_string(),
                ty: ColumnType::Text,
            },
            Column {
                name: "descricao".to_string(),
                ty: ColumnType::Text,
            },
        ],
    }
}

fn test_config(base_url: String, download_dir: PathBuf, database_path: PathBuf) -> PipelineConfig {
    PipelineConfig {
        base_url,
        accept_invalid_certs: false,
        download_dir,
        database_path,
        csv: CsvOptions::default(),
        export: ExportOptions::default(),
        chunk_rows: 2,
        concurrency: Some(2),
        timeout_secs: 10,
        tables: vec![empresas_schema(), cnaes_schema()],
    }
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer
            .start_file(name.to_string(), zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn mount_snapshot_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <a href="../">Parent Directory</a>
                <a href="2024-04/">2024-04/</a>
                <a href="2024-05/">2024-05/</a>
                <a href="LAYOUT.pdf">LAYOUT.pdf</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/2024-05/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <a href="../">Parent Directory</a>
                <a href="Empresas0.zip">Empresas0.zip</a>
                <a href="Empresas1.zip">Empresas1.zip</a>
                <a href="Cnaes.zip">Cnaes.zip</a>
                <a href="Desconhecido.zip">Desconhecido.zip</a>
                <a href="Quebrado.zip">Quebrado.zip</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;

    // Three rows so the two-row chunk bound splits them.
    Mock::given(method("GET"))
        .and(path("/2024-05/Empresas0.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[(
            "K333.EMPRECSV",
            b"\"00000001\";\"ACME LTDA\";\"1000,50\"\n\
              \"00000002\";\"BETA SA\";\"250000,00\"\n\
              \"00000003\";\"GAMA ME\";\"\"\n"
                .as_slice(),
        )])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/2024-05/Empresas1.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[(
            "K334.EMPRECSV",
            b"\"00000004\";\"DELTA EIRELI\";\"10,00\"\n".as_slice(),
        )])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/2024-05/Cnaes.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[(
            "F.CNAECSV",
            b"\"0111301\";\"Cultivo de arroz\"\n\"0111302\";\"Cultivo de milho\"\n".as_slice(),
        )])))
        .mount(&server)
        .await;

    // Matches no configured prefix.
    Mock::given(method("GET"))
        .and(path("/2024-05/Desconhecido.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_bytes(&[(
            "D.CSV",
            b"\"x\";\"y\"\n".as_slice(),
        )])))
        .mount(&server)
        .await;

    // Fails to download.
    Mock::given(method("GET"))
        .and(path("/2024-05/Quebrado.zip"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_full_run_loads_tables_and_reports() {
    let server = mount_snapshot_server().await;
    let workdir = tempfile::tempdir().unwrap();

    let config = test_config(
        format!("{}/", server.uri()),
        workdir.path().join("incoming"),
        workdir.path().join("outgoing/cnpj.db"),
    );

    let store = TableStore::open(&config.database_path).await.unwrap();
    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);

    let report = pipeline.run(&store).await.unwrap();

    assert_eq!(report.snapshot, "2024-05");
    assert_eq!(report.archives.len(), 5);
    assert_eq!(report.rows_ingested(), 6);
    assert_eq!(report.failures(), 1);
    assert_eq!(report.skipped(), 1);

    assert_eq!(store.row_count("empresas").await.unwrap(), 4);
    assert_eq!(store.row_count("cnaes").await.unwrap(), 2);

    let broken = report
        .archives
        .iter()
        .find(|a| a.file == "Quebrado.zip")
        .unwrap();
    assert!(matches!(broken.outcome, ArchiveOutcome::FetchFailed { .. }));

    let unknown = report
        .archives
        .iter()
        .find(|a| a.file == "Desconhecido.zip")
        .unwrap();
    assert!(matches!(unknown.outcome, ArchiveOutcome::SkippedNoSchema));

    // Three rows with a two-row chunk bound means two chunks for Empresas0.
    let first = report
        .archives
        .iter()
        .find(|a| a.file == "Empresas0.zip")
        .unwrap();
    match &first.outcome {
        ArchiveOutcome::Ingested { rows, chunks, .. } => {
            assert_eq!(*rows, 3);
            assert_eq!(*chunks, 2);
        },
        other => panic!("unexpected outcome: {:?}", other),
    }

    // The report serializes for the --report flag.
    let json = serde_json::to_string_pretty(&report).unwrap();
    assert!(json.contains("\"snapshot\": \"2024-05\""));
}

#[tokio::test]
async fn test_second_run_accumulates_rows() {
    let server = mount_snapshot_server().await;
    let workdir = tempfile::tempdir().unwrap();

    let config = test_config(
        format!("{}/", server.uri()),
        workdir.path().join("incoming"),
        workdir.path().join("outgoing/cnpj.db"),
    );

    let store = TableStore::open(&config.database_path).await.unwrap();

    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);
    pipeline.run(&store).await.unwrap();

    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);
    let second = pipeline.run(&store).await.unwrap();

    // Tables accumulate across runs; resetting them is out of scope.
    assert_eq!(store.row_count("empresas").await.unwrap(), 8);

    // Archive bodies are served without a HEAD size, so the fetcher cannot
    // prove the cache copy current and downloads again.
    assert_eq!(second.rows_ingested(), 6);
}

#[tokio::test]
async fn test_run_aborts_when_catalog_is_down() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let workdir = tempfile::tempdir().unwrap();
    let config = test_config(
        format!("{}/", server.uri()),
        workdir.path().join("incoming"),
        workdir.path().join("outgoing/cnpj.db"),
    );

    let store = TableStore::open(&config.database_path).await.unwrap();
    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);

    let err = pipeline.run(&store).await.unwrap_err();
    assert!(matches!(
        err,
        cnpj_ingest::IngestError::CatalogUnavailable(_)
    ));
}

#[tokio::test]
async fn test_load_existing_archives_from_disk() {
    let workdir = tempfile::tempdir().unwrap();
    let incoming = workdir.path().join("incoming");
    std::fs::create_dir_all(&incoming).unwrap();

    std::fs::write(
        incoming.join("Cnaes.zip"),
        zip_bytes(&[(
            "F.CNAECSV",
            b"\"0111301\";\"Cultivo de arroz\"\n".as_slice(),
        )]),
    )
    .unwrap();
    std::fs::write(
        incoming.join("Empresas0.zip"),
        zip_bytes(&[(
            "K1.EMPRECSV",
            b"\"00000001\";\"ACME LTDA\";\"1,00\"\n".as_slice(),
        )]),
    )
    .unwrap();

    let config = test_config(
        "http://unused.invalid/".to_string(),
        incoming,
        workdir.path().join("outgoing/cnpj.db"),
    );

    let store = TableStore::open(&config.database_path).await.unwrap();
    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);

    let reports = pipeline.load_existing(&store).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(store.row_count("cnaes").await.unwrap(), 1);
    assert_eq!(store.row_count("empresas").await.unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_archive_is_isolated() {
    let workdir = tempfile::tempdir().unwrap();
    let incoming = workdir.path().join("incoming");
    std::fs::create_dir_all(&incoming).unwrap();

    // Two entries: the single-entry invariant fails for this archive only.
    std::fs::write(
        incoming.join("Cnaes.zip"),
        zip_bytes(&[
            ("a.csv", b"\"1\";\"a\"\n".as_slice()),
            ("b.csv", b"\"2\";\"b\"\n".as_slice()),
        ]),
    )
    .unwrap();
    std::fs::write(
        incoming.join("Empresas0.zip"),
        zip_bytes(&[(
            "K1.EMPRECSV",
            b"\"00000001\";\"ACME LTDA\";\"1,00\"\n".as_slice(),
        )]),
    )
    .unwrap();

    let config = test_config(
        "http://unused.invalid/".to_string(),
        incoming,
        workdir.path().join("outgoing/cnpj.db"),
    );

    let store = TableStore::open(&config.database_path).await.unwrap();
    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);

    let reports = pipeline.load_existing(&store).await.unwrap();

    let failed = reports.iter().find(|r| r.file == "Cnaes.zip").unwrap();
    match &failed.outcome {
        ArchiveOutcome::IngestFailed { error, .. } => {
            assert!(error.contains("exactly one inner entry"));
        },
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(store.row_count("cnaes").await.unwrap(), 0);
    assert_eq!(store.row_count("empresas").await.unwrap(), 1);
}

#[tokio::test]
async fn test_run_then_export() {
    let server = mount_snapshot_server().await;
    let workdir = tempfile::tempdir().unwrap();

    let config = test_config(
        format!("{}/", server.uri()),
        workdir.path().join("incoming"),
        workdir.path().join("outgoing/cnpj.db"),
    );

    let store = TableStore::open(&config.database_path).await.unwrap();
    let catalog = HttpCatalog::new(&config).unwrap();
    let pipeline = IngestPipeline::new(&config, catalog);
    pipeline.run(&store).await.unwrap();

    let exported = export_table(
        &store,
        &cnaes_schema(),
        ExportFormat::Csv,
        workdir.path(),
        &config.csv,
    )
    .await
    .unwrap();

    let contents = std::fs::read_to_string(exported).unwrap();
    assert!(contents.starts_with("codigo;descricao"));
    assert!(contents.contains("Cultivo de arroz"));
}
