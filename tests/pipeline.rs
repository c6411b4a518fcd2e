mod common;

use std::{thread, time::Duration};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use turnover_loader::{
    config::LoaderConfig,
    contract::{ColumnContract, FieldKind, FieldRole, FieldSpec},
    data::Cell,
    error::IngestError,
    io_utils::CsvTableReader,
    pipeline::{Pipeline, open_database},
    rows::Table,
    upsert::IngestCounts,
};

use common::{COMMENT_HEADER, TestWorkspace, turnover_headers, turnover_row};

fn stock_pipeline() -> Pipeline {
    let contract = ColumnContract::new(vec![
        FieldSpec::new("Period", "period", FieldKind::Timestamp).with_role(FieldRole::Period),
        FieldSpec::new("SKU", "sku", FieldKind::Text).with_role(FieldRole::Identifier),
        FieldSpec::new("Qty", "qty", FieldKind::Measure),
        FieldSpec::new("Illiquid", "illiquid", FieldKind::Flag),
    ])
    .expect("valid contract");
    Pipeline::new(LoaderConfig::new("stock", contract).expect("valid config")).expect("pipeline")
}

fn stock_headers() -> Vec<String> {
    ["Period", "SKU", "Qty", "Illiquid", "Note"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn jan_first() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn stock_row(sku: Cell, qty: Cell, note: &str) -> Vec<Cell> {
    vec![
        Cell::from("2024-01-01"),
        sku,
        qty,
        Cell::from("нет"),
        Cell::from(note),
    ]
}

type StoredRow = (String, String, Option<f64>, Option<String>, String);

fn stored_turnover_rows(conn: &Connection) -> Vec<StoredRow> {
    let mut stmt = conn
        .prepare(
            "SELECT period, item_code, revenue, source_file, payload
             FROM raw_turnover_stock ORDER BY period, item_code",
        )
        .unwrap();
    stmt.query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

#[test]
fn reingesting_the_same_file_is_idempotent() {
    let workspace = TestWorkspace::new();
    let report = workspace.write_report(
        "turnover.csv",
        &turnover_headers(),
        &[
            turnover_row("2024-01-31", "1001", "1 500,25"),
            turnover_row("2024-01-31", "1002", "20"),
            turnover_row("2024-02-29", "1001", "30,5"),
        ],
    );
    let pipeline = Pipeline::new(LoaderConfig::default()).unwrap();
    let reader = CsvTableReader::default();
    let mut conn = open_database(&workspace.database()).unwrap();

    let first = pipeline.ingest_path(&mut conn, &reader, &report).unwrap();
    let after_first = stored_turnover_rows(&conn);
    let second = pipeline.ingest_path(&mut conn, &reader, &report).unwrap();
    let after_second = stored_turnover_rows(&conn);

    assert_eq!(first.counts(), IngestCounts { rows_seen: 3, rows_written: 3 });
    assert_eq!(second.counts(), first.counts());
    assert_eq!(after_first.len(), 3);
    assert_eq!(after_first, after_second);
    assert_eq!(after_first[0].2, Some(1500.25));
    assert_eq!(after_first[0].3.as_deref(), Some("turnover.csv"));

    let payload: serde_json::Value = serde_json::from_str(&after_first[0].4).unwrap();
    assert_eq!(
        payload[COMMENT_HEADER.to_lowercase().as_str()],
        json!("note for 1001")
    );
    assert_eq!(payload["номенклатура_код"], json!(1001));
}

#[test]
fn payload_round_trips_every_column() {
    let pipeline = stock_pipeline();
    let mut conn = Connection::open_in_memory().unwrap();
    let loaded = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(8, 30, 0)
        .unwrap();
    let headers = vec![
        "Period".to_string(),
        "SKU".to_string(),
        "Qty".to_string(),
        "Illiquid".to_string(),
        "Received At".to_string(),
        "Unit-Price".to_string(),
        "Note".to_string(),
    ];
    let table = Table::with_rows(
        headers,
        vec![vec![
            Cell::Date(jan_first()),
            Cell::from("SKU1"),
            Cell::Number(12.5),
            Cell::Boolean(true),
            Cell::Date(loaded),
            Cell::Number(f64::NAN),
            Cell::Null,
        ]],
    );

    pipeline.ingest(&mut conn, &table, "typed.csv").unwrap();
    let stored = pipeline
        .engine()
        .load_snapshot(&conn, &jan_first(), "SKU1")
        .unwrap()
        .expect("stored row");

    assert_eq!(stored.payload["period"], json!("2024-01-01T00:00:00"));
    assert_eq!(stored.payload["sku"], json!("SKU1"));
    assert_eq!(stored.payload["qty"], json!(12.5));
    assert_eq!(stored.payload["illiquid"], json!(true));
    assert_eq!(stored.payload["received_at"], json!("2024-01-15T08:30:00"));
    assert_eq!(stored.payload["unit_price"], json!(null));
    assert_eq!(stored.payload["note"], json!(null));
    assert_eq!(stored.payload.len(), 7);
}

#[test]
fn missing_contract_column_writes_nothing_even_with_many_rows() {
    let pipeline = Pipeline::new(LoaderConfig::default()).unwrap();
    let mut conn = Connection::open_in_memory().unwrap();

    let full_headers = turnover_headers();
    let dropped = full_headers
        .iter()
        .position(|h| h == "Выручка")
        .expect("revenue column");
    let headers = full_headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != dropped)
        .map(|(_, h)| h.clone())
        .collect::<Vec<_>>();
    let rows = (0..10_000)
        .map(|i| {
            turnover_row("2024-01-31", &format!("{i}"), "1")
                .into_iter()
                .enumerate()
                .filter(|(idx, _)| *idx != dropped)
                .map(|(_, value)| Cell::String(value))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let table = Table::with_rows(headers, rows);

    match pipeline.ingest(&mut conn, &table, "wrong.csv") {
        Err(IngestError::ContractViolation { missing }) => {
            assert_eq!(missing, vec!["revenue".to_string()]);
        }
        other => panic!("expected contract violation, got {other:?}"),
    }
    assert!(!pipeline.schema().table_exists(&conn).unwrap());
}

#[test]
fn rows_without_identifier_are_counted_but_not_written() {
    let pipeline = stock_pipeline();
    let mut conn = Connection::open_in_memory().unwrap();
    let table = Table::with_rows(
        stock_headers(),
        vec![
            stock_row(Cell::from("A"), Cell::from("1"), "a"),
            stock_row(Cell::Null, Cell::from("2"), "no sku"),
            stock_row(Cell::from("B"), Cell::from("3"), "b"),
            stock_row(Cell::from("   "), Cell::from("4"), "blank sku"),
            stock_row(Cell::Number(77.0), Cell::from("5"), "numeric sku"),
        ],
    );

    let report = pipeline.ingest(&mut conn, &table, "gaps.csv").unwrap();

    assert_eq!(report.counts(), IngestCounts { rows_seen: 5, rows_written: 3 });
    assert_eq!(report.excluded(), 2);
    assert_eq!(pipeline.engine().count_rows(&conn).unwrap(), 3);
    assert!(
        pipeline
            .engine()
            .load_snapshot(&conn, &jan_first(), "77")
            .unwrap()
            .is_some()
    );
}

#[test]
fn ensure_schema_heals_a_partial_table_without_data_loss() {
    let pipeline = stock_pipeline();
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE stock (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             period TEXT NOT NULL,
             sku TEXT,
             legacy TEXT
         );
         INSERT INTO stock (period, sku, legacy) VALUES ('2023-12-01T00:00:00', 'OLD', 'keep me');",
    )
    .unwrap();

    pipeline.ensure_schema(&conn).unwrap();
    pipeline.ensure_schema(&conn).unwrap();

    let names = pipeline
        .schema()
        .existing_columns(&conn)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect::<Vec<_>>();
    for expected in [
        "id",
        "period",
        "loaded_at",
        "source_file",
        "sku",
        "qty",
        "illiquid",
        "payload",
        "legacy",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing column {expected}");
    }
    assert!(pipeline.schema().index_exists(&conn).unwrap());

    let (sku, legacy): (String, String) = conn
        .query_row("SELECT sku, legacy FROM stock", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(sku, "OLD");
    assert_eq!(legacy, "keep me");

    let table = Table::with_rows(
        stock_headers(),
        vec![stock_row(Cell::from("NEW"), Cell::from("1"), "fresh")],
    );
    let report = pipeline.ingest(&mut conn, &table, "after-heal.csv").unwrap();
    assert_eq!(report.rows_written, 1);
    assert_eq!(pipeline.engine().count_rows(&conn).unwrap(), 2);
}

#[test]
fn conflicting_key_is_fully_overwritten() {
    let pipeline = stock_pipeline();
    let mut conn = Connection::open_in_memory().unwrap();

    let first = Table::with_rows(
        stock_headers(),
        vec![stock_row(Cell::from("SKU1"), Cell::from("10"), "first")],
    );
    pipeline.ingest(&mut conn, &first, "a.csv").unwrap();
    let before = pipeline
        .engine()
        .load_snapshot(&conn, &jan_first(), "SKU1")
        .unwrap()
        .expect("first row");

    thread::sleep(Duration::from_millis(5));

    let second = Table::with_rows(
        stock_headers(),
        vec![stock_row(Cell::from("SKU1"), Cell::from("20"), "second")],
    );
    pipeline.ingest(&mut conn, &second, "b.csv").unwrap();
    let after = pipeline
        .engine()
        .load_snapshot(&conn, &jan_first(), "SKU1")
        .unwrap()
        .expect("second row");

    assert_eq!(pipeline.engine().count_rows(&conn).unwrap(), 1);
    let qty: f64 = conn
        .query_row("SELECT qty FROM stock", [], |row| row.get(0))
        .unwrap();
    assert_eq!(qty, 20.0);
    assert_eq!(after.payload["note"], json!("second"));
    assert_eq!(after.source_file.as_deref(), Some("b.csv"));
    assert!(after.loaded_at > before.loaded_at);
    assert_eq!(after.id, before.id);

    let third = Table::with_rows(
        stock_headers(),
        vec![stock_row(Cell::from("SKU1"), Cell::Null, "third")],
    );
    pipeline.ingest(&mut conn, &third, "c.csv").unwrap();
    let qty: Option<f64> = conn
        .query_row("SELECT qty FROM stock", [], |row| row.get(0))
        .unwrap();
    assert_eq!(qty, None);
}

#[test]
fn unreadable_source_is_reported_with_its_path() {
    let workspace = TestWorkspace::new();
    let pipeline = Pipeline::new(LoaderConfig::default()).unwrap();
    let mut conn = open_database(&workspace.database()).unwrap();
    let missing = workspace.path().join("absent.csv");

    match pipeline.ingest_path(&mut conn, &CsvTableReader::default(), &missing) {
        Err(IngestError::UnreadableSource { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected unreadable source, got {other:?}"),
    }

    let broken = workspace.path().join("broken.csv");
    std::fs::write(&broken, b"Period,SKU\n\xff\xfe,\x80\n").unwrap();
    let err = pipeline
        .ingest_path(&mut conn, &CsvTableReader::default(), &broken)
        .unwrap_err();
    assert_eq!(err.kind(), "UnreadableSource");
}

#[test]
fn unusable_database_is_reported_as_storage_failure() {
    let workspace = TestWorkspace::new();
    let pipeline = stock_pipeline();
    let table = Table::with_rows(
        stock_headers(),
        vec![stock_row(Cell::from("A"), Cell::from("1"), "a")],
    );

    let result = open_database(workspace.path())
        .and_then(|mut conn| pipeline.ingest(&mut conn, &table, "a.csv"));

    assert!(matches!(result, Err(IngestError::StorageUnavailable { .. })));
}

#[test]
fn header_only_report_succeeds_with_zero_counts() {
    let workspace = TestWorkspace::new();
    let header_only = workspace.write(
        "header.csv",
        &format!("{}\n", turnover_headers().join(";")),
    );
    let pipeline = Pipeline::new(LoaderConfig::default()).unwrap();
    let mut conn = open_database(&workspace.database()).unwrap();

    let report = pipeline
        .ingest_path(&mut conn, &CsvTableReader::new(Some(b';'), encoding_rs::UTF_8), &header_only)
        .unwrap();

    assert_eq!(report.counts(), IngestCounts::default());
    assert_eq!(report.columns, turnover_headers().len());
}

#[test]
fn numeric_looking_codes_keep_their_exact_text() {
    let workspace = TestWorkspace::new();
    let report = workspace.write(
        "codes.csv",
        "Period,SKU,Qty,Illiquid,Note\n\
         2024-01-01,1E3,1,нет,exp\n\
         2024-01-01,1000,2,нет,plain\n\
         2024-01-01,1.10,3,нет,trailing\n\
         2024-01-01,1.1,4,нет,short\n",
    );
    let pipeline = stock_pipeline();
    let mut conn = open_database(&workspace.database()).unwrap();

    let result = pipeline
        .ingest_path(&mut conn, &CsvTableReader::default(), &report)
        .unwrap();

    assert_eq!(result.counts(), IngestCounts { rows_seen: 4, rows_written: 4 });
    let mut stmt = conn.prepare("SELECT sku FROM stock ORDER BY sku").unwrap();
    let skus = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(skus, vec!["1.1", "1.10", "1000", "1E3"]);

    let stored = pipeline
        .engine()
        .load_snapshot(&conn, &jan_first(), "1.10")
        .unwrap()
        .expect("row for 1.10");
    assert_eq!(stored.payload["sku"], json!("1.10"));
    assert_eq!(stored.payload["note"], json!("trailing"));
}
