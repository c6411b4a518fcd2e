use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rusqlite::Connection;
use turnover_loader::{
    config::LoaderConfig,
    contract::{ColumnContract, FieldKind},
    data::Cell,
    io_utils::classify_cell,
    pipeline::Pipeline,
    rows::Table,
};

fn generate_report(rows: usize) -> Table {
    let contract = ColumnContract::turnover();
    let mut headers = contract
        .fields()
        .iter()
        .map(|f| f.source[0].clone())
        .collect::<Vec<_>>();
    headers.push("Комментарий".to_string());

    let data = (0..rows)
        .map(|i| {
            let mut row = contract
                .fields()
                .iter()
                .map(|f| match (f.name.as_str(), f.kind) {
                    ("period", _) => classify_cell(&format!("2024-{:02}-28", (i % 12) + 1)),
                    ("item_code", _) => classify_cell(&format!("{}", 10_000 + i)),
                    (_, FieldKind::Flag) => Cell::from(if i % 2 == 0 { "Да" } else { "Нет" }),
                    (_, FieldKind::Measure) => Cell::from(format!("{} {:03},{:02}", i % 97, i % 1000, i % 100).as_str()),
                    _ => Cell::from(format!("{}-{i}", f.name).as_str()),
                })
                .collect::<Vec<_>>();
            row.push(Cell::Null);
            row
        })
        .collect();
    Table::with_rows(headers, data)
}

fn bench_projection(c: &mut Criterion) {
    let pipeline = Pipeline::new(LoaderConfig::default()).expect("pipeline");
    let table = generate_report(5_000);

    let mut group = c.benchmark_group("turnover_rows");
    group.sample_size(20);

    group.bench_function("project_5k", |b| {
        b.iter(|| pipeline.prepare(&table).expect("prepare"))
    });

    group.bench_function("ingest_5k_in_memory", |b| {
        b.iter_batched(
            || Connection::open_in_memory().expect("in-memory database"),
            |mut conn| pipeline.ingest(&mut conn, &table, "bench.csv").expect("ingest"),
            BatchSize::PerIteration,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_projection);
criterion_main!(benches);
