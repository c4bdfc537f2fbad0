use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use paintbox::{CalcMode, CalculationEngine, CalculationOptions};

/// Rooms sheet with a running total down column D and a summary that fans in
/// over every row
fn build_engine(rows: usize) -> CalculationEngine {
    let mut engine = CalculationEngine::new(CalculationOptions {
        mode: CalcMode::Manual,
        ..Default::default()
    });
    engine.create_sheet("Rooms").unwrap();
    engine.create_sheet("Summary").unwrap();

    for row in 1..=rows {
        engine
            .set_cell_input("Rooms", &format!("A{}", row), &(10 + row % 7).to_string())
            .unwrap();
        engine
            .set_cell_input("Rooms", &format!("B{}", row), &(8 + row % 5).to_string())
            .unwrap();
        engine
            .set_cell_input("Rooms", &format!("C{}", row), &format!("=2*(A{r}+B{r})*9", r = row))
            .unwrap();
        let running = if row == 1 {
            "=C1".to_string()
        } else {
            format!("=D{}+C{}", row - 1, row)
        };
        engine
            .set_cell_input("Rooms", &format!("D{}", row), &running)
            .unwrap();
        engine
            .set_cell_input("Rooms", &format!("E{}", row), &format!("=ROUND(C{}/350,2)", row))
            .unwrap();
    }
    engine
        .set_cell_input("Summary", "A1", &format!("=SUM(Rooms!E1:E{})", rows))
        .unwrap();
    engine
        .set_cell_input("Summary", "A2", &format!("=Rooms!D{}", rows))
        .unwrap();
    engine
}

fn bench_full_recalc(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_recalc");
    for rows in [1_000usize, 10_000] {
        let mut engine = build_engine(rows);
        engine.recalculate_all();
        group.throughput(Throughput::Elements(engine.formula_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                engine.invalidate_all();
                black_box(engine.recalculate_all())
            })
        });
    }
    group.finish();
}

fn bench_single_edit(c: &mut Criterion) {
    let mut engine = build_engine(10_000);
    engine.recalculate_all();
    let mut width = 10u32;
    c.bench_function("edit_first_row", |b| {
        b.iter(|| {
            width = if width == 10 { 11 } else { 10 };
            engine
                .set_cell_input("Rooms", "A1", &width.to_string())
                .unwrap();
            black_box(engine.recalculate_all())
        })
    });
}

criterion_group!(benches, bench_full_recalc, bench_single_edit);
criterion_main!(benches);
