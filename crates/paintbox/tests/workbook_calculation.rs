//! Whole-workbook tests: loading analysis documents and recalculating them

use paintbox::prelude::*;
use paintbox::{resolution_report, validate_engine, AnalysisSummary, FormulaCategory};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;

/// An estimate workbook: a rate table, per-room measurements and a summary
fn estimate_document() -> serde_json::Value {
    let rooms = ["Kitchen", "Bedroom", "Hallway", "Bath", "Office", "Den", "Garage", "Attic"];

    let mut room_values = serde_json::Map::new();
    let mut room_formulas = Vec::new();
    for (i, room) in rooms.iter().enumerate() {
        let row = i + 2;
        room_values.insert(format!("A{}", row), json!(room));
        room_values.insert(format!("B{}", row), json!(10 + i));
        room_values.insert(format!("C{}", row), json!(12 + i));
        room_values.insert(format!("D{}", row), json!(if i % 2 == 0 { "Brush" } else { "Roller" }));
        room_formulas.extend([
            json!({ "cell": format!("E{}", row), "formula": format!("=2*(B{r}+C{r})*Height", r = row),
                    "dependencies": [format!("B{}", row), format!("C{}", row)] }),
            json!({ "cell": format!("F{}", row), "formula": format!("=ROUND(E{}/Coverage,2)", row) }),
            json!({ "cell": format!("G{}", row), "category": "Lookup",
                    "formula": format!("=VLOOKUP(D{},'Labor Rates'!$A$2:$B$4,2,FALSE)", row) }),
            json!({ "cell": format!("H{}", row), "formula": format!("=F{r}*G{r}", r = row) }),
        ]);
    }
    // A tool that is not in the rate table
    room_values.insert("D10".into(), json!("Sprayer"));
    room_formulas.push(json!({ "cell": "G10", "formula": "=VLOOKUP(D10,'Labor Rates'!$A$2:$B$4,2,FALSE)" }));

    json!({
        "metadata": {
            "excel_file": "estimate.xlsx",
            "sheet_count": 3,
            "sheets_info": {
                "Summary": { "max_row": 10, "max_column": 3 },
                "Rooms": { "max_row": 10, "max_column": 8 },
                "Labor Rates": { "max_row": 6, "max_column": 2 }
            }
        },
        "named_ranges": {
            "Height": "'Labor Rates'!$B$6",
            "Coverage": { "name": "Coverage", "value": "'Labor Rates'!$B$5" },
            "TaxRate": "0.08"
        },
        "values_by_sheet": {
            "Labor Rates": {
                "A1": "Tool", "B1": "Rate",
                "A2": "Brush", "B2": 8.5,
                "A3": "Roller", "B3": 6.25,
                "A4": "Tape", "B4": 2,
                "B5": 350, "B6": 9
            },
            "Rooms": room_values
        },
        "formulas_by_sheet": {
            "Rooms": room_formulas,
            "Summary": [
                { "cell": "B1", "formula": "=SUM(Rooms!E2:E9)", "category": "Math" },
                { "cell": "B2", "formula": "=SUM(Rooms!H2:H9)" },
                { "cell": "B3", "formula": "=B2*TaxRate" },
                { "cell": "B4", "formula": "=B2+B3" },
                { "cell": "B5", "formula": "=IF(B4>1000,\"Large\",\"Small\")" },
                { "cell": "B6", "formula": "=COUNTIF(Rooms!D2:D9,\"Brush\")" },
                { "cell": "B7", "formula": "=IFERROR(Rooms!G10,0)" },
                { "cell": "B8", "formula": "=B4/B9" }
            ]
        },
        "dependencies": { "B2": ["Rooms!E2"] }
    })
}

fn load(options: CalculationOptions) -> (CalculationEngine, AnalysisDocument) {
    let doc: AnalysisDocument = serde_json::from_value(estimate_document()).unwrap();
    let mut engine = CalculationEngine::new(options);
    engine.load_analysis(&doc).unwrap();
    (engine, doc)
}

fn number(engine: &CalculationEngine, sheet: &str, address: &str) -> f64 {
    engine
        .get_value(sheet, address)
        .unwrap()
        .as_number()
        .unwrap_or_else(|| panic!("{}!{} is not a number", sheet, address))
}

#[test]
fn test_estimate_recalculates() {
    let (mut engine, _) = load(CalculationOptions::default());
    assert_eq!(engine.formula_count(), 41);

    let stats = engine.recalculate_all();
    assert_eq!(stats.cells_evaluated, 41);
    assert!(!stats.cancelled);
    assert_eq!(stats.remaining_dirty, 0);

    // Kitchen: 2*(10+12)*9 = 396 sq ft, 396/350 = 1.13 gallons, brush at 8.50
    assert_eq!(number(&engine, "Rooms", "E2"), 396.0);
    assert_eq!(number(&engine, "Rooms", "F2"), 1.13);
    assert_eq!(number(&engine, "Rooms", "G2"), 8.5);
    assert_eq!(number(&engine, "Rooms", "G3"), 6.25);
    assert_eq!(
        engine.get_value("Rooms", "G10").unwrap(),
        CellValue::Error(CellError::Na)
    );

    let subtotal = number(&engine, "Summary", "B2");
    assert!((number(&engine, "Summary", "B4") - subtotal * 1.08).abs() < 1e-9);
    assert_eq!(number(&engine, "Summary", "B6"), 4.0);
    assert_eq!(number(&engine, "Summary", "B7"), 0.0);
    assert_eq!(
        engine.get_value("Summary", "B8").unwrap(),
        CellValue::Error(CellError::Div0)
    );
}

#[test]
fn test_estimate_resolves_at_least_95_percent() {
    let (mut engine, _) = load(CalculationOptions::default());
    engine.recalculate_all();

    let report = resolution_report(&engine, ValidationOptions::default());
    assert_eq!(report.total, 41);
    assert!(report.passed, "{}", report);
    assert!(report.success_rate >= 0.95);
}

#[test]
fn test_validate_against_reference_values() {
    let (mut engine, _) = load(CalculationOptions::default());
    engine.recalculate_all();

    let expected = ExpectedValues::from_json(
        r##"{
            "Rooms!E2": 396,
            "Rooms!G2": 8.5,
            "Rooms!G10": "#N/A",
            "Summary!B5": "Small",
            "Summary!B8": "#DIV/0!",
            "Summary!B6": 5
        }"##,
    )
    .unwrap();
    let report = validate_engine(&engine, &expected, ValidationOptions::default());

    assert_eq!(report.total, 6);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].cell, "Summary!B6");
    // G2 carries a declared category; G10 falls back to its text, where
    // the sheet name 'Labor Rates' reads as Financial
    assert_eq!(report.categories[&FormulaCategory::Lookup].successful, 1);
    assert_eq!(report.categories[&FormulaCategory::Financial].successful, 1);
}

#[test]
fn test_edit_propagates_in_automatic_mode() {
    let (mut engine, _) = load(CalculationOptions::default());
    engine.recalculate_all();
    let before = number(&engine, "Summary", "B1");

    // Raising the ceiling height repaints every wall
    engine.set_cell_input("Labor Rates", "B6", "10").unwrap();

    assert_eq!(engine.dirty_count(), 0);
    assert!(number(&engine, "Summary", "B1") > before);
    assert_eq!(number(&engine, "Rooms", "E2"), 440.0);
}

#[test]
fn test_manual_mode_defers_until_recalculated() {
    let (mut engine, _) = load(CalculationOptions {
        mode: CalcMode::Manual,
        ..Default::default()
    });
    engine.recalculate_all();

    engine.set_cell_input("Labor Rates", "B2", "9.5").unwrap();
    assert_eq!(number(&engine, "Rooms", "G2"), 8.5);
    assert!(engine.dirty_count() > 0);

    let stats = engine.recalculate_all();
    assert_eq!(number(&engine, "Rooms", "G2"), 9.5);
    // Roller rooms read the same table but their rate did not change
    assert!(stats.cells_skipped > 0);
}

#[test]
fn test_cancelled_pass_resumes() {
    let (mut engine, _) = load(CalculationOptions::default());
    let token = CancellationToken::new();
    token.cancel();

    let stats = engine.recalculate_with(&token);
    assert!(stats.cancelled);
    assert_eq!(stats.remaining_dirty, 41);
    assert_eq!(
        engine.get_value("Labor Rates", "B2").unwrap(),
        CellValue::Number(8.5)
    );

    token.reset();
    let stats = engine.recalculate_with(&token);
    assert_eq!(stats.remaining_dirty, 0);
    assert_eq!(number(&engine, "Rooms", "E2"), 396.0);
}

#[test]
fn test_two_cell_cycle_terminates() {
    let mut engine = CalculationEngine::new(CalculationOptions {
        mode: CalcMode::Manual,
        ..Default::default()
    });
    engine.create_sheet("Sheet1").unwrap();
    engine.set_cell_input("Sheet1", "A1", "=B1+1").unwrap();
    engine.set_cell_input("Sheet1", "B1", "=A1+1").unwrap();
    engine.set_cell_input("Sheet1", "C1", "=A1*2").unwrap();

    let stats = engine.recalculate_all();

    assert_eq!(stats.cycles_failed, 1);
    for address in ["A1", "B1"] {
        let result = engine.calculate_cell("Sheet1", address).unwrap();
        assert_eq!(result.error, Some(ErrorKind::CircularReference));
        assert_eq!(result.formatted_value.as_deref(), Some("#REF!"));
    }
    assert_eq!(
        engine.get_value("Sheet1", "C1").unwrap(),
        CellValue::Error(CellError::Ref)
    );
}

#[test]
fn test_open_analysis_file_and_summary() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{}", estimate_document()).unwrap();

    let (mut engine, doc, summary) =
        CalculationEngine::open_analysis(file.path(), CalculationOptions::default()).unwrap();
    assert_eq!(summary.sheets, 3);
    assert_eq!(summary.names, 3);
    assert_eq!(summary.formulas, 41);
    assert_eq!(summary.parse_errors, 0);
    engine.recalculate_all();

    let report = AnalysisSummary::new(&doc, &engine, 5);
    assert_eq!(report.sheet_count, 3);
    assert_eq!(report.named_ranges, 3);
    assert_eq!(report.complex_formulas[0].precedents, 8);
    assert!(report.to_string().contains("Summary"));

    let names: Vec<&str> = engine.store().sheets().map(|s| s.name()).collect();
    assert_eq!(names, vec!["Summary", "Rooms", "Labor Rates"]);
}

mod ordering {
    use paintbox::{CalcMode, CalculationEngine, CalculationOptions, CellValue};
    use proptest::prelude::*;

    /// Each formula cell `A{i}` sums some earlier cells plus one
    fn chains() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1usize..25).prop_flat_map(|n| {
            (0..n)
                .map(|i| proptest::collection::vec(0..=i, 0..4))
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        #[test]
        fn precedents_rank_before_dependents(reads in chains()) {
            let mut engine = CalculationEngine::new(CalculationOptions {
                mode: CalcMode::Manual,
                ..Default::default()
            });
            engine.create_sheet("S").unwrap();

            // Row 1 holds a literal; formula i lives in row i + 2 and reads
            // the literal and earlier formulas. Inserting last to first keeps
            // cell ids out of evaluation order.
            engine.set_cell_input("S", "A1", "1").unwrap();
            for (i, targets) in reads.iter().enumerate().rev() {
                let formula = targets
                    .iter()
                    .fold(String::from("=1"), |f, t| f + &format!("+A{}", t + 1));
                engine.set_cell_input("S", &format!("A{}", i + 2), &formula).unwrap();
            }

            let mut expected = vec![1.0f64];
            for targets in &reads {
                let value = 1.0 + targets.iter().map(|&t| expected[t]).sum::<f64>();
                expected.push(value);
            }

            let plan = engine.calculation_plan();
            for i in 0..reads.len() {
                let key = engine.key("S", &format!("A{}", i + 2)).unwrap();
                let id = engine.store().cell_id(key).unwrap();
                let rank = plan.rank(id).unwrap();
                for &t in &reads[i] {
                    if t == 0 {
                        continue;
                    }
                    let pkey = engine.key("S", &format!("A{}", t + 1)).unwrap();
                    let pid = engine.store().cell_id(pkey).unwrap();
                    prop_assert!(plan.rank(pid).unwrap() < rank);
                }
            }

            engine.recalculate_all();
            for (row, value) in expected.iter().enumerate() {
                let actual = engine.get_value("S", &format!("A{}", row + 1)).unwrap();
                prop_assert_eq!(actual, CellValue::Number(*value));
            }
        }
    }
}
