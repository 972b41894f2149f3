//! End-to-end tests for omr-grader.
//!
//! The rendering tests need a pdfium library and the grading test makes live
//! LLM calls, so both are gated behind the `E2E_ENABLED` environment
//! variable. Input validation tests run everywhere.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture

use omr_grader::pipeline::render::rasterize_page;
use omr_grader::{
    generate_sheet, grade, grade_from_bytes, inspect, random_answers, write_sheet, AnswerKey,
    GradeError, GradingConfig, Letter, PdfSource, SheetLayout,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

/// Skip unless an LLM key is available as well.
macro_rules! e2e_skip_unless_llm {
    () => {{
        e2e_skip_unless_enabled!();
        if std::env::var("OPENAI_API_KEY").is_err()
            && std::env::var("EDGEQUAKE_LLM_PROVIDER").is_err()
        {
            println!("SKIP: no OPENAI_API_KEY or EDGEQUAKE_LLM_PROVIDER set");
            return;
        }
    }};
}

fn sample_sheet(questions: usize, seed: u64) -> (Vec<u8>, AnswerKey) {
    let letters = random_answers(questions, seed);
    let marks: Vec<Option<Letter>> = letters.iter().copied().map(Some).collect();
    let bytes = generate_sheet(&SheetLayout::default(), &marks).expect("sheet generation");
    (bytes, AnswerKey::new(letters).expect("non-empty key"))
}

fn write_sample(dir: &tempfile::TempDir, questions: usize, seed: u64) -> (PathBuf, AnswerKey) {
    let letters = random_answers(questions, seed);
    let marks: Vec<Option<Letter>> = letters.iter().copied().map(Some).collect();
    let path = dir.path().join(format!("sheet_{seed}.pdf"));
    write_sheet(&path, &SheetLayout::default(), &marks).expect("write sheet");
    (path, AnswerKey::new(letters).expect("non-empty key"))
}

// ── Input validation (no pdfium, no LLM) ─────────────────────────────────────

#[tokio::test]
async fn missing_file_fails_before_any_model_call() {
    let key = AnswerKey::parse("ABCD").unwrap();
    let err = grade("/nonexistent/sheet.pdf", &key, &GradingConfig::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, GradeError::FileNotFound { .. }),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn non_pdf_bytes_are_rejected() {
    let key = AnswerKey::parse("ABCD").unwrap();
    let err = grade_from_bytes(b"PK\x03\x04 not a pdf", &key, &GradingConfig::default())
        .await
        .unwrap_err();
    match err {
        GradeError::NotAPdf { magic, .. } => assert_eq!(magic, b"PK\x03\x04".to_vec()),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_pdf_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sheet.pdf");
    std::fs::write(&path, b"\x89PNG\r\n\x1a\n").unwrap();

    let err = inspect(path.to_str().unwrap(), &GradingConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GradeError::NotAPdf { .. }), "got: {err:?}");
}

// ── Rendering (pdfium) ───────────────────────────────────────────────────────

#[tokio::test]
async fn generated_sheet_has_one_page() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_sample(&dir, 40, 1);

    let info = inspect(path.to_str().unwrap(), &GradingConfig::default())
        .await
        .expect("inspect() should succeed");
    assert_eq!(info.page_count, 1);
    assert!(info.size_bytes > 0);
}

#[tokio::test]
async fn rasterisation_is_deterministic() {
    e2e_skip_unless_enabled!();
    let (bytes, _) = sample_sheet(40, 2);
    let source = PdfSource::from_bytes("generated", bytes).unwrap();

    let a = rasterize_page(&source, 0, 150, None, None).await.unwrap();
    let b = rasterize_page(&source, 0, 150, None, None).await.unwrap();
    assert_eq!((a.width(), a.height()), (b.width(), b.height()));

    // US Letter at 150 DPI.
    assert!((a.width() as i64 - 1275).abs() <= 2, "width {}", a.width());
    assert!((a.height() as i64 - 1650).abs() <= 2, "height {}", a.height());
    assert_eq!(a.to_rgb8().as_raw(), b.to_rgb8().as_raw());
}

#[tokio::test]
async fn page_out_of_range_is_reported_one_indexed() {
    e2e_skip_unless_enabled!();
    let (bytes, _) = sample_sheet(5, 3);
    let source = PdfSource::from_bytes("generated", bytes).unwrap();

    let err = rasterize_page(&source, 1, 150, None, None).await.unwrap_err();
    assert!(
        matches!(err, GradeError::PageOutOfRange { page: 2, total: 1 }),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn pixel_cap_bounds_longest_edge() {
    e2e_skip_unless_enabled!();
    let (bytes, _) = sample_sheet(5, 4);
    let source = PdfSource::from_bytes("generated", bytes).unwrap();

    let img = rasterize_page(&source, 0, 300, Some(1000), None).await.unwrap();
    assert!(img.width().max(img.height()) <= 1000);
}

// ── Live grading ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_grading_of_generated_sheet() {
    e2e_skip_unless_llm!();
    let dir = tempfile::tempdir().unwrap();
    let (path, key) = write_sample(&dir, 10, 42);

    let config = GradingConfig::builder().concurrency(4).build().unwrap();
    let report = grade(path.to_str().unwrap(), &key, &config)
        .await
        .expect("grade() should succeed");

    print!("{}", report.render_table());
    assert_eq!(report.rows.len(), key.len());
    assert!(report.stats.total_input_tokens > 0);
    // Clean synthetic marks; allow a little model noise.
    assert!(
        report.score * 10 >= key.len() * 8,
        "score {}/{} too low",
        report.score,
        report.total
    );

    let csv = dir.path().join("results.csv");
    report.write_csv(&csv).unwrap();
    assert!(std::fs::read_to_string(&csv).unwrap().starts_with("Question,"));
}
