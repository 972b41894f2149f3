//! Synthetic answer sheets for testing the grader end to end.
//!
//! [`generate_sheet`] draws a US Letter bubble sheet with `lopdf` content
//! operations: a header, name/ID/date lines, then two columns of numbered
//! questions with four lettered bubbles each. Filled bubbles are solid black.
//!
//! [`random_answers`] picks the marks from a seeded RNG, so the same seed
//! always yields the same sheet and the chosen letters double as the answer
//! key for that sheet.

use crate::answer_key::Letter;
use crate::error::GradeError;
use crate::report::write_atomic;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::debug;

/// Cubic Bézier control distance for a quarter circle of radius 1.
const KAPPA: f32 = 0.552_284_8;

/// Page geometry of a generated sheet, in PDF points.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub page_width: f32,
    pub page_height: f32,
    /// Distance from the top edge to the title baseline.
    pub top_margin: f32,
    pub columns: usize,
    pub questions_per_column: usize,
    pub bubble_radius: f32,
    /// Centre-to-centre distance between bubbles of one question.
    pub horizontal_spacing: f32,
    /// Baseline distance between consecutive questions.
    pub vertical_spacing: f32,
    /// Blank space between columns.
    pub column_gap: f32,
    pub title: String,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            page_width: 612.0,
            page_height: 792.0,
            top_margin: 72.0,
            columns: 2,
            questions_per_column: 20,
            bubble_radius: 8.0,
            horizontal_spacing: 30.0,
            vertical_spacing: 28.0,
            column_gap: 40.0,
            title: "Multiple Choice Answer Sheet".to_string(),
        }
    }
}

impl SheetLayout {
    /// Number of questions the layout has room for.
    pub fn capacity(&self) -> usize {
        self.columns * self.questions_per_column
    }

    /// Width of one column: the question label plus four bubbles.
    fn column_width(&self) -> f32 {
        30.0 + 3.0 * self.horizontal_spacing
    }

    fn left_edge(&self) -> f32 {
        let total = self.columns as f32 * self.column_width()
            + (self.columns.saturating_sub(1)) as f32 * self.column_gap;
        (self.page_width - total) / 2.0
    }

    /// Centre of the bubble for `letter` on 1-indexed `question`, or `None`
    /// when the question is 0 or past [`capacity`](Self::capacity).
    pub fn bubble_centre(&self, question: usize, letter: Letter) -> Option<(f32, f32)> {
        if question > self.capacity() {
            return None;
        }
        let idx = question.checked_sub(1)?;
        let col = idx / self.questions_per_column;
        let row = idx % self.questions_per_column;
        let x = self.left_edge()
            + col as f32 * (self.column_width() + self.column_gap)
            + 30.0
            + letter.index() as f32 * self.horizontal_spacing;
        let y = self.first_row_y() - row as f32 * self.vertical_spacing + 2.0;
        Some((x, y))
    }

    fn title_y(&self) -> f32 {
        self.page_height - self.top_margin
    }

    fn first_row_y(&self) -> f32 {
        self.title_y() - 100.0
    }
}

/// Draw a sheet with the given marks and return the PDF bytes.
///
/// `marks[i]` is the filled bubble for question `i + 1`; `None` leaves the
/// question blank. The sheet has exactly `marks.len()` questions.
///
/// # Errors
/// [`GradeError::SheetGenerationFailed`] when there are no marks, more marks
/// than the layout holds, or the PDF cannot be serialised.
pub fn generate_sheet(layout: &SheetLayout, marks: &[Option<Letter>]) -> Result<Vec<u8>, GradeError> {
    if marks.is_empty() {
        return Err(GradeError::SheetGenerationFailed(
            "at least one question is required".into(),
        ));
    }
    if marks.len() > layout.capacity() {
        return Err(GradeError::SheetGenerationFailed(format!(
            "{} questions do not fit a {}×{} layout",
            marks.len(),
            layout.columns,
            layout.questions_per_column
        )));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(helvetica("Helvetica"));
    let bold = doc.add_object(helvetica("Helvetica-Bold"));
    let oblique = doc.add_object(helvetica("Helvetica-Oblique"));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
            "F3" => oblique,
        },
    });

    let content = Content {
        operations: sheet_operations(layout, marks),
    };
    let encoded = content
        .encode()
        .map_err(|e| GradeError::SheetGenerationFailed(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), layout.page_width.into(), layout.page_height.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| GradeError::SheetGenerationFailed(e.to_string()))?;
    debug!(
        "Generated sheet: {} questions, {} bytes",
        marks.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// [`generate_sheet`] straight to a file.
pub fn write_sheet(
    path: impl AsRef<Path>,
    layout: &SheetLayout,
    marks: &[Option<Letter>],
) -> Result<(), GradeError> {
    let bytes = generate_sheet(layout, marks)?;
    write_atomic(path.as_ref(), &bytes)
}

/// One filled letter per question, reproducible for a given seed.
pub fn random_answers(n: usize, seed: u64) -> Vec<Letter> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| Letter::ALL[rng.gen_range(0..4)]).collect()
}

fn helvetica(base_font: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
    }
}

// ── Drawing ──────────────────────────────────────────────────────────────

fn sheet_operations(layout: &SheetLayout, marks: &[Option<Letter>]) -> Vec<Operation> {
    let mut ops = Vec::new();
    let left = layout.left_edge();
    let top = layout.title_y();

    ops.push(Operation::new("w", vec![1.into()]));
    ops.push(Operation::new("RG", vec![0.into(), 0.into(), 0.into()]));
    ops.push(Operation::new("rg", vec![0.into(), 0.into(), 0.into()]));

    let title_x = (layout.page_width - text_width(&layout.title, 14.0)) / 2.0;
    text(&mut ops, "F2", 14.0, title_x, top, &layout.title);
    text(&mut ops, "F1", 10.0, left, top - 30.0, "Student Name: ________________");
    text(
        &mut ops,
        "F1",
        10.0,
        layout.page_width / 2.0 + 40.0,
        top - 30.0,
        "ID: ____________________",
    );
    text(&mut ops, "F1", 10.0, left, top - 50.0, "Test Date: ______________");
    text(
        &mut ops,
        "F3",
        9.0,
        left,
        top - 70.0,
        "Instructions: Fill in the bubbles completely using a pencil.",
    );

    for (idx, mark) in marks.iter().enumerate() {
        let question = idx + 1;
        let Some((first_x, cy)) = layout.bubble_centre(question, Letter::A) else {
            break;
        };
        let label_y = cy - 2.0;
        text(
            &mut ops,
            "F1",
            10.0,
            first_x - 30.0,
            label_y,
            &format!("{question:02}."),
        );

        for letter in Letter::ALL {
            let Some((cx, cy)) = layout.bubble_centre(question, letter) else {
                continue;
            };
            circle(&mut ops, cx, cy, layout.bubble_radius);
            let filled = *mark == Some(letter);
            ops.push(Operation::new(if filled { "B" } else { "S" }, vec![]));

            let label = letter.to_string();
            let w = text_width(&label, 7.0);
            text(&mut ops, "F1", 7.0, cx - w / 2.0, cy - 2.0, &label);
        }
    }
    ops
}

fn text(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, s: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(s)]));
    ops.push(Operation::new("ET", vec![]));
}

/// Append a closed circle path made of four Bézier arcs.
fn circle(ops: &mut Vec<Operation>, cx: f32, cy: f32, r: f32) {
    let k = r * KAPPA;
    ops.push(Operation::new("m", vec![(cx + r).into(), cy.into()]));
    let arcs = [
        [cx + r, cy + k, cx + k, cy + r, cx, cy + r],
        [cx - k, cy + r, cx - r, cy + k, cx - r, cy],
        [cx - r, cy - k, cx - k, cy - r, cx, cy - r],
        [cx + k, cy - r, cx + r, cy - k, cx + r, cy],
    ];
    for arc in arcs {
        ops.push(Operation::new(
            "c",
            arc.iter().map(|v| (*v).into()).collect(),
        ));
    }
    ops.push(Operation::new("h", vec![]));
}

/// Approximate Helvetica advance width, enough to centre short labels.
fn text_width(s: &str, size: f32) -> f32 {
    let units: u32 = s
        .chars()
        .map(|c| match c {
            'A' | 'B' | 'E' | 'K' | 'P' | 'S' | 'V' | 'X' | 'Y' => 667,
            'C' | 'D' | 'H' | 'N' | 'R' | 'U' => 722,
            'M' => 833,
            'W' => 944,
            'F' | 'T' | 'Z' => 611,
            'G' | 'O' | 'Q' => 778,
            'I' | 'i' | 'j' | 'l' | ' ' => 278,
            'J' | 'c' | 'k' | 's' | 'v' | 'x' | 'y' | 'z' => 500,
            'L' => 556,
            'f' | 't' => 278,
            'r' => 333,
            'm' => 833,
            'w' => 722,
            _ => 556,
        })
        .sum();
    units as f32 * size / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_fits_forty_questions() {
        assert_eq!(SheetLayout::default().capacity(), 40);
    }

    #[test]
    fn sheet_is_a_one_page_pdf() {
        let marks: Vec<_> = random_answers(40, 7).into_iter().map(Some).collect();
        let bytes = generate_sheet(&SheetLayout::default(), &marks).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn filled_bubbles_are_painted() {
        let marks = [Some(Letter::B), None, Some(Letter::D)];
        let layout = SheetLayout::default();
        let ops = sheet_operations(&layout, &marks);
        let fills = ops.iter().filter(|op| op.operator == "B").count();
        let strokes = ops.iter().filter(|op| op.operator == "S").count();
        assert_eq!(fills, 2);
        assert_eq!(strokes, 10);
    }

    #[test]
    fn bubbles_stay_on_the_page() {
        let layout = SheetLayout::default();
        for q in [1, 20, 21, 40] {
            for letter in Letter::ALL {
                let (x, y) = layout.bubble_centre(q, letter).unwrap();
                assert!(x - layout.bubble_radius > 0.0 && x + layout.bubble_radius < layout.page_width);
                assert!(y - layout.bubble_radius > 0.0 && y + layout.bubble_radius < layout.page_height);
            }
        }
        // Question 21 starts the second column on the first row.
        assert_eq!(
            layout.bubble_centre(1, Letter::A).unwrap().1,
            layout.bubble_centre(21, Letter::A).unwrap().1
        );
    }

    #[test]
    fn bubble_centre_outside_the_layout_is_none() {
        let layout = SheetLayout::default();
        assert_eq!(layout.bubble_centre(0, Letter::A), None);
        assert_eq!(layout.bubble_centre(41, Letter::D), None);
        assert!(layout.bubble_centre(40, Letter::D).is_some());

        let empty = SheetLayout {
            columns: 0,
            ..SheetLayout::default()
        };
        assert_eq!(empty.bubble_centre(1, Letter::A), None);
    }

    #[test]
    fn rejects_too_many_questions() {
        let marks = vec![None; 41];
        let err = generate_sheet(&SheetLayout::default(), &marks).unwrap_err();
        assert!(matches!(err, GradeError::SheetGenerationFailed(_)));
        assert!(generate_sheet(&SheetLayout::default(), &[]).is_err());
    }

    #[test]
    fn seeded_answers_are_reproducible() {
        assert_eq!(random_answers(40, 42), random_answers(40, 42));
        assert_ne!(random_answers(40, 1), random_answers(40, 2));
        assert_eq!(random_answers(5, 9).len(), 5);
    }

    #[test]
    fn write_sheet_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.pdf");
        write_sheet(&path, &SheetLayout::default(), &[Some(Letter::A)]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
