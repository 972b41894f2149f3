//! Answer letters, detections, and the answer key a sheet is graded against.
//!
//! The key is always supplied from outside the program (a file or a CLI
//! argument) and is immutable for the duration of a grading run.
//!
//! ## Accepted key formats
//!
//! ```text
//! ["D", "D", "A", "C"]        JSON array of letters
//! DDAC                        compact string
//! D D A C  /  D,D,A,C         separated letters
//! 1. D                        one numbered entry per line
//! 2) D                        (numbers must run 1, 2, 3, … in order)
//! # comment lines are ignored
//! ```

use crate::error::GradeError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One answer option printed on the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Letter {
    A,
    B,
    C,
    D,
}

impl Letter {
    /// Every option, in sheet order.
    pub const ALL: [Letter; 4] = [Letter::A, Letter::B, Letter::C, Letter::D];

    /// Parse a single character, case-insensitively.
    pub fn from_char(c: char) -> Option<Letter> {
        match c.to_ascii_uppercase() {
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Letter::A => 'A',
            Letter::B => 'B',
            Letter::C => 'C',
            Letter::D => 'D',
        }
    }

    /// 0-based column of the bubble on the sheet.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Letter {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Letter::from_char(c).ok_or_else(|| {
                GradeError::InvalidAnswerKey(format!("'{c}' is not one of A, B, C, D"))
            }),
            _ => Err(GradeError::InvalidAnswerKey(format!(
                "'{}' is not a single letter",
                s.trim()
            ))),
        }
    }
}

/// What the model read for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Detection {
    /// A filled bubble.
    Mark(Letter),
    /// No bubble filled.
    Blank,
}

impl Detection {
    /// Marker used on screen and in exports for a blank question.
    pub const BLANK_MARKER: &'static str = "–";

    pub fn letter(self) -> Option<Letter> {
        match self {
            Detection::Mark(l) => Some(l),
            Detection::Blank => None,
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detection::Mark(l) => write!(f, "{l}"),
            Detection::Blank => f.write_str(Self::BLANK_MARKER),
        }
    }
}

/// Ordered ground-truth answers, one per question. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Letter>", into = "Vec<Letter>")]
pub struct AnswerKey {
    answers: Vec<Letter>,
}

impl TryFrom<Vec<Letter>> for AnswerKey {
    type Error = GradeError;

    fn try_from(answers: Vec<Letter>) -> Result<Self, Self::Error> {
        AnswerKey::new(answers)
    }
}

impl From<AnswerKey> for Vec<Letter> {
    fn from(key: AnswerKey) -> Self {
        key.answers
    }
}

static RE_NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*[.):]\s*(\S+)$").unwrap());

static RE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,;]+").unwrap());

impl AnswerKey {
    pub fn new(answers: Vec<Letter>) -> Result<Self, GradeError> {
        if answers.is_empty() {
            return Err(GradeError::InvalidAnswerKey(
                "answer key has no answers".into(),
            ));
        }
        Ok(Self { answers })
    }

    /// Parse a key from any of the formats listed in the module docs.
    pub fn parse(text: &str) -> Result<Self, GradeError> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            return Self::parse_json(trimmed);
        }

        let mut answers = Vec::new();
        for (line_no, line) in trimmed.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(caps) = RE_NUMBERED.captures(line) {
                let number: usize = caps[1].parse().map_err(|_| {
                    GradeError::InvalidAnswerKey(format!("line {}: bad number", line_no + 1))
                })?;
                if number != answers.len() + 1 {
                    return Err(GradeError::InvalidAnswerKey(format!(
                        "line {}: expected question {}, found {}",
                        line_no + 1,
                        answers.len() + 1,
                        number
                    )));
                }
                answers.push(caps[2].parse::<Letter>()?);
                continue;
            }

            for token in RE_SEPARATORS.split(line).filter(|t| !t.is_empty()) {
                for c in token.chars() {
                    let letter = Letter::from_char(c).ok_or_else(|| {
                        GradeError::InvalidAnswerKey(format!(
                            "line {}: '{c}' is not one of A, B, C, D",
                            line_no + 1
                        ))
                    })?;
                    answers.push(letter);
                }
            }
        }

        Self::new(answers)
    }

    fn parse_json(text: &str) -> Result<Self, GradeError> {
        let raw: Vec<String> = serde_json::from_str(text)
            .map_err(|e| GradeError::InvalidAnswerKey(format!("JSON: {e}")))?;
        let answers = raw
            .iter()
            .map(|s| s.parse::<Letter>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(answers)
    }

    /// Read and parse a key file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GradeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GradeError::InvalidAnswerKey(format!(
                "key file not found: {}",
                path.display()
            )),
            _ => GradeError::InvalidAnswerKey(format!("{}: {e}", path.display())),
        })?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// Expected answer for a 1-indexed question.
    pub fn expected(&self, question: usize) -> Option<Letter> {
        question
            .checked_sub(1)
            .and_then(|i| self.answers.get(i))
            .copied()
    }

    pub fn letters(&self) -> &[Letter] {
        &self.answers
    }

    /// `(question, expected)` pairs, questions 1-indexed.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Letter)> + '_ {
        self.answers.iter().enumerate().map(|(i, l)| (i + 1, *l))
    }

    /// Compact form, e.g. `DDACB`.
    pub fn to_compact_string(&self) -> String {
        self.answers.iter().map(|l| l.as_char()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_parsing_is_case_insensitive() {
        assert_eq!(Letter::from_char('a'), Some(Letter::A));
        assert_eq!(Letter::from_char('D'), Some(Letter::D));
        assert_eq!(Letter::from_char('E'), None);
        assert_eq!(" c ".parse::<Letter>().unwrap(), Letter::C);
        assert!("AB".parse::<Letter>().is_err());
        assert!("".parse::<Letter>().is_err());
    }

    #[test]
    fn detection_display() {
        assert_eq!(Detection::Mark(Letter::B).to_string(), "B");
        assert_eq!(Detection::Blank.to_string(), "–");
        assert_eq!(Detection::Blank.letter(), None);
    }

    #[test]
    fn parse_compact() {
        let key = AnswerKey::parse("DDACB").unwrap();
        assert_eq!(key.len(), 5);
        assert_eq!(key.expected(1), Some(Letter::D));
        assert_eq!(key.expected(3), Some(Letter::A));
        assert_eq!(key.expected(0), None);
        assert_eq!(key.expected(6), None);
    }

    #[test]
    fn parse_separated_and_multiline() {
        let key = AnswerKey::parse("D, D, a\n# second row\nC;B\n").unwrap();
        assert_eq!(key.to_compact_string(), "DDACB");
    }

    #[test]
    fn parse_numbered_lines() {
        let key = AnswerKey::parse("1. D\n2) D\n3: A\n").unwrap();
        assert_eq!(key.to_compact_string(), "DDA");
    }

    #[test]
    fn numbered_lines_must_be_in_order() {
        let err = AnswerKey::parse("1. D\n3. A\n").unwrap_err();
        assert!(err.to_string().contains("expected question 2"), "got: {err}");
    }

    #[test]
    fn parse_json_array() {
        let key = AnswerKey::parse(r#"["D", "d", "A"]"#).unwrap();
        assert_eq!(key.letters(), &[Letter::D, Letter::D, Letter::A]);
    }

    #[test]
    fn rejects_bad_letters_and_empty_keys() {
        assert!(matches!(
            AnswerKey::parse("ABE"),
            Err(GradeError::InvalidAnswerKey(_))
        ));
        assert!(AnswerKey::parse("   \n# nothing\n").is_err());
        assert!(AnswerKey::parse("[]").is_err());
        assert!(AnswerKey::parse(r#"["AB"]"#).is_err());
    }

    #[test]
    fn serde_roundtrip_rejects_empty() {
        let key = AnswerKey::parse("ABC").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["A","B","C"]"#);
        assert!(serde_json::from_str::<AnswerKey>("[]").is_err());
    }

    #[test]
    fn from_file_reads_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.txt");
        std::fs::write(&path, "1. B\n2. C\n").unwrap();
        let key = AnswerKey::from_file(&path).unwrap();
        assert_eq!(key.to_compact_string(), "BC");
        assert!(AnswerKey::from_file(dir.path().join("missing.txt")).is_err());
    }
}
