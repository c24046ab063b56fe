//! Line-oriented quiz file parser.
//!
//! The upload format is one question per block, blocks separated by
//! blank lines:
//!
//! ```text
//! What is the capital of France?
//! A) London
//! B) Paris
//! C) Berlin
//! D) Madrid
//! Answer: 2
//! Paris has been the capital since 508 AD.
//! ```
//!
//! Line 1 is the prompt, lines 2-5 are the options (any prefix scheme
//! the uploader likes, kept verbatim), line 6 is the answer line and an
//! optional line 7 is the explanation. Each block is validated on its
//! own: a bad block is reported and skipped, the rest of the document
//! still parses.

use super::{BLOCK_LINES_MAX, BLOCK_LINES_MIN, OPTION_COUNT};

/// A validated multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// The question prompt, kept as uploaded.
    pub prompt: String,

    /// Exactly four answer options, verbatim including any "A)" prefix.
    pub options: Vec<String>,

    /// Zero-based index of the correct option (answer line is 1-based).
    pub correct_index: usize,

    /// Optional explanation shown after answering.
    pub explanation: Option<String>,
}

/// A per-block parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based position of the offending block in the document.
    pub block_index: usize,

    /// Human-readable reason the block was rejected.
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block {}: {}", self.block_index, self.message)
    }
}

/// Parses an uploaded quiz document.
///
/// Returns the questions from every well-formed block in document order,
/// and one [`ParseError`] per malformed block, also in document order.
/// Never fails: arbitrary input yields an empty question list at worst.
#[must_use]
pub fn parse(document: &str) -> (Vec<Question>, Vec<ParseError>) {
    let mut questions = Vec::new();
    let mut errors = Vec::new();

    let blocks = split_blocks(document);

    for (i, block) in blocks.iter().enumerate() {
        let block_index = i + 1;
        match parse_block(block) {
            Ok(question) => questions.push(question),
            Err(message) => errors.push(ParseError {
                block_index,
                message,
            }),
        }
    }

    (questions, errors)
}

/// Splits a document into non-empty blocks on blank-line boundaries.
///
/// Runs of blank lines of any length act as a single separator, so
/// extra spacing between questions never shifts block numbering.
fn split_blocks(document: &str) -> Vec<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(trimmed.to_owned());
        }
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Validates a single block of non-empty lines.
fn parse_block(lines: &[String]) -> Result<Question, String> {
    if lines.len() < BLOCK_LINES_MIN || lines.len() > BLOCK_LINES_MAX {
        return Err(format!(
            "invalid line count: expected {BLOCK_LINES_MIN} or {BLOCK_LINES_MAX} lines, got {}",
            lines.len()
        ));
    }

    let prompt = lines[0].clone();
    let options: Vec<String> = lines[1..=OPTION_COUNT].to_vec();

    let answer_line = &lines[1 + OPTION_COUNT];
    let correct_index = parse_answer_line(answer_line)?;

    // Explanation only exists as a genuine 7th line. A 6-line block
    // keeps its 6th line as the answer, never as an explanation.
    let explanation = lines.get(BLOCK_LINES_MIN).cloned();

    Ok(Question {
        prompt,
        options,
        correct_index,
        explanation,
    })
}

/// Validates the "Answer: k" line and returns the zero-based index.
fn parse_answer_line(line: &str) -> Result<usize, String> {
    const PREFIX: &str = "answer:";

    let lowered = line.to_lowercase();
    if !lowered.starts_with(PREFIX) {
        return Err(format!("answer line must start with \"Answer:\", got \"{line}\""));
    }

    let rest = line[PREFIX.len()..].trim();
    let value: usize = rest
        .parse()
        .map_err(|_| format!("answer must be a number from 1 to {OPTION_COUNT}, got \"{rest}\""))?;

    if !(1..=OPTION_COUNT).contains(&value) {
        return Err(format!(
            "answer must be from 1 to {OPTION_COUNT}, got {value}"
        ));
    }

    Ok(value - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_BLOCK: &str = "What is 2+2?\nA) 3\nB) 4\nC) 5\nD) 6\nAnswer: 2";

    #[test]
    fn test_parse_single_question() {
        let (questions, errors) = parse(GOOD_BLOCK);
        assert!(errors.is_empty());
        assert_eq!(questions.len(), 1);

        let q = &questions[0];
        assert_eq!(q.prompt, "What is 2+2?");
        assert_eq!(q.options, vec!["A) 3", "B) 4", "C) 5", "D) 6"]);
        assert_eq!(q.correct_index, 1);
        assert!(q.explanation.is_none());
    }

    #[test]
    fn test_parse_with_explanation() {
        let doc = format!("{GOOD_BLOCK}\nBecause arithmetic.");
        let (questions, errors) = parse(&doc);
        assert!(errors.is_empty());
        assert_eq!(
            questions[0].explanation.as_deref(),
            Some("Because arithmetic.")
        );
    }

    #[test]
    fn test_all_valid_answers() {
        for k in 1..=4 {
            let doc = format!("Q?\nA\nB\nC\nD\nAnswer: {k}");
            let (questions, errors) = parse(&doc);
            assert!(errors.is_empty(), "answer {k} should be valid");
            assert_eq!(questions[0].correct_index, k - 1);
        }
    }

    #[test]
    fn test_answer_case_insensitive() {
        let doc = "Q?\nA\nB\nC\nD\nANSWER: 1";
        let (questions, errors) = parse(doc);
        assert!(errors.is_empty());
        assert_eq!(questions[0].correct_index, 0);
    }

    #[test]
    fn test_invalid_line_count() {
        let doc = "Q?\nA\nB\nAnswer: 1";
        let (questions, errors) = parse(doc);
        assert!(questions.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].block_index, 1);
        assert!(errors[0].message.contains("invalid line count"));
    }

    #[test]
    fn test_answer_out_of_range() {
        let doc = "Q?\nA\nB\nC\nD\nAnswer: 5";
        let (questions, errors) = parse(doc);
        assert!(questions.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_answer_not_a_number() {
        let doc = "Q?\nA\nB\nC\nD\nAnswer: two";
        let (questions, errors) = parse(doc);
        assert!(questions.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_missing_answer_prefix() {
        let doc = "Q?\nA\nB\nC\nD\nCorrect: 2";
        let (questions, errors) = parse(doc);
        assert!(questions.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Answer:"));
    }

    #[test]
    fn test_bad_block_does_not_affect_neighbours() {
        let doc = format!("{GOOD_BLOCK}\n\nbroken block\n\n{GOOD_BLOCK}");
        let (questions, errors) = parse(&doc);
        assert_eq!(questions.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].block_index, 2);
    }

    #[test]
    fn test_extra_blank_lines_are_invisible() {
        let single = format!("{GOOD_BLOCK}\n\n{GOOD_BLOCK}");
        let spaced = format!("{GOOD_BLOCK}\n\n\n\n   \n\n{GOOD_BLOCK}");
        assert_eq!(parse(&single), parse(&spaced));
    }

    #[test]
    fn test_whitespace_only_document() {
        let (questions, errors) = parse("   \n\n  \t \n");
        assert!(questions.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_errors_in_document_order() {
        let doc = "one line\n\ntwo\nlines\n\nthree\nshort\nlines";
        let (_, errors) = parse(doc);
        let indices: Vec<usize> = errors.iter().map(|e| e.block_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_six_line_block_never_has_explanation() {
        // The 6th line is always the answer line; an explanation needs
        // a genuine 7th line.
        let (questions, _) = parse(GOOD_BLOCK);
        assert!(questions[0].explanation.is_none());
    }

    #[test]
    fn test_options_keep_prefixes_verbatim() {
        let doc = "Q?\n1) first\n2. second\n(c) third\nplain fourth\nAnswer: 4";
        let (questions, errors) = parse(doc);
        assert!(errors.is_empty());
        assert_eq!(
            questions[0].options,
            vec!["1) first", "2. second", "(c) third", "plain fourth"]
        );
        assert_eq!(questions[0].correct_index, 3);
    }
}
