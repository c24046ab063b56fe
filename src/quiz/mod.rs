//! Quiz document parsing module.
//!
//! Turns uploaded text documents into validated multiple-choice
//! questions. Parsing is pure and tolerant: malformed blocks become
//! per-block errors without affecting their neighbours.

mod parser;

pub use parser::{parse, ParseError, Question};

/// Number of answer options every question must carry.
pub const OPTION_COUNT: usize = 4;

/// Lines in a block without an explanation.
pub const BLOCK_LINES_MIN: usize = 6;

/// Lines in a block with an explanation.
pub const BLOCK_LINES_MAX: usize = 7;
