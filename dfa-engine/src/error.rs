use core::ops::Range;

use thiserror::Error;

use crate::values::ValueId;

/// Internal invariant violations detected while executing instructions. These
/// never escape a run: the driver loop converts them into an aborted outcome
/// together with the state that triggered them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("stack underflow at instruction {index}: needed {needed} value(s), found {found}")]
    StackUnderflow {
        index: usize,
        needed: usize,
        found: usize,
    },

    #[error("value {value} is not a variable and cannot be {action}")]
    NotAVariable { value: ValueId, action: &'static str },

    #[error("closure {0} does not exist")]
    UnknownClosure(usize),

    #[error("value {0} was not created by the value factory of this run")]
    ForeignValue(ValueId),

    #[error("unexpected panic: {0}")]
    Panic(String),
}

/// Reasons an instruction sequence is rejected before analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("instruction graph is empty")]
    Empty,

    #[error("instruction {index} jumps to {target}, but the graph has {len} instructions")]
    TargetOutOfRange {
        index: usize,
        target: usize,
        len: usize,
    },

    #[error("the last instruction must be a return")]
    MissingReturn,

    #[error("instruction {index} refers to closure {closure}, but only {count} closures exist")]
    ClosureOutOfRange {
        index: usize,
        closure: usize,
        count: usize,
    },

    #[error("closure {closure}: {source}")]
    InClosure {
        closure: usize,
        #[source]
        source: Box<GraphError>,
    },
}

/// A malformed contract text. The range points into the parsed text and is
/// only empty when the text itself is, so it can be underlined by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {}..{}", range.start, range.end)]
pub struct ContractParseError {
    pub message: String,
    pub range: Range<usize>,
}

impl ContractParseError {
    pub(crate) fn new(message: impl Into<String>, range: Range<usize>, text_len: usize) -> Self {
        // Keep the range inside the text and non-empty, pointing at the last
        // character when the problem is a missing token at the very end.
        let mut start = range.start.min(text_len.saturating_sub(1));
        let mut end = range.end.min(text_len).max(start + 1);
        if text_len == 0 {
            start = 0;
            end = 0;
        }
        Self {
            message: message.into(),
            range: start..end,
        }
    }
}
