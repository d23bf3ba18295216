//! Error types for configuration compilation.
//!
//! Every failure is detected while a [`CompiledConfig`](crate::join::CompiledConfig)
//! is being constructed. Variants carry enough context (relation side,
//! condition index, shuffle stage) to point at the offending stage element.

use std::fmt;

use crate::join::JoinMode;
use crate::shuffle::ShuffleStage;

/// Result type for compilation operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Which input relation a stage element belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The left (build) relation, table A in the engine.
    Left,
    /// The right (lookup) relation, table B in the engine.
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Which of the two bounds of a condition is being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    /// `bound_low`, compared with `op_low`.
    Low,
    /// `bound_high`, compared with `op_high`.
    High,
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "bound_low"),
            Self::High => write!(f, "bound_high"),
        }
    }
}

/// Errors that can occur while compiling a join stage configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A filter bound does not fit the 32-bit comparison word of its operator.
    #[error("{side} filter condition {condition}: {bound} {value} does not fit operator {op}")]
    InvalidBound {
        /// Relation the filter belongs to.
        side: Side,
        /// Zero-based condition slot.
        condition: usize,
        /// Which bound overflowed.
        bound: BoundKind,
        /// The rejected value.
        value: i64,
        /// Mnemonic of the operator the bound is compared with.
        op: &'static str,
    },

    /// An operator code is outside the known enumeration.
    #[error("unknown operator code {code} in {context}")]
    UnknownOperator {
        /// The raw code.
        code: u8,
        /// Where the code was found.
        context: String,
    },

    /// The expression matches no entry of the ALU shape table.
    #[error("unsupported expression '{expr}': {reason}")]
    UnsupportedExpression {
        /// The expression source text.
        expr: String,
        /// Why no shape applies.
        reason: String,
    },

    /// The expression text is not in the accepted grammar.
    #[error("syntax error in expression '{expr}' at offset {position}: {message}")]
    ExpressionSyntax {
        /// The expression source text.
        expr: String,
        /// Byte offset of the offending token.
        position: usize,
        /// What was expected.
        message: String,
    },

    /// A constant does not fit its fixed-point register.
    #[error("constant c{register} = {value} overflows a {bits}-bit register")]
    ConstantOverflow {
        /// Register number, 1-based (`c1..c4`).
        register: usize,
        /// The bound value before scaling.
        value: i64,
        /// Significant register width in bits.
        bits: u32,
    },

    /// A shuffle source index is beyond the stage's input width.
    #[error(
        "shuffle {} slot {slot}: source {index} is out of range (limit {limit})",
        stage_label(.stage)
    )]
    InvalidShuffleIndex {
        /// The pipeline stage the table belongs to, if the table was built for one.
        stage: Option<ShuffleStage>,
        /// Output slot holding the bad entry.
        slot: usize,
        /// The rejected source index.
        index: u8,
        /// Exclusive upper bound for this stage.
        limit: u8,
    },

    /// Semi and anti joins discard the right relation's payload.
    #[error("{mode} join cannot carry right payload columns (got {count})")]
    InvalidModePayload {
        /// The requested join mode.
        mode: JoinMode,
        /// Number of right payload columns supplied.
        count: usize,
    },

    /// Too many payload columns for the 8-slot column map.
    #[error("{side} relation has {count} payload columns, at most {limit} fit")]
    PayloadOverflow {
        /// Offending relation.
        side: Side,
        /// Number of payload columns supplied.
        count: usize,
        /// Number of slots left after the key columns.
        limit: usize,
    },

    /// Join keys must be one or two columns, the same number on both sides.
    #[error("join key must have 1 or 2 columns on both sides (left {left}, right {right})")]
    InvalidKeyCount {
        /// Left key column count.
        left: usize,
        /// Right key column count.
        right: usize,
    },

    /// A column index exceeds the relation's scan width.
    #[error("{side} column {column} is outside the {limit}-column scan width")]
    ColumnOutOfRange {
        /// Offending relation.
        side: Side,
        /// The rejected column index.
        column: u8,
        /// Scan width.
        limit: u8,
    },

    /// A column name could not be resolved.
    #[error("{side} relation has no column named '{name}'")]
    UnknownColumn {
        /// Relation searched.
        side: Side,
        /// The unresolved name.
        name: String,
    },

    /// An output slot outside `0..5` was named in a suppression set.
    #[error("output slot {slot} does not exist (the engine writes slots 0..5)")]
    InvalidOutputSlot {
        /// The rejected slot.
        slot: u8,
    },

    /// Compile options are inconsistent.
    #[error("invalid compile options: {message}")]
    InvalidOptions {
        /// Description of the problem.
        message: String,
    },

    /// A shape table supplied as configuration is malformed.
    #[error("invalid ALU shape table: {message}")]
    ShapeTable {
        /// Description of the problem.
        message: String,
    },

    /// A serialized record could not be decoded.
    #[error("invalid configuration record: {reason}")]
    InvalidRecord {
        /// Description of the problem.
        reason: String,
    },
}

fn stage_label(stage: &Option<ShuffleStage>) -> String {
    stage.map_or_else(|| "table".to_string(), |s| s.to_string())
}

impl CompileError {
    /// Creates an [`UnsupportedExpression`](Self::UnsupportedExpression) error.
    pub fn unsupported(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    /// Creates an [`InvalidRecord`](Self::InvalidRecord) error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Creates an [`InvalidOptions`](Self::InvalidOptions) error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Creates a [`ShapeTable`](Self::ShapeTable) error.
    pub fn shape_table(message: impl Into<String>) -> Self {
        Self::ShapeTable {
            message: message.into(),
        }
    }
}
