//! Filter-predicate encoding for the engine's per-relation filter block.
//!
//! A [`FilterSpec`] holds four independent range conditions and the
//! pairwise [`Combine`] codes relating them. [`encode`] packs it into a
//! fixed 45-word [`FilterBlock`]:
//!
//! ```text
//! [0..12)   3 words per condition: bound_low, bound_high, (op_low << 4) | op_high
//! [12]      combine word, one 4-bit code per pair (1-2, 1-3, 1-4, 2-3, 2-4, 3-4)
//! [13..45)  reserved tail, all zero except bit 31 of the last word
//! ```
//!
//! The block length never depends on how many conditions are in use.
//! Unused slots carry the pass-through encoding (both operators
//! [`FilterOp::DontCare`], zero bounds).

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BoundKind, CompileError, Result, Side};

/// Width of every operator field in the filter block.
pub const FILTER_OP_WIDTH: u32 = 4;

/// Number of condition slots in a filter block.
pub const CONDITION_SLOTS: usize = 4;

/// Number of pairwise combine codes.
pub const COMBINE_PAIRS: usize = 6;

/// Length of an encoded filter block in 32-bit words.
pub const FILTER_BLOCK_WORDS: usize = CONDITION_SLOTS * 3 + 1 + TAIL_WORDS;

/// Length of the reserved tail.
const TAIL_WORDS: usize = 32;

/// Block-valid marker carried by the last tail word.
pub const TAIL_MARKER: u32 = 1 << 31;

/// Comparison operator codes understood by the filter unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FilterOp {
    /// Don't care, always true.
    #[default]
    DontCare = 0,
    /// Equal.
    Eq = 1,
    /// Not equal.
    Ne = 2,
    /// Greater than, signed.
    Gt = 3,
    /// Less than, signed.
    Lt = 4,
    /// Greater than or equal, signed.
    Ge = 5,
    /// Less than or equal, signed.
    Le = 6,
    /// Greater than, unsigned.
    Gtu = 7,
    /// Less than, unsigned.
    Ltu = 8,
    /// Greater than or equal, unsigned.
    Geu = 9,
    /// Less than or equal, unsigned.
    Leu = 10,
}

impl FilterOp {
    /// Every operator, in code order.
    pub const ALL: [Self; 11] = [
        Self::DontCare,
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Lt,
        Self::Ge,
        Self::Le,
        Self::Gtu,
        Self::Ltu,
        Self::Geu,
        Self::Leu,
    ];

    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Looks up an operator by wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Returns the mnemonic used in diagnostics.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::DontCare => "DC",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Gt => "GT",
            Self::Lt => "LT",
            Self::Ge => "GE",
            Self::Le => "LE",
            Self::Gtu => "GTU",
            Self::Ltu => "LTU",
            Self::Geu => "GEU",
            Self::Leu => "LEU",
        }
    }

    /// Inclusive range of bound values the operator can compare against.
    ///
    /// Signed operators take `i32`, unsigned ones `u32`, equality either.
    /// `None` for [`DontCare`](Self::DontCare), whose bound is ignored.
    #[must_use]
    pub const fn bound_range(self) -> Option<(i64, i64)> {
        match self {
            Self::DontCare => None,
            Self::Gt | Self::Lt | Self::Ge | Self::Le => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Gtu | Self::Ltu | Self::Geu | Self::Leu => Some((0, u32::MAX as i64)),
            Self::Eq | Self::Ne => Some((i32::MIN as i64, u32::MAX as i64)),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl TryFrom<u8> for FilterOp {
    type Error = CompileError;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| CompileError::UnknownOperator {
            code,
            context: "filter operator".to_string(),
        })
    }
}

/// Two-input logic operator joining a pair of condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CombineOp {
    /// Don't care, the pair does not constrain the result.
    #[default]
    DontCare = 0,
    /// Both conditions hold.
    And = 1,
    /// Either condition holds.
    Or = 2,
    /// Exactly one condition holds.
    Xor = 3,
    /// Not both.
    Nand = 4,
    /// Neither.
    Nor = 5,
    /// Both or neither.
    Xnor = 6,
}

impl CombineOp {
    /// Every operator, in code order.
    pub const ALL: [Self; 7] = [
        Self::DontCare,
        Self::And,
        Self::Or,
        Self::Xor,
        Self::Nand,
        Self::Nor,
        Self::Xnor,
    ];

    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Looks up an operator by wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Returns the mnemonic used in diagnostics.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::DontCare => "DC",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Nand => "NAND",
            Self::Nor => "NOR",
            Self::Xnor => "XNOR",
        }
    }
}

impl fmt::Display for CombineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl TryFrom<u8> for CombineOp {
    type Error = CompileError;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| CompileError::UnknownOperator {
            code,
            context: "combine operator".to_string(),
        })
    }
}

/// One range/comparison predicate over a relation column.
///
/// The engine evaluates `column op_low bound_low` and `column op_high bound_high`
/// and ANDs them; a `DontCare` side is always true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Condition {
    /// Operator applied to `bound_low`.
    #[serde(default)]
    pub op_low: FilterOp,
    /// Operator applied to `bound_high`.
    #[serde(default)]
    pub op_high: FilterOp,
    /// Lower bound.
    #[serde(default)]
    pub bound_low: i64,
    /// Upper bound.
    #[serde(default)]
    pub bound_high: i64,
}

impl Condition {
    /// The always-true condition used for unused slots.
    pub const PASS: Self = Self {
        op_low: FilterOp::DontCare,
        op_high: FilterOp::DontCare,
        bound_low: 0,
        bound_high: 0,
    };

    /// Creates a two-sided range condition.
    #[must_use]
    pub const fn range(op_low: FilterOp, bound_low: i64, op_high: FilterOp, bound_high: i64) -> Self {
        Self {
            op_low,
            op_high,
            bound_low,
            bound_high,
        }
    }

    /// Creates a condition from raw operator codes.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownOperator`] if either code is outside the
    /// operator enumeration.
    pub fn from_codes(op_low: u8, bound_low: i64, op_high: u8, bound_high: i64) -> Result<Self> {
        Ok(Self::range(
            FilterOp::try_from(op_low)?,
            bound_low,
            FilterOp::try_from(op_high)?,
            bound_high,
        ))
    }

    /// Returns `true` if both operators are don't-care.
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        self.op_low == FilterOp::DontCare && self.op_high == FilterOp::DontCare
    }
}

/// Pairwise logic codes between the four conditions.
///
/// The engine reduces the four condition results through these codes in a
/// fixed two-level tree. Setting every pair to [`CombineOp::And`] requires
/// all four conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Combine {
    /// Codes in the fixed order `(1-2, 1-3, 1-4, 2-3, 2-4, 3-4)`.
    pub pairs: [CombineOp; COMBINE_PAIRS],
}

impl Combine {
    /// Condition slot pairs, zero-based, in wire order.
    pub const ORDER: [(usize, usize); COMBINE_PAIRS] =
        [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

    /// Sets every pair to `op`.
    #[must_use]
    pub const fn all(op: CombineOp) -> Self {
        Self {
            pairs: [op; COMBINE_PAIRS],
        }
    }

    /// Returns a copy with the relation between slots `a` and `b` set to `op`.
    ///
    /// Slot order does not matter. Pairs outside `0..4` or with `a == b` leave
    /// the matrix unchanged.
    #[must_use]
    pub fn with_pair(mut self, a: usize, b: usize, op: CombineOp) -> Self {
        let key = (a.min(b), a.max(b));
        if let Some(i) = Self::ORDER.iter().position(|&p| p == key) {
            self.pairs[i] = op;
        }
        self
    }

    /// Packs the matrix into its wire word.
    #[must_use]
    pub fn word(&self) -> u32 {
        self.pairs
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, op)| {
                acc | (u32::from(op.code()) << (i as u32 * FILTER_OP_WIDTH))
            })
    }

    /// Unpacks a wire word.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownOperator`] for codes outside the enumeration.
    pub fn from_word(word: u32) -> Result<Self> {
        let mut pairs = [CombineOp::DontCare; COMBINE_PAIRS];
        for (i, pair) in pairs.iter_mut().enumerate() {
            let code = ((word >> (i as u32 * FILTER_OP_WIDTH)) & 0xf) as u8;
            *pair = CombineOp::from_code(code).ok_or_else(|| CompileError::UnknownOperator {
                code,
                context: format!("combine pair {i}"),
            })?;
        }
        Ok(Self { pairs })
    }
}

/// The filter applied to one input relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Condition slots; unused slots hold [`Condition::PASS`].
    #[serde(default)]
    pub conditions: [Condition; CONDITION_SLOTS],
    /// Pairwise relations between the slots.
    #[serde(default)]
    pub combine: Combine,
}

impl FilterSpec {
    /// A filter that passes every row.
    #[must_use]
    pub fn pass() -> Self {
        Self::default()
    }

    /// Returns a copy with `slot` set to `condition`. Slots past 3 are ignored.
    #[must_use]
    pub fn with_condition(mut self, slot: usize, condition: Condition) -> Self {
        if let Some(c) = self.conditions.get_mut(slot) {
            *c = condition;
        }
        self
    }

    /// Returns a copy with the given combine matrix.
    #[must_use]
    pub const fn with_combine(mut self, combine: Combine) -> Self {
        self.combine = combine;
        self
    }

    /// Number of slots holding a real predicate.
    #[must_use]
    pub fn active_conditions(&self) -> usize {
        self.conditions.iter().filter(|c| !c.is_pass_through()).count()
    }
}

/// An encoded filter block, ready to be laid into the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterBlock {
    words: [u32; FILTER_BLOCK_WORDS],
}

impl FilterBlock {
    /// The block produced by [`FilterSpec::pass`].
    #[must_use]
    pub fn pass_through() -> Self {
        let mut words = [0u32; FILTER_BLOCK_WORDS];
        for slot in 0..CONDITION_SLOTS {
            words[slot * 3 + 2] = op_word(FilterOp::DontCare, FilterOp::DontCare);
        }
        words[FILTER_BLOCK_WORDS - 1] = TAIL_MARKER;
        Self { words }
    }

    /// Raw block words.
    #[must_use]
    pub const fn words(&self) -> &[u32; FILTER_BLOCK_WORDS] {
        &self.words
    }

    /// Operators of condition `slot` as `(op_low, op_high)`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= 4`.
    #[must_use]
    pub fn ops(&self, slot: usize) -> (FilterOp, FilterOp) {
        let word = self.words[slot * 3 + 2];
        // Validated on construction.
        let low = FilterOp::from_code(((word >> FILTER_OP_WIDTH) & 0xf) as u8).unwrap_or_default();
        let high = FilterOp::from_code((word & 0xf) as u8).unwrap_or_default();
        (low, high)
    }

    /// Bound words of condition `slot` as `(bound_low, bound_high)`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= 4`.
    #[must_use]
    pub fn bounds(&self, slot: usize) -> (u32, u32) {
        (self.words[slot * 3], self.words[slot * 3 + 1])
    }

    /// The combine matrix word.
    #[must_use]
    pub const fn combine_word(&self) -> u32 {
        self.words[CONDITION_SLOTS * 3]
    }

    /// Returns `true` if this block is the all-pass encoding.
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        *self == Self::pass_through()
    }

    /// Rebuilds a block from raw words, validating codes and the tail.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownOperator`] for unknown operator codes and
    /// [`CompileError::InvalidRecord`] for a malformed tail or stray operator bits.
    pub fn from_words(words: [u32; FILTER_BLOCK_WORDS]) -> Result<Self> {
        for slot in 0..CONDITION_SLOTS {
            let word = words[slot * 3 + 2];
            if word >> (2 * FILTER_OP_WIDTH) != 0 {
                return Err(CompileError::invalid_record(format!(
                    "condition {slot} operator word {word:#x} has reserved bits set"
                )));
            }
            for code in [(word >> FILTER_OP_WIDTH) & 0xf, word & 0xf] {
                FilterOp::from_code(code as u8).ok_or_else(|| CompileError::UnknownOperator {
                    code: code as u8,
                    context: format!("filter condition {slot}"),
                })?;
            }
        }
        let combine = words[CONDITION_SLOTS * 3];
        if combine >> (COMBINE_PAIRS as u32 * FILTER_OP_WIDTH) != 0 {
            return Err(CompileError::invalid_record(format!(
                "combine word {combine:#x} has reserved bits set"
            )));
        }
        Combine::from_word(combine)?;

        let zeros = &words[CONDITION_SLOTS * 3 + 1..FILTER_BLOCK_WORDS - 1];
        if words[FILTER_BLOCK_WORDS - 1] != TAIL_MARKER || zeros.iter().any(|&w| w != 0) {
            return Err(CompileError::invalid_record(
                "filter block tail is not the zero run with a valid marker",
            ));
        }
        Ok(Self { words })
    }
}

const fn op_word(op_low: FilterOp, op_high: FilterOp) -> u32 {
    ((op_low as u32) << FILTER_OP_WIDTH) | op_high as u32
}

fn check_bound(side: Side, slot: usize, kind: BoundKind, op: FilterOp, value: i64) -> Result<u32> {
    let Some((lo, hi)) = op.bound_range() else {
        return Ok(0);
    };
    if value < lo || value > hi {
        return Err(CompileError::InvalidBound {
            side,
            condition: slot,
            bound: kind,
            value,
            op: op.mnemonic(),
        });
    }
    // Two's complement for negative signed bounds.
    Ok(value as u32)
}

/// Encodes the filter for one relation.
///
/// # Errors
///
/// Returns [`CompileError::InvalidBound`] if a bound does not fit the 32-bit
/// comparison range of its operator. Bounds of don't-care operators are
/// ignored and written as zero.
pub fn encode(side: Side, spec: &FilterSpec) -> Result<FilterBlock> {
    let mut words = [0u32; FILTER_BLOCK_WORDS];
    for (slot, cond) in spec.conditions.iter().enumerate() {
        words[slot * 3] = check_bound(side, slot, BoundKind::Low, cond.op_low, cond.bound_low)?;
        words[slot * 3 + 1] =
            check_bound(side, slot, BoundKind::High, cond.op_high, cond.bound_high)?;
        words[slot * 3 + 2] = op_word(cond.op_low, cond.op_high);
    }
    words[CONDITION_SLOTS * 3] = spec.combine.word();
    words[FILTER_BLOCK_WORDS - 1] = TAIL_MARKER;

    debug!(
        side = %side,
        active = spec.active_conditions(),
        combine = format_args!("{:#x}", spec.combine.word()),
        "encoded filter block"
    );
    Ok(FilterBlock { words })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date_range() -> FilterSpec {
        // 19940101 <= col < 19950101 in slot 2
        FilterSpec::pass().with_condition(
            2,
            Condition::range(FilterOp::Geu, 19_940_101, FilterOp::Ltu, 19_950_101),
        )
    }

    #[test]
    fn pass_filter_is_zero_with_tail_marker() {
        let block = encode(Side::Left, &FilterSpec::pass()).unwrap();
        let words = block.words();
        assert_eq!(words.len(), 45);
        assert!(words[..44].iter().all(|&w| w == 0));
        assert_eq!(words[44], 0x8000_0000);
        assert!(block.is_pass_through());
        assert_eq!(block, FilterBlock::pass_through());
    }

    #[test]
    fn range_condition_layout() {
        let block = encode(Side::Right, &date_range()).unwrap();
        let w = block.words();
        assert_eq!(w[6], 19_940_101);
        assert_eq!(w[7], 19_950_101);
        assert_eq!(w[8], (9 << 4) | 8);
        assert_eq!(block.ops(2), (FilterOp::Geu, FilterOp::Ltu));
        assert_eq!(block.bounds(2), (19_940_101, 19_950_101));
        assert_eq!(block.ops(0), (FilterOp::DontCare, FilterOp::DontCare));
        assert!(!block.is_pass_through());
    }

    #[test]
    fn dont_care_bounds_are_zero_filled() {
        let spec = FilterSpec::pass().with_condition(
            1,
            Condition::range(FilterOp::DontCare, 77, FilterOp::DontCare, -5),
        );
        let block = encode(Side::Left, &spec).unwrap();
        assert!(block.is_pass_through());
    }

    #[test]
    fn half_open_condition_zeroes_unused_bound() {
        let spec = FilterSpec::pass()
            .with_condition(0, Condition::range(FilterOp::Gt, -10, FilterOp::DontCare, 99));
        let block = encode(Side::Left, &spec).unwrap();
        assert_eq!(block.bounds(0), (-10i32 as u32, 0));
    }

    #[test]
    fn combine_word_order() {
        let combine = Combine::all(CombineOp::DontCare)
            .with_pair(1, 0, CombineOp::And)
            .with_pair(2, 3, CombineOp::Or);
        assert_eq!(combine.word(), 0x1 | (0x2 << 20));
        assert_eq!(Combine::from_word(combine.word()).unwrap(), combine);
    }

    #[test]
    fn all_and_block() {
        let spec = date_range()
            .with_condition(0, Condition::range(FilterOp::Ge, 1, FilterOp::DontCare, 0))
            .with_combine(Combine::all(CombineOp::And));
        let block = encode(Side::Left, &spec).unwrap();
        assert_eq!(block.combine_word(), 0x0011_1111);
        assert_eq!(FilterBlock::from_words(*block.words()).unwrap(), block);
        assert!(!block.is_pass_through());

        // Pass-through stays all zero in the combine word.
        assert_eq!(FilterBlock::pass_through().combine_word(), 0);
        assert_eq!(Combine::default(), Combine::all(CombineOp::DontCare));
    }

    #[test]
    fn unknown_combine_code() {
        let mut words = *FilterBlock::pass_through().words();
        words[CONDITION_SLOTS * 3] = 0x7 << 8;
        assert!(matches!(
            FilterBlock::from_words(words),
            Err(CompileError::UnknownOperator { code: 7, .. })
        ));
        assert_eq!(CombineOp::try_from(6).unwrap(), CombineOp::Xnor);
        assert!(CombineOp::try_from(7).is_err());
    }

    #[test]
    fn combine_ignores_bad_pairs() {
        let combine = Combine::default()
            .with_pair(2, 2, CombineOp::And)
            .with_pair(0, 9, CombineOp::Or);
        assert_eq!(combine, Combine::default());
    }

    #[test]
    fn unsigned_bound_rejects_negative() {
        let spec = FilterSpec::pass()
            .with_condition(3, Condition::range(FilterOp::Geu, -1, FilterOp::DontCare, 0));
        let err = encode(Side::Right, &spec).unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidBound {
                side: Side::Right,
                condition: 3,
                bound: BoundKind::Low,
                value: -1,
                op: "GEU",
            }
        );
    }

    #[test]
    fn signed_bound_rejects_u32_range() {
        let spec = FilterSpec::pass().with_condition(
            0,
            Condition::range(FilterOp::DontCare, 0, FilterOp::Lt, i64::from(u32::MAX)),
        );
        assert!(matches!(
            encode(Side::Left, &spec),
            Err(CompileError::InvalidBound {
                bound: BoundKind::High,
                ..
            })
        ));
    }

    #[test]
    fn equality_accepts_both_ranges() {
        let spec = FilterSpec::pass()
            .with_condition(0, Condition::range(FilterOp::Eq, -7, FilterOp::Ne, i64::from(u32::MAX)));
        let block = encode(Side::Left, &spec).unwrap();
        assert_eq!(block.bounds(0), (0xffff_fff9, 0xffff_ffff));
    }

    #[test]
    fn unknown_operator_code() {
        let err = Condition::from_codes(11, 0, 0, 0).unwrap_err();
        assert!(matches!(err, CompileError::UnknownOperator { code: 11, .. }));
        assert!(Condition::from_codes(9, 1, 8, 2).is_ok());
    }

    #[test]
    fn from_words_round_trip_and_validation() {
        let block = encode(Side::Right, &date_range()).unwrap();
        assert_eq!(FilterBlock::from_words(*block.words()).unwrap(), block);

        let mut bad = *block.words();
        bad[44] = 0;
        assert!(matches!(
            FilterBlock::from_words(bad),
            Err(CompileError::InvalidRecord { .. })
        ));

        let mut bad = *block.words();
        bad[2] = 0xf;
        assert!(matches!(
            FilterBlock::from_words(bad),
            Err(CompileError::UnknownOperator { code: 15, .. })
        ));
    }

    #[test]
    fn filter_from_json() {
        let spec: FilterSpec = serde_json::from_str(
            r#"{"conditions":[{},{},{"op_low":"geu","bound_low":19940101,"op_high":"ltu","bound_high":19950101},{}]}"#,
        )
        .unwrap();
        assert_eq!(spec, date_range());
    }
}
