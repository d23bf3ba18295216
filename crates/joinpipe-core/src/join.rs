//! Join stage descriptor: control flags, column maps, output mask and the
//! assembly of every sub-encoding into a [`CompiledConfig`].
//!
//! A stage is described by a [`JoinSpec`] (which columns are keys and which
//! are carried as payload), one [`FilterSpec`] per relation, up to two
//! [`ExpressionSpec`]s and five shuffle tables. [`JoinDescriptorBuilder`]
//! validates all of it and produces an immutable [`CompiledConfig`].
//!
//! # Output slots
//!
//! The engine writes at most five columns per joined row:
//!
//! ```text
//! slot 0..3  right payload columns, in payload order (widest first)
//! slot 3     first left payload column
//! slot 4     evaluated or aggregated result
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CompileError, Result, Side};
use crate::expr::{AluStage, AluWord, ExpressionCompiler, ExpressionSpec};
use crate::filter::{self, FilterBlock, FilterSpec};
use crate::options::CompileOptions;
use crate::shuffle::{ShuffleStage, ShuffleTable};

/// Slots in each column map.
pub const COLUMN_MAP_SLOTS: usize = 8;

/// Output slots the engine can write.
pub const OUTPUT_SLOTS: u8 = 5;

/// Output slots fed by right payload columns.
pub const RIGHT_OUTPUT_SLOTS: usize = 3;

/// Output slot fed by the first left payload column.
pub const LEFT_OUTPUT_SLOT: u8 = 3;

/// Output slot fed by the evaluation or aggregation stage.
pub const RESULT_OUTPUT_SLOT: u8 = 4;

/// Default hash table size hint.
pub const DEFAULT_HASH_SIZE: u32 = 32;

const UNUSED_BYTE: i8 = -1;
const DUPLICATE_KEY_BYTE: i8 = -2;

/// How matched rows are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    /// Emit every matching pair.
    #[default]
    Inner,
    /// Emit left rows that have a match.
    Semi,
    /// Emit left rows without a match.
    Anti,
}

impl JoinMode {
    /// Wire code of the mode field.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Inner => 0,
            Self::Semi => 1,
            Self::Anti => 2,
        }
    }

    /// Decodes the mode field.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownOperator`] for codes above 2.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Inner),
            1 => Ok(Self::Semi),
            2 => Ok(Self::Anti),
            _ => Err(CompileError::UnknownOperator {
                code,
                context: "join mode".to_string(),
            }),
        }
    }

    /// Returns `true` if right payload columns are discarded.
    #[must_use]
    pub const fn drops_right_payload(self) -> bool {
        matches!(self, Self::Semi | Self::Anti)
    }
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "inner"),
            Self::Semi => write!(f, "semi"),
            Self::Anti => write!(f, "anti"),
        }
    }
}

/// One column map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRef {
    /// Read this column of the relation.
    Used(u8),
    /// Leave the slot empty.
    #[default]
    Unused,
    /// Copy the join key into this payload slot.
    DuplicateKey,
}

impl From<u8> for ColumnRef {
    fn from(column: u8) -> Self {
        Self::Used(column)
    }
}

impl ColumnRef {
    /// Encodes the entry as a column map byte.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Used(c) => c,
            Self::Unused => UNUSED_BYTE as u8,
            Self::DuplicateKey => DUPLICATE_KEY_BYTE as u8,
        }
    }

    /// Decodes a column map byte.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidRecord`] for negative bytes other than
    /// the two sentinels.
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte as i8 {
            UNUSED_BYTE => Ok(Self::Unused),
            DUPLICATE_KEY_BYTE => Ok(Self::DuplicateKey),
            b if b >= 0 => Ok(Self::Used(byte)),
            b => Err(CompileError::invalid_record(format!(
                "column map byte {b} is neither a column nor a sentinel"
            ))),
        }
    }

    /// Returns the column index for [`Used`](Self::Used).
    #[must_use]
    pub const fn column(self) -> Option<u8> {
        match self {
            Self::Used(c) => Some(c),
            _ => None,
        }
    }

    /// Returns `true` unless the slot is [`Unused`](Self::Unused).
    #[must_use]
    pub const fn is_materialized(self) -> bool {
        !matches!(self, Self::Unused)
    }
}

/// The eight column selections of one relation: key columns first, then
/// payload columns, then unused slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnMap {
    slots: [ColumnRef; COLUMN_MAP_SLOTS],
}

impl ColumnMap {
    fn from_parts(keys: &[u8], payload: &[ColumnRef]) -> Self {
        let mut slots = [ColumnRef::Unused; COLUMN_MAP_SLOTS];
        let entries = keys.iter().map(|&k| ColumnRef::Used(k)).chain(payload.iter().copied());
        for (slot, entry) in slots.iter_mut().zip(entries) {
            *slot = entry;
        }
        Self { slots }
    }

    /// All slots.
    #[must_use]
    pub const fn slots(&self) -> &[ColumnRef; COLUMN_MAP_SLOTS] {
        &self.slots
    }

    /// Encodes the map as eight signed bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; COLUMN_MAP_SLOTS] {
        self.slots.map(ColumnRef::to_byte)
    }

    /// Decodes eight column map bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidRecord`] for undefined negative bytes.
    pub fn from_bytes(bytes: [u8; COLUMN_MAP_SLOTS]) -> Result<Self> {
        let mut slots = [ColumnRef::Unused; COLUMN_MAP_SLOTS];
        for (slot, byte) in slots.iter_mut().zip(bytes) {
            *slot = ColumnRef::from_byte(byte)?;
        }
        Ok(Self { slots })
    }
}

/// Computes the output write mask.
///
/// Right payload entry `i` feeds slot `i` for `i < 3`, the first left
/// payload entry feeds slot 3 and the evaluated or aggregated result slot 4.
/// A slot is written only when the entry feeding it is materialized, so
/// [`ColumnRef::Unused`] holes leave their bit clear.
#[must_use]
pub fn write_mask(
    payload_left: &[ColumnRef],
    payload_right: &[ColumnRef],
    expr_present: bool,
    aggregate: bool,
) -> u8 {
    let mut mask = payload_right
        .iter()
        .take(RIGHT_OUTPUT_SLOTS)
        .enumerate()
        .filter(|(_, c)| c.is_materialized())
        .fold(0u8, |acc, (i, _)| acc | (1 << i));
    if payload_left.first().is_some_and(|c| c.is_materialized()) {
        mask |= 1 << LEFT_OUTPUT_SLOT;
    }
    if expr_present || aggregate {
        mask |= 1 << RESULT_OUTPUT_SLOT;
    }
    mask
}

/// Which columns of the two relations are joined and carried forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Left key columns, one or two.
    pub key_columns_left: Vec<u8>,
    /// Right key columns, the same count as on the left.
    pub key_columns_right: Vec<u8>,
    /// Left payload columns.
    #[serde(default)]
    pub payload_columns_left: Vec<ColumnRef>,
    /// Right payload columns. Holes are [`ColumnRef::Unused`].
    #[serde(default)]
    pub payload_columns_right: Vec<ColumnRef>,
    /// Join mode.
    #[serde(default)]
    pub mode: JoinMode,
    /// Route matched rows through the aggregation stage.
    #[serde(default)]
    pub aggregate: bool,
    /// Hash table size hint, in engine units.
    #[serde(default = "default_hash_size")]
    pub hash_table_size_hint: u32,
    /// When `false` the left relation bypasses the join.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Output slots to clear from the computed write mask, for payloads that
    /// only feed filters or the ALU.
    #[serde(default)]
    pub suppressed_outputs: BTreeSet<u8>,
}

const fn default_hash_size() -> u32 {
    DEFAULT_HASH_SIZE
}

const fn default_enabled() -> bool {
    true
}

impl JoinSpec {
    /// Creates an inner join on the given key columns with no payload.
    #[must_use]
    pub fn new(key_columns_left: &[u8], key_columns_right: &[u8]) -> Self {
        Self {
            key_columns_left: key_columns_left.to_vec(),
            key_columns_right: key_columns_right.to_vec(),
            payload_columns_left: Vec::new(),
            payload_columns_right: Vec::new(),
            mode: JoinMode::Inner,
            aggregate: false,
            hash_table_size_hint: DEFAULT_HASH_SIZE,
            enabled: true,
            suppressed_outputs: BTreeSet::new(),
        }
    }

    /// Sets the join mode.
    #[must_use]
    pub fn with_mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the left payload columns.
    #[must_use]
    pub fn with_left_payload<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ColumnRef>,
    {
        self.payload_columns_left = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the right payload columns.
    #[must_use]
    pub fn with_right_payload<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ColumnRef>,
    {
        self.payload_columns_right = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables the aggregation stage.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Sets the hash table size hint.
    #[must_use]
    pub fn with_hash_size_hint(mut self, hint: u32) -> Self {
        self.hash_table_size_hint = hint;
        self
    }

    /// Clears the given output slots from the write mask.
    #[must_use]
    pub fn with_suppressed_outputs(mut self, slots: impl IntoIterator<Item = u8>) -> Self {
        self.suppressed_outputs = slots.into_iter().collect();
        self
    }

    /// Turns the join off; the left relation passes through.
    #[must_use]
    pub fn bypassed(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns `true` for a two-column key.
    #[must_use]
    pub fn is_dual_key(&self) -> bool {
        self.key_columns_left.len() == 2
    }

    /// Checks every structural invariant of the join description.
    ///
    /// # Errors
    ///
    /// In order of precedence:
    /// - [`CompileError::InvalidModePayload`] for right payload under semi/anti.
    /// - [`CompileError::InvalidKeyCount`] for key lists that are not 1 or 2
    ///   columns on both sides.
    /// - [`CompileError::ColumnOutOfRange`] for columns `>= scan_columns`.
    /// - [`CompileError::PayloadOverflow`] if keys and payload exceed 8 slots.
    /// - [`CompileError::InvalidOutputSlot`] for suppressed slots `>= 5`.
    pub fn validate(&self, scan_columns: u8) -> Result<()> {
        if self.mode.drops_right_payload() && !self.payload_columns_right.is_empty() {
            return Err(CompileError::InvalidModePayload {
                mode: self.mode,
                count: self.payload_columns_right.len(),
            });
        }

        let (left, right) = (self.key_columns_left.len(), self.key_columns_right.len());
        if left != right || !(1..=2).contains(&left) {
            return Err(CompileError::InvalidKeyCount { left, right });
        }

        for (side, keys, payload) in [
            (Side::Left, &self.key_columns_left, &self.payload_columns_left),
            (Side::Right, &self.key_columns_right, &self.payload_columns_right),
        ] {
            let columns = keys
                .iter()
                .copied()
                .chain(payload.iter().filter_map(|c| c.column()));
            for column in columns {
                if column >= scan_columns {
                    return Err(CompileError::ColumnOutOfRange {
                        side,
                        column,
                        limit: scan_columns,
                    });
                }
            }
            let limit = COLUMN_MAP_SLOTS - keys.len();
            if payload.len() > limit {
                return Err(CompileError::PayloadOverflow {
                    side,
                    count: payload.len(),
                    limit,
                });
            }
        }

        if let Some(&slot) = self.suppressed_outputs.iter().find(|&&s| s >= OUTPUT_SLOTS) {
            return Err(CompileError::InvalidOutputSlot { slot });
        }
        Ok(())
    }

    /// Write mask of this join, given whether an expression is evaluated.
    #[must_use]
    pub fn write_mask(&self, expr_present: bool) -> u8 {
        let suppressed = self
            .suppressed_outputs
            .iter()
            .filter(|&&s| s < OUTPUT_SLOTS)
            .fold(0u8, |acc, &s| acc | (1 << s));
        write_mask(
            &self.payload_columns_left,
            &self.payload_columns_right,
            expr_present,
            self.aggregate,
        ) & !suppressed
    }
}

/// Control segment of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    /// The join unit is active.
    pub join_enabled: bool,
    /// The aggregation stage is active.
    pub aggregate: bool,
    /// The key is two columns wide.
    pub dual_key: bool,
    /// Join mode.
    pub mode: JoinMode,
    /// Hash table size hint.
    pub hash_size: u32,
}

/// A fully resolved, engine-ready stage configuration.
///
/// Only constructed by [`JoinDescriptorBuilder`] and
/// [`deserialize`](crate::serializer::deserialize), so every value is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledConfig {
    pub(crate) control: Control,
    pub(crate) column_maps: [ColumnMap; 2],
    pub(crate) write_mask: u8,
    pub(crate) alu: [AluWord; 2],
    pub(crate) filters: [FilterBlock; 2],
    pub(crate) shuffles: [ShuffleTable; 5],
}

impl CompiledConfig {
    /// Control flags.
    #[must_use]
    pub const fn control(&self) -> &Control {
        &self.control
    }

    /// Column map of `side`.
    #[must_use]
    pub const fn column_map(&self, side: Side) -> &ColumnMap {
        match side {
            Side::Left => &self.column_maps[0],
            Side::Right => &self.column_maps[1],
        }
    }

    /// Output write mask.
    #[must_use]
    pub const fn write_mask(&self) -> u8 {
        self.write_mask
    }

    /// ALU word of `stage`.
    #[must_use]
    pub const fn alu(&self, stage: AluStage) -> &AluWord {
        &self.alu[stage.index()]
    }

    /// Filter block of `side`.
    #[must_use]
    pub const fn filter(&self, side: Side) -> &FilterBlock {
        match side {
            Side::Left => &self.filters[0],
            Side::Right => &self.filters[1],
        }
    }

    /// Shuffle table of `stage`.
    #[must_use]
    pub const fn shuffle(&self, stage: ShuffleStage) -> &ShuffleTable {
        &self.shuffles[stage.index()]
    }
}

/// Everything needed to compile one join stage.
///
/// Every slot has a documented no-op default: pass-through filters, no
/// expression and each stage's neutral shuffle table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStage {
    /// Key and payload selection.
    pub join: JoinSpec,
    /// Filter of the left relation.
    #[serde(default)]
    pub filter_left: FilterSpec,
    /// Filter of the right relation.
    #[serde(default)]
    pub filter_right: FilterSpec,
    /// Expression evaluated by ALU stage 1.
    #[serde(default)]
    pub expr: Option<ExpressionSpec>,
    /// Expression evaluated by ALU stage 2.
    #[serde(default)]
    pub secondary_expr: Option<ExpressionSpec>,
    /// Shuffle tables in record order `1a, 1b, 2, 3, 4`.
    #[serde(default = "default_shuffles")]
    pub shuffles: [ShuffleTable; 5],
}

fn default_shuffles() -> [ShuffleTable; 5] {
    ShuffleStage::ALL.map(ShuffleStage::default_table)
}

impl JoinStage {
    /// Creates a stage with every optional slot at its no-op default.
    #[must_use]
    pub fn new(join: JoinSpec) -> Self {
        Self {
            join,
            filter_left: FilterSpec::pass(),
            filter_right: FilterSpec::pass(),
            expr: None,
            secondary_expr: None,
            shuffles: default_shuffles(),
        }
    }

    /// Sets the filter of `side`.
    #[must_use]
    pub fn with_filter(mut self, side: Side, filter: FilterSpec) -> Self {
        match side {
            Side::Left => self.filter_left = filter,
            Side::Right => self.filter_right = filter,
        }
        self
    }

    /// Sets the ALU stage 1 expression.
    #[must_use]
    pub fn with_expression(mut self, expr: ExpressionSpec) -> Self {
        self.expr = Some(expr);
        self
    }

    /// Sets the ALU stage 2 expression.
    #[must_use]
    pub fn with_secondary_expression(mut self, expr: ExpressionSpec) -> Self {
        self.secondary_expr = Some(expr);
        self
    }

    /// Replaces the shuffle table of `stage`.
    #[must_use]
    pub fn with_shuffle(mut self, stage: ShuffleStage, table: ShuffleTable) -> Self {
        self.shuffles[stage.index()] = table;
        self
    }

    /// Parses a stage from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidOptions`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CompileError::invalid_options(e.to_string()))
    }
}

/// Assembles [`CompiledConfig`]s.
#[derive(Debug, Clone, Default)]
pub struct JoinDescriptorBuilder {
    options: CompileOptions,
}

impl JoinDescriptorBuilder {
    /// Creates a builder with the given options.
    #[must_use]
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// The builder's options.
    #[must_use]
    pub const fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Builds a configuration with a single ALU expression.
    ///
    /// # Errors
    ///
    /// See [`compile`](Self::compile).
    pub fn build(
        &self,
        join: &JoinSpec,
        filters: (&FilterSpec, &FilterSpec),
        expr: Option<&ExpressionSpec>,
        shuffles: [ShuffleTable; 5],
    ) -> Result<CompiledConfig> {
        self.assemble(join, [filters.0, filters.1], [expr, None], shuffles)
    }

    /// Compiles a full stage description.
    ///
    /// # Errors
    ///
    /// Any validation error of the join spec, filters, expressions or
    /// shuffle tables; see [`CompileError`]. No partial configuration is
    /// ever returned.
    pub fn compile(&self, stage: &JoinStage) -> Result<CompiledConfig> {
        self.assemble(
            &stage.join,
            [&stage.filter_left, &stage.filter_right],
            [stage.expr.as_ref(), stage.secondary_expr.as_ref()],
            stage.shuffles,
        )
    }

    fn assemble(
        &self,
        join: &JoinSpec,
        filters: [&FilterSpec; 2],
        exprs: [Option<&ExpressionSpec>; 2],
        shuffles: [ShuffleTable; 5],
    ) -> Result<CompiledConfig> {
        self.options.validate()?;
        join.validate(self.options.scan_columns)?;
        for (stage, table) in ShuffleStage::ALL.iter().zip(&shuffles) {
            table.validate_for(*stage)?;
        }

        let filters = [
            filter::encode(Side::Left, filters[0])?,
            filter::encode(Side::Right, filters[1])?,
        ];

        let compiler = ExpressionCompiler::new(&self.options);
        let mut alu = [AluWord::PASS_THROUGH; 2];
        for (word, expr) in alu.iter_mut().zip(exprs) {
            if let Some(spec) = expr {
                *word = compiler.compile_spec(spec)?;
            }
        }

        if !join.enabled
            && (!join.payload_columns_right.is_empty() || !filters[1].is_pass_through())
        {
            warn!("join bypassed, the right relation layout is ignored by the engine");
        }

        let control = Control {
            join_enabled: join.enabled,
            aggregate: join.aggregate,
            dual_key: join.is_dual_key(),
            mode: join.mode,
            hash_size: join.hash_table_size_hint,
        };
        let column_maps = [
            ColumnMap::from_parts(&join.key_columns_left, &join.payload_columns_left),
            ColumnMap::from_parts(&join.key_columns_right, &join.payload_columns_right),
        ];
        let write_mask = join.write_mask(exprs[0].is_some());

        debug!(
            mode = %join.mode,
            enabled = join.enabled,
            dual_key = control.dual_key,
            aggregate = join.aggregate,
            write_mask = format_args!("{write_mask:#07b}"),
            alu1 = alu[0].opcode(),
            alu2 = alu[1].opcode(),
            "built join stage descriptor"
        );

        Ok(CompiledConfig {
            control,
            column_maps,
            write_mask,
            alu,
            filters,
            shuffles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mask_formula() {
        let used = |n: u8| (0..n).map(ColumnRef::Used).collect::<Vec<_>>();
        assert_eq!(write_mask(&[], &[], false, false), 0);
        assert_eq!(write_mask(&used(1), &used(1), false, false), 0b01001);
        assert_eq!(write_mask(&used(1), &used(3), true, false), 0b11111);
        assert_eq!(write_mask(&[], &used(7), false, true), 0b10111);
        assert_eq!(write_mask(&used(2), &[], false, false), 0b01000);
        assert_eq!(write_mask(&[ColumnRef::DuplicateKey], &[], false, false), 0b01000);
    }

    #[test]
    fn unused_holes_are_not_written() {
        let holes = [ColumnRef::Unused, ColumnRef::Unused, ColumnRef::Used(4)];
        assert_eq!(write_mask(&[], &holes, false, false), 0b00100);
        assert_eq!(write_mask(&[], &[ColumnRef::Unused; 3], false, false), 0);
        assert_eq!(
            write_mask(&[ColumnRef::Unused, ColumnRef::Used(2)], &[], false, false),
            0
        );

        // supplier JOIN out1: right map {2, 3, -1, -1, 4}, mask 8 + 4
        let join = JoinSpec::new(&[0, 1], &[2, 3])
            .with_left_payload([1u8])
            .with_right_payload(holes);
        assert_eq!(join.write_mask(false), 0b01100);
    }

    #[test]
    fn suppression_only_clears() {
        let join = JoinSpec::new(&[0], &[0])
            .with_left_payload([3u8])
            .with_right_payload([1u8, 2, 3])
            .with_suppressed_outputs([0, 1]);
        assert_eq!(join.write_mask(true), 16 + 8 + 4);
        // Suppressing a slot the formula leaves empty changes nothing.
        let join = join.with_suppressed_outputs([4]);
        assert_eq!(join.write_mask(false), 0b01111);
        let holes = JoinSpec::new(&[0], &[0])
            .with_right_payload([ColumnRef::Unused, 2.into()])
            .with_suppressed_outputs([0]);
        assert_eq!(holes.write_mask(false), 0b00010);
    }

    #[test]
    fn column_map_layout() {
        let map = ColumnMap::from_parts(&[2, 3], &[ColumnRef::Unused, ColumnRef::Unused, 4.into()]);
        assert_eq!(map.to_bytes(), [2, 3, 0xff, 0xff, 4, 0xff, 0xff, 0xff]);
        assert_eq!(ColumnMap::from_bytes(map.to_bytes()).unwrap(), map);

        let dup = ColumnMap::from_parts(&[0], &[ColumnRef::DuplicateKey]);
        assert_eq!(dup.to_bytes()[1], 0xfe);
        assert!(ColumnMap::from_bytes([0, 0xfd, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn mode_payload_invariant() {
        for mode in [JoinMode::Semi, JoinMode::Anti] {
            let join = JoinSpec::new(&[0], &[0]).with_mode(mode).with_right_payload([1u8]);
            assert_eq!(
                join.validate(8).unwrap_err(),
                CompileError::InvalidModePayload { mode, count: 1 }
            );
        }
        let semi = JoinSpec::new(&[0], &[0]).with_mode(JoinMode::Semi).with_left_payload([1u8]);
        assert!(semi.validate(8).is_ok());
    }

    #[test]
    fn key_count_validation() {
        assert!(matches!(
            JoinSpec::new(&[0, 1], &[0]).validate(8),
            Err(CompileError::InvalidKeyCount { left: 2, right: 1 })
        ));
        assert!(JoinSpec::new(&[], &[]).validate(8).is_err());
        assert!(JoinSpec::new(&[0, 1, 2], &[0, 1, 2]).validate(8).is_err());
        assert!(JoinSpec::new(&[0, 1], &[2, 3]).is_dual_key());
    }

    #[test]
    fn column_and_payload_limits() {
        let join = JoinSpec::new(&[0], &[8]);
        assert_eq!(
            join.validate(8).unwrap_err(),
            CompileError::ColumnOutOfRange {
                side: Side::Right,
                column: 8,
                limit: 8,
            }
        );
        assert!(JoinSpec::new(&[0], &[0]).with_left_payload([5u8]).validate(4).is_err());

        let join = JoinSpec::new(&[0, 1], &[0, 1]).with_left_payload([ColumnRef::Unused; 7]);
        assert_eq!(
            join.validate(8).unwrap_err(),
            CompileError::PayloadOverflow {
                side: Side::Left,
                count: 7,
                limit: 6,
            }
        );

        let join = JoinSpec::new(&[0], &[0]).with_suppressed_outputs([5]);
        assert_eq!(join.validate(8).unwrap_err(), CompileError::InvalidOutputSlot { slot: 5 });
    }

    #[test]
    fn build_uses_stage_defaults() {
        let join = JoinSpec::new(&[0], &[0]).with_left_payload([1u8]).with_right_payload([1u8]);
        let cfg = JoinDescriptorBuilder::default()
            .compile(&JoinStage::new(join))
            .unwrap();
        assert!(cfg.control().join_enabled);
        assert!(!cfg.control().dual_key);
        assert_eq!(cfg.write_mask(), 9);
        assert!(cfg.alu(AluStage::First).is_pass_through());
        assert!(cfg.alu(AluStage::Second).is_pass_through());
        assert!(cfg.filter(Side::Left).is_pass_through());
        assert_eq!(
            cfg.shuffle(ShuffleStage::Stage2).slots(),
            [0, 1, 2, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn build_contract_with_explicit_shuffles() {
        let join = JoinSpec::new(&[0], &[0]).with_right_payload([1u8]);
        let pass = FilterSpec::pass();
        let cfg = JoinDescriptorBuilder::default()
            .build(
                &join,
                (&pass, &pass),
                Some(&ExpressionSpec::new("strm1*(-strm2+c2)").with_const(2, 100)),
                [ShuffleTable::IDENTITY; 5],
            )
            .unwrap();
        assert_eq!(cfg.alu(AluStage::First).opcode(), 11);
        assert_eq!(cfg.write_mask(), 0b10001);
        assert!(cfg.shuffle(ShuffleStage::Stage2).is_identity());
    }

    #[test]
    fn build_rejects_wide_scan_shuffle() {
        let stage = JoinStage::new(JoinSpec::new(&[0], &[0])).with_shuffle(
            ShuffleStage::Stage1a,
            ShuffleTable::from_slots(ShuffleStage::Stage2, [9, 1, 2, 3, 4, 5, 6, 7]).unwrap(),
        );
        assert!(matches!(
            JoinDescriptorBuilder::default().compile(&stage),
            Err(CompileError::InvalidShuffleIndex {
                stage: Some(ShuffleStage::Stage1a),
                ..
            })
        ));
    }

    #[test]
    fn secondary_expression_lands_in_second_word() {
        let stage = JoinStage::new(JoinSpec::new(&[0], &[0]))
            .with_secondary_expression(ExpressionSpec::new("strm1+strm2"));
        let cfg = JoinDescriptorBuilder::default().compile(&stage).unwrap();
        assert!(cfg.alu(AluStage::First).is_pass_through());
        assert_eq!(cfg.alu(AluStage::Second).opcode(), 2);
        // Only the first stage feeds the result slot.
        assert_eq!(cfg.write_mask(), 0);
        let opcodes: Vec<u8> = AluStage::ALL.iter().map(|&s| cfg.alu(s).opcode()).collect();
        assert_eq!(opcodes, [0, 2]);
        assert_eq!(AluStage::Second.to_string(), "alu2");
    }

    #[test]
    fn bypassed_join_clears_enable() {
        let stage = JoinStage::new(JoinSpec::new(&[0], &[0]).with_left_payload([1u8]).bypassed());
        let cfg = JoinDescriptorBuilder::default().compile(&stage).unwrap();
        assert!(!cfg.control().join_enabled);
    }

    #[test]
    fn stage_from_json() {
        let stage = JoinStage::from_json(
            r#"{
                "join": {
                    "key_columns_left": [0],
                    "key_columns_right": [0],
                    "payload_columns_left": [{"used": 3}],
                    "payload_columns_right": [{"used": 1}, "unused", "duplicate_key"],
                    "mode": "inner"
                },
                "expr": {"expr": "strm1*(-strm2+c2)", "consts": {"c2": 100}}
            }"#,
        )
        .unwrap();
        assert_eq!(stage.join.hash_table_size_hint, DEFAULT_HASH_SIZE);
        assert!(stage.join.enabled);
        assert_eq!(stage.join.payload_columns_right[2], ColumnRef::DuplicateKey);
        assert_eq!(stage.shuffles, default_shuffles());
        assert!(stage.filter_right.combine.pairs.iter().all(|op| op.code() == 0));
    }
}
