//! Byte-level (de)serialization of [`CompiledConfig`].
//!
//! [`serialize`] is total: every field of a compiled configuration has a
//! fixed position (see [`crate::layout`]) and everything else is zero.
//! [`deserialize`] is its exact inverse and rejects records that no valid
//! configuration serializes to.

use bytes::Bytes;
use tracing::trace;

use crate::error::{CompileError, Result, Side};
use crate::expr::{AluStage, AluWord};
use crate::filter::{FilterBlock, FILTER_BLOCK_WORDS};
use crate::join::{ColumnMap, CompiledConfig, Control, JoinMode, COLUMN_MAP_SLOTS, OUTPUT_SLOTS};
use crate::layout::{
    self, Field, AGGR_ON, ALU1_WORD, ALU2_WORD, COLUMN_MAP_LEFT, COLUMN_MAP_RIGHT, DUAL_KEY_ON,
    FILTER_LEFT_WORD, FILTER_RIGHT_WORD, FILTER_WORDS, HASH_SIZE, JOIN_MODE, JOIN_ON,
    RECORD_SIZE, SHUFFLE_BASE, WORD_BYTES, WRITE_MASK,
};
use crate::shuffle::{ShuffleStage, ShuffleTable, SHUFFLE_SLOTS};

/// Control word bits that carry no field.
const CONTROL_GAPS: [Field; 2] = [Field::new(6, 2), Field::new(40, 16)];

const FILTER_SEGMENT_BYTES: usize = FILTER_WORDS * WORD_BYTES;
const FILTER_BLOCK_BYTES: usize = FILTER_BLOCK_WORDS * 4;

fn shuffle_field(stage: ShuffleStage, slot: usize) -> Field {
    SHUFFLE_BASE.element(stage.index() * SHUFFLE_SLOTS + slot)
}

fn column_map_field(side: Side) -> Field {
    match side {
        Side::Left => COLUMN_MAP_LEFT,
        Side::Right => COLUMN_MAP_RIGHT,
    }
}

fn filter_word(side: Side) -> usize {
    match side {
        Side::Left => FILTER_LEFT_WORD,
        Side::Right => FILTER_RIGHT_WORD,
    }
}

/// Lays `cfg` out into its fixed record.
#[must_use]
pub fn serialize(cfg: &CompiledConfig) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];

    let control = cfg.control();
    layout::put(&mut buf, JOIN_ON, u64::from(control.join_enabled));
    layout::put(&mut buf, AGGR_ON, u64::from(control.aggregate));
    layout::put(&mut buf, DUAL_KEY_ON, u64::from(control.dual_key));
    layout::put(&mut buf, JOIN_MODE, u64::from(control.mode.code()));
    layout::put(&mut buf, HASH_SIZE, u64::from(control.hash_size));

    for side in [Side::Left, Side::Right] {
        let base = column_map_field(side);
        for (i, byte) in cfg.column_map(side).to_bytes().into_iter().enumerate() {
            layout::put(&mut buf, base.element(i), u64::from(byte));
        }
    }
    layout::put(&mut buf, WRITE_MASK, u64::from(cfg.write_mask()));

    for stage in ShuffleStage::ALL {
        for (slot, source) in cfg.shuffle(stage).slots().into_iter().enumerate() {
            layout::put(&mut buf, shuffle_field(stage, slot), u64::from(source));
        }
    }

    for (stage, word) in [(AluStage::First, ALU1_WORD), (AluStage::Second, ALU2_WORD)] {
        buf[layout::word_range(word)].copy_from_slice(&cfg.alu(stage).to_le_bytes());
    }

    for side in [Side::Left, Side::Right] {
        let start = layout::word_range(filter_word(side)).start;
        let words = cfg.filter(side).words();
        for (i, word) in words.iter().enumerate() {
            let at = start + i * 4;
            buf[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    trace!(
        write_mask = cfg.write_mask(),
        mode = %control.mode,
        "serialized join stage record"
    );
    buf
}

/// Decodes a record produced by [`serialize`].
///
/// # Errors
///
/// - [`CompileError::InvalidRecord`] for a wrong length, reserved bits,
///   undefined column map bytes or a malformed filter tail.
/// - [`CompileError::UnknownOperator`] for undefined join mode or filter
///   operator codes.
/// - [`CompileError::InvalidShuffleIndex`] for a shuffle source outside
///   its stage's width.
#[allow(clippy::cast_possible_truncation)]
pub fn deserialize(bytes: &[u8]) -> Result<CompiledConfig> {
    if bytes.len() != RECORD_SIZE {
        return Err(CompileError::invalid_record(format!(
            "record is {} bytes, expected {RECORD_SIZE}",
            bytes.len()
        )));
    }
    if CONTROL_GAPS.iter().any(|&gap| layout::get(bytes, gap) != 0) {
        return Err(CompileError::invalid_record("control word has reserved bits set"));
    }

    // Field widths bound every cast below.
    let control = Control {
        join_enabled: layout::get(bytes, JOIN_ON) == 1,
        aggregate: layout::get(bytes, AGGR_ON) == 1,
        dual_key: layout::get(bytes, DUAL_KEY_ON) == 1,
        mode: JoinMode::from_code(layout::get(bytes, JOIN_MODE) as u8)?,
        hash_size: layout::get(bytes, HASH_SIZE) as u32,
    };

    let mut column_maps = [ColumnMap::default(); 2];
    for (map, side) in column_maps.iter_mut().zip([Side::Left, Side::Right]) {
        let base = column_map_field(side);
        let mut raw = [0u8; COLUMN_MAP_SLOTS];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = layout::get(bytes, base.element(i)) as u8;
        }
        *map = ColumnMap::from_bytes(raw)?;
    }

    let write_mask = layout::get(bytes, WRITE_MASK) as u8;
    if write_mask >> OUTPUT_SLOTS != 0 {
        return Err(CompileError::invalid_record(format!(
            "write mask {write_mask:#010b} selects slots past {OUTPUT_SLOTS}"
        )));
    }

    let mut shuffles = [ShuffleTable::IDENTITY; 5];
    for (table, stage) in shuffles.iter_mut().zip(ShuffleStage::ALL) {
        let mut slots = [0u8; SHUFFLE_SLOTS];
        for (slot, source) in slots.iter_mut().enumerate() {
            *source = layout::get(bytes, shuffle_field(stage, slot)) as u8;
        }
        *table = ShuffleTable::from_slots(stage, slots)?;
    }

    let alu = [
        AluWord::from_le_bytes(&bytes[layout::word_range(ALU1_WORD)])?,
        AluWord::from_le_bytes(&bytes[layout::word_range(ALU2_WORD)])?,
    ];

    let filters = [
        decode_filter(bytes, Side::Left)?,
        decode_filter(bytes, Side::Right)?,
    ];

    Ok(CompiledConfig {
        control,
        column_maps,
        write_mask,
        alu,
        filters,
        shuffles,
    })
}

fn decode_filter(bytes: &[u8], side: Side) -> Result<FilterBlock> {
    let start = layout::word_range(filter_word(side)).start;
    let segment = &bytes[start..start + FILTER_SEGMENT_BYTES];
    if segment[FILTER_BLOCK_BYTES..].iter().any(|&b| b != 0) {
        return Err(CompileError::invalid_record(format!(
            "{side} filter segment padding is not zero"
        )));
    }
    let mut words = [0u32; FILTER_BLOCK_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        let at = i * 4;
        *word = u32::from_le_bytes([
            segment[at],
            segment[at + 1],
            segment[at + 2],
            segment[at + 3],
        ]);
    }
    FilterBlock::from_words(words)
}

impl CompiledConfig {
    /// Serializes the configuration; see [`serialize`].
    #[must_use]
    pub fn to_record(&self) -> [u8; RECORD_SIZE] {
        serialize(self)
    }

    /// Serializes the configuration into a shareable buffer for the engine
    /// loader.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&serialize(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, FilterOp, FilterSpec};
    use crate::join::{ColumnRef, JoinDescriptorBuilder, JoinSpec, JoinStage};
    use crate::ExpressionSpec;

    fn sample() -> CompiledConfig {
        let join = JoinSpec::new(&[0, 1], &[2, 3])
            .with_mode(JoinMode::Inner)
            .with_left_payload([ColumnRef::DuplicateKey])
            .with_right_payload([ColumnRef::Unused, ColumnRef::Unused, ColumnRef::Used(4)])
            .with_hash_size_hint(0x1234_5678)
            .with_aggregate(true);
        let stage = JoinStage::new(join)
            .with_filter(
                Side::Left,
                FilterSpec::pass().with_condition(
                    0,
                    Condition::range(FilterOp::Gt, -3, FilterOp::Le, 1_000),
                ),
            )
            .with_expression(ExpressionSpec::new("(strm1-c3)*strm2").with_const(3, -7))
            .with_secondary_expression(ExpressionSpec::new("strm4*c1").with_const(1, 9));
        JoinDescriptorBuilder::default().compile(&stage).unwrap()
    }

    #[test]
    fn control_bits() {
        let record = serialize(&sample());
        // join on, aggregate on, dual key on, inner
        assert_eq!(record[0], 0b0000_0111);
        assert_eq!(&record[1..5], &0x1234_5678u32.to_le_bytes());
        assert_eq!(&record[7..15], &[0, 1, 0xfe, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&record[15..23], &[2, 3, 0xff, 0xff, 4, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn mode_field() {
        let join = JoinSpec::new(&[0], &[0]).with_mode(JoinMode::Anti);
        let cfg = JoinDescriptorBuilder::default()
            .compile(&JoinStage::new(join))
            .unwrap();
        let record = serialize(&cfg);
        assert_eq!(record[0], 0b0001_0001);
    }

    #[test]
    fn round_trip() {
        let cfg = sample();
        let record = serialize(&cfg);
        assert_eq!(deserialize(&record).unwrap(), cfg);
        assert_eq!(cfg.to_bytes().as_ref(), &record[..]);
        assert_eq!(cfg.to_record(), record);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            deserialize(&[0u8; RECORD_SIZE - 1]),
            Err(CompileError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn rejects_reserved_control_bits() {
        let mut record = serialize(&sample());
        record[5] |= 0x01;
        assert!(deserialize(&record).is_err());

        let mut record = serialize(&sample());
        record[0] |= 0x80;
        assert!(deserialize(&record).is_err());
    }

    #[test]
    fn rejects_undefined_mode() {
        let mut record = serialize(&sample());
        record[0] |= 0b0001_1000;
        assert!(matches!(
            deserialize(&record),
            Err(CompileError::UnknownOperator { code: 3, .. })
        ));
    }

    #[test]
    fn rejects_bad_shuffle_source() {
        let mut record = serialize(&sample());
        // shuffle 1b slot 0 lives in byte 32
        record[32] = 8;
        assert!(matches!(
            deserialize(&record),
            Err(CompileError::InvalidShuffleIndex {
                stage: Some(ShuffleStage::Stage1b),
                slot: 0,
                ..
            })
        ));
    }

    #[test]
    fn rejects_filter_padding_and_tail() {
        let mut record = serialize(&sample());
        record[3 * WORD_BYTES + FILTER_BLOCK_BYTES] = 1;
        assert!(deserialize(&record).is_err());

        let mut record = serialize(&sample());
        let marker = 6 * WORD_BYTES + (FILTER_BLOCK_WORDS - 1) * 4 + 3;
        assert_eq!(record[marker], 0x80);
        record[marker] = 0;
        assert!(deserialize(&record).is_err());
    }

    #[test]
    fn rejects_write_mask_past_slot_four() {
        let mut record = serialize(&sample());
        record[23] |= 0x20;
        assert!(deserialize(&record).is_err());
    }
}
