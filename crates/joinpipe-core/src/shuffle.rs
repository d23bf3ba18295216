//! Column permutation tables for the five re-layout points of the pipeline.
//!
//! Each table has eight output slots; slot `i` holds the index of the input
//! column copied into output column `i`. The width of the input differs per
//! stage:
//!
//! | stage | position                          | inputs |
//! |-------|-----------------------------------|--------|
//! | 1a    | after scan of the left relation   | 8      |
//! | 1b    | after scan of the right relation  | 8      |
//! | 2     | after the join (merged row)       | 14     |
//! | 3     | after ALU stage 1                 | 9      |
//! | 4     | after ALU stage 2                 | 9      |
//!
//! The merged row seen by stage 2 carries right payloads in columns 0..6,
//! left payloads in 6..12 and the key columns in 12..14. Stages 3 and 4
//! see the eight columns of the previous stage followed by the evaluated
//! result in column 8.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{CompileError, Result};

/// Number of output slots in every shuffle table.
pub const SHUFFLE_SLOTS: usize = 8;

/// A fixed re-layout point in the engine pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShuffleStage {
    /// Left relation, before its filter.
    #[serde(rename = "1a")]
    Stage1a,
    /// Right relation, before its filter.
    #[serde(rename = "1b")]
    Stage1b,
    /// Merged row, after the join.
    #[serde(rename = "2")]
    Stage2,
    /// After the first evaluation stage.
    #[serde(rename = "3")]
    Stage3,
    /// After the second evaluation stage.
    #[serde(rename = "4")]
    Stage4,
}

impl ShuffleStage {
    /// All stages in record order.
    pub const ALL: [Self; 5] = [
        Self::Stage1a,
        Self::Stage1b,
        Self::Stage2,
        Self::Stage3,
        Self::Stage4,
    ];

    /// Position of this stage's table in the record.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Number of input columns the stage can select from.
    #[must_use]
    pub const fn source_width(self) -> u8 {
        match self {
            Self::Stage1a | Self::Stage1b => 8,
            Self::Stage2 => 14,
            Self::Stage3 | Self::Stage4 => 9,
        }
    }

    /// The neutral layout for this stage.
    ///
    /// Every stage is the identity except stage 2, which gathers the first
    /// three right payloads and the left payloads out of the merged row so
    /// that output slots keep their join-side meaning.
    #[must_use]
    pub const fn default_table(self) -> ShuffleTable {
        match self {
            Self::Stage2 => ShuffleTable {
                slots: [0, 1, 2, 6, 7, 8, 9, 10],
            },
            _ => ShuffleTable::IDENTITY,
        }
    }
}

impl fmt::Display for ShuffleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stage1a => "1a",
            Self::Stage1b => "1b",
            Self::Stage2 => "2",
            Self::Stage3 => "3",
            Self::Stage4 => "4",
        };
        f.write_str(label)
    }
}

/// One 8-slot column permutation.
///
/// Not necessarily a permutation in the strict sense: a source may be
/// copied into several slots and some sources may be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShuffleTable {
    slots: [u8; SHUFFLE_SLOTS],
}

impl Default for ShuffleTable {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ShuffleTable {
    /// The identity table `[0, 1, .., 7]`.
    pub const IDENTITY: Self = Self {
        slots: [0, 1, 2, 3, 4, 5, 6, 7],
    };

    /// Builds a table from a sparse mapping, `None` meaning `i -> i`.
    ///
    /// Sources are checked against the 8-column scan width. Use
    /// [`for_stage`](Self::for_stage) for the wider post-join and
    /// post-ALU stages.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidShuffleIndex`] if a source is `>= 8`.
    pub fn build(mapping: [Option<u8>; SHUFFLE_SLOTS]) -> Result<Self> {
        Self::resolve(None, SHUFFLE_SLOTS as u8, mapping)
    }

    /// Builds a table for `stage`, checking sources against the stage's
    /// input width.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidShuffleIndex`] if a source is outside
    /// [`ShuffleStage::source_width`].
    pub fn for_stage(stage: ShuffleStage, mapping: [Option<u8>; SHUFFLE_SLOTS]) -> Result<Self> {
        Self::resolve(Some(stage), stage.source_width(), mapping)
    }

    /// Builds a fully specified table for `stage`.
    ///
    /// # Errors
    ///
    /// Same as [`for_stage`](Self::for_stage).
    pub fn from_slots(stage: ShuffleStage, slots: [u8; SHUFFLE_SLOTS]) -> Result<Self> {
        Self::for_stage(stage, slots.map(Some))
    }

    fn resolve(
        stage: Option<ShuffleStage>,
        limit: u8,
        mapping: [Option<u8>; SHUFFLE_SLOTS],
    ) -> Result<Self> {
        let mut slots = Self::IDENTITY.slots;
        for (slot, entry) in mapping.into_iter().enumerate() {
            if let Some(index) = entry {
                if index >= limit {
                    return Err(CompileError::InvalidShuffleIndex {
                        stage,
                        slot,
                        index,
                        limit,
                    });
                }
                slots[slot] = index;
            }
        }
        Ok(Self { slots })
    }

    /// Checks every source against `stage`'s input width.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidShuffleIndex`] for the first bad slot.
    pub fn validate_for(&self, stage: ShuffleStage) -> Result<()> {
        Self::from_slots(stage, self.slots).map(|_| ())
    }

    /// Source index of every slot.
    #[must_use]
    pub const fn slots(&self) -> [u8; SHUFFLE_SLOTS] {
        self.slots
    }

    /// Returns `true` for `[0, 1, .., 7]`.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Applies the table to a row of columns.
    ///
    /// Returns `None` if a slot reads past the end of `input`.
    #[must_use]
    pub fn apply<T: Clone>(&self, input: &[T]) -> Option<SmallVec<[T; SHUFFLE_SLOTS]>> {
        self.slots
            .iter()
            .map(|&src| input.get(usize::from(src)).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let table = ShuffleTable::build([None; 8]).unwrap();
        assert!(table.is_identity());
        assert_eq!(table, ShuffleTable::default());
    }

    #[test]
    fn sparse_mapping_overrides_slots() {
        let table =
            ShuffleTable::build([Some(1), Some(2), Some(0), None, None, None, None, None]).unwrap();
        assert_eq!(table.slots(), [1, 2, 0, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn build_rejects_source_past_scan_width() {
        let mut mapping = [None; 8];
        mapping[5] = Some(8);
        let err = ShuffleTable::build(mapping).unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidShuffleIndex {
                stage: None,
                slot: 5,
                index: 8,
                limit: 8,
            }
        );
    }

    #[test]
    fn stage_widths() {
        let merged = ShuffleTable::from_slots(ShuffleStage::Stage2, [1, 2, 0, 6, 7, 8, 9, 13]);
        assert!(merged.is_ok());
        assert!(ShuffleTable::from_slots(ShuffleStage::Stage2, [14, 0, 0, 0, 0, 0, 0, 0]).is_err());

        let alu = ShuffleTable::from_slots(ShuffleStage::Stage3, [0, 1, 2, 3, 8, 5, 6, 7]).unwrap();
        assert!(alu.validate_for(ShuffleStage::Stage4).is_ok());
        assert!(matches!(
            alu.validate_for(ShuffleStage::Stage1b),
            Err(CompileError::InvalidShuffleIndex {
                stage: Some(ShuffleStage::Stage1b),
                slot: 4,
                index: 8,
                limit: 8,
            })
        ));
    }

    #[test]
    fn default_tables() {
        for stage in ShuffleStage::ALL {
            let table = stage.default_table();
            assert!(table.validate_for(stage).is_ok());
            assert_eq!(table.is_identity(), stage != ShuffleStage::Stage2);
        }
        assert_eq!(
            ShuffleStage::Stage2.default_table().slots(),
            [0, 1, 2, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn apply_reorders_and_duplicates() {
        let row = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let table = ShuffleTable::build([Some(7), Some(7), None, None, None, None, None, Some(0)])
            .unwrap();
        let out = table.apply(&row).unwrap();
        assert_eq!(out.as_slice(), &["h", "h", "c", "d", "e", "f", "g", "a"]);
        assert!(table.apply(&row[..4]).is_none());
    }

    #[test]
    fn stage_labels_round_trip_through_json() {
        for stage in ShuffleStage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{stage}\""));
            let back: ShuffleStage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, stage);
        }
    }
}
