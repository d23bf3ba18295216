//! Bit-exact layout of the join stage configuration record.
//!
//! The engine reads the record as nine 512-bit words with fixed field
//! offsets. Words are stored little-endian: bit `i` of the record is bit
//! `i % 8` of byte `i / 8`, so a `u32` array copied into a word lands with
//! element 0 at bit 0.
//!
//! # Record Layout
//!
//! ```text
//! word 0  control + shuffle
//!   [0]        join enabled
//!   [1]        aggregate enabled
//!   [2]        dual-column key
//!   [5:3]      join mode (0 inner, 1 semi, 2 anti)
//!   [39:8]     hash table size hint
//!   [119:56]   left column map, 8 x i8 (-1 unused, -2 duplicate key)
//!   [183:120]  right column map, 8 x i8
//!   [191:184]  output write mask
//!   [255:192]  shuffle 1a    [319:256] shuffle 1b    [383:320] shuffle 2
//!   [447:384]  shuffle 3     [511:448] shuffle 4
//! word 1  ALU stage 1 (289 bits used)
//! word 2  ALU stage 2 (289 bits used)
//! word 3..5  filter block, left relation  (45 x u32, 3 x u32 padding)
//! word 6..8  filter block, right relation (45 x u32, 3 x u32 padding)
//! ```
//!
//! Every bit not named above is reserved and always zero.
//!
//! # ALU Word
//!
//! ```text
//! [255:0]    constant registers c1..c4, 64 bits each, sign-extended
//! [259:256]  stream enable mask, bit n-1 for strm<n>
//! [267:260]  opcode (0 = pass-through)
//! [270:268]  port A stream    [273:271] port B stream    [276:274] port C stream
//! [279:277]  constant register select (0 = none, 1..4 = c1..c4)
//! [287:280]  reserved
//! [288]      stage enable
//! ```
//!
//! Offsets in this section are relative to the start of the ALU word.

/// Width of one engine word in bits.
pub const WORD_BITS: usize = 512;

/// Width of one engine word in bytes.
pub const WORD_BYTES: usize = WORD_BITS / 8;

/// Number of engine words in a record.
pub const RECORD_WORDS: usize = 9;

/// Total record size in bytes.
pub const RECORD_SIZE: usize = RECORD_WORDS * WORD_BYTES;

/// A bit range inside the record, `width` bits starting at absolute bit `lo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Absolute bit offset of the least significant bit.
    pub lo: usize,
    /// Width in bits (1..=64).
    pub width: u32,
}

impl Field {
    /// Creates a field of `width` bits at bit `lo`.
    #[must_use]
    pub const fn new(lo: usize, width: u32) -> Self {
        Self { lo, width }
    }

    /// Creates a field inside engine word `word`.
    #[must_use]
    pub const fn in_word(word: usize, lo: usize, width: u32) -> Self {
        Self {
            lo: word * WORD_BITS + lo,
            width,
        }
    }

    /// Returns the `index`-th `width`-bit element of an array starting at this field.
    #[must_use]
    pub const fn element(self, index: usize) -> Self {
        Self {
            lo: self.lo + index * self.width as usize,
            width: self.width,
        }
    }

    /// Exclusive upper bit.
    #[must_use]
    pub const fn hi(self) -> usize {
        self.lo + self.width as usize
    }

    const fn mask(self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }
}

/// Join-enabled flag.
pub const JOIN_ON: Field = Field::new(0, 1);
/// Aggregate-enabled flag.
pub const AGGR_ON: Field = Field::new(1, 1);
/// Dual-column key flag.
pub const DUAL_KEY_ON: Field = Field::new(2, 1);
/// Join mode field.
pub const JOIN_MODE: Field = Field::new(3, 3);
/// Hash table size hint.
pub const HASH_SIZE: Field = Field::new(8, 32);
/// First slot of the left column map; use [`Field::element`] for the rest.
pub const COLUMN_MAP_LEFT: Field = Field::new(56, 8);
/// First slot of the right column map.
pub const COLUMN_MAP_RIGHT: Field = Field::new(120, 8);
/// Output write mask.
pub const WRITE_MASK: Field = Field::new(184, 8);
/// First entry of shuffle table 1a. Tables follow each other every 64 bits
/// in the order 1a, 1b, 2, 3, 4.
pub const SHUFFLE_BASE: Field = Field::new(192, 8);

/// First ALU constant register; `element(i)` is register `c<i+1>`.
pub const ALU_CONST: Field = Field::new(0, 64);
/// Stream enable mask.
pub const ALU_STREAM_MASK: Field = Field::new(256, 4);
/// ALU opcode.
pub const ALU_OPCODE: Field = Field::new(260, 8);
/// Port A stream; ports B and C follow as `element(1)` and `element(2)`.
pub const ALU_PORT: Field = Field::new(268, 3);
/// Constant register select.
pub const ALU_CONST_SELECT: Field = Field::new(277, 3);
/// Reserved bits between the operand fields and the enable bit.
pub const ALU_RESERVED: Field = Field::new(280, 8);
/// Stage enable bit.
pub const ALU_ENABLE: Field = Field::new(288, 1);
/// Number of meaningful bits in an ALU word.
pub const ALU_BITS: usize = 289;

/// Engine word holding the stage 1 ALU configuration.
pub const ALU1_WORD: usize = 1;
/// Engine word holding the stage 2 ALU configuration.
pub const ALU2_WORD: usize = 2;
/// First engine word of the left relation's filter block.
pub const FILTER_LEFT_WORD: usize = 3;
/// First engine word of the right relation's filter block.
pub const FILTER_RIGHT_WORD: usize = 6;
/// Engine words reserved per filter block.
pub const FILTER_WORDS: usize = 3;

/// Writes `value` into `field`, replacing its previous contents.
///
/// Bits of `value` above the field width are discarded, callers validate
/// ranges before writing.
pub fn put(buf: &mut [u8], field: Field, value: u64) {
    let value = value & field.mask();
    for i in 0..field.width as usize {
        let bit = field.lo + i;
        let byte = &mut buf[bit / 8];
        let shift = bit % 8;
        if (value >> i) & 1 == 1 {
            *byte |= 1 << shift;
        } else {
            *byte &= !(1 << shift);
        }
    }
}

/// Reads the unsigned contents of `field`.
#[must_use]
pub fn get(buf: &[u8], field: Field) -> u64 {
    let mut value = 0u64;
    for i in 0..field.width as usize {
        let bit = field.lo + i;
        if (buf[bit / 8] >> (bit % 8)) & 1 == 1 {
            value |= 1 << i;
        }
    }
    value
}

/// Returns the byte range of engine word `word`.
#[must_use]
pub const fn word_range(word: usize) -> std::ops::Range<usize> {
    word * WORD_BYTES..(word + 1) * WORD_BYTES
}
