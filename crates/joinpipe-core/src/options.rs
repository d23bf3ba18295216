//! Compile-time knobs for the configuration compiler.
//!
//! [`CompileOptions`] is plain data: it can be built in code with the
//! `with_*` methods or loaded from JSON. Nothing is read from the
//! environment.

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::expr::shape::ShapeTable;

/// Default significant width of an ALU constant register.
pub const DEFAULT_CONST_BITS: u32 = 32;

/// Physical width of an ALU constant register.
pub const CONST_REGISTER_BITS: u32 = 64;

/// Default number of columns scanned per relation.
pub const DEFAULT_SCAN_COLUMNS: u8 = 8;

/// Fixed-point format of the ALU constant registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AluOptions {
    /// Significant bits of a register, sign included.
    pub const_bits: u32,
    /// Fractional bits; a binding `v` is stored as `v << fraction_bits`.
    pub fraction_bits: u32,
}

impl Default for AluOptions {
    fn default() -> Self {
        Self {
            const_bits: DEFAULT_CONST_BITS,
            fraction_bits: 0,
        }
    }
}

impl AluOptions {
    /// Sets the significant register width.
    #[must_use]
    pub const fn with_const_bits(mut self, const_bits: u32) -> Self {
        self.const_bits = const_bits;
        self
    }

    /// Sets the number of fractional bits.
    #[must_use]
    pub const fn with_fraction_bits(mut self, fraction_bits: u32) -> Self {
        self.fraction_bits = fraction_bits;
        self
    }

    /// Checks that the format fits a 64-bit register.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidOptions`] unless
    /// `0 <= fraction_bits < const_bits <= 64`.
    pub fn validate(&self) -> Result<()> {
        if self.const_bits == 0 || self.const_bits > CONST_REGISTER_BITS {
            return Err(CompileError::invalid_options(format!(
                "const_bits must be in 1..={CONST_REGISTER_BITS}, got {}",
                self.const_bits
            )));
        }
        if self.fraction_bits >= self.const_bits {
            return Err(CompileError::invalid_options(format!(
                "fraction_bits ({}) must be smaller than const_bits ({})",
                self.fraction_bits, self.const_bits
            )));
        }
        Ok(())
    }

    /// Scales `value` into register `register` (1-based) and returns the raw
    /// 64-bit register contents, sign-extended.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ConstantOverflow`] if the scaled value does not
    /// fit `const_bits` signed bits.
    pub fn encode_constant(&self, register: usize, value: i64) -> Result<u64> {
        // fraction_bits < const_bits <= 64, so the shift stays inside i128.
        let scaled = i128::from(value) << self.fraction_bits;
        let max = (1i128 << (self.const_bits - 1)) - 1;
        let min = -(1i128 << (self.const_bits - 1));
        if scaled < min || scaled > max {
            return Err(CompileError::ConstantOverflow {
                register,
                value,
                bits: self.const_bits,
            });
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(scaled as i64 as u64)
    }
}

/// Options shared by every compiler in the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Constant register format.
    pub alu: AluOptions,
    /// The closed set of expression shapes the ALU implements.
    pub shapes: ShapeTable,
    /// Number of columns each relation is scanned with.
    pub scan_columns: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            alu: AluOptions::default(),
            shapes: ShapeTable::builtin().clone(),
            scan_columns: DEFAULT_SCAN_COLUMNS,
        }
    }
}

impl CompileOptions {
    /// Sets the constant register format.
    #[must_use]
    pub const fn with_alu(mut self, alu: AluOptions) -> Self {
        self.alu = alu;
        self
    }

    /// Replaces the shape table.
    #[must_use]
    pub fn with_shapes(mut self, shapes: ShapeTable) -> Self {
        self.shapes = shapes;
        self
    }

    /// Sets the scan width of both relations.
    #[must_use]
    pub const fn with_scan_columns(mut self, scan_columns: u8) -> Self {
        self.scan_columns = scan_columns;
        self
    }

    /// Parses options from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidOptions`] for malformed JSON, a shape
    /// table that fails validation, or inconsistent values.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| CompileError::invalid_options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Checks the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidOptions`] if the ALU format is invalid or
    /// the scan width is outside `1..=8`.
    pub fn validate(&self) -> Result<()> {
        self.alu.validate()?;
        if self.scan_columns == 0 || self.scan_columns > DEFAULT_SCAN_COLUMNS {
            return Err(CompileError::invalid_options(format!(
                "scan_columns must be in 1..={DEFAULT_SCAN_COLUMNS}, got {}",
                self.scan_columns
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = CompileOptions::default();
        assert_eq!(options.alu.const_bits, 32);
        assert_eq!(options.alu.fraction_bits, 0);
        assert_eq!(options.scan_columns, 8);
        assert_eq!(&options.shapes, ShapeTable::builtin());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn builder() {
        let options = CompileOptions::default()
            .with_alu(AluOptions::default().with_const_bits(48).with_fraction_bits(8))
            .with_scan_columns(4);
        assert_eq!(options.alu.const_bits, 48);
        assert_eq!(options.alu.fraction_bits, 8);
        assert_eq!(options.scan_columns, 4);
    }

    #[test]
    fn alu_format_validation() {
        assert!(AluOptions::default().with_const_bits(0).validate().is_err());
        assert!(AluOptions::default().with_const_bits(65).validate().is_err());
        assert!(AluOptions::default().with_fraction_bits(32).validate().is_err());
        assert!(AluOptions::default().with_const_bits(64).with_fraction_bits(63).validate().is_ok());
    }

    #[test]
    fn constant_encoding() {
        let alu = AluOptions::default();
        assert_eq!(alu.encode_constant(2, 100).unwrap(), 100);
        assert_eq!(alu.encode_constant(1, -1).unwrap(), u64::MAX);
        assert_eq!(alu.encode_constant(1, i64::from(i32::MAX)).unwrap(), 0x7fff_ffff);
        assert_eq!(
            alu.encode_constant(3, 1 << 31).unwrap_err(),
            CompileError::ConstantOverflow {
                register: 3,
                value: 1 << 31,
                bits: 32,
            }
        );
    }

    #[test]
    fn fixed_point_scaling() {
        let alu = AluOptions::default().with_fraction_bits(8);
        assert_eq!(alu.encode_constant(1, 3).unwrap(), 3 << 8);
        // 2^23 << 8 == 2^31 no longer fits 32 signed bits.
        assert!(alu.encode_constant(1, 1 << 23).is_err());
        assert!(alu.encode_constant(1, -(1 << 23)).is_ok());

        let wide = AluOptions::default().with_const_bits(64);
        assert_eq!(wide.encode_constant(4, i64::MIN).unwrap(), 1 << 63);
    }

    #[test]
    fn from_json_partial() {
        let options = CompileOptions::from_json(r#"{"alu":{"fraction_bits":4}}"#).unwrap();
        assert_eq!(options.alu.const_bits, 32);
        assert_eq!(options.alu.fraction_bits, 4);
        assert_eq!(options.scan_columns, 8);

        assert!(matches!(
            CompileOptions::from_json(r#"{"scan_columns":9}"#),
            Err(CompileError::InvalidOptions { .. })
        ));
    }
}
