//! Compiler from arithmetic expressions to ALU words.
//!
//! The engine's ALU is a fixed-function unit with three stream ports, four
//! constant registers and a closed set of opcodes. Compiling an expression
//! runs three passes:
//!
//! 1. [`parser`] turns the text into a tree, rejecting anything outside the
//!    grammar.
//! 2. [`fold`] expands the tree into a canonical polynomial.
//! 3. [`shape`] finds the first table entry the polynomial is an instance
//!    of and reads the port routing off the placeholder binding.
//!
//! There is no fallback: an expression no shape covers is an error.

pub mod fold;
pub mod parser;
pub mod shape;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use self::fold::fold as fold_poly;
use self::parser::{parse, Symbol, Vocabulary};
use self::shape::ShapeTable;
use crate::error::{CompileError, Result};
use crate::layout::{
    self, ALU_BITS, ALU_CONST, ALU_CONST_SELECT, ALU_ENABLE, ALU_OPCODE, ALU_PORT, ALU_RESERVED,
    ALU_STREAM_MASK, WORD_BYTES,
};
use crate::options::{AluOptions, CompileOptions};

/// Number of constant registers.
pub const CONST_REGISTERS: usize = 4;

/// Number of stream ports.
pub const ALU_PORTS: usize = 3;

/// Values bound to the constant registers `c1..c4`.
///
/// Unbound registers are written as zero; referencing one from an
/// expression is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstBindings {
    /// Register `c1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c1: Option<i64>,
    /// Register `c2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c2: Option<i64>,
    /// Register `c3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c3: Option<i64>,
    /// Register `c4`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c4: Option<i64>,
}

impl ConstBindings {
    /// Binds every register, in `c1..c4` order.
    #[must_use]
    pub const fn from_values(values: [i64; CONST_REGISTERS]) -> Self {
        Self {
            c1: Some(values[0]),
            c2: Some(values[1]),
            c3: Some(values[2]),
            c4: Some(values[3]),
        }
    }

    /// Returns a copy with register `register` (1-based) bound to `value`.
    /// Registers outside `1..=4` are ignored.
    #[must_use]
    pub fn with(mut self, register: usize, value: i64) -> Self {
        if let Some(slot) = self.slot_mut(register) {
            *slot = Some(value);
        }
        self
    }

    /// Value bound to register `register` (1-based).
    #[must_use]
    pub const fn get(&self, register: usize) -> Option<i64> {
        match register {
            1 => self.c1,
            2 => self.c2,
            3 => self.c3,
            4 => self.c4,
            _ => None,
        }
    }

    fn slot_mut(&mut self, register: usize) -> Option<&mut Option<i64>> {
        match register {
            1 => Some(&mut self.c1),
            2 => Some(&mut self.c2),
            3 => Some(&mut self.c3),
            4 => Some(&mut self.c4),
            _ => None,
        }
    }
}

/// An expression with its constant bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionSpec {
    /// Source text over `strm1..strm4` and `c1..c4`.
    pub expr: String,
    /// Constant register values.
    #[serde(default)]
    pub consts: ConstBindings,
}

impl ExpressionSpec {
    /// Creates an expression with no constants bound.
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            consts: ConstBindings::default(),
        }
    }

    /// Binds register `register` (1-based).
    #[must_use]
    pub fn with_const(mut self, register: usize, value: i64) -> Self {
        self.consts = self.consts.with(register, value);
        self
    }
}

/// The two evaluation stages of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluStage {
    /// Feeds shuffle 3 and the result output slot.
    First,
    /// Feeds shuffle 4.
    Second,
}

impl AluStage {
    /// Both stages, in record order.
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    /// Position of the stage's word among the record's ALU words.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

impl fmt::Display for AluStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("alu1"),
            Self::Second => f.write_str("alu2"),
        }
    }
}

/// One encoded ALU stage.
///
/// The all-zero word disables the stage and passes rows through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AluWord {
    constants: [u64; CONST_REGISTERS],
    stream_mask: u8,
    opcode: u8,
    ports: [u8; ALU_PORTS],
    const_select: u8,
    enabled: bool,
}

impl AluWord {
    /// The disabled, pass-through word.
    pub const PASS_THROUGH: Self = Self {
        constants: [0; CONST_REGISTERS],
        stream_mask: 0,
        opcode: 0,
        ports: [0; ALU_PORTS],
        const_select: 0,
        enabled: false,
    };

    /// Raw contents of the constant registers.
    #[must_use]
    pub const fn constants(&self) -> [u64; CONST_REGISTERS] {
        self.constants
    }

    /// Bit `n - 1` is set when `strm<n>` is read.
    #[must_use]
    pub const fn stream_mask(&self) -> u8 {
        self.stream_mask
    }

    /// Engine opcode, zero when disabled.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Stream numbers on ports A, B and C, zero for unused ports.
    #[must_use]
    pub const fn ports(&self) -> [u8; ALU_PORTS] {
        self.ports
    }

    /// Selected constant register, zero for none.
    #[must_use]
    pub const fn const_select(&self) -> u8 {
        self.const_select
    }

    /// Returns `true` if the stage evaluates an expression.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` for the all-zero word.
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        *self == Self::PASS_THROUGH
    }

    /// Encodes the word into one little-endian engine word.
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; WORD_BYTES] {
        let mut buf = [0u8; WORD_BYTES];
        for (i, value) in self.constants.iter().enumerate() {
            layout::put(&mut buf, ALU_CONST.element(i), *value);
        }
        layout::put(&mut buf, ALU_STREAM_MASK, u64::from(self.stream_mask));
        layout::put(&mut buf, ALU_OPCODE, u64::from(self.opcode));
        for (i, port) in self.ports.iter().enumerate() {
            layout::put(&mut buf, ALU_PORT.element(i), u64::from(*port));
        }
        layout::put(&mut buf, ALU_CONST_SELECT, u64::from(self.const_select));
        layout::put(&mut buf, ALU_ENABLE, u64::from(self.enabled));
        buf
    }

    /// Decodes an engine word.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidRecord`] if `bytes` is not one engine
    /// word, reserved bits are set, a port or register select is out of
    /// range, or a disabled word is not all zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != WORD_BYTES {
            return Err(CompileError::invalid_record(format!(
                "ALU word is {} bytes, expected {WORD_BYTES}",
                bytes.len()
            )));
        }
        if layout::get(bytes, ALU_RESERVED) != 0
            || bytes[ALU_BITS / 8] >> (ALU_BITS % 8) != 0
            || bytes[ALU_BITS / 8 + 1..].iter().any(|&b| b != 0)
        {
            return Err(CompileError::invalid_record("ALU word has reserved bits set"));
        }

        let mut word = Self::PASS_THROUGH;
        for (i, slot) in word.constants.iter_mut().enumerate() {
            *slot = layout::get(bytes, ALU_CONST.element(i));
        }
        // Field widths are at most 8 bits.
        word.stream_mask = layout::get(bytes, ALU_STREAM_MASK) as u8;
        word.opcode = layout::get(bytes, ALU_OPCODE) as u8;
        for (i, port) in word.ports.iter_mut().enumerate() {
            *port = layout::get(bytes, ALU_PORT.element(i)) as u8;
        }
        word.const_select = layout::get(bytes, ALU_CONST_SELECT) as u8;
        word.enabled = layout::get(bytes, ALU_ENABLE) == 1;

        let routing_ok = word.ports.iter().all(|&p| usize::from(p) <= CONST_REGISTERS)
            && usize::from(word.const_select) <= CONST_REGISTERS;
        if !routing_ok {
            return Err(CompileError::invalid_record(format!(
                "ALU operand routing out of range (ports {:?}, constant {})",
                word.ports, word.const_select
            )));
        }
        if !word.enabled && !word.is_pass_through() {
            return Err(CompileError::invalid_record(
                "disabled ALU word carries operand bits",
            ));
        }
        if word.enabled && word.opcode == 0 {
            return Err(CompileError::invalid_record("enabled ALU word has opcode 0"));
        }
        Ok(word)
    }
}

/// Compiles expressions against a shape table and constant format.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionCompiler<'a> {
    alu: AluOptions,
    shapes: &'a ShapeTable,
}

impl Default for ExpressionCompiler<'static> {
    fn default() -> Self {
        Self {
            alu: AluOptions::default(),
            shapes: ShapeTable::builtin(),
        }
    }
}

impl<'a> ExpressionCompiler<'a> {
    /// Creates a compiler using the shapes and constant format of `options`.
    #[must_use]
    pub fn new(options: &'a CompileOptions) -> Self {
        Self {
            alu: options.alu,
            shapes: &options.shapes,
        }
    }

    /// Compiles `expr` with the given constant bindings.
    ///
    /// # Errors
    ///
    /// - [`CompileError::ExpressionSyntax`] if `expr` is outside the grammar.
    /// - [`CompileError::UnsupportedExpression`] if no shape matches or an
    ///   unbound constant is referenced.
    /// - [`CompileError::ConstantOverflow`] if a bound constant does not fit
    ///   its register.
    /// - [`CompileError::InvalidOptions`] if the constant format is invalid.
    pub fn compile(&self, expr: &str, consts: &ConstBindings) -> Result<AluWord> {
        self.alu.validate()?;

        let ast = parse(expr, Vocabulary::Expression).map_err(|e| {
            CompileError::ExpressionSyntax {
                expr: expr.to_string(),
                position: e.position,
                message: e.message,
            }
        })?;
        let poly = fold_poly(&ast, self.shapes.max_degree())
            .map_err(|e| CompileError::unsupported(expr, e.to_string()))?;
        if poly.is_zero() {
            return Err(CompileError::unsupported(expr, "expression is identically zero"));
        }
        trace!(expr, canonical = %poly, "folded ALU expression");

        let matched = self.shapes.find(&poly).ok_or_else(|| {
            CompileError::unsupported(expr, format!("canonical form {poly} matches no ALU shape"))
        })?;

        let mut stream_mask = 0u8;
        for symbol in poly.symbols() {
            match symbol {
                Symbol::Stream(n) => stream_mask |= 1 << (n - 1),
                Symbol::Const(n) => {
                    if consts.get(usize::from(n)).is_none() {
                        return Err(CompileError::unsupported(
                            expr,
                            format!("constant c{n} is not bound"),
                        ));
                    }
                }
            }
        }

        let mut constants = [0u64; CONST_REGISTERS];
        for (i, slot) in constants.iter_mut().enumerate() {
            let register = i + 1;
            *slot = self
                .alu
                .encode_constant(register, consts.get(register).unwrap_or(0))?;
        }

        debug!(
            expr,
            shape = %matched.shape.name,
            opcode = matched.shape.opcode,
            ports = ?matched.ports,
            constant = matched.constant,
            "compiled ALU expression"
        );
        Ok(AluWord {
            constants,
            stream_mask,
            opcode: matched.shape.opcode,
            ports: matched.ports,
            const_select: matched.constant,
            enabled: true,
        })
    }

    /// Compiles an [`ExpressionSpec`].
    ///
    /// # Errors
    ///
    /// See [`compile`](Self::compile).
    pub fn compile_spec(&self, spec: &ExpressionSpec) -> Result<AluWord> {
        self.compile(&spec.expr, &spec.consts)
    }
}

/// Compiles `expr` with the built-in shape table and default constant format.
///
/// # Errors
///
/// See [`ExpressionCompiler::compile`].
pub fn compile(expr: &str, consts: &ConstBindings) -> Result<AluWord> {
    ExpressionCompiler::default().compile(expr, consts)
}
