//! The closed table of arithmetic shapes the ALU implements.
//!
//! A shape is a pattern over placeholders `a`, `b`, `c` (streams routed to
//! ports A, B, C) and `k` (the selected constant register) plus the opcode
//! the engine runs for it. Patterns are folded to canonical polynomials
//! when the table is built, so matching is a polynomial comparison under a
//! renaming of placeholders.
//!
//! The table is data: [`ShapeTable::builtin`] covers the shapes used by the
//! bundled queries and [`ShapeTable::from_json`] loads a replacement.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::fold::{fold, Poly};
use super::parser::{parse, Symbol, Vocabulary};
use crate::error::{CompileError, Result};

/// One supported shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AluShape {
    /// Short identifier used in logs and errors.
    pub name: String,
    /// Engine opcode. Zero is reserved for the pass-through word.
    pub opcode: u8,
    /// Pattern over `a`, `b`, `c` and `k`.
    pub pattern: String,
}

impl AluShape {
    /// Creates a shape.
    pub fn new(name: impl Into<String>, opcode: u8, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opcode,
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CompiledShape {
    shape: AluShape,
    poly: Poly,
    streams: Vec<Symbol>,
    consts: Vec<Symbol>,
}

/// Result of matching a polynomial against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeMatch<'a> {
    /// The matched shape.
    pub shape: &'a AluShape,
    /// Stream numbers routed to ports A, B and C; zero for an unused port.
    pub ports: [u8; 3],
    /// Selected constant register, zero if the shape uses none.
    pub constant: u8,
}

const BUILTIN_SHAPES: &[(&str, u8, &str)] = &[
    ("pass", 1, "a"),
    ("add", 2, "a+b"),
    ("sub", 3, "a-b"),
    ("mul", 4, "a*b"),
    ("add_const", 5, "a+k"),
    ("sub_const", 6, "a-k"),
    ("const_sub", 7, "k-a"),
    ("mul_const", 8, "a*k"),
    ("add_const_mul", 9, "(a+k)*b"),
    ("sub_const_mul", 10, "(a-k)*b"),
    ("const_sub_mul", 11, "a*(k-b)"),
    ("add_mul_const", 12, "(a+b)*k"),
    ("sub_mul_const", 13, "(a-b)*k"),
    ("add3", 14, "a+b+c"),
];

static BUILTIN: LazyLock<ShapeTable> = LazyLock::new(|| {
    let shapes = BUILTIN_SHAPES
        .iter()
        .map(|&(name, opcode, pattern)| AluShape::new(name, opcode, pattern))
        .collect();
    ShapeTable::new(shapes).expect("built-in shape table is valid")
});

/// Highest degree a pattern may fold to: three streams and one constant.
pub const PATTERN_DEGREE_LIMIT: usize = 4;

/// An ordered, validated set of [`AluShape`]s. The first matching shape wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AluShape>", into = "Vec<AluShape>")]
pub struct ShapeTable {
    shapes: Vec<CompiledShape>,
    max_degree: usize,
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

impl TryFrom<Vec<AluShape>> for ShapeTable {
    type Error = CompileError;

    fn try_from(shapes: Vec<AluShape>) -> Result<Self> {
        Self::new(shapes)
    }
}

impl From<ShapeTable> for Vec<AluShape> {
    fn from(table: ShapeTable) -> Self {
        table.shapes.into_iter().map(|s| s.shape).collect()
    }
}

impl ShapeTable {
    /// The table shipped with the crate.
    #[must_use]
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    /// Validates and compiles a table.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ShapeTable`] if the table is empty, a name or
    /// opcode repeats, an opcode is zero, or a pattern does not parse, folds
    /// to zero or has a degree above [`PATTERN_DEGREE_LIMIT`].
    pub fn new(shapes: Vec<AluShape>) -> Result<Self> {
        if shapes.is_empty() {
            return Err(CompileError::shape_table("table is empty"));
        }
        let mut names = HashSet::new();
        let mut opcodes = HashSet::new();
        let mut compiled = Vec::with_capacity(shapes.len());
        for shape in shapes {
            if shape.opcode == 0 {
                return Err(CompileError::shape_table(format!(
                    "shape '{}' uses reserved opcode 0",
                    shape.name
                )));
            }
            if !names.insert(shape.name.clone()) {
                return Err(CompileError::shape_table(format!(
                    "duplicate shape name '{}'",
                    shape.name
                )));
            }
            if !opcodes.insert(shape.opcode) {
                return Err(CompileError::shape_table(format!(
                    "opcode {} is used by more than one shape",
                    shape.opcode
                )));
            }
            let ast = parse(&shape.pattern, Vocabulary::Pattern).map_err(|e| {
                CompileError::shape_table(format!(
                    "shape '{}': {} at offset {}",
                    shape.name, e.message, e.position
                ))
            })?;
            let poly = fold(&ast, PATTERN_DEGREE_LIMIT).map_err(|e| {
                CompileError::shape_table(format!("shape '{}': {e}", shape.name))
            })?;
            if poly.is_zero() {
                return Err(CompileError::shape_table(format!(
                    "shape '{}' folds to zero",
                    shape.name
                )));
            }
            let symbols = poly.symbols();
            let (streams, consts) = symbols.into_iter().partition(|s| s.is_stream());
            compiled.push(CompiledShape {
                shape,
                poly,
                streams,
                consts,
            });
        }
        let max_degree = compiled.iter().map(|s| s.poly.degree()).max().unwrap_or(0);
        Ok(Self {
            shapes: compiled,
            max_degree,
        })
    }

    /// Loads a table from a JSON array of `{name, opcode, pattern}` objects.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ShapeTable`] for malformed JSON or an invalid
    /// table.
    pub fn from_json(json: &str) -> Result<Self> {
        let shapes: Vec<AluShape> =
            serde_json::from_str(json).map_err(|e| CompileError::shape_table(e.to_string()))?;
        Self::new(shapes)
    }

    /// Serializes the table as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ShapeTable`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let shapes: Vec<&AluShape> = self.shapes.iter().map(|s| &s.shape).collect();
        serde_json::to_string_pretty(&shapes).map_err(|e| CompileError::shape_table(e.to_string()))
    }

    /// Shapes in match order.
    pub fn iter(&self) -> impl Iterator<Item = &AluShape> {
        self.shapes.iter().map(|s| &s.shape)
    }

    /// Number of shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Always `false` for a validated table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Highest degree of any shape. Expressions whose products go past it
    /// cannot match and are refused while folding.
    #[must_use]
    pub const fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Looks up a shape by opcode.
    #[must_use]
    pub fn by_opcode(&self, opcode: u8) -> Option<&AluShape> {
        self.iter().find(|s| s.opcode == opcode)
    }

    /// Finds the first shape `poly` is an instance of.
    ///
    /// Placeholders are bound one-to-one to the expression's symbols of the
    /// same kind. Bindings are tried in lexicographic order of the
    /// expression's sorted symbols, so the result is deterministic.
    #[must_use]
    pub fn find(&self, poly: &Poly) -> Option<ShapeMatch<'_>> {
        let (streams, consts): (Vec<Symbol>, Vec<Symbol>) =
            poly.symbols().into_iter().partition(|s| s.is_stream());

        for candidate in &self.shapes {
            if candidate.streams.len() != streams.len() || candidate.consts.len() != consts.len() {
                continue;
            }
            if candidate.poly.degree() != poly.degree() {
                continue;
            }
            for stream_order in permutations(&streams) {
                for const_order in permutations(&consts) {
                    let map: BTreeMap<Symbol, Symbol> = candidate
                        .streams
                        .iter()
                        .copied()
                        .zip(stream_order.iter().copied())
                        .chain(
                            candidate
                                .consts
                                .iter()
                                .copied()
                                .zip(const_order.iter().copied()),
                        )
                        .collect();
                    if candidate.poly.substitute(&map) == *poly {
                        return Some(bind(&candidate.shape, &map));
                    }
                }
            }
        }
        None
    }
}

fn bind<'a>(shape: &'a AluShape, map: &BTreeMap<Symbol, Symbol>) -> ShapeMatch<'a> {
    let mut ports = [0u8; 3];
    let mut constant = 0u8;
    for (placeholder, target) in map {
        match (placeholder, target) {
            (Symbol::Stream(slot), Symbol::Stream(n)) => ports[usize::from(*slot)] = *n,
            (Symbol::Const(_), Symbol::Const(n)) => constant = *n,
            _ => {}
        }
    }
    ShapeMatch {
        shape,
        ports,
        constant,
    }
}

/// All orderings of `items` in lexicographic order of positions.
fn permutations(items: &[Symbol]) -> Vec<Vec<Symbol>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *first);
            out.push(tail);
        }
    }
    out
}
