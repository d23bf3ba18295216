//! # Joinpipe Core
//!
//! Compiler from logical join-stage descriptions to the fixed 576-byte
//! configuration record consumed by a hardware hash-join pipeline.
//!
//! This crate provides:
//! - Range filter encoding for both relations ([`filter`])
//! - Arithmetic expression compilation to ALU words ([`expr`])
//! - Column map, write mask and control assembly ([`join`])
//! - Crossbar shuffle tables ([`shuffle`])
//! - Bit-exact record serialization and validation ([`serializer`])
//! - Column-name resolution for query front-ends ([`named`])
//!
//! ## Example
//!
//! ```rust
//! use joinpipe_core::{
//!     Condition, ExpressionSpec, FilterOp, FilterSpec, JoinDescriptorBuilder,
//!     JoinSpec, JoinStage, Side,
//! };
//!
//! // orders JOIN lineitem ON o_orderkey = l_orderkey,
//! // revenue = l_extendedprice * (100 - l_discount)
//! let join = JoinSpec::new(&[0], &[0])
//!     .with_left_payload([3u8])
//!     .with_right_payload([1u8, 2, 3])
//!     .with_suppressed_outputs([0, 1]);
//! let date = FilterSpec::pass().with_condition(
//!     2,
//!     Condition::range(FilterOp::Geu, 19_940_101, FilterOp::Ltu, 19_950_101),
//! );
//! let stage = JoinStage::new(join)
//!     .with_filter(Side::Left, date)
//!     .with_expression(ExpressionSpec::new("strm1*(-strm2+c2)").with_const(2, 100));
//!
//! let cfg = JoinDescriptorBuilder::default().compile(&stage)?;
//! let record = cfg.to_record();
//! assert_eq!(record.len(), joinpipe_core::RECORD_SIZE);
//! assert_eq!(joinpipe_core::deserialize(&record)?, cfg);
//! # Ok::<(), joinpipe_core::CompileError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Bit packing narrows between integer widths on purpose; fields are range checked first
#![allow(clippy::cast_possible_truncation)]
// Allow doc comments without backticks for wire mnemonics like GEU or strm1
#![allow(clippy::doc_markdown)]
// Allow must_use suggestion for internal functions
#![allow(clippy::must_use_candidate)]
// Allow missing errors doc for internal functions
#![allow(clippy::missing_errors_doc)]
// Allow match arms with same body - opcode tables read better one row per code
#![allow(clippy::match_same_arms)]

pub mod error;
pub mod expr;
pub mod filter;
pub mod join;
pub mod layout;
pub mod named;
pub mod options;
pub mod serializer;
pub mod shuffle;

// Re-export key types
pub use error::{BoundKind, CompileError, Result, Side};
pub use expr::shape::{AluShape, ShapeTable};
pub use expr::{AluStage, AluWord, ConstBindings, ExpressionCompiler, ExpressionSpec};
pub use filter::{Combine, CombineOp, Condition, FilterBlock, FilterOp, FilterSpec};
pub use join::{
    ColumnMap, ColumnRef, CompiledConfig, Control, JoinDescriptorBuilder, JoinMode, JoinSpec,
    JoinStage,
};
pub use layout::RECORD_SIZE;
pub use named::NamedJoin;
pub use options::{AluOptions, CompileOptions};
pub use serializer::{deserialize, serialize};
pub use shuffle::{ShuffleStage, ShuffleTable};
