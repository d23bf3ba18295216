//! Name-based join descriptions.
//!
//! Query front-ends know columns by name. [`NamedJoin`] takes the column
//! names of both relations, a key condition such as
//! `"s_suppkey = l_suppkey, s_nationkey = c_nationkey"` and payload names,
//! and resolves them into an index-based [`JoinSpec`].
//!
//! A payload that names one of its own relation's key columns resolves to
//! [`ColumnRef::DuplicateKey`]. The name `-` leaves a payload slot empty.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CompileError, Result, Side};
use crate::join::{ColumnRef, JoinMode, JoinSpec};

/// Payload name that leaves its slot unused.
pub const HOLE: &str = "-";

/// A join stage described by column names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NamedJoin {
    /// Column names of the left relation, in scan order.
    pub left_columns: Vec<String>,
    /// Column names of the right relation, in scan order.
    pub right_columns: Vec<String>,
    /// Key pairs `(left, right)`.
    #[serde(default)]
    pub keys: Vec<(String, String)>,
    /// Left payload names.
    #[serde(default)]
    pub left_payload: Vec<String>,
    /// Right payload names; [`HOLE`] marks an empty slot.
    #[serde(default)]
    pub right_payload: Vec<String>,
    /// Join mode.
    #[serde(default)]
    pub mode: JoinMode,
    /// Route matches through the aggregation stage.
    #[serde(default)]
    pub aggregate: bool,
}

fn names<I>(items: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

impl NamedJoin {
    /// Creates a join between relations with the given columns.
    pub fn new<L, R>(left_columns: L, right_columns: R) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            left_columns: names(left_columns),
            right_columns: names(right_columns),
            ..Self::default()
        }
    }

    /// Adds one key pair.
    #[must_use]
    pub fn with_key(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.keys.push((left.into(), right.into()));
        self
    }

    /// Adds the key pairs of a comma separated condition `a = b, c = d`.
    ///
    /// Either side of each equality may name the left relation's column;
    /// pairs are oriented when the join is resolved.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ExpressionSyntax`] if a pair is not of the
    /// form `name = name`.
    pub fn with_key_condition(mut self, condition: &str) -> Result<Self> {
        let mut offset = 0;
        for pair in condition.split(',') {
            let syntax = |message: &str| CompileError::ExpressionSyntax {
                expr: condition.to_string(),
                position: offset,
                message: message.to_string(),
            };
            let (a, b) = pair.split_once('=').ok_or_else(|| syntax("expected 'left = right'"))?;
            let (a, b) = (a.trim(), b.trim());
            if a.is_empty() || b.is_empty() || b.contains('=') {
                return Err(syntax("expected 'left = right'"));
            }
            self.keys.push((a.to_string(), b.to_string()));
            offset += pair.len() + 1;
        }
        Ok(self)
    }

    /// Sets the left payload names.
    #[must_use]
    pub fn with_left_payload<I>(mut self, payload: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.left_payload = names(payload);
        self
    }

    /// Sets the right payload names.
    #[must_use]
    pub fn with_right_payload<I>(mut self, payload: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.right_payload = names(payload);
        self
    }

    /// Sets the join mode.
    #[must_use]
    pub fn with_mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables or disables aggregation.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate;
        self
    }

    fn columns(&self, side: Side) -> &[String] {
        match side {
            Side::Left => &self.left_columns,
            Side::Right => &self.right_columns,
        }
    }

    fn lookup(&self, side: Side, name: &str) -> Option<u8> {
        let index = self.columns(side).iter().position(|c| c == name)?;
        u8::try_from(index).ok()
    }

    fn index_of(&self, side: Side, name: &str) -> Result<u8> {
        self.lookup(side, name).ok_or_else(|| CompileError::UnknownColumn {
            side,
            name: name.to_string(),
        })
    }

    /// Orients a key pair so that the first name belongs to the left relation.
    fn orient<'a>(&self, pair: &'a (String, String)) -> Result<(&'a str, &'a str)> {
        let (a, b) = (pair.0.as_str(), pair.1.as_str());
        if self.lookup(Side::Left, a).is_some() && self.lookup(Side::Right, b).is_some() {
            return Ok((a, b));
        }
        if self.lookup(Side::Left, b).is_some() && self.lookup(Side::Right, a).is_some() {
            return Ok((b, a));
        }
        let missing = if self.lookup(Side::Left, a).is_none() && self.lookup(Side::Left, b).is_none() {
            (Side::Left, a)
        } else {
            (Side::Right, b)
        };
        Err(CompileError::UnknownColumn {
            side: missing.0,
            name: missing.1.to_string(),
        })
    }

    fn payload(&self, side: Side, names: &[String], keys: &[&str]) -> Result<Vec<ColumnRef>> {
        names
            .iter()
            .map(|name| {
                if name == HOLE {
                    Ok(ColumnRef::Unused)
                } else if keys.contains(&name.as_str()) {
                    Ok(ColumnRef::DuplicateKey)
                } else {
                    self.index_of(side, name).map(ColumnRef::Used)
                }
            })
            .collect()
    }

    /// Resolves names into an index-based [`JoinSpec`].
    ///
    /// The result is not validated; [`JoinSpec::validate`] runs when the
    /// stage is built.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownColumn`] for a key or payload name
    /// missing from its relation.
    pub fn resolve(&self) -> Result<JoinSpec> {
        let oriented = self
            .keys
            .iter()
            .map(|pair| self.orient(pair))
            .collect::<Result<Vec<_>>>()?;
        let left_keys: Vec<&str> = oriented.iter().map(|(l, _)| *l).collect();
        let right_keys: Vec<&str> = oriented.iter().map(|(_, r)| *r).collect();

        let key_columns_left = left_keys
            .iter()
            .map(|k| self.index_of(Side::Left, k))
            .collect::<Result<Vec<_>>>()?;
        let key_columns_right = right_keys
            .iter()
            .map(|k| self.index_of(Side::Right, k))
            .collect::<Result<Vec<_>>>()?;

        let spec = JoinSpec::new(&key_columns_left, &key_columns_right)
            .with_mode(self.mode)
            .with_aggregate(self.aggregate)
            .with_left_payload(self.payload(Side::Left, &self.left_payload, &left_keys)?)
            .with_right_payload(self.payload(Side::Right, &self.right_payload, &right_keys)?);

        debug!(
            keys = ?oriented,
            left = ?spec.payload_columns_left,
            right = ?spec.payload_columns_right,
            "resolved named join"
        );
        Ok(spec)
    }
}
