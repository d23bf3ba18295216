//! Folding of expression trees into a canonical polynomial.
//!
//! [`fold`] expands products and collects like terms, so every spelling of
//! the same arithmetic (`strm1*(c2-strm2)`, `-strm1*strm2+c2*strm1`, ...)
//! folds to the same [`Poly`]. Shape matching compares polynomials, never
//! trees.
//!
//! Products are refused once their degree passes a caller-supplied limit,
//! so the size of every intermediate polynomial stays bounded by the
//! shape table rather than by the nesting of the input.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use smallvec::SmallVec;

use super::parser::{Ast, Symbol};

/// A product of symbols, kept sorted.
pub type Monomial = SmallVec<[Symbol; 2]>;

/// A polynomial with integer coefficients over expression symbols.
///
/// Zero coefficients are never stored, so structural equality is
/// mathematical equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Poly {
    terms: BTreeMap<Monomial, i64>,
}

impl Poly {
    fn symbol(symbol: Symbol) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(SmallVec::from_slice(&[symbol]), 1);
        Self { terms }
    }

    /// Returns `true` for the zero polynomial.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms in canonical order.
    pub fn terms(&self) -> impl Iterator<Item = (&Monomial, i64)> {
        self.terms.iter().map(|(m, c)| (m, *c))
    }

    /// Highest monomial degree.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.terms.keys().map(SmallVec::len).max().unwrap_or(0)
    }

    /// Distinct symbols in canonical order.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        self.terms.keys().flatten().copied().collect()
    }

    fn accumulate(&mut self, monomial: Monomial, coefficient: i64) -> Option<()> {
        let sum = self
            .terms
            .get(&monomial)
            .copied()
            .unwrap_or(0)
            .checked_add(coefficient)?;
        if sum == 0 {
            self.terms.remove(&monomial);
        } else {
            self.terms.insert(monomial, sum);
        }
        Some(())
    }

    fn add(mut self, rhs: &Self) -> Option<Self> {
        for (m, c) in &rhs.terms {
            self.accumulate(m.clone(), *c)?;
        }
        Some(self)
    }

    fn neg(mut self) -> Option<Self> {
        for c in self.terms.values_mut() {
            *c = c.checked_neg()?;
        }
        Some(self)
    }

    fn mul(&self, rhs: &Self) -> Option<Self> {
        let mut out = Self::default();
        for (lm, lc) in &self.terms {
            for (rm, rc) in &rhs.terms {
                let mut m: Monomial = lm.iter().chain(rm.iter()).copied().collect();
                m.sort_unstable();
                out.accumulate(m, lc.checked_mul(*rc)?)?;
            }
        }
        Some(out)
    }

    /// Renames symbols through `map`. Symbols missing from `map` are kept.
    #[must_use]
    pub fn substitute(&self, map: &BTreeMap<Symbol, Symbol>) -> Self {
        let mut out = Self::default();
        for (m, c) in &self.terms {
            let mut renamed: Monomial = m.iter().map(|s| *map.get(s).unwrap_or(s)).collect();
            renamed.sort_unstable();
            // Overflow on a collision yields zero, which matches no shape.
            if out.accumulate(renamed, *c).is_none() {
                out.terms.clear();
                return out;
            }
        }
        out
    }
}

impl fmt::Display for Poly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("0");
        }
        for (i, (m, c)) in self.terms.iter().enumerate() {
            let (sign, abs) = if *c < 0 { ("-", c.unsigned_abs()) } else { ("+", c.unsigned_abs()) };
            match (i, sign) {
                (0, "-") => f.write_str("-")?,
                (0, _) => {}
                _ => write!(f, " {sign} ")?,
            }
            if abs != 1 {
                write!(f, "{abs}*")?;
            }
            for (j, s) in m.iter().enumerate() {
                if j > 0 {
                    f.write_str("*")?;
                }
                write!(f, "{s}")?;
            }
        }
        Ok(())
    }
}

/// Why an expression tree has no polynomial form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldError {
    /// A coefficient left the `i64` range.
    Overflow,
    /// A product would exceed the degree limit.
    DegreeLimit {
        /// Degree of the refused product.
        degree: usize,
        /// Highest degree allowed.
        limit: usize,
    },
}

impl fmt::Display for FoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => f.write_str("coefficient overflow"),
            Self::DegreeLimit { degree, limit } => {
                write!(f, "product of degree {degree} exceeds the shape table limit of {limit}")
            }
        }
    }
}

/// Folds an expression tree into its canonical polynomial.
///
/// # Errors
///
/// Returns [`FoldError::DegreeLimit`] as soon as a product would have a
/// degree above `max_degree`, and [`FoldError::Overflow`] if a coefficient
/// overflows `i64`.
pub fn fold(ast: &Ast, max_degree: usize) -> Result<Poly, FoldError> {
    match ast {
        Ast::Symbol(s) => Ok(Poly::symbol(*s)),
        Ast::Neg(inner) => fold(inner, max_degree)?.neg().ok_or(FoldError::Overflow),
        Ast::Add(l, r) => fold_binary(l, r, BinaryOp::Add, max_degree),
        Ast::Sub(l, r) => fold_binary(l, r, BinaryOp::Sub, max_degree),
        Ast::Mul(l, r) => fold_binary(l, r, BinaryOp::Mul, max_degree),
    }
}

#[derive(Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
}

/// Folds both children first, then combines them.
fn fold_binary(left: &Ast, right: &Ast, op: BinaryOp, max_degree: usize) -> Result<Poly, FoldError> {
    let left = fold(left, max_degree)?;
    let right = fold(right, max_degree)?;
    let combined = match op {
        BinaryOp::Add => left.add(&right),
        BinaryOp::Sub => right.neg().and_then(|r| left.add(&r)),
        BinaryOp::Mul => {
            let degree = left.degree() + right.degree();
            if degree > max_degree {
                return Err(FoldError::DegreeLimit {
                    degree,
                    limit: max_degree,
                });
            }
            left.mul(&right)
        }
    };
    combined.ok_or(FoldError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::{parse, Vocabulary};

    fn poly(src: &str) -> Poly {
        fold(&parse(src, Vocabulary::Expression).unwrap(), 4).unwrap()
    }

    #[test]
    fn spellings_fold_together() {
        let canonical = poly("strm1*(-strm2+c2)");
        assert_eq!(canonical, poly("strm1*(c2-strm2)"));
        assert_eq!(canonical, poly("c2*strm1 - strm2*strm1"));
        assert_eq!(canonical, poly("-(strm2-c2)*strm1"));
        assert_ne!(canonical, poly("strm1*(strm2-c2)"));
    }

    #[test]
    fn like_terms_cancel() {
        assert!(poly("strm1-strm1").is_zero());
        assert_eq!(poly("strm1+strm2-strm1"), poly("strm2"));
        assert_eq!(poly("strm1+strm1").terms().next().map(|(_, c)| c), Some(2));
    }

    #[test]
    fn degree_and_symbols() {
        let p = poly("strm1*(-strm2+c2)");
        assert_eq!(p.degree(), 2);
        let symbols: Vec<_> = p.symbols().into_iter().collect();
        assert_eq!(
            symbols,
            vec![Symbol::Stream(1), Symbol::Stream(2), Symbol::Const(2)]
        );
        assert_eq!(poly("strm1*(strm2*strm3)").degree(), 3);
    }

    #[test]
    fn substitution_renames() {
        let pattern = fold(&parse("a*(k-b)", Vocabulary::Pattern).unwrap(), 2).unwrap();
        let map = BTreeMap::from([
            (Symbol::Stream(0), Symbol::Stream(1)),
            (Symbol::Stream(1), Symbol::Stream(2)),
            (Symbol::Const(0), Symbol::Const(2)),
        ]);
        assert_eq!(pattern.substitute(&map), poly("strm1*(-strm2+c2)"));
    }

    #[test]
    fn products_past_the_degree_limit_are_refused() {
        let ast = parse("strm1*(strm2*(strm3*strm4))", Vocabulary::Expression).unwrap();
        assert_eq!(
            fold(&ast, 3).unwrap_err(),
            FoldError::DegreeLimit {
                degree: 4,
                limit: 3,
            }
        );
        assert_eq!(fold(&ast, 4).unwrap().degree(), 4);

        // Sums keep the degree of their widest term.
        let ast = parse("strm1*strm2 + strm3*strm4 - c1*c2", Vocabulary::Expression).unwrap();
        assert_eq!(fold(&ast, 2).unwrap().degree(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(poly("strm1*(-strm2+c2)").to_string(), "-strm1*strm2 + strm1*c2");
        assert_eq!(poly("strm1+strm1-c1").to_string(), "2*strm1 - c1");
        assert_eq!(poly("c1-c1").to_string(), "0");
    }
}
