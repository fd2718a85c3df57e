//! Affine expressions over named induction indices.
//!
//! An affine expression is an integer-linear combination of named variables
//! plus a constant: `aff = c0 + c1*i + c2*j + ...`. The constant term is
//! stored in the term map under the empty name, and zero coefficients are
//! pruned, so structural equality is canonical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg};

/// An affine expression keyed by variable name.
///
/// The empty name holds the constant term. Terms with coefficient zero are
/// never stored, so `Affine::default()` is the zero expression and `==` is
/// structural equality on canonical forms.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Affine {
    terms: BTreeMap<String, i64>,
}

impl Affine {
    /// Create a constant expression.
    pub fn constant(value: i64) -> Self {
        Self::term("", value)
    }

    /// Create a single-variable expression with coefficient 1.
    pub fn var(name: impl Into<String>) -> Self {
        Self::term(name, 1)
    }

    /// Create a single-term expression `coef * name`.
    pub fn term(name: impl Into<String>, coef: i64) -> Self {
        let mut terms = BTreeMap::new();
        if coef != 0 {
            terms.insert(name.into(), coef);
        }
        Self { terms }
    }

    /// Check whether this is the zero expression.
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// The constant term.
    pub fn constant_term(&self) -> i64 {
        self.coeff("")
    }

    /// Coefficient for a variable (0 if absent). The empty name queries the
    /// constant term.
    pub fn coeff(&self, name: &str) -> i64 {
        self.terms.get(name).copied().unwrap_or(0)
    }

    /// Ordered view of all terms, constant (empty name) included.
    pub fn map(&self) -> &BTreeMap<String, i64> {
        &self.terms
    }

    /// Names of the variables with nonzero coefficients.
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str).filter(|n| !n.is_empty())
    }

    /// Add `coef * name` in place, pruning the term if it cancels.
    pub fn add_term(&mut self, name: &str, coef: i64) {
        if coef == 0 {
            return;
        }
        let slot = self.terms.entry(name.to_string()).or_insert(0);
        *slot += coef;
        if *slot == 0 {
            self.terms.remove(name);
        }
    }

    /// Replace a variable by an affine expression.
    ///
    /// `subst(i, 2*o + p)` turns `3*i + j` into `6*o + 3*p + j`. A variable
    /// not present leaves the expression unchanged.
    pub fn substitute(&mut self, var: &str, replacement: &Affine) {
        let Some(coef) = self.terms.remove(var) else {
            return;
        };
        *self += replacement.clone() * coef;
    }
}

impl Add for Affine {
    type Output = Affine;

    fn add(mut self, rhs: Affine) -> Affine {
        self += rhs;
        self
    }
}

impl AddAssign for Affine {
    fn add_assign(&mut self, rhs: Affine) {
        for (name, coef) in rhs.terms {
            self.add_term(&name, coef);
        }
    }
}

impl Mul<i64> for Affine {
    type Output = Affine;

    fn mul(mut self, factor: i64) -> Affine {
        if factor == 0 {
            self.terms.clear();
            return self;
        }
        for coef in self.terms.values_mut() {
            *coef *= factor;
        }
        self
    }
}

impl Neg for Affine {
    type Output = Affine;

    fn neg(self) -> Affine {
        self * -1
    }
}

impl From<i64> for Affine {
    fn from(value: i64) -> Self {
        Affine::constant(value)
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let mut parts = Vec::with_capacity(self.terms.len());
        for (name, &coef) in &self.terms {
            if name.is_empty() {
                parts.push(format!("{}", coef));
            } else if coef == 1 {
                parts.push(name.clone());
            } else if coef == -1 {
                parts.push(format!("-{}", name));
            } else {
                parts.push(format!("{}*{}", coef, name));
            }
        }
        write!(f, "{}", parts.join(" + ").replace("+ -", "- "))
    }
}
