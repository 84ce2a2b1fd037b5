//! Values with standard error.
//!
//! [`Uncertain`] carries a sample mean together with its standard error and
//! propagates the error through arithmetic:
//!
//! - `*` and `/` combine relative errors in quadrature
//! - `+` and `-` combine absolute errors in quadrature
//! - comparisons are conservative: `a > b` only when the intervals
//!   `[a - ea, a + ea]` and `[b - eb, b + eb]` do not overlap
//!
//! Because of the last rule `Uncertain` is only `PartialOrd`; two close
//! values are simply unordered.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Errors raised by uncertainty arithmetic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UncertainError {
    #[error("cannot aggregate an empty sample")]
    EmptyInput,

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

/// A measured value and its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Uncertain {
    pub value: f64,
    pub error: f64,
}

/// Right-hand side of [`Uncertain::pow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Scalar(f64),
    Uncertain(Uncertain),
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Scalar(v)
    }
}

impl From<Uncertain> for Operand {
    fn from(v: Uncertain) -> Self {
        Operand::Uncertain(v)
    }
}

impl Uncertain {
    pub const fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// An exact value (zero error).
    pub const fn exact(value: f64) -> Self {
        Self { value, error: 0.0 }
    }

    /// Sample mean with standard error `stdev / sqrt(n)` (population stdev).
    pub fn from_samples(xs: &[f64]) -> Result<Self, UncertainError> {
        if xs.is_empty() {
            return Err(UncertainError::EmptyInput);
        }
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Ok(Self::new(mean, var.sqrt() / n.sqrt()))
    }

    /// Raise to a scalar power. Raising to an uncertain power fails with
    /// [`UncertainError::UnsupportedOperation`].
    pub fn pow(self, exponent: impl Into<Operand>) -> Result<Self, UncertainError> {
        match exponent.into() {
            Operand::Scalar(p) => Ok(self.powf(p)),
            Operand::Uncertain(_) => Err(UncertainError::UnsupportedOperation(
                "power by an uncertain exponent",
            )),
        }
    }

    /// Raise to a scalar power.
    pub fn powf(self, p: f64) -> Self {
        let value = self.value.powf(p);
        let error = if self.error == 0.0 {
            0.0
        } else {
            value.abs() * p.abs() * self.error / self.value.abs()
        };
        Self::new(value, error)
    }

    /// Lower edge of the one-sigma interval.
    pub fn low(&self) -> f64 {
        self.value - self.error
    }

    /// Upper edge of the one-sigma interval.
    pub fn high(&self) -> f64 {
        self.value + self.error
    }
}

impl fmt::Display for Uncertain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} +/- {:.2}", self.value, self.error)
    }
}

impl Mul for Uncertain {
    type Output = Uncertain;

    fn mul(self, rhs: Uncertain) -> Uncertain {
        // |ab| * sqrt((ea/a)^2 + (eb/b)^2), rearranged to stay finite at zero.
        let value = self.value * rhs.value;
        let error = ((self.error * rhs.value).powi(2) + (rhs.error * self.value).powi(2)).sqrt();
        Uncertain::new(value, error)
    }
}

impl Mul<f64> for Uncertain {
    type Output = Uncertain;

    fn mul(self, rhs: f64) -> Uncertain {
        Uncertain::new(self.value * rhs, (self.error * rhs).abs())
    }
}

impl Mul<Uncertain> for f64 {
    type Output = Uncertain;

    fn mul(self, rhs: Uncertain) -> Uncertain {
        rhs * self
    }
}

impl Div for Uncertain {
    type Output = Uncertain;

    fn div(self, rhs: Uncertain) -> Uncertain {
        self * rhs.powf(-1.0)
    }
}

impl Div<f64> for Uncertain {
    type Output = Uncertain;

    fn div(self, rhs: f64) -> Uncertain {
        self * rhs.powf(-1.0)
    }
}

impl Div<Uncertain> for f64 {
    type Output = Uncertain;

    fn div(self, rhs: Uncertain) -> Uncertain {
        rhs.powf(-1.0) * self
    }
}

impl Add for Uncertain {
    type Output = Uncertain;

    fn add(self, rhs: Uncertain) -> Uncertain {
        Uncertain::new(self.value + rhs.value, self.error.hypot(rhs.error))
    }
}

impl Add<f64> for Uncertain {
    type Output = Uncertain;

    fn add(self, rhs: f64) -> Uncertain {
        Uncertain::new(self.value + rhs, self.error)
    }
}

impl Sub for Uncertain {
    type Output = Uncertain;

    fn sub(self, rhs: Uncertain) -> Uncertain {
        self + (-rhs)
    }
}

impl Sub<f64> for Uncertain {
    type Output = Uncertain;

    fn sub(self, rhs: f64) -> Uncertain {
        self + (-rhs)
    }
}

impl Neg for Uncertain {
    type Output = Uncertain;

    fn neg(self) -> Uncertain {
        self * -1.0
    }
}

impl PartialOrd for Uncertain {
    fn partial_cmp(&self, other: &Uncertain) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.low() > other.high() {
            Some(Ordering::Greater)
        } else if self.high() < other.low() {
            Some(Ordering::Less)
        } else {
            None
        }
    }
}

impl PartialEq<f64> for Uncertain {
    fn eq(&self, other: &f64) -> bool {
        self.value == *other && self.error == 0.0
    }
}

impl PartialOrd<f64> for Uncertain {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.partial_cmp(&Uncertain::exact(*other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn multiply_combines_relative_errors() {
        let p = Uncertain::new(5.0, 1.0) * Uncertain::new(2.0, 0.0);
        assert_eq!(p, Uncertain::new(10.0, 2.0));

        let q = Uncertain::new(3.0, 0.3) * Uncertain::new(4.0, 0.4);
        // relative errors 10% and 10% -> 10*sqrt(2)%
        assert!(close(q.value, 12.0));
        assert!(close(q.error, 12.0 * 0.1 * 2f64.sqrt()));
    }

    #[test]
    fn multiply_by_zero_valued_operand_stays_finite() {
        let p = Uncertain::new(0.0, 0.5) * Uncertain::new(2.0, 0.1);
        assert_eq!(p.value, 0.0);
        assert!(close(p.error, 1.0));
    }

    #[test]
    fn scalar_multiply_scales_error() {
        let p = Uncertain::new(2.0, 0.5) * -3.0;
        assert_eq!(p, Uncertain::new(-6.0, 1.5));
        assert_eq!(-3.0 * Uncertain::new(2.0, 0.5), p);
    }

    #[test]
    fn add_and_sub_combine_absolute_errors() {
        let s = Uncertain::new(1.0, 3.0) + Uncertain::new(2.0, 4.0);
        assert_eq!(s, Uncertain::new(3.0, 5.0));

        let d = Uncertain::new(1.0, 3.0) - Uncertain::new(2.0, 4.0);
        assert_eq!(d, Uncertain::new(-1.0, 5.0));

        assert_eq!(Uncertain::new(1.0, 0.2) + 1.0, Uncertain::new(2.0, 0.2));
    }

    #[test]
    fn negation_keeps_error_positive() {
        assert_eq!(-Uncertain::new(4.0, 0.5), Uncertain::new(-4.0, 0.5));
    }

    #[test]
    fn division_is_multiplication_by_reciprocal() {
        let q = Uncertain::new(10.0, 1.0) / Uncertain::new(2.0, 0.0);
        assert!(close(q.value, 5.0));
        assert!(close(q.error, 0.5));

        let r = 10.0 / Uncertain::new(5.0, 0.5);
        assert!(close(r.value, 2.0));
        assert!(close(r.error, 0.2));
    }

    #[test]
    fn pow_by_scalar() {
        let p = Uncertain::new(3.0, 0.3).pow(2.0).unwrap();
        assert!(close(p.value, 9.0));
        assert!(close(p.error, 9.0 * 2.0 * 0.1));
    }

    #[test]
    fn pow_by_uncertain_is_unsupported() {
        let err = Uncertain::new(3.0, 0.3)
            .pow(Uncertain::new(2.0, 0.1))
            .unwrap_err();
        assert!(matches!(err, UncertainError::UnsupportedOperation(_)));
    }

    #[test]
    fn from_samples_constant_has_no_error() {
        let u = Uncertain::from_samples(&[10.0, 10.0, 10.0]).unwrap();
        assert_eq!(u, Uncertain::new(10.0, 0.0));
    }

    #[test]
    fn from_samples_standard_error() {
        let u = Uncertain::from_samples(&[1.0, 3.0]).unwrap();
        assert!(close(u.value, 2.0));
        // stdev 1, n 2
        assert!(close(u.error, 1.0 / 2f64.sqrt()));
    }

    #[test]
    fn from_samples_empty_fails() {
        assert_eq!(
            Uncertain::from_samples(&[]).unwrap_err(),
            UncertainError::EmptyInput
        );
    }

    #[test]
    fn ordering_requires_disjoint_intervals() {
        assert!(Uncertain::new(10.0, 1.0) > Uncertain::new(5.0, 1.0));
        assert!(Uncertain::new(5.0, 1.0) < Uncertain::new(10.0, 1.0));
        assert!(!(Uncertain::new(10.0, 1.0) > Uncertain::new(10.5, 1.0)));
        assert!(!(Uncertain::new(10.5, 1.0) > Uncertain::new(10.0, 1.0)));
        assert!(Uncertain::new(10.0, 1.0)
            .partial_cmp(&Uncertain::new(10.5, 1.0))
            .is_none());
    }

    #[test]
    fn ordering_against_scalar() {
        assert!(Uncertain::new(0.5, 0.1) > 0.3);
        assert!(!(Uncertain::new(0.35, 0.1) > 0.3));
        assert!(Uncertain::new(0.1, 0.05) < 0.3);
    }

    #[test]
    fn display_two_decimals() {
        assert_eq!(Uncertain::new(1.234, 0.056).to_string(), "1.23 +/- 0.06");
    }
}
