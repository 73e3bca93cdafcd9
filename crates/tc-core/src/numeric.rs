use crate::TcError;

/// Floating point type used throughout system
pub type Real = f64;

/// Absolute/relative tolerance pair
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, TcError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(TcError::NonFinite { what, value: v })
    }
}

/// Exponential that continues linearly above `max_arg`, keeping diode
/// characteristics finite under large Newton excursions.
pub fn limited_exp(arg: Real, max_arg: Real) -> Real {
    if arg <= max_arg {
        arg.exp()
    } else {
        let e = max_arg.exp();
        e * (1.0 + arg - max_arg)
    }
}

/// Derivative of [`limited_exp`] with respect to `arg`.
pub fn limited_exp_deriv(arg: Real, max_arg: Real) -> Real {
    if arg <= max_arg {
        arg.exp()
    } else {
        max_arg.exp()
    }
}

/// Values `start, start*factor, ...` not exceeding `stop` (with a small
/// relative slack so that `stop` itself survives rounding).
pub fn geometric_series(start: Real, stop: Real, factor: Real) -> Vec<Real> {
    let mut out = Vec::new();
    if start <= 0.0 || factor <= 1.0 || !start.is_finite() || !stop.is_finite() {
        return out;
    }
    let limit = stop * (1.0 + 1e-9);
    let mut k = 0_i32;
    loop {
        let v = start * factor.powi(k);
        if v > limit {
            break;
        }
        out.push(v);
        k += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nearly_equal_basic() {
        let tol = Tolerances {
            abs: 1e-12,
            rel: 1e-9,
        };
        assert!(nearly_equal(1.0, 1.0 + 1e-12, tol));
        assert!(nearly_equal(0.0, 1e-13, tol));
        assert!(!nearly_equal(1.0, 1.0 + 1e-6, tol));
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(Real::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn geometric_series_hits_decades() {
        let f = geometric_series(1e6, 1e9, 10.0);
        assert_eq!(f.len(), 4);
        assert!(nearly_equal(f[3], 1e9, Tolerances::default()));
    }

    #[test]
    fn geometric_series_rejects_bad_factor() {
        assert!(geometric_series(1.0, 10.0, 1.0).is_empty());
        assert!(geometric_series(0.0, 10.0, 2.0).is_empty());
    }

    proptest! {
        #[test]
        fn limited_exp_is_continuous_and_monotone(a in -50.0f64..60.0, d in 0.0f64..5.0) {
            let m = 40.0;
            prop_assert!(limited_exp(a + d, m) >= limited_exp(a, m));
            prop_assert!(limited_exp(a, m).is_finite());
            prop_assert!(limited_exp_deriv(a, m) > 0.0);
        }
    }
}
