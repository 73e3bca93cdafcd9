//! Unit expressions for REGIONSET/BOUNDARYSET values.
//!
//! Field values are stored in cm, s, V, A, K, C units. A unit expression is
//! a product/quotient of named units with optional integer powers, e.g.
//! `cm^-3`, `V/cm`, `A*um^-2`, `1e3*K`.

use crate::error::{SystemError, SystemResult};
use regex::Regex;

const FACTOR: &str =
    r"^\s*(?:([A-Za-z]+)(?:\^\(?(-?\d+)\)?)?|([0-9]*\.?[0-9]+(?:[eE][-+]?\d+)?))\s*$";

fn base_unit(name: &str) -> Option<f64> {
    Some(match name {
        "m" => 100.0,
        "cm" => 1.0,
        "mm" => 0.1,
        "um" => 1e-4,
        "nm" => 1e-7,
        "s" => 1.0,
        "ms" => 1e-3,
        "us" => 1e-6,
        "ns" => 1e-9,
        "ps" => 1e-12,
        "fs" => 1e-15,
        "V" => 1.0,
        "mV" => 1e-3,
        "kV" => 1e3,
        "A" => 1.0,
        "mA" => 1e-3,
        "uA" => 1e-6,
        "nA" => 1e-9,
        "K" => 1.0,
        "C" => 1.0,
        "F" => 1.0,
        "pF" => 1e-12,
        "fF" => 1e-15,
        "Ohm" | "ohm" => 1.0,
        "kOhm" => 1e3,
        "W" => 1.0,
        "eV" => 1.0,
        "J" => 1.0,
        "Hz" => 1.0,
        _ => return None,
    })
}

/// Scale factor of `expr` relative to the internal unit system.
///
/// An empty expression is dimensionless (factor 1).
pub fn unit_factor(expr: &str) -> SystemResult<f64> {
    let invalid = || SystemError::InvalidUnit {
        expr: expr.to_string(),
    };
    if expr.trim().is_empty() {
        return Ok(1.0);
    }
    let factor_re = Regex::new(FACTOR).map_err(|_| invalid())?;

    let mut value = 1.0;
    let mut divide = false;
    let mut rest = expr;
    loop {
        let (token, next, op) = match rest.find(['*', '/']) {
            Some(i) => (&rest[..i], &rest[i + 1..], Some(rest.as_bytes()[i])),
            None => (rest, "", None),
        };
        let caps = factor_re.captures(token).ok_or_else(invalid)?;
        let f = if let Some(name) = caps.get(1) {
            let base = base_unit(name.as_str()).ok_or_else(invalid)?;
            let power = match caps.get(2) {
                Some(p) => p.as_str().parse::<i32>().map_err(|_| invalid())?,
                None => 1,
            };
            base.powi(power)
        } else {
            caps.get(3)
                .and_then(|n| n.as_str().parse::<f64>().ok())
                .ok_or_else(invalid)?
        };
        if divide {
            value /= f;
        } else {
            value *= f;
        }
        match op {
            Some(b'/') => divide = true,
            Some(_) => divide = false,
            None => break,
        }
        rest = next;
    }
    if value.is_finite() && value != 0.0 {
        Ok(value)
    } else {
        Err(invalid())
    }
}

/// Length unit used for node coordinate export; mesh coordinates are in µm.
pub fn length_scale(lunit: &str) -> SystemResult<f64> {
    Ok(match lunit {
        "m" => 1e-6,
        "cm" => 1e-4,
        "um" => 1.0,
        "nm" => 1e3,
        other => {
            return Err(SystemError::InvalidUnit {
                expr: other.to_string(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a / b - 1.0).abs() < 1e-12
    }

    #[test]
    fn concentrations_and_fields() {
        assert!(close(unit_factor("cm^-3").unwrap(), 1.0));
        assert!(close(unit_factor("m^-3").unwrap(), 1e-6));
        assert!(close(unit_factor("um^-3").unwrap(), 1e12));
        assert!(close(unit_factor("V/um").unwrap(), 1e4));
        assert!(close(unit_factor("mA*um^-2").unwrap(), 1e5));
        assert!(close(unit_factor("1e3*K").unwrap(), 1e3));
        assert!(close(unit_factor("").unwrap(), 1.0));
    }

    #[test]
    fn rejects_unknown_units() {
        assert!(matches!(
            unit_factor("furlong"),
            Err(SystemError::InvalidUnit { .. })
        ));
        assert!(unit_factor("cm^x").is_err());
        assert!(unit_factor("0*cm").is_err());
    }

    #[test]
    fn length_scales() {
        assert_eq!(length_scale("um").unwrap(), 1.0);
        assert_eq!(length_scale("nm").unwrap(), 1e3);
        assert!(length_scale("mile").is_err());
    }
}
