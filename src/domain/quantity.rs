//! Kubernetes quantity helpers
//!
//! Converts `resource.Quantity` strings (`16Ti`, `512Mi`, `1.5G`, `100m`)
//! into byte counts and compares JSON documents with quantities treated by
//! value rather than by spelling.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::Value;
use tracing::warn;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Parse a quantity string into its integral value, rounding up like
/// `Quantity.Value()` does.
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::QuantityParse("empty quantity string".into()));
    }

    // Find where the number ends and the suffix begins
    let mut num_end = 0;
    for (i, c) in s.char_indices() {
        if !c.is_ascii_digit() && c != '.' && !(i == 0 && (c == '+' || c == '-')) {
            num_end = i;
            break;
        }
        num_end = i + 1;
    }

    let num_str = &s[..num_end];
    let suffix = &s[num_end..];

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::QuantityParse(format!("invalid number: {}", s)))?;
    if num < 0.0 {
        return Err(Error::QuantityParse(format!("negative quantity: {}", s)));
    }

    let multiplier: f64 = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => KIB as f64,
        "Mi" => MIB as f64,
        "Gi" => GIB as f64,
        "Ti" => TIB as f64,
        "Pi" => (TIB * 1024) as f64,
        "Ei" => (TIB * 1024 * 1024) as f64,
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let power: i32 = exp[1..]
                .parse()
                .map_err(|_| Error::QuantityParse(format!("invalid exponent: {}", s)))?;
            10f64.powi(power)
        }
        _ => return Err(Error::QuantityParse(format!("unknown suffix: {}", s))),
    };

    Ok((num * multiplier).ceil() as u64)
}

/// Value of an optional quantity, zero when unset or unparsable
pub fn quantity_value(q: Option<&Quantity>) -> u64 {
    match q {
        None => 0,
        Some(q) => match parse_quantity(&q.0) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring quantity '{}': {}", q.0, e);
                0
            }
        },
    }
}

/// Human readable binary byte count (`1.5 GiB`) used in log lines
pub fn byte_count_binary(bytes: u64) -> String {
    if bytes < KIB {
        return format!("{} B", bytes);
    }
    let units = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut value = bytes as f64 / KIB as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < units.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{:.1} {}", value, units[idx])
}

/// Deep equality of two JSON documents where any pair of strings that both
/// parse as quantities compare by value.
pub fn semantically_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            let keys = x.keys().chain(y.keys());
            for key in keys {
                let left = x.get(key).unwrap_or(&Value::Null);
                let right = y.get(key).unwrap_or(&Value::Null);
                if !semantically_equal(left, right) {
                    return false;
                }
            }
            true
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| semantically_equal(l, r))
        }
        (Value::String(x), Value::String(y)) => {
            if x == y {
                return true;
            }
            match (parse_quantity(x), parse_quantity(y)) {
                (Ok(l), Ok(r)) => l == r,
                _ => false,
            }
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_binary_suffixes() {
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("512Mi").unwrap(), 512 * MIB);
        assert_eq!(parse_quantity("16Ti").unwrap(), 16 * TIB);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), GIB + GIB / 2);
    }

    #[test]
    fn test_parse_decimal_suffixes() {
        assert_eq!(parse_quantity("1k").unwrap(), 1000);
        assert_eq!(parse_quantity("8T").unwrap(), 8_000_000_000_000);
        assert_eq!(parse_quantity("100m").unwrap(), 1);
        assert_eq!(parse_quantity("1e3").unwrap(), 1000);
        assert_eq!(parse_quantity("4096").unwrap(), 4096);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("12XB").is_err());
        assert!(parse_quantity("abc").is_err());
    }

    #[test]
    fn test_quantity_value_defaults_to_zero() {
        assert_eq!(quantity_value(None), 0);
        assert_eq!(quantity_value(Some(&Quantity("bogus".into()))), 0);
        assert_eq!(quantity_value(Some(&Quantity("2Gi".into()))), 2 * GIB);
    }

    #[test]
    fn test_byte_count_binary() {
        assert_eq!(byte_count_binary(512), "512 B");
        assert_eq!(byte_count_binary(GIB + GIB / 2), "1.5 GiB");
        assert_eq!(byte_count_binary(8 * TIB), "8.0 TiB");
    }

    #[test]
    fn test_semantic_equality() {
        let a = json!({"resources": {"limits": {"memory": "1Gi"}}, "instances": 1});
        let b = json!({"resources": {"limits": {"memory": "1024Mi"}}, "instances": 1});
        assert!(semantically_equal(&a, &b));

        let c = json!({"resources": {"limits": {"memory": "2Gi"}}, "instances": 1});
        assert!(!semantically_equal(&a, &c));

        let d = json!({"s3type": "s3"});
        let e = json!({"s3type": "s3s"});
        assert!(!semantically_equal(&d, &e));

        let f = json!({"instances": 1, "relaxedDirUpdates": null});
        let g = json!({"instances": 1});
        assert!(semantically_equal(&f, &g));
    }
}
