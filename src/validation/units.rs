//! Unit normalization to the canonical unit of each category.

/// Canonical unit a category is normalized to.
pub fn canonical_unit(category: &str) -> Option<&'static str> {
    match category {
        "temperature" => Some("°C"),
        "power" => Some("W"),
        "energy" => Some("kWh"),
        "pressure" => Some("hPa"),
        _ => None,
    }
}

/// Convert `value` from `unit` into the category's canonical unit.
///
/// Returns `None` when the category has no canonical unit, the unit is
/// unknown, or the value is already canonical.
pub fn normalize(value: f64, unit: &str, category: &str) -> Option<f64> {
    let converted = match (category, unit) {
        ("temperature", "°F" | "F") => (value - 32.0) * 5.0 / 9.0,
        ("temperature", "K") => value - 273.15,
        ("power", "kW") => value * 1_000.0,
        ("power", "MW") => value * 1_000_000.0,
        ("energy", "Wh") => value / 1_000.0,
        ("energy", "MWh") => value * 1_000.0,
        ("pressure", "Pa") => value / 100.0,
        ("pressure", "psi") => value * 68.9476,
        ("pressure", "inHg") => value * 33.8639,
        // mbar is numerically identical to hPa
        _ => return None,
    };
    Some(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_temperature_conversion() {
        assert!(close(normalize(212.0, "°F", "temperature").unwrap(), 100.0));
        assert!(close(normalize(273.15, "K", "temperature").unwrap(), 0.0));
        assert_eq!(normalize(21.0, "°C", "temperature"), None);
    }

    #[test]
    fn test_power_energy_pressure_conversion() {
        assert!(close(normalize(1.5, "kW", "power").unwrap(), 1500.0));
        assert!(close(normalize(2500.0, "Wh", "energy").unwrap(), 2.5));
        assert!(close(normalize(101_325.0, "Pa", "pressure").unwrap(), 1013.25));
        assert_eq!(normalize(1013.0, "mbar", "pressure"), None);
    }

    #[test]
    fn test_unknown_category_is_untouched() {
        assert_eq!(normalize(5.0, "kW", "humidity"), None);
        assert_eq!(canonical_unit("humidity"), None);
        assert_eq!(canonical_unit("energy"), Some("kWh"));
    }
}
