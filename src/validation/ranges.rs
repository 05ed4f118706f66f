//! Plausibility ranges per category and category inference.

/// Inclusive plausible range for a category, `None` for unknown categories.
pub fn range_for(category: &str) -> Option<(f64, f64)> {
    let range = match category {
        "temperature" => (-100.0, 200.0),
        "humidity" => (0.0, 100.0),
        "pressure" => (0.0, 2000.0),
        "battery" => (0.0, 100.0),
        "brightness" => (0.0, 255.0),
        "volume_level" => (0.0, 1.0),
        "pm25" => (0.0, 1000.0),
        "pm10" => (0.0, 1000.0),
        "carbon_dioxide" => (0.0, 10_000.0),
        "aqi" => (0.0, 500.0),
        "illuminance" => (0.0, 200_000.0),
        "power" => (-50_000.0, 50_000.0),
        "energy" => (0.0, 1_000_000.0),
        "voltage" => (0.0, 500.0),
        "current" => (0.0, 100.0),
        "power_factor" => (-1.0, 1.0),
        _ => return None,
    };
    Some(range)
}

/// Guess a category from a source attribute name.
///
/// Matching is by substring and first match wins, so `power_factor` infers
/// `power`. Callers that know the exact category should pass it instead.
pub fn infer_category(attribute: &str) -> Option<&'static str> {
    const RULES: &[(&str, &str)] = &[
        ("temp", "temperature"),
        ("humid", "humidity"),
        ("power", "power"),
        ("energy", "energy"),
        ("voltage", "voltage"),
        ("current", "current"),
        ("battery", "battery"),
        ("brightness", "brightness"),
        ("volume", "volume_level"),
    ];

    let attribute = attribute.to_lowercase();
    RULES
        .iter()
        .find(|(needle, _)| attribute.contains(needle))
        .map(|(_, category)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_table() {
        assert_eq!(range_for("temperature"), Some((-100.0, 200.0)));
        assert_eq!(range_for("power_factor"), Some((-1.0, 1.0)));
        assert_eq!(range_for("carbon_dioxide"), Some((0.0, 10_000.0)));
        assert_eq!(range_for("wind_speed"), None);
    }

    #[test]
    fn test_infer_category() {
        assert_eq!(infer_category("current_temperature"), Some("temperature"));
        assert_eq!(infer_category("Humidity"), Some("humidity"));
        assert_eq!(infer_category("battery_level"), Some("battery"));
        assert_eq!(infer_category("volume"), Some("volume_level"));
        assert_eq!(infer_category("friendly_name"), None);
    }
}
