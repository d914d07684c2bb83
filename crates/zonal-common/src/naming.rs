//! Naming conventions shared between ingestion and query.

/// Unique geometry name within a (region, user): `<region>_<feature index>`.
pub fn geom_name(region: &str, index: usize) -> String {
    format!("{}_{}", region, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geom_name() {
        assert_eq!(geom_name("Mason", 0), "Mason_0");
        assert_eq!(geom_name("US_fields", 41), "US_fields_41");
    }
}
