/// Entity abstraction for ilowatch
///
/// Sensors, binary sensors and buttons all implement the Entity trait. Entities
/// hold no state of their own; `state()` reads whatever source they were built on.
use super::state::EntityState;
use super::state::Platform;

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    fn entity_id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    fn platform(&self) -> Platform;

    /// Compute the current state of this entity.
    fn state(&self) -> EntityState;
}

/// Lowercase `s` and collapse every run of non-alphanumerics into one `_`.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("01-Inlet Ambient"), "01_inlet_ambient");
        assert_eq!(slugify("Fan 1"), "fan_1");
        assert_eq!(slugify("  CPU  (2) "), "cpu_2");
        assert_eq!(slugify("rack1"), "rack1");
    }
}
