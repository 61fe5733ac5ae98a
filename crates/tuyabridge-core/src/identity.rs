//! Identity mapping between display names, topic identifiers and native ids.
//!
//! The identifier ("slug") is the topic path segment.  It is derived from the
//! display name alone, so it survives restarts and re-ordering of the
//! devices file.  [`IdentityMap`] keeps the identifier ↔ device id relation a
//! bijection: a record whose identifier or device id is already taken is
//! refused and the first holder keeps it.

use std::collections::HashMap;

use tuyabridge_types::{BridgeError, DeviceConfig};
use unicode_normalization::UnicodeNormalization;

/// Derive the topic identifier from a display name.
///
/// Accents are stripped (NFKD, then non-ASCII dropped), every run of
/// characters outside `[A-Za-z0-9_-]` becomes one `_`, the result is
/// lowercased and leading/trailing underscores are trimmed.  Never fails;
/// names made only of stripped characters yield an empty string.
///
/// ```
/// use tuyabridge_core::identity::derive_identifier;
///
/// assert_eq!(derive_identifier("Kitchen Lamp"), "kitchen_lamp");
/// assert_eq!(derive_identifier("Lampe Salle à manger"), "lampe_salle_a_manger");
/// ```
pub fn derive_identifier(display_name: &str) -> String {
    let ascii: String = display_name.nfkd().filter(char::is_ascii).collect();

    let mut out = String::with_capacity(ascii.len());
    let mut in_run = false;
    for c in ascii.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Bidirectional identifier ↔ native device id table.
#[derive(Debug, Default)]
pub struct IdentityMap {
    by_identifier: HashMap<String, String>,
    by_device: HashMap<String, String>,
    // Registration order, for stable topic listings.
    order: Vec<String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the identifier for `cfg` and check that it can be accepted,
    /// without recording anything.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidIdentifier`] when the name yields an empty identifier.
    /// - [`BridgeError::DuplicateIdentifier`] when another device already holds it.
    /// - [`BridgeError::DuplicateDevice`] when the native id is already mapped.
    pub fn check(&self, cfg: &DeviceConfig) -> Result<String, BridgeError> {
        let identifier = derive_identifier(&cfg.name);
        if identifier.is_empty() {
            return Err(BridgeError::InvalidIdentifier {
                name: cfg.name.clone(),
                device_id: cfg.id.clone(),
            });
        }
        if self.by_identifier.contains_key(&identifier) {
            return Err(BridgeError::DuplicateIdentifier {
                identifier,
                device_id: cfg.id.clone(),
            });
        }
        if self.by_device.contains_key(&cfg.id) {
            return Err(BridgeError::DuplicateDevice(cfg.id.clone()));
        }
        Ok(identifier)
    }

    /// Record a pair previously validated with [`IdentityMap::check`].
    pub fn record(&mut self, identifier: String, device_id: String) {
        self.by_device.insert(device_id.clone(), identifier.clone());
        self.by_identifier.insert(identifier.clone(), device_id);
        self.order.push(identifier);
    }

    /// [`check`](IdentityMap::check) followed by [`record`](IdentityMap::record).
    pub fn register(&mut self, cfg: &DeviceConfig) -> Result<String, BridgeError> {
        let identifier = self.check(cfg)?;
        self.record(identifier.clone(), cfg.id.clone());
        Ok(identifier)
    }

    pub fn device_for(&self, identifier: &str) -> Option<&str> {
        self.by_identifier.get(identifier).map(String::as_str)
    }

    pub fn identifier_for(&self, device_id: &str) -> Option<&str> {
        self.by_device.get(device_id).map(String::as_str)
    }

    /// Accepted identifiers in registration order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: &str) -> DeviceConfig {
        DeviceConfig::new(id, "10.0.0.2", "0123456789abcdef", name)
    }

    #[test]
    fn derive_basic_names() {
        assert_eq!(derive_identifier("Kitchen Lamp"), "kitchen_lamp");
        assert_eq!(derive_identifier("kitchen_lamp "), "kitchen_lamp");
        assert_eq!(derive_identifier("  Living-Room  Plug #2 "), "living-room_plug_2");
        assert_eq!(derive_identifier("__draft__"), "draft");
    }

    #[test]
    fn derive_strips_diacritics() {
        assert_eq!(derive_identifier("Café Crème"), "cafe_creme");
        assert_eq!(derive_identifier("Ñandú"), "nandu");
    }

    #[test]
    fn derive_collapses_runs() {
        assert_eq!(derive_identifier("a!!!b...c"), "a_b_c");
        assert_eq!(derive_identifier("a / b"), "a_b");
    }

    #[test]
    fn derive_can_be_empty() {
        assert_eq!(derive_identifier(""), "");
        assert_eq!(derive_identifier("!!!"), "");
        assert_eq!(derive_identifier("日本"), "");
    }

    #[test]
    fn derive_is_idempotent() {
        for name in ["Kitchen Lamp", "Café Crème", "a!!!b", "  x_y-z  ", "Plug#10"] {
            let once = derive_identifier(name);
            assert_eq!(derive_identifier(&once), once, "not idempotent for {name:?}");
            assert_eq!(derive_identifier(name), once, "not deterministic for {name:?}");
        }
    }

    #[test]
    fn duplicate_identifier_keeps_first() {
        let mut map = IdentityMap::new();
        assert_eq!(map.register(&device("dev-a", "Kitchen Lamp")).unwrap(), "kitchen_lamp");

        let result = map.register(&device("dev-b", "kitchen_lamp "));
        assert!(matches!(
            result,
            Err(BridgeError::DuplicateIdentifier { ref identifier, ref device_id })
                if identifier == "kitchen_lamp" && device_id == "dev-b"
        ));

        assert_eq!(map.device_for("kitchen_lamp"), Some("dev-a"));
        assert_eq!(map.identifier_for("dev-b"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let mut map = IdentityMap::new();
        let result = map.register(&device("dev-a", "???"));
        assert!(matches!(result, Err(BridgeError::InvalidIdentifier { .. })));
        assert!(map.is_empty());
    }

    #[test]
    fn duplicate_device_id_is_rejected() {
        let mut map = IdentityMap::new();
        map.register(&device("dev-a", "Lamp")).unwrap();
        let result = map.register(&device("dev-a", "Other Lamp"));
        assert!(matches!(result, Err(BridgeError::DuplicateDevice(id)) if id == "dev-a"));
        assert_eq!(map.device_for("other_lamp"), None);
    }

    #[test]
    fn lookup_is_bidirectional_and_ordered() {
        let mut map = IdentityMap::new();
        map.register(&device("dev-b", "Plug")).unwrap();
        map.register(&device("dev-a", "Bulb")).unwrap();

        assert_eq!(map.device_for("plug"), Some("dev-b"));
        assert_eq!(map.identifier_for("dev-a"), Some("bulb"));
        assert_eq!(map.identifiers().collect::<Vec<_>>(), vec!["plug", "bulb"]);
    }

    #[test]
    fn check_does_not_record() {
        let map = IdentityMap::new();
        assert_eq!(map.check(&device("dev-a", "Lamp")).unwrap(), "lamp");
        assert!(map.is_empty());
    }
}
