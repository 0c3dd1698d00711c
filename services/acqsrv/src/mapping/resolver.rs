//! Device-over-product mapping resolution
//!
//! Devices of one product share a register layout by default; only devices
//! with divergent wiring or firmware carry overrides. The presence of any
//! enabled device-level mapping fully shadows the product-level set - there
//! is no per-identifier merging, which keeps configurations auditable.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use fieldgate_codec::{FunctionCode, RegisterMapping};

use crate::config::DeviceDirectory;
use crate::error::{AcqSrvError, Result};
use crate::mapping::store::MappingStore;

/// Resolves the active mapping set for a device
pub struct MappingResolver {
    store: Arc<MappingStore>,
    directory: Arc<DeviceDirectory>,
}

impl MappingResolver {
    pub fn new(store: Arc<MappingStore>, directory: Arc<DeviceDirectory>) -> Self {
        Self { store, directory }
    }

    /// Underlying store (the configuration boundary's write surface)
    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    /// Resolve the ordered mapping set that applies to a device
    ///
    /// Device-level enabled mappings win wholesale; otherwise the enabled
    /// product-level set of the device's product applies. A device without
    /// any mapping resolves to an empty set.
    pub fn device_mappings(&self, device_id: &str) -> Result<Arc<Vec<RegisterMapping>>> {
        if let Some(snapshot) = self.store.device_tier(device_id) {
            let enabled = enabled_sorted(&snapshot);
            if !enabled.is_empty() {
                debug!(device_id, count = enabled.len(), "using device-level mappings");
                return Ok(Arc::new(enabled));
            }
        }

        let device = self
            .directory
            .get(device_id)
            .ok_or_else(|| AcqSrvError::device_not_found(device_id))?;

        if let Some(snapshot) = self.store.product_tier(&device.product_id) {
            let enabled = enabled_sorted(&snapshot);
            if !enabled.is_empty() {
                debug!(
                    device_id,
                    product_id = %device.product_id,
                    count = enabled.len(),
                    "using product-level mappings"
                );
                return Ok(Arc::new(enabled));
            }
        }

        debug!(device_id, "no register mappings configured");
        Ok(Arc::new(Vec::new()))
    }

    /// Resolved set keyed by identifier for O(1) lookup
    ///
    /// Surfaces a configuration integrity violation if two enabled mappings
    /// share an identifier - never silently deduplicates.
    pub fn mapping_map(&self, device_id: &str) -> Result<HashMap<String, RegisterMapping>> {
        let mappings = self.device_mappings(device_id)?;
        let mut map = HashMap::with_capacity(mappings.len());
        for mapping in mappings.iter() {
            if map
                .insert(mapping.identifier.clone(), mapping.clone())
                .is_some()
            {
                return Err(AcqSrvError::mapping(format!(
                    "Duplicate identifier in resolved set for {}: {}",
                    device_id, mapping.identifier
                )));
            }
        }
        Ok(map)
    }

    /// Resolved set filtered to one function code, keyed by register address
    ///
    /// Used by drivers that batch-read a contiguous register range per
    /// function code.
    pub fn by_function_code(
        &self,
        device_id: &str,
        function_code: FunctionCode,
    ) -> Result<HashMap<u16, RegisterMapping>> {
        let mappings = self.device_mappings(device_id)?;
        Ok(mappings
            .iter()
            .filter(|m| m.function_code == function_code)
            .map(|m| (m.register_address, m.clone()))
            .collect())
    }
}

fn enabled_sorted(snapshot: &[RegisterMapping]) -> Vec<RegisterMapping> {
    let mut enabled: Vec<_> = snapshot.iter().filter(|m| m.enabled).cloned().collect();
    enabled.sort_by(|a, b| {
        a.sort_code
            .cmp(&b.sort_code)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
    enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceProfile;
    use fieldgate_codec::DataType;

    fn directory_with_device() -> Arc<DeviceDirectory> {
        Arc::new(DeviceDirectory::from_profiles(vec![DeviceProfile {
            device_id: "dev-1".to_string(),
            device_key: "meter-a".to_string(),
            product_id: "product-1".to_string(),
            driver_type: "virtual".to_string(),
            host: None,
            port: None,
            unit_id: 1,
            poll_interval_ms: 100,
            timeout_ms: 1000,
            enabled: true,
        }]))
    }

    fn mapping(identifier: &str, address: u16) -> RegisterMapping {
        RegisterMapping::new(identifier, address, FunctionCode::Read03, DataType::Int)
            .with_thing_model("tm-1")
    }

    fn resolver() -> MappingResolver {
        MappingResolver::new(Arc::new(MappingStore::new()), directory_with_device())
    }

    #[test]
    fn test_falls_back_to_product_level() {
        let resolver = resolver();
        resolver
            .store()
            .set_product_mappings("product-1", vec![mapping("temp", 0)])
            .unwrap();

        let resolved = resolver.device_mappings("dev-1").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].identifier, "temp");
        assert!(resolved[0].device_id.is_none());
    }

    #[test]
    fn test_device_level_shadows_product_level_wholesale() {
        let resolver = resolver();
        resolver
            .store()
            .set_product_mappings(
                "product-1",
                vec![mapping("temp", 0), mapping("pressure", 2)],
            )
            .unwrap();
        resolver
            .store()
            .batch_save_device("dev-1", vec![mapping("temp", 100)])
            .unwrap();

        // No merging: the single device-level mapping hides both product ones
        let resolved = resolver.device_mappings("dev-1").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].register_address, 100);

        // Removing the override reverts to the product level
        resolver.store().delete_by_device("dev-1");
        let resolved = resolver.device_mappings("dev-1").unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_disabled_device_mappings_fall_back() {
        let resolver = resolver();
        resolver
            .store()
            .set_product_mappings("product-1", vec![mapping("temp", 0)])
            .unwrap();
        resolver
            .store()
            .batch_save_device("dev-1", vec![mapping("temp", 100).with_enabled(false)])
            .unwrap();

        let resolved = resolver.device_mappings("dev-1").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].register_address, 0);
    }

    #[test]
    fn test_resolution_order_is_sort_code_then_identifier() {
        let resolver = resolver();
        resolver
            .store()
            .set_product_mappings(
                "product-1",
                vec![
                    mapping("zeta", 6).with_sort_code(1),
                    mapping("alpha", 4).with_sort_code(1),
                    mapping("omega", 2).with_sort_code(0),
                ],
            )
            .unwrap();

        let resolved = resolver.device_mappings("dev-1").unwrap();
        let order: Vec<_> = resolved.iter().map(|m| m.identifier.as_str()).collect();
        assert_eq!(order, vec!["omega", "alpha", "zeta"]);
    }

    #[test]
    fn test_unknown_device_errors() {
        let resolver = resolver();
        assert!(matches!(
            resolver.device_mappings("ghost"),
            Err(AcqSrvError::DeviceError(_))
        ));
    }

    #[test]
    fn test_no_mappings_resolves_empty() {
        let resolver = resolver();
        let resolved = resolver.device_mappings("dev-1").unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_mapping_map_keyed_by_identifier() {
        let resolver = resolver();
        resolver
            .store()
            .set_product_mappings(
                "product-1",
                vec![mapping("temp", 0), mapping("pressure", 2)],
            )
            .unwrap();

        let map = resolver.mapping_map("dev-1").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["temp"].register_address, 0);
    }

    #[test]
    fn test_mapping_map_surfaces_duplicate_identifier() {
        let resolver = resolver();
        // Same identifier under two function codes passes store validation
        // but is a duplicate for the identifier-keyed view.
        resolver
            .store()
            .set_product_mappings(
                "product-1",
                vec![
                    mapping("temp", 0),
                    RegisterMapping::new("temp", 10, FunctionCode::Read04, DataType::Int),
                ],
            )
            .unwrap();

        assert!(matches!(
            resolver.mapping_map("dev-1"),
            Err(AcqSrvError::MappingError(_))
        ));
    }

    #[test]
    fn test_by_function_code_keyed_by_address() {
        let resolver = resolver();
        resolver
            .store()
            .set_product_mappings(
                "product-1",
                vec![
                    mapping("temp", 0),
                    mapping("pressure", 2),
                    RegisterMapping::new("valve", 5, FunctionCode::Read01, DataType::Bool),
                ],
            )
            .unwrap();

        let map = resolver
            .by_function_code("dev-1", FunctionCode::Read03)
            .unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&0));
        assert!(map.contains_key(&2));

        let coils = resolver
            .by_function_code("dev-1", FunctionCode::Read01)
            .unwrap();
        assert_eq!(coils.len(), 1);
        assert!(coils.contains_key(&5));
    }
}
