//! Two-tier register mapping store
//!
//! Snapshots are `Arc`-shared and replaced wholesale; nothing is ever
//! mutated in place, so readers holding a snapshot keep a consistent view
//! for the duration of a poll cycle. Writes validate every mapping and are
//! all-or-nothing.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use fieldgate_codec::RegisterMapping;

use crate::error::{AcqSrvError, Result};

/// In-memory mapping store fed by the external configuration boundary
#[derive(Debug, Default)]
pub struct MappingStore {
    /// Device-level overrides, keyed by device id
    device_tier: DashMap<String, Arc<Vec<RegisterMapping>>>,
    /// Product (thing model) level defaults, keyed by product id
    product_tier: DashMap<String, Arc<Vec<RegisterMapping>>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all device-level mappings for a device atomically
    ///
    /// Rejects the entire batch if any mapping violates a configuration
    /// invariant; the previous snapshot stays in place on rejection. An
    /// empty batch clears the device tier for this device.
    pub fn batch_save_device(
        &self,
        device_id: &str,
        mut mappings: Vec<RegisterMapping>,
    ) -> Result<()> {
        validate_set(&mappings)?;

        for mapping in &mut mappings {
            mapping.device_id = Some(device_id.to_string());
        }
        sort_set(&mut mappings);

        debug!(
            device_id,
            count = mappings.len(),
            "replacing device-level mapping snapshot"
        );
        self.device_tier
            .insert(device_id.to_string(), Arc::new(mappings));
        Ok(())
    }

    /// Remove all device-level mappings for a device
    ///
    /// Product-level mappings are unaffected.
    pub fn delete_by_device(&self, device_id: &str) {
        if self.device_tier.remove(device_id).is_some() {
            debug!(device_id, "deleted device-level mapping snapshot");
        }
    }

    /// Replace the product-level mapping set for a product atomically
    pub fn set_product_mappings(
        &self,
        product_id: &str,
        mut mappings: Vec<RegisterMapping>,
    ) -> Result<()> {
        validate_set(&mappings)?;

        for mapping in &mut mappings {
            mapping.device_id = None;
        }
        sort_set(&mut mappings);

        debug!(
            product_id,
            count = mappings.len(),
            "replacing product-level mapping snapshot"
        );
        self.product_tier
            .insert(product_id.to_string(), Arc::new(mappings));
        Ok(())
    }

    /// Current device-level snapshot, if any
    pub fn device_tier(&self, device_id: &str) -> Option<Arc<Vec<RegisterMapping>>> {
        self.device_tier.get(device_id).map(|entry| entry.clone())
    }

    /// Current product-level snapshot, if any
    pub fn product_tier(&self, product_id: &str) -> Option<Arc<Vec<RegisterMapping>>> {
        self.product_tier.get(product_id).map(|entry| entry.clone())
    }
}

/// Validate every mapping plus set-level uniqueness of
/// (identifier, function code) among enabled mappings
fn validate_set(mappings: &[RegisterMapping]) -> Result<()> {
    let mut seen = HashSet::new();
    for mapping in mappings {
        mapping.validate()?;
        if mapping.enabled
            && !seen.insert((mapping.identifier.as_str(), mapping.function_code))
        {
            return Err(AcqSrvError::mapping(format!(
                "Duplicate identifier for function code {}: {}",
                mapping.function_code, mapping.identifier
            )));
        }
    }
    Ok(())
}

/// Resolution order: sort code ascending, ties broken by identifier
fn sort_set(mappings: &mut [RegisterMapping]) {
    mappings.sort_by(|a, b| {
        a.sort_code
            .cmp(&b.sort_code)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });
}
