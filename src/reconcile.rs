//! Merge probe observations into the per-address inventory
//!
//! A rescan only overwrites a field when it actually learned something: an
//! "Unknown" or missing value never replaces a known one, and attribute keys
//! from earlier scans survive unless the new scan reports the same key.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    core::{Asset, AssetType, Attributes, UNKNOWN},
    error::Result,
    persistence::AssetStore,
};

/// Everything one successful probe determined about a host
#[derive(Debug, Clone, PartialEq)]
pub struct HostObservation {
    pub address: String,
    pub hostname: String,
    pub asset_type: AssetType,
    pub operating_system: String,
    pub os_version: Option<String>,
    pub attributes: Attributes,
}

pub struct AssetReconciler {
    store: Arc<dyn AssetStore>,
}

impl AssetReconciler {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    /// Upsert the asset for `observation.address`. Returns the stored asset
    /// and whether it was newly created.
    pub async fn reconcile(&self, observation: &HostObservation, scan_id: Uuid) -> Result<(Asset, bool)> {
        let (mut asset, created) = match self.store.find_by_address(&observation.address).await? {
            Some(existing) => (existing, false),
            None => (Asset::new(observation.address.clone()), true),
        };

        merge_observation(&mut asset, observation, scan_id);
        if created {
            asset.first_discovered = asset.last_seen;
        }
        self.store.upsert(&asset).await?;

        tracing::debug!(
            address = %asset.address,
            asset_id = %asset.id,
            created,
            "Asset reconciled"
        );
        Ok((asset, created))
    }
}

fn is_known(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.eq_ignore_ascii_case(UNKNOWN)
}

/// Attribute value as text, if it carries information
fn known_text(attributes: &Attributes, key: &str) -> Option<String> {
    let text = match attributes.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    is_known(&text).then_some(text)
}

fn known_count(attributes: &Attributes, key: &str) -> Option<u32> {
    match attributes.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn overwrite_known(field: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *field = Some(value);
    }
}

pub fn merge_observation(asset: &mut Asset, observation: &HostObservation, scan_id: Uuid) {
    let found = &observation.attributes;

    asset.hostname = observation.hostname.clone();
    asset.online = true;
    asset.last_seen = Utc::now();
    asset.last_scan_id = Some(scan_id);

    if !observation.asset_type.is_unknown() {
        asset.asset_type = observation.asset_type;
    }
    if is_known(&observation.operating_system) {
        asset.operating_system = observation.operating_system.clone();
    }
    overwrite_known(
        &mut asset.os_version,
        observation.os_version.clone().filter(|v| is_known(v)),
    );

    overwrite_known(&mut asset.manufacturer, known_text(found, "manufacturer"));
    overwrite_known(&mut asset.model, known_text(found, "model"));
    overwrite_known(&mut asset.mac_address, known_text(found, "macAddress"));
    overwrite_known(&mut asset.cpu_model, known_text(found, "cpuModel"));
    overwrite_known(&mut asset.ram_size, known_text(found, "ramSize"));
    overwrite_known(&mut asset.gpu_name, known_text(found, "gpuName"));
    overwrite_known(&mut asset.last_logged_user, known_text(found, "lastUser"));
    if let Some(cores) = known_count(found, "cpuCores") {
        asset.cpu_cores = Some(cores);
    }

    asset
        .attributes
        .extend(found.iter().map(|(key, value)| (key.clone(), value.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryDataStore;

    fn observation(address: &str, attributes: &[(&str, Value)]) -> HostObservation {
        HostObservation {
            address: address.to_string(),
            hostname: "ws-042.corp".to_string(),
            asset_type: AssetType::Windows,
            operating_system: "Windows".to_string(),
            os_version: None,
            attributes: attributes
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_first_scan_creates_asset() {
        let store = Arc::new(InMemoryDataStore::new());
        let reconciler = AssetReconciler::new(store.clone());
        let scan_id = Uuid::new_v4();

        let seen = observation(
            "10.0.0.5",
            &[("cpuCores", Value::from(8)), ("ramSize", Value::from("16.00 GB"))],
        );
        let (asset, created) = reconciler.reconcile(&seen, scan_id).await.unwrap();

        assert!(created);
        assert!(asset.online);
        assert_eq!(asset.first_discovered, asset.last_seen);
        assert_eq!(asset.cpu_cores, Some(8));
        assert_eq!(asset.ram_size.as_deref(), Some("16.00 GB"));
        assert_eq!(asset.last_scan_id, Some(scan_id));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rescan_preserves_undetected_fields() {
        let store = Arc::new(InMemoryDataStore::new());
        let reconciler = AssetReconciler::new(store.clone());

        let first = observation(
            "10.0.0.5",
            &[
                ("manufacturer", Value::from("Dell Inc.")),
                ("wmiAccessible", Value::Bool(true)),
            ],
        );
        let (original, _) = reconciler.reconcile(&first, Uuid::new_v4()).await.unwrap();

        let mut second = observation(
            "10.0.0.5",
            &[
                ("manufacturer", Value::from(UNKNOWN)),
                ("rdpEnabled", Value::Bool(true)),
            ],
        );
        second.asset_type = AssetType::Unknown;
        second.operating_system = UNKNOWN.to_string();
        second.hostname = "ws-042-renamed".to_string();
        let (updated, created) = reconciler.reconcile(&second, Uuid::new_v4()).await.unwrap();

        assert!(!created);
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.first_discovered, original.first_discovered);
        assert_eq!(updated.hostname, "ws-042-renamed");
        assert_eq!(updated.manufacturer.as_deref(), Some("Dell Inc."));
        assert_eq!(updated.asset_type, AssetType::Windows);
        assert_eq!(updated.operating_system, "Windows");
        assert_eq!(updated.attributes["wmiAccessible"], Value::Bool(true));
        assert_eq!(updated.attributes["rdpEnabled"], Value::Bool(true));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[test]
    fn test_known_values_overwrite() {
        let mut asset = Asset::new("10.0.0.5");
        asset.os_version = Some("10.0.19045".to_string());

        let mut seen = observation("10.0.0.5", &[("cpuCores", Value::from("4")), ("lastUser", Value::from("CORP\\jdoe"))]);
        seen.os_version = Some("10.0.22631".to_string());
        merge_observation(&mut asset, &seen, Uuid::new_v4());
        assert_eq!(asset.os_version.as_deref(), Some("10.0.22631"));
        assert_eq!(asset.cpu_cores, Some(4));
        assert_eq!(asset.last_logged_user.as_deref(), Some("CORP\\jdoe"));

        seen.os_version = Some(UNKNOWN.to_string());
        merge_observation(&mut asset, &seen, Uuid::new_v4());
        assert_eq!(asset.os_version.as_deref(), Some("10.0.22631"));
    }
}
