use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use cloudpilot_core::domain::instance::{
    AttachedVolume, InstanceDescriptor, InstanceId, InstanceState, KeyPair, LaunchRequest,
    SecurityGroup,
};

use crate::provider::{ComputeProvider, ProviderError};

#[derive(Default)]
struct Inventory {
    instances: Vec<InstanceDescriptor>,
    security_groups: Vec<SecurityGroup>,
    key_pairs: Vec<KeyPair>,
    pending_launch_rejection: Option<ProviderError>,
    unavailable: Option<String>,
}

/// Process-local provider used by tests and the `memory` compute backend.
#[derive(Default)]
pub struct InMemoryComputeProvider {
    inventory: RwLock<Inventory>,
    next_serial: AtomicU64,
    inventory_scans: AtomicUsize,
}

impl InMemoryComputeProvider {
    /// Provider preloaded with the `default` security group and `my-key-pair`.
    pub fn with_defaults() -> Self {
        Self {
            inventory: RwLock::new(Inventory {
                security_groups: vec![SecurityGroup {
                    group_id: "sg-0a1b2c3d".to_string(),
                    group_name: "default".to_string(),
                }],
                key_pairs: vec![KeyPair { key_name: "my-key-pair".to_string() }],
                ..Inventory::default()
            }),
            ..Self::default()
        }
    }

    pub async fn insert_instance(&self, instance: InstanceDescriptor) {
        self.inventory.write().await.instances.push(instance);
    }

    pub async fn insert_security_group(&self, group: SecurityGroup) {
        self.inventory.write().await.security_groups.push(group);
    }

    pub async fn insert_key_pair(&self, key_pair: KeyPair) {
        self.inventory.write().await.key_pairs.push(key_pair);
    }

    /// The next `run_instance` call fails with this error.
    pub async fn reject_next_launch(&self, code: &str, message: &str) {
        self.inventory.write().await.pending_launch_rejection =
            Some(ProviderError::rejected(code, message));
    }

    /// Every call fails as unreachable until cleared with `None`.
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        self.inventory.write().await.unavailable = reason.map(str::to_string);
    }

    /// Number of full inventory scans served so far.
    pub fn inventory_scans(&self) -> usize {
        self.inventory_scans.load(Ordering::SeqCst)
    }

    pub async fn instance(&self, instance_id: &InstanceId) -> Option<InstanceDescriptor> {
        self.inventory
            .read()
            .await
            .instances
            .iter()
            .find(|instance| &instance.instance_id == instance_id)
            .cloned()
    }

    pub async fn instance_count(&self) -> usize {
        self.inventory.read().await.instances.len()
    }

    fn check_available(inventory: &Inventory) -> Result<(), ProviderError> {
        match &inventory.unavailable {
            Some(reason) => Err(ProviderError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    async fn set_state(
        &self,
        instance_id: &InstanceId,
        state: InstanceState,
    ) -> Result<(), ProviderError> {
        let mut inventory = self.inventory.write().await;
        Self::check_available(&inventory)?;
        let instance = inventory
            .instances
            .iter_mut()
            .find(|instance| &instance.instance_id == instance_id)
            .ok_or_else(|| not_found(instance_id))?;
        if instance.state == InstanceState::Terminated {
            return Err(ProviderError::rejected(
                "IncorrectInstanceState",
                format!("The instance '{instance_id}' is not in a state from which it can be changed."),
            ));
        }
        instance.state = state;
        Ok(())
    }
}

fn not_found(instance_id: &InstanceId) -> ProviderError {
    ProviderError::rejected(
        "InvalidInstanceID.NotFound",
        format!("The instance ID '{instance_id}' does not exist"),
    )
}

#[async_trait]
impl ComputeProvider for InMemoryComputeProvider {
    async fn describe_instances(&self) -> Result<Vec<InstanceDescriptor>, ProviderError> {
        let inventory = self.inventory.read().await;
        Self::check_available(&inventory)?;
        self.inventory_scans.fetch_add(1, Ordering::SeqCst);
        Ok(inventory.instances.clone())
    }

    async fn describe_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<InstanceDescriptor>, ProviderError> {
        let inventory = self.inventory.read().await;
        Self::check_available(&inventory)?;
        Ok(inventory.instances.iter().find(|instance| &instance.instance_id == instance_id).cloned())
    }

    async fn start_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError> {
        self.set_state(instance_id, InstanceState::Pending).await
    }

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), ProviderError> {
        self.set_state(instance_id, InstanceState::Stopping).await
    }

    async fn run_instance(&self, request: &LaunchRequest) -> Result<InstanceId, ProviderError> {
        let mut inventory = self.inventory.write().await;
        Self::check_available(&inventory)?;
        if let Some(rejection) = inventory.pending_launch_rejection.take() {
            return Err(rejection);
        }
        if request.block_devices.is_empty() {
            return Err(ProviderError::rejected(
                "InvalidBlockDeviceMapping",
                "at least one block device is required",
            ));
        }

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst) + 1;
        let instance_id = InstanceId(format!("i-{serial:017x}"));
        let volumes = request
            .block_devices
            .iter()
            .enumerate()
            .map(|(index, device)| AttachedVolume {
                volume_id: format!("vol-{serial:08x}{index:09x}"),
                device_name: device.device_name.clone(),
            })
            .collect();

        inventory.instances.push(InstanceDescriptor {
            instance_id: instance_id.clone(),
            state: InstanceState::Pending,
            instance_type: request.instance_type.clone(),
            private_ip: Some(format!("10.0.{}.{}", (serial >> 8) & 0xff, serial & 0xff)),
            public_ip: None,
            launch_time: Utc::now(),
            security_groups: request.security_groups.clone(),
            volumes,
            tags: request.tags.clone(),
        });
        Ok(instance_id)
    }

    async fn describe_security_groups(&self) -> Result<Vec<SecurityGroup>, ProviderError> {
        let inventory = self.inventory.read().await;
        Self::check_available(&inventory)?;
        Ok(inventory.security_groups.clone())
    }

    async fn describe_key_pairs(&self) -> Result<Vec<KeyPair>, ProviderError> {
        let inventory = self.inventory.read().await;
        Self::check_available(&inventory)?;
        Ok(inventory.key_pairs.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cloudpilot_core::domain::instance::{BlockDevice, InstanceState, LaunchRequest};

    use crate::memory::InMemoryComputeProvider;
    use crate::provider::{ComputeProvider, ProviderError};

    fn launch_request() -> LaunchRequest {
        LaunchRequest {
            image_id: "ami-12345678".to_string(),
            instance_type: "t2.micro".to_string(),
            key_name: "my-key-pair".to_string(),
            security_groups: vec!["default".to_string()],
            block_devices: vec![BlockDevice {
                device_name: "/dev/xvda".to_string(),
                volume_size_gb: 20,
                volume_type: "gp3".to_string(),
            }],
            tags: BTreeMap::from([("Name".to_string(), "web1".to_string())]),
        }
    }

    #[tokio::test]
    async fn launched_instance_shows_up_in_inventory() {
        let provider = InMemoryComputeProvider::with_defaults();
        let id = provider.run_instance(&launch_request()).await.expect("launch");

        let instances = provider.describe_instances().await.expect("describe");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].instance_id, id);
        assert_eq!(instances[0].name(), Some("web1"));
        assert_eq!(instances[0].volumes[0].device_name, "/dev/xvda");
        assert_eq!(provider.inventory_scans(), 1);
    }

    #[tokio::test]
    async fn injected_rejection_applies_to_one_launch_only() {
        let provider = InMemoryComputeProvider::default();
        provider.reject_next_launch("InvalidAMIID.NotFound", "ami missing").await;

        let error = provider.run_instance(&launch_request()).await.expect_err("rejected");
        assert!(matches!(error, ProviderError::Rejected { ref code, .. } if code == "InvalidAMIID.NotFound"));
        assert!(provider.run_instance(&launch_request()).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_provider_fails_every_call() {
        let provider = InMemoryComputeProvider::with_defaults();
        provider.set_unavailable(Some("connection refused")).await;

        assert!(provider.describe_key_pairs().await.expect_err("down").is_unavailable());
        provider.set_unavailable(None).await;
        assert_eq!(provider.describe_key_pairs().await.expect("up").len(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_change_state() {
        let provider = InMemoryComputeProvider::default();
        let id = provider.run_instance(&launch_request()).await.expect("launch");

        provider.stop_instance(&id).await.expect("stop");
        assert_eq!(provider.instance(&id).await.map(|i| i.state), Some(InstanceState::Stopping));
        provider.start_instance(&id).await.expect("start");
        assert_eq!(provider.instance(&id).await.map(|i| i.state), Some(InstanceState::Pending));
    }
}
