use std::sync::Arc;

use tracing::{debug, info};

use cloudpilot_core::domain::instance::{InstanceDescriptor, InstanceId};
use cloudpilot_core::domain::provisioning::ProvisioningSpec;

use crate::provider::{ComputeProvider, ProviderError};
use crate::resolver::{IdentifierResolver, Resolution};

/// Storage classes the provider accepts, with a short use-case note.
pub const VOLUME_TYPES: [(&str, &str); 7] = [
    ("gp3", "General Purpose SSD (default)"),
    ("gp2", "Older General Purpose SSD"),
    ("io1", "Provisioned IOPS SSD (high performance)"),
    ("io2", "Provisioned IOPS SSD (high durability)"),
    ("st1", "Throughput Optimized HDD (for big data workloads)"),
    ("sc1", "Cold HDD (for infrequent access)"),
    ("standard", "Magnetic (legacy type)"),
];

const NOT_AVAILABLE: &str = "N/A";

/// Resource operations rendered as chat-ready text.
///
/// Every method reads live provider state; nothing is cached between calls.
/// Provider refusals come back as `Err` so the caller can decide how to phrase them.
#[derive(Clone)]
pub struct ResourceGateway {
    provider: Arc<dyn ComputeProvider>,
    resolver: IdentifierResolver,
}

impl ResourceGateway {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        let resolver = IdentifierResolver::new(provider.clone());
        Self { provider, resolver }
    }

    pub fn resolver(&self) -> &IdentifierResolver {
        &self.resolver
    }

    pub async fn list_instances(&self) -> Result<String, ProviderError> {
        let instances = self.provider.describe_instances().await?;
        if instances.is_empty() {
            return Ok("No instances found.".to_string());
        }
        Ok(instances.iter().map(render_summary).collect::<Vec<_>>().join("\n"))
    }

    pub async fn describe_instance(&self, identifier: &str) -> Result<String, ProviderError> {
        let Resolution::Found(instance_id) = self.resolver.resolve(identifier).await? else {
            return Ok(format!(
                "❌ No instance found with identifier '{identifier}'. Please check and try again."
            ));
        };
        match self.provider.describe_instance(&instance_id).await? {
            Some(instance) => Ok(render_details(identifier, &instance)),
            None => Ok(format!("❌ No details found for instance '{identifier}'.")),
        }
    }

    pub async fn start_instance(&self, identifier: &str) -> Result<String, ProviderError> {
        let Resolution::Found(instance_id) = self.resolver.resolve(identifier).await? else {
            return Ok(not_found(identifier));
        };
        self.provider.start_instance(&instance_id).await?;
        info!(event_name = "gateway.instance_starting", instance_id = %instance_id, "start requested");
        Ok(format!("✅ Instance {identifier} (ID: {instance_id}) is starting."))
    }

    pub async fn stop_instance(&self, identifier: &str) -> Result<String, ProviderError> {
        let Resolution::Found(instance_id) = self.resolver.resolve(identifier).await? else {
            return Ok(not_found(identifier));
        };
        self.provider.stop_instance(&instance_id).await?;
        info!(event_name = "gateway.instance_stopping", instance_id = %instance_id, "stop requested");
        Ok(format!("⛔ Instance {identifier} (ID: {instance_id}) is stopping."))
    }

    /// Submits a single-instance launch and returns the confirmation text.
    pub async fn launch(&self, spec: &ProvisioningSpec) -> Result<(InstanceId, String), ProviderError> {
        let request = spec.to_launch_request();
        debug!(
            event_name = "gateway.launch_submitted",
            instance_type = %request.instance_type,
            image_id = %request.image_id,
            "submitting launch request"
        );
        let instance_id = self.provider.run_instance(&request).await?;
        let confirmation = format!(
            "✅ Successfully launched instance `{}` with ID `{}`.",
            spec.display_name, instance_id
        );
        info!(event_name = "gateway.instance_launched", instance_id = %instance_id, "instance launched");
        Ok((instance_id, confirmation))
    }

    pub async fn list_security_groups(&self) -> Result<String, ProviderError> {
        let groups = self.provider.describe_security_groups().await?;
        if groups.is_empty() {
            return Ok("❌ No security groups found.".to_string());
        }
        let lines = groups
            .iter()
            .map(|group| format!("- {} (ID: {})", group.group_name, group.group_id))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("**Available Security Groups:**\n{lines}"))
    }

    pub async fn list_key_pairs(&self) -> Result<String, ProviderError> {
        let key_pairs = self.provider.describe_key_pairs().await?;
        if key_pairs.is_empty() {
            return Ok("❌ No key pairs found. You may need to create one.".to_string());
        }
        let lines = key_pairs
            .iter()
            .map(|key_pair| format!("- {}", key_pair.key_name))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("**Available Key Pairs:**\n{lines}"))
    }

    pub fn list_volume_types(&self) -> String {
        let lines = VOLUME_TYPES
            .iter()
            .map(|(name, description)| format!("- **{name}**: {description}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("**Available Volume Types:**\n{lines}")
    }
}

pub fn launch_failure_text(error: &ProviderError) -> String {
    let detail = match error {
        ProviderError::Rejected { code, message } => format!("{code}: {message}"),
        ProviderError::Unavailable(message)
        | ProviderError::Decode(message)
        | ProviderError::Configuration(message) => message.clone(),
    };
    format!("❌ Error launching instance: {detail}")
}

fn not_found(identifier: &str) -> String {
    format!("⚠️ No instance found with identifier: {identifier}")
}

fn render_summary(instance: &InstanceDescriptor) -> String {
    format!(
        "🖥️ **{}**  \nID: {}  \nState: {}  \nPrivate IP: {}  \nPublic IP: {}\n",
        instance.name().unwrap_or("Unnamed"),
        instance.instance_id,
        instance.state,
        instance.private_ip.as_deref().unwrap_or(NOT_AVAILABLE),
        instance.public_ip.as_deref().unwrap_or(NOT_AVAILABLE),
    )
}

fn render_details(identifier: &str, instance: &InstanceDescriptor) -> String {
    let storage = if instance.volumes.is_empty() {
        "No attached volumes".to_string()
    } else {
        instance
            .volumes
            .iter()
            .map(|volume| {
                format!("  - Volume ID: {} (Device: {})", volume.volume_id, volume.device_name)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let tags = instance
        .tags
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "**Instance Details**\n\
         - **Name:** {identifier}\n\
         - **Instance ID:** {}\n\
         - **State:** {}\n\
         - **Instance Type:** {}\n\
         - **Private IP:** {}\n\
         - **Public IP:** {}\n\
         - **Launch Time:** {}\n\
         - **Security Groups:** {}\n\
         - **Attached Storage:**\n{storage}\n\
         - **Tags:** {tags}\n",
        instance.instance_id,
        instance.state,
        instance.instance_type,
        instance.private_ip.as_deref().unwrap_or(NOT_AVAILABLE),
        instance.public_ip.as_deref().unwrap_or(NOT_AVAILABLE),
        instance.launch_time.format("%Y-%m-%d %H:%M:%S UTC"),
        instance.security_groups.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use cloudpilot_core::domain::instance::{
        AttachedVolume, InstanceDescriptor, InstanceId, InstanceState,
    };
    use cloudpilot_core::domain::provisioning::ProvisioningSpec;

    use crate::memory::InMemoryComputeProvider;
    use crate::operations::{launch_failure_text, ResourceGateway};
    use crate::provider::ProviderError;

    fn web1() -> InstanceDescriptor {
        InstanceDescriptor {
            instance_id: InstanceId("i-0abc".to_string()),
            state: InstanceState::Running,
            instance_type: "t3.medium".to_string(),
            private_ip: Some("10.0.0.12".to_string()),
            public_ip: None,
            launch_time: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).single().expect("valid time"),
            security_groups: vec!["default".to_string(), "web".to_string()],
            volumes: vec![AttachedVolume {
                volume_id: "vol-0001".to_string(),
                device_name: "/dev/xvda".to_string(),
            }],
            tags: BTreeMap::from([
                ("Name".to_string(), "web1".to_string()),
                ("Owner".to_string(), "Bob".to_string()),
            ]),
        }
    }

    fn spec() -> ProvisioningSpec {
        ProvisioningSpec {
            instance_class: "t2.micro".to_string(),
            image_reference: "ami-12345678".to_string(),
            credential_reference: "my-key-pair".to_string(),
            security_group: "default".to_string(),
            storage_class: "gp3".to_string(),
            storage_size_gb: 20,
            project: "Alpha".to_string(),
            owner: "Bob".to_string(),
            display_name: "web1".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_inventory_lists_no_instances() {
        let gateway = ResourceGateway::new(Arc::new(InMemoryComputeProvider::default()));
        assert_eq!(gateway.list_instances().await.expect("list"), "No instances found.");
        assert_eq!(
            gateway.list_security_groups().await.expect("groups"),
            "❌ No security groups found."
        );
    }

    #[tokio::test]
    async fn listing_shows_missing_public_ip_as_not_available() {
        let provider = Arc::new(InMemoryComputeProvider::default());
        provider.insert_instance(web1()).await;
        let gateway = ResourceGateway::new(provider);

        let listing = gateway.list_instances().await.expect("list");
        assert!(listing.starts_with("🖥️ **web1**"));
        assert!(listing.contains("ID: i-0abc"));
        assert!(listing.contains("State: running"));
        assert!(listing.contains("Public IP: N/A"));
    }

    #[tokio::test]
    async fn describe_renders_storage_and_tags() {
        let provider = Arc::new(InMemoryComputeProvider::default());
        provider.insert_instance(web1()).await;
        let gateway = ResourceGateway::new(provider);

        let details = gateway.describe_instance("10.0.0.12").await.expect("describe");
        assert!(details.contains("- **Instance ID:** i-0abc"));
        assert!(details.contains("- **Launch Time:** 2025-03-01 09:30:00 UTC"));
        assert!(details.contains("- **Security Groups:** default, web"));
        assert!(details.contains("  - Volume ID: vol-0001 (Device: /dev/xvda)"));
        assert!(details.contains("- **Tags:** Name=web1, Owner=Bob"));
    }

    #[tokio::test]
    async fn unknown_identifier_gets_distinct_not_found_text() {
        let gateway = ResourceGateway::new(Arc::new(InMemoryComputeProvider::default()));

        assert_eq!(
            gateway.start_instance("ghost").await.expect("start"),
            "⚠️ No instance found with identifier: ghost"
        );
        assert_eq!(
            gateway.stop_instance("ghost").await.expect("stop"),
            "⚠️ No instance found with identifier: ghost"
        );
        assert!(gateway
            .describe_instance("ghost")
            .await
            .expect("describe")
            .starts_with("❌ No instance found with identifier 'ghost'"));
    }

    #[tokio::test]
    async fn start_and_stop_confirm_with_resolved_id() {
        let provider = Arc::new(InMemoryComputeProvider::default());
        provider.insert_instance(web1()).await;
        let gateway = ResourceGateway::new(provider);

        assert_eq!(
            gateway.start_instance("web1").await.expect("start"),
            "✅ Instance web1 (ID: i-0abc) is starting."
        );
        assert_eq!(
            gateway.stop_instance("web1").await.expect("stop"),
            "⛔ Instance web1 (ID: i-0abc) is stopping."
        );
    }

    #[tokio::test]
    async fn native_id_for_missing_instance_surfaces_provider_rejection() {
        let gateway = ResourceGateway::new(Arc::new(InMemoryComputeProvider::default()));
        let error = gateway.start_instance("i-0def").await.expect_err("not in inventory");
        assert!(matches!(error, ProviderError::Rejected { .. }));
    }

    #[tokio::test]
    async fn launch_confirmation_names_the_instance() {
        let provider = Arc::new(InMemoryComputeProvider::with_defaults());
        let gateway = ResourceGateway::new(provider.clone());

        let (instance_id, confirmation) = gateway.launch(&spec()).await.expect("launch");
        assert_eq!(
            confirmation,
            format!("✅ Successfully launched instance `web1` with ID `{instance_id}`.")
        );
        let launched = provider.instance(&instance_id).await.expect("instance exists");
        assert_eq!(launched.tags.get("Project").map(String::as_str), Some("Alpha"));
    }

    #[test]
    fn volume_catalog_and_failure_text() {
        let gateway = ResourceGateway::new(Arc::new(InMemoryComputeProvider::default()));
        let catalog = gateway.list_volume_types();
        assert!(catalog.starts_with("**Available Volume Types:**"));
        assert!(catalog.contains("- **gp3**: General Purpose SSD (default)"));
        assert!(catalog.contains("- **standard**: Magnetic (legacy type)"));

        assert_eq!(
            launch_failure_text(&ProviderError::rejected("InvalidKeyPair.NotFound", "no such key")),
            "❌ Error launching instance: InvalidKeyPair.NotFound: no such key"
        );
    }
}
