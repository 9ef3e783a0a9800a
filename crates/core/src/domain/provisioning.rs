use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::instance::{BlockDevice, LaunchRequest};
use crate::errors::DomainError;

pub const ROOT_DEVICE_NAME: &str = "/dev/xvda";

/// One named field required before an instance can be launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    InstanceClass,
    ImageReference,
    CredentialReference,
    SecurityGroup,
    StorageClass,
    StorageSize,
    Project,
    Owner,
    DisplayName,
}

impl Slot {
    /// Fixed order in which missing slots are asked for.
    pub const REQUIRED: [Slot; 9] = [
        Slot::InstanceClass,
        Slot::ImageReference,
        Slot::CredentialReference,
        Slot::SecurityGroup,
        Slot::StorageClass,
        Slot::StorageSize,
        Slot::Project,
        Slot::Owner,
        Slot::DisplayName,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::InstanceClass => "instance_type",
            Self::ImageReference => "ami",
            Self::CredentialReference => "key_name",
            Self::SecurityGroup => "security_group",
            Self::StorageClass => "volume_type",
            Self::StorageSize => "volume_size",
            Self::Project => "project",
            Self::Owner => "owner",
            Self::DisplayName => "name",
        }
    }

    pub fn follow_up_question(&self) -> &'static str {
        match self {
            Self::InstanceClass => "What instance type would you like? (e.g., t2.micro, t3.medium)",
            Self::ImageReference => {
                "Which OS image do you want? (e.g., Ubuntu 22.04, Amazon Linux 2)?"
            }
            Self::CredentialReference => {
                "Do you have a key pair? If not, do you want me to create one?"
            }
            Self::SecurityGroup => {
                "Which security group should I attach? (Ask me to list security groups to see options.)"
            }
            Self::StorageClass => {
                "What storage type do you need? (Ask me to list volume types to see options.)"
            }
            Self::StorageSize => "What size should the storage be? (e.g., 20GB, 50GB)?",
            Self::Project => "What is the project name for this instance?",
            Self::Owner => "Who is the owner of this instance?",
            Self::DisplayName => "What should be the instance name?",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFragment {
    pub slot: Slot,
    pub value: String,
}

impl SlotFragment {
    pub fn new(slot: Slot, value: impl Into<String>) -> Self {
        Self { slot, value: value.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpQuestion {
    pub slot: Slot,
    pub question: String,
}

impl FollowUpQuestion {
    pub fn for_slot(slot: Slot) -> Self {
        Self { slot, question: slot.follow_up_question().to_string() }
    }
}

/// Per-user accumulator of slot values across turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningSession {
    slots: BTreeMap<Slot, String>,
    updated_at: DateTime<Utc>,
}

impl Default for ProvisioningSession {
    fn default() -> Self {
        Self { slots: BTreeMap::new(), updated_at: Utc::now() }
    }
}

impl ProvisioningSession {
    pub fn apply(&mut self, fragments: &[SlotFragment]) {
        for fragment in fragments {
            self.slots.insert(fragment.slot, fragment.value.clone());
        }
        self.updated_at = Utc::now();
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.slots.get(&slot).map(String::as_str)
    }

    pub fn slots(&self) -> &BTreeMap<Slot, String> {
        &self.slots
    }

    pub fn missing_slots(&self) -> Vec<Slot> {
        Slot::REQUIRED.into_iter().filter(|slot| !self.slots.contains_key(slot)).collect()
    }

    pub fn next_follow_up(&self) -> Option<FollowUpQuestion> {
        self.missing_slots().first().copied().map(FollowUpQuestion::for_slot)
    }

    pub fn forget(&mut self, slot: Slot) {
        self.slots.remove(&slot);
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.updated_at = Utc::now();
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn to_spec(&self) -> Result<ProvisioningSpec, DomainError> {
        let missing = self.missing_slots();
        if !missing.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "provisioning session is missing slots: {}",
                missing.iter().map(Slot::key).collect::<Vec<_>>().join(", ")
            )));
        }

        let value = |slot: Slot| self.slots.get(&slot).cloned().unwrap_or_default();
        let raw_size = value(Slot::StorageSize);
        let storage_size_gb = raw_size.parse::<u32>().map_err(|_| {
            DomainError::InvariantViolation(format!("storage size `{raw_size}` is not a number"))
        })?;

        Ok(ProvisioningSpec {
            instance_class: value(Slot::InstanceClass),
            image_reference: value(Slot::ImageReference),
            credential_reference: value(Slot::CredentialReference),
            security_group: value(Slot::SecurityGroup),
            storage_class: value(Slot::StorageClass),
            storage_size_gb,
            project: value(Slot::Project),
            owner: value(Slot::Owner),
            display_name: value(Slot::DisplayName),
        })
    }
}

/// A fully filled slot set, ready to submit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningSpec {
    pub instance_class: String,
    pub image_reference: String,
    pub credential_reference: String,
    pub security_group: String,
    pub storage_class: String,
    pub storage_size_gb: u32,
    pub project: String,
    pub owner: String,
    pub display_name: String,
}

impl ProvisioningSpec {
    pub fn to_launch_request(&self) -> LaunchRequest {
        let mut tags = BTreeMap::new();
        tags.insert("Project".to_string(), self.project.clone());
        tags.insert("Owner".to_string(), self.owner.clone());
        tags.insert("Name".to_string(), self.display_name.clone());

        LaunchRequest {
            image_id: self.image_reference.clone(),
            instance_type: self.instance_class.clone(),
            key_name: self.credential_reference.clone(),
            security_groups: vec![self.security_group.clone()],
            block_devices: vec![BlockDevice {
                device_name: ROOT_DEVICE_NAME.to_string(),
                volume_size_gb: self.storage_size_gb,
                volume_type: self.storage_class.clone(),
            }],
            tags,
        }
    }
}

/// Result of feeding one message into a provisioning session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotOutcome {
    FollowUp(FollowUpQuestion),
    Ready(ProvisioningSpec),
}
