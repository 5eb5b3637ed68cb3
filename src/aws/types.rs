//! Response shapes returned by `aws ec2 ... --output json`.

use serde::Deserialize;

use crate::provider::{InstanceDescriptor, InstanceStatus};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct RunInstancesOutput {
    #[serde(default)]
    pub(super) instances: Vec<Ec2Instance>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeInstancesOutput {
    #[serde(default)]
    pub(super) reservations: Vec<Reservation>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Reservation {
    #[serde(default)]
    pub(super) instances: Vec<Ec2Instance>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Instance {
    pub(super) instance_id: String,
    #[serde(default)]
    pub(super) public_dns_name: Option<String>,
    #[serde(default)]
    pub(super) private_dns_name: Option<String>,
    pub(super) state: Ec2State,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2State {
    pub(super) name: String,
}

impl From<Ec2Instance> for InstanceDescriptor {
    fn from(instance: Ec2Instance) -> Self {
        Self {
            id: instance.instance_id,
            dns_name: instance.public_dns_name.unwrap_or_default(),
            internal_dns_name: instance.private_dns_name.unwrap_or_default(),
            status: InstanceStatus::from_name(&instance.state.name),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeSecurityGroupsOutput {
    #[serde(default)]
    pub(super) security_groups: Vec<SecurityGroup>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct SecurityGroup {
    pub(super) group_id: String,
    pub(super) group_name: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeKeyPairsOutput {
    #[serde(default)]
    pub(super) key_pairs: Vec<KeyPairInfo>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct KeyPairInfo {
    pub(super) key_name: String,
}
