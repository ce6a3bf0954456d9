use std::fmt;

/// Provider-side VM identity: resource group plus VM name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub resource_group: String,
    pub name: String,
}

impl InstanceId {
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

/// Provisioning half of a VM's status (`ProvisioningState/*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Creating,
    Updating,
    Succeeded,
    Failed,
    Deleting,
    Other(String),
}

/// Power half of a VM's status (`PowerState/*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Other(String),
}

impl PowerState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deallocating => "deallocating",
            Self::Deallocated => "deallocated",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-reported VM state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceView {
    pub provisioning: Option<ProvisioningState>,
    pub power: Option<PowerState>,
}

impl InstanceView {
    /// Build from raw `Kind/value` status codes. Codes of other kinds are ignored.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut view = Self::default();
        for code in codes {
            let Some((kind, value)) = code.as_ref().split_once('/') else {
                continue;
            };
            let value = value.to_ascii_lowercase();
            match kind {
                "ProvisioningState" => {
                    view.provisioning = Some(match value.as_str() {
                        "creating" => ProvisioningState::Creating,
                        "updating" => ProvisioningState::Updating,
                        "succeeded" => ProvisioningState::Succeeded,
                        "failed" => ProvisioningState::Failed,
                        "deleting" => ProvisioningState::Deleting,
                        _ => ProvisioningState::Other(value),
                    });
                }
                "PowerState" => {
                    view.power = Some(match value.as_str() {
                        "starting" => PowerState::Starting,
                        "running" => PowerState::Running,
                        "stopping" => PowerState::Stopping,
                        "stopped" => PowerState::Stopped,
                        "deallocating" => PowerState::Deallocating,
                        "deallocated" => PowerState::Deallocated,
                        _ => PowerState::Other(value),
                    });
                }
                _ => {}
            }
        }
        view
    }

    pub fn is_updating(&self) -> bool {
        self.provisioning == Some(ProvisioningState::Updating)
    }

    /// Fully stopped: compute released or halted, nothing in flight.
    pub fn is_stopped(&self) -> bool {
        matches!(
            self.power,
            Some(PowerState::Stopped | PowerState::Deallocated)
        )
    }
}
