//! Remote store layout for one device

/// Node paths (without the `.json` suffix) for a tenant's device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    tenant_id: String,
    device_id: String,
}

impl StorePaths {
    pub fn new(tenant_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Queue of commands awaiting this device
    pub fn pending(&self) -> String {
        format!(
            "tenants/{}/device_commands/{}/pending",
            self.tenant_id, self.device_id
        )
    }

    /// A single pending command; deleting it is the acknowledgment
    pub fn pending_command(&self, command_id: &str) -> String {
        format!("{}/{}", self.pending(), command_id)
    }

    /// Reported relay states
    pub fn switches(&self) -> String {
        format!(
            "tenants/{}/device_states/{}/switches",
            self.tenant_id, self.device_id
        )
    }

    /// Presence / heartbeat record
    pub fn presence(&self) -> String {
        format!("tenants/{}/presence/{}", self.tenant_id, self.device_id)
    }
}
