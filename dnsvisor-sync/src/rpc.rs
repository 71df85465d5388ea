//! Operator actions against running instances.

use thiserror::Error;

use dnsvisor_core::InstanceName;
use dnsvisor_process::ProcessError;

use crate::service::DnsService;

/// Failure of an operator action, in the shape the management plane reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The target of the action has no configuration. `path` names the
    /// configuration node that would have to exist.
    #[error("{message} ({path})")]
    NotConfigured { path: String, message: String },

    #[error("operation failed: {0}")]
    Operation(String),
}

impl RpcError {
    fn instance_not_configured(name: &InstanceName) -> Self {
        RpcError::NotConfigured {
            path: format!("/routing-instance/{name}"),
            message: "DNS forwarding is not configured on requested instance".to_string(),
        }
    }

    fn interface_not_configured(interface: &str) -> Self {
        RpcError::NotConfigured {
            path: format!("/interface/{interface}"),
            message: "There is no dynamic DNS instance running on the specified interface"
                .to_string(),
        }
    }
}

impl From<ProcessError> for RpcError {
    fn from(e: ProcessError) -> Self {
        RpcError::Operation(e.to_string())
    }
}

/// Empty or absent names address the default instance.
fn instance_name(instance: Option<&str>) -> InstanceName {
    match instance {
        Some(name) if !name.is_empty() => InstanceName::from(name),
        _ => InstanceName::default_instance(),
    }
}

impl DnsService {
    /// Restart the forwarding daemon of `instance`.
    pub fn reset_forwarding(&self, instance: Option<&str>) -> Result<(), RpcError> {
        let name = instance_name(instance);
        let fwd = self
            .forwarding_instance(&name)
            .ok_or_else(|| RpcError::instance_not_configured(&name))?;
        fwd.reset().map_err(|e| {
            tracing::error!(instance = %name, error = %e, "forwarding reset failed");
            RpcError::from(e)
        })?;
        tracing::info!(instance = %name, "forwarding reset");
        Ok(())
    }

    /// Ask the forwarding daemon of `instance` to drop its cache.
    pub fn reset_forwarding_cache(&self, instance: Option<&str>) -> Result<(), RpcError> {
        let name = instance_name(instance);
        let fwd = self
            .forwarding_instance(&name)
            .ok_or_else(|| RpcError::instance_not_configured(&name))?;
        fwd.reset_cache().map_err(|e| {
            tracing::error!(instance = %name, error = %e, "forwarding cache reset failed");
            RpcError::from(e)
        })?;
        tracing::info!(instance = %name, "forwarding cache reset");
        Ok(())
    }

    /// Restart the update daemon on `interface`, whichever instance owns it.
    pub fn update_dynamic_interface(&self, interface: &str) -> Result<(), RpcError> {
        for (name, dynamic) in self.dynamic_instances().iter() {
            let Some(result) = dynamic.restart_interface(interface) else {
                continue;
            };
            return match result {
                Ok(()) => {
                    tracing::info!(instance = %name, interface, "dynamic update requested");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(instance = %name, interface, error = %e, "dynamic update failed");
                    Err(e.into())
                }
            };
        }
        Err(RpcError::interface_not_configured(interface))
    }
}
