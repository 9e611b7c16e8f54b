use crate::guard::GuardStatus;
use faceid_core::ProtectedRegistry;
use std::sync::{Arc, Mutex};
use zbus::interface;

pub use faceid_core::bus::{BUS_NAME, OBJECT_PATH};

/// D-Bus interface for the faceid guard daemon.
///
/// Bus name: org.faceid.Guard1 (session bus)
/// Object path: /org/faceid/Guard1
pub struct GuardService {
    registry: Arc<ProtectedRegistry>,
    status: Arc<Mutex<GuardStatus>>,
}

impl GuardService {
    pub fn new(registry: Arc<ProtectedRegistry>, status: Arc<Mutex<GuardStatus>>) -> Self {
        Self { registry, status }
    }

    fn status_json(&self) -> Result<String, String> {
        let status = self
            .status
            .lock()
            .map_err(|_| "status lock poisoned".to_string())?
            .clone();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "registry": self.registry.path().display().to_string(),
            "status": status,
        })
        .to_string())
    }

    fn protected_json(&self) -> Result<String, String> {
        let entries = self.registry.snapshot().map_err(|e| e.to_string())?;
        serde_json::to_string(&entries).map_err(|e| e.to_string())
    }
}

#[interface(name = "org.faceid.Guard1")]
impl GuardService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        self.status_json().map_err(zbus::fdo::Error::Failed)
    }

    /// List protected applications and their approval flags.
    async fn list_protected(&self) -> zbus::fdo::Result<String> {
        self.protected_json().map_err(zbus::fdo::Error::Failed)
    }

    /// Withdraw the approval for one application.
    async fn revoke(&self, app: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(app, "revoke requested");
        match self.registry.revoke(app) {
            Ok(()) => Ok(true),
            Err(faceid_core::registry::RegistryError::NotProtected(_)) => Ok(false),
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Withdraw every approval.
    async fn revoke_all(&self) -> zbus::fdo::Result<()> {
        tracing::info!("revoke_all requested");
        self.registry
            .revoke_all()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, GuardService) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protected_data.json");
        std::fs::write(&path, r#"["firefox"]"#).unwrap();
        let registry = Arc::new(ProtectedRegistry::load(path).unwrap());
        let status = Arc::new(Mutex::new(GuardStatus {
            attempts: 2,
            ..Default::default()
        }));
        (dir, GuardService::new(registry, status))
    }

    #[test]
    fn test_interface_name_matches_client() {
        use zbus::object_server::Interface;
        assert_eq!(GuardService::name().as_str(), faceid_core::bus::INTERFACE);
    }

    #[test]
    fn test_status_json() {
        let (_dir, svc) = service();
        let value: serde_json::Value = serde_json::from_str(&svc.status_json().unwrap()).unwrap();
        assert_eq!(value["status"]["attempts"], 2);
        assert!(value["version"].is_string());
    }

    #[test]
    fn test_protected_json() {
        let (_dir, svc) = service();
        svc.registry.approve("firefox").unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&svc.protected_json().unwrap()).unwrap();
        assert_eq!(value[0]["name"], "firefox");
        assert_eq!(value[0]["approved"], true);
    }
}
