//! Fleet-level management service.
//!
//! Single-server operations delegate to a [`Runtime`] and trust it to emit
//! its own `ServersChanged` event; OAuth logout and the bulk operations
//! emit through [`warden_events::EventLog`] directly. The bounded worker
//! pool backing `restart_all` chunks the fleet into groups of
//! [`MAX_WORKERS`] and spawns one thread per server in a chunk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use warden_events::EventLog;
use warden_types::{BulkOperationResult, EventType};

/// Fixed size of the worker pool backing `restart_all`.
pub const MAX_WORKERS: usize = 4;

/// A server as reported by the runtime facade's fleet snapshot.
#[derive(Debug, Clone)]
pub struct FleetServer {
    pub name: String,
    pub enabled: bool,
    pub oauth: Option<Value>,
}

/// Write-gate configuration. Both gates, when set, refuse every mutating
/// operation.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub disable_management: bool,
    #[serde(default)]
    pub read_only_mode: bool,
}

impl GateConfig {
    fn check(&self) -> Result<(), ManageError> {
        if self.disable_management {
            return Err(ManageError::ManagementDisabled);
        }
        if self.read_only_mode {
            return Err(ManageError::ReadOnlyMode);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ManageError {
    #[error("server name must not be empty")]
    EmptyName,
    #[error("management is disabled")]
    ManagementDisabled,
    #[error("read-only mode is enabled")]
    ReadOnlyMode,
    #[error("runtime operation failed: {0}")]
    Runtime(#[from] anyhow::Error),
}

/// The seam the management service is built against. Actual server
/// lifecycle management is out of scope here; this is only the trait.
pub trait Runtime: Send + Sync {
    fn enable_server(&self, name: &str, enabled: bool) -> anyhow::Result<()>;
    fn restart_server(&self, name: &str) -> anyhow::Result<()>;
    fn get_all_servers(&self) -> anyhow::Result<Vec<FleetServer>>;
    fn bulk_enable_servers(
        &self,
        names: &[String],
        enabled: bool,
    ) -> anyhow::Result<BTreeMap<String, String>>;
    fn get_server_tools(&self, name: &str) -> anyhow::Result<Vec<Value>>;
    fn trigger_oauth_login(&self, name: &str) -> anyhow::Result<()>;
    fn trigger_oauth_logout(&self, name: &str) -> anyhow::Result<()>;
    fn refresh_oauth_token(&self, name: &str) -> anyhow::Result<()>;
    fn emit_servers_changed(&self, reason: &str, extra: BTreeMap<String, String>);
}

fn validate_name(name: &str) -> Result<(), ManageError> {
    if name.trim().is_empty() {
        return Err(ManageError::EmptyName);
    }
    Ok(())
}

/// Fleet-level management service, generic over the runtime it drives.
pub struct ManagementService<R: Runtime> {
    runtime: R,
    gates: GateConfig,
    events: Mutex<EventLog>,
}

impl<R: Runtime> ManagementService<R> {
    pub fn new(runtime: R, gates: GateConfig) -> Self {
        Self { runtime, gates, events: Mutex::new(EventLog::new()) }
    }

    pub fn events(&self) -> Vec<warden_types::ActivityEvent> {
        self.events.lock().expect("event log lock poisoned").all_events().to_vec()
    }

    fn record(&self, event_type: EventType) {
        self.events.lock().expect("event log lock poisoned").record(event_type);
    }

    // --- single-server operations ---

    pub fn enable(&self, name: &str, enabled: bool) -> Result<(), ManageError> {
        validate_name(name)?;
        self.gates.check()?;
        self.runtime.enable_server(name, enabled)?;
        Ok(())
    }

    pub fn restart(&self, name: &str) -> Result<(), ManageError> {
        validate_name(name)?;
        self.gates.check()?;
        self.runtime.restart_server(name)?;
        Ok(())
    }

    pub fn trigger_oauth_login(&self, name: &str) -> Result<(), ManageError> {
        validate_name(name)?;
        self.gates.check()?;
        self.runtime.trigger_oauth_login(name)?;
        Ok(())
    }

    /// Unlike `enable`/`restart`, the service — not the runtime — emits
    /// the event for OAuth logout.
    pub fn trigger_oauth_logout(&self, name: &str) -> Result<(), ManageError> {
        validate_name(name)?;
        self.gates.check()?;
        self.runtime.trigger_oauth_logout(name)?;
        self.record(EventType::OAuthLoggedOut { server: name.to_string() });
        Ok(())
    }

    // --- bulk operations ---

    /// Restarts every fleet server through a fixed-size worker pool.
    /// `cancelled` is checked before each server starts; servers not yet
    /// started when it flips record `errors[name] = "context canceled"`
    /// without running.
    pub fn restart_all(&self, cancelled: &AtomicBool) -> Result<BulkOperationResult, ManageError> {
        self.gates.check()?;
        let servers = self.runtime.get_all_servers()?;
        let names: Vec<String> = servers.into_iter().map(|s| s.name).collect();

        let result = Arc::new(Mutex::new(BulkOperationResult::new()));
        for chunk in names.chunks(MAX_WORKERS) {
            std::thread::scope(|scope| {
                let mut handles = Vec::new();
                for name in chunk {
                    if cancelled.load(Ordering::SeqCst) {
                        result
                            .lock()
                            .expect("bulk result lock poisoned")
                            .record_failure(name.clone(), "context canceled");
                        continue;
                    }
                    let name = name.clone();
                    let result = Arc::clone(&result);
                    handles.push(scope.spawn(move || {
                        match self.runtime.restart_server(&name) {
                            Ok(()) => {
                                result.lock().expect("bulk result lock poisoned").record_success()
                            }
                            Err(e) => result
                                .lock()
                                .expect("bulk result lock poisoned")
                                .record_failure(name, e.to_string()),
                        }
                    }));
                }
                for h in handles {
                    let _ = h.join();
                }
            });
        }

        Ok(Arc::try_unwrap(result)
            .expect("no outstanding references to bulk result")
            .into_inner()
            .expect("bulk result lock poisoned"))
    }

    fn set_enabled_all(&self, enabled: bool) -> Result<BulkOperationResult, ManageError> {
        self.gates.check()?;
        let servers = self.runtime.get_all_servers()?;
        let targets: Vec<String> = servers
            .into_iter()
            .filter(|s| s.enabled != enabled)
            .map(|s| s.name)
            .collect();

        let mut result = BulkOperationResult::new();
        if targets.is_empty() {
            return Ok(result);
        }

        let errors = self.runtime.bulk_enable_servers(&targets, enabled)?;
        for name in &targets {
            match errors.get(name) {
                Some(err) => result.record_failure(name.clone(), err.clone()),
                None => result.record_success(),
            }
        }
        self.record(EventType::ServersChanged {
            reason: if enabled { "enable_all" } else { "disable_all" }.to_string(),
            extra: BTreeMap::new(),
        });
        Ok(result)
    }

    pub fn enable_all(&self) -> Result<BulkOperationResult, ManageError> {
        self.set_enabled_all(true)
    }

    pub fn disable_all(&self) -> Result<BulkOperationResult, ManageError> {
        self.set_enabled_all(false)
    }

    /// Logs out only servers carrying an `oauth` record, emitting one
    /// aggregate event once at least one logout succeeded (in addition to
    /// the per-server event `trigger_oauth_logout` already emits).
    pub fn logout_all_oauth(&self) -> Result<BulkOperationResult, ManageError> {
        self.gates.check()?;
        let servers = self.runtime.get_all_servers()?;
        let targets: Vec<String> = servers
            .into_iter()
            .filter(|s| s.oauth.is_some())
            .map(|s| s.name)
            .collect();

        let mut result = BulkOperationResult::new();
        let mut any_success = false;
        for name in targets {
            match self.trigger_oauth_logout(&name) {
                Ok(()) => {
                    result.record_success();
                    any_success = true;
                }
                Err(e) => result.record_failure(name, e.to_string()),
            }
        }
        if any_success {
            self.record(EventType::ServersChanged {
                reason: "logout_all_oauth".to_string(),
                extra: BTreeMap::new(),
            });
        }
        Ok(result)
    }
}
