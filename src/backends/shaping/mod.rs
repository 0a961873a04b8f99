// Shaping backend trait and backend selection
//
// A backend only composes command lines. The helper executes them through a
// CommandRunner; nothing here touches kernel state directly.

use super::BackendPriority;
use crate::limit::ShapingLimit;
use anyhow::Result;
use std::fmt;

#[cfg(feature = "shaper-dummynet")]
pub mod dummynet;

#[cfg(feature = "shaper-tc")]
pub mod tc;

/// One shell command line understood by the helper's execution loop
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation(String);

impl Invocation {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Translates limits into the vendor command lines that realize them
pub trait ShapingBackend: Send + Sync {
    /// Backend name (e.g., "dummynet", "tc")
    fn name(&self) -> &'static str;

    /// Backend priority for auto-selection
    fn priority(&self) -> BackendPriority;

    /// Check if this backend's tools exist on the current system
    fn is_available() -> bool
    where
        Self: Sized;

    /// Create pipes at the initial rates, bind traffic to them and enable filtering
    fn setup(&self, limit: &ShapingLimit) -> Vec<Invocation>;

    /// Move an installed configuration from `previous` to `next`
    ///
    /// Unread updates are overwritten in the command channel, so the helper
    /// may still be running some layout older than `previous`. The emitted
    /// commands must reach `next` from any configuration `setup` or `update`
    /// could have installed.
    fn update(&self, previous: &ShapingLimit, next: &ShapingLimit) -> Vec<Invocation>;

    /// Restore default filtering and flush all pipes
    fn teardown(&self) -> Vec<Invocation>;

    /// Extra arguments the helper needs to rebuild an identical backend
    fn helper_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Backend metadata for selection
#[derive(Debug, Clone)]
pub struct ShapingBackendInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

/// Detect all compiled-in shaping backends
pub fn detect_backends() -> Vec<ShapingBackendInfo> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();

    #[cfg(feature = "shaper-dummynet")]
    {
        backends.push(ShapingBackendInfo {
            name: "dummynet",
            priority: BackendPriority::Best,
            available: dummynet::Dummynet::is_available(),
        });
    }

    #[cfg(feature = "shaper-tc")]
    {
        backends.push(ShapingBackendInfo {
            name: "tc",
            priority: BackendPriority::Good,
            available: tc::TcIfb::is_available(),
        });
    }

    backends
}

/// Auto-select best available backend (returns None if unavailable)
pub fn select_backend(
    preference: Option<&str>,
    interface: Option<&str>,
) -> Option<Box<dyn ShapingBackend>> {
    if let Some(name) = preference {
        log::info!("Using preferred shaping backend: {}", name);
        return match create_backend(name, interface) {
            Ok(backend) => Some(backend),
            Err(e) => {
                log::error!("Failed to create shaping backend {}: {}", name, e);
                None
            }
        };
    }

    let available = detect_backends();

    log::debug!("Available shaping backends:");
    for backend in &available {
        log::debug!(
            "  {} - priority: {:?}, available: {}",
            backend.name,
            backend.priority,
            backend.available
        );
    }

    let selected = available
        .iter()
        .filter(|b| b.available)
        .max_by_key(|b| b.priority)
        .and_then(|info| {
            log::info!("Auto-selected shaping backend: {}", info.name);
            create_backend(info.name, interface).ok()
        });

    if selected.is_none() {
        log::error!("No shaping backend available");
    }

    selected
}

/// Create a backend by name
#[cfg_attr(not(feature = "shaper-tc"), allow(unused_variables))]
pub fn create_backend(name: &str, interface: Option<&str>) -> Result<Box<dyn ShapingBackend>> {
    log::debug!("Creating shaping backend {name}");
    match name {
        #[cfg(feature = "shaper-dummynet")]
        "dummynet" => Ok(Box::new(dummynet::Dummynet::new())),

        #[cfg(feature = "shaper-tc")]
        "tc" => {
            let backend = match interface {
                Some(iface) => tc::TcIfb::with_interface(iface),
                None => tc::TcIfb::new()?,
            };
            Ok(Box::new(backend))
        }

        _ => Err(anyhow::anyhow!("Unknown shaping backend: {}", name)),
    }
}
