//! # Network Interfaces
//!
//! Read-only view of the kernel's network interfaces through sysfs
//! (`/sys/class/net/<iface>/operstate`). The device does not manage the
//! wireless association itself; it discovers the configured interface during
//! bootstrap and then waits a bounded time for the link to report `up`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to read network interfaces from {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No network interfaces found under {0}")]
    NoInterfaces(PathBuf),

    #[error("Network interface {0} not present")]
    MissingInterface(String),

    #[error("Link on {iface} not up after {waited:?} (last state: {state})")]
    LinkTimeout {
        iface: String,
        waited: Duration,
        state: OperState,
    },
}

/// RFC 2863 operational state as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
    Dormant,
    LowerLayerDown,
    NotPresent,
    Testing,
    Unknown,
}

impl OperState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "up" => OperState::Up,
            "down" => OperState::Down,
            "dormant" => OperState::Dormant,
            "lowerlayerdown" => OperState::LowerLayerDown,
            "notpresent" => OperState::NotPresent,
            "testing" => OperState::Testing,
            _ => OperState::Unknown,
        }
    }
}

impl std::fmt::Display for OperState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            OperState::Up => "up",
            OperState::Down => "down",
            OperState::Dormant => "dormant",
            OperState::LowerLayerDown => "lowerlayerdown",
            OperState::NotPresent => "notpresent",
            OperState::Testing => "testing",
            OperState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub path: PathBuf,
    pub wireless: bool,
    pub state: OperState,
}

impl Interface {
    fn load(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let wireless = path.join("wireless").exists() || path.join("phy80211").exists();
        let state = read_operstate(&path);
        Some(Self {
            name,
            path,
            wireless,
            state,
        })
    }

    pub fn refresh(&mut self) -> OperState {
        self.state = read_operstate(&self.path);
        self.state
    }
}

fn read_operstate(iface_dir: &Path) -> OperState {
    fs::read_to_string(iface_dir.join("operstate"))
        .map(|raw| OperState::parse(&raw))
        .unwrap_or(OperState::Unknown)
}

/// Snapshot of the interfaces present under a sysfs root.
#[derive(Debug, Clone)]
pub struct NetInterfaces {
    root: PathBuf,
    interfaces: Vec<Interface>,
}

impl NetInterfaces {
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self, NetworkError> {
        let root = root.into();
        let entries = fs::read_dir(&root).map_err(|source| NetworkError::Scan {
            path: root.clone(),
            source,
        })?;

        let mut interfaces: Vec<Interface> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Interface::load(entry.path()))
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));

        if interfaces.is_empty() {
            return Err(NetworkError::NoInterfaces(root));
        }

        for iface in &interfaces {
            debug!(
                "Interface {} (wireless: {}) is {}",
                iface.name, iface.wireless, iface.state
            );
        }
        info!("Found {} network interfaces", interfaces.len());

        Ok(Self { root, interfaces })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn require(&self, name: &str) -> Result<Interface, NetworkError> {
        self.interfaces
            .iter()
            .find(|iface| iface.name == name)
            .cloned()
            .ok_or_else(|| NetworkError::MissingInterface(name.to_string()))
    }
}

/// Waits until `iface` reports an operational link. A zero timeout checks once.
pub async fn wait_for_link(iface: &mut Interface, timeout: Duration) -> Result<(), NetworkError> {
    let started = Instant::now();
    loop {
        let state = iface.refresh();
        if state == OperState::Up {
            info!(
                "Link up on {} after {:?}",
                iface.name,
                started.elapsed()
            );
            return Ok(());
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(NetworkError::LinkTimeout {
                iface: iface.name.clone(),
                waited,
                state,
            });
        }
        debug!("Waiting for link on {} (state: {})", iface.name, state);
        sleep(LINK_POLL_INTERVAL.min(timeout - waited)).await;
    }
}

/// Logs a hint when the configured interface is not a wireless one.
pub fn check_wireless(iface: &Interface, ssid: &str) {
    if iface.wireless {
        if !ssid.is_empty() {
            info!("Expecting {} to join network {}", iface.name, ssid);
        }
    } else {
        warn!("Interface {} is not a wireless interface", iface.name);
    }
}
