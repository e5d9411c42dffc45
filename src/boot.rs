//! # Connection Bootstrapper
//!
//! Process-wide bring-up as a typestate machine. Each stage consumes the
//! previous one, so storage, network interfaces, the event loop, the link and
//! the output pin can only be initialized in that order:
//!
//! ```text
//! Fresh ─init_storage→ StorageReady ─init_netif→ NetifReady
//!   ─create_event_loop→ LoopReady ─establish_link→ Linked
//!   ─configure_output→ Ready
//! ```
//!
//! Every step fails fast. There is no degraded mode and no retry here: any
//! error is returned to `main`, which aborts the process.

use std::path::PathBuf;
use std::time::Duration;

use statum::{machine, state};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::{AppConfig, NetworkConfig};
use crate::gpio::{GpioError, OutputLine, OutputPin};
use crate::network::{self, Interface, NetInterfaces, NetworkError};
use crate::persistence::config_store::{ConfigStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Network initialization failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Failed to create event loop: {0}")]
    EventLoop(#[source] std::io::Error),

    #[error("Output pin configuration failed: {0}")]
    Gpio(#[from] GpioError),
}

/// Bring-up stages. The located interface travels with the machine until the
/// link is up.
#[state]
#[derive(Debug, Clone)]
pub enum BootStage {
    Fresh,
    StorageReady,
    NetifReady(Interface),
    LoopReady(Interface),
    Linked,
    Ready,
}

#[machine]
#[derive(Debug)]
pub struct Bootstrapper<S: BootStage> {
    config_path: PathBuf,
    config: AppConfig,
}

fn locate_interface(network: &NetworkConfig) -> Result<Interface, NetworkError> {
    let interfaces = NetInterfaces::scan(&network.sysfs_root)?;
    debug!(
        "Found {} interfaces under {}",
        interfaces.iter().count(),
        interfaces.root().display()
    );
    interfaces.require(&network.interface)
}

impl Bootstrapper<Fresh> {
    pub fn create(config_path: impl Into<PathBuf>) -> Self {
        Self::new(config_path.into(), AppConfig::default())
    }

    /// (a) Prepares persistent storage and loads the configuration from it.
    pub fn init_storage(mut self) -> Result<Bootstrapper<StorageReady>, BootError> {
        info!("Initializing storage");
        let store = ConfigStore::open(&self.config_path)?;
        self.config = store.load()?;
        Ok(self.transition())
    }
}

impl Bootstrapper<StorageReady> {
    /// (b) Discovers network interfaces and locates the configured one.
    pub fn init_netif(self) -> Result<Bootstrapper<NetifReady>, BootError> {
        let network = &self.config.network;
        info!("Initializing network interfaces from {}", network.sysfs_root.display());

        let iface = locate_interface(network)?;
        network::check_wireless(&iface, &network.ssid);
        Ok(self.transition_with(iface))
    }
}

impl Bootstrapper<NetifReady> {
    /// (c) Creates the event loop every later stage runs on.
    pub fn create_event_loop(self) -> Result<(Bootstrapper<LoopReady>, Runtime), BootError> {
        let iface = match self.get_state_data() {
            Some(iface) => iface.clone(),
            None => locate_interface(&self.config.network)?,
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ledcontroller")
            .build()
            .map_err(BootError::EventLoop)?;
        debug!("Event loop created");
        Ok((self.transition_with(iface), runtime))
    }
}

impl Bootstrapper<LoopReady> {
    /// (d) Waits for the configured interface to carry a usable link.
    pub async fn establish_link(self) -> Result<Bootstrapper<Linked>, BootError> {
        let timeout = Duration::from_secs(self.config.network.link_timeout_secs);
        let mut iface = match self.get_state_data() {
            Some(iface) => iface.clone(),
            None => locate_interface(&self.config.network)?,
        };

        info!("Waiting up to {:?} for link on {}", timeout, iface.name);
        network::wait_for_link(&mut iface, timeout).await?;
        Ok(self.transition())
    }
}

impl Bootstrapper<Linked> {
    /// (e) Acquires the output line through `open` and sets its initial level.
    pub fn configure_output<L, F>(
        self,
        open: F,
    ) -> Result<(Bootstrapper<Ready>, OutputPin<L>), BootError>
    where
        L: OutputLine,
        F: FnOnce(u8) -> Result<L, GpioError>,
    {
        let pin = &self.config.pin;
        let line = open(pin.gpio)?;
        let output = OutputPin::configure(pin.gpio, line, pin.initial_level);
        Ok((self.transition(), output))
    }
}

impl Bootstrapper<Ready> {
    pub fn into_config(self) -> AppConfig {
        info!("Bootstrap complete");
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::testing::RecordingLine;
    use crate::gpio::PinLevel;
    use std::fs;
    use std::path::Path;

    fn write_fixture(root: &Path, operstate: &str) -> PathBuf {
        let net = root.join("net");
        let wlan = net.join("wlan0");
        fs::create_dir_all(wlan.join("wireless")).unwrap();
        fs::write(wlan.join("operstate"), operstate).unwrap();

        let config_path = root.join("etc").join("config.toml");
        fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        fs::write(
            &config_path,
            format!(
                "[network]\nsysfs_root = {:?}\nlink_timeout_secs = 0\n\n[pin]\ngpio = 17\ninitial_level = \"high\"\n",
                net.display().to_string()
            ),
        )
        .unwrap();
        config_path
    }

    #[test]
    fn full_sequence_yields_configured_pin() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = write_fixture(tmp.path(), "up\n");
        let line = RecordingLine::default();

        let boot = Bootstrapper::create(config_path)
            .init_storage()
            .unwrap()
            .init_netif()
            .unwrap();
        assert_eq!(boot.get_state_data().map(|iface| iface.name.as_str()), Some("wlan0"));
        let (boot, runtime) = boot.create_event_loop().unwrap();
        let boot = runtime.block_on(boot.establish_link()).unwrap();

        let opened = line.clone();
        let (boot, pin) = boot
            .configure_output(move |gpio| {
                assert_eq!(gpio, 17);
                Ok(opened)
            })
            .unwrap();

        assert_eq!(pin.level(), PinLevel::High);
        assert_eq!(line.writes(), vec![PinLevel::High]);
        assert_eq!(boot.into_config().pin.gpio, 17);
    }

    #[test]
    fn missing_interface_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = write_fixture(tmp.path(), "up\n");
        fs::write(
            &config_path,
            format!(
                "[network]\ninterface = \"eth9\"\nsysfs_root = {:?}\n",
                tmp.path().join("net").display().to_string()
            ),
        )
        .unwrap();

        let err = Bootstrapper::create(config_path)
            .init_storage()
            .unwrap()
            .init_netif()
            .unwrap_err();
        assert!(matches!(
            err,
            BootError::Network(NetworkError::MissingInterface(_))
        ));
    }

    #[test]
    fn link_down_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = write_fixture(tmp.path(), "down\n");

        let boot = Bootstrapper::create(config_path)
            .init_storage()
            .unwrap()
            .init_netif()
            .unwrap();
        let (boot, runtime) = boot.create_event_loop().unwrap();
        let err = runtime.block_on(boot.establish_link()).unwrap_err();

        assert!(matches!(
            err,
            BootError::Network(NetworkError::LinkTimeout { .. })
        ));
    }

    #[test]
    fn unreadable_storage_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, "not = [valid").unwrap();

        let err = Bootstrapper::create(config_path).init_storage().unwrap_err();
        assert!(matches!(err, BootError::Storage(StorageError::Parse { .. })));
    }
}
