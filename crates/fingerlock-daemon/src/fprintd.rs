//! fprintd and logind over the system bus
//!
//! Signal streams are forwarded into the unbounded channels the session
//! drains, one forwarding task per subscription. A forwarder exits once its
//! receiver is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::{proxy, zvariant::OwnedObjectPath, Connection};

use fingerlock_core::{FPRINT_BUS_NAME, FPRINT_MANAGER_PATH};

use crate::bus::{BusConnector, DeviceSignal, FprintDevice, FprintManager, SleepSource};
use crate::error::{DaemonError, Result};

#[proxy(interface = "net.reactivated.Fprint.Manager", default_service = "net.reactivated.Fprint")]
trait Manager {
    fn get_default_device(&self) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(interface = "net.reactivated.Fprint.Device", default_service = "net.reactivated.Fprint")]
trait Device {
    fn claim(&self, username: &str) -> zbus::Result<()>;

    fn release(&self) -> zbus::Result<()>;

    fn verify_start(&self, finger_name: &str) -> zbus::Result<()>;

    fn verify_stop(&self) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Connects to fprintd on the system bus
#[derive(Debug, Clone, Copy, Default)]
pub struct ZbusConnector;

impl ZbusConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BusConnector for ZbusConnector {
    async fn connect(&self) -> Result<Arc<dyn FprintManager>> {
        let connection = Connection::system()
            .await
            .map_err(|e| DaemonError::Bus(e.to_string()))?;

        let proxy = ManagerProxy::builder(&connection)
            .destination(FPRINT_BUS_NAME)
            .and_then(|b| b.path(FPRINT_MANAGER_PATH))
            .map_err(|e| DaemonError::Manager(e.to_string()))?
            .build()
            .await
            .map_err(|e| DaemonError::Manager(e.to_string()))?;

        Ok(Arc::new(ZbusManager { connection, proxy }))
    }
}

/// fprintd's manager object
pub struct ZbusManager {
    connection: Connection,
    proxy: ManagerProxy<'static>,
}

#[async_trait]
impl FprintManager for ZbusManager {
    async fn get_default_device(&self) -> Result<String> {
        let path = self.proxy.get_default_device().await?;
        Ok(path.as_str().to_owned())
    }

    async fn open_device(&self, path: &str) -> Result<Arc<dyn FprintDevice>> {
        let proxy = DeviceProxy::builder(&self.connection)
            .destination(FPRINT_BUS_NAME)?
            .path(path.to_owned())?
            .build()
            .await?;

        Ok(Arc::new(ZbusDevice {
            path: path.to_owned(),
            proxy,
        }))
    }
}

/// A device object exported by fprintd
pub struct ZbusDevice {
    path: String,
    proxy: DeviceProxy<'static>,
}

#[async_trait]
impl FprintDevice for ZbusDevice {
    fn path(&self) -> &str {
        &self.path
    }

    async fn claim(&self, app_id: &str) -> Result<()> {
        Ok(self.proxy.claim(app_id).await?)
    }

    async fn verify_start(&self, finger: &str) -> Result<()> {
        Ok(self.proxy.verify_start(finger).await?)
    }

    async fn verify_stop(&self) -> Result<()> {
        Ok(self.proxy.verify_stop().await?)
    }

    async fn release(&self) -> Result<()> {
        Ok(self.proxy.release().await?)
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<DeviceSignal>> {
        let mut stream = self.proxy.inner().receive_all_signals().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let path = self.path.clone();

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let header = message.header();
                let name = header
                    .member()
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default();

                let signal = match name.as_str() {
                    "VerifyStatus" => match message.body().deserialize::<(String, bool)>() {
                        Ok((result, done)) => DeviceSignal::VerifyStatus { result, done },
                        Err(e) => {
                            warn!("Malformed VerifyStatus from {}: {}", path, e);
                            continue;
                        }
                    },
                    "VerifyFingerSelected" => DeviceSignal::VerifyFingerSelected {
                        finger: message.body().deserialize::<String>().unwrap_or_default(),
                    },
                    _ => DeviceSignal::Other { name },
                };

                if tx.send(signal).is_err() {
                    break;
                }
            }
            debug!("Signal forwarding for {} stopped", path);
        });

        Ok(rx)
    }
}

/// `PrepareForSleep` from systemd-logind
#[derive(Debug, Clone, Copy, Default)]
pub struct LogindSleep;

impl LogindSleep {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SleepSource for LogindSleep {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<bool>> {
        let connection = Connection::system()
            .await
            .map_err(|e| DaemonError::Bus(e.to_string()))?;
        let proxy = Login1ManagerProxy::new(&connection).await?;
        let mut stream = proxy.receive_prepare_for_sleep().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Keeps the connection alive for the stream
            let _proxy = proxy;
            while let Some(signal) = stream.next().await {
                let going_to_sleep = match signal.args() {
                    Ok(args) => args.start,
                    Err(e) => {
                        warn!("Malformed PrepareForSleep: {}", e);
                        continue;
                    }
                };
                if tx.send(going_to_sleep).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
