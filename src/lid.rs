//! Laptop lid state from UPower.

use std::thread;

use tracing::{info, warn};
use zbus::proxy;

use crate::error::Result;

#[proxy(
    interface = "org.freedesktop.UPower",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower"
)]
trait UPower {
    #[zbus(property)]
    fn lid_is_closed(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn lid_is_present(&self) -> zbus::Result<bool>;
}

pub trait LidSensor {
    fn is_closed(&self) -> Result<bool>;
}

/// Lid state as reported by UPower on the system bus.
#[derive(Clone)]
pub struct UPowerLid {
    proxy: UPowerProxyBlocking<'static>,
}

impl UPowerLid {
    pub fn connect() -> Result<Self> {
        let conn = zbus::blocking::Connection::system()?;
        let proxy = UPowerProxyBlocking::new(&conn)?;
        if !proxy.lid_is_present().unwrap_or(true) {
            info!("UPower reports no lid");
        }
        Ok(UPowerLid { proxy })
    }

    /// Forwards every lid state change into `events` from a background thread.
    ///
    /// The thread stops once the receiving side is gone.
    pub fn watch(&self, events: calloop::channel::SyncSender<bool>) -> std::io::Result<()> {
        let proxy = self.proxy.clone();
        thread::Builder::new()
            .name("lid watcher".to_owned())
            .spawn(move || {
                for change in proxy.receive_lid_is_closed_changed() {
                    let closed = match change.get() {
                        Ok(closed) => closed,
                        Err(err) => {
                            warn!("error reading LidIsClosed: {err}");
                            continue;
                        }
                    };
                    if events.send(closed).is_err() {
                        break;
                    }
                }
            })?;
        Ok(())
    }
}

impl LidSensor for UPowerLid {
    fn is_closed(&self) -> Result<bool> {
        Ok(self.proxy.lid_is_closed()?)
    }
}

/// For machines without a reachable UPower: the lid is always open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLid;

impl LidSensor for NoLid {
    fn is_closed(&self) -> Result<bool> {
        Ok(false)
    }
}
