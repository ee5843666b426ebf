extern crate nix;
extern crate udev;

use std::io;
use std::os::unix::prelude::AsRawFd;
use std::thread;

use calloop::channel::SyncSender;
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, error};
use udev::{EventType, MonitorBuilder, MonitorSocket};

use crate::daemon::HotplugEvent;

/// Kernel DRM uevents, for drivers that don't report hotplug through RandR.
pub struct Udev {
    pollfd: PollFd,
    socket: MonitorSocket,
}

impl Udev {
    pub fn new() -> io::Result<Udev> {
        let socket = MonitorBuilder::new()?.match_subsystem("drm")?.listen()?;

        let fd = socket.as_raw_fd();
        let pollfd = PollFd::new(fd, PollFlags::POLLIN);

        Ok(Udev { pollfd, socket })
    }

    /// Blocks until the next DRM `change` event and returns the device name.
    pub fn wait(&self) -> io::Result<String> {
        loop {
            poll(&mut [self.pollfd], -1)?;

            for event in self.socket.iter() {
                let sysname = event.device().sysname().to_string_lossy().into_owned();
                debug!("udev {:?} on {sysname}", event.event_type());
                if event.event_type() == EventType::Change {
                    return Ok(sysname);
                }
            }
        }
    }

    /// Forwards DRM change events into `events` from a background thread.
    pub fn watch(events: SyncSender<HotplugEvent>) -> io::Result<()> {
        thread::Builder::new()
            .name("udev watcher".to_owned())
            .spawn(move || {
                let udev = match Udev::new() {
                    Ok(udev) => udev,
                    Err(err) => {
                        error!("error listening for udev events: {err}");
                        return;
                    }
                };
                loop {
                    let device = match udev.wait() {
                        Ok(device) => device,
                        Err(err) => {
                            error!("error waiting for udev events: {err}");
                            return;
                        }
                    };
                    if events.send(HotplugEvent::Drm { device }).is_err() {
                        return;
                    }
                }
            })?;
        Ok(())
    }
}
