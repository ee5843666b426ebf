//! The event loop driving reconfiguration passes.

use std::time::Duration;

use anyhow::{anyhow, Context};
use calloop::channel::{self, Channel, Event};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopSignal};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::crtc::{CrtcAllocator, FirstFit};
use crate::lid::{LidSensor, NoLid, UPowerLid};
use crate::notify;
use crate::randr_util::Randr;
use crate::reconcile;
use crate::server::{Connection, DisplayServer, OutputId};
use crate::udev_util::Udev;

/// Something about the connected outputs changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// RandR output-change notification.
    Output {
        output: OutputId,
        connection: Connection,
    },
    /// Kernel DRM change uevent.
    Drm { device: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    /// Waiting out the startup delay; events are absorbed by the first pass.
    Settling,
    Watching,
}

pub struct Daemon<S> {
    server: S,
    lid: Box<dyn LidSensor>,
    config: Config,
    allocator: Box<dyn CrtcAllocator>,
    phase: Phase,
    stop_signal: Option<LoopSignal>,
    watcher_lost: bool,
}

impl<S: DisplayServer> Daemon<S> {
    pub fn new(server: S, lid: Box<dyn LidSensor>, config: Config) -> Self {
        Daemon {
            server,
            lid,
            config,
            allocator: Box::new(FirstFit),
            phase: Phase::Starting,
            stop_signal: None,
            watcher_lost: false,
        }
    }

    /// Runs one full pass. Failures are logged; the next event retries.
    fn reconfigure(&mut self) -> bool {
        match reconcile::reconfigure(&self.server, &*self.lid, &self.config, &*self.allocator) {
            Ok(true) => {
                notify::run_background_command(&self.config.background_command);
                true
            }
            Ok(false) => {
                debug!("outputs already up to date");
                false
            }
            Err(err) => {
                error!("error reconfiguring outputs: {err}");
                false
            }
        }
    }

    pub fn settle(&mut self) {
        self.phase = Phase::Settling;
    }

    /// End of the startup delay: bring everything in line once, then follow events.
    pub fn settled(&mut self) -> bool {
        self.phase = Phase::Watching;
        let changed = self.reconfigure();
        info!("Processing events...");
        changed
    }

    pub fn on_hotplug(&mut self, event: HotplugEvent) -> bool {
        if self.phase != Phase::Watching {
            debug!("absorbing {event:?} while settling");
            return false;
        }

        match event {
            HotplugEvent::Output { output, connection } => {
                let name = match self.server.output_info(output) {
                    Ok(info) => info.name,
                    Err(err) => {
                        warn!("error querying changed output {output:#x}: {err}");
                        format!("{output:#x}")
                    }
                };
                info!(
                    "output change: {name} connected={}",
                    connection.is_connected()
                );
            }
            HotplugEvent::Drm { device } => info!("DRM change on {device}"),
        }

        self.reconfigure()
    }

    pub fn on_lid(&mut self, closed: bool) -> bool {
        info!(
            "New lid state: {}",
            if closed { "closed" } else { "opened" }
        );
        if self.phase != Phase::Watching {
            return false;
        }
        self.reconfigure()
    }

    fn watcher_stopped(&mut self) {
        error!("output watcher stopped");
        self.watcher_lost = true;
        if let Some(signal) = &self.stop_signal {
            signal.stop();
        }
    }
}

fn insert_hotplug_source<S: DisplayServer + 'static>(
    event_loop: &EventLoop<'static, Daemon<S>>,
    events: Channel<HotplugEvent>,
) -> anyhow::Result<()> {
    event_loop
        .handle()
        .insert_source(events, |event, _, daemon| match event {
            Event::Msg(event) => {
                daemon.on_hotplug(event);
            }
            Event::Closed => daemon.watcher_stopped(),
        })
        .map_err(|err| err.error)
        .context("error watching output changes")?;
    Ok(())
}

fn insert_lid_source<S: DisplayServer + 'static>(
    event_loop: &EventLoop<'static, Daemon<S>>,
    events: Channel<bool>,
) -> anyhow::Result<()> {
    event_loop
        .handle()
        .insert_source(events, |event, _, daemon| match event {
            Event::Msg(closed) => {
                daemon.on_lid(closed);
            }
            Event::Closed => warn!("lid watcher stopped"),
        })
        .map_err(|err| err.error)
        .context("error watching lid events")?;
    Ok(())
}

fn connect_lid(events: channel::SyncSender<bool>) -> Box<dyn LidSensor> {
    let lid = match UPowerLid::connect() {
        Ok(lid) => lid,
        Err(err) => {
            warn!("lid state unavailable, assuming it is open: {err}");
            return Box::new(NoLid);
        }
    };
    if let Err(err) = lid.watch(events) {
        warn!("error watching lid events: {err}");
    }
    Box::new(lid)
}

/// Runs the daemon until the output watcher goes away.
pub fn run(config: Config) -> anyhow::Result<()> {
    let wait = config.wait()?;

    let mut event_loop: EventLoop<'static, Daemon<Randr>> =
        EventLoop::try_new().context("error creating event loop")?;

    let (hotplug_tx, hotplug_rx) = channel::sync_channel(1);
    Randr::connect()
        .context("error connecting to X server")?
        .watch_output_changes(hotplug_tx.clone())
        .context("error subscribing to output changes")?;
    if config.drm_hotplug {
        Udev::watch(hotplug_tx.clone()).context("error starting udev watcher")?;
    }
    drop(hotplug_tx);
    insert_hotplug_source(&event_loop, hotplug_rx)?;

    let (lid_tx, lid_rx) = channel::sync_channel(1);
    let lid = connect_lid(lid_tx);
    insert_lid_source(&event_loop, lid_rx)?;

    let server = Randr::connect().context("error connecting to X server")?;
    let mut daemon = Daemon::new(server, lid, config);
    daemon.stop_signal = Some(event_loop.get_signal());

    info!("Waiting {} seconds before starting", wait.as_secs());
    daemon.settle();
    event_loop
        .handle()
        .insert_source(Timer::from_duration(wait), |_, _, daemon| {
            daemon.settled();
            TimeoutAction::Drop
        })
        .map_err(|err| err.error)
        .context("error starting settle timer")?;

    event_loop
        .run(None::<Duration>, &mut daemon, |_| ())
        .context("error running event loop")?;

    if daemon.watcher_lost {
        return Err(anyhow!("lost connection to the X server"));
    }
    Ok(())
}
