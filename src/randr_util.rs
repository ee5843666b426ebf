use std::cell::Cell;
use std::thread;

use calloop::channel::SyncSender;
use tracing::{debug, error};
use x11rb::connection::Connection as _;
use x11rb::protocol::randr::{self, ConnectionExt as _, NotifyMask, Rotation, SetConfig};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, Window};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::daemon::HotplugEvent;
use crate::error::{Error, Result};
use crate::server::{
    Connection, CrtcId, CrtcInfo, DisplayServer, Mode, ModeId, OutputId, OutputInfo, Resources,
    ScreenSize,
};

/// EDID property length in 32-bit units, enough for the base block.
const EDID_LENGTH: u32 = 128;

pub struct Randr {
    conn: RustConnection,
    root: Window,
    edid_atom: Atom,
    /// Last size seen, for the density of sizes RandR has no table entry for.
    screen: Cell<ScreenSize>,
    config_timestamp: Cell<u32>,
}

impl Randr {
    pub fn connect() -> Result<Randr> {
        let (conn, screen_num) = x11rb::connect(None)?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let size = ScreenSize {
            width: screen.width_in_pixels,
            height: screen.height_in_pixels,
            mm_width: u32::from(screen.width_in_millimeters),
            mm_height: u32::from(screen.height_in_millimeters),
        };
        debug!("screen_num {screen_num}, root {root:#x}");

        let version = conn.randr_query_version(1, 6)?.reply()?;
        debug!(
            "RandR version {}.{}",
            version.major_version, version.minor_version
        );

        let edid_atom = conn.intern_atom(false, b"EDID")?.reply()?.atom;

        Ok(Randr {
            conn,
            root,
            edid_atom,
            screen: Cell::new(size),
            config_timestamp: Cell::new(0),
        })
    }

    /// Subscribes to output changes and forwards them from a background thread.
    ///
    /// Takes its own connection so waiting for events never races the passes.
    pub fn watch_output_changes(self, events: SyncSender<HotplugEvent>) -> Result<()> {
        self.conn
            .randr_select_input(self.root, NotifyMask::OUTPUT_CHANGE)?
            .check()?;

        thread::Builder::new()
            .name("output watcher".to_owned())
            .spawn(move || loop {
                let event = match self.conn.wait_for_event() {
                    Ok(event) => event,
                    Err(err) => {
                        error!("error waiting for X events: {err}");
                        return;
                    }
                };
                let Event::RandrNotify(notify) = event else {
                    continue;
                };
                if notify.sub_code != randr::Notify::OUTPUT_CHANGE {
                    continue;
                }
                let change = notify.u.as_oc();
                let event = HotplugEvent::Output {
                    output: change.output,
                    connection: connection(change.connection),
                };
                if events.send(event).is_err() {
                    return;
                }
            })?;
        Ok(())
    }
}

fn connection(connection: randr::Connection) -> Connection {
    if connection == randr::Connection::CONNECTED {
        Connection::Connected
    } else if connection == randr::Connection::DISCONNECTED {
        Connection::Disconnected
    } else {
        Connection::Unknown
    }
}

/// Combines the root window size with the physical size RandR reports for it.
///
/// The size table only lists the sizes of the compatibility output, so a
/// screen resized to something else keeps the density of `last`.
fn current_screen(
    (width, height): (u16, u16),
    entry: Option<&randr::ScreenSize>,
    last: ScreenSize,
) -> ScreenSize {
    if let Some(entry) = entry.filter(|e| (e.width, e.height) == (width, height)) {
        return ScreenSize {
            width,
            height,
            mm_width: u32::from(entry.mwidth),
            mm_height: u32::from(entry.mheight),
        };
    }

    let scale = |pixels: u16, last_pixels: u16, last_mm: u32| -> u32 {
        if last_pixels == 0 {
            return 0;
        }
        let mm = u64::from(pixels) * u64::from(last_mm) / u64::from(last_pixels);
        u32::try_from(mm).unwrap_or(u32::MAX)
    };
    ScreenSize {
        width,
        height,
        mm_width: scale(width, last.width, last.mm_width),
        mm_height: scale(height, last.height, last.mm_height),
    }
}

fn coordinate(value: i32) -> Result<i16> {
    i16::try_from(value)
        .map_err(|_| Error::InvalidConfiguration(format!("coordinate {value} out of range")))
}

impl DisplayServer for Randr {
    fn resources(&self) -> Result<Resources> {
        let resources = self.conn.randr_get_screen_resources(self.root)?.reply()?;
        self.config_timestamp.set(resources.config_timestamp);

        let modes = resources
            .modes
            .iter()
            .map(|m| Mode {
                id: m.id,
                width: m.width,
                height: m.height,
                htotal: m.htotal,
                vtotal: m.vtotal,
                dot_clock: m.dot_clock,
            })
            .collect();

        Ok(Resources {
            outputs: resources.outputs,
            crtcs: resources.crtcs,
            modes,
        })
    }

    fn output_info(&self, output: OutputId) -> Result<OutputInfo> {
        let info = self.conn.randr_get_output_info(output, 0)?.reply()?;

        Ok(OutputInfo {
            name: String::from_utf8_lossy(&info.name).into_owned(),
            connection: connection(info.connection),
            crtc: (info.crtc != 0).then_some(info.crtc),
            crtcs: info.crtcs,
            modes: info.modes,
            num_preferred: usize::from(info.num_preferred),
            mm_height: info.mm_height,
        })
    }

    fn crtc_info(&self, crtc: CrtcId) -> Result<CrtcInfo> {
        let info = self.conn.randr_get_crtc_info(crtc, 0)?.reply()?;

        Ok(CrtcInfo {
            x: i32::from(info.x),
            y: i32::from(info.y),
            mode: (info.mode != 0).then_some(info.mode),
            outputs: info.outputs,
            possible: info.possible,
        })
    }

    fn edid(&self, output: OutputId) -> Result<Option<Vec<u8>>> {
        let property = self
            .conn
            .randr_get_output_property(
                output,
                self.edid_atom,
                AtomEnum::ANY,
                0,
                EDID_LENGTH,
                false,
                false,
            )?
            .reply()?;

        if property.format != 8 || property.data.is_empty() {
            return Ok(None);
        }
        Ok(Some(property.data))
    }

    fn primary(&self) -> Result<Option<OutputId>> {
        let primary = self.conn.randr_get_output_primary(self.root)?.reply()?;
        Ok((primary.output != 0).then_some(primary.output))
    }

    fn screen_size(&self) -> Result<ScreenSize> {
        let geometry = self.conn.get_geometry(self.root)?.reply()?;
        let info = self.conn.randr_get_screen_info(self.root)?.reply()?;

        let size = current_screen(
            (geometry.width, geometry.height),
            info.sizes.get(usize::from(info.size_id)),
            self.screen.get(),
        );
        self.screen.set(size);
        Ok(size)
    }

    fn grab(&self) -> Result<()> {
        self.conn.grab_server()?.check()?;
        Ok(())
    }

    fn ungrab(&self) -> Result<()> {
        self.conn.ungrab_server()?.check()?;
        Ok(())
    }

    fn set_crtc_config(
        &self,
        crtc: CrtcId,
        x: i32,
        y: i32,
        mode: Option<ModeId>,
        outputs: &[OutputId],
    ) -> Result<()> {
        let reply = self
            .conn
            .randr_set_crtc_config(
                crtc,
                0,
                self.config_timestamp.get(),
                coordinate(x)?,
                coordinate(y)?,
                mode.unwrap_or(0),
                Rotation::ROTATE0,
                outputs,
            )?
            .reply()?;

        if reply.status != SetConfig::SUCCESS {
            return Err(Error::Rejected(format!(
                "SetCrtcConfig on CRTC {crtc:#x}: {:?}",
                reply.status
            )));
        }
        Ok(())
    }

    fn set_screen_size(&self, size: ScreenSize) -> Result<()> {
        self.conn
            .randr_set_screen_size(
                self.root,
                size.width,
                size.height,
                size.mm_width,
                size.mm_height,
            )?
            .check()?;
        self.screen.set(size);
        Ok(())
    }

    fn set_primary(&self, output: OutputId) -> Result<()> {
        self.conn
            .randr_set_output_primary(self.root, output)?
            .check()?;
        Ok(())
    }
}
