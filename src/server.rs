//! The slice of the display server the daemon talks to.
//!
//! Handles are the raw RandR XIDs; `0` never appears in the value types below,
//! absence is expressed with `Option` instead.

use crate::error::Result;

pub type OutputId = u32;
pub type CrtcId = u32;
pub type ModeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Connected,
    Disconnected,
    Unknown,
}

impl Connection {
    /// RandR reports some connectors as `Unknown`; those are driven like connected ones.
    pub fn is_connected(self) -> bool {
        self != Connection::Disconnected
    }
}

/// A timing descriptor from the screen resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub id: ModeId,
    pub width: u16,
    pub height: u16,
    pub htotal: u16,
    pub vtotal: u16,
    pub dot_clock: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    pub outputs: Vec<OutputId>,
    pub crtcs: Vec<CrtcId>,
    pub modes: Vec<Mode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    pub connection: Connection,
    pub crtc: Option<CrtcId>,
    pub crtcs: Vec<CrtcId>,
    /// Supported modes in server preference order.
    pub modes: Vec<ModeId>,
    /// How many leading entries of `modes` are preferred.
    pub num_preferred: usize,
    pub mm_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcInfo {
    pub x: i32,
    pub y: i32,
    pub mode: Option<ModeId>,
    pub outputs: Vec<OutputId>,
    /// Outputs this CRTC is able to drive.
    pub possible: Vec<OutputId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
    pub mm_width: u32,
    pub mm_height: u32,
}

/// Requests against the display server.
///
/// Read-only queries come first, the mutating commands after `ungrab`.
pub trait DisplayServer {
    fn resources(&self) -> Result<Resources>;
    fn output_info(&self, output: OutputId) -> Result<OutputInfo>;
    fn crtc_info(&self, crtc: CrtcId) -> Result<CrtcInfo>;
    /// The raw EDID property of an output, `None` when the output has none.
    fn edid(&self, output: OutputId) -> Result<Option<Vec<u8>>>;
    fn primary(&self) -> Result<Option<OutputId>>;
    fn screen_size(&self) -> Result<ScreenSize>;

    fn grab(&self) -> Result<()>;
    fn ungrab(&self) -> Result<()>;

    /// Drives `crtc` with `mode` at (`x`, `y`); `None` and no outputs turns it off.
    fn set_crtc_config(
        &self,
        crtc: CrtcId,
        x: i32,
        y: i32,
        mode: Option<ModeId>,
        outputs: &[OutputId],
    ) -> Result<()>;
    fn set_screen_size(&self, size: ScreenSize) -> Result<()>;
    fn set_primary(&self, output: OutputId) -> Result<()>;
}

/// Holds the server grab for as long as it lives.
pub struct ServerGrab<'a, S: DisplayServer + ?Sized> {
    server: &'a S,
}

impl<'a, S: DisplayServer + ?Sized> ServerGrab<'a, S> {
    pub fn acquire(server: &'a S) -> Result<Self> {
        server.grab()?;
        Ok(ServerGrab { server })
    }
}

impl<S: DisplayServer + ?Sized> Drop for ServerGrab<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.server.ungrab() {
            tracing::warn!("error releasing server grab: {err}");
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory display server used by the reconciliation tests.

    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    use x11rb::errors::ConnectionError;

    use super::*;
    use crate::edid;
    use crate::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        SetCrtc {
            crtc: CrtcId,
            x: i32,
            y: i32,
            mode: Option<ModeId>,
            outputs: Vec<OutputId>,
        },
        SetScreenSize(ScreenSize),
        SetPrimary(OutputId),
    }

    pub struct FakeOutput {
        pub info: OutputInfo,
        pub edid: Option<Vec<u8>>,
    }

    pub struct FakeServer {
        pub modes: Vec<Mode>,
        pub outputs: RefCell<BTreeMap<OutputId, FakeOutput>>,
        pub crtcs: RefCell<BTreeMap<CrtcId, CrtcInfo>>,
        pub primary: Cell<Option<OutputId>>,
        pub screen: Cell<ScreenSize>,
        pub commands: RefCell<Vec<Command>>,
        pub grabbed: Cell<bool>,
        pub grabs: Cell<usize>,
        /// Fail the n-th mutating command (0-based) with a transport error.
        pub fail_at: Cell<Option<usize>>,
        /// Reading the EDID of this output fails with a transport error.
        pub edid_fails: Cell<Option<OutputId>>,
    }

    pub fn mode(id: ModeId, width: u16, height: u16) -> Mode {
        Mode {
            id,
            width,
            height,
            htotal: width + 160,
            vtotal: height + 45,
            dot_clock: (u32::from(width) + 160) * (u32::from(height) + 45) * 60,
        }
    }

    /// A syntactically valid base EDID block for `vendor`/`model`/`serial`.
    pub fn edid_blob(vendor: &str, model: u16, serial: u32) -> Vec<u8> {
        let mut blob = vec![0u8; 128];
        blob[..8].copy_from_slice(&edid::HEADER);
        let letters: Vec<u16> = vendor.bytes().map(|b| u16::from(b - b'@')).collect();
        let pnp = (letters[0] << 10) | (letters[1] << 5) | letters[2];
        blob[8..10].copy_from_slice(&pnp.to_be_bytes());
        blob[10..12].copy_from_slice(&model.to_le_bytes());
        blob[12..16].copy_from_slice(&serial.to_le_bytes());
        let sum = blob[..127].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        blob[127] = 0u8.wrapping_sub(sum);
        blob
    }

    impl FakeServer {
        pub fn new(modes: Vec<Mode>, screen: ScreenSize) -> Self {
            FakeServer {
                modes,
                outputs: RefCell::new(BTreeMap::new()),
                crtcs: RefCell::new(BTreeMap::new()),
                primary: Cell::new(None),
                screen: Cell::new(screen),
                commands: RefCell::new(Vec::new()),
                grabbed: Cell::new(false),
                grabs: Cell::new(0),
                fail_at: Cell::new(None),
                edid_fails: Cell::new(None),
            }
        }

        pub fn add_crtc(&self, id: CrtcId, possible: &[OutputId]) {
            self.crtcs.borrow_mut().insert(
                id,
                CrtcInfo {
                    x: 0,
                    y: 0,
                    mode: None,
                    outputs: Vec::new(),
                    possible: possible.to_vec(),
                },
            );
        }

        pub fn add_output(
            &self,
            id: OutputId,
            name: &str,
            connection: Connection,
            modes: &[ModeId],
            edid: Option<Vec<u8>>,
        ) {
            let crtcs = self
                .crtcs
                .borrow()
                .iter()
                .filter(|(_, info)| info.possible.contains(&id))
                .map(|(crtc, _)| *crtc)
                .collect();
            let info = OutputInfo {
                name: name.to_owned(),
                connection,
                crtc: None,
                crtcs,
                modes: modes.to_vec(),
                num_preferred: usize::from(!modes.is_empty()),
                mm_height: 0,
            };
            self.outputs
                .borrow_mut()
                .insert(id, FakeOutput { info, edid });
        }

        /// Puts an output on a CRTC without recording a command.
        pub fn bind(&self, output: OutputId, crtc: CrtcId, mode: ModeId, x: i32, y: i32) {
            self.apply_crtc(crtc, x, y, Some(mode), &[output]);
        }

        pub fn set_connection(&self, output: OutputId, connection: Connection) {
            if let Some(o) = self.outputs.borrow_mut().get_mut(&output) {
                o.info.connection = connection;
            }
        }

        pub fn take_commands(&self) -> Vec<Command> {
            self.commands.take()
        }

        pub fn position(&self, output: OutputId) -> Option<(i32, i32, ModeId)> {
            let crtc = self.outputs.borrow().get(&output)?.info.crtc?;
            let crtcs = self.crtcs.borrow();
            let info = crtcs.get(&crtc)?;
            Some((info.x, info.y, info.mode?))
        }

        fn record(&self, command: Command) -> Result<()> {
            let index = self.commands.borrow().len();
            if self.fail_at.get() == Some(index) {
                return Err(ConnectionError::UnknownError.into());
            }
            self.commands.borrow_mut().push(command);
            Ok(())
        }

        fn apply_crtc(
            &self,
            crtc: CrtcId,
            x: i32,
            y: i32,
            mode: Option<ModeId>,
            outputs: &[OutputId],
        ) {
            let mut crtcs = self.crtcs.borrow_mut();
            let mut all = self.outputs.borrow_mut();
            let Some(info) = crtcs.get_mut(&crtc) else {
                return;
            };
            for old in info.outputs.drain(..) {
                if let Some(o) = all.get_mut(&old) {
                    o.info.crtc = None;
                }
            }
            info.x = x;
            info.y = y;
            info.mode = mode;
            info.outputs = outputs.to_vec();
            for new in outputs {
                if let Some(o) = all.get_mut(new) {
                    o.info.crtc = Some(crtc);
                }
            }
        }
    }

    impl DisplayServer for FakeServer {
        fn resources(&self) -> Result<Resources> {
            Ok(Resources {
                outputs: self.outputs.borrow().keys().copied().collect(),
                crtcs: self.crtcs.borrow().keys().copied().collect(),
                modes: self.modes.clone(),
            })
        }

        fn output_info(&self, output: OutputId) -> Result<OutputInfo> {
            self.outputs
                .borrow()
                .get(&output)
                .map(|o| o.info.clone())
                .ok_or_else(|| ConnectionError::UnknownError.into())
        }

        fn crtc_info(&self, crtc: CrtcId) -> Result<CrtcInfo> {
            self.crtcs
                .borrow()
                .get(&crtc)
                .cloned()
                .ok_or_else(|| ConnectionError::UnknownError.into())
        }

        fn edid(&self, output: OutputId) -> Result<Option<Vec<u8>>> {
            if self.edid_fails.get() == Some(output) {
                return Err(ConnectionError::UnknownError.into());
            }
            Ok(self
                .outputs
                .borrow()
                .get(&output)
                .and_then(|o| o.edid.clone()))
        }

        fn primary(&self) -> Result<Option<OutputId>> {
            Ok(self.primary.get())
        }

        fn screen_size(&self) -> Result<ScreenSize> {
            Ok(self.screen.get())
        }

        fn grab(&self) -> Result<()> {
            assert!(!self.grabbed.get(), "server grabbed twice");
            self.grabbed.set(true);
            self.grabs.set(self.grabs.get() + 1);
            Ok(())
        }

        fn ungrab(&self) -> Result<()> {
            self.grabbed.set(false);
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
            if let Some(mode) = mode.and_then(|id| self.modes.iter().find(|m| m.id == id)) {
                let screen = self.screen.get();
                if x < 0
                    || y < 0
                    || x + i32::from(mode.width) > i32::from(screen.width)
                    || y + i32::from(mode.height) > i32::from(screen.height)
                {
                    return Err(Error::Rejected(format!("CRTC {crtc:#x} outside the screen")));
                }
            }
            self.record(Command::SetCrtc {
                crtc,
                x,
                y,
                mode,
                outputs: outputs.to_vec(),
            })?;
            self.apply_crtc(crtc, x, y, mode, outputs);
            Ok(())
        }

        fn set_screen_size(&self, size: ScreenSize) -> Result<()> {
            self.record(Command::SetScreenSize(size))?;
            self.screen.set(size);
            Ok(())
        }

        fn set_primary(&self, output: OutputId) -> Result<()> {
            self.record(Command::SetPrimary(output))?;
            self.primary.set(Some(output));
            Ok(())
        }
    }
}
