use std::fmt::Write as _;

use tracing::debug;

use crate::edid;
use crate::error::Result;
use crate::mode;
use crate::server::{
    Connection, CrtcId, CrtcInfo, DisplayServer, Mode, ModeId, OutputId, ScreenSize,
};

/// A connector as seen at the start of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub connection: Connection,
    /// Derived from the EDID, empty when unavailable.
    pub monitor_id: String,
    /// CRTC currently driving this output.
    pub crtc: Option<CrtcId>,
    pub crtcs: Vec<CrtcId>,
    pub modes: Vec<ModeId>,
    pub num_preferred: usize,
    pub mm_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crtc {
    pub id: CrtcId,
    pub info: CrtcInfo,
}

/// Everything a pass needs to know about the hardware, fetched once.
#[derive(Debug, Clone)]
pub struct Directory {
    pub outputs: Vec<Output>,
    pub crtcs: Vec<Crtc>,
    pub modes: Vec<Mode>,
    pub primary: Option<OutputId>,
    pub screen: ScreenSize,
}

impl Directory {
    pub fn discover<S: DisplayServer + ?Sized>(server: &S) -> Result<Directory> {
        let resources = server.resources()?;

        let mut outputs = Vec::with_capacity(resources.outputs.len());
        for &id in &resources.outputs {
            let info = server.output_info(id)?;
            let monitor_id = monitor_id(server, id);
            debug!(
                "output {} ({id:#x}): {:?}, crtc {:?}, monitor {monitor_id:?}",
                info.name, info.connection, info.crtc
            );
            outputs.push(Output {
                id,
                name: info.name,
                connection: info.connection,
                monitor_id,
                crtc: info.crtc,
                crtcs: info.crtcs,
                modes: info.modes,
                num_preferred: info.num_preferred,
                mm_height: info.mm_height,
            });
        }

        let mut crtcs = Vec::with_capacity(resources.crtcs.len());
        for &id in &resources.crtcs {
            crtcs.push(Crtc {
                id,
                info: server.crtc_info(id)?,
            });
        }

        Ok(Directory {
            outputs,
            crtcs,
            modes: resources.modes,
            primary: server.primary()?,
            screen: server.screen_size()?,
        })
    }

    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn crtc(&self, id: CrtcId) -> Option<&Crtc> {
        self.crtcs.iter().find(|c| c.id == id)
    }

    /// One line per output for the diagnostic listing.
    pub fn describe(&self) -> Vec<String> {
        self.outputs.iter().map(|o| self.describe_output(o)).collect()
    }

    fn describe_output(&self, output: &Output) -> String {
        let mut line = format!(
            "  [{:x}] {}: CRTC={:x}",
            output.id,
            output.name,
            output.crtc.unwrap_or(0)
        );
        if output.connection.is_connected() {
            line.push_str(" connected");
            if let Some(best) = mode::best_mode(output, &self.modes, self.screen) {
                let _ = write!(line, ", best mode: {} ({:x})", mode::name(&best), best.id);
            }
        } else {
            line.push_str(" disconnected");
        }
        if let Some(crtc) = output.crtc.and_then(|id| self.crtc(id)) {
            if let Some(current) = crtc.info.mode.and_then(|id| self.mode(id)) {
                let _ = write!(
                    line,
                    ", current mode: {} ({:x})",
                    mode::name(current),
                    current.id
                );
            }
            let _ = write!(line, ", position: {}+{}", crtc.info.x, crtc.info.y);
        }
        if !output.monitor_id.is_empty() {
            let _ = write!(line, ", Monitor={}", output.monitor_id);
        }
        if self.primary == Some(output.id) {
            line.push_str(", primary");
        }
        line
    }
}

fn monitor_id<S: DisplayServer + ?Sized>(server: &S, output: OutputId) -> String {
    match server.edid(output) {
        Ok(Some(data)) => edid::monitor_id(&data),
        Ok(None) => String::new(),
        Err(err) => {
            debug!("cannot read EDID of output {output:#x}: {err}");
            String::new()
        }
    }
}
