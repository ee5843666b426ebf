//! Computing where every output goes.

use tracing::{debug, info};

use crate::config::{Config, ExtendDirection, Position};
use crate::crtc::{Bindings, CrtcAllocator};
use crate::error::{Error, Result};
use crate::mode;
use crate::output::{Directory, Output};
use crate::server::{CrtcId, Mode, OutputId};

/// Bounding box of all active outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    empty: bool,
}

impl Default for DisplayRect {
    fn default() -> Self {
        DisplayRect {
            left: 0,
            top: 0,
            right: 0,
            bottom: 0,
            empty: true,
        }
    }
}

impl DisplayRect {
    pub fn update(&mut self, x: i32, y: i32, width: i32, height: i32) {
        if self.empty {
            *self = DisplayRect {
                left: x,
                top: y,
                right: x + width,
                bottom: y + height,
                empty: false,
            };
            return;
        }
        self.left = self.left.min(x);
        self.top = self.top.min(y);
        self.right = self.right.max(x + width);
        self.bottom = self.bottom.max(y + height);
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Moves the rect so its top-left corner is the origin.
    fn normalize(&mut self) {
        self.right -= self.left;
        self.bottom -= self.top;
        self.left = 0;
        self.top = 0;
    }
}

/// Where an active output ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub crtc: CrtcId,
    pub mode: Mode,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub output: OutputId,
    pub name: String,
    pub connected: bool,
    /// CRTC to switch off because the output goes away.
    pub disable: Option<CrtcId>,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryChange {
    Unchanged,
    /// A setup asks for this output to be primary.
    Appoint(OutputId),
    /// The primary output is being disabled; pick any remaining one.
    Elect,
}

/// The complete desired state for one pass, positions already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub targets: Vec<Target>,
    pub rect: DisplayRect,
    pub primary: PrimaryChange,
}

impl Plan {
    pub fn target(&self, output: OutputId) -> Option<&Target> {
        self.targets.iter().find(|t| t.output == output)
    }
}

pub struct Layout<'a> {
    pub dir: &'a Directory,
    pub config: &'a Config,
    pub setup: Option<&'a str>,
    pub lid_closed: bool,
    pub allocator: &'a dyn CrtcAllocator,
}

impl Layout<'_> {
    fn lid_disabled(&self, output: &Output) -> bool {
        self.lid_closed && self.config.disable_on_lid_close(self.setup, &output.monitor_id)
    }

    fn configured_position(
        &self,
        output: &Output,
        primary: &mut PrimaryChange,
    ) -> Option<Position> {
        let oc = self.config.output_config(self.setup, &output.monitor_id)?;
        if oc.primary && *primary == PrimaryChange::Unchanged && !self.primary_in_place() {
            *primary = PrimaryChange::Appoint(output.id);
        }
        Some(oc.position)
    }

    /// Whether the current primary stays on and the setup flags it primary too.
    fn primary_in_place(&self) -> bool {
        let Some(current) = self.dir.primary else {
            return false;
        };
        self.dir
            .outputs
            .iter()
            .find(|o| o.id == current)
            .filter(|o| o.connection.is_connected() && !self.lid_disabled(o))
            .and_then(|o| self.config.output_config(self.setup, &o.monitor_id))
            .is_some_and(|oc| oc.primary)
    }

    pub fn compute(&self) -> Result<Plan> {
        let dir = self.dir;
        let mut targets: Vec<Target> = dir
            .outputs
            .iter()
            .map(|o| Target {
                output: o.id,
                name: o.name.clone(),
                connected: o.connection.is_connected(),
                disable: None,
                placement: None,
            })
            .collect();
        let mut bindings = Bindings::default();
        let mut primary = PrimaryChange::Unchanged;
        let mut rect = DisplayRect::default();

        // Outputs that lose their CRTC free it up for the new ones below.
        for (output, target) in dir.outputs.iter().zip(&mut targets) {
            let Some(crtc) = output.crtc else {
                continue;
            };
            if !output.connection.is_connected() {
                info!("Turning off: {}", output.name);
                target.disable = Some(crtc);
            } else if self.lid_disabled(output) {
                info!("Disabling {} because lid is closed", output.name);
                target.disable = Some(crtc);
            } else {
                bindings.bind(output.id, crtc);
            }
        }

        // Outputs that stay on keep their mode and, outside a setup, their position.
        for (output, target) in dir.outputs.iter().zip(&mut targets) {
            let Some(crtc) = bindings.crtc_of(output.id) else {
                continue;
            };
            let current = dir.crtc(crtc).map(|c| &c.info);
            let mode = match current.and_then(|info| info.mode).and_then(|id| dir.mode(id)) {
                Some(mode) => *mode,
                None => mode::best_mode(output, &dir.modes, dir.screen)
                    .ok_or_else(|| Error::NoModeAvailable(output.name.clone()))?,
            };
            let (x, y) = match self.configured_position(output, &mut primary) {
                Some(pos) => (pos.x, pos.y),
                None => current.map_or((0, 0), |info| (info.x, info.y)),
            };

            rect.update(x, y, i32::from(mode.width), i32::from(mode.height));
            target.placement = Some(Placement { crtc, mode, x, y });
        }

        // Recently connected outputs.
        for (output, target) in dir.outputs.iter().zip(&mut targets) {
            if !output.connection.is_connected() || output.crtc.is_some() {
                continue;
            }
            if self.lid_disabled(output) {
                continue;
            }

            info!("Turning on: {}", output.name);
            debug!("EDID: {}", output.monitor_id);

            let crtc = self.allocator.pick(output, &dir.crtcs, &bindings)?;
            bindings.bind(output.id, crtc);
            info!("Picking CRTC={crtc:#x}");

            let mode = mode::best_mode(output, &dir.modes, dir.screen)
                .ok_or_else(|| Error::NoModeAvailable(output.name.clone()))?;
            info!(
                "Using mode={:#x} ({} @ {:.2} Hz)",
                mode.id,
                mode::name(&mode),
                mode::refresh_rate(&mode)
            );

            let width = i32::from(mode.width);
            let height = i32::from(mode.height);
            let (x, y) = match self.configured_position(output, &mut primary) {
                Some(pos) => (pos.x, pos.y),
                None => match self.config.extend_direction()? {
                    ExtendDirection::Right => (rect.right, 0),
                    ExtendDirection::Left => (-width, 0),
                    ExtendDirection::Bottom => (0, rect.bottom),
                    ExtendDirection::Top => (0, -height),
                },
            };

            rect.update(x, y, width, height);
            target.placement = Some(Placement { crtc, mode, x, y });
        }

        for placement in targets.iter_mut().filter_map(|t| t.placement.as_mut()) {
            placement.x -= rect.left;
            placement.y -= rect.top;
        }
        rect.normalize();
        info!(
            "Display rect: left {} right {} top {} bottom {}",
            rect.left, rect.right, rect.top, rect.bottom
        );

        if primary == PrimaryChange::Unchanged {
            let primary_disabled = dir
                .primary
                .and_then(|p| targets.iter().find(|t| t.output == p))
                .is_some_and(|t| t.disable.is_some());
            if primary_disabled {
                primary = PrimaryChange::Elect;
            }
        }

        Ok(Plan {
            targets,
            rect,
            primary,
        })
    }
}
