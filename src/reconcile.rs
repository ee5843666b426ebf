//! Pushing a computed plan to the display server.

use tracing::info;

use crate::config::Config;
use crate::crtc::CrtcAllocator;
use crate::error::{Error, Result};
use crate::layout::{Layout, Plan, PrimaryChange};
use crate::lid::LidSensor;
use crate::mode;
use crate::output::Directory;
use crate::server::{DisplayServer, ScreenSize, ServerGrab};

const DEFAULT_DPI: f64 = 96.;

/// One full reconfiguration: discover, match, lay out and apply, all under a
/// server grab. Returns whether any command was sent.
pub fn reconfigure<S, L>(
    server: &S,
    lid: &L,
    config: &Config,
    allocator: &dyn CrtcAllocator,
) -> Result<bool>
where
    S: DisplayServer + ?Sized,
    L: LidSensor + ?Sized,
{
    let _grab = ServerGrab::acquire(server)?;

    let dir = Directory::discover(server)?;
    let lid_closed = lid.is_closed()?;

    let setup = config.find_best_setup(&dir.outputs);
    if let Some(name) = setup {
        info!("Found matching setup from config: {name}");
    }

    let plan = Layout {
        dir: &dir,
        config,
        setup,
        lid_closed,
        allocator,
    }
    .compute()?;

    apply(server, &dir, &plan)
}

/// Sends only what differs between `dir` and `plan`.
///
/// Stops at the first failing command; whatever was sent before stays applied.
pub fn apply<S: DisplayServer + ?Sized>(server: &S, dir: &Directory, plan: &Plan) -> Result<bool> {
    let mut changed = false;
    let mut screen = dir.screen;

    for target in &plan.targets {
        if let Some(crtc) = target.disable {
            info!("Switching off {} (CRTC={crtc:#x})", target.name);
            server.set_crtc_config(crtc, 0, 0, None, &[])?;
            changed = true;
        }
    }

    let size = if plan.rect.is_empty() {
        None
    } else {
        Some((
            screen_dimension(plan.rect.width())?,
            screen_dimension(plan.rect.height())?,
        ))
    };

    // CRTCs must fit the screen at all times, so grow it before moving them.
    if let Some((width, height)) = size {
        if width > screen.width || height > screen.height {
            let grown = physical_size(screen, width.max(screen.width), height.max(screen.height));
            set_screen_size(server, grown)?;
            screen = grown;
            changed = true;
        }
    }

    for target in &plan.targets {
        let Some(placement) = target.placement else {
            continue;
        };
        let current = dir.crtc(placement.crtc).map(|c| &c.info);
        let unchanged = current.is_some_and(|info| {
            info.mode == Some(placement.mode.id)
                && info.x == placement.x
                && info.y == placement.y
                && info.outputs == [target.output]
        });
        if unchanged {
            continue;
        }

        info!("Reconfiguring CRTC={:#x} for {}:", placement.crtc, target.name);
        info!(
            "  mode {:#x} -> {:#x} ({})",
            current.and_then(|info| info.mode).unwrap_or(0),
            placement.mode.id,
            mode::name(&placement.mode)
        );
        info!(
            "  position {}+{} -> {}+{}",
            current.map_or(0, |info| info.x),
            current.map_or(0, |info| info.y),
            placement.x,
            placement.y
        );
        server.set_crtc_config(
            placement.crtc,
            placement.x,
            placement.y,
            Some(placement.mode.id),
            &[target.output],
        )?;
        changed = true;
    }

    if let Some((width, height)) = size {
        if (width, height) != (screen.width, screen.height) {
            set_screen_size(server, physical_size(screen, width, height))?;
            changed = true;
        }
    }

    let primary = match plan.primary {
        PrimaryChange::Unchanged => None,
        PrimaryChange::Appoint(output) => plan.target(output),
        PrimaryChange::Elect => {
            info!("Electing new primary output");
            let elected = plan
                .targets
                .iter()
                .find(|t| t.connected && t.placement.is_some());
            Some(elected.ok_or(Error::NoPrimaryCandidate)?)
        }
    };
    if let Some(target) = primary {
        info!("Setting primary output: {}", target.name);
        server.set_primary(target.output)?;
        changed = true;
    }

    Ok(changed)
}

fn screen_dimension(pixels: i32) -> Result<u16> {
    u16::try_from(pixels).map_err(|_| {
        Error::InvalidConfiguration(format!("screen dimension {pixels} out of range"))
    })
}

fn set_screen_size<S: DisplayServer + ?Sized>(server: &S, size: ScreenSize) -> Result<()> {
    info!(
        "Setting screen size {}x{} ({}x{}mm)",
        size.width, size.height, size.mm_width, size.mm_height
    );
    server.set_screen_size(size)
}

/// Screen size in pixels and millimeters, keeping the current density.
fn physical_size(current: ScreenSize, width: u16, height: u16) -> ScreenSize {
    let to_mm = |pixels: u16| -> u32 {
        if current.height > 0 && current.mm_height > 0 {
            let mm = u64::from(pixels) * u64::from(current.mm_height) / u64::from(current.height);
            u32::try_from(mm).unwrap_or(u32::MAX)
        } else {
            (25.4 * f64::from(pixels) / DEFAULT_DPI).round() as u32
        }
    };
    ScreenSize {
        width,
        height,
        mm_width: to_mm(width),
        mm_height: to_mm(height),
    }
}
