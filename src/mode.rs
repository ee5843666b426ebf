use crate::output::Output;
use crate::server::{Mode, ScreenSize};

pub fn name(mode: &Mode) -> String {
    format!("{}x{}", mode.width, mode.height)
}

/// Refresh rate in Hz, 0 when the totals are unknown.
pub fn refresh_rate(mode: &Mode) -> f64 {
    if mode.htotal == 0 || mode.vtotal == 0 {
        return 0.;
    }
    f64::from(mode.dot_clock) / (f64::from(mode.htotal) * f64::from(mode.vtotal))
}

/// Picks the mode to drive a newly enabled output with.
///
/// Preferred modes win outright, the first of them on ties. Otherwise the mode
/// whose density is closest to the current screen's wins, or the one closest in
/// height when the output does not report its physical size.
pub fn best_mode(output: &Output, modes: &[Mode], screen: ScreenSize) -> Option<Mode> {
    let screen_height = i64::from(screen.height);
    let mut best: Option<(Mode, i64)> = None;

    for (i, id) in output.modes.iter().enumerate() {
        let Some(mode) = modes.iter().find(|m| m.id == *id) else {
            continue;
        };
        let height = i64::from(mode.height);

        let dist = if i < output.num_preferred {
            0
        } else if output.mm_height > 0 && screen.mm_height > 0 {
            let screen_density = 1000 * screen_height / i64::from(screen.mm_height);
            let mode_density = 1000 * height / i64::from(output.mm_height);
            (screen_density - mode_density).abs()
        } else {
            (screen_height - height).abs()
        };

        if best.map_or(true, |(_, best_dist)| dist < best_dist) {
            best = Some((*mode, dist));
        }
    }

    best.map(|(mode, _)| mode)
}
