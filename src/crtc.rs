//! Handing out CRTCs to outputs.

use tracing::warn;

use crate::error::{Error, Result};
use crate::output::{Crtc, Output};
use crate::server::{CrtcId, OutputId};

/// Which active output holds which CRTC within one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(Vec<(OutputId, CrtcId)>);

impl Bindings {
    pub fn holder(&self, crtc: CrtcId) -> Option<OutputId> {
        self.0.iter().find(|(_, c)| *c == crtc).map(|(o, _)| *o)
    }

    pub fn crtc_of(&self, output: OutputId) -> Option<CrtcId> {
        self.0.iter().find(|(o, _)| *o == output).map(|(_, c)| *c)
    }

    pub fn bind(&mut self, output: OutputId, crtc: CrtcId) {
        self.release(output);
        self.0.push((output, crtc));
    }

    pub fn release(&mut self, output: OutputId) {
        self.0.retain(|(o, _)| *o != output);
    }
}

/// Strategy for choosing a CRTC for an output that has none.
pub trait CrtcAllocator {
    fn pick(&self, output: &Output, crtcs: &[Crtc], bindings: &Bindings) -> Result<CrtcId>;
}

/// Takes the first CRTC, in server order, that is not held by another output
/// and that both the output and the CRTC list as a valid pairing.
///
/// This is greedy: an unlucky order can starve a later output even though a
/// different assignment would have served both.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl CrtcAllocator for FirstFit {
    fn pick(&self, output: &Output, crtcs: &[Crtc], bindings: &Bindings) -> Result<CrtcId> {
        for crtc in crtcs {
            if !output.crtcs.contains(&crtc.id) || !crtc.info.possible.contains(&output.id) {
                continue;
            }
            match bindings.holder(crtc.id) {
                Some(holder) if holder != output.id => continue,
                _ => return Ok(crtc.id),
            }
        }

        warn!("no CRTC available for {}", output.name);
        Err(Error::NoCrtcAvailable(output.name.clone()))
    }
}
