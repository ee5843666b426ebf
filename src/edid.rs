//! Just enough EDID decoding to tell monitors apart.

pub const HEADER: [u8; 8] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];
const BLOCK_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edid {
    pub pnp_id: [u8; 3],
    pub model: u16,
    pub serial: u32,
}

impl Edid {
    /// Decodes the base block, `None` if it is short, has a bad header or a bad checksum.
    pub fn parse(data: &[u8]) -> Option<Edid> {
        let block = data.get(..BLOCK_LEN)?;
        if block[..8] != HEADER {
            return None;
        }
        if block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) != 0 {
            return None;
        }

        // Three 5-bit letters, 'A' == 1.
        let pnp = u16::from_be_bytes([block[8], block[9]]);
        let mut pnp_id = [0u8; 3];
        for (i, shift) in [10, 5, 0].into_iter().enumerate() {
            let letter = ((pnp >> shift) & 0x1f) as u8;
            if !(1..=26).contains(&letter) {
                return None;
            }
            pnp_id[i] = b'@' + letter;
        }

        Some(Edid {
            pnp_id,
            model: u16::from_le_bytes([block[10], block[11]]),
            serial: u32::from_le_bytes([block[12], block[13], block[14], block[15]]),
        })
    }

    pub fn monitor_id(&self) -> String {
        format!(
            "{}-{}-{}",
            String::from_utf8_lossy(&self.pnp_id),
            self.model,
            self.serial
        )
    }
}

/// Stable identifier for the monitor behind `data`, empty when undecodable.
pub fn monitor_id(data: &[u8]) -> String {
    Edid::parse(data).map(|e| e.monitor_id()).unwrap_or_default()
}
