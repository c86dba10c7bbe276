//! MPEG audio frame header inspection.
//!
//! Only the bitrate is read; Symphonia handles everything else.

const V1_L1: [u16; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const V1_L2: [u16; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const V1_L3: [u16; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const V2_L1: [u16; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const V2_L23: [u16; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Bitrate in bits/s from a 4-byte MPEG audio frame header.
///
/// Returns `None` for a missing sync word, reserved version/layer, and the
/// free-format or invalid bitrate indices.
pub fn header_bitrate_bps(frame: &[u8]) -> Option<u32> {
    let header = u32::from_be_bytes(frame.get(..4)?.try_into().ok()?);
    if header >> 21 != 0x7FF {
        return None;
    }
    let version = (header >> 19) & 0b11;
    let layer = (header >> 17) & 0b11;
    let index = ((header >> 12) & 0b1111) as usize;
    if index == 0 || index == 15 {
        return None;
    }
    let table = match (version, layer) {
        (0b01, _) | (_, 0b00) => return None,
        (0b11, 0b11) => &V1_L1,
        (0b11, 0b10) => &V1_L2,
        (0b11, 0b01) => &V1_L3,
        (_, 0b11) => &V2_L1,
        _ => &V2_L23,
    };
    Some(u32::from(table[index]) * 1000)
}

/// Average bitrate of one encoded frame: `bytes * 8 * rate / frames`.
pub fn payload_bitrate_bps(bytes: usize, sample_rate: u32, frames: usize) -> Option<u32> {
    if bytes == 0 || frames == 0 || sample_rate == 0 {
        return None;
    }
    let bps = bytes as u64 * 8 * u64::from(sample_rate) / frames as u64;
    u32::try_from(bps).ok().filter(|b| *b > 0)
}

/// Header bitrate when the packet starts with a valid header, else the payload estimate.
pub fn frame_bitrate_bps(packet: &[u8], sample_rate: u32, frames: usize) -> u32 {
    header_bitrate_bps(packet)
        .or_else(|| payload_bitrate_bps(packet.len(), sample_rate, frames))
        .unwrap_or(0)
}
