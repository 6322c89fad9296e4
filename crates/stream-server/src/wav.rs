//! Canonical WAV header for an endless PCM stream
//!
//! Size fields are maxed out because the stream has no known length.

/// Size of the canonical RIFF/WAVE header in bytes
pub const WAV_HEADER_LEN: usize = 44;

const RIFF_FORMAT_LPCM: u16 = 1;
const CHANNELS: u16 = 2;
const BITS_PER_SAMPLE: u16 = 16;

/// Build the 44-byte header for 16-bit stereo PCM at `sample_rate`
pub fn wav_header(sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; WAV_HEADER_LEN];

    // RIFF header
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&RIFF_FORMAT_LPCM.to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&u32::MAX.to_le_bytes());

    header
}
