//! FLV tag classification
//!
//! RTMP and HTTP-FLV carry audio/video as FLV tag bodies. This module reads
//! those bodies into [`Packet`]s, turns them into classified [`MediaFrame`]s
//! for ingest and validates the AVC/AAC sequence headers before a source
//! caches them.
//!
//! RTMP Video Data:
//! ```text
//! +----------+----------+-----------+---------------
//! | FrameType| CodecID  | AVCPacket | CodecData...
//! | (4 bits) | (4 bits) | Type (1)  |
//! +----------+----------+-----------+---------------
//! ```
//!
//! RTMP Audio Data:
//! ```text
//! +-----------+---------+----------+----------+-----------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AACPacket | AACData
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  | Type (1)  |
//! +-----------+---------+----------+----------+-----------+
//! ```

use bytes::Buf;

use crate::error::MediaError;

use super::frame::{FrameType, MediaFrame, Tracks};
use super::packet::Packet;
use super::probe::CodecProbe;

/// Video codec IDs that use a sequence-header/NALU packet layout
const CODEC_AVC: u8 = 7;
const CODEC_HEVC: u8 = 12;

/// Sound format for AAC
const SOUND_FORMAT_AAC: u8 = 10;

/// Sampling frequencies indexed by `samplingFrequencyIndex`
const AAC_SAMPLING_FREQUENCIES: usize = 13;

/// Frame type nibble: keyframe or generated keyframe
fn is_keyframe_byte(b: u8) -> bool {
    matches!((b >> 4) & 0x0F, 1 | 4)
}

fn video_codec(b: u8) -> u8 {
    b & 0x0F
}

fn sound_format(b: u8) -> u8 {
    (b >> 4) & 0x0F
}

/// Read a tag body of `size` bytes from `src` into a fresh packet
///
/// The buffer is allocated before anything is consumed, so an oversized
/// declared length fails with [`MediaError::AllocationFailed`] and leaves
/// `src` untouched.
pub fn read_tag_body<B: Buf>(src: &mut B, size: usize) -> Result<Packet, MediaError> {
    let mut packet = Packet::with_capacity(size)?;
    let available = src.remaining();
    if available < size {
        return Err(MediaError::TruncatedTag {
            expected: size,
            available,
        });
    }
    src.copy_to_slice(packet.unused_view());
    packet.commit(size)?;
    Ok(packet)
}

/// Classify an FLV video tag body
pub fn video_frame(timestamp: u32, packet: Packet) -> MediaFrame {
    let (is_keyframe, is_header) = match packet.used_view() {
        [b0, rest @ ..] => {
            let codec = video_codec(*b0);
            let header = matches!(codec, CODEC_AVC | CODEC_HEVC) && rest.first() == Some(&0);
            (is_keyframe_byte(*b0), header)
        }
        [] => (false, false),
    };
    MediaFrame::video(timestamp, packet.freeze(), is_keyframe, is_header)
}

/// Classify an FLV audio tag body
pub fn audio_frame(timestamp: u32, packet: Packet) -> MediaFrame {
    let is_header = match packet.used_view() {
        [b0, rest @ ..] => sound_format(*b0) == SOUND_FORMAT_AAC && rest.first() == Some(&0),
        [] => false,
    };
    MediaFrame::audio(timestamp, packet.freeze(), is_header)
}

/// Wrap an onMetaData script tag
///
/// Track presence comes from the caller's AMF decoding (`videocodecid` /
/// `audiocodecid` keys).
pub fn script_frame(packet: Packet, tracks: Tracks) -> MediaFrame {
    MediaFrame::metadata(packet.freeze(), tracks)
}

/// Validate an AVCDecoderConfigurationRecord
fn check_avc_config(record: &[u8]) -> Result<(), MediaError> {
    if record.len() < 7 || record[0] != 1 {
        return Err(MediaError::InvalidAvcPacket);
    }

    let mut pos = 5;
    let num_sps = (record[pos] & 0x1F) as usize;
    pos += 1;
    pos = skip_parameter_sets(record, pos, num_sps)?;

    let num_pps = *record.get(pos).ok_or(MediaError::InvalidAvcPacket)? as usize;
    pos += 1;
    skip_parameter_sets(record, pos, num_pps)?;

    Ok(())
}

fn skip_parameter_sets(record: &[u8], mut pos: usize, count: usize) -> Result<usize, MediaError> {
    for _ in 0..count {
        let len_bytes = record
            .get(pos..pos + 2)
            .ok_or(MediaError::InvalidAvcPacket)?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        pos += 2;
        if record.len() < pos + len {
            return Err(MediaError::InvalidAvcPacket);
        }
        pos += len;
    }
    Ok(pos)
}

/// Validate an AudioSpecificConfig
fn check_aac_config(config: &[u8]) -> Result<(), MediaError> {
    if config.len() < 2 {
        return Err(MediaError::InvalidAacPacket);
    }

    let object_type = (config[0] >> 3) & 0x1F;
    if object_type == 0 {
        return Err(MediaError::InvalidAacPacket);
    }

    let freq_index = ((config[0] & 0x07) << 1) | ((config[1] >> 7) & 0x01);
    match freq_index {
        // Explicit 24-bit frequency follows
        0x0F if config.len() < 5 => Err(MediaError::InvalidAacPacket),
        0x0F => Ok(()),
        i if (i as usize) < AAC_SAMPLING_FREQUENCIES => Ok(()),
        _ => Err(MediaError::InvalidAacPacket),
    }
}

/// Header probe for FLV-encapsulated AVC and AAC
///
/// Other codecs are passed through unchecked.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlvHeaderProbe;

impl CodecProbe for FlvHeaderProbe {
    fn check_header(&self, frame: &MediaFrame) -> Result<(), MediaError> {
        let data = &frame.data;
        match frame.frame_type {
            FrameType::Video => {
                let b0 = *data.first().ok_or(MediaError::InvalidAvcPacket)?;
                if video_codec(b0) != CODEC_AVC {
                    return Ok(());
                }
                // Skip frame/codec byte, packet type and composition time
                check_avc_config(data.get(5..).ok_or(MediaError::InvalidAvcPacket)?)
            }
            FrameType::Audio => {
                let b0 = *data.first().ok_or(MediaError::InvalidAacPacket)?;
                if sound_format(b0) != SOUND_FORMAT_AAC {
                    return Ok(());
                }
                check_aac_config(data.get(2..).ok_or(MediaError::InvalidAacPacket)?)
            }
            FrameType::Metadata => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn tag(data: &[u8]) -> Packet {
        Packet::copy_from_slice(data).unwrap()
    }

    /// AVC sequence header tag body with one 4-byte SPS and one 2-byte PPS
    fn avc_header() -> Vec<u8> {
        vec![
            0x17, 0x00, 0x00, 0x00, 0x00, // frame/codec, packet type, cts
            0x01, 0x64, 0x00, 0x1F, 0xFF, // version, profile, compat, level, nalu size
            0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, // 1 SPS
            0x01, 0x00, 0x02, 0x68, 0xEE, // 1 PPS
        ]
    }

    #[test]
    fn test_read_tag_body() {
        let mut src = Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0xAA, 0xBB]);
        let packet = read_tag_body(&mut src, 5).unwrap();
        assert_eq!(packet.used_view(), &[0x17, 0x01, 0, 0, 0]);
        assert_eq!(packet.remaining(), 0);
        assert_eq!(&src[..], &[0xAA, 0xBB]);

        let frame = video_frame(40, packet);
        assert!(frame.is_video_keyframe());
        assert_eq!(frame.data.len(), 5);
    }

    #[test]
    fn test_read_tag_body_truncated() {
        let mut src = Bytes::from_static(&[0xAF, 0x01]);
        let err = read_tag_body(&mut src, 4).unwrap_err();
        assert_eq!(
            err,
            MediaError::TruncatedTag {
                expected: 4,
                available: 2
            }
        );
        assert_eq!(src.len(), 2);
    }

    #[test]
    fn test_read_tag_body_allocation_failure() {
        let mut src = Bytes::from_static(&[0x17, 0x01, 0, 0, 0]);
        let err = read_tag_body(&mut src, usize::MAX).unwrap_err();
        assert_eq!(err, MediaError::AllocationFailed { capacity: usize::MAX });
        // Nothing consumed
        assert_eq!(src.len(), 5);
    }

    #[test]
    fn test_classify_video() {
        let header = video_frame(0, tag(&avc_header()));
        assert!(header.is_header);
        assert!(header.is_keyframe);

        let key = video_frame(40, tag(&[0x17, 0x01, 0, 0, 0]));
        assert!(key.is_video_keyframe());

        let inter = video_frame(80, tag(&[0x27, 0x01, 0, 0, 0]));
        assert!(!inter.is_keyframe);
        assert!(!inter.is_header);
    }

    #[test]
    fn test_classify_empty_video() {
        let frame = video_frame(0, Packet::default());
        assert!(!frame.is_keyframe);
        assert!(!frame.is_header);
    }

    #[test]
    fn test_classify_audio() {
        let header = audio_frame(0, tag(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(header.is_header);

        let raw = audio_frame(23, tag(&[0xAF, 0x01, 0x21]));
        assert!(!raw.is_header);

        // MP3 has no sequence header
        let mp3 = audio_frame(0, tag(&[0x2F, 0x00]));
        assert!(!mp3.is_header);
    }

    #[test]
    fn test_probe_accepts_valid_headers() {
        let probe = FlvHeaderProbe;
        assert!(probe.check_header(&video_frame(0, tag(&avc_header()))).is_ok());

        // AAC LC, 44.1kHz, stereo
        let aac = audio_frame(0, tag(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(probe.check_header(&aac).is_ok());
    }

    #[test]
    fn test_probe_rejects_truncated_avc() {
        let probe = FlvHeaderProbe;
        let truncated = tag(&avc_header()[..14]);
        let err = probe.check_header(&video_frame(0, truncated)).unwrap_err();
        assert_eq!(err, MediaError::InvalidAvcPacket);
    }

    #[test]
    fn test_probe_rejects_bad_avc_version() {
        let mut data = avc_header();
        data[5] = 0x02;
        let err = FlvHeaderProbe
            .check_header(&video_frame(0, tag(&data)))
            .unwrap_err();
        assert_eq!(err, MediaError::InvalidAvcPacket);
    }

    #[test]
    fn test_probe_rejects_bad_aac() {
        let probe = FlvHeaderProbe;

        let short = audio_frame(0, tag(&[0xAF, 0x00, 0x12]));
        assert_eq!(
            probe.check_header(&short).unwrap_err(),
            MediaError::InvalidAacPacket
        );

        // Sampling index 13 is reserved
        let reserved = audio_frame(0, tag(&[0xAF, 0x00, 0x16, 0x90]));
        assert!(probe.check_header(&reserved).is_err());

        // Explicit frequency needs 5 bytes
        let explicit = audio_frame(0, tag(&[0xAF, 0x00, 0x17, 0x80]));
        assert!(probe.check_header(&explicit).is_err());
    }

    #[test]
    fn test_probe_passes_other_codecs() {
        // HEVC header is not validated here
        let hevc = video_frame(0, tag(&[0x1C, 0x00]));
        assert!(FlvHeaderProbe.check_header(&hevc).is_ok());
    }

    #[test]
    fn test_script_frame_tracks() {
        let meta = script_frame(tag(b"onMetaData"), Tracks::audio_video());
        assert!(meta.is_metadata());
        assert_eq!(meta.tracks, Some(Tracks::new(true, true)));
    }
}
