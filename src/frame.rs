use serde::{Deserialize, Serialize};
use std::fmt;

use crate::anc::AncPacket;
use crate::buffer::PooledBuffer;
use crate::clock::ClockTime;
use crate::format::FormatInfo;

/// SMPTE RP188 timecode words as read from the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTimecode {
    pub dbb: u32,
    pub low: u32,
    pub high: u32,
}

impl RawTimecode {
    const FIELD_BIT: u32 = 1 << 27;

    pub const INVALID: RawTimecode = RawTimecode {
        dbb: u32::MAX,
        low: u32::MAX,
        high: u32::MAX,
    };

    /// Pack a time into RP188 BCD words.
    pub fn from_hmsf(hours: u8, minutes: u8, seconds: u8, frames: u8, drop_frame: bool) -> Self {
        let bcd = |v: u8| ((v / 10) as u32, (v % 10) as u32);
        let (ft, fu) = bcd(frames);
        let (st, su) = bcd(seconds);
        let (mt, mu) = bcd(minutes);
        let (ht, hu) = bcd(hours);

        let mut low = fu | (ft & 0x3) << 8 | su << 16 | (st & 0x7) << 24;
        if drop_frame {
            low |= 1 << 10;
        }
        let high = mu | (mt & 0x7) << 8 | hu << 16 | (ht & 0x3) << 24;

        Self { dbb: 0, low, high }
    }

    /// Mark the second frame of a frame pair (rates above 30 fps).
    pub fn with_field(mut self, second: bool) -> Self {
        if second {
            self.low |= Self::FIELD_BIT;
        } else {
            self.low &= !Self::FIELD_BIT;
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.dbb != u32::MAX
    }

    pub fn drop_frame_flag(&self) -> bool {
        self.low & (1 << 10) != 0
    }

    pub fn field_flag(&self) -> bool {
        self.low & Self::FIELD_BIT != 0
    }

    /// Unpack hours, minutes, seconds and frames; `None` for invalid BCD.
    pub fn hmsf(&self) -> Option<(u8, u8, u8, u8)> {
        if !self.is_valid() {
            return None;
        }
        let digit = |word: u32, shift: u32, mask: u32| -> Option<u8> {
            let d = (word >> shift) & mask;
            (d <= 9).then_some(d as u8)
        };
        let frames = digit(self.low, 8, 0x3)? * 10 + digit(self.low, 0, 0xf)?;
        let seconds = digit(self.low, 24, 0x7)? * 10 + digit(self.low, 16, 0xf)?;
        let minutes = digit(self.high, 8, 0x7)? * 10 + digit(self.high, 0, 0xf)?;
        let hours = digit(self.high, 24, 0x3)? * 10 + digit(self.high, 16, 0xf)?;
        Some((hours, minutes, seconds, frames))
    }
}

/// Decoded timecode attached to a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub fps_n: u32,
    pub fps_d: u32,
    pub drop_frame: bool,
    pub interlaced: bool,
}

impl Timecode {
    /// Convert a raw hardware timecode for a stream of the given format.
    ///
    /// Above 30 fps the raw frame count is in frame pairs and the field flag
    /// selects the frame within the pair.
    pub fn from_raw(raw: RawTimecode, info: &FormatInfo) -> Option<Self> {
        let (hours, minutes, seconds, mut frames) = raw.hmsf()?;
        if (info.fps_n + info.fps_d - 1) / info.fps_d.max(1) > 30 {
            frames = frames * 2 + raw.field_flag() as u8;
        }
        let drop_frame = info.fps_d == 1001 && (info.fps_n == 30000 || info.fps_n == 60000);
        let timecode = Self {
            hours,
            minutes,
            seconds,
            frames,
            fps_n: info.fps_n,
            fps_d: info.fps_d,
            drop_frame,
            interlaced: info.interlaced,
        };
        timecode.is_valid().then_some(timecode)
    }

    /// Frame labels per second, rounded up (30 for 29.97).
    pub fn nominal_fps(&self) -> u32 {
        (self.fps_n + self.fps_d - 1) / self.fps_d.max(1)
    }

    pub fn is_valid(&self) -> bool {
        if self.hours >= 24 || self.minutes >= 60 || self.seconds >= 60 {
            return false;
        }
        if self.frames as u32 >= self.nominal_fps() {
            return false;
        }
        if self.drop_frame {
            // Labels 0 and 1 (0-3 at 59.94) are skipped at the start of every
            // minute except each tenth one.
            let skipped = if self.nominal_fps() > 30 { 4 } else { 2 };
            if self.seconds == 0 && self.minutes % 10 != 0 && (self.frames as u32) < skipped {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}

/// One captured frame travelling from the capture loop to the consumer.
#[derive(Debug)]
pub struct FrameItem {
    /// Running time of the capture in nanoseconds
    pub capture_time: ClockTime,
    pub video: PooledBuffer,
    pub audio: PooledBuffer,
    pub anc_field1: Option<PooledBuffer>,
    pub anc_field2: Option<PooledBuffer>,
    pub timecode: Option<RawTimecode>,
}

/// Audio samples captured alongside a video frame.
#[derive(Debug)]
pub struct AudioPayload {
    pub buffer: PooledBuffer,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Frame as delivered to the consumer.
#[derive(Debug)]
pub struct CapturedFrame {
    pub pts: ClockTime,
    pub duration: ClockTime,
    pub info: FormatInfo,
    pub video: PooledBuffer,
    pub audio: AudioPayload,
    pub timecode: Option<Timecode>,
    /// CEA-708 caption data packet payload, when the frame carried one
    pub captions: Option<Vec<u8>>,
    pub ancillary: Vec<AncPacket>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::VideoFormat;

    #[test]
    fn test_rp188_packing() {
        let raw = RawTimecode::from_hmsf(23, 59, 58, 24, false);
        assert!(raw.is_valid());
        assert_eq!(raw.hmsf(), Some((23, 59, 58, 24)));
        assert!(!raw.drop_frame_flag());

        let raw = RawTimecode::from_hmsf(1, 2, 3, 4, true);
        assert!(raw.drop_frame_flag());
        assert_eq!(raw.hmsf(), Some((1, 2, 3, 4)));
    }

    #[test]
    fn test_invalid_raw_timecode() {
        assert_eq!(RawTimecode::INVALID.hmsf(), None);

        let garbage = RawTimecode {
            dbb: 0,
            low: 0x0000_000f,
            high: 0,
        };
        assert_eq!(garbage.hmsf(), None);
    }

    #[test]
    fn test_timecode_conversion_1080i50() {
        let info = VideoFormat::Hd1080i5000.info();
        let tc = Timecode::from_raw(RawTimecode::from_hmsf(10, 20, 30, 12, false), &info).unwrap();
        assert_eq!((tc.hours, tc.minutes, tc.seconds, tc.frames), (10, 20, 30, 12));
        assert_eq!((tc.fps_n, tc.fps_d), (25, 1));
        assert!(tc.interlaced);
        assert!(!tc.drop_frame);
        assert_eq!(tc.to_string(), "10:20:30:12");

        // Frame 25 does not exist at 25 fps
        assert!(Timecode::from_raw(RawTimecode::from_hmsf(0, 0, 0, 25, false), &info).is_none());
    }

    #[test]
    fn test_drop_frame_timecode() {
        let info = VideoFormat::Hd1080p2997.info();
        let tc = Timecode::from_raw(RawTimecode::from_hmsf(0, 1, 0, 2, true), &info).unwrap();
        assert!(tc.drop_frame);
        assert!(!tc.interlaced);
        assert_eq!(tc.to_string(), "00:01:00;02");

        // Skipped labels
        assert!(Timecode::from_raw(RawTimecode::from_hmsf(0, 1, 0, 0, true), &info).is_none());
        // Every tenth minute keeps them
        assert!(Timecode::from_raw(RawTimecode::from_hmsf(0, 10, 0, 0, true), &info).is_some());

        // Frame pairs at 59.94: label 3 is skipped, label 59 exists
        let info = VideoFormat::Hd720p5994.info();
        let raw = RawTimecode::from_hmsf(0, 1, 0, 1, true).with_field(true);
        assert!(Timecode::from_raw(raw, &info).is_none());
        let raw = RawTimecode::from_hmsf(0, 1, 0, 29, true).with_field(true);
        let tc = Timecode::from_raw(raw, &info).unwrap();
        assert_eq!(tc.frames, 59);
        assert_eq!(tc.to_string(), "00:01:00;59");
    }
}
