//! Video format tags, their hardware constants and derived format information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::{scale, scale_ceil, ClockTime, SECOND};
use crate::device::{CaptureDevice, VancMode};

/// Image raster of a hardware video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Raster {
    Sd525,
    Sd625,
    Hd720,
    Hd1080,
    Dci1080,
    Uhd2160,
    Dci2160,
    Uhd4320,
    Dci4320,
}

impl Raster {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Sd525 => (720, 486),
            Raster::Sd625 => (720, 576),
            Raster::Hd720 => (1280, 720),
            Raster::Hd1080 => (1920, 1080),
            Raster::Dci1080 => (2048, 1080),
            Raster::Uhd2160 => (3840, 2160),
            Raster::Dci2160 => (4096, 2160),
            Raster::Uhd4320 => (7680, 4320),
            Raster::Dci4320 => (8192, 4320),
        }
    }

    /// Extra lines prepended to the frame buffer in tall VANC mode.
    pub fn tall_vanc_lines(&self) -> u32 {
        match self {
            Raster::Sd525 | Raster::Sd625 => 22,
            Raster::Hd720 => 20,
            Raster::Hd1080 | Raster::Dci1080 => 34,
            _ => 0,
        }
    }

    fn pixel_aspect_ratio(&self) -> (u32, u32) {
        match self {
            Raster::Sd525 => (10, 11),
            Raster::Sd625 => (12, 11),
            _ => (1, 1),
        }
    }
}

/// Nominal frame rate of a hardware video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRate {
    Fps2398,
    Fps2400,
    Fps2500,
    Fps2997,
    Fps3000,
    Fps5000,
    Fps5994,
    Fps6000,
}

impl FrameRate {
    pub fn fraction(&self) -> (u32, u32) {
        match self {
            FrameRate::Fps2398 => (24000, 1001),
            FrameRate::Fps2400 => (24, 1),
            FrameRate::Fps2500 => (25, 1),
            FrameRate::Fps2997 => (30000, 1001),
            FrameRate::Fps3000 => (30, 1),
            FrameRate::Fps5000 => (50, 1),
            FrameRate::Fps5994 => (60000, 1001),
            FrameRate::Fps6000 => (60, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanMode {
    Progressive,
    Interlaced,
}

/// Number of SDI links a hardware format is carried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Link {
    Single,
    Quad,
}

/// Concrete hardware video format constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HwVideoFormat {
    pub raster: Raster,
    pub rate: FrameRate,
    pub scan: ScanMode,
    pub link: Link,
}

impl HwVideoFormat {
    pub const fn new(raster: Raster, rate: FrameRate, scan: ScanMode, link: Link) -> Self {
        Self {
            raster,
            rate,
            scan,
            link,
        }
    }

    pub fn info(&self) -> FormatInfo {
        let (width, height) = self.raster.dimensions();
        let (fps_n, fps_d) = self.rate.fraction();
        let (par_n, par_d) = self.raster.pixel_aspect_ratio();
        FormatInfo {
            width,
            height,
            fps_n,
            fps_d,
            interlaced: self.scan == ScanMode::Interlaced,
            par_n,
            par_d,
            raster: self.raster,
        }
    }
}

impl fmt::Display for HwVideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.raster.dimensions();
        let (n, d) = self.rate.fraction();
        let scan = match self.scan {
            ScanMode::Progressive => 'p',
            ScanMode::Interlaced => 'i',
        };
        write!(f, "{}x{}{} {}/{}", w, h, scan, n, d)?;
        if self.link == Link::Quad {
            write!(f, " (quad)")?;
        }
        Ok(())
    }
}

/// Description of a video format as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub width: u32,
    pub height: u32,
    pub fps_n: u32,
    pub fps_d: u32,
    pub interlaced: bool,
    pub par_n: u32,
    pub par_d: u32,
    pub raster: Raster,
}

impl FormatInfo {
    /// Nominal duration of one frame in nanoseconds.
    pub fn frame_duration(&self) -> ClockTime {
        scale(SECOND, self.fps_d as u64, self.fps_n as u64)
    }

    /// Running time of `frames` frames at the nominal rate.
    pub fn frames_to_time(&self, frames: u64) -> ClockTime {
        scale(frames, SECOND * self.fps_d as u64, self.fps_n as u64)
    }

    /// Minimum latency of the capture path: three frames, rounded up.
    pub fn min_latency(&self) -> ClockTime {
        scale_ceil(3, SECOND * self.fps_d as u64, self.fps_n as u64)
    }

    /// Frame buffer layout of a 10-bit YCbCr raster in the given VANC mode.
    pub fn raster_layout(&self, vanc: VancMode) -> RasterLayout {
        let vanc_lines = match vanc {
            VancMode::Off => 0,
            VancMode::Tall => self.raster.tall_vanc_lines(),
        };
        RasterLayout {
            line_stride: v210_line_stride(self.width),
            vanc_lines,
            active_lines: self.height,
        }
    }
}

/// Byte layout of a captured frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterLayout {
    pub line_stride: usize,
    pub vanc_lines: u32,
    pub active_lines: u32,
}

impl RasterLayout {
    pub fn total_size(&self) -> usize {
        self.line_stride * (self.vanc_lines + self.active_lines) as usize
    }

    pub fn vanc_size(&self) -> usize {
        self.line_stride * self.vanc_lines as usize
    }

    /// Offset and size of the visible picture inside the buffer.
    pub fn visible_region(&self) -> (usize, usize) {
        (self.vanc_size(), self.line_stride * self.active_lines as usize)
    }
}

/// v210 packs 6 pixels into 16 bytes, lines padded to 128 bytes.
pub fn v210_line_stride(width: u32) -> usize {
    ((width as usize + 47) / 48) * 128
}

const P: ScanMode = ScanMode::Progressive;
const I: ScanMode = ScanMode::Interlaced;

macro_rules! video_formats {
    ($( $variant:ident => $nick:literal, $raster:ident, $rate:ident, $scan:ident, [$($link:ident),+]; )+) => {
        /// Abstract video format selector exposed in the settings.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum VideoFormat {
            $( #[serde(rename = $nick)] $variant, )+
        }

        impl VideoFormat {
            pub const ALL: &'static [VideoFormat] = &[$(VideoFormat::$variant),+];

            pub fn nick(&self) -> &'static str {
                match self {
                    $( VideoFormat::$variant => $nick, )+
                }
            }
        }

        /// Fixed mapping from format tag to its hardware constants.
        pub static FORMAT_TABLE: &[FormatMapEntry] = &[
            $( FormatMapEntry::new(
                VideoFormat::$variant,
                &[$(HwVideoFormat::new(Raster::$raster, FrameRate::$rate, $scan, Link::$link)),+],
            ), )+
        ];
    };
}

video_formats! {
    Hd1080i5000 => "1080i50", Hd1080, Fps2500, I, [Single];
    Hd1080i5994 => "1080i5994", Hd1080, Fps2997, I, [Single];
    Hd1080i6000 => "1080i60", Hd1080, Fps3000, I, [Single];
    Hd720p5994 => "720p5994", Hd720, Fps5994, P, [Single];
    Hd720p6000 => "720p60", Hd720, Fps6000, P, [Single];
    Hd720p5000 => "720p50", Hd720, Fps5000, P, [Single];
    Hd720p2398 => "720p2398", Hd720, Fps2398, P, [Single];
    Hd720p2500 => "720p25", Hd720, Fps2500, P, [Single];
    Hd1080p2997 => "1080p2997", Hd1080, Fps2997, P, [Single];
    Hd1080p3000 => "1080p30", Hd1080, Fps3000, P, [Single];
    Hd1080p2500 => "1080p25", Hd1080, Fps2500, P, [Single];
    Hd1080p2398 => "1080p2398", Hd1080, Fps2398, P, [Single];
    Hd1080p2400 => "1080p24", Hd1080, Fps2400, P, [Single];
    Hd1080p5000A => "1080p50a", Hd1080, Fps5000, P, [Single];
    Hd1080p5994A => "1080p5994a", Hd1080, Fps5994, P, [Single];
    Hd1080p6000A => "1080p60a", Hd1080, Fps6000, P, [Single];
    Sd625i5000 => "625-50", Sd625, Fps2500, I, [Single];
    Sd525i5994 => "525-5994", Sd525, Fps2997, I, [Single];
    Sd525i2398 => "525-2398", Sd525, Fps2398, I, [Single];
    Sd525i2400 => "525-24", Sd525, Fps2400, I, [Single];
    Dci1080p2398 => "dci1080p2398", Dci1080, Fps2398, P, [Single];
    Dci1080p2400 => "dci1080p24", Dci1080, Fps2400, P, [Single];
    Dci1080p2500 => "dci1080p25", Dci1080, Fps2500, P, [Single];
    Dci1080p2997 => "dci1080p2997", Dci1080, Fps2997, P, [Single];
    Dci1080p3000 => "dci1080p30", Dci1080, Fps3000, P, [Single];
    Dci1080p5000A => "dci1080p50a", Dci1080, Fps5000, P, [Single];
    Dci1080p5994A => "dci1080p5994a", Dci1080, Fps5994, P, [Single];
    Dci1080p6000A => "dci1080p60a", Dci1080, Fps6000, P, [Single];
    Uhd2160p2398 => "2160p2398", Uhd2160, Fps2398, P, [Single, Quad];
    Uhd2160p2400 => "2160p24", Uhd2160, Fps2400, P, [Single, Quad];
    Uhd2160p2500 => "2160p25", Uhd2160, Fps2500, P, [Single, Quad];
    Uhd2160p2997 => "2160p2997", Uhd2160, Fps2997, P, [Single, Quad];
    Uhd2160p3000 => "2160p30", Uhd2160, Fps3000, P, [Single, Quad];
    Uhd2160p5000 => "2160p50", Uhd2160, Fps5000, P, [Single, Quad];
    Uhd2160p5994 => "2160p5994", Uhd2160, Fps5994, P, [Single, Quad];
    Uhd2160p6000 => "2160p60", Uhd2160, Fps6000, P, [Single, Quad];
    Dci2160p2398 => "dci2160p2398", Dci2160, Fps2398, P, [Single, Quad];
    Dci2160p2400 => "dci2160p24", Dci2160, Fps2400, P, [Single, Quad];
    Dci2160p2500 => "dci2160p25", Dci2160, Fps2500, P, [Single, Quad];
    Dci2160p2997 => "dci2160p2997", Dci2160, Fps2997, P, [Single, Quad];
    Dci2160p3000 => "dci2160p30", Dci2160, Fps3000, P, [Single, Quad];
    Dci2160p5000 => "dci2160p50", Dci2160, Fps5000, P, [Single, Quad];
    Dci2160p5994 => "dci2160p5994", Dci2160, Fps5994, P, [Single, Quad];
    Dci2160p6000 => "dci2160p60", Dci2160, Fps6000, P, [Single, Quad];
    Uhd4320p2398 => "4320p2398", Uhd4320, Fps2398, P, [Quad];
    Uhd4320p2400 => "4320p24", Uhd4320, Fps2400, P, [Quad];
    Uhd4320p2500 => "4320p25", Uhd4320, Fps2500, P, [Quad];
    Uhd4320p2997 => "4320p2997", Uhd4320, Fps2997, P, [Quad];
    Uhd4320p3000 => "4320p30", Uhd4320, Fps3000, P, [Quad];
    Uhd4320p5000 => "4320p50", Uhd4320, Fps5000, P, [Quad];
    Uhd4320p5994 => "4320p5994", Uhd4320, Fps5994, P, [Quad];
    Uhd4320p6000 => "4320p60", Uhd4320, Fps6000, P, [Quad];
    Dci4320p2398 => "dci4320p2398", Dci4320, Fps2398, P, [Quad];
    Dci4320p2400 => "dci4320p24", Dci4320, Fps2400, P, [Quad];
    Dci4320p2500 => "dci4320p25", Dci4320, Fps2500, P, [Quad];
    Dci4320p2997 => "dci4320p2997", Dci4320, Fps2997, P, [Quad];
    Dci4320p3000 => "dci4320p30", Dci4320, Fps3000, P, [Quad];
    Dci4320p5000 => "dci4320p50", Dci4320, Fps5000, P, [Quad];
    Dci4320p5994 => "dci4320p5994", Dci4320, Fps5994, P, [Quad];
    Dci4320p6000 => "dci4320p60", Dci4320, Fps6000, P, [Quad];
}

/// One row of [`FORMAT_TABLE`].
#[derive(Debug, Clone, Copy)]
pub struct FormatMapEntry {
    pub tag: VideoFormat,
    pub single: Option<HwVideoFormat>,
    pub quad: Option<HwVideoFormat>,
}

impl FormatMapEntry {
    const fn new(tag: VideoFormat, formats: &[HwVideoFormat]) -> Self {
        let mut single = None;
        let mut quad = None;
        let mut i = 0;
        while i < formats.len() {
            match formats[i].link {
                Link::Single => single = Some(formats[i]),
                Link::Quad => quad = Some(formats[i]),
            }
            i += 1;
        }
        Self { tag, single, quad }
    }

    /// Hardware format used for capture: the single-link one when it exists.
    pub fn preferred(&self) -> HwVideoFormat {
        match (self.single, self.quad) {
            (Some(format), _) | (None, Some(format)) => format,
            (None, None) => unreachable!("format table entry for {:?} has no hardware format", self.tag),
        }
    }
}

impl VideoFormat {
    pub fn table_entry(&self) -> &'static FormatMapEntry {
        match FORMAT_TABLE.iter().find(|entry| entry.tag == *self) {
            Some(entry) => entry,
            None => unreachable!("video format {:?} missing from the format table", self),
        }
    }

    /// Hardware constant used to capture this format.
    pub fn hardware_format(&self) -> HwVideoFormat {
        self.table_entry().preferred()
    }

    pub fn info(&self) -> FormatInfo {
        self.hardware_format().info()
    }

    /// True if the device supports this format on a single or a quad link.
    pub fn is_supported_by(&self, device: &dyn CaptureDevice) -> bool {
        let entry = self.table_entry();
        let caps = device.capabilities();
        entry.single.map_or(false, |f| caps.can_do_video_format(f))
            || entry.quad.map_or(false, |f| caps.can_do_video_format(f))
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        VideoFormat::Hd1080i5000
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nick())
    }
}

impl FromStr for VideoFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VideoFormat::ALL
            .iter()
            .copied()
            .find(|format| format.nick() == s)
            .ok_or_else(|| format!("unknown video format '{}'", s))
    }
}

/// Every format tag the device can capture.
pub fn supported_formats(device: &dyn CaptureDevice) -> Vec<VideoFormat> {
    VideoFormat::ALL
        .iter()
        .copied()
        .filter(|format| format.is_supported_by(device))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_has_a_table_entry() {
        assert_eq!(FORMAT_TABLE.len(), VideoFormat::ALL.len());
        for format in VideoFormat::ALL {
            // Would hit unreachable! if missing
            let _ = format.hardware_format();
        }
    }

    #[test]
    fn test_quad_only_formats_resolve_to_quad() {
        let hw = VideoFormat::Uhd4320p5000.hardware_format();
        assert_eq!(hw.link, Link::Quad);
        assert_eq!(hw.raster, Raster::Uhd4320);

        let hw = VideoFormat::Uhd2160p5000.hardware_format();
        assert_eq!(hw.link, Link::Single);
        assert!(VideoFormat::Uhd2160p5000.table_entry().quad.is_some());
    }

    #[test]
    fn test_1080i50_info() {
        let info = VideoFormat::Hd1080i5000.info();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!((info.fps_n, info.fps_d), (25, 1));
        assert!(info.interlaced);
        assert_eq!((info.par_n, info.par_d), (1, 1));
        assert_eq!(info.frame_duration(), 40_000_000);
    }

    #[test]
    fn test_sd_pixel_aspect_ratio() {
        let ntsc = VideoFormat::Sd525i5994.info();
        assert_eq!((ntsc.par_n, ntsc.par_d), (10, 11));
        assert_eq!(ntsc.height, 486);

        let pal = VideoFormat::Sd625i5000.info();
        assert_eq!((pal.par_n, pal.par_d), (12, 11));
    }

    #[test]
    fn test_fractional_frame_duration() {
        let info = VideoFormat::Hd1080i5994.info();
        // 1001/30000 s
        assert_eq!(info.frame_duration(), 33_366_666);
        assert_eq!(info.frames_to_time(30000), 1001 * SECOND);
    }

    #[test]
    fn test_min_latency_rounds_up() {
        let info = VideoFormat::Hd1080p2997.info();
        // 3 * 1001 / 30000 s = 100.1 ms exactly
        assert_eq!(info.min_latency(), 100_100_000);

        let info = VideoFormat::Hd720p5994.info();
        // 3 * 1001 / 60000 s = 50_050_000 ns
        assert_eq!(info.min_latency(), 50_050_000);

        let info = VideoFormat::Hd1080p2398.info();
        // 3 * 1001 / 24000 s = 125_125_000 ns
        assert_eq!(info.min_latency(), 125_125_000);
    }

    #[test]
    fn test_raster_layout() {
        let info = VideoFormat::Hd1080i5000.info();
        let off = info.raster_layout(VancMode::Off);
        assert_eq!(off.line_stride, 5120);
        assert_eq!(off.total_size(), 5120 * 1080);
        assert_eq!(off.visible_region(), (0, 5120 * 1080));

        let tall = info.raster_layout(VancMode::Tall);
        assert_eq!(tall.vanc_size(), 5120 * 34);
        assert_eq!(tall.total_size(), 5120 * (1080 + 34));
        assert_eq!(tall.visible_region(), (5120 * 34, 5120 * 1080));
    }

    #[test]
    fn test_nick_parsing() {
        assert_eq!("1080i50".parse::<VideoFormat>(), Ok(VideoFormat::Hd1080i5000));
        assert_eq!("525-5994".parse::<VideoFormat>(), Ok(VideoFormat::Sd525i5994));
        assert!("1080i49".parse::<VideoFormat>().is_err());

        let json = serde_json::to_string(&VideoFormat::Hd720p5994).unwrap();
        assert_eq!(json, "\"720p5994\"");
    }
}
