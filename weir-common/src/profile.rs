//! Output profiles
//!
//! A profile fixes sample rate, channel count, and (for compressed profiles)
//! codec, bitrate, and frame duration. Exactly three are supported:
//!
//! | profile | format                | consumer          |
//! |---------|-----------------------|-------------------|
//! | `pcm`   | s16le 48kHz stereo    | local monitoring  |
//! | `voice` | Opus/Ogg 96kbps 20ms  | voice chat        |
//! | `hq`    | MP3 192kbps 44.1kHz   | browser           |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputProfile {
    /// Raw signed 16-bit little-endian PCM
    Pcm,
    /// Opus in Ogg, tuned for voice-chat transports
    Voice,
    /// MP3, tuned for browser playback
    Hq,
}

impl OutputProfile {
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm | Self::Voice => 48_000,
            Self::Hq => 44_100,
        }
    }

    pub fn channels(&self) -> u8 {
        2
    }

    /// Codec bitrate; None for uncompressed output.
    pub fn bitrate_bps(&self) -> Option<u32> {
        match self {
            Self::Pcm => None,
            Self::Voice => Some(96_000),
            Self::Hq => Some(192_000),
        }
    }

    /// Codec frame duration; only Opus carries an explicit one.
    pub fn frame_duration_ms(&self) -> Option<u32> {
        match self {
            Self::Voice => Some(20),
            _ => None,
        }
    }

    /// Nominal bytes per second of encoded output.
    ///
    /// Used by the pacing buffer to estimate a chunk's playback duration
    /// when the format carries no explicit timing.
    pub fn byte_rate(&self) -> u32 {
        match self {
            // sample_rate * channels * 2 bytes per sample
            Self::Pcm => 48_000 * 2 * 2,
            Self::Voice => 96_000 / 8,
            Self::Hq => 192_000 / 8,
        }
    }

    /// Whether the encoder reads its input at native (real-time) rate.
    ///
    /// When true the source process already paces output and the pacing
    /// buffer must pass chunks through without re-delaying them.
    pub fn realtime_input(&self) -> bool {
        matches!(self, Self::Hq)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Voice => "voice",
            Self::Hq => "hq",
        }
    }
}

impl fmt::Display for OutputProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcm" | "raw" => Ok(Self::Pcm),
            "voice" | "opus" => Ok(Self::Voice),
            "hq" | "high" | "mp3" => Ok(Self::Hq),
            other => Err(format!("unknown output profile: {}", other)),
        }
    }
}
