//! ffmpeg-based media converter.
//!
//! Produces the canonical waveform every speech engine consumes:
//! 16 kHz, mono, signed 16-bit little-endian PCM in a WAV container.

use super::{ConversionError, MediaConverter};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const SAMPLE_RATE: u32 = 16_000;

/// Lines of ffmpeg stderr kept in a conversion error.
const STDERR_TAIL_LINES: usize = 5;

pub struct FfmpegConverter {
    binary: PathBuf,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Arguments for one conversion, without the binary.
    pub fn arguments(input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let rate = SAMPLE_RATE.to_string();
        let mut args: Vec<std::ffi::OsString> = Vec::new();
        args.extend(["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"].map(Into::into));
        args.push(input.as_os_str().to_owned());
        args.extend(["-vn", "-ac", "1", "-ar", rate.as_str(), "-acodec", "pcm_s16le", "-f", "wav"].map(Into::into));
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl MediaConverter for FfmpegConverter {
    async fn to_waveform(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        tracing::debug!(input = %input.display(), "Converting media to 16 kHz mono WAV");

        let result = Command::new(&self.binary)
            .args(Self::arguments(input, output))
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            return Err(ConversionError::Failed {
                status: result.status.to_string(),
                stderr: stderr_tail(&String::from_utf8_lossy(&result.stderr)),
            });
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
