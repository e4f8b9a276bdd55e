//! ffmpeg / ffprobe invocations used while preparing a unit.
//!
//! Only the command lines live here; spawning, waiting and killing are the
//! process runner's business.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

/// A program plus its arguments, ready to hand to a `ProcessLauncher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl MediaCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl fmt::Display for MediaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Grab the frame one second in as a still image.
pub fn thumbnail(ffmpeg: &str, video: &Path, output: &Path) -> MediaCommand {
    MediaCommand::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(video)
        .arg("-ss")
        .arg("00:00:01.000")
        .arg("-vframes")
        .arg("1")
        .arg(output)
}

/// Container duration in seconds, printed bare on stdout.
pub fn duration_query(ffprobe: &str, media: &Path) -> MediaCommand {
    MediaCommand::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(media)
}

/// Stream-copy the first `seconds` of `input`.
pub fn trim(ffmpeg: &str, input: &Path, output: &Path, seconds: u64) -> MediaCommand {
    MediaCommand::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-t")
        .arg(seconds.to_string())
        .arg("-c")
        .arg("copy")
        .arg(output)
}

/// Parse ffprobe's duration output. `N/A` and garbage yield `None`.
pub fn parse_duration(stdout: &[u8]) -> Option<f64> {
    String::from_utf8_lossy(stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|duration| duration.is_finite() && *duration >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn trim_command_line() {
        let cmd = trim(
            "ffmpeg",
            &PathBuf::from("in.mp4"),
            &PathBuf::from("out.mp4"),
            14_400,
        );
        assert_eq!(
            cmd.to_string(),
            "ffmpeg -y -i in.mp4 -t 14400 -c copy out.mp4"
        );
    }

    #[test]
    fn duration_query_uses_configured_binary() {
        let cmd = duration_query("/opt/ff/ffprobe", Path::new("clip.mov"));
        assert_eq!(cmd.program_name(), "/opt/ff/ffprobe");
        assert_eq!(cmd.args.last().unwrap(), "clip.mov");
    }

    #[test]
    fn parses_duration_output() {
        assert_eq!(parse_duration(b"12.480000\n"), Some(12.48));
        assert_eq!(parse_duration(b"N/A\n"), None);
        assert_eq!(parse_duration(b""), None);
    }
}
