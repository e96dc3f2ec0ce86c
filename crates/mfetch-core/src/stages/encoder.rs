//! Encoder (ffmpeg compatible) command builder and per-format profiles.
//!
//! Flags come only from [`OutputFormat`]; nothing from the request is passed
//! through to the encoder.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::job::{OutputFormat, VideoQuality};

/// Builder for encoder commands.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    input: PathBuf,
    output: PathBuf,
    output_args: Vec<String>,
}

impl EncoderCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-nostdin", "-v", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(self.input.as_os_str().to_os_string());
        args.extend(self.output_args.iter().map(OsString::from));
        args.push(self.output.as_os_str().to_os_string());
        args
    }
}

/// Fixed encoder settings for one output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    /// File name written inside the scratch dir.
    pub output_name: &'static str,
    pub args: Vec<String>,
}

impl EncodeProfile {
    /// `None` for [`OutputFormat::Raw`], which is never transcoded.
    pub fn for_format(format: OutputFormat) -> Option<Self> {
        match format {
            OutputFormat::Raw => None,
            OutputFormat::Audio => Some(Self {
                output_name: "output.m4a",
                args: to_args(&["-vn", "-c:a", "aac", "-b:a", "192k"]),
            }),
            OutputFormat::Video(q) => {
                let (lines, preset, crf, audio) = match q {
                    VideoQuality::Low => (480, "veryfast", 28, "96k"),
                    VideoQuality::Medium => (720, "medium", 23, "128k"),
                    VideoQuality::High => (1080, "medium", 20, "192k"),
                };
                let mut args = vec![
                    "-vf".to_string(),
                    format!("scale=-2:'min({},ih)'", lines),
                ];
                args.extend(to_args(&["-c:v", "libx264", "-preset", preset]));
                args.extend(["-crf".to_string(), crf.to_string()]);
                args.extend(to_args(&[
                    "-c:a",
                    "aac",
                    "-b:a",
                    audio,
                    "-movflags",
                    "+faststart",
                ]));
                Some(Self {
                    output_name: "output.mp4",
                    args,
                })
            }
        }
    }

    pub fn command(&self, input: &Path, scratch: &Path) -> EncoderCommand {
        EncoderCommand::new(input, scratch.join(self.output_name)).output_args(self.args.iter().cloned())
    }
}

fn to_args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossy(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn raw_has_no_profile() {
        assert!(EncodeProfile::for_format(OutputFormat::Raw).is_none());
    }

    #[test]
    fn audio_profile_args() {
        let p = EncodeProfile::for_format(OutputFormat::Audio).unwrap();
        let args = lossy(p.command(Path::new("/s/media.webm"), Path::new("/s")).build_args());
        assert_eq!(
            args,
            vec![
                "-y", "-nostdin", "-v", "error", "-i", "/s/media.webm", "-vn", "-c:a", "aac", "-b:a",
                "192k", "/s/output.m4a"
            ]
        );
    }

    #[test]
    fn video_profiles_scale_by_quality() {
        let low = EncodeProfile::for_format(OutputFormat::Video(VideoQuality::Low)).unwrap();
        assert_eq!(low.output_name, "output.mp4");
        assert!(low.args.contains(&"scale=-2:'min(480,ih)'".to_string()));
        assert!(low.args.contains(&"veryfast".to_string()));

        let medium = EncodeProfile::for_format(OutputFormat::Video(VideoQuality::Medium)).unwrap();
        let args = medium.args.join(" ");
        assert!(args.contains("-c:v libx264 -preset medium -crf 23 -c:a aac -b:a 128k -movflags +faststart"));

        let high = EncodeProfile::for_format(OutputFormat::Video(VideoQuality::High)).unwrap();
        assert!(high.args.join(" ").contains("-crf 20"));
    }

    #[test]
    fn output_args_sit_between_input_and_output() {
        let cmd = EncoderCommand::new("/s/in.webm", "/s/out.mp4")
            .output_args(["-c:v", "copy"])
            .output_args(vec!["-an".to_string()]);
        let args = lossy(cmd.build_args());
        let input = args.iter().position(|a| a == "/s/in.webm").unwrap();
        assert_eq!(&args[input + 1..], ["-c:v", "copy", "-an", "/s/out.mp4"]);
    }
}
