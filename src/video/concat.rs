use crate::error::{GeneratorError, GeneratorResult};
use crate::scene::files;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Joins scene videos, in the given order, into one file.
///
/// Dropping the returned future stops the work: any child process is killed
/// and `output` is left as it was.
#[async_trait]
pub trait Concatenator: Send + Sync {
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> GeneratorResult<()>;
}

/// Concatenates with ffmpeg's concat demuxer. Stream copy is tried first; if
/// the inputs don't share codec parameters it falls back to re-encoding.
/// ffmpeg writes to a scratch file that is renamed over `output` on success.
#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    ffmpeg: PathBuf,
}

impl Default for FfmpegConcatenator {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegConcatenator {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> GeneratorResult<()> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GeneratorError::FfmpegError(format!("Failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(GeneratorError::FfmpegError(format!(
                "FFmpeg concat failed: {}",
                error
            )));
        }
        Ok(())
    }

    async fn encode(&self, list: &str, target: &str) -> GeneratorResult<()> {
        let copied = self
            .run(&["-y", "-f", "concat", "-safe", "0", "-i", list, "-c", "copy", target])
            .await;
        match copied {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Stream copy failed, re-encoding instead: {}", e);
                self.run(&[
                    "-y", "-f", "concat", "-safe", "0", "-i", list, "-c:v", "libx264", "-pix_fmt",
                    "yuv420p", "-c:a", "aac", target,
                ])
                .await
            }
        }
    }
}

/// Builds the concat demuxer list. Paths are made absolute and single quotes
/// escaped the way the demuxer expects.
fn concat_list(inputs: &[PathBuf]) -> GeneratorResult<String> {
    let mut content = String::new();
    for input in inputs {
        let absolute = input.canonicalize().map_err(|e| {
            GeneratorError::FfmpegError(format!(
                "Failed to get absolute path of {}: {}",
                input.display(),
                e
            ))
        })?;
        let escaped = absolute.display().to_string().replace('\'', r"'\''");
        let _ = writeln!(content, "file '{}'", escaped);
    }
    Ok(content)
}

/// Scratch output ffmpeg writes to. Keeps the real extension last so ffmpeg
/// can still pick the muxer from it.
fn scratch_output(output: &Path) -> PathBuf {
    match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => output.with_extension(format!("part.{}", ext)),
        None => files::partial_path(output),
    }
}

#[async_trait]
impl Concatenator for FfmpegConcatenator {
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> GeneratorResult<()> {
        if inputs.is_empty() {
            return Err(GeneratorError::FfmpegError("no videos to concatenate".to_string()));
        }
        info!("Concatenating {} video segments...", inputs.len());

        let list_path = output.with_extension("concat.txt");
        tokio::fs::write(&list_path, concat_list(inputs)?).await?;
        let scratch = scratch_output(output);
        let list = list_path.to_string_lossy().to_string();
        let target = scratch.to_string_lossy().to_string();

        let result = self.encode(&list, &target).await;

        // The list is scratch; segments are left alone.
        tokio::fs::remove_file(&list_path).await.ok();

        match result {
            Ok(()) => {
                tokio::fs::rename(&scratch, output).await?;
                info!("Concatenated video: {}", output.display());
                Ok(())
            }
            Err(e) => {
                tokio::fs::remove_file(&scratch).await.ok();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes an executable stand-in for ffmpeg that waits `delay` seconds
    /// and then writes its last argument.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, delay: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        let script = format!(
            "#!/bin/sh\nsleep {}\nfor last; do :; done\necho joined > \"$last\"\n",
            delay
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn segments(dir: &Path, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let path = dir.join(format!("scene_{}.mp4", i));
                std::fs::write(&path, b"segment").unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_concat_list_orders_and_escapes() {
        let dir = TempDir::new().expect("temp dir");
        let first = dir.path().join("scene_0.mp4");
        let second = dir.path().join("it's scene_1.mp4");
        std::fs::write(&first, b"").unwrap();
        std::fs::write(&second, b"").unwrap();

        let list = concat_list(&[first.clone(), second]).unwrap();
        let lines: Vec<_> = list.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("scene_0.mp4'"));
        assert!(lines[1].contains(r"it'\''s scene_1.mp4"));
    }

    #[test]
    fn test_missing_input_is_error() {
        let dir = TempDir::new().expect("temp dir");
        let err = concat_list(&[dir.path().join("missing.mp4")]).unwrap_err();
        assert!(matches!(err, GeneratorError::FfmpegError(_)));
    }

    #[test]
    fn test_scratch_output_keeps_container_extension() {
        assert_eq!(
            scratch_output(Path::new("/w/final_video.mp4")),
            PathBuf::from("/w/final_video.part.mp4")
        );
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let concatenator = FfmpegConcatenator::default();
        let err = concatenator
            .concat(&[], &dir.path().join("final_video.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::FfmpegError(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_appears_only_when_finished() {
        let dir = TempDir::new().expect("temp dir");
        let concatenator = FfmpegConcatenator::new(fake_ffmpeg(dir.path(), "0"));
        let inputs = segments(dir.path(), 2);
        let output = dir.path().join("final_video.mp4");

        concatenator.concat(&inputs, &output).await.unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "joined\n");
        assert!(!scratch_output(&output).exists());
        assert!(!output.with_extension("concat.txt").exists());
        assert!(inputs.iter().all(|p| p.exists()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_concat_kills_ffmpeg() {
        let dir = TempDir::new().expect("temp dir");
        let concatenator = FfmpegConcatenator::new(fake_ffmpeg(dir.path(), "1"));
        let inputs = segments(dir.path(), 2);
        let output = dir.path().join("final_video.mp4");

        let interrupted =
            tokio::time::timeout(Duration::from_millis(200), concatenator.concat(&inputs, &output)).await;
        assert!(interrupted.is_err());

        // Past the point where a surviving ffmpeg would have written.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!output.exists());
        assert!(!scratch_output(&output).exists());
    }
}
