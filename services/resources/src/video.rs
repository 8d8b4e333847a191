//! Video derivatives: the representative preview frame and rotated transcodes.
//!
//! Codec work goes through [`FrameGrabber`]. [`FfmpegCli`] shells out to the
//! `ffmpeg` and `ffprobe` binaries with a hard timeout per invocation.

use crate::cache_path::{CachePathResolver, PREVIEW_FRAME_NAME};
use crate::error::{ResourceError, Result};
use crate::model::Resource;
use crate::storage::ObjectStorage;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Clockwise rotation of a video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Legacy transpose codes: 1, 2 and 3 mean 90, 180 and 270 degrees
    pub fn from_transpose(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Deg90),
            2 => Some(Self::Deg180),
            3 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Accepts either degrees or a transpose code
    pub fn parse(value: u16) -> Option<Self> {
        Self::from_degrees(value).or_else(|| Self::from_transpose(value))
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::Deg90, Self::Deg180, Self::Deg270]
    }

    /// ffmpeg video filter implementing the rotation
    pub fn filter(self) -> &'static str {
        match self {
            Self::Deg90 => "transpose=1",
            Self::Deg180 => "transpose=1,transpose=1",
            Self::Deg270 => "transpose=2",
        }
    }
}

/// Codec operations on local files
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    /// Duration in seconds
    async fn probe_duration(&self, video: &Path) -> Result<f64>;

    /// Write the frame at `at_seconds` as a JPEG to `output`
    async fn extract_frame(&self, video: &Path, at_seconds: f64, output: &Path) -> Result<()>;

    /// Re-encode `video` rotated by `rotation` into `output` (H.264/AAC)
    async fn transcode_rotated(&self, video: &Path, rotation: Rotation, output: &Path)
        -> Result<()>;
}

/// [`FrameGrabber`] backed by the ffmpeg command line tools
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    threads: u32,
    timeout: Duration,
}

impl FfmpegCli {
    pub fn new(
        ffmpeg_path: impl Into<PathBuf>,
        ffprobe_path: impl Into<PathBuf>,
        threads: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            threads,
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::VideoConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
            config.threads,
            config.timeout(),
        )
    }

    /// Run to completion within the timeout; the child is killed if the timeout fires
    async fn run(&self, mut command: Command) -> Result<Vec<u8>> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ResourceError::DerivativeGeneration(format!(
                    "Codec process timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| {
                ResourceError::DerivativeGeneration(format!("Failed to spawn codec process: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ResourceError::DerivativeGeneration(format!(
                "Codec process exited with {}: {}",
                output.status, tail
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl FrameGrabber for FfmpegCli {
    async fn probe_duration(&self, video: &Path) -> Result<f64> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(video);

        let stdout = self.run(command).await?;
        let text = String::from_utf8_lossy(&stdout);

        text.trim().parse::<f64>().map_err(|_| {
            ResourceError::DerivativeGeneration(format!("Unparseable duration: {:?}", text.trim()))
        })
    }

    async fn extract_frame(&self, video: &Path, at_seconds: f64, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-y", "-loglevel", "error"])
            .args(["-ss", &format!("{at_seconds:.3}")])
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output);

        self.run(command).await?;
        Ok(())
    }

    async fn transcode_rotated(
        &self,
        video: &Path,
        rotation: Rotation,
        output: &Path,
    ) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(video)
            .args(["-vf", rotation.filter()])
            .args(["-c:v", "libx264", "-c:a", "aac"])
            .args(["-threads", &self.threads.to_string()])
            .arg(output);

        self.run(command).await?;
        Ok(())
    }
}

/// Picks a representative frame for videos and produces rotated transcodes
#[derive(Clone)]
pub struct VideoFrameSampler {
    grabber: Arc<dyn FrameGrabber>,
    resolver: CachePathResolver,
    min_samples: u32,
    max_samples: u32,
    scratch_dir: PathBuf,
}

impl VideoFrameSampler {
    pub fn new(grabber: Arc<dyn FrameGrabber>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            grabber,
            resolver: CachePathResolver::new(),
            min_samples: 4,
            max_samples: 7,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Inclusive range the sample count is drawn from
    pub fn with_sample_range(mut self, min_samples: u32, max_samples: u32) -> Self {
        self.min_samples = min_samples.max(1);
        self.max_samples = max_samples.max(self.min_samples);
        self
    }

    fn sample_count(&self) -> u32 {
        rand::thread_rng().gen_range(self.min_samples..=self.max_samples)
    }

    /// Sample frames across the video, keep the largest encoded one as
    /// `preview_frame.jpg` in `out_dir` and delete the other candidates.
    ///
    /// Does nothing when `out_dir` already holds a preview frame.
    #[instrument(skip(self))]
    pub async fn extract_representative_frame(
        &self,
        video_path: &Path,
        duration: f64,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let preview = out_dir.join(PREVIEW_FRAME_NAME);

        if fs::try_exists(&preview).await.unwrap_or(false) {
            debug!(preview = %preview.display(), "Preview frame already extracted");
            return Ok(preview);
        }

        fs::create_dir_all(out_dir)
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to create {}: {e}", out_dir.display())))?;

        let samples = self.sample_count();
        let mut candidates = Vec::with_capacity(samples as usize);

        for i in 0..samples {
            let at = duration * (i as f64 / samples as f64);
            let frame = out_dir.join(format!("video-{i}.jpg"));

            match self.grabber.extract_frame(video_path, at, &frame).await {
                Ok(()) => candidates.push(frame),
                Err(e) => warn!(at_seconds = at, error = %e, "Frame extraction failed"),
            }
        }

        // Largest encoded size wins; ties keep the earliest frame
        let mut best: Option<(PathBuf, u64)> = None;
        for frame in &candidates {
            let size = match fs::metadata(frame).await {
                Ok(metadata) => metadata.len(),
                Err(_) => continue,
            };
            if best.as_ref().map_or(true, |(_, best_size)| size > *best_size) {
                best = Some((frame.clone(), size));
            }
        }

        let Some((winner, winner_size)) = best else {
            return Err(ResourceError::DerivativeGeneration(format!(
                "No frame could be extracted from {}",
                video_path.display()
            )));
        };

        fs::rename(&winner, &preview)
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to keep preview frame: {e}")))?;

        for frame in candidates.iter().filter(|f| **f != winner) {
            if let Err(e) = fs::remove_file(frame).await {
                warn!(frame = %frame.display(), error = %e, "Failed to remove candidate frame");
            }
        }

        metrics::counter!("resources.video.previews_extracted").increment(1);
        info!(
            samples,
            winner = %winner.display(),
            size_bytes = winner_size,
            "Representative frame selected"
        );

        Ok(preview)
    }

    /// Make sure the preview frame of a video exists on `disk`, returning its path
    #[instrument(skip(self, disk, resource), fields(resource_id = %resource.id))]
    pub async fn ensure_preview(
        &self,
        disk: &dyn ObjectStorage,
        resource: &Resource,
    ) -> Result<String> {
        let preview_path = self.resolver.video_preview_frame(&resource.id);

        if disk.exists(&preview_path).await? {
            return Ok(preview_path);
        }

        let scratch = self.scratch().await?;
        let video = scratch.path().join(format!("source{}", resource.extension));
        self.materialize(disk, &resource.path, &video).await?;

        let duration = self.grabber.probe_duration(&video).await?;
        let frame = self
            .extract_representative_frame(&video, duration, &scratch.path().join("frames"))
            .await?;

        let data = fs::read(&frame)
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to read preview frame: {e}")))?;
        disk.write(&preview_path, Bytes::from(data)).await?;

        Ok(preview_path)
    }

    /// Transcode a rotated copy of a video once, returning its path on `disk`
    #[instrument(skip(self, disk, resource), fields(resource_id = %resource.id))]
    pub async fn rotate(
        &self,
        disk: &dyn ObjectStorage,
        resource: &Resource,
        rotation: Rotation,
    ) -> Result<String> {
        let rotated_path = self
            .resolver
            .rotated_video(&resource.id, rotation.degrees());

        if disk.exists(&rotated_path).await? {
            return Ok(rotated_path);
        }

        let scratch = self.scratch().await?;
        let video = scratch.path().join(format!("source{}", resource.extension));
        let output = scratch.path().join("rotated.mp4");
        self.materialize(disk, &resource.path, &video).await?;

        self.grabber
            .transcode_rotated(&video, rotation, &output)
            .await?;

        let data = fs::read(&output)
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to read transcode: {e}")))?;
        disk.write(&rotated_path, Bytes::from(data)).await?;

        metrics::counter!("resources.video.rotations").increment(1);
        info!(angle = rotation.degrees(), path = %rotated_path, "Rotated video stored");

        Ok(rotated_path)
    }

    async fn scratch(&self) -> Result<tempfile::TempDir> {
        fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to create scratch dir: {e}")))?;

        tempfile::Builder::new()
            .prefix("video-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| ResourceError::Storage(format!("Failed to create scratch dir: {e}")))
    }

    /// Copy an object from storage to a local file for the codec
    async fn materialize(&self, disk: &dyn ObjectStorage, path: &str, target: &Path) -> Result<()> {
        let data = disk.read(path).await?;
        fs::write(target, &data)
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to stage {path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn sizes_by_time(at: f64) -> usize {
        // the first frame is the smallest, later frames shrink
        if at == 0.0 {
            10
        } else {
            1000 - at as usize
        }
    }

    fn recording_grabber(written: Arc<Mutex<Vec<usize>>>) -> MockFrameGrabber {
        let mut grabber = MockFrameGrabber::new();
        grabber
            .expect_extract_frame()
            .returning(move |_, at, output| {
                let size = sizes_by_time(at);
                std::fs::write(output, vec![7u8; size]).unwrap();
                written.lock().unwrap().push(size);
                Ok(())
            });
        grabber
    }

    #[test]
    fn test_rotation_parsing() {
        assert_eq!(Rotation::parse(90), Some(Rotation::Deg90));
        assert_eq!(Rotation::parse(2), Some(Rotation::Deg180));
        assert_eq!(Rotation::from_transpose(3), Some(Rotation::Deg270));
        assert_eq!(Rotation::parse(45), None);
        assert_eq!(Rotation::Deg270.degrees(), 270);
    }

    #[tokio::test]
    async fn test_keeps_largest_frame_only() {
        let dir = TempDir::new().unwrap();
        let written = Arc::new(Mutex::new(Vec::new()));
        let sampler = VideoFrameSampler::new(
            Arc::new(recording_grabber(written.clone())),
            dir.path(),
        );

        let out_dir = dir.path().join("frames");
        let preview = sampler
            .extract_representative_frame(Path::new("video.mp4"), 100.0, &out_dir)
            .await
            .unwrap();

        let written = written.lock().unwrap().clone();
        assert!((4..=7).contains(&written.len()));

        let kept = std::fs::read(&preview).unwrap();
        assert_eq!(kept.len(), *written.iter().max().unwrap());

        let remaining: Vec<_> = std::fs::read_dir(&out_dir).unwrap().collect();
        assert_eq!(remaining.len(), 1);
        assert!(preview.ends_with(PREVIEW_FRAME_NAME));
    }

    #[tokio::test]
    async fn test_ties_keep_earliest_frame() {
        let dir = TempDir::new().unwrap();
        let mut grabber = MockFrameGrabber::new();
        grabber.expect_extract_frame().returning(|_, at, output| {
            // same size, content records the timestamp
            std::fs::write(output, format!("{:08.3}", at)).unwrap();
            Ok(())
        });

        let sampler =
            VideoFrameSampler::new(Arc::new(grabber), dir.path()).with_sample_range(4, 4);
        let preview = sampler
            .extract_representative_frame(Path::new("video.mp4"), 40.0, &dir.path().join("f"))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(preview).unwrap(), "0000.000");
    }

    #[tokio::test]
    async fn test_existing_preview_skips_extraction() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("frames");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join(PREVIEW_FRAME_NAME), b"cached").unwrap();

        let mut grabber = MockFrameGrabber::new();
        grabber.expect_extract_frame().never();

        let sampler = VideoFrameSampler::new(Arc::new(grabber), dir.path());
        let preview = sampler
            .extract_representative_frame(Path::new("video.mp4"), 10.0, &out_dir)
            .await
            .unwrap();

        assert_eq!(std::fs::read(preview).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn test_all_extractions_failing_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut grabber = MockFrameGrabber::new();
        grabber
            .expect_extract_frame()
            .returning(|_, _, _| Err(ResourceError::DerivativeGeneration("boom".into())));

        let sampler = VideoFrameSampler::new(Arc::new(grabber), dir.path());
        let err = sampler
            .extract_representative_frame(Path::new("video.mp4"), 10.0, &dir.path().join("f"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "DERIVATIVE_GENERATION_FAILED");
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_generation_failure() {
        let cli = FfmpegCli::new("sleep", "sleep", 1, Duration::from_millis(50));
        let mut command = Command::new("sleep");
        command.arg("5");
        let err = cli.run(command).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
