//! Raw frame decoding over an FFmpeg rawvideo pipe.
//!
//! Frames are scaled and converted by FFmpeg and read one at a time from
//! stdout, so memory stays bounded regardless of video length.

use image::{GrayImage, RgbImage};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tracing::{debug, warn};

use crate::command::{check_ffmpeg, FfmpegCommand};
use crate::error::{MediaError, MediaResult};

/// Pixel layout of decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Gray => "gray",
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

/// Which source frames to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSampling {
    All,
    /// Every n-th frame, starting with frame 0
    EveryNth(u64),
}

impl FrameSampling {
    fn step(&self) -> u64 {
        match self {
            FrameSampling::All => 1,
            FrameSampling::EveryNth(n) => (*n).max(1),
        }
    }
}

/// Parameters of a frame decode.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub sampling: FrameSampling,
    /// Seek offset in seconds
    pub start: Option<f64>,
    /// Amount of input to decode in seconds
    pub duration: Option<f64>,
    /// Stop after this many output frames
    pub max_frames: Option<usize>,
}

impl FrameRequest {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            sampling: FrameSampling::All,
            start: None,
            duration: None,
            max_frames: None,
        }
    }

    pub fn gray(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelFormat::Gray)
    }

    pub fn rgb(width: u32, height: u32) -> Self {
        Self::new(width, height, PixelFormat::Rgb24)
    }

    pub fn sampling(mut self, sampling: FrameSampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    fn filter_graph(&self) -> String {
        let mut filters = Vec::new();
        if let FrameSampling::EveryNth(n) = self.sampling {
            if n > 1 {
                filters.push(format!("select='not(mod(n\\,{}))'", n));
            }
        }
        filters.push(format!("scale={}:{}", self.width, self.height));
        filters.join(",")
    }

    fn to_command(&self, input: &Path) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::to_stdout(input);
        if let Some(start) = self.start {
            cmd = cmd.seek(start);
        }
        if let Some(duration) = self.duration {
            cmd = cmd.duration(duration);
        }
        cmd = cmd
            .no_audio()
            .video_filter(self.filter_graph())
            // Emit only selected frames; CFR output would duplicate them back
            .output_args(["-vsync", "passthrough"])
            .pixel_format(self.pixel_format.ffmpeg_name())
            .format("rawvideo");
        if let Some(max) = self.max_frames {
            cmd = cmd.frame_limit(max);
        }
        cmd
    }
}

/// Output size for `target_width` that keeps the source aspect ratio.
///
/// Both sides are even, as most scalers and codecs require.
pub fn fit_width(src_width: u32, src_height: u32, target_width: u32) -> (u32, u32) {
    if src_width == 0 || src_height == 0 {
        return (target_width.max(2) & !1, target_width.max(2) & !1);
    }
    let width = target_width.min(src_width).max(2) & !1;
    let height = ((src_height as f64 * width as f64 / src_width as f64).round() as u32).max(2);
    (width, height & !1)
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Source frame number relative to the decode start
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn into_gray(self) -> MediaResult<GrayImage> {
        if self.pixel_format != PixelFormat::Gray {
            return Err(MediaError::internal("frame is not grayscale"));
        }
        GrayImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| MediaError::internal("gray frame buffer has the wrong size"))
    }

    pub fn into_rgb(self) -> MediaResult<RgbImage> {
        if self.pixel_format != PixelFormat::Rgb24 {
            return Err(MediaError::internal("frame is not rgb24"));
        }
        RgbImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| MediaError::internal("rgb frame buffer has the wrong size"))
    }
}

/// Streaming reader over an FFmpeg rawvideo pipe.
pub struct FrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    frame_bytes: usize,
    step: u64,
    produced: u64,
    done: bool,
}

impl FrameReader {
    /// Spawn FFmpeg for `request` on `input`.
    pub async fn open(input: impl AsRef<Path>, request: &FrameRequest) -> MediaResult<Self> {
        let input = input.as_ref();
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        if request.width == 0 || request.height == 0 {
            return Err(MediaError::invalid_video("frame size must be non-zero"));
        }
        check_ffmpeg()?;

        let cmd = request.to_command(input);
        debug!("Decoding frames: ffmpeg {}", cmd.build_args().join(" "));

        let mut child = cmd
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None)
        })?;

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            width: request.width,
            height: request.height,
            pixel_format: request.pixel_format,
            frame_bytes: request.frame_bytes(),
            step: request.sampling.step(),
            produced: 0,
            done: false,
        })
    }

    /// Read the next frame, or `None` at end of stream.
    pub async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.done {
            return Ok(None);
        }

        let mut data = vec![0u8; self.frame_bytes];
        match self.stdout.read_exact(&mut data).await {
            Ok(_) => {}
            // A trailing partial frame is dropped
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let frame = RawFrame {
            index: self.produced * self.step,
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            data,
        };
        self.produced += 1;
        Ok(Some(frame))
    }

    /// Number of frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.produced
    }

    /// Wait for FFmpeg to exit.
    ///
    /// A non-zero exit after frames were read is logged, not returned, so
    /// truncated sources still yield what was decodable.
    pub async fn finish(mut self) -> MediaResult<u64> {
        // Drain anything left so FFmpeg is not blocked on a full pipe
        let mut sink = Vec::new();
        let _ = self.stdout.read_to_end(&mut sink).await;

        let status = self.child.wait().await?;
        if !status.success() {
            if self.produced == 0 {
                return Err(MediaError::ffmpeg_failed(
                    "FFmpeg decoded no frames",
                    None,
                    status.code(),
                ));
            }
            warn!(
                frames = self.produced,
                code = ?status.code(),
                "FFmpeg frame decode exited with non-zero status"
            );
        }
        Ok(self.produced)
    }
}

/// Decode every requested frame into memory.
pub async fn read_frames(input: impl AsRef<Path>, request: &FrameRequest) -> MediaResult<Vec<RawFrame>> {
    let mut reader = FrameReader::open(input, request).await?;
    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame().await? {
        frames.push(frame);
    }
    reader.finish().await?;
    Ok(frames)
}
