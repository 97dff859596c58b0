//! Local file frame source using FFmpeg.
//!
//! Frames are decoded in-memory. Only frames that are actually read are
//! converted to RGB24; skipped frames are decoded and dropped.

use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    decoded: ffmpeg::frame::Video,
    eof_sent: bool,
}

pub(crate) struct FfmpegFileSource {
    path: String,
    width: u32,
    height: u32,
    frame_count: u64,
    state: Option<Decoding>,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        if decoder.width() == 0 || decoder.height() == 0 {
            anyhow::bail!("video track reports zero dimensions");
        }

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let width = decoder.width();
        let height = decoder.height();
        log::info!(
            "FileSource: opened {} ({}x{}, ffmpeg)",
            path.display(),
            width,
            height
        );

        Ok(Self {
            path: path.display().to_string(),
            width,
            height,
            frame_count: 0,
            state: Some(Decoding {
                input,
                stream_index,
                decoder,
                scaler,
                decoded: ffmpeg::frame::Video::empty(),
                eof_sent: false,
            }),
        })
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn read_frame(&mut self) -> VisionResult<Option<Frame>> {
        if !self.decode_next()? {
            return Ok(None);
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        state
            .scaler
            .run(&state.decoded, &mut rgb_frame)
            .map_err(|e| VisionError::processing(format!("scale frame to RGB: {}", e)))?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)
            .map_err(|e| VisionError::processing(format!("{:#}", e)))?;
        Frame::from_rgb(pixels, width, height).map(Some)
    }

    pub(crate) fn skip_frame(&mut self) -> VisionResult<bool> {
        self.decode_next()
    }

    pub(crate) fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!(
                "FileSource: released {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }

    /// Decode the next video frame into `state.decoded`. Returns `false` at end of stream.
    fn decode_next(&mut self) -> VisionResult<bool> {
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        loop {
            if state.decoder.receive_frame(&mut state.decoded).is_ok() {
                self.frame_count += 1;
                return Ok(true);
            }
            if state.eof_sent {
                return Ok(false);
            }
            let next = state
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == state.stream_index => {
                    state.decoder.send_packet(&packet).map_err(|e| {
                        VisionError::processing(format!("send packet to ffmpeg decoder: {}", e))
                    })?;
                }
                Some(_) => continue,
                None => {
                    state.decoder.send_eof().map_err(|e| {
                        VisionError::processing(format!("flush ffmpeg decoder: {}", e))
                    })?;
                    state.eof_sent = true;
                }
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        return Ok((
            data.get(..len)
                .context("ffmpeg frame is shorter than its dimensions")?
                .to_vec(),
            width,
            height,
        ));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
