//! WebM muxing via FFmpeg
//!
//! Video tracks are encoded as VP8 and audio tracks as Opus into a live-style
//! WebM stream backed by a temporary file. [`WebmMuxer::flush`] closes the
//! current cluster and returns everything written since the previous flush,
//! so the chunks concatenate into one playable file.

use bytes::Bytes;
use std::fs::File;
use std::io::Read;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use ffmpeg::codec::{self, encoder, Id};
use ffmpeg::format::{context::Output, sample, Pixel, Sample};
use ffmpeg::software::scaling::{self, Flags};
use ffmpeg::util::frame::{audio::Audio, video::Video};
use ffmpeg::{ChannelLayout, Dictionary, Packet, Rational};
use ffmpeg_next as ffmpeg;

use crate::capture::{MediaTrack, TrackKind};
use crate::error::{Result, StudioError};
use crate::types::{AudioFormat, AudioFrame, Frame};

/// FFmpeg encoder used for video tracks
const VIDEO_ENCODER: &str = "libvpx";

/// FFmpeg encoder used for audio tracks
const AUDIO_ENCODER: &str = "libopus";

/// Sample rates Opus can encode
const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Encoder settings
#[derive(Debug, Clone)]
pub struct WebmConfig {
    /// Video sampling rate
    pub fps: u32,
    /// Target VP8 bitrate in kbps
    pub video_bitrate: u32,
    /// Target Opus bitrate in kbps
    pub audio_bitrate: u32,
}

impl Default for WebmConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            video_bitrate: 2500,
            audio_bitrate: 128,
        }
    }
}

/// Media carried by a muxed track
#[derive(Debug, Clone, PartialEq)]
pub enum MuxMedia {
    Video { width: u32, height: u32 },
    Audio(AudioFormat),
}

/// One track of the output file
#[derive(Debug, Clone, PartialEq)]
pub struct MuxTrack {
    /// Stream index in the output, starting at 0
    pub index: usize,
    /// Written as the track name
    pub name: String,
    pub media: MuxMedia,
}

impl MuxTrack {
    /// Describe a live track as output stream `index`
    pub fn from_track(index: usize, track: &MediaTrack) -> Self {
        let media = match track.kind() {
            TrackKind::Video => {
                let (width, height) = track.settings().unwrap_or((0, 0));
                MuxMedia::Video { width, height }
            }
            TrackKind::Audio => MuxMedia::Audio(track.audio_format().unwrap_or_default()),
        };
        Self {
            index,
            name: track.label().to_string(),
            media,
        }
    }
}

/// Cached RGBA to YUV420P converter
struct Converter(scaling::Context);

// SAFETY: the SwsContext is owned by exactly one VideoEncoder and is only
// used through `&mut self`, so it is never touched from two threads at once.
unsafe impl Send for Converter {}

/// VP8 encoder for one video track
struct VideoEncoder {
    stream: usize,
    encoder: encoder::video::Encoder,
    width: u32,
    height: u32,
    converter: Option<Converter>,
    last_pts: Option<i64>,
}

impl VideoEncoder {
    fn open(
        output: &mut Output,
        track: &MuxTrack,
        width: u32,
        height: u32,
        config: &WebmConfig,
        global_header: bool,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(StudioError::encoder(format!(
                "video track {} has no size",
                track.name
            )));
        }

        let codec = encoder::find_by_name(VIDEO_ENCODER)
            .ok_or_else(|| StudioError::encoder(format!("Encoder {} not found", VIDEO_ENCODER)))?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| StudioError::encoder(format!("Failed to create video encoder: {}", e)))?;

        let fps = config.fps.max(1);
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        // Timestamps are milliseconds of media time, so pauses leave no gap
        encoder.set_time_base(Rational::new(1, 1000));
        encoder.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        encoder.set_bit_rate(config.video_bitrate as usize * 1000);
        encoder.set_gop(fps);
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("deadline", "realtime");
        opts.set("cpu-used", "8");
        opts.set("lag-in-frames", "0");

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| StudioError::encoder(format!("Failed to open video encoder: {}", e)))?;

        let stream = {
            let mut stream = output
                .add_stream(Id::VP8)
                .map_err(|e| StudioError::encoder(format!("Failed to add video stream: {}", e)))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(Rational::new(1, 1000));
            stream.set_metadata(track_metadata(&track.name));
            stream.index()
        };

        info!(
            "Video stream {}: VP8 {}x{} @ {}fps, {}kbps",
            stream, width, height, fps, config.video_bitrate
        );

        Ok(Self {
            stream,
            encoder,
            width,
            height,
            converter: None,
            last_pts: None,
        })
    }

    fn encode(&mut self, frame: &Frame, at: Duration, output: &mut Output) -> Result<u64> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.is_empty() || frame.data.len() != expected {
            return Err(StudioError::encoder(format!(
                "frame buffer of {} bytes does not match {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let pts = at.as_millis() as i64;
        if self.last_pts.is_some_and(|last| pts <= last) {
            trace!("Skipping frame at {}ms on stream {}", pts, self.stream);
            return Ok(0);
        }

        let mut source = Video::new(Pixel::RGBA, frame.width, frame.height);
        let stride = source.stride(0);
        let row = frame.stride();
        let plane = source.data_mut(0);
        for (y, line) in frame.data.chunks_exact(row).enumerate() {
            plane[y * stride..y * stride + row].copy_from_slice(line);
        }

        let mut converted = Video::new(Pixel::YUV420P, self.width, self.height);
        self.converter(frame.width, frame.height)?
            .0
            .run(&source, &mut converted)
            .map_err(|e| StudioError::encoder(format!("Scaling failed: {}", e)))?;
        converted.set_pts(Some(pts));

        self.encoder
            .send_frame(&converted)
            .map_err(|e| StudioError::encoder(format!("Failed to send frame: {}", e)))?;
        self.last_pts = Some(pts);

        drain_packets(&mut self.encoder, self.stream, Rational::new(1, 1000), output)
    }

    /// Converter for `width`x`height` input, rebuilt when the input size changes
    fn converter(&mut self, width: u32, height: u32) -> Result<&mut Converter> {
        let stale = self.converter.as_ref().is_none_or(|c| {
            let input = c.0.input();
            input.width != width || input.height != height
        });

        if stale {
            debug!(
                "Creating scaler: RGBA {}x{} -> YUV420P {}x{}",
                width, height, self.width, self.height
            );
            let context = scaling::Context::get(
                Pixel::RGBA,
                width,
                height,
                Pixel::YUV420P,
                self.width,
                self.height,
                Flags::BILINEAR,
            )
            .map_err(|e| StudioError::encoder(format!("Failed to create scaler: {}", e)))?;
            self.converter = Some(Converter(context));
        }

        self.converter
            .as_mut()
            .ok_or_else(|| StudioError::encoder("No scaler configured"))
    }

    fn finish(&mut self, output: &mut Output) -> Result<u64> {
        self.encoder
            .send_eof()
            .map_err(|e| StudioError::encoder(format!("Failed to send EOF: {}", e)))?;
        drain_packets(&mut self.encoder, self.stream, Rational::new(1, 1000), output)
    }
}

/// Opus encoder for one audio track
struct AudioEncoder {
    stream: usize,
    encoder: encoder::audio::Encoder,
    format: AudioFormat,
    frame_size: usize,
    pending: Vec<f32>,
    samples_sent: i64,
}

impl AudioEncoder {
    fn open(
        output: &mut Output,
        track: &MuxTrack,
        format: AudioFormat,
        config: &WebmConfig,
        global_header: bool,
    ) -> Result<Self> {
        if !OPUS_SAMPLE_RATES.contains(&format.sample_rate) {
            return Err(StudioError::Unsupported(format!(
                "Opus cannot encode {} Hz audio ({})",
                format.sample_rate, track.name
            )));
        }
        let layout = match format.channels {
            1 => ChannelLayout::MONO,
            2 => ChannelLayout::STEREO,
            n => {
                return Err(StudioError::Unsupported(format!(
                    "{} audio channels ({})",
                    n, track.name
                )));
            }
        };

        let codec = encoder::find_by_name(AUDIO_ENCODER)
            .ok_or_else(|| StudioError::encoder(format!("Encoder {} not found", AUDIO_ENCODER)))?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| StudioError::encoder(format!("Failed to create audio encoder: {}", e)))?;

        encoder.set_rate(format.sample_rate as i32);
        encoder.set_bit_rate(config.audio_bitrate as usize * 1000);
        encoder.set_format(Sample::F32(sample::Type::Packed));
        encoder.set_time_base(Rational::new(1, format.sample_rate as i32));
        encoder.set_channel_layout(layout);
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("application", "audio");
        opts.set("vbr", "on");

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| StudioError::encoder(format!("Failed to open audio encoder: {}", e)))?;

        // 20ms at the configured rate when the encoder does not say
        let frame_size = match encoder.frame_size() as usize {
            0 => format.sample_rate as usize / 50,
            n => n,
        };

        let stream = {
            let mut stream = output
                .add_stream(Id::OPUS)
                .map_err(|e| StudioError::encoder(format!("Failed to add audio stream: {}", e)))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(Rational::new(1, format.sample_rate as i32));
            stream.set_metadata(track_metadata(&track.name));
            stream.index()
        };

        info!(
            "Audio stream {}: Opus {}ch @ {}Hz, {}kbps, frame_size={}",
            stream, format.channels, format.sample_rate, config.audio_bitrate, frame_size
        );

        Ok(Self {
            stream,
            encoder,
            format,
            frame_size,
            pending: Vec::with_capacity(frame_size * format.channels as usize * 2),
            samples_sent: 0,
        })
    }

    fn time_base(&self) -> Rational {
        Rational::new(1, self.format.sample_rate as i32)
    }

    /// Buffer `block` and encode every complete codec frame
    fn encode(&mut self, block: &AudioFrame, output: &mut Output) -> Result<u64> {
        if block.format != self.format {
            return Err(StudioError::encoder(format!(
                "audio block is {}ch @ {}Hz, stream {} expects {}ch @ {}Hz",
                block.format.channels,
                block.format.sample_rate,
                self.stream,
                self.format.channels,
                self.format.sample_rate
            )));
        }

        self.pending.extend_from_slice(&block.samples);
        let per_frame = self.frame_size * self.format.channels as usize;

        let mut written = 0;
        while self.pending.len() >= per_frame {
            let samples: Vec<f32> = self.pending.drain(..per_frame).collect();
            written += self.encode_frame(&samples, output)?;
        }
        Ok(written)
    }

    fn encode_frame(&mut self, samples: &[f32], output: &mut Output) -> Result<u64> {
        let layout = if self.format.channels == 1 {
            ChannelLayout::MONO
        } else {
            ChannelLayout::STEREO
        };
        let mut frame = Audio::new(Sample::F32(sample::Type::Packed), self.frame_size, layout);
        frame.set_rate(self.format.sample_rate);

        let bytes: &[u8] = bytemuck::cast_slice(samples);
        let data = frame.data_mut(0);
        let len = data.len().min(bytes.len());
        data[..len].copy_from_slice(&bytes[..len]);

        frame.set_pts(Some(self.samples_sent));
        self.samples_sent += self.frame_size as i64;

        self.encoder
            .send_frame(&frame)
            .map_err(|e| StudioError::encoder(format!("Failed to send audio frame: {}", e)))?;

        drain_packets(&mut self.encoder, self.stream, self.time_base(), output)
    }

    fn finish(&mut self, output: &mut Output) -> Result<u64> {
        let mut written = 0;
        if !self.pending.is_empty() {
            let mut padded = std::mem::take(&mut self.pending);
            padded.resize(self.frame_size * self.format.channels as usize, 0.0);
            written += self.encode_frame(&padded, output)?;
        }

        debug!(
            "Flushing audio stream {} ({} samples encoded)",
            self.stream, self.samples_sent
        );
        self.encoder
            .send_eof()
            .map_err(|e| StudioError::encoder(format!("Failed to send audio EOF: {}", e)))?;
        written += drain_packets(&mut self.encoder, self.stream, self.time_base(), output)?;
        Ok(written)
    }
}

enum TrackEncoder {
    Video(VideoEncoder),
    Audio(AudioEncoder),
}

impl TrackEncoder {
    fn finish(&mut self, output: &mut Output) -> Result<u64> {
        match self {
            Self::Video(video) => video.finish(output),
            Self::Audio(audio) => audio.finish(output),
        }
    }
}

fn track_metadata(name: &str) -> Dictionary<'static> {
    let mut metadata = Dictionary::new();
    metadata.set("title", name);
    metadata
}

/// Move every packet the encoder has ready into the output
fn drain_packets(
    encoder: &mut encoder::Encoder,
    stream: usize,
    time_base: Rational,
    output: &mut Output,
) -> Result<u64> {
    let mut packet = Packet::empty();
    let mut written = 0;
    loop {
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(stream);
                let stream_time_base = output
                    .stream(stream)
                    .map(|s| s.time_base())
                    .unwrap_or(time_base);
                packet.rescale_ts(time_base, stream_time_base);
                packet
                    .write_interleaved(output)
                    .map_err(|e| StudioError::encoder(format!("Failed to write packet: {}", e)))?;
                written += 1;
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                return Err(StudioError::encoder(format!(
                    "Failed to receive packet: {}",
                    e
                )));
            }
        }
    }
    Ok(written)
}

/// Incremental WebM writer
///
/// Frames and audio blocks are encoded as they arrive. The stream header
/// goes out with the first [`WebmMuxer::flush`], and [`WebmMuxer::finish`]
/// returns the tail of the file.
pub struct WebmMuxer {
    output: Output,
    encoders: Vec<TrackEncoder>,
    packets: u64,
    reader: File,
    // Declared last so FFmpeg closes its handle before the file is removed
    _file: NamedTempFile,
}

impl WebmMuxer {
    /// Open a WebM output with one stream per track
    pub fn create(tracks: &[MuxTrack], config: &WebmConfig) -> Result<Self> {
        if tracks.is_empty() {
            return Err(StudioError::encoder("a WebM file needs at least one track"));
        }
        ffmpeg::init().map_err(|e| StudioError::encoder(format!("FFmpeg init failed: {}", e)))?;

        let file = tempfile::Builder::new()
            .prefix("studio-")
            .suffix(".webm")
            .tempfile()?;
        let reader = file.reopen()?;

        let mut output = ffmpeg::format::output_as(file.path(), "webm")
            .map_err(|e| StudioError::encoder(format!("Failed to create WebM output: {}", e)))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut encoders = Vec::with_capacity(tracks.len());
        for track in tracks {
            let encoder = match &track.media {
                MuxMedia::Video { width, height } => TrackEncoder::Video(VideoEncoder::open(
                    &mut output,
                    track,
                    *width,
                    *height,
                    config,
                    global_header,
                )?),
                MuxMedia::Audio(format) => TrackEncoder::Audio(AudioEncoder::open(
                    &mut output,
                    track,
                    *format,
                    config,
                    global_header,
                )?),
            };
            encoders.push(encoder);
        }

        // Live mode never seeks back, so bytes already handed out stay valid
        let mut opts = Dictionary::new();
        opts.set("live", "1");
        output
            .write_header_with(opts)
            .map_err(|e| StudioError::encoder(format!("Failed to write WebM header: {}", e)))?;
        debug!("WebM header written to {:?}", file.path());

        Ok(Self {
            output,
            encoders,
            packets: 0,
            reader,
            _file: file,
        })
    }

    /// Number of output streams
    pub fn stream_count(&self) -> usize {
        self.encoders.len()
    }

    /// Packets written so far
    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    /// Encode a video frame for stream `index` at media time `at`
    ///
    /// Frames at or before the previous timestamp are dropped.
    pub fn write_video(&mut self, index: usize, frame: &Frame, at: Duration) -> Result<()> {
        let Some(TrackEncoder::Video(video)) = self.encoders.get_mut(index) else {
            return Err(StudioError::encoder(format!(
                "stream {} is not a video stream",
                index
            )));
        };
        self.packets += video.encode(frame, at, &mut self.output)?;
        Ok(())
    }

    /// Encode an audio block for stream `index`
    pub fn write_audio(&mut self, index: usize, block: &AudioFrame) -> Result<()> {
        let Some(TrackEncoder::Audio(audio)) = self.encoders.get_mut(index) else {
            return Err(StudioError::encoder(format!(
                "stream {} is not an audio stream",
                index
            )));
        };
        self.packets += audio.encode(block, &mut self.output)?;
        Ok(())
    }

    /// Close the current cluster and return the bytes written since the
    /// previous flush
    ///
    /// Returns an empty buffer when nothing new was written.
    pub fn flush(&mut self) -> Result<Bytes> {
        // SAFETY: the pointer comes from the live output context owned by
        // self. A null packet asks FFmpeg to drain its interleaving queue and
        // then close the open cluster; pb is the AVIOContext opened by
        // `output_as` and stays valid until the context is dropped.
        let status = unsafe {
            let context = self.output.as_mut_ptr();
            let drained = ffmpeg::ffi::av_interleaved_write_frame(context, std::ptr::null_mut());
            if drained < 0 {
                drained
            } else {
                let flushed = ffmpeg::ffi::av_write_frame(context, std::ptr::null_mut());
                ffmpeg::ffi::avio_flush((*context).pb);
                flushed
            }
        };
        if status < 0 {
            return Err(StudioError::encoder(format!(
                "Failed to flush WebM output: {}",
                ffmpeg::Error::from(status)
            )));
        }
        self.read_new_bytes()
    }

    /// Drain the encoders, write the trailer and return the rest of the file
    pub fn finish(mut self) -> Result<Bytes> {
        for encoder in &mut self.encoders {
            self.packets += encoder.finish(&mut self.output)?;
        }
        self.output
            .write_trailer()
            .map_err(|e| StudioError::encoder(format!("Failed to write WebM trailer: {}", e)))?;
        info!("WebM output finished: {} packets", self.packets);
        self.read_new_bytes()
    }

    fn read_new_bytes(&mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for WebmMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebmMuxer")
            .field("streams", &self.encoders.len())
            .field("packets", &self.packets)
            .finish()
    }
}
