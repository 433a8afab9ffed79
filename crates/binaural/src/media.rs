//! Decoding audio files for playback sessions.
use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::{
    audio::{AudioBuffer, Signal},
    codecs::{CodecParameters, Decoder},
    errors::{Error as SError, Result as SResult},
    formats::{FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    probe::Hint,
};

use crate::error::{Error, Result};

/// Something a playback session can pull interleaved `f32` frames from.
pub trait FrameSource: Send + Sync {
    fn channels(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Fill `destination` with whole frames.  Returns the frames read.
    ///
    /// A short read means the end of the stream, or that decoding failed part way through; in the latter case the
    /// error is available from [FrameSource::take_error].  A failure before any frame was read is returned directly.
    fn read_frames(&mut self, destination: &mut [f32]) -> Result<usize>;

    /// The error which cut the last read short, if any.
    fn take_error(&mut self) -> Option<Error>;

    /// Seek back to frame 0.
    fn rewind(&mut self) -> Result<()>;
}

/// Reads interleaved `f32` frames from the first decodable track of a file.
pub struct MediaReader {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    frames: Option<u64>,

    /// The most recently decoded packet.  Always some number of complete frames.
    buffer: AudioBuffer<f32>,

    /// How far into `buffer` reading has got, in frames.
    buffer_read_frames: usize,
    is_at_eof: bool,

    /// A decode failure held back so that the frames before it could be returned first.
    deferred_error: Option<Error>,
}

fn channel_count(params: &CodecParameters) -> Option<usize> {
    if let Some(layout) = params.channel_layout {
        use symphonia::core::audio::Layout as L;
        return Some(match layout {
            L::Mono => 1,
            L::Stereo => 2,
            L::TwoPointOne => 3,
            L::FivePointOne => 6,
        });
    }

    params
        .channels
        .map(|mask| mask.count())
        .filter(|c| *c != 0)
}

/// Symphonia reports the end of a stream as an unexpected EOF from its I/O layer.
fn err_is_eof(err: &SError) -> bool {
    matches!(err, SError::IoError(i) if i.kind() == std::io::ErrorKind::UnexpectedEof)
}

impl MediaReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::file_not_found(path));
        }

        Ok(Self::open_inner(path)?)
    }

    fn open_inner(path: &Path) -> SResult<Self> {
        let file = File::open(path)?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format = symphonia::default::get_probe()
            .format(&hint, stream, &Default::default(), &Default::default())?
            .format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or(SError::Unsupported("no decodable audio track"))?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        let channels =
            channel_count(&params).ok_or(SError::Unsupported("unknown channel layout"))?;
        let decoder = symphonia::default::get_codecs().make(&params, &Default::default())?;

        let mut ret = MediaReader {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            channels,
            sample_rate: params.sample_rate.unwrap_or(0),
            frames: params.n_frames,
            buffer: AudioBuffer::unused(),
            buffer_read_frames: 0,
            is_at_eof: false,
            deferred_error: None,
        };

        // Some containers only say what their rate is in the first packet.
        if ret.sample_rate == 0 {
            if !ret.refill_buffer()? {
                return Err(SError::Unsupported("stream is empty"));
            }
            ret.sample_rate = ret.buffer.spec().rate;
            if ret.sample_rate == 0 {
                return Err(SError::Unsupported("stream has a sample rate of 0"));
            }
        }

        Ok(ret)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames, if the container says.
    pub fn frames(&self) -> Option<u64> {
        self.frames
    }

    /// Decode the next packet of our track into the buffer.  `Ok(false)` at the end of the stream.
    fn refill_buffer(&mut self) -> SResult<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(e) if err_is_eof(&e) => {
                    self.is_at_eof = true;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self.decoder.decode(&packet)?;
            // Reuse the buffer when it fits, so that steady-state playback does not allocate per packet.
            if self.buffer.capacity() < decoded.capacity() || self.buffer.spec() != decoded.spec() {
                self.buffer = decoded.make_equivalent();
            }
            decoded.convert(&mut self.buffer);
            self.buffer_read_frames = 0;
            return Ok(true);
        }
    }

    /// Fill `destination` with interleaved frames.  See [FrameSource::read_frames].
    pub fn read_frames(&mut self, destination: &mut [f32]) -> Result<usize> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }

        let chans = self.channels;
        assert_eq!(destination.len() % chans, 0);
        let total_frames = destination.len() / chans;
        let mut next_frame = 0;

        while next_frame < total_frames && !self.is_at_eof {
            let avail = self.buffer.frames() - self.buffer_read_frames;
            if avail == 0 {
                match self.refill_buffer() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) if next_frame == 0 => return Err(e.into()),
                    Err(e) => {
                        self.deferred_error = Some(e.into());
                        break;
                    }
                }
            }

            let can_do = avail.min(total_frames - next_frame);
            let dest = &mut destination[next_frame * chans..];
            for ch in 0..chans {
                let src = &self.buffer.chan(ch)[self.buffer_read_frames..self.buffer_read_frames + can_do];
                for (f, s) in src.iter().enumerate() {
                    dest[f * chans + ch] = *s;
                }
            }

            self.buffer_read_frames += can_do;
            next_frame += can_do;
        }

        Ok(next_frame)
    }

    /// Go back to the first frame.
    ///
    /// Containers which cannot seek are reopened instead.
    pub fn rewind(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer_read_frames = 0;
        self.is_at_eof = false;
        self.deferred_error = None;

        let seek = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.track_id,
            },
        );

        match seek {
            Ok(_) => {
                self.decoder.reset();
                Ok(())
            }
            Err(e) => {
                log::debug!("Seeking {} failed ({}); reopening it", self.path.display(), e);
                *self = Self::open_inner(&self.path)?;
                Ok(())
            }
        }
    }
}

impl FrameSource for MediaReader {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, destination: &mut [f32]) -> Result<usize> {
        MediaReader::read_frames(self, destination)
    }

    fn take_error(&mut self) -> Option<Error> {
        self.deferred_error.take()
    }

    fn rewind(&mut self) -> Result<()> {
        MediaReader::rewind(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::write_wav;

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MediaReader::open(dir.path().join("nope.wav")).err().unwrap();
        assert!(err.is_file_not_found());
    }

    #[test]
    fn test_not_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"this is not a wave file at all").unwrap();
        let err = MediaReader::open(&path).err().unwrap();
        assert!(err.is_media());
    }

    #[test]
    fn test_reads_stereo_then_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let samples = (0..2000).map(|i| i as f32 / 2000.0).collect::<Vec<_>>();
        write_wav(&path, 2, 22050, &samples).unwrap();

        let mut reader = MediaReader::open(&path).unwrap();
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 22050);
        assert_eq!(reader.frames(), Some(1000));

        let mut got = vec![];
        let mut block = vec![0.0; 300 * 2];
        loop {
            let n = reader.read_frames(&mut block).unwrap();
            got.extend_from_slice(&block[..n * 2]);
            if n < 300 {
                break;
            }
        }
        assert_eq!(got, samples);
        assert_eq!(reader.read_frames(&mut block).unwrap(), 0);
        assert!(FrameSource::take_error(&mut reader).is_none());

        reader.rewind().unwrap();
        let n = reader.read_frames(&mut block).unwrap();
        assert_eq!(n, 300);
        assert_eq!(&block[..], &samples[..600]);
    }
}
