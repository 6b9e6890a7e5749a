//! Where detector samples come from.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Outcome of reading one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// This many samples were written to the buffer
    Samples(usize),
    /// Samples were lost (capture overrun)
    Dropped,
    End,
}

pub trait SampleSource {
    fn describe(&self) -> String;

    fn read_chunk(&mut self, buf: &mut [i16]) -> Result<Chunk>;
}

/// Raw mono S16LE PCM from any reader.
pub struct ReaderSource<R: Read> {
    name: String,
    reader: BufReader<R>,
    bytes: Vec<u8>,
    finished: bool,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: BufReader::new(reader),
            bytes: Vec::new(),
            finished: false,
        }
    }
}

impl<R: Read> SampleSource for ReaderSource<R> {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn read_chunk(&mut self, buf: &mut [i16]) -> Result<Chunk> {
        if self.finished {
            return Ok(Chunk::End);
        }
        self.bytes.resize(buf.len() * 2, 0);
        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("Failed to read {}", self.name)),
            }
        }
        if filled < self.bytes.len() {
            self.finished = true;
        }

        let samples = filled / 2;
        if samples == 0 {
            return Ok(Chunk::End);
        }
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = if i < samples {
                i16::from_le_bytes([self.bytes[2 * i], self.bytes[2 * i + 1]])
            } else {
                0
            };
        }
        Ok(Chunk::Samples(samples))
    }
}

/// Live capture with overrun recovery.
#[cfg(feature = "alsa-capture")]
pub struct AlsaSource {
    device: String,
    pcm: alsa::pcm::PCM,
    overruns: u64,
}

#[cfg(feature = "alsa-capture")]
impl AlsaSource {
    pub fn open(device: &str, sample_rate: u32, chunk_size: usize) -> Result<Self> {
        let (pcm, _params) = super::alsa_device::open_capture(device, sample_rate, chunk_size)?;
        Ok(Self {
            device: device.to_string(),
            pcm,
            overruns: 0,
        })
    }
}

#[cfg(feature = "alsa-capture")]
impl SampleSource for AlsaSource {
    fn describe(&self) -> String {
        format!("ALSA {}", self.device)
    }

    fn read_chunk(&mut self, buf: &mut [i16]) -> Result<Chunk> {
        let io = self.pcm.io_i16()?;
        let mut filled = 0;
        while filled < buf.len() {
            match io.readi(&mut buf[filled..]) {
                Ok(frames) => filled += frames,
                Err(e) => {
                    self.overruns += 1;
                    log::warn!(
                        "ALSA capture error: {}, recovering (overrun #{})",
                        e,
                        self.overruns
                    );
                    self.pcm
                        .prepare()
                        .context("Failed to recover PCM capture")?;
                    return Ok(Chunk::Dropped);
                }
            }
        }
        Ok(Chunk::Samples(filled))
    }
}

/// Capture source chosen on the command line, opened on the detector thread.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Alsa {
        device: String,
        sample_rate: u32,
        chunk_size: usize,
    },
    File(PathBuf),
    Stdin,
}

impl SourceSpec {
    pub fn open(&self) -> Result<Box<dyn SampleSource>> {
        match self {
            #[cfg(feature = "alsa-capture")]
            SourceSpec::Alsa {
                device,
                sample_rate,
                chunk_size,
            } => Ok(Box::new(AlsaSource::open(device, *sample_rate, *chunk_size)?)),
            #[cfg(not(feature = "alsa-capture"))]
            SourceSpec::Alsa { device, .. } => anyhow::bail!(
                "Built without ALSA support, cannot capture from '{}'; pipe raw PCM to --input -",
                device
            ),
            SourceSpec::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Ok(Box::new(ReaderSource::new(path.display().to_string(), file)))
            }
            SourceSpec::Stdin => Ok(Box::new(ReaderSource::new("stdin", io::stdin()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_source_splits_chunks_and_pads_the_tail() {
        let samples: Vec<i16> = (0..10).map(|i| i * 100 - 300).collect();
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut source = ReaderSource::new("test", bytes.as_slice());

        let mut buf = [0i16; 4];
        assert_eq!(source.read_chunk(&mut buf).unwrap(), Chunk::Samples(4));
        assert_eq!(buf, [-300, -200, -100, 0]);
        assert_eq!(source.read_chunk(&mut buf).unwrap(), Chunk::Samples(4));
        assert_eq!(source.read_chunk(&mut buf).unwrap(), Chunk::Samples(2));
        assert_eq!(buf, [500, 600, 0, 0]);
        assert_eq!(source.read_chunk(&mut buf).unwrap(), Chunk::End);
    }
}
