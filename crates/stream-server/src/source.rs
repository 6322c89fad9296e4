//! Sample sources feeding the frame task

use crate::types::BYTES_PER_SAMPLE_PAIR;
use std::f32::consts::TAU;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};
use wavecast_core::SampleSource;

/// Raw interleaved S16LE stereo from any blocking reader (stdin, a file, a FIFO)
///
/// Blocking readers have no portable timeout, so `timeout` is ignored and a
/// read returns once the frame is full or the reader ends.
pub struct ReaderSource<R> {
    name: String,
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

impl<R: Read + Send> SampleSource for ReaderSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled == 0 && !buf.is_empty() {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        // A trailing partial frame is reported as a short read
        Ok(filled)
    }
}

/// Paced sine generator, optionally alternating between tone and silence
pub struct ToneSource {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    /// Tone and silence durations; `None` plays continuously
    cadence: Option<(Duration, Duration)>,
    phase: f32,
    samples_written: u64,
    started: Option<Instant>,
}

impl ToneSource {
    pub fn new(sample_rate: u32, frequency: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: 0.25,
            cadence: None,
            phase: 0.0,
            samples_written: 0,
            started: None,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Alternate `on` of tone with `off` of digital silence
    pub fn with_cadence(mut self, on: Duration, off: Duration) -> Self {
        self.cadence = Some((on, off));
        self
    }

    fn position(&self) -> Duration {
        Duration::from_micros(self.samples_written * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    fn is_on(&self) -> bool {
        match self.cadence {
            None => true,
            Some((on, off)) => {
                let period = (on + off).as_micros().max(1);
                self.position().as_micros() % period < on.as_micros()
            }
        }
    }

    /// Fill `buf` with whole sample pairs; returns bytes written
    fn generate(&mut self, buf: &mut [u8]) -> usize {
        let pairs = buf.len() / BYTES_PER_SAMPLE_PAIR;
        let step = TAU * self.frequency / self.sample_rate.max(1) as f32;
        let on = self.is_on();

        for pair in buf.chunks_exact_mut(BYTES_PER_SAMPLE_PAIR) {
            let sample = if on {
                (self.phase.sin() * self.amplitude * i16::MAX as f32) as i16
            } else {
                0
            };
            self.phase = (self.phase + step) % TAU;

            let bytes = sample.to_le_bytes();
            pair[0..2].copy_from_slice(&bytes);
            pair[2..4].copy_from_slice(&bytes);
        }

        if !on {
            self.phase = 0.0;
        }
        self.samples_written += pairs as u64;
        pairs * BYTES_PER_SAMPLE_PAIR
    }
}

impl SampleSource for ToneSource {
    fn name(&self) -> &str {
        "tone"
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        let started = *self.started.get_or_insert_with(Instant::now);

        // Release each frame no earlier than real time would have produced it
        let due = started + self.position();
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(0);
            }
            std::thread::sleep(wait);
        }

        Ok(self.generate(buf))
    }
}
