//! Reader, depacketizer, pacing and decode stages wired together.
//!
//! ```text
//! reader thread                       pacing thread           decode thread
//! extractor.next_sample()
//!   └> depacketizer (per track) ─> PacingBuffer ─> bounded channel ─> DecodeSink
//! ```
//!
//! The reader owns the extractor and every depacketizer, so reassembly
//! buffers have a single writer. The pacing worker hands frames to the
//! decode thread through a bounded channel: a slow decoder blocks pacing,
//! never the network reader directly.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::PacingBuffer;
use crate::error::{Result, RtspError};
use crate::extractor::{RtspExtractor, SampleRead};
use crate::media::{DEFAULT_MAX_FRAME_SIZE, Depacketizer, Frame, Sample, depacketizer_for};
use crate::session::SessionState;
use crate::track::Track;
use crate::transport::{Interrupt, Transport};

/// Builds the depacketizer for a track, given the reassembly capacity.
pub type DepacketizerFactory = Arc<dyn Fn(&Track, usize) -> Box<dyn Depacketizer> + Send + Sync>;

/// Consumer of paced frames, called on the decode thread.
pub trait DecodeSink: Send + 'static {
    /// Accept a frame. Returns a unit that is ready to decode, if any.
    fn feed(&mut self, frame: Frame) -> Option<Frame>;

    /// Decode one unit. Negative values are failures.
    fn decode(&mut self, frame: Frame) -> i32;
}

#[derive(Clone)]
pub struct PipelineConfig {
    /// Pacing budget; a floor on end-to-end delay.
    pub latency: Duration,
    /// Capacity of each depacketizer's reassembly buffer.
    pub max_frame_size: usize,
    /// Frames that may wait between pacing and decoding.
    pub decode_queue: usize,
    pub depacketizers: DepacketizerFactory,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            decode_queue: 8,
            depacketizers: Arc::new(depacketizer_for),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("latency", &self.latency)
            .field("max_frame_size", &self.max_frame_size)
            .field("decode_queue", &self.decode_queue)
            .finish_non_exhaustive()
    }
}

/// One depacketizer per track payload type, created on first use.
pub struct Router {
    factory: DepacketizerFactory,
    max_frame_size: usize,
    depacketizers: HashMap<(Option<u8>, u32), Box<dyn Depacketizer>>,
}

impl Router {
    pub fn new(factory: DepacketizerFactory, max_frame_size: usize) -> Self {
        Self {
            factory,
            max_frame_size,
            depacketizers: HashMap::new(),
        }
    }

    pub fn route(&mut self, sample: &Sample) -> Result<Option<Frame>> {
        let track = &sample.track;
        let key = (track.payload_type(), track.tag());
        let depacketizer = self.depacketizers.entry(key).or_insert_with(|| {
            tracing::debug!(track = %track, "depacketizer created");
            (self.factory)(track, self.max_frame_size)
        });
        depacketizer.depacketize(sample)
    }

    pub fn len(&self) -> usize {
        self.depacketizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depacketizers.is_empty()
    }

    pub fn clear(&mut self) {
        for depacketizer in self.depacketizers.values_mut() {
            depacketizer.clear();
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    samples: AtomicU64,
    frames: AtomicU64,
    dropped: AtomicU64,
}

/// A running ingest: reader, pacing and decode threads.
pub struct Pipeline {
    running: Arc<AtomicBool>,
    interrupter: Box<dyn Interrupt>,
    pacing: PacingBuffer<Frame>,
    handoff: Arc<Mutex<Option<SyncSender<Frame>>>>,
    counters: Arc<Counters>,
    reader: Option<JoinHandle<Result<()>>>,
    decoder: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Prepare the extractor if needed and start all stages.
    ///
    /// Handshake errors are returned here, before any thread is started.
    pub fn start<T, S>(mut extractor: RtspExtractor<T>, sink: S, config: PipelineConfig) -> Result<Self>
    where
        T: Transport + 'static,
        S: DecodeSink,
    {
        if !extractor.is_prepared()
            && let Err(e) = extractor.prepare()
        {
            extractor.close();
            return Err(e);
        }
        if extractor.session().map(|s| s.state()) != Some(SessionState::Playing) {
            extractor.close();
            return Err(RtspError::NotPrepared);
        }
        let interrupter = extractor.interrupter()?;

        let (tx, rx) = mpsc::sync_channel(config.decode_queue.max(1));
        let handoff = Arc::new(Mutex::new(Some(tx)));
        let pacing = {
            let handoff = handoff.clone();
            PacingBuffer::new(config.latency, move |frame: Frame| {
                // Cloned out so stop() can drop the sender while we block.
                let tx = handoff.lock().clone();
                if let Some(tx) = tx
                    && tx.send(frame).is_err()
                {
                    tracing::trace!("decoder gone, frame dropped");
                }
            })
        };

        let decoder = thread::Builder::new()
            .name("rtsp-decode".into())
            .spawn(move || decode_loop(rx, sink))?;

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let router = Router::new(config.depacketizers.clone(), config.max_frame_size);
        let reader = {
            let running = running.clone();
            let pacing = pacing.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("rtsp-reader".into())
                .spawn(move || read_loop(extractor, router, pacing, running, counters))?
        };

        tracing::debug!(?config, "pipeline started");
        Ok(Self {
            running,
            interrupter,
            pacing,
            handoff,
            counters,
            reader: Some(reader),
            decoder: Some(decoder),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.pacing.set_latency(latency);
    }

    /// RTP samples read so far.
    pub fn samples(&self) -> u64 {
        self.counters.samples.load(Ordering::Relaxed)
    }

    /// Frames handed to the pacing buffer so far.
    pub fn frames(&self) -> u64 {
        self.counters.frames.load(Ordering::Relaxed)
    }

    /// Samples that failed to depacketize.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Block until the stream ends, let paced frames drain, then shut down.
    pub fn wait(mut self) -> Result<()> {
        let result = self.join_reader();
        while !self.pacing.is_empty() || self.pacing.is_playing() {
            thread::sleep(Duration::from_millis(10));
        }
        self.shutdown();
        result
    }

    /// Stop reading now. Frames still waiting for their time are dropped.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.interrupter.interrupt();
        let result = self.join_reader();
        self.shutdown();
        result
    }

    fn join_reader(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(RtspError::Io(io::Error::other("reader thread panicked")))),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.pacing.destroy();
        self.handoff.lock().take();
        if let Some(handle) = self.decoder.take()
            && handle.join().is_err()
        {
            tracing::warn!("decode thread panicked");
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::debug!(
            samples = self.samples(),
            frames = self.frames(),
            dropped = self.dropped(),
            "pipeline stopped"
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.reader.is_some() || self.decoder.is_some() {
            let _ = self.stop();
        }
    }
}

fn read_loop<T: Transport>(
    mut extractor: RtspExtractor<T>,
    mut router: Router,
    pacing: PacingBuffer<Frame>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> Result<()> {
    let result = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }

        let sample = match extractor.next_sample() {
            Ok(SampleRead::Sample(sample)) => sample,
            Ok(SampleRead::Pending) => continue,
            Ok(SampleRead::EndOfStream) => {
                tracing::info!(samples = extractor.sample_index(), "end of stream");
                break Ok(());
            }
            Err(_) if !running.load(Ordering::SeqCst) => break Ok(()),
            Err(RtspError::Timeout) => {
                tracing::debug!("read timed out");
                continue;
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "packet dropped");
                continue;
            }
            Err(e) => break Err(e),
        };
        counters.samples.fetch_add(1, Ordering::Relaxed);

        match router.route(&sample) {
            Ok(Some(frame)) => {
                tracing::trace!(
                    ts = frame.timestamp(),
                    len = frame.data().len(),
                    kind = ?frame.frame_type,
                    "frame"
                );
                counters.frames.fetch_add(1, Ordering::Relaxed);
                if pacing.receive(frame).is_err() {
                    break Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, track = %sample.track, "depacketize failed");
            }
        }
    };

    router.clear();
    extractor.close();
    running.store(false, Ordering::SeqCst);
    result
}

fn decode_loop<S: DecodeSink>(frames: Receiver<Frame>, mut sink: S) {
    for frame in frames {
        if let Some(unit) = sink.feed(frame) {
            let status = sink.decode(unit);
            if status < 0 {
                tracing::warn!(status, "decode failed");
            }
        }
    }
    tracing::debug!("decode loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FrameType;
    use crate::media::h264::START_CODE;
    use crate::track::{TrackBuilder, TrackKind};

    fn track(id: &str, pt: u8, tag: u32, format: &str) -> Arc<Track> {
        Arc::new(
            TrackBuilder::new(TrackKind::Video)
                .id(id)
                .payload_type(Some(pt))
                .format(format)
                .clock_rate(90_000)
                .tag(tag)
                .build()
                .unwrap(),
        )
    }

    fn router() -> Router {
        let config = PipelineConfig::default();
        Router::new(config.depacketizers, 64)
    }

    #[test]
    fn router_keeps_one_depacketizer_per_track() {
        let mut router = router();
        let video = track("v", 96, 0, "h264");
        let data = track("d", 98, 1, "x-data");

        let start = Sample::new(vec![0x7C, 0x85, 1, 2], 0, video.clone());
        let other = Sample::new(vec![9, 9], 0, data.clone());
        let end = Sample::new(vec![0x7C, 0x45, 3], 0, video.clone());

        assert!(router.route(&start).unwrap().is_none());
        let raw = router.route(&other).unwrap().unwrap();
        assert_eq!(raw.frame_type, FrameType::Unknown);

        // The raw track must not disturb the open FU-A run.
        let frame = router.route(&end).unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Sync);
        assert_eq!(&frame.data()[..4], &START_CODE);
        assert_eq!(&frame.data()[4..], &[0x65, 1, 2, 3]);
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn router_uses_injected_factory() {
        let config = PipelineConfig {
            depacketizers: Arc::new(|_: &Track, max| -> Box<dyn Depacketizer> {
                Box::new(crate::media::RawDepacketizer::new(max))
            }),
            ..Default::default()
        };
        let mut router = Router::new(config.depacketizers, 8);
        let video = track("v", 96, 0, "h264");

        let frame = router.route(&Sample::new(vec![0x7C, 0x85, 1], 0, video.clone())).unwrap();
        assert_eq!(frame.unwrap().frame_type, FrameType::Unknown);
        assert!(matches!(
            router.route(&Sample::new(vec![0; 9], 0, video)),
            Err(RtspError::BufferOverflow { capacity: 8, required: 9 })
        ));
    }

    struct Recorder {
        fed: Arc<Mutex<Vec<i64>>>,
        decoded: Arc<Mutex<Vec<i64>>>,
    }

    impl DecodeSink for Recorder {
        fn feed(&mut self, frame: Frame) -> Option<Frame> {
            self.fed.lock().push(frame.timestamp());
            // Config units are held back, as a decoder would consume them.
            (!frame.is_config()).then_some(frame)
        }

        fn decode(&mut self, frame: Frame) -> i32 {
            self.decoded.lock().push(frame.timestamp());
            0
        }
    }

    #[test]
    fn decode_loop_feeds_then_decodes_ready_units() {
        let fed = Arc::new(Mutex::new(Vec::new()));
        let decoded = Arc::new(Mutex::new(Vec::new()));
        let sink = Recorder {
            fed: fed.clone(),
            decoded: decoded.clone(),
        };

        let t = track("v", 96, 0, "h264");
        let (tx, rx) = mpsc::sync_channel(4);
        let worker = thread::spawn(move || decode_loop(rx, sink));
        tx.send(Frame::new(Sample::new(vec![0x67], 0, t.clone()), FrameType::Config)).unwrap();
        tx.send(Frame::new(Sample::new(vec![0x65], 40, t.clone()), FrameType::Sync)).unwrap();
        tx.send(Frame::new(Sample::new(vec![0x41], 80, t), FrameType::NonSync)).unwrap();
        drop(tx);
        worker.join().unwrap();

        assert_eq!(*fed.lock(), vec![0, 40, 80]);
        assert_eq!(*decoded.lock(), vec![40, 80]);
    }

    #[test]
    fn default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.decode_queue > 0);
        assert!(format!("{:?}", config).contains("latency"));
    }
}
