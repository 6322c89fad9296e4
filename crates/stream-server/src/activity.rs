//! Frame task and audio activity detection
//!
//! A dedicated thread reads frames from the sample source, fans them out to
//! streaming clients while any are connected, and periodically classifies the
//! audio as silent or not. Sustained activity enables the selected renderers,
//! sustained silence disables them.

use crate::config::{ActivitySettings, AudioSettings};
use crate::stream::{ClientRegistry, Presence};
use crate::types::SampleFrame;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use wavecast_core::SampleSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioState {
    Silent,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Activated,
    Deactivated,
}

/// Debounced silent/active state machine
///
/// The counter climbs on non-silent evaluations and falls on silent ones, so
/// short gaps in the music do not stop playback and short noise bursts do not
/// start it.
#[derive(Clone, Debug)]
pub struct ActivityDetector {
    state: AudioState,
    counter: u32,
    activate_ticks: u32,
    deactivate_ticks: u32,
}

impl ActivityDetector {
    pub fn new(activate_ticks: u32, deactivate_ticks: u32) -> Self {
        Self {
            state: AudioState::Silent,
            counter: 0,
            activate_ticks,
            deactivate_ticks,
        }
    }

    pub fn from_settings(settings: &ActivitySettings) -> Self {
        Self::new(settings.activate_ticks, settings.deactivate_ticks)
    }

    pub fn state(&self) -> AudioState {
        self.state
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn timeout(&self) -> u32 {
        match self.state {
            AudioState::Silent => self.activate_ticks,
            AudioState::Active => self.deactivate_ticks,
        }
    }

    /// Feed one evaluation; returns the transition it caused, if any
    pub fn update(&mut self, silent: bool) -> Option<Transition> {
        if silent {
            if self.counter > 0 {
                self.counter -= 1;
            } else if self.state == AudioState::Active {
                self.state = AudioState::Silent;
                return Some(Transition::Deactivated);
            }
        } else if self.counter < self.timeout() {
            self.counter += 1;
        } else if self.state == AudioState::Silent {
            self.state = AudioState::Active;
            self.counter = self.deactivate_ticks;
            return Some(Transition::Activated);
        }
        None
    }
}

/// Receiver of activity decisions
pub trait TransportSwitch: Send + Sync {
    fn enable(&self);
    fn disable(&self);
}

/// A running frame thread.
///
/// The thread may be parked in a blocking read that no flag can interrupt, so
/// it is never joined; callers wait on [`FrameTask::finished`] instead.
pub struct FrameTask {
    thread: JoinHandle<()>,
    done: Option<oneshot::Receiver<std::io::Result<()>>>,
}

impl FrameTask {
    /// Resolves once the loop has returned; `None` if it panicked.
    ///
    /// After the first completion this stays pending.
    pub async fn finished(&mut self) -> Option<std::io::Result<()>> {
        let Some(done) = self.done.as_mut() else {
            return std::future::pending().await;
        };
        let result = done.await.ok();
        self.done = None;
        result
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// The frame task: source -> clients, plus activity evaluation
pub struct ActivityMonitor {
    source: Box<dyn SampleSource>,
    clients: ClientRegistry,
    presence: mpsc::UnboundedReceiver<Presence>,
    switch: Arc<dyn TransportSwitch>,
    detector: ActivityDetector,
    frame_bytes: usize,
    read_timeout: Duration,
    evaluate_every: Duration,
    last_evaluation: Option<Instant>,
    forwarding: bool,
    sequence: u64,
    shutdown: Arc<AtomicBool>,
}

impl ActivityMonitor {
    pub fn new(
        source: Box<dyn SampleSource>,
        clients: ClientRegistry,
        presence: mpsc::UnboundedReceiver<Presence>,
        switch: Arc<dyn TransportSwitch>,
        audio: &AudioSettings,
        activity: &ActivitySettings,
    ) -> Self {
        Self {
            source,
            clients,
            presence,
            switch,
            detector: ActivityDetector::from_settings(activity),
            frame_bytes: audio.frame_bytes(),
            read_timeout: audio.read_timeout(),
            evaluate_every: activity.evaluate_every(),
            last_evaluation: None,
            forwarding: false,
            sequence: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the loop at its next read timeout
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding
    }

    pub fn detector(&self) -> &ActivityDetector {
        &self.detector
    }

    /// Run the loop on its own OS thread
    pub fn spawn(self) -> std::io::Result<FrameTask> {
        let (done_tx, done) = oneshot::channel();
        let thread = std::thread::Builder::new()
            .name("frame-task".to_string())
            .spawn(move || {
                let result = self.run();
                if let Err(e) = &result {
                    error!("Frame task stopped: {}", e);
                }
                let _ = done_tx.send(result);
            })?;

        Ok(FrameTask {
            thread,
            done: Some(done),
        })
    }

    pub fn run(mut self) -> std::io::Result<()> {
        info!(
            "Frame task reading {}-byte frames from {}",
            self.frame_bytes,
            self.source.name()
        );
        let mut buf = vec![0u8; self.frame_bytes];

        while !self.shutdown.load(Ordering::Relaxed) {
            self.poll_presence();

            let read = match self.source.read(&mut buf, self.read_timeout) {
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    info!("Sample source {} exhausted", self.source.name());
                    return Ok(());
                }
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    continue;
                }
                Err(e) => return Err(e),
            };

            if read == 0 {
                continue;
            }
            if read < self.frame_bytes {
                warn!("Short read of {} of {} bytes, discarding frame", read, self.frame_bytes);
                continue;
            }

            let frame = SampleFrame::new(self.sequence, buf.clone());
            self.sequence += 1;
            self.handle_frame(&frame, Instant::now());
        }

        info!("Frame task shutting down");
        Ok(())
    }

    /// Apply pending client presence changes to the forwarding gate
    pub fn poll_presence(&mut self) {
        while let Ok(presence) = self.presence.try_recv() {
            self.forwarding = presence == Presence::Active;
            debug!("Frame forwarding {}", if self.forwarding { "on" } else { "off" });
        }
    }

    /// Forward a frame and evaluate activity when the interval has elapsed
    pub fn handle_frame(&mut self, frame: &SampleFrame, now: Instant) -> Option<Transition> {
        if self.forwarding {
            self.clients.broadcast(frame);
        }

        let due = self
            .last_evaluation
            .map_or(true, |last| now.duration_since(last) >= self.evaluate_every);
        if !due {
            return None;
        }
        self.last_evaluation = Some(now);
        self.evaluate(frame)
    }

    fn evaluate(&mut self, frame: &SampleFrame) -> Option<Transition> {
        let transition = self.detector.update(frame.looks_silent());
        match transition {
            Some(Transition::Activated) => {
                info!("Audio activity detected, enabling renderers");
                self.switch.enable();
            }
            Some(Transition::Deactivated) => {
                info!("Audio silent, disabling renderers");
                self.switch.disable();
            }
            None => {}
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ClientId;
    use crate::types::StreamFormat;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSwitch {
        enabled: AtomicUsize,
        disabled: AtomicUsize,
    }

    impl TransportSwitch for CountingSwitch {
        fn enable(&self) {
            self.enabled.fetch_add(1, Ordering::SeqCst);
        }
        fn disable(&self) {
            self.disabled.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedSource {
        reads: VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl SampleSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(ErrorKind::UnexpectedEof.into()),
            }
        }
    }

    fn frame(silent: bool) -> SampleFrame {
        let sample: i16 = if silent { 0 } else { 1000 };
        let data: Vec<u8> = std::iter::repeat(sample).take(8).flat_map(|s| s.to_le_bytes()).collect();
        SampleFrame::new(0, data)
    }

    fn audio() -> AudioSettings {
        AudioSettings {
            frame_samples: 4,
            ..AudioSettings::default()
        }
    }

    fn activity() -> ActivitySettings {
        ActivitySettings {
            evaluate_every_ms: 250,
            activate_ticks: 2,
            deactivate_ticks: 3,
        }
    }

    #[test]
    fn test_detector_activates_after_threshold() {
        let mut detector = ActivityDetector::new(2, 3);

        assert_eq!(detector.update(false), None);
        assert_eq!(detector.update(false), None);
        assert_eq!(detector.update(false), Some(Transition::Activated));
        assert_eq!(detector.state(), AudioState::Active);
        assert_eq!(detector.counter(), 3);
    }

    #[test]
    fn test_detector_ignores_short_noise() {
        let mut detector = ActivityDetector::new(2, 3);

        for silent in [false, false, true, true, false, true] {
            assert_eq!(detector.update(silent), None);
        }
        assert_eq!(detector.state(), AudioState::Silent);
    }

    #[test]
    fn test_detector_single_deactivation() {
        let mut detector = ActivityDetector::new(1, 3);
        detector.update(false);
        assert_eq!(detector.update(false), Some(Transition::Activated));

        let transitions: Vec<_> = (0..20).filter_map(|_| detector.update(true)).collect();
        assert_eq!(transitions, vec![Transition::Deactivated]);
        assert_eq!(detector.state(), AudioState::Silent);
        assert_eq!(detector.counter(), 0);
    }

    #[test]
    fn test_detector_counter_stays_clamped() {
        let mut detector = ActivityDetector::new(2, 3);
        for _ in 0..3 {
            detector.update(false);
        }
        for _ in 0..10 {
            assert_eq!(detector.update(false), None);
            assert!(detector.counter() <= 3);
        }
        assert_eq!(detector.state(), AudioState::Active);
    }

    #[test]
    fn test_sustained_silence_disables_once() {
        let (clients, presence) = ClientRegistry::new(4, Duration::ZERO);
        let switch = Arc::new(CountingSwitch::default());
        let source = Box::new(ScriptedSource { reads: VecDeque::new() });
        let mut monitor = ActivityMonitor::new(source, clients, presence, switch.clone(), &audio(), &activity());

        let start = Instant::now();
        let tick = Duration::from_millis(250);
        let mut at = start;

        for _ in 0..3 {
            monitor.handle_frame(&frame(false), at);
            at += tick;
        }
        assert_eq!(switch.enabled.load(Ordering::SeqCst), 1);

        for _ in 0..20 {
            monitor.handle_frame(&frame(true), at);
            at += tick;
        }
        assert_eq!(switch.disabled.load(Ordering::SeqCst), 1);
        assert_eq!(switch.enabled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_evaluation_is_rate_limited() {
        let (clients, presence) = ClientRegistry::new(4, Duration::ZERO);
        let switch = Arc::new(CountingSwitch::default());
        let source = Box::new(ScriptedSource { reads: VecDeque::new() });
        let mut monitor = ActivityMonitor::new(source, clients, presence, switch.clone(), &audio(), &activity());

        // Frames every 10 ms: only the first of each 250 ms window is evaluated
        let start = Instant::now();
        for i in 0..50u64 {
            monitor.handle_frame(&frame(false), start + Duration::from_millis(i * 10));
        }
        assert_eq!(monitor.detector().counter(), 2);
        assert_eq!(switch.enabled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_forwarding_follows_presence() {
        let (clients, presence) = ClientRegistry::new(4, Duration::ZERO);
        let switch = Arc::new(CountingSwitch::default());
        let source = Box::new(ScriptedSource { reads: VecDeque::new() });
        let mut monitor =
            ActivityMonitor::new(source, clients.clone(), presence, switch, &audio(), &activity());

        monitor.poll_presence();
        assert!(!monitor.is_forwarding());

        let session = clients
            .connect(ClientId::new(), "127.0.0.1:1234".parse().unwrap(), StreamFormat::Pcm)
            .unwrap();
        monitor.poll_presence();
        assert!(monitor.is_forwarding());

        monitor.handle_frame(&frame(false), Instant::now());
        assert_eq!(session.queue().len(), 1);

        drop(session);
        monitor.poll_presence();
        assert!(!monitor.is_forwarding());
    }

    #[test]
    fn test_run_skips_short_reads_and_stops_at_eof() {
        let (clients, presence) = ClientRegistry::new(16, Duration::ZERO);
        let switch = Arc::new(CountingSwitch::default());
        let full = frame(false).data().to_vec();
        let source = Box::new(ScriptedSource {
            reads: VecDeque::from(vec![
                Ok(full.clone()),
                Ok(vec![1, 2, 3]),
                Ok(Vec::new()),
                Err(ErrorKind::Interrupted.into()),
                Ok(full),
            ]),
        });

        let session = clients
            .connect(ClientId::new(), "127.0.0.1:1234".parse().unwrap(), StreamFormat::Pcm)
            .unwrap();
        let monitor = ActivityMonitor::new(source, clients.clone(), presence, switch, &audio(), &activity());

        monitor.run().unwrap();

        let sequences: Vec<u64> = session.queue().drain(usize::MAX).iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
    }

    /// Never returns data, like a pipe whose writer is alive but idle
    struct StalledSource {
        entered: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl SampleSource for StalledSource {
        fn name(&self) -> &str {
            "stalled"
        }

        fn read(&mut self, _buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Err(ErrorKind::UnexpectedEof.into())
        }
    }

    #[tokio::test]
    async fn test_frame_task_reports_end_of_source() {
        let (clients, presence) = ClientRegistry::new(16, Duration::ZERO);
        let source = Box::new(ScriptedSource {
            reads: VecDeque::from(vec![Ok(frame(false).data().to_vec())]),
        });
        let monitor = ActivityMonitor::new(
            source,
            clients,
            presence,
            Arc::new(CountingSwitch::default()),
            &audio(),
            &activity(),
        );

        let mut task = monitor.spawn().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), task.finished())
            .await
            .expect("frame task did not finish");
        assert!(matches!(result, Some(Ok(()))));

        // Completion is reported once
        assert!(tokio::time::timeout(Duration::from_millis(50), task.finished())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_blocked_frame_task_does_not_hold_up_the_caller() {
        let (clients, presence) = ClientRegistry::new(16, Duration::ZERO);
        let (release, stalled) = std::sync::mpsc::channel();
        let (entered_tx, entered) = std::sync::mpsc::channel();
        let monitor = ActivityMonitor::new(
            Box::new(StalledSource {
                entered: entered_tx,
                release: stalled,
            }),
            clients,
            presence,
            Arc::new(CountingSwitch::default()),
            &audio(),
            &activity(),
        );
        let shutdown = monitor.shutdown_flag();

        let mut task = monitor.spawn().unwrap();
        entered.recv_timeout(Duration::from_secs(2)).unwrap();
        shutdown.store(true, Ordering::Relaxed);

        // Still parked in read; waiting gives up instead of blocking a runtime thread
        assert!(tokio::time::timeout(Duration::from_millis(100), task.finished())
            .await
            .is_err());
        assert!(!task.is_finished());

        release.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), task.finished())
            .await
            .expect("frame task did not finish");
        assert!(matches!(result, Some(Ok(()))));
    }
}
