//! Background preview rendering.
//!
//! At most one render runs at a time. Requests made while it runs collapse
//! into a single pending request, and every request carries a generation so
//! a frame older than the one on screen is never shown.

use std::sync::{Arc, mpsc};
use std::time::Instant;

use image::DynamicImage;

use crate::processing::RenderJob;

type Notify = Arc<dyn Fn() + Send + Sync>;

/// What one preview refresh needs rendered.
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub edited: RenderJob,
    /// Unfiltered render under the same geometry, for comparison view.
    pub original: Option<RenderJob>,
}

pub struct PreviewFrame {
    pub generation: u64,
    pub edited: DynamicImage,
    pub original: Option<DynamicImage>,
}

pub struct PreviewWorker {
    tx: mpsc::Sender<PreviewFrame>,
    rx: mpsc::Receiver<PreviewFrame>,
    in_flight: Option<u64>,
    pending: Option<(u64, PreviewRequest)>,
    next_generation: u64,
    shown_generation: u64,
    /// Frames at or below this generation were discarded.
    discarded_through: u64,
    notify: Option<Notify>,
}

impl PreviewWorker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            in_flight: None,
            pending: None,
            next_generation: 0,
            shown_generation: 0,
            discarded_through: 0,
            notify: None,
        }
    }

    /// Call `notify` from the worker thread whenever a frame is ready.
    pub fn with_notify(mut self, notify: impl Fn() + Send + Sync + 'static) -> Self {
        self.notify = Some(Arc::new(notify));
        self
    }

    pub fn submit(&mut self, request: PreviewRequest) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        if self.in_flight.is_some() {
            if let Some((replaced, _)) = self.pending.replace((generation, request)) {
                tracing::trace!(replaced, generation, "pending preview superseded");
            }
        } else {
            self.spawn(generation, request);
        }
        generation
    }

    fn spawn(&mut self, generation: u64, request: PreviewRequest) {
        self.in_flight = Some(generation);
        let tx = self.tx.clone();
        let notify = self.notify.clone();
        std::thread::spawn(move || {
            let started = Instant::now();
            let edited = request.edited.run();
            let original = request.original.as_ref().map(RenderJob::run);
            tracing::debug!(
                generation,
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "preview rendered"
            );
            let _ = tx.send(PreviewFrame {
                generation,
                edited,
                original,
            });
            if let Some(notify) = notify {
                notify();
            }
        });
    }

    /// Collect finished renders. Returns the newest frame worth showing and
    /// starts the pending request once the worker is free.
    pub fn poll(&mut self) -> Option<PreviewFrame> {
        let mut newest: Option<PreviewFrame> = None;
        while let Ok(frame) = self.rx.try_recv() {
            if self.in_flight == Some(frame.generation) {
                self.in_flight = None;
            }
            if frame.generation <= self.discarded_through || frame.generation <= self.shown_generation {
                tracing::trace!(generation = frame.generation, "dropping stale preview");
                continue;
            }
            if newest.as_ref().is_none_or(|n| frame.generation > n.generation) {
                newest = Some(frame);
            }
        }

        if self.in_flight.is_none() {
            if let Some((generation, request)) = self.pending.take() {
                self.spawn(generation, request);
            }
        }

        if let Some(frame) = &newest {
            self.shown_generation = frame.generation;
        }
        newest
    }

    /// Forget queued work and ignore anything still rendering.
    pub fn discard(&mut self) {
        self.pending = None;
        self.discarded_through = self.next_generation;
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some() || self.pending.is_some()
    }

    pub fn shown_generation(&self) -> u64 {
        self.shown_generation
    }
}

impl Default for PreviewWorker {
    fn default() -> Self {
        Self::new()
    }
}
