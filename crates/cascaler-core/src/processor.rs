// crates/cascaler-core/src/processor.rs
//
// MediaProcessor: one producer thread feeds a bounded work channel, a pool of
// carving workers completes frames in any order, and the ordering buffer
// re-sequences them for the sink, which drains on the caller's thread.
//
//   source ─▶ bounded channel ─▶ workers ─▶ OrderingBuffer ─▶ sink
//
// Cancellation is a single shared flag: the producer stops enqueuing, workers
// finish their current item, the sink aborts. Per-item errors (carve timeout,
// unreadable file) are recorded in that item's result and the cursor still
// advances; sink and source errors are fatal and cancel the rest of the job.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::bounded;
use image::RgbImage;

use crate::carve::{self, LiquidRescaler};
use crate::dimensions::DimensionPlan;
use crate::error::{CasError, Result};
use crate::options::FrameFormat;
use crate::progress::ProgressTracker;
use crate::reorder::OrderingBuffer;
use crate::sink::{FrameSink, ProcessedFrame};

#[derive(Debug)]
pub enum WorkPayload {
    /// Loaded by the worker (batch inputs).
    ImagePath(PathBuf),
    /// Already in memory (decoded video frame, repeated sequence source).
    Image(RgbImage),
}

#[derive(Debug)]
pub struct WorkItem {
    pub index: usize,
    pub payload: WorkPayload,
    /// Source identifier for results and error messages.
    pub source: String,
    /// Producer-chosen output file name (image sinks only).
    pub out_name: String,
}

/// Work items in index order; `None` ends the stream, `Some(Err(..))` is a
/// fatal source failure that aborts the job.
pub trait FrameSource: Send {
    fn next_item(&mut self) -> Option<Result<WorkItem>>;
}

#[derive(Debug, Clone)]
pub struct ItemResult {
    pub index: usize,
    pub source: String,
    pub error: Option<String>,
}

impl ItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Planning,
    Running,
    Draining,
    Finalizing,
    Done,
    Error,
}

/// Pick the worker pool size: the configured budget (or the `--threads`
/// override) capped by the number of items.
pub fn worker_count(budget: usize, override_threads: Option<usize>, items: usize) -> usize {
    override_threads
        .unwrap_or(budget)
        .max(1)
        .min(items.max(1))
}

pub struct MediaProcessor<R: LiquidRescaler> {
    rescaler: Arc<R>,
    dims: DimensionPlan,
    /// Uniform dimensions every output frame is resampled to after carving
    /// (the scale-back post-step), when requested.
    scale_back_to: Option<(u32, u32)>,
    workers: usize,
    cancel: Arc<AtomicBool>,
}

impl<R: LiquidRescaler + 'static> MediaProcessor<R> {
    pub fn new(
        rescaler: R,
        dims: DimensionPlan,
        scale_back_to: Option<(u32, u32)>,
        workers: usize,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rescaler: Arc::new(rescaler),
            dims,
            scale_back_to,
            workers: workers.max(1),
            cancel,
        }
    }

    /// Drive the whole job. Blocks until every frame reached the sink (or the
    /// job was cancelled / failed fatally). Returns per-item results sorted
    /// by index.
    pub fn run<S: FrameSink>(
        &self,
        mut source: Box<dyn FrameSource>,
        sink: &mut S,
        tracker: &ProgressTracker,
    ) -> Result<Vec<ItemResult>> {
        let mut state = JobState::Planning;
        log::debug!("job state -> {state:?} ({} workers)", self.workers);

        let (work_tx, work_rx) = bounded::<WorkItem>(self.workers * 2);
        let buffer: Arc<OrderingBuffer<Option<ProcessedFrame>>> =
            Arc::new(OrderingBuffer::new(4 * self.workers));
        let results: Arc<Mutex<Vec<ItemResult>>> = Arc::new(Mutex::new(Vec::new()));
        let fatal: Arc<Mutex<Option<CasError>>> = Arc::new(Mutex::new(None));
        let workers_left = Arc::new(AtomicUsize::new(self.workers));

        state = JobState::Running;
        log::debug!("job state -> {state:?}");

        thread::scope(|scope| {
            // ── Producer ──────────────────────────────────────────────────
            let producer_cancel = Arc::clone(&self.cancel);
            let producer_fatal = Arc::clone(&fatal);
            scope.spawn(move || {
                while !producer_cancel.load(Ordering::Relaxed) {
                    match source.next_item() {
                        Some(Ok(item)) => {
                            if work_tx.send(item).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            log::error!("source failed: {e}");
                            *producer_fatal.lock().unwrap() = Some(e);
                            producer_cancel.store(true, Ordering::Relaxed);
                            break;
                        }
                        None => break,
                    }
                }
                // work_tx drops here; workers drain what's queued and exit.
            });

            // ── Workers ───────────────────────────────────────────────────
            for _ in 0..self.workers {
                let rx = work_rx.clone();
                let rescaler = Arc::clone(&self.rescaler);
                let buffer = Arc::clone(&buffer);
                let results = Arc::clone(&results);
                let cancel = Arc::clone(&self.cancel);
                let workers_left = Arc::clone(&workers_left);
                let dims = self.dims;
                let scale_back_to = self.scale_back_to;
                scope.spawn(move || {
                    while let Ok(item) = rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let WorkItem {
                            index,
                            payload,
                            source,
                            out_name,
                        } = item;
                        let (tw, th) = dims.frame_dims(index);

                        let outcome = process_one(&*rescaler, payload, tw, th, scale_back_to);
                        let error = outcome.as_ref().err().map(|e| e.to_string());
                        if let Some(msg) = &error {
                            log::warn!("{source}: {msg}");
                        }
                        results.lock().unwrap().push(ItemResult {
                            index,
                            source: source.clone(),
                            error,
                        });
                        tracker.item_done();

                        let slot = outcome.ok().map(|image| ProcessedFrame {
                            index,
                            image,
                            source,
                            out_name,
                        });
                        if !buffer.insert(index, slot) {
                            break; // buffer aborted
                        }
                    }
                    if workers_left.fetch_sub(1, Ordering::AcqRel) == 1 {
                        buffer.close();
                    }
                });
            }
            drop(work_rx);

            // ── Sink drain (this thread) ──────────────────────────────────
            while let Some(slot) = buffer.pop_next() {
                if self.cancel.load(Ordering::Relaxed) {
                    buffer.abort();
                    break;
                }
                let Some(frame) = slot else { continue };
                if let Err(e) = sink.submit(frame) {
                    log::error!("sink failed: {e}");
                    *fatal.lock().unwrap() = Some(e);
                    self.cancel.store(true, Ordering::Relaxed);
                    buffer.abort();
                    break;
                }
            }
            state = JobState::Draining;
            log::debug!("job state -> {state:?}");
        });

        // All threads joined; decide the terminal state.
        if let Some(e) = fatal.lock().unwrap().take() {
            state = JobState::Error;
            log::debug!("job state -> {state:?}");
            sink.abort();
            return Err(e);
        }
        if self.cancel.load(Ordering::Relaxed) {
            state = JobState::Error;
            log::debug!("job state -> {state:?}");
            sink.abort();
            return Err(CasError::Cancelled);
        }

        state = JobState::Finalizing;
        log::debug!("job state -> {state:?}");
        sink.finish()?;

        state = JobState::Done;
        log::debug!("job state -> {state:?}");

        let mut out = Arc::try_unwrap(results)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_default();
        out.sort_by_key(|r| r.index);
        Ok(out)
    }
}

fn process_one<R: LiquidRescaler + ?Sized>(
    rescaler: &R,
    payload: WorkPayload,
    tw: u32,
    th: u32,
    scale_back_to: Option<(u32, u32)>,
) -> Result<RgbImage> {
    let image = match payload {
        WorkPayload::ImagePath(path) => carve::load_image(&path)?,
        WorkPayload::Image(image) => image,
    };
    let carved = rescaler.rescale(&image, tw, th)?;
    Ok(match scale_back_to {
        Some((w, h)) => carve::resize_exact(&carved, w, h),
        None => carved,
    })
}

// ── Stock sources ─────────────────────────────────────────────────────────────

/// Batch input: one work item per file, output keeps the source file name.
pub struct ImageListSource {
    files: std::vec::IntoIter<(usize, PathBuf)>,
}

impl ImageListSource {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files: files
                .into_iter()
                .enumerate()
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }
}

impl FrameSource for ImageListSource {
    fn next_item(&mut self) -> Option<Result<WorkItem>> {
        let (index, path) = self.files.next()?;
        let source = path.display().to_string();
        let out_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{index}.png"));
        Some(Ok(WorkItem {
            index,
            payload: WorkPayload::ImagePath(path),
            source,
            out_name,
        }))
    }
}

/// Sequence input: one source image repeated for every frame of the plan.
pub struct RepeatImageSource {
    image: RgbImage,
    source: String,
    format: FrameFormat,
    next: usize,
    total: usize,
}

impl RepeatImageSource {
    pub fn new(image: RgbImage, source: String, format: FrameFormat, total: usize) -> Self {
        Self {
            image,
            source,
            format,
            next: 0,
            total,
        }
    }
}

impl FrameSource for RepeatImageSource {
    fn next_item(&mut self) -> Option<Result<WorkItem>> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(Ok(WorkItem {
            index,
            payload: WorkPayload::Image(self.image.clone()),
            source: format!("{} [frame {index}]", self.source),
            out_name: frame_file_name(index, self.format),
        }))
    }
}

/// Frame file naming shared by every dir-of-frames sink.
pub fn frame_file_name(index: usize, format: FrameFormat) -> String {
    format!("frame_{index:06}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::LogRouter;
    use crate::sink::test_support::CollectSink;
    use std::time::Duration;

    /// Identity backend with an optional per-index delay/failure schedule.
    struct StubRescaler {
        fail_on: Option<usize>,
        jitter: bool,
    }

    impl LiquidRescaler for StubRescaler {
        fn rescale(&self, image: &RgbImage, w: u32, h: u32) -> Result<RgbImage> {
            // Recover the index smuggled through the red channel.
            let idx = image.get_pixel(0, 0)[0] as usize;
            if self.fail_on == Some(idx) {
                return Err(CasError::carving("stub failure"));
            }
            if self.jitter {
                // Uneven completion order across workers.
                thread::sleep(Duration::from_millis((idx % 7) as u64));
            }
            Ok(carve::resize_exact(image, w, h))
        }
    }

    struct IndexSource {
        next: usize,
        total: usize,
    }

    impl FrameSource for IndexSource {
        fn next_item(&mut self) -> Option<Result<WorkItem>> {
            if self.next >= self.total {
                return None;
            }
            let index = self.next;
            self.next += 1;
            Some(Ok(WorkItem {
                index,
                payload: WorkPayload::Image(RgbImage::from_pixel(
                    8,
                    8,
                    image::Rgb([index as u8, 0, 0]),
                )),
                source: format!("frame {index}"),
                out_name: format!("{index}.png"),
            }))
        }
    }

    fn plan(n: usize) -> DimensionPlan {
        DimensionPlan {
            start_w: 8,
            start_h: 8,
            end_w: 4,
            end_h: 4,
            total_frames: n,
        }
    }

    fn tracker(total: u64) -> ProgressTracker {
        ProgressTracker::new(total, 3, false, "#", false, LogRouter::new())
    }

    #[test]
    fn sink_sees_strictly_increasing_indices() {
        let n = 120;
        let proc = MediaProcessor::new(
            StubRescaler {
                fail_on: None,
                jitter: true,
            },
            plan(n),
            None,
            8,
            Arc::new(AtomicBool::new(false)),
        );
        let mut sink = CollectSink::default();
        let t = tracker(n as u64);
        let results = proc
            .run(Box::new(IndexSource { next: 0, total: n }), &mut sink, &t)
            .unwrap();

        assert_eq!(sink.indices, (0..n).collect::<Vec<_>>());
        assert!(sink.finished);
        assert_eq!(results.len(), n);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(t.completed(), n as u64);
    }

    #[test]
    fn per_item_failure_keeps_the_batch_going() {
        let n = 10;
        let proc = MediaProcessor::new(
            StubRescaler {
                fail_on: Some(3),
                jitter: false,
            },
            plan(n),
            None,
            4,
            Arc::new(AtomicBool::new(false)),
        );
        let mut sink = CollectSink::default();
        let t = tracker(n as u64);
        let results = proc
            .run(Box::new(IndexSource { next: 0, total: n }), &mut sink, &t)
            .unwrap();

        // Frame 3 is missing from the sink but the rest arrived in order.
        assert_eq!(
            sink.indices,
            (0..n).filter(|&i| i != 3).collect::<Vec<_>>()
        );
        let failed: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 3);
        assert!(failed[0].error.as_deref().unwrap().contains("stub failure"));
    }

    #[test]
    fn cancellation_surfaces_and_aborts_sink() {
        let n = 500;
        let cancel = Arc::new(AtomicBool::new(false));
        let proc = MediaProcessor::new(
            StubRescaler {
                fail_on: None,
                jitter: true,
            },
            plan(n),
            None,
            4,
            Arc::clone(&cancel),
        );

        let canceller = {
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                cancel.store(true, Ordering::Relaxed);
            })
        };

        let mut sink = CollectSink::default();
        let t = tracker(n as u64);
        let err = proc
            .run(Box::new(IndexSource { next: 0, total: n }), &mut sink, &t)
            .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, CasError::Cancelled));
        assert!(sink.aborted);
        assert!(!sink.finished);
        // Whatever reached the sink was still in order.
        assert!(sink.indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn scale_back_resamples_to_uniform_target() {
        let n = 4;
        let proc = MediaProcessor::new(
            StubRescaler {
                fail_on: None,
                jitter: false,
            },
            plan(n),
            Some((8, 8)),
            2,
            Arc::new(AtomicBool::new(false)),
        );

        struct DimsSink(Vec<(u32, u32)>);
        impl FrameSink for DimsSink {
            fn submit(&mut self, f: ProcessedFrame) -> Result<()> {
                self.0.push(f.image.dimensions());
                Ok(())
            }
            fn finish(&mut self) -> Result<()> {
                Ok(())
            }
            fn abort(&mut self) {}
        }

        let mut sink = DimsSink(Vec::new());
        let t = tracker(n as u64);
        proc.run(Box::new(IndexSource { next: 0, total: n }), &mut sink, &t)
            .unwrap();
        assert!(sink.0.iter().all(|&d| d == (8, 8)));
    }

    #[test]
    fn worker_count_honors_budget_override_and_items() {
        assert_eq!(worker_count(8, None, 100), 8);
        assert_eq!(worker_count(8, Some(2), 100), 2);
        assert_eq!(worker_count(8, None, 3), 3);
        assert_eq!(worker_count(8, None, 0), 1);
    }
}
