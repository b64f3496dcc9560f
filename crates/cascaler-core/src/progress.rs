// crates/cascaler-core/src/progress.rs
//
// ProgressTracker: completion counter + ETA. The display is an explicit
// collaborator (indicatif bar behind a router) so log lines written while a
// bar is active go through the bar instead of tearing it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Weight of the newest per-item duration in the ETA smoothing.
const ETA_EMA_ALPHA: f64 = 0.2;

/// Routes console lines through the active progress bar so they don't tear
/// the in-place redraw. Passed explicitly to whoever needs to print while a
/// job runs; without an active bar it falls back to stderr.
#[derive(Clone, Default)]
pub struct LogRouter {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl LogRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bar(&self, bar: ProgressBar) {
        *self.bar.lock().unwrap() = Some(bar);
    }

    pub fn clear_bar(&self) {
        *self.bar.lock().unwrap() = None;
    }

    pub fn write_line(&self, line: &str) {
        match &*self.bar.lock().unwrap() {
            Some(bar) if !bar.is_finished() => bar.println(line),
            _ => eprintln!("{line}"),
        }
    }
}

struct TrackerState {
    completed: u64,
    ema_secs_per_item: Option<f64>,
    last_completion: Instant,
}

pub struct ProgressTracker {
    total: u64,
    min_items_for_eta: u64,
    show_eta: bool,
    started: Instant,
    state: Mutex<TrackerState>,
    bar: Option<ProgressBar>,
    router: LogRouter,
}

impl ProgressTracker {
    /// `progress_char` and `show_eta` come from the Output config section.
    pub fn new(
        total: u64,
        min_items_for_eta: u64,
        display: bool,
        progress_char: &str,
        show_eta: bool,
        router: LogRouter,
    ) -> Self {
        let bar = if display {
            let ch = progress_char.chars().next().unwrap_or('#');
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars(&format!("{ch}>-")),
            );
            router.set_bar(pb.clone());
            Some(pb)
        } else {
            None
        };
        Self {
            total,
            min_items_for_eta,
            show_eta,
            started: Instant::now(),
            state: Mutex::new(TrackerState {
                completed: 0,
                ema_secs_per_item: None,
                last_completion: Instant::now(),
            }),
            bar,
            router,
        }
    }

    /// Record one completed item (success or per-item failure — both count
    /// toward the total) and refresh the display.
    pub fn item_done(&self) {
        let eta = {
            let mut st = self.state.lock().unwrap();
            st.completed += 1;
            let now = Instant::now();
            let item_secs = now.duration_since(st.last_completion).as_secs_f64();
            st.last_completion = now;
            st.ema_secs_per_item = Some(match st.ema_secs_per_item {
                // Seed with the plain elapsed/completed average.
                None => self.started.elapsed().as_secs_f64() / st.completed as f64,
                Some(prev) => ETA_EMA_ALPHA * item_secs + (1.0 - ETA_EMA_ALPHA) * prev,
            });
            self.eta_locked(&st)
        };
        if let Some(bar) = &self.bar {
            bar.inc(1);
            match eta {
                Some(d) if self.show_eta => {
                    bar.set_message(format!("ETA {}", format_eta(d)));
                }
                _ => bar.set_message(String::new()),
            }
        }
    }

    fn eta_locked(&self, st: &TrackerState) -> Option<Duration> {
        if st.completed < self.min_items_for_eta || st.completed >= self.total {
            return None;
        }
        let per_item = st.ema_secs_per_item?;
        let remaining = (self.total - st.completed) as f64;
        Some(Duration::from_secs_f64(per_item * remaining))
    }

    /// Estimated time to completion; None until enough items completed.
    pub fn eta(&self) -> Option<Duration> {
        self.eta_locked(&self.state.lock().unwrap())
    }

    pub fn completed(&self) -> u64 {
        self.state.lock().unwrap().completed
    }

    /// Print a line without tearing the bar.
    pub fn println(&self, line: &str) {
        self.router.write_line(line);
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        self.router.clear_bar();
    }
}

fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(total: u64, min: u64) -> ProgressTracker {
        ProgressTracker::new(total, min, false, "#", true, LogRouter::new())
    }

    #[test]
    fn no_eta_before_minimum_items() {
        let t = tracker(10, 3);
        assert!(t.eta().is_none());
        t.item_done();
        assert!(t.eta().is_none());
        t.item_done();
        assert!(t.eta().is_none());
        t.item_done();
        assert!(t.eta().is_some());
        assert_eq!(t.completed(), 3);
    }

    #[test]
    fn eta_shrinks_to_none_at_completion() {
        let t = tracker(3, 1);
        t.item_done();
        assert!(t.eta().is_some());
        t.item_done();
        t.item_done();
        assert!(t.eta().is_none());
    }

    #[test]
    fn format_eta_ranges() {
        assert_eq!(format_eta(Duration::from_secs(42)), "42s");
        assert_eq!(format_eta(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_eta(Duration::from_secs(3700)), "1h01m");
    }

    #[test]
    fn router_without_bar_does_not_panic() {
        let r = LogRouter::new();
        r.write_line("plain line");
        r.clear_bar();
    }
}
