// crates/cascaler-core/src/reorder.rs
//
// OrderingBuffer: workers complete frames out of order; the sink must see
// them strictly by index. Held frames are capped so a slow frame 0 cannot
// let frames 1..N pile up in memory — insert blocks until the cursor
// advances, which is the pipeline's backpressure.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    held: BTreeMap<usize, T>,
    next_to_release: usize,
    closed: bool,
    aborted: bool,
}

pub struct OrderingBuffer<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled when the cursor advances (space for producers).
    space: Condvar,
    /// Signalled when the next-in-order frame may be present (sink wakeup).
    ready: Condvar,
    capacity: usize,
}

impl<T> OrderingBuffer<T> {
    /// `capacity` bounds the held set; 4·workers is the intended sizing.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                held: BTreeMap::new(),
                next_to_release: 0,
                closed: false,
                aborted: false,
            }),
            space: Condvar::new(),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a completed frame. Blocks while the held set is full, except
    /// for the frame the cursor is waiting on — blocking that one would
    /// deadlock the release path. Returns false if the buffer was aborted.
    pub fn insert(&self, index: usize, item: T) -> bool {
        let mut guard = self.inner.lock().unwrap();
        while guard.held.len() >= self.capacity
            && index != guard.next_to_release
            && !guard.aborted
        {
            guard = self.space.wait(guard).unwrap();
        }
        if guard.aborted {
            return false;
        }
        guard.held.insert(index, item);
        if index == guard.next_to_release {
            self.ready.notify_all();
        }
        true
    }

    /// Pop the next frame in index order, waiting as needed. Returns None
    /// once the buffer is closed and the in-order prefix is exhausted, or
    /// immediately after abort.
    pub fn pop_next(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.aborted {
                return None;
            }
            let next = guard.next_to_release;
            if let Some(item) = guard.held.remove(&next) {
                guard.next_to_release += 1;
                self.space.notify_all();
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            guard = self.ready.wait(guard).unwrap();
        }
    }

    /// Number of completed frames currently held out of order.
    pub fn held_len(&self) -> usize {
        self.inner.lock().unwrap().held.len()
    }

    /// No more inserts will arrive; wake the sink so it can drain and stop.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.closed = true;
        self.ready.notify_all();
    }

    /// Drop everything and unblock all waiters (cancellation path).
    pub fn abort(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.aborted = true;
        guard.held.clear();
        self.ready.notify_all();
        self.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn releases_in_index_order() {
        let buf = Arc::new(OrderingBuffer::new(64));
        let n = 100usize;

        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                // Insert shuffled within windows so completion order is
                // scrambled but never further apart than the capacity.
                for base in (0..n).step_by(4) {
                    for off in [3, 1, 0, 2] {
                        let i = base + off;
                        if i < n {
                            assert!(buf.insert(i, i));
                        }
                    }
                }
                buf.close();
            })
        };

        let mut seen = Vec::new();
        while let Some(v) = buf.pop_next() {
            seen.push(v);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn backpressure_bounds_held_frames() {
        let workers = 3usize;
        let cap = 4 * workers;
        let buf = Arc::new(OrderingBuffer::new(cap));

        // Frame 0 is missing, so nothing can be released: inserts 1..=cap
        // fill the held set to exactly the capacity.
        for i in 1..=cap {
            assert!(buf.insert(i, i));
        }
        assert_eq!(buf.held_len(), cap);

        // One more out-of-order insert must park instead of growing the set.
        let parked = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.insert(cap + 1, cap + 1))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(buf.held_len(), cap);

        // Start the sink, then release the cursor frame: it is never blocked
        // (held may briefly reach cap + 1), and draining unparks the waiter.
        let max_held = Arc::new(AtomicUsize::new(0));
        let consumer = {
            let buf = Arc::clone(&buf);
            let max_held = Arc::clone(&max_held);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = buf.pop_next() {
                    max_held.fetch_max(buf.held_len(), Ordering::Relaxed);
                    seen.push(v);
                }
                seen
            })
        };

        assert!(buf.insert(0, 0));
        assert!(parked.join().unwrap());
        buf.close();

        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..=cap + 1).collect::<Vec<_>>());
        assert!(max_held.load(Ordering::Relaxed) <= cap + 1);
    }

    #[test]
    fn abort_unblocks_everyone() {
        let buf: Arc<OrderingBuffer<usize>> = Arc::new(OrderingBuffer::new(2));
        buf.insert(1, 1);
        buf.insert(2, 2);

        let blocked = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.insert(3, 3))
        };
        let popper = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.pop_next())
        };

        buf.abort();
        assert!(!blocked.join().unwrap());
        assert_eq!(popper.join().unwrap(), None);
    }
}
