use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Single-slot write coalescer.
///
/// Each [`Debouncer::schedule`] overwrites the pending item and restarts the
/// timer; when the timer runs out without a newer item, the pending item is
/// sent to the sink. Dropping the debouncer cancels whatever is pending.
/// Must be used from within a Tokio runtime.
pub struct Debouncer<T: Send + 'static> {
    delay: Duration,
    sink: mpsc::UnboundedSender<T>,
    slot: Arc<Mutex<Slot<T>>>,
}

struct Slot<T> {
    pending: Option<T>,
    // bumped on every schedule/cancel so a timer that already woke up can
    // tell it was superseded
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, sink: mpsc::UnboundedSender<T>) -> Self {
        Self {
            delay,
            sink,
            slot: Arc::new(Mutex::new(Slot {
                pending: None,
                epoch: 0,
                timer: None,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&self, item: T) {
        let mut slot = self.slot.lock();
        slot.pending = Some(item);
        slot.epoch += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        let epoch = slot.epoch;
        let shared = Arc::clone(&self.slot);
        let sink = self.sink.clone();
        let delay = self.delay;
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let item = {
                let mut slot = shared.lock();
                if slot.epoch != epoch {
                    return;
                }
                slot.timer = None;
                slot.pending.take()
            };
            if let Some(item) = item {
                let _ = sink.send(item);
            }
        }));
    }

    /// Removes the pending item without sending it.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        slot.epoch += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.pending.take()
    }

    /// Drops the pending item. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        self.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    /// Sends `item` to the sink immediately, bypassing the timer.
    pub fn send_now(&self, item: T) -> Result<(), T> {
        self.sink.send(item).map_err(|e| e.0)
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
