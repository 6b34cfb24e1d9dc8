// Per-track progress reporting: integer percentages on a dedicated channel.

use tokio::sync::mpsc;

/// Sending half of a track's progress channel.
pub type ProgressSender = mpsc::UnboundedSender<u8>;

/// Receiving half of a track's progress channel. Values are 0..=100 and
/// non-decreasing; the channel closes when the track fetch finishes,
/// successfully or not.
pub type ProgressReceiver = mpsc::UnboundedReceiver<u8>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Emits the rounded completion percentage after each fully appended media
/// segment. The denominator is the declared segment count; the synthetic
/// index segment lands after the final 100 without a further emission.
///
/// Sends never block, and a dropped receiver is ignored: progress is
/// advisory, the fetch result is authoritative.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: ProgressSender,
    completed: usize,
    total: usize,
}

impl ProgressReporter {
    pub fn new(tx: ProgressSender, total: usize) -> Self {
        Self {
            tx,
            completed: 0,
            total,
        }
    }

    /// Record one fully appended media segment and emit the new percentage.
    pub fn segment_done(&mut self) {
        self.completed += 1;
        let percent = ((self.completed as f64 / self.total as f64) * 100.0).round() as u8;
        let _ = self.tx.send(percent);
    }

    /// Emit the terminal 100 for tracks with no declared media segments;
    /// any track with at least one segment has already reported it.
    pub fn finish(&mut self) {
        if self.total == 0 {
            let _ = self.tx.send(100);
        }
    }
}
