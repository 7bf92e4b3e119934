//! Fixed-size frame assembly over a pool of recycled sample buffers
//!
//! The real-time side fills frames from the [`FrameAssembler`] and never
//! allocates: a finished frame swaps places with a spare buffer from the pool.
//! The consumer gives buffers back through a [`FrameRecycler`]. When no spare
//! buffer is left the finished frame is discarded.

use crate::tracks::AudioFrame;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// Callback-side frame builder
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
    spare: Receiver<Vec<f32>>,
}

/// Hands sample buffers back to the pool
#[derive(Debug, Clone)]
pub struct FrameRecycler {
    frame_size: usize,
    spare: SyncSender<Vec<f32>>,
}

/// Build an assembler and its recycler with `spare_buffers` pooled buffers
pub fn frame_buffers(frame_size: usize, spare_buffers: usize) -> (FrameAssembler, FrameRecycler) {
    let frame_size = frame_size.max(1);
    let (tx, rx) = sync_channel(spare_buffers.max(1));
    for _ in 0..spare_buffers {
        if tx.try_send(Vec::with_capacity(frame_size)).is_err() {
            break;
        }
    }
    (
        FrameAssembler {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            spare: rx,
        },
        FrameRecycler {
            frame_size,
            spare: tx,
        },
    )
}

impl FrameAssembler {
    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Append one mono sample; true once a full frame is pending
    pub fn push(&mut self, sample: f32) -> bool {
        if self.pending.len() < self.frame_size {
            self.pending.push(sample);
        }
        self.pending.len() == self.frame_size
    }

    /// Samples collected so far
    pub fn pending_mut(&mut self) -> &mut [f32] {
        &mut self.pending
    }

    /// Take the pending frame out in its own buffer
    ///
    /// Returns `None` and discards the frame when the pool is empty.
    pub fn take_frame(&mut self) -> Option<Vec<f32>> {
        match self.spare.try_recv() {
            Ok(mut next) => {
                next.clear();
                std::mem::swap(&mut self.pending, &mut next);
                Some(next)
            }
            Err(_) => {
                self.pending.clear();
                None
            }
        }
    }
}

impl FrameRecycler {
    /// Return a buffer to the pool; dropped if the pool is already full
    pub fn recycle_samples(&self, mut samples: Vec<f32>) {
        samples.clear();
        if samples.capacity() < self.frame_size {
            samples.reserve_exact(self.frame_size);
        }
        let _ = self.spare.try_send(samples);
    }

    /// Return a delivered frame's buffer to the pool
    pub fn recycle(&self, frame: AudioFrame) {
        self.recycle_samples(frame.samples);
    }
}
