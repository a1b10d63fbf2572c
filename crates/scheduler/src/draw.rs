//! Coalescing draw loop
//!
//! Redraw requests arrive much faster than frames can be produced while the
//! user scrolls. The loop keeps a small bounded queue, drops offers when it
//! is full, and after each wake-up drains the queue so only the most recent
//! request is drawn.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Capacity of the redraw queue
pub const DRAW_QUEUE_CAPACITY: usize = 16;

/// How long the loop blocks waiting for a request before polling again
pub const DRAW_POLL_TIMEOUT: Duration = Duration::from_secs(1);

enum DrawMessage<R> {
    Draw(R),
    Stop,
}

/// Cloneable handle for offering redraw requests
pub struct DrawRequester<R> {
    sender: Sender<DrawMessage<R>>,
}

impl<R> Clone for DrawRequester<R> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<R> DrawRequester<R> {
    /// Offer a request; returns `false` when the queue is full or closed
    pub fn request(&self, request: R) -> bool {
        match self.sender.try_send(DrawMessage::Draw(request)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("draw queue full, request dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Dedicated drawing thread
pub struct DrawLoop<R> {
    requester: DrawRequester<R>,
    thread: Option<JoinHandle<u64>>,
}

impl<R: Send + 'static> DrawLoop<R> {
    /// Start the loop; `handler` is called once per drained batch
    pub fn spawn<F>(handler: F) -> io::Result<Self>
    where
        F: FnMut(R) + Send + 'static,
    {
        Self::with_poll_timeout(DRAW_POLL_TIMEOUT, handler)
    }

    pub fn with_poll_timeout<F>(timeout: Duration, mut handler: F) -> io::Result<Self>
    where
        F: FnMut(R) + Send + 'static,
    {
        let (sender, receiver) = bounded(DRAW_QUEUE_CAPACITY);
        let thread = thread::Builder::new()
            .name("docview-draw".to_string())
            .spawn(move || {
                let mut frames = 0u64;
                loop {
                    match take_latest(&receiver, timeout) {
                        Some(DrawMessage::Draw(request)) => {
                            handler(request);
                            frames += 1;
                        }
                        Some(DrawMessage::Stop) => break,
                        None => continue,
                    }
                }
                debug!(frames, "draw loop finished");
                frames
            })?;

        Ok(Self {
            requester: DrawRequester { sender },
            thread: Some(thread),
        })
    }

    /// Offer a request; returns `false` when the queue is full
    pub fn request(&self, request: R) -> bool {
        self.requester.request(request)
    }

    /// Handle that other components can use to request redraws
    pub fn requester(&self) -> DrawRequester<R> {
        self.requester.clone()
    }

    /// Stop the loop and wait for it, returning the number of frames drawn
    pub fn finish(mut self) -> u64 {
        self.stop()
    }
}

impl<R> DrawLoop<R> {
    fn stop(&mut self) -> u64 {
        let Some(thread) = self.thread.take() else {
            return 0;
        };
        // Blocking send: the stop marker must not be dropped on a full queue
        let _ = self.requester.sender.send(DrawMessage::Stop);
        match thread.join() {
            Ok(frames) => frames,
            Err(_) => {
                warn!("draw loop panicked");
                0
            }
        }
    }
}

impl<R> Drop for DrawLoop<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for one message, then drain to the most recent one
///
/// A stop marker anywhere in the drained batch wins.
fn take_latest<R>(receiver: &Receiver<DrawMessage<R>>, timeout: Duration) -> Option<DrawMessage<R>> {
    let mut latest = match receiver.recv_timeout(timeout) {
        Ok(message) => message,
        Err(RecvTimeoutError::Timeout) => return None,
        Err(RecvTimeoutError::Disconnected) => return Some(DrawMessage::Stop),
    };
    let mut dropped = 0usize;
    for message in receiver.try_iter() {
        if matches!(latest, DrawMessage::Stop) {
            break;
        }
        latest = message;
        dropped += 1;
    }
    if dropped > 0 {
        trace!(dropped, "coalesced redraw requests");
    }
    Some(latest)
}
