//! Typed publish/subscribe.
//!
//! [`Signal`] replaces callback registration. Emission snapshots the handler
//! list first, so a handler may subscribe or unsubscribe without
//! deadlocking, and handlers run in emission order on the emitting thread
//! (the main context).

use crate::identifier::DocumentUrl;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// Identifier returned by [`Signal::subscribe`].
pub type SubscriptionId = u64;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A list of event handlers.
pub struct Signal<E> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> Signal<E> {
    /// Create a signal with no subscribers.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler`. It stays registered until [`Signal::unsubscribe`].
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if `id` is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Deliver `event` to every handler registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}

impl<E: Clone + Send + 'static> Signal<E> {
    /// Forward every future event into a channel.
    ///
    /// The subscription removes itself once the receiver is dropped and the
    /// next event fails to send.
    pub fn subscribe_channel(self: &Arc<Self>) -> (SubscriptionId, mpsc::Receiver<E>) {
        let (sender, receiver) = mpsc::channel();
        let signal = Arc::downgrade(self);
        let id_slot = Arc::new(AtomicU64::new(0));
        let handler_slot = id_slot.clone();
        let id = self.subscribe(move |event: &E| {
            if sender.send(event.clone()).is_err() {
                if let Some(signal) = signal.upgrade() {
                    signal.unsubscribe(handler_slot.load(Ordering::Relaxed));
                }
            }
        });
        id_slot.store(id, Ordering::Relaxed);
        (id, receiver)
    }
}

impl<E> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Pixel rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Rectangle covering a whole image of `size`.
    pub fn from_size((width, height): (u32, u32)) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Intersection with an image of `size`, anchored inside it.
    pub fn clamped_to(self, (width, height): (u32, u32)) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    /// Whether the rectangle covers no pixel.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Events emitted by a [`Document`](crate::Document).
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// The header was sniffed.
    KindDetermined,
    /// Dimensions and EXIF data are known.
    MetaInfoLoaded,
    /// The full image is decoded.
    Loaded,
    /// Loading stopped with an error.
    LoadingFailed { error: String },
    /// The image was written to `url`.
    Saved { url: DocumentUrl },
    /// The modified flag flipped.
    Modified { is_modified: bool },
    /// A down-sampled image for `inverted_zoom` became available.
    DownSampledImageReady { inverted_zoom: u32 },
    /// Pixels inside `rect` changed.
    ImageRectUpdated { rect: Rect },
    /// Animation was detected.
    IsAnimatedUpdated,
}

/// Events emitted by a [`DocumentFactory`](crate::DocumentFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryEvent {
    /// The set of modified documents changed.
    ModifiedListChanged,
}
