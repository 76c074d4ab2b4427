//! Thumbnail loading pipeline.
//!
//! A [`ThumbnailLoadJob`] walks its queue one item at a time:
//!
//! 1. stat the origin (inline for local files, on the I/O thread otherwise)
//! 2. look up the on-disk cache by fingerprint and modification time
//! 3. on a miss, decode the origin on the job's decode thread (remote
//!    origins are first downloaded to a temporary file) and persist the
//!    result unless it is too small to be worth caching
//! 4. non-raster items go to the optional [`PreviewProvider`]
//!
//! Every outcome is reported as a [`ThumbnailEvent`] on the main context.
//! Once the queue drains the job emits [`ThumbnailEvent::Finished`], runs
//! its completion callback and releases its threads.

use crate::error::DocumentResult;
use crate::event::Signal;
use crate::io::{LocalFileIo, ResourceIo, ResourceStat};
use crate::job::{post_to, spawn_job_worker, DecodeJob};
use crate::identifier::DocumentUrl;
use imgview_cache::{Lookup, ThumbnailGroup, ThumbnailInfo, ThumbnailStore};
use imgview_render::{decode, sniff, DecodeTarget, DynamicImage, ResourceKind};
use imgview_scheduler::{CancellationToken, JobId, MainContext, Worker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

/// One entry of a thumbnail queue.
#[derive(Debug, Clone, PartialEq)]
pub struct FileItem {
    pub url: DocumentUrl,
    /// MIME type, if the caller already knows it.
    pub mime: Option<String>,
    /// Size in bytes, if the caller already knows it.
    pub size: Option<u64>,
}

impl FileItem {
    pub fn new(url: DocumentUrl) -> Self {
        Self {
            url,
            mime: None,
            size: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Outcome of one queue item, or the end of the queue.
#[derive(Debug, Clone)]
pub enum ThumbnailEvent {
    /// A thumbnail is available.
    Loaded {
        item: FileItem,
        image: Arc<DynamicImage>,
        /// Size of the origin image, orientation applied.
        original_size: (u32, u32),
    },
    /// No thumbnail could be produced.
    Failed { item: FileItem },
    /// The queue is empty and the job has stopped.
    Finished,
}

/// Produces previews for items that are not raster images (videos,
/// documents). Runs on the job's decode thread.
pub trait PreviewProvider: Send + Sync {
    /// Render a preview that fits a `pixel_size` square.
    fn preview(&self, item: &FileItem, pixel_size: u32) -> Result<DynamicImage, String>;
}

/// Source bytes for a thumbnail decode.
enum Source {
    Resource(DocumentUrl),
    Downloaded(NamedTempFile),
}

#[derive(Clone, Copy)]
enum WorkerKind {
    Decode,
    Io,
}

struct Current {
    item: FileItem,
    sequence: u64,
    stat: Option<ResourceStat>,
    sub_job: Option<(WorkerKind, JobId)>,
}

type Generated = Result<(DynamicImage, (u32, u32)), String>;

struct JobState {
    group: ThumbnailGroup,
    queue: VecDeque<FileItem>,
    current: Option<Current>,
    sequence: u64,
    finished: bool,
    keep_alive: Option<Arc<JobInner>>,
    on_finished: Option<Box<dyn FnOnce() + Send>>,
}

struct JobInner {
    context: MainContext,
    store: ThumbnailStore,
    io: Arc<dyn ResourceIo>,
    preview: Option<Arc<dyn PreviewProvider>>,
    decode_worker: Worker<DecodeJob>,
    io_worker: Worker<DecodeJob>,
    events: Arc<Signal<ThumbnailEvent>>,
    state: Mutex<JobState>,
    self_ref: Weak<JobInner>,
}

/// Queue of items to thumbnail, configured before [`ThumbnailLoadJob::start`].
pub struct ThumbnailLoadJob {
    items: VecDeque<FileItem>,
    group: ThumbnailGroup,
    store: ThumbnailStore,
    context: MainContext,
    io: Arc<dyn ResourceIo>,
    preview: Option<Arc<dyn PreviewProvider>>,
    events: Arc<Signal<ThumbnailEvent>>,
}

impl ThumbnailLoadJob {
    /// Create a job for `items`. Duplicates are dropped.
    pub fn new<I>(items: I, group: ThumbnailGroup, store: ThumbnailStore, context: MainContext) -> Self
    where
        I: IntoIterator<Item = FileItem>,
    {
        let mut job = Self {
            items: VecDeque::new(),
            group,
            store,
            context,
            io: Arc::new(LocalFileIo),
            preview: None,
            events: Arc::new(Signal::new()),
        };
        for item in items {
            job.append_item(item);
        }
        job
    }

    /// Use `io` to reach origins.
    pub fn with_io(mut self, io: Arc<dyn ResourceIo>) -> Self {
        self.io = io;
        self
    }

    /// Delegate non-raster items to `provider`.
    pub fn with_preview_provider(mut self, provider: Arc<dyn PreviewProvider>) -> Self {
        self.preview = Some(provider);
        self
    }

    /// Event signal. Subscribing before `start` sees every event.
    pub fn events(&self) -> &Arc<Signal<ThumbnailEvent>> {
        &self.events
    }

    /// Queue `item` unless it is already queued.
    pub fn append_item(&mut self, item: FileItem) -> bool {
        if self.items.iter().any(|queued| queued.url == item.url) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Drop queued items whose identifier is in `urls`.
    pub fn remove_items(&mut self, urls: &[DocumentUrl]) {
        self.items.retain(|item| !urls.contains(&item.url));
    }

    pub fn pending_items(&self) -> Vec<FileItem> {
        self.items.iter().cloned().collect()
    }

    pub fn set_group(&mut self, group: ThumbnailGroup) {
        self.group = group;
    }

    /// Hand the job over to the main context.
    ///
    /// The job keeps itself alive until its queue is empty, then emits
    /// [`ThumbnailEvent::Finished`], runs `on_finished` and shuts its threads
    /// down. The returned handle stays valid but becomes inert.
    ///
    /// # Errors
    /// Fails if a worker thread cannot be spawned.
    pub fn start<F>(self, on_finished: F) -> DocumentResult<ThumbnailJobHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let decode_worker = spawn_job_worker("imgview-thumbnail")?;
        let io_worker = spawn_job_worker("imgview-thumbnail-io")?;
        let events = self.events.clone();

        let inner = Arc::new_cyclic(|self_ref| JobInner {
            context: self.context,
            store: self.store,
            io: self.io,
            preview: self.preview,
            decode_worker,
            io_worker,
            events: self.events,
            state: Mutex::new(JobState {
                group: self.group,
                queue: self.items,
                current: None,
                sequence: 0,
                finished: false,
                keep_alive: None,
                on_finished: Some(Box::new(on_finished)),
            }),
            self_ref: self_ref.clone(),
        });
        inner.state.lock().keep_alive = Some(inner.clone());
        debug!(items = inner.state.lock().queue.len(), "thumbnail job started");
        inner.schedule_next();

        Ok(ThumbnailJobHandle {
            inner: Arc::downgrade(&inner),
            events,
        })
    }
}

impl fmt::Debug for ThumbnailLoadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailLoadJob")
            .field("items", &self.items.len())
            .field("group", &self.group)
            .finish()
    }
}

/// Handle to a running job. All methods are no-ops once the job finished.
#[derive(Clone)]
pub struct ThumbnailJobHandle {
    inner: Weak<JobInner>,
    events: Arc<Signal<ThumbnailEvent>>,
}

impl ThumbnailJobHandle {
    pub fn events(&self) -> &Arc<Signal<ThumbnailEvent>> {
        &self.events
    }

    /// `true` once the job emitted [`ThumbnailEvent::Finished`].
    pub fn is_finished(&self) -> bool {
        self.inner
            .upgrade()
            .map_or(true, |inner| inner.state.lock().finished)
    }

    /// Queue `item`. Returns `false` for duplicates and finished jobs.
    pub fn append_item(&self, item: FileItem) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.append_item(item))
    }

    /// Drop items from the queue. Removing the item in progress cancels its
    /// work and moves on without reporting it.
    pub fn remove_items(&self, urls: &[DocumentUrl]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_items(urls);
        }
    }

    /// Items not finished yet, the one in progress first.
    pub fn pending_items(&self) -> Vec<FileItem> {
        let Some(inner) = self.inner.upgrade() else {
            return Vec::new();
        };
        let state = inner.state.lock();
        state
            .current
            .iter()
            .map(|current| current.item.clone())
            .chain(state.queue.iter().cloned())
            .collect()
    }

    /// Size group for items processed from now on.
    pub fn set_group(&self, group: ThumbnailGroup) {
        if let Some(inner) = self.inner.upgrade() {
            inner.state.lock().group = group;
        }
    }
}

impl fmt::Debug for ThumbnailJobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailJobHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl JobInner {
    fn schedule_next(&self) {
        post_to(&self.context, self.self_ref.clone(), |job: &JobInner| job.next_item());
    }

    fn append_item(&self, item: FileItem) -> bool {
        let mut state = self.state.lock();
        let duplicate = state.queue.iter().any(|queued| queued.url == item.url)
            || state.current.as_ref().is_some_and(|current| current.item.url == item.url);
        if state.finished || duplicate {
            return false;
        }
        state.queue.push_back(item);
        true
    }

    fn remove_items(&self, urls: &[DocumentUrl]) {
        let removed_current = {
            let mut state = self.state.lock();
            state.queue.retain(|item| !urls.contains(&item.url));
            if state
                .current
                .as_ref()
                .is_some_and(|current| urls.contains(&current.item.url))
            {
                state.current.take()
            } else {
                None
            }
        };

        if let Some(current) = removed_current {
            debug!(url = %current.item.url, "current thumbnail item removed");
            match current.sub_job {
                Some((WorkerKind::Decode, id)) => {
                    self.decode_worker.cancel(id);
                }
                Some((WorkerKind::Io, id)) => {
                    self.io_worker.cancel(id);
                }
                None => {}
            }
            self.schedule_next();
        }
    }

    fn next_item(&self) {
        let next = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.current = None;
            match state.queue.pop_front() {
                Some(item) => {
                    state.sequence += 1;
                    let sequence = state.sequence;
                    state.current = Some(Current {
                        item: item.clone(),
                        sequence,
                        stat: None,
                        sub_job: None,
                    });
                    Ok((item, sequence))
                }
                None => {
                    state.finished = true;
                    Err((state.on_finished.take(), state.keep_alive.take()))
                }
            }
        };

        match next {
            Ok((item, sequence)) => self.process(item, sequence),
            Err((on_finished, keep_alive)) => {
                debug!("thumbnail job finished");
                self.events.emit(&ThumbnailEvent::Finished);
                if let Some(on_finished) = on_finished {
                    on_finished();
                }
                // Released here on the main context; the caller's upgraded
                // reference is the last one.
                drop(keep_alive);
            }
        }
    }

    fn process(&self, item: FileItem, sequence: u64) {
        trace!(url = %item.url, "processing thumbnail item");

        if let Some(path) = item.url.to_file_path().filter(|path| self.store.contains_path(path)) {
            self.load_direct(path, sequence);
            return;
        }

        if self.io.is_fast_local(&item.url) {
            let result = self.io.stat(&item.url).map_err(|err| err.to_string());
            self.on_stat(sequence, result);
            return;
        }

        let io = self.io.clone();
        let context = self.context.clone();
        let target = self.self_ref.clone();
        let url = item.url;
        self.submit(WorkerKind::Io, sequence, Box::new(move |_token: &CancellationToken| {
            let result = io.stat(&url).map_err(|err| err.to_string());
            post_to(&context, target, move |job: &JobInner| job.on_stat(sequence, result));
        }));
    }

    fn submit(&self, kind: WorkerKind, sequence: u64, job: DecodeJob) {
        let worker = match kind {
            WorkerKind::Decode => &self.decode_worker,
            WorkerKind::Io => &self.io_worker,
        };
        match worker.submit(job) {
            Ok(handle) => {
                let mut state = self.state.lock();
                if let Some(current) = state.current.as_mut().filter(|c| c.sequence == sequence) {
                    current.sub_job = Some((kind, handle.id()));
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot schedule thumbnail work");
                self.finish_item(sequence, Err(err.to_string()));
            }
        }
    }

    fn load_direct(&self, path: PathBuf, sequence: u64) {
        let store = self.store.clone();
        let context = self.context.clone();
        let target = self.self_ref.clone();
        self.submit(WorkerKind::Decode, sequence, Box::new(move |_token: &CancellationToken| {
            let result = store
                .load_direct(&path)
                .map(|image| {
                    let size = (image.width(), image.height());
                    (image, size)
                })
                .map_err(|err| err.to_string());
            post_to(&context, target, move |job: &JobInner| job.finish_item(sequence, result));
        }));
    }

    fn on_stat(&self, sequence: u64, result: Result<ResourceStat, String>) {
        let stat = match result {
            Ok(stat) if stat.exists && !stat.is_dir => stat,
            Ok(_) => return self.finish_item(sequence, Err("origin does not exist".to_string())),
            Err(message) => return self.finish_item(sequence, Err(message)),
        };

        let (item, group) = {
            let mut state = self.state.lock();
            let group = state.group;
            let Some(current) = state.current.as_mut().filter(|c| c.sequence == sequence) else {
                return;
            };
            current.stat = Some(stat);
            (current.item.clone(), group)
        };

        match self.store.lookup(group, item.url.key(), stat.modified) {
            Lookup::Hit(cached) => {
                trace!(url = %item.url, "thumbnail cache hit");
                let original_size = cached.info.image_size;
                self.finish_item(sequence, Ok((cached.image, original_size)));
            }
            Lookup::Stale | Lookup::Missing if item.url.is_local() => {
                let source = Source::Resource(item.url.clone());
                self.generate(sequence, item, stat, group, source);
            }
            Lookup::Stale | Lookup::Missing => self.download(sequence, item),
        }
    }

    fn download(&self, sequence: u64, item: FileItem) {
        let io = self.io.clone();
        let context = self.context.clone();
        let target = self.self_ref.clone();
        self.submit(WorkerKind::Io, sequence, Box::new(move |_token: &CancellationToken| {
            let result = NamedTempFile::new()
                .and_then(|temp| io.download(&item.url, temp.path()).map(|()| temp))
                .map_err(|err| err.to_string());
            post_to(&context, target, move |job: &JobInner| job.on_downloaded(sequence, result));
        }));
    }

    fn on_downloaded(&self, sequence: u64, result: Result<NamedTempFile, String>) {
        let temp = match result {
            Ok(temp) => temp,
            Err(message) => return self.finish_item(sequence, Err(message)),
        };
        let current = {
            let state = self.state.lock();
            let group = state.group;
            state
                .current
                .as_ref()
                .filter(|c| c.sequence == sequence)
                .map(|c| (c.item.clone(), c.stat.unwrap_or_default(), group))
        };
        if let Some((item, stat, group)) = current {
            self.generate(sequence, item, stat, group, Source::Downloaded(temp));
        }
    }

    fn generate(&self, sequence: u64, item: FileItem, stat: ResourceStat, group: ThumbnailGroup, source: Source) {
        let io = self.io.clone();
        let store = self.store.clone();
        let context = self.context.clone();
        let target = self.self_ref.clone();
        let pixel_size = group.pixel_size();

        self.submit(WorkerKind::Decode, sequence, Box::new(move |token: &CancellationToken| {
            let bytes = match &source {
                Source::Resource(url) => io.read(url),
                Source::Downloaded(temp) => fs::read(temp.path()),
            };
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(err) => {
                    let result = Err(err.to_string());
                    post_to(&context, target, move |job: &JobInner| job.finish_item(sequence, result));
                    return;
                }
            };

            let format = match sniff(&bytes) {
                Ok(sniffed) if sniffed.kind == ResourceKind::Raster => sniffed.format.map(|f| (f, sniffed.mime)),
                _ => None,
            };
            let Some((format, mime)) = format else {
                post_to(&context, target, move |job: &JobInner| job.on_not_raster(sequence));
                return;
            };
            if token.is_cancelled() {
                return;
            }

            let result = match decode(&bytes, format, DecodeTarget::Thumbnail(pixel_size)) {
                Ok(decoded) => {
                    if decoded.needs_persisting {
                        let info = ThumbnailInfo {
                            uri: item.url.key().to_string(),
                            mtime: stat.modified,
                            size: item.size.or(stat.exists.then_some(stat.size)),
                            mime: item.mime.clone().or_else(|| Some(mime.to_string())),
                            image_size: decoded.original_size,
                        };
                        if let Err(err) = store.store(group, &decoded.image, &info) {
                            warn!(url = %item.url, error = %err, "cannot persist thumbnail");
                        }
                    }
                    Ok((decoded.image, decoded.original_size))
                }
                Err(err) => Err(err.to_string()),
            };
            // Drops the downloaded copy, if any.
            drop(source);
            post_to(&context, target, move |job: &JobInner| job.finish_item(sequence, result));
        }));
    }

    fn on_not_raster(&self, sequence: u64) {
        let Some(provider) = self.preview.clone() else {
            return self.finish_item(sequence, Err("no preview available".to_string()));
        };
        let item = {
            let state = self.state.lock();
            let group = state.group;
            state
                .current
                .as_ref()
                .filter(|c| c.sequence == sequence)
                .map(|c| (c.item.clone(), group))
        };
        let Some((item, group)) = item else {
            return;
        };

        let context = self.context.clone();
        let target = self.self_ref.clone();
        self.submit(WorkerKind::Decode, sequence, Box::new(move |_token: &CancellationToken| {
            let result = provider.preview(&item, group.pixel_size()).map(|image| {
                let size = (image.width(), image.height());
                (image, size)
            });
            post_to(&context, target, move |job: &JobInner| job.finish_item(sequence, result));
        }));
    }

    /// Report the outcome of the current item and move on.
    fn finish_item(&self, sequence: u64, result: Generated) {
        let item = {
            let mut state = self.state.lock();
            match state.current.as_mut().filter(|c| c.sequence == sequence) {
                Some(current) => {
                    current.sub_job = None;
                    current.item.clone()
                }
                None => return,
            }
        };

        let event = match result {
            Ok((image, original_size)) => ThumbnailEvent::Loaded {
                item,
                image: Arc::new(image),
                original_size,
            },
            Err(message) => {
                debug!(url = %item.url, error = %message, "thumbnail failed");
                ThumbnailEvent::Failed { item }
            }
        };
        self.events.emit(&event);
        self.schedule_next();
    }
}
