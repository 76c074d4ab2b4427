//! Image documents with staged asynchronous loading.
//!
//! A document moves through [`LoadingState::Loading`],
//! [`LoadingState::KindDetermined`], [`LoadingState::MetaInfoLoaded`] and
//! [`LoadingState::Loaded`], or stops in [`LoadingState::LoadingFailed`].
//! Header sniffing, metadata probing and decoding run on the factory's
//! decode worker; every state change happens in a task posted to the main
//! context, and every event is emitted from there.
//!
//! Results of jobs dispatched before a [`Document::reload`] carry an older
//! generation number and are dropped.

use crate::editor::DocumentEditor;
use crate::error::{DocumentError, DocumentResult};
use crate::event::{DocumentEvent, Rect, Signal};
use crate::job::{post_to, DecodeJob, Services};
use crate::undo::{ImageOperation, UndoStack};
use crate::identifier::DocumentUrl;
use image::imageops::FilterType;
use imgview_render::{
    decode_frames, decode_with_metadata, encode, is_animated, output_format, probe, reduced_size,
    set_jpeg_orientation, sniff, AnimationFrame, DecodeTarget, DynamicImage, FormatCapabilities,
    ImageFormat, ImageMetadata, MetaEntry, Orientation, ResourceKind, SniffedFormat,
};
use imgview_scheduler::{is_worker_thread, CancellationToken, FrameTimer};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Zoom levels at or above this use the full image.
pub const MAX_DOWN_SAMPLED_ZOOM: f64 = 0.5;

/// Largest inverted zoom bucket.
const MAX_INVERTED_ZOOM: u32 = 1 << 16;

/// Down-sample bucket for `zoom`: the smallest power of two `n` with
/// `zoom >= 1 / (2n)`.
pub fn inverted_zoom_for(zoom: f64) -> u32 {
    let mut inverted = 1u32;
    while inverted < MAX_INVERTED_ZOOM && zoom < 1.0 / (f64::from(inverted) * 2.0) {
        inverted *= 2;
    }
    inverted
}

/// Loading progress of a document. Ordered by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadingState {
    Loading,
    KindDetermined,
    MetaInfoLoaded,
    Loaded,
    LoadingFailed,
}

impl LoadingState {
    /// `true` for `Loaded` and `LoadingFailed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadingState::Loaded | LoadingState::LoadingFailed)
    }
}

/// Output of the full decode job.
struct FullDecode {
    image: DynamicImage,
    frames: Vec<AnimationFrame>,
}

/// Parameters of a scheduled down-sample decode.
struct DownSampleRequest {
    generation: u64,
    epoch: u64,
    inverted_zoom: u32,
    bytes: Arc<Vec<u8>>,
    format: ImageFormat,
    metadata: ImageMetadata,
}

enum DownSampleStep {
    Ready,
    Wait,
    FullLoad,
    Decode(DownSampleRequest),
}

struct Inner {
    loading_state: LoadingState,
    /// Bumped on every (re)load; stale job results are dropped.
    generation: u64,
    /// Bumped on every edit; stale down-sample results are dropped.
    epoch: u64,
    kind: Option<ResourceKind>,
    format: Option<ImageFormat>,
    mime: Option<&'static str>,
    byte_size: Option<u64>,
    metadata: Option<ImageMetadata>,
    raw: Option<Arc<Vec<u8>>>,
    keep_raw_data: bool,
    /// Undo index whose state the raw bytes encode.
    raw_baseline: Option<usize>,
    /// Orientation tag of the raw bytes.
    raw_orientation: Orientation,
    image: Option<Arc<DynamicImage>>,
    down_sampled: HashMap<u32, Arc<DynamicImage>>,
    down_sample_in_flight: HashSet<u32>,
    pending_down_samples: HashSet<u32>,
    full_load_requested: bool,
    full_load_in_flight: bool,
    undo: UndoStack,
    error: Option<String>,
    animated: bool,
    frames: Vec<(Arc<DynamicImage>, Duration)>,
    current_frame: usize,
    timer: Option<FrameTimer>,
}

impl Inner {
    fn new() -> Self {
        Self {
            loading_state: LoadingState::Loading,
            generation: 0,
            epoch: 0,
            kind: None,
            format: None,
            mime: None,
            byte_size: None,
            metadata: None,
            raw: None,
            keep_raw_data: false,
            raw_baseline: None,
            raw_orientation: Orientation::Normal,
            image: None,
            down_sampled: HashMap::new(),
            down_sample_in_flight: HashSet::new(),
            pending_down_samples: HashSet::new(),
            full_load_requested: false,
            full_load_in_flight: false,
            undo: UndoStack::new(),
            error: None,
            animated: false,
            frames: Vec::new(),
            current_frame: 0,
            timer: None,
        }
    }

    /// Forget everything loaded. The generation and the raw-data policy
    /// survive.
    fn reset(&mut self) {
        let generation = self.generation;
        let epoch = self.epoch + 1;
        let keep_raw_data = self.keep_raw_data;
        *self = Self::new();
        self.generation = generation;
        self.epoch = epoch;
        self.keep_raw_data = keep_raw_data;
    }

    fn capabilities(&self) -> FormatCapabilities {
        self.format.map(FormatCapabilities::of).unwrap_or_default()
    }

    fn size(&self) -> Option<(u32, u32)> {
        match &self.image {
            Some(image) => Some((image.width(), image.height())),
            None => self.metadata.as_ref().map(ImageMetadata::display_size),
        }
    }

    fn is_editable(&self) -> bool {
        self.loading_state == LoadingState::Loaded
            && self.kind == Some(ResourceKind::Raster)
            && self.image.is_some()
            && !self.animated
            && self.capabilities().writable
    }

    fn is_busy(&self) -> bool {
        !self.loading_state.is_terminal()
            || self.full_load_in_flight
            || !self.down_sample_in_flight.is_empty()
    }

    fn release_raw_if_unneeded(&mut self) {
        if !self.keep_raw_data
            && !self.capabilities().lossless_orientation
            && self.kind == Some(ResourceKind::Raster)
        {
            self.raw = None;
            self.raw_baseline = None;
        }
    }

    /// Build the down-sample for `inverted_zoom` from the full image.
    fn synthesize(&mut self, inverted_zoom: u32) -> bool {
        let Some(image) = self.image.clone() else {
            return false;
        };
        let scaled = match reduced_size((image.width(), image.height()), inverted_zoom) {
            Some((width, height)) => Arc::new(image.resize_exact(width, height, FilterType::Triangle)),
            None => image,
        };
        self.down_sampled.insert(inverted_zoom, scaled);
        true
    }

    /// Bookkeeping after the image changed through the undo stack.
    fn after_edit(&mut self, was_modified: bool) -> Vec<DocumentEvent> {
        self.down_sampled.clear();
        self.epoch += 1;

        let mut events = Vec::new();
        if let Some(size) = self.size() {
            events.push(DocumentEvent::ImageRectUpdated {
                rect: Rect::from_size(size),
            });
        }
        let is_modified = !self.undo.is_clean();
        if is_modified != was_modified {
            events.push(DocumentEvent::Modified { is_modified });
        }
        events
    }

    /// Raw bytes and target orientation for a lossless JPEG save.
    fn lossless_jpeg(&self, output: ImageFormat) -> Option<(Arc<Vec<u8>>, Orientation)> {
        if output != ImageFormat::Jpeg || self.format != Some(ImageFormat::Jpeg) {
            return None;
        }
        let raw = self.raw.clone()?;
        let change = self.undo.orientation_since(self.raw_baseline?)?;
        Some((raw, self.raw_orientation.then(change)))
    }

    fn memory_usage(&self) -> usize {
        let image = self.image.as_ref().map_or(0, |image| image.as_bytes().len());
        let down_sampled: usize = self
            .down_sampled
            .values()
            .filter(|scaled| !self.image.as_ref().is_some_and(|image| Arc::ptr_eq(image, scaled)))
            .map(|scaled| scaled.as_bytes().len())
            .sum();
        let frames: usize = self.frames.iter().map(|(frame, _)| frame.as_bytes().len()).sum();
        let raw = self.raw.as_ref().map_or(0, |raw| raw.len());
        image + down_sampled + frames + raw
    }
}

/// An image resource, shared as `Arc<Document>`.
///
/// Created and cached by [`DocumentFactory`](crate::DocumentFactory). All
/// methods are meant to be called from the thread that pumps the factory's
/// [`MainContext`](imgview_scheduler::MainContext).
pub struct Document {
    url: DocumentUrl,
    services: Arc<Services>,
    inner: Mutex<Inner>,
    events: Arc<Signal<DocumentEvent>>,
    self_ref: Weak<Document>,
}

impl Document {
    pub(crate) fn new(url: DocumentUrl, services: Arc<Services>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            url,
            services,
            inner: Mutex::new(Inner::new()),
            events: Arc::new(Signal::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Identifier of the document.
    pub fn url(&self) -> &DocumentUrl {
        &self.url
    }

    /// Event signal of this document.
    pub fn events(&self) -> &Arc<Signal<DocumentEvent>> {
        &self.events
    }

    pub fn loading_state(&self) -> LoadingState {
        self.inner.lock().loading_state
    }

    /// Resource kind, once determined.
    pub fn kind(&self) -> Option<ResourceKind> {
        self.inner.lock().kind
    }

    /// Raster format, once determined.
    pub fn format(&self) -> Option<ImageFormat> {
        self.inner.lock().format
    }

    /// MIME type, once determined.
    pub fn mime_type(&self) -> Option<&'static str> {
        self.inner.lock().mime
    }

    /// Displayed size: orientation applied, edits included.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.inner.lock().size()
    }

    pub fn width(&self) -> u32 {
        self.size().map_or(0, |(width, _)| width)
    }

    pub fn height(&self) -> u32 {
        self.size().map_or(0, |(_, height)| height)
    }

    /// Size of the resource in bytes.
    pub fn byte_size(&self) -> Option<u64> {
        self.inner.lock().byte_size
    }

    pub fn has_alpha_channel(&self) -> bool {
        self.inner
            .lock()
            .image
            .as_ref()
            .is_some_and(|image| image.color().has_alpha())
    }

    /// Last loading or saving error.
    pub fn error_string(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// Full image, once loaded.
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        self.inner.lock().image.clone()
    }

    /// Compressed bytes, while retained.
    pub fn raw_data(&self) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().raw.clone()
    }

    pub fn keep_raw_data(&self) -> bool {
        self.inner.lock().keep_raw_data
    }

    /// Retain the compressed bytes after loading. JPEG bytes are always
    /// retained for lossless orientation changes.
    pub fn set_keep_raw_data(&self, keep: bool) {
        let mut inner = self.inner.lock();
        inner.keep_raw_data = keep;
        if !keep && inner.loading_state == LoadingState::Loaded {
            inner.release_raw_if_unneeded();
        }
    }

    /// Bytes held by decoded pixels and retained data.
    pub fn memory_usage(&self) -> usize {
        self.inner.lock().memory_usage()
    }

    /// Key/value metadata: `General.*` entries followed by EXIF fields.
    pub fn meta_info(&self) -> Vec<MetaEntry> {
        let inner = self.inner.lock();
        let mut entries = vec![MetaEntry::new("General.Name", "Name", self.url.file_name())];
        if let Some(bytes) = inner.byte_size {
            entries.push(MetaEntry::new("General.Size", "File Size", format_byte_size(bytes)));
        }
        if let Some(mime) = inner.mime {
            entries.push(MetaEntry::new("General.MimeType", "File Type", mime));
        }
        if let Some((width, height)) = inner.size() {
            entries.push(MetaEntry::new(
                "General.ImageSize",
                "Image Size",
                format!("{width}x{height}"),
            ));
        }
        if let Some(metadata) = &inner.metadata {
            entries.extend(metadata.entries.iter().cloned());
        }
        entries
    }

    pub fn is_modified(&self) -> bool {
        !self.inner.lock().undo.is_clean()
    }

    pub fn is_editable(&self) -> bool {
        self.inner.lock().is_editable()
    }

    /// `true` while a load or decode job is outstanding.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().is_busy()
    }

    /// Editing interface, only for loaded, still, writable raster images.
    pub fn editor(&self) -> Option<DocumentEditor> {
        if !self.is_editable() {
            return None;
        }
        self.self_ref.upgrade().map(DocumentEditor::new)
    }

    fn emit_all(&self, events: Vec<DocumentEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    // Loading

    pub(crate) fn start_loading(&self) {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.generation
        };
        debug!(url = %self.url, generation, "loading document");

        let io = self.services.io.clone();
        let context = self.services.context.clone();
        let target = self.self_ref.clone();
        let url = self.url.clone();
        let job: DecodeJob = Box::new(move |token: &CancellationToken| {
            let bytes = match io.read(&url) {
                Ok(bytes) => bytes,
                Err(err) => {
                    let message = format!("cannot read {url}: {err}");
                    post_to(&context, target, move |doc: &Document| doc.fail(generation, message));
                    return;
                }
            };
            let sniffed = match sniff(&bytes) {
                Ok(sniffed) => sniffed,
                Err(err) => {
                    let message = err.to_string();
                    post_to(&context, target, move |doc: &Document| doc.fail(generation, message));
                    return;
                }
            };

            let bytes = Arc::new(bytes);
            let kind_bytes = bytes.clone();
            post_to(&context, target.clone(), move |doc: &Document| {
                doc.on_kind_determined(generation, sniffed, kind_bytes)
            });

            let Some(format) = sniffed.format else {
                return;
            };
            if token.is_cancelled() {
                return;
            }
            let probed = probe(&bytes, format)
                .map(|metadata| (metadata, is_animated(&bytes, format)))
                .map_err(|err| err.to_string());
            post_to(&context, target, move |doc: &Document| {
                doc.on_meta_info_loaded(generation, probed)
            });
        });

        if let Err(err) = self.services.worker.submit(job) {
            self.fail(generation, err.to_string());
        }
    }

    fn fail(&self, generation: u64, message: String) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.loading_state.is_terminal() {
                return;
            }
            inner.loading_state = LoadingState::LoadingFailed;
            inner.error = Some(message.clone());
            inner.full_load_requested = false;
            inner.full_load_in_flight = false;
            inner.pending_down_samples.clear();
            inner.raw = None;
        }
        warn!(url = %self.url, error = %message, "loading failed");
        self.events.emit(&DocumentEvent::LoadingFailed { error: message });
    }

    fn on_kind_determined(&self, generation: u64, sniffed: SniffedFormat, bytes: Arc<Vec<u8>>) {
        let mut events = vec![DocumentEvent::KindDetermined];
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.loading_state != LoadingState::Loading {
                return;
            }
            inner.loading_state = LoadingState::KindDetermined;
            inner.kind = Some(sniffed.kind);
            inner.format = sniffed.format;
            inner.mime = Some(sniffed.mime);
            inner.byte_size = Some(bytes.len() as u64);
            inner.raw = Some(bytes);

            if sniffed.kind == ResourceKind::Vector {
                // Rendered by an external collaborator from the raw data.
                inner.loading_state = LoadingState::Loaded;
                inner.full_load_requested = false;
                events.push(DocumentEvent::MetaInfoLoaded);
                events.push(DocumentEvent::Loaded);
            }
        }
        debug!(url = %self.url, kind = sniffed.kind.as_str(), mime = sniffed.mime, "kind determined");
        self.emit_all(events);
    }

    fn on_meta_info_loaded(&self, generation: u64, result: Result<(ImageMetadata, bool), String>) {
        let (metadata, animated) = match result {
            Ok(probed) => probed,
            Err(message) => return self.fail(generation, message),
        };

        let (full_load, pending) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.loading_state != LoadingState::KindDetermined {
                return;
            }
            inner.loading_state = LoadingState::MetaInfoLoaded;
            inner.raw_orientation = metadata.orientation;
            inner.raw_baseline = Some(inner.undo.index());
            inner.metadata = Some(metadata);
            inner.animated = animated;
            let pending: Vec<u32> = inner.pending_down_samples.drain().collect();
            (inner.full_load_requested, pending)
        };

        debug!(url = %self.url, size = ?self.size(), animated, "meta info loaded");
        self.events.emit(&DocumentEvent::MetaInfoLoaded);
        if animated {
            self.events.emit(&DocumentEvent::IsAnimatedUpdated);
        }
        if full_load {
            self.dispatch_full_decode();
        }
        for inverted_zoom in pending {
            self.request_down_sample(inverted_zoom);
        }
    }

    /// Start decoding the full image. Idempotent; a request made before the
    /// metadata is known is remembered.
    pub fn load_full_image(&self) {
        let dispatch = {
            let mut inner = self.inner.lock();
            match inner.loading_state {
                LoadingState::Loaded | LoadingState::LoadingFailed => false,
                LoadingState::Loading | LoadingState::KindDetermined => {
                    inner.full_load_requested = true;
                    false
                }
                LoadingState::MetaInfoLoaded => !inner.full_load_in_flight,
            }
        };
        if dispatch {
            self.dispatch_full_decode();
        }
    }

    fn dispatch_full_decode(&self) {
        let (generation, bytes, format, metadata, animated) = {
            let mut inner = self.inner.lock();
            if inner.loading_state != LoadingState::MetaInfoLoaded || inner.full_load_in_flight {
                return;
            }
            let (Some(bytes), Some(format), Some(metadata)) =
                (inner.raw.clone(), inner.format, inner.metadata.clone())
            else {
                return;
            };
            inner.full_load_in_flight = true;
            inner.full_load_requested = false;
            (inner.generation, bytes, format, metadata, inner.animated)
        };

        let context = self.services.context.clone();
        let target = self.self_ref.clone();
        let job: DecodeJob = Box::new(move |_token: &CancellationToken| {
            let result = decode_with_metadata(&bytes, format, &metadata, DecodeTarget::Full)
                .map(|decoded| {
                    let frames = if animated {
                        decode_frames(&bytes, format).unwrap_or_else(|err| {
                            warn!(error = %err, "animation frames unreadable, showing still image");
                            Vec::new()
                        })
                    } else {
                        Vec::new()
                    };
                    FullDecode {
                        image: decoded.image,
                        frames,
                    }
                })
                .map_err(|err| err.to_string());
            post_to(&context, target, move |doc: &Document| {
                doc.on_full_image_loaded(generation, result)
            });
        });

        if let Err(err) = self.services.worker.submit(job) {
            self.fail(generation, err.to_string());
        }
    }

    fn on_full_image_loaded(&self, generation: u64, result: Result<FullDecode, String>) {
        let decoded = match result {
            Ok(decoded) => decoded,
            Err(message) => return self.fail(generation, message),
        };

        let events = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.generation != generation || inner.loading_state != LoadingState::MetaInfoLoaded {
                return;
            }
            inner.full_load_in_flight = false;
            inner.image = Some(Arc::new(decoded.image));
            inner.frames = decoded
                .frames
                .into_iter()
                .map(|frame| (Arc::new(frame.image), frame.delay))
                .collect();
            inner.current_frame = 0;
            inner.loading_state = LoadingState::Loaded;
            inner.release_raw_if_unneeded();

            let mut events = vec![DocumentEvent::Loaded];
            if inner.frames.len() > 1 && !inner.animated {
                inner.animated = true;
                events.push(DocumentEvent::IsAnimatedUpdated);
            } else if inner.animated && inner.frames.len() < 2 {
                inner.animated = false;
                events.push(DocumentEvent::IsAnimatedUpdated);
            }
            let pending: Vec<u32> = inner.pending_down_samples.drain().collect();
            for inverted_zoom in pending {
                if inner.synthesize(inverted_zoom) {
                    events.push(DocumentEvent::DownSampledImageReady { inverted_zoom });
                }
            }
            events
        };

        info!(url = %self.url, size = ?self.size(), "document loaded");
        self.emit_all(events);
    }

    /// Pump the main context until the document is `Loaded` or failed.
    ///
    /// Starts the full decode if needed. Returns `true` when loaded. Refuses
    /// to block on a worker thread, which would deadlock.
    pub fn wait_until_loaded(&self) -> bool {
        if is_worker_thread() {
            warn!(url = %self.url, "wait_until_loaded called on a worker thread");
            return self.loading_state() == LoadingState::Loaded;
        }
        self.load_full_image();
        self.services.context.process_until(
            || self.loading_state().is_terminal(),
            self.services.config.load_timeout,
        );
        self.loading_state() == LoadingState::Loaded
    }

    /// Reload from the resource. Refused when there are unsaved edits.
    pub fn reload(&self) -> DocumentResult<()> {
        if self.is_modified() {
            return Err(DocumentError::UnsavedChanges(self.url.to_string()));
        }
        self.restart_loading();
        Ok(())
    }

    /// Reload, asking `confirm` before discarding unsaved edits.
    pub fn reload_with_confirmation<F>(&self, confirm: F) -> DocumentResult<()>
    where
        F: FnOnce(&DocumentUrl) -> bool,
    {
        if self.is_modified() && !confirm(&self.url) {
            return Err(DocumentError::UnsavedChanges(self.url.to_string()));
        }
        self.restart_loading();
        Ok(())
    }

    fn restart_loading(&self) {
        self.stop_animation();
        let was_modified = {
            let mut inner = self.inner.lock();
            let was_modified = !inner.undo.is_clean();
            inner.reset();
            was_modified
        };
        if was_modified {
            self.events.emit(&DocumentEvent::Modified { is_modified: false });
        }
        self.start_loading();
    }

    // Down-sampling

    /// Make a down-sampled image for `zoom` available.
    ///
    /// Returns `true` when one is ready now. Otherwise generation is
    /// scheduled and [`DocumentEvent::DownSampledImageReady`] follows.
    pub fn prepare_down_sampled_image_for_zoom(&self, zoom: f64) -> bool {
        if zoom >= MAX_DOWN_SAMPLED_ZOOM {
            self.load_full_image();
            return self.inner.lock().image.is_some();
        }
        self.request_down_sample(inverted_zoom_for(zoom))
    }

    /// Image prepared for `zoom`, or `None` until
    /// [`Self::prepare_down_sampled_image_for_zoom`] has made it ready.
    /// Never blocks.
    pub fn down_sampled_image_for_zoom(&self, zoom: f64) -> Option<Arc<DynamicImage>> {
        let inner = self.inner.lock();
        if zoom >= MAX_DOWN_SAMPLED_ZOOM {
            return inner.image.clone();
        }
        inner.down_sampled.get(&inverted_zoom_for(zoom)).cloned()
    }

    fn request_down_sample(&self, inverted_zoom: u32) -> bool {
        let step = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.down_sampled.contains_key(&inverted_zoom) {
                DownSampleStep::Ready
            } else {
                match inner.loading_state {
                    LoadingState::Loaded => {
                        if inner.synthesize(inverted_zoom) {
                            DownSampleStep::Ready
                        } else {
                            DownSampleStep::Wait
                        }
                    }
                    LoadingState::LoadingFailed => DownSampleStep::Wait,
                    LoadingState::Loading | LoadingState::KindDetermined => {
                        inner.pending_down_samples.insert(inverted_zoom);
                        DownSampleStep::Wait
                    }
                    LoadingState::MetaInfoLoaded => {
                        if inner.down_sample_in_flight.contains(&inverted_zoom) {
                            DownSampleStep::Wait
                        } else {
                            let scalable = inner.capabilities().scaled_decode && !inner.animated;
                            let fits = inner
                                .metadata
                                .as_ref()
                                .is_some_and(|m| reduced_size(m.stored_size, inverted_zoom).is_some());
                            match (scalable && fits, inner.raw.clone(), inner.format, inner.metadata.clone()) {
                                (true, Some(bytes), Some(format), Some(metadata)) => {
                                    inner.down_sample_in_flight.insert(inverted_zoom);
                                    DownSampleStep::Decode(DownSampleRequest {
                                        generation: inner.generation,
                                        epoch: inner.epoch,
                                        inverted_zoom,
                                        bytes,
                                        format,
                                        metadata,
                                    })
                                }
                                _ => {
                                    inner.pending_down_samples.insert(inverted_zoom);
                                    DownSampleStep::FullLoad
                                }
                            }
                        }
                    }
                }
            }
        };

        match step {
            DownSampleStep::Ready => true,
            DownSampleStep::Wait => false,
            DownSampleStep::FullLoad => {
                self.load_full_image();
                false
            }
            DownSampleStep::Decode(request) => {
                self.dispatch_down_sample(request);
                false
            }
        }
    }

    fn dispatch_down_sample(&self, request: DownSampleRequest) {
        let DownSampleRequest {
            generation,
            epoch,
            inverted_zoom,
            bytes,
            format,
            metadata,
        } = request;
        let context = self.services.context.clone();
        let target = self.self_ref.clone();
        let job: DecodeJob = Box::new(move |_token: &CancellationToken| {
            let result =
                decode_with_metadata(&bytes, format, &metadata, DecodeTarget::Reduced(inverted_zoom))
                    .map(|decoded| decoded.image)
                    .map_err(|err| err.to_string());
            post_to(&context, target, move |doc: &Document| {
                doc.on_down_sampled(generation, epoch, inverted_zoom, result)
            });
        });

        if let Err(err) = self.services.worker.submit(job) {
            warn!(url = %self.url, error = %err, "cannot schedule down-sampling");
            self.inner.lock().down_sample_in_flight.remove(&inverted_zoom);
        }
    }

    fn on_down_sampled(
        &self,
        generation: u64,
        epoch: u64,
        inverted_zoom: u32,
        result: Result<DynamicImage, String>,
    ) {
        let fall_back = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.down_sample_in_flight.remove(&inverted_zoom);
            if inner.epoch != epoch {
                return;
            }
            match result {
                Ok(image) => {
                    inner.down_sampled.insert(inverted_zoom, Arc::new(image));
                    false
                }
                Err(message) => {
                    warn!(url = %self.url, inverted_zoom, error = %message, "down-sampling failed, loading full image");
                    inner.pending_down_samples.insert(inverted_zoom);
                    true
                }
            }
        };

        if fall_back {
            self.load_full_image();
        } else {
            debug!(url = %self.url, inverted_zoom, "down-sampled image ready");
            self.events
                .emit(&DocumentEvent::DownSampledImageReady { inverted_zoom });
        }
    }

    // Editing

    /// Apply `operation` and record it on the undo stack.
    pub fn push_operation(&self, mut operation: Box<dyn ImageOperation>) -> DocumentResult<()> {
        let events = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if !inner.is_editable() {
                return Err(DocumentError::NotEditable);
            }
            let was_modified = !inner.undo.is_clean();
            let image = inner.image.as_mut().ok_or(DocumentError::NotLoaded)?;
            operation.redo(Arc::make_mut(image));
            debug!(url = %self.url, operation = %operation.text(), "operation applied");

            if inner.raw_baseline.is_some_and(|baseline| baseline > inner.undo.index()) {
                inner.raw_baseline = None;
            }
            inner.undo.push(operation);
            inner.after_edit(was_modified)
        };
        self.emit_all(events);
        Ok(())
    }

    /// Revert the last applied operation.
    pub fn undo(&self) -> DocumentResult<()> {
        let events = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let was_modified = !inner.undo.is_clean();
            let image = inner.image.as_mut().ok_or(DocumentError::NotLoaded)?;
            let entry = inner.undo.undo_entry().ok_or(DocumentError::NothingTo("undo"))?;
            entry.undo(Arc::make_mut(image));
            inner.after_edit(was_modified)
        };
        self.emit_all(events);
        Ok(())
    }

    /// Reapply the last reverted operation.
    pub fn redo(&self) -> DocumentResult<()> {
        let events = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let was_modified = !inner.undo.is_clean();
            let image = inner.image.as_mut().ok_or(DocumentError::NotLoaded)?;
            let entry = inner.undo.redo_entry().ok_or(DocumentError::NothingTo("redo"))?;
            entry.redo(Arc::make_mut(image));
            inner.after_edit(was_modified)
        };
        self.emit_all(events);
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.inner.lock().undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.lock().undo.can_redo()
    }

    pub fn undo_text(&self) -> Option<String> {
        self.inner.lock().undo.undo_text()
    }

    pub fn redo_text(&self) -> Option<String> {
        self.inner.lock().undo.redo_text()
    }

    // Saving

    /// Write the current image to `url`.
    ///
    /// `format` names the output format; when `None` it is guessed from the
    /// extension of `url`. JPEG to JPEG saves whose edits are only rotations
    /// and flips keep the compressed data and rewrite the EXIF orientation.
    /// The document keeps its own identifier.
    pub fn save(&self, url: &DocumentUrl, format: Option<&str>) -> DocumentResult<()> {
        if !self.wait_until_loaded() {
            return Err(match self.error_string() {
                Some(error) => DocumentError::LoadingFailed(error),
                None => DocumentError::NotLoaded,
            });
        }
        let output = output_format(format, &url.path())?;

        let (image, lossless, raw_orientation) = {
            let inner = self.inner.lock();
            let image = inner.image.clone().ok_or(DocumentError::NotEditable)?;
            (image, inner.lossless_jpeg(output), inner.raw_orientation)
        };

        let lossless_save = lossless.is_some();
        let (bytes, saved_orientation) = match lossless {
            Some((raw, orientation)) if orientation == raw_orientation => ((*raw).clone(), orientation),
            Some((raw, orientation)) => (set_jpeg_orientation(&raw, orientation)?, orientation),
            None => (
                encode(&image, output, self.services.config.jpeg_quality)?,
                Orientation::Normal,
            ),
        };

        if let Err(err) = self.services.io.write(url, &bytes) {
            let message = format!("cannot write {url}: {err}");
            warn!(error = %message, "save failed");
            self.inner.lock().error = Some(message);
            return Err(DocumentError::Io(err));
        }

        let events = {
            let mut inner = self.inner.lock();
            let was_modified = !inner.undo.is_clean();
            inner.undo.set_clean();
            inner.error = None;
            if url == &self.url {
                if Some(output) == inner.format {
                    inner.byte_size = Some(bytes.len() as u64);
                    inner.raw = Some(Arc::new(bytes));
                    inner.raw_baseline = Some(inner.undo.index());
                    inner.raw_orientation = saved_orientation;
                    inner.release_raw_if_unneeded();
                } else {
                    inner.raw = None;
                    inner.raw_baseline = None;
                }
            }
            let mut events = vec![DocumentEvent::Saved { url: url.clone() }];
            if was_modified {
                events.push(DocumentEvent::Modified { is_modified: false });
            }
            events
        };

        info!(url = %url, format = ?output, lossless = lossless_save, "document saved");
        self.emit_all(events);
        Ok(())
    }

    // Animation

    pub fn is_animated(&self) -> bool {
        self.inner.lock().animated
    }

    /// Start playback. No-op when already running or not animated.
    pub fn start_animation(&self) {
        let delays: Vec<Duration> = {
            let inner = self.inner.lock();
            if inner.timer.is_some() || inner.frames.len() < 2 {
                return;
            }
            inner.frames.iter().map(|(_, delay)| *delay).collect()
        };

        let context = self.services.context.clone();
        let target = self.self_ref.clone();
        let timer = FrameTimer::start("imgview-animation", delays, move |frame| {
            post_to(&context, target.clone(), move |doc: &Document| doc.show_frame(frame));
        });
        match timer {
            Ok(timer) => {
                self.inner.lock().timer = Some(timer);
                debug!(url = %self.url, "animation started");
            }
            Err(err) => warn!(url = %self.url, error = %err, "cannot start animation"),
        }
    }

    /// Stop playback. No-op when not running.
    pub fn stop_animation(&self) {
        let timer = self.inner.lock().timer.take();
        if let Some(mut timer) = timer {
            timer.stop();
            debug!(url = %self.url, "animation stopped");
        }
    }

    pub fn is_animation_running(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    /// Index of the frame on display.
    pub fn current_frame(&self) -> usize {
        self.inner.lock().current_frame
    }

    fn show_frame(&self, index: usize) {
        let event = {
            let mut inner = self.inner.lock();
            if inner.timer.is_none() {
                return;
            }
            let Some((frame, _)) = inner.frames.get(index).cloned() else {
                return;
            };
            let rect = Rect::from_size((frame.width(), frame.height()));
            inner.image = Some(frame);
            inner.current_frame = index;
            DocumentEvent::ImageRectUpdated { rect }
        };
        self.events.emit(&event);
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Document")
            .field("url", &self.url)
            .field("loading_state", &inner.loading_state)
            .field("format", &inner.format)
            .field("undo", &inner.undo)
            .finish()
    }
}

fn format_byte_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_zoom_buckets() {
        assert_eq!(inverted_zoom_for(0.49), 1);
        assert_eq!(inverted_zoom_for(0.25), 2);
        assert_eq!(inverted_zoom_for(0.2), 4);
        assert_eq!(inverted_zoom_for(0.125), 4);
        assert_eq!(inverted_zoom_for(0.1), 8);
        assert_eq!(inverted_zoom_for(0.0), MAX_INVERTED_ZOOM);
    }

    #[test]
    fn test_loading_state_order() {
        assert!(LoadingState::Loading < LoadingState::KindDetermined);
        assert!(LoadingState::KindDetermined < LoadingState::MetaInfoLoaded);
        assert!(LoadingState::MetaInfoLoaded < LoadingState::Loaded);
        assert!(LoadingState::Loaded.is_terminal());
        assert!(LoadingState::LoadingFailed.is_terminal());
        assert!(!LoadingState::MetaInfoLoaded.is_terminal());
    }

    #[test]
    fn test_format_byte_size() {
        assert_eq!(format_byte_size(512), "512 B");
        assert_eq!(format_byte_size(2048), "2.0 KiB");
        assert_eq!(format_byte_size(3 * 1024 * 1024), "3.0 MiB");
    }
}
