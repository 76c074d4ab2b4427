//! Identity-mapped document cache.
//!
//! The factory hands out exactly one live [`Document`] per normalized
//! identifier. Documents nobody else references are kept for quick
//! re-opening until the count or memory limits of [`FactoryConfig`] push
//! the least recently used ones out. Modified documents are never evicted.

use crate::config::FactoryConfig;
use crate::document::Document;
use crate::error::DocumentResult;
use crate::event::{DocumentEvent, FactoryEvent, Signal};
use crate::io::{LocalFileIo, ResourceIo};
use crate::job::Services;
use crate::identifier::DocumentUrl;
use imgview_scheduler::MainContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

struct Entry {
    document: Arc<Document>,
    last_access: u64,
}

#[derive(Default)]
struct FactoryState {
    entries: HashMap<DocumentUrl, Entry>,
    modified: Vec<DocumentUrl>,
    clock: u64,
}

struct FactoryInner {
    services: Arc<Services>,
    state: Mutex<FactoryState>,
    events: Arc<Signal<FactoryEvent>>,
}

impl FactoryInner {
    fn on_modified(&self, url: &DocumentUrl, is_modified: bool) {
        let changed = {
            let mut state = self.state.lock();
            if is_modified && !state.entries.contains_key(url) {
                // Discarded documents no longer count.
                return;
            }
            let position = state.modified.iter().position(|entry| entry == url);
            match (is_modified, position) {
                (true, None) => {
                    state.modified.push(url.clone());
                    true
                }
                (false, Some(index)) => {
                    state.modified.remove(index);
                    true
                }
                _ => false,
            }
        };
        if changed {
            debug!(url = %url, is_modified, "modified list changed");
            self.events.emit(&FactoryEvent::ModifiedListChanged);
        }
    }

    fn remove_from_modified(&self, url: &DocumentUrl) -> bool {
        let mut state = self.state.lock();
        let before = state.modified.len();
        state.modified.retain(|entry| entry != url);
        state.modified.len() != before
    }
}

/// Registry of open documents.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct DocumentFactory {
    inner: Arc<FactoryInner>,
}

impl DocumentFactory {
    /// Factory reading local files, with its own main context.
    ///
    /// # Errors
    /// Fails if the decode worker thread cannot be spawned.
    pub fn new(config: FactoryConfig) -> DocumentResult<Self> {
        Self::with_io(MainContext::new(), Arc::new(LocalFileIo), config)
    }

    /// Factory using an explicit main context and I/O collaborator.
    pub fn with_io(
        context: MainContext,
        io: Arc<dyn ResourceIo>,
        config: FactoryConfig,
    ) -> DocumentResult<Self> {
        let services = Services::new(context, io, config)?;
        Ok(Self {
            inner: Arc::new(FactoryInner {
                services: Arc::new(services),
                state: Mutex::new(FactoryState::default()),
                events: Arc::new(Signal::new()),
            }),
        })
    }

    /// Main context results are delivered to. Pump it to make progress.
    pub fn context(&self) -> &MainContext {
        &self.inner.services.context
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.inner.services.config
    }

    /// Factory event signal.
    pub fn events(&self) -> &Arc<Signal<FactoryEvent>> {
        &self.inner.events
    }

    /// Document for `url`: the cached instance, or a new one whose loading
    /// starts immediately.
    pub fn load(&self, url: &DocumentUrl) -> Arc<Document> {
        let (document, created) = {
            let mut state = self.inner.state.lock();
            state.clock += 1;
            let clock = state.clock;
            match state.entries.get_mut(url) {
                Some(entry) => {
                    entry.last_access = clock;
                    (entry.document.clone(), false)
                }
                None => {
                    let document = Document::new(url.clone(), self.inner.services.clone());
                    state.entries.insert(
                        url.clone(),
                        Entry {
                            document: document.clone(),
                            last_access: clock,
                        },
                    );
                    (document, true)
                }
            }
        };

        if created {
            let factory: Weak<FactoryInner> = Arc::downgrade(&self.inner);
            let document_url = url.clone();
            document.events().subscribe(move |event| {
                if let DocumentEvent::Modified { is_modified } = event {
                    if let Some(factory) = factory.upgrade() {
                        factory.on_modified(&document_url, *is_modified);
                    }
                }
            });
            debug!(url = %url, "document created");
            document.start_loading();
        }

        self.trim();
        document
    }

    /// Identifiers of documents with unsaved edits, in modification order.
    pub fn modified_documents(&self) -> Vec<DocumentUrl> {
        self.inner.state.lock().modified.clone()
    }

    pub fn contains(&self, url: &DocumentUrl) -> bool {
        self.inner.state.lock().entries.contains_key(url)
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the cached document for `url` unless it has unsaved edits.
    ///
    /// Returns `true` if an entry was removed.
    pub fn forget(&self, url: &DocumentUrl) -> bool {
        let mut state = self.inner.state.lock();
        let removable = state
            .entries
            .get(url)
            .is_some_and(|entry| !entry.document.is_modified());
        if removable {
            state.entries.remove(url);
            debug!(url = %url, "document forgotten");
        }
        removable
    }

    /// Drop the cached document for `url` even if it has unsaved edits.
    ///
    /// The caller is responsible for having confirmed the loss of edits.
    pub fn discard(&self, url: &DocumentUrl) -> bool {
        let removed = self.inner.state.lock().entries.remove(url).is_some();
        if removed {
            info!(url = %url, "document discarded");
            if self.inner.remove_from_modified(url) {
                self.inner.events.emit(&FactoryEvent::ModifiedListChanged);
            }
        }
        removed
    }

    /// Drop every unreferenced, idle, unmodified document.
    pub fn clear_cache(&self) {
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !is_evictable(entry));
        debug!(removed = before - state.entries.len(), "document cache cleared");
    }

    /// Evict least recently used documents beyond the configured limits.
    pub fn trim(&self) {
        let config = &self.inner.services.config;
        let mut state = self.inner.state.lock();

        let mut candidates: Vec<(u64, DocumentUrl)> = state
            .entries
            .iter()
            .filter(|(_, entry)| is_evictable(entry))
            .map(|(url, entry)| (entry.last_access, url.clone()))
            .collect();
        candidates.sort_by_key(|(last_access, _)| *last_access);

        let mut memory: usize = state
            .entries
            .values()
            .map(|entry| entry.document.memory_usage())
            .sum();
        let mut unreferenced = candidates.len();

        for (_, url) in candidates {
            if unreferenced <= config.max_unreferenced && memory <= config.memory_budget {
                break;
            }
            if let Some(entry) = state.entries.remove(&url) {
                memory = memory.saturating_sub(entry.document.memory_usage());
                unreferenced -= 1;
                debug!(url = %url, "document evicted");
            }
        }
    }
}

/// The factory holds the only strong reference, no job is outstanding and
/// nothing would be lost.
fn is_evictable(entry: &Entry) -> bool {
    Arc::strong_count(&entry.document) == 1
        && !entry.document.is_busy()
        && !entry.document.is_modified()
}

impl fmt::Debug for DocumentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DocumentFactory")
            .field("documents", &state.entries.len())
            .field("modified", &state.modified.len())
            .finish()
    }
}
