mod common;

use common::*;
use imgview_cache::{ThumbnailCacheConfig, ThumbnailGroup, ThumbnailStore};
use imgview_core::{
    DocumentUrl, FileItem, LocalFileIo, PreviewProvider, ResourceIo, ResourceStat, ThumbnailEvent,
    ThumbnailLoadJob,
};
use imgview_scheduler::MainContext;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, SystemTime};

struct Run {
    events: Vec<ThumbnailEvent>,
    finished: bool,
}

fn run_job(job: ThumbnailLoadJob, context: &MainContext) -> Run {
    let (_, events) = job.events().subscribe_channel();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let _handle = job
        .start(move || flag.store(true, Ordering::SeqCst))
        .expect("job should start");
    let done = context.process_until(|| finished.load(Ordering::SeqCst), TIMEOUT);
    Run {
        events: events.try_iter().collect(),
        finished: done,
    }
}

fn loaded_names(events: &[ThumbnailEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ThumbnailEvent::Loaded { item, .. } => Some(item.url.file_name()),
            _ => None,
        })
        .collect()
}

fn png_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "png"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_generates_and_persists_thumbnails() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let red = write_image(source.path(), "red.png", &solid(300, 200, [255, 0, 0]));
    let blue = write_image(source.path(), "blue.png", &solid(200, 300, [0, 0, 255]));
    let small = write_image(source.path(), "small.png", &solid(50, 50, [0, 255, 0]));

    let context = MainContext::new();
    let config = ThumbnailCacheConfig::new(cache.path());
    let normal_dir = config.group_dir(ThumbnailGroup::Normal);
    let store = ThumbnailStore::new(config);
    let items = [&red, &blue, &small].map(|path| FileItem::new(url_of(path)));
    let job = ThumbnailLoadJob::new(items, ThumbnailGroup::Normal, store.clone(), context.clone());

    let run = run_job(job, &context);
    assert!(run.finished);
    assert!(matches!(run.events.last(), Some(ThumbnailEvent::Finished)));
    assert_eq!(loaded_names(&run.events), vec!["red.png", "blue.png", "small.png"]);

    for event in &run.events {
        if let ThumbnailEvent::Loaded {
            item,
            image,
            original_size,
        } = event
        {
            let name = item.url.file_name();
            match name.as_str() {
                "red.png" => {
                    assert_eq!(*original_size, (300, 200));
                    assert_eq!(image.width(), 128);
                }
                "blue.png" => {
                    assert_eq!(*original_size, (200, 300));
                    assert_eq!(image.height(), 128);
                }
                _ => {
                    assert_eq!(*original_size, (50, 50));
                    assert_eq!((image.width(), image.height()), (50, 50));
                }
            }
        }
    }

    // Images already smaller than the group size are not persisted.
    assert_eq!(png_count(&normal_dir), 2);
    assert_eq!(store.stats().writes, 2);
}

#[test]
fn test_second_run_hits_the_cache() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let path = write_image(source.path(), "photo.jpg", &gradient(400, 300));
    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));

    for _ in 0..2 {
        let job = ThumbnailLoadJob::new(
            [FileItem::new(url_of(&path))],
            ThumbnailGroup::Normal,
            store.clone(),
            context.clone(),
        );
        let run = run_job(job, &context);
        assert_eq!(loaded_names(&run.events), vec!["photo.jpg"]);
    }

    let stats = store.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_changed_origin_regenerates() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let path = write_image(source.path(), "photo.png", &solid(400, 300, [255, 0, 0]));
    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));
    let job = |store: &ThumbnailStore| {
        ThumbnailLoadJob::new(
            [FileItem::new(url_of(&path))],
            ThumbnailGroup::Normal,
            store.clone(),
            context.clone(),
        )
    };

    run_job(job(&store), &context);
    solid(400, 300, [0, 0, 255]).save(&path).unwrap();
    let later = SystemTime::now() + Duration::from_secs(10);
    fs::File::options()
        .write(true)
        .open(&path)
        .and_then(|file| file.set_modified(later))
        .unwrap();

    let run = run_job(job(&store), &context);
    let stats = store.stats();
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.writes, 2);

    let ThumbnailEvent::Loaded { image, .. } = &run.events[0] else {
        panic!("expected a thumbnail, got {:?}", run.events[0]);
    };
    let pixel = image.to_rgb8().get_pixel(10, 10).0;
    assert_eq!(pixel, [0, 0, 255]);
}

#[test]
fn test_large_group_uses_large_directory() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let path = write_image(source.path(), "big.png", &gradient(600, 400));
    let context = MainContext::new();
    let config = ThumbnailCacheConfig::new(cache.path());
    let large_dir = config.group_dir(ThumbnailGroup::Large);
    let store = ThumbnailStore::new(config);

    let job = ThumbnailLoadJob::new(
        [FileItem::new(url_of(&path))],
        ThumbnailGroup::Large,
        store,
        context.clone(),
    );
    let run = run_job(job, &context);
    let ThumbnailEvent::Loaded { image, .. } = &run.events[0] else {
        panic!("expected a thumbnail, got {:?}", run.events[0]);
    };
    assert_eq!(image.width(), 256);
    assert_eq!(png_count(&large_dir), 1);
}

#[test]
fn test_thumbnail_inside_cache_is_loaded_directly() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let path = write_image(source.path(), "photo.png", &gradient(400, 300));
    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));

    let make = |url: DocumentUrl| {
        ThumbnailLoadJob::new([FileItem::new(url)], ThumbnailGroup::Normal, store.clone(), context.clone())
    };
    run_job(make(url_of(&path)), &context);
    let cached = store.path_for(ThumbnailGroup::Normal, url_of(&path).key());
    assert!(cached.exists());

    let run = run_job(make(url_of(&cached)), &context);
    assert_eq!(loaded_names(&run.events).len(), 1);
    assert_eq!(store.stats().writes, 1);
}

#[test]
fn test_non_raster_items() {
    struct Checkerboard;

    impl PreviewProvider for Checkerboard {
        fn preview(&self, _item: &FileItem, pixel_size: u32) -> Result<image::DynamicImage, String> {
            Ok(solid(pixel_size, pixel_size / 2, [10, 20, 30]))
        }
    }

    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let text = source.path().join("notes.txt");
    fs::write(&text, "plain text, not an image").unwrap();
    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));

    let job = ThumbnailLoadJob::new(
        [FileItem::new(url_of(&text))],
        ThumbnailGroup::Normal,
        store.clone(),
        context.clone(),
    );
    let run = run_job(job, &context);
    assert!(matches!(run.events[0], ThumbnailEvent::Failed { .. }));

    let job = ThumbnailLoadJob::new(
        [FileItem::new(url_of(&text))],
        ThumbnailGroup::Normal,
        store,
        context.clone(),
    )
    .with_preview_provider(Arc::new(Checkerboard));
    let run = run_job(job, &context);
    let ThumbnailEvent::Loaded { image, .. } = &run.events[0] else {
        panic!("expected a preview, got {:?}", run.events[0]);
    };
    assert_eq!((image.width(), image.height()), (128, 64));
}

#[test]
fn test_missing_origin_fails_and_job_continues() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let present = write_image(source.path(), "present.png", &gradient(300, 300));
    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));

    let job = ThumbnailLoadJob::new(
        [
            FileItem::new(url_of(&source.path().join("gone.png"))),
            FileItem::new(url_of(&present)),
        ],
        ThumbnailGroup::Normal,
        store,
        context.clone(),
    );
    let run = run_job(job, &context);
    assert!(matches!(run.events[0], ThumbnailEvent::Failed { .. }));
    assert_eq!(loaded_names(&run.events), vec!["present.png"]);
    assert!(run.finished);
}

#[test]
fn test_queue_editing_before_start() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let urls: Vec<DocumentUrl> = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|name| url_of(&write_image(source.path(), name, &gradient(200, 200))))
        .collect();
    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));

    let mut job = ThumbnailLoadJob::new(
        urls.iter().cloned().map(FileItem::new),
        ThumbnailGroup::Normal,
        store,
        context.clone(),
    );
    assert!(!job.append_item(FileItem::new(urls[0].clone())));
    job.remove_items(&urls[1..2]);
    assert_eq!(job.pending_items().len(), 2);

    let run = run_job(job, &context);
    assert_eq!(loaded_names(&run.events), vec!["a.png", "c.png"]);
}

/// Local I/O whose stat of one resource blocks until released.
struct GatedIo {
    gated: DocumentUrl,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ResourceIo for GatedIo {
    fn stat(&self, url: &DocumentUrl) -> io::Result<ResourceStat> {
        if url == &self.gated {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
        LocalFileIo.stat(url)
    }

    fn read(&self, url: &DocumentUrl) -> io::Result<Vec<u8>> {
        LocalFileIo.read(url)
    }

    fn write(&self, url: &DocumentUrl, bytes: &[u8]) -> io::Result<()> {
        LocalFileIo.write(url, bytes)
    }

    fn is_fast_local(&self, _url: &DocumentUrl) -> bool {
        false
    }
}

/// Pump `context` until the gated stat is entered.
fn wait_for_gate(context: &MainContext, entered: &mpsc::Receiver<()>) -> bool {
    for _ in 0..500 {
        context.process_pending();
        if entered.try_recv().is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_removing_current_item_skips_it() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let urls: Vec<DocumentUrl> = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|name| url_of(&write_image(source.path(), name, &gradient(200, 200))))
        .collect();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let io = GatedIo {
        gated: urls[1].clone(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };

    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));
    let job = ThumbnailLoadJob::new(
        urls.iter().cloned().map(FileItem::new),
        ThumbnailGroup::Normal,
        store,
        context.clone(),
    )
    .with_io(Arc::new(io));
    let (_, events) = job.events().subscribe_channel();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let handle = job
        .start(move || flag.store(true, Ordering::SeqCst))
        .expect("job should start");

    assert!(
        wait_for_gate(&context, &entered_rx),
        "stat of the second item never started"
    );
    assert_eq!(handle.pending_items()[0].url, urls[1]);

    handle.remove_items(&urls[1..2]);
    release_tx.send(()).unwrap();
    assert!(context.process_until(|| finished.load(Ordering::SeqCst), TIMEOUT));

    let events: Vec<ThumbnailEvent> = events.try_iter().collect();
    assert_eq!(loaded_names(&events), vec!["a.png", "c.png"]);
    assert!(!events
        .iter()
        .any(|event| matches!(event, ThumbnailEvent::Failed { .. })));
    assert!(handle.is_finished());
}

#[test]
fn test_removing_queued_item_while_first_is_running() {
    let source = tempfile::tempdir().expect("temp dir should be created");
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let urls: Vec<DocumentUrl> = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|name| url_of(&write_image(source.path(), name, &gradient(200, 200))))
        .collect();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let io = GatedIo {
        gated: urls[0].clone(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };

    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));
    let job = ThumbnailLoadJob::new(
        urls.iter().cloned().map(FileItem::new),
        ThumbnailGroup::Normal,
        store,
        context.clone(),
    )
    .with_io(Arc::new(io));
    let (_, events) = job.events().subscribe_channel();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let handle = job
        .start(move || flag.store(true, Ordering::SeqCst))
        .expect("job should start");

    assert!(
        wait_for_gate(&context, &entered_rx),
        "stat of the first item never started"
    );

    handle.remove_items(&urls[1..2]);
    let pending: Vec<DocumentUrl> = handle.pending_items().into_iter().map(|item| item.url).collect();
    assert_eq!(pending, vec![urls[0].clone(), urls[2].clone()]);

    release_tx.send(()).unwrap();
    assert!(context.process_until(|| finished.load(Ordering::SeqCst), TIMEOUT));

    let events: Vec<ThumbnailEvent> = events.try_iter().collect();
    assert_eq!(loaded_names(&events), vec!["a.png", "c.png"]);
    assert!(handle.is_finished());
}

/// Resources served from memory under a non-local scheme.
#[derive(Default)]
struct MemoryIo {
    files: HashMap<String, Vec<u8>>,
}

impl ResourceIo for MemoryIo {
    fn stat(&self, url: &DocumentUrl) -> io::Result<ResourceStat> {
        Ok(match self.files.get(url.key()) {
            Some(bytes) => ResourceStat {
                modified: 1_700_000_000,
                size: bytes.len() as u64,
                exists: true,
                is_dir: false,
            },
            None => ResourceStat::default(),
        })
    }

    fn read(&self, url: &DocumentUrl) -> io::Result<Vec<u8>> {
        self.files
            .get(url.key())
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn write(&self, _url: &DocumentUrl, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

#[test]
fn test_remote_items_are_downloaded_first() {
    let cache = tempfile::tempdir().expect("temp dir should be created");
    let mut bytes = Vec::new();
    gradient(300, 150)
        .write_to(&mut io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    let url = DocumentUrl::parse("mem://host/remote.png").unwrap();
    let mut io = MemoryIo::default();
    io.files.insert(url.key().to_string(), bytes);

    let context = MainContext::new();
    let store = ThumbnailStore::new(ThumbnailCacheConfig::new(cache.path()));
    let job = ThumbnailLoadJob::new(
        [FileItem::new(url.clone())],
        ThumbnailGroup::Normal,
        store.clone(),
        context.clone(),
    )
    .with_io(Arc::new(io));

    let run = run_job(job, &context);
    let ThumbnailEvent::Loaded { original_size, .. } = &run.events[0] else {
        panic!("expected a thumbnail, got {:?}", run.events[0]);
    };
    assert_eq!(*original_size, (300, 150));
    assert!(store.path_for(ThumbnailGroup::Normal, url.key()).exists());
}
