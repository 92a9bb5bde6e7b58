//! Several engine handles on one database file.
//!
//! Each thread opens its own connection; the IMMEDIATE write transaction is
//! the only thing keeping their allocations apart.

use std::sync::{Arc, Barrier};
use std::thread;

use folio_kernel::{ErrorKind, Folio, FolioConfig, GroupFilter};
use folio_types::{BlockContent, DocumentId, NewBlock, Scope};

const WRITERS: usize = 4;
const BLOCKS_PER_WRITER: usize = 25;

fn config(path: &std::path::Path, busy_timeout_ms: u64) -> FolioConfig {
    let mut config = FolioConfig::with_database(path);
    config.database.busy_timeout_ms = busy_timeout_ms;
    config
}

#[test]
fn test_concurrent_appends_stay_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outline.db");

    let doc: DocumentId = {
        let folio = Folio::open(&config(&path, 10_000)).unwrap();
        folio.store().create_document("Shared", None).unwrap().id
    };

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let folio = Folio::open(&config(&path, 10_000)).unwrap();
                barrier.wait();
                let root = Scope::root(doc);
                let mut first = None;
                for i in 0..BLOCKS_PER_WRITER {
                    let content = BlockContent::titled(format!("w{writer}-{i}"));
                    // alternate between appending and inserting before our own first block
                    let request = match first {
                        Some(anchor) if i % 2 == 1 => NewBlock::before(root, anchor, content),
                        _ => NewBlock::append(root, content),
                    };
                    let block = folio.create_block(request).unwrap();
                    first.get_or_insert(block.id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let folio = Folio::open(&config(&path, 10_000)).unwrap();
    let tree = folio.load_tree(doc, GroupFilter::All).unwrap();
    assert_eq!(tree.len(), WRITERS * BLOCKS_PER_WRITER);

    let orders: Vec<u32> = tree.roots().map(|b| b.order_number).collect();
    let expected: Vec<u32> = (0..(WRITERS * BLOCKS_PER_WRITER) as u32).collect();
    assert_eq!(orders, expected);
    assert!(folio.check_document(doc).unwrap().is_empty());
}

#[test]
fn test_held_write_lock_reports_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outline.db");

    let holder = Folio::open(&config(&path, 5_000)).unwrap();
    let doc = holder.store().create_document("Locked", None).unwrap().id;
    let impatient = Folio::open(&config(&path, 0)).unwrap();

    let locked = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let writer = {
        let locked = Arc::clone(&locked);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            holder
                .store()
                .write(|_tx| {
                    locked.wait();
                    release.wait();
                    Ok(())
                })
                .unwrap();
        })
    };

    locked.wait();
    let err = impatient
        .create_block(NewBlock::append(Scope::root(doc), BlockContent::titled("late")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    release.wait();
    writer.join().unwrap();

    // once the lock is released the same request goes through
    let block = impatient
        .create_block(NewBlock::append(Scope::root(doc), BlockContent::titled("late")))
        .unwrap();
    assert_eq!(block.order_number, 0);
}
