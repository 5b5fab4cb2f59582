//! Scheduler behaviour through an open database.
//!
//! Tests:
//! - Writes from many callers commit in submission order
//! - WAL reads proceed while a write is in flight
//! - Without WAL, reads queue behind the writer
//! - Failed tasks roll back and deliver `None`
//! - Shutdown drains queued work

mod common;

use common::{listen, recv, user, TestFixture, UserCodec};
use runnel::{Database, Filter, Listener, Task};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn seq_table(db: &Database) {
    db.scheduler()
        .run_blocking(Task::write(|conn| {
            conn.execute_batch("CREATE TABLE seq (n INTEGER NOT NULL);")?;
            Ok(())
        }))
        .unwrap();
}

fn row_count(db: &Database, table: &'static str) -> i64 {
    db.scheduler()
        .run_blocking(Task::read(move |conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?)
        }))
        .unwrap()
}

/// Submit a write that inserts a user, reports that it started, then holds
/// its transaction open until `release` fires.
fn blocked_write(db: &Database) -> (mpsc::Sender<()>, mpsc::Receiver<Option<()>>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (listener, done_rx) = listen();

    db.scheduler()
        .submit_write(
            move |conn| {
                conn.execute(
                    "INSERT INTO users (id, name, gender) VALUES ('held', 'Held', 0)",
                    [],
                )?;
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            },
            listener,
        )
        .unwrap();

    started_rx.recv_timeout(common::TIMEOUT).unwrap();
    (release_tx, done_rx)
}

#[test]
fn test_writes_commit_in_submission_order() {
    let fixture = TestFixture::new();
    let db = fixture.open();
    seq_table(&db);

    let next = Arc::new(Mutex::new(0_i64));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            let next = next.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    // Taking the number and submitting under one lock fixes
                    // the submission order.
                    let mut guard = next.lock().unwrap();
                    let n = *guard;
                    *guard += 1;
                    db.scheduler()
                        .submit_write(
                            move |conn| {
                                conn.execute("INSERT INTO seq (n) VALUES (?1)", [n])?;
                                Ok(())
                            },
                            None::<Listener<()>>,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let order: Vec<i64> = db
        .scheduler()
        .run_blocking(Task::write(|conn| {
            let mut stmt = conn.prepare("SELECT n FROM seq ORDER BY rowid")?;
            let order = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(order)
        }))
        .unwrap();
    assert_eq!(order, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_wal_read_does_not_wait_for_write() {
    let fixture = TestFixture::new();
    let db = fixture.open();
    assert!(db.is_wal_enabled());
    let users = db.table::<UserCodec>().unwrap();

    let (release, done) = blocked_write(&db);

    let (listener, rx) = listen();
    users.count(Filter::all(), listener).unwrap();
    // The uncommitted row is invisible to the reader.
    assert_eq!(recv(&rx), Some(0));

    release.send(()).unwrap();
    assert_eq!(recv(&done), Some(()));

    let (listener, rx) = listen();
    users.count(Filter::all(), listener).unwrap();
    assert_eq!(recv(&rx), Some(1));
}

#[test]
fn test_read_waits_for_write_without_wal() {
    let fixture = TestFixture::new();
    let db = fixture.open_in_memory();
    assert!(!db.is_wal_enabled());
    let users = db.table::<UserCodec>().unwrap();

    let (release, done) = blocked_write(&db);

    let (listener, rx) = listen();
    users.count(Filter::all(), listener).unwrap();
    assert!(matches!(
        rx.recv_timeout(Duration::from_millis(200)),
        Err(RecvTimeoutError::Timeout)
    ));

    release.send(()).unwrap();
    assert_eq!(recv(&done), Some(()));
    assert_eq!(recv(&rx), Some(1));
}

#[test]
fn test_failed_write_rolls_back_and_delivers_none() {
    let fixture = TestFixture::new();
    let db = fixture.open();
    let users = db.table::<UserCodec>().unwrap();

    let (listener, rx) = listen::<()>();
    db.scheduler()
        .submit_write(
            |conn| {
                conn.execute(
                    "INSERT INTO users (id, name, gender) VALUES ('u1', 'One', 0)",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO users (id, name, gender) VALUES ('u2', NULL, 0)",
                    [],
                )?;
                Ok(())
            },
            listener,
        )
        .unwrap();
    assert_eq!(recv(&rx), None);

    let (listener, rx) = listen();
    users.count(Filter::all(), listener).unwrap();
    assert_eq!(recv(&rx), Some(0));
}

#[test]
fn test_every_listener_called_once() {
    let fixture = TestFixture::new();
    let db = fixture.open();
    let users = db.table::<UserCodec>().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    for n in 0..20 {
        let calls = calls.clone();
        users
            .insert(
                user(n),
                Some(Box::new(move |_result: Option<Option<i64>>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
    }
    db.shutdown().unwrap();

    // Inline delivery: every listener has run once the workers are joined.
    assert_eq!(calls.load(Ordering::SeqCst), 20);
}

#[test]
fn test_shutdown_drains_queued_writes() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        let users = db.table::<UserCodec>().unwrap();
        for n in 0..100 {
            users.insert(user(n), None).unwrap();
        }
        db.shutdown().unwrap();
        assert!(users.insert(user(100), None).is_err());
    }

    let db = fixture.open();
    assert_eq!(row_count(&db, "users"), 100);
}
