use crate::catalog::types::Row;
use crate::error::SnapError;
use crate::index::iter::{LookupStats, RowFetcher};
use crate::storage::tuple::Tuple;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, Receiver, SyncSender};
use std::thread::JoinHandle;
use tracing::warn;

type Job = (u64, Tuple, Tuple);
type Fetched = (u64, Result<Option<Row>, SnapError>);

/// Lookup iterator that reads keys on one thread and materializes rows on a
/// worker pool, handing rows back in key order.
pub struct ParallelRowIter {
    results: Option<Receiver<Fetched>>,
    pending: BTreeMap<u64, Option<Row>>,
    next_seq: u64,
    cancel: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    stats: Arc<LookupStats>,
    covering: bool,
    finished: bool,
}

impl ParallelRowIter {
    pub fn spawn<I>(
        keys: I,
        fetcher: Arc<dyn RowFetcher>,
        stats: Arc<LookupStats>,
        covering: bool,
        workers: usize,
        buffer: usize,
    ) -> Self
    where
        I: Iterator<Item = (Tuple, Tuple)> + Send + 'static,
    {
        let worker_count = workers.max(1);
        let buffer = buffer.max(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let (work_tx, work_rx) = std_mpsc::sync_channel::<Job>(buffer);
        let (result_tx, result_rx) = std_mpsc::sync_channel::<Fetched>(buffer);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut threads = Vec::with_capacity(worker_count + 1);
        {
            let cancel = Arc::clone(&cancel);
            threads.push(std::thread::spawn(move || read_keys(keys, work_tx, cancel)));
        }
        for _ in 0..worker_count {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            let fetcher = Arc::clone(&fetcher);
            let cancel = Arc::clone(&cancel);
            threads.push(std::thread::spawn(move || {
                run_worker(work_rx, result_tx, fetcher, cancel)
            }));
        }

        Self {
            results: Some(result_rx),
            pending: BTreeMap::new(),
            next_seq: 0,
            cancel,
            threads,
            stats,
            covering,
            finished: false,
        }
    }

    pub fn stats(&self) -> Arc<LookupStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_covering(&self) -> bool {
        self.covering
    }

    /// Cancels outstanding work and joins every thread.
    pub fn close(&mut self) -> Result<(), SnapError> {
        self.finished = true;
        self.pending.clear();
        self.cancel.store(true, Ordering::Relaxed);
        self.results.take();
        let mut panicked = 0usize;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!(panicked, "lookup threads panicked");
            return Err(SnapError::InternalInvariantViolation(format!(
                "{panicked} lookup thread(s) panicked"
            )));
        }
        Ok(())
    }

    fn fail(&mut self, err: SnapError) -> Option<Result<Row, SnapError>> {
        if let Err(close_err) = self.close() {
            warn!(error = %close_err, "lookup shutdown after failure");
        }
        Some(Err(err))
    }
}

impl Iterator for ParallelRowIter {
    type Item = Result<Row, SnapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(slot) = self.pending.remove(&self.next_seq) {
                self.next_seq += 1;
                match slot {
                    Some(row) => {
                        self.stats.record_row();
                        return Some(Ok(row));
                    }
                    None => continue,
                }
            }
            let received = self.results.as_ref()?.recv();
            match received {
                Ok((seq, Ok(row))) => {
                    self.pending.insert(seq, row);
                }
                Ok((_, Err(e))) => return self.fail(e),
                Err(_) => {
                    if !self.pending.is_empty() {
                        let missing = self.next_seq;
                        return self.fail(SnapError::InternalInvariantViolation(format!(
                            "lookup result {missing} never arrived"
                        )));
                    }
                    if let Err(e) = self.close() {
                        return Some(Err(e));
                    }
                    return None;
                }
            }
        }
    }
}

impl Drop for ParallelRowIter {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let _ = self.close();
        }
    }
}

fn read_keys<I>(keys: I, work_tx: SyncSender<Job>, cancel: Arc<AtomicBool>)
where
    I: Iterator<Item = (Tuple, Tuple)>,
{
    for (seq, (key, value)) in keys.enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if work_tx.send((seq as u64, key, value)).is_err() {
            return;
        }
    }
}

fn run_worker(
    work_rx: Arc<Mutex<Receiver<Job>>>,
    result_tx: SyncSender<Fetched>,
    fetcher: Arc<dyn RowFetcher>,
    cancel: Arc<AtomicBool>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        let job = work_rx.lock().recv();
        let Ok((seq, key, value)) = job else {
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            fetcher.fetch(&key, &value)
        }))
        .unwrap_or_else(|_| {
            Err(SnapError::InternalInvariantViolation(format!(
                "row fetch panicked for key {key}"
            )))
        });
        if result_tx.send((seq, result)).is_err() {
            return;
        }
    }
}
