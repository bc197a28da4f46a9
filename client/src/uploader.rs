use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};

use crate::error::Result;

/// Runs `send` for every index in `pending` with at most `concurrency` calls
/// in flight.
///
/// Indices are fed to a fixed set of workers through a queue; each worker
/// takes the next index as soon as its previous call finishes. Completions
/// are funnelled through one channel so `on_progress` sees a strictly
/// increasing completed count no matter which order chunks finish in.
///
/// After the first failure no new index is started; calls already in flight
/// run to completion and the first error is returned.
pub async fn dispatch<F, Fut, P>(
    pending: Vec<u64>,
    concurrency: usize,
    send: F,
    mut on_progress: P,
) -> Result<()>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<()>>,
    P: FnMut(u64),
{
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    for index in pending {
        let _ = queue_tx.send(index);
    }
    drop(queue_tx);
    let queue = Mutex::new(queue_rx);

    let failed = AtomicBool::new(false);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u64>();

    let workers: Vec<_> = (0..concurrency.max(1))
        .map(|_| {
            let done_tx = done_tx.clone();
            let queue = &queue;
            let failed = &failed;
            let send = &send;
            async move {
                loop {
                    if failed.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    let Some(index) = queue.lock().await.recv().await else {
                        return Ok(());
                    };
                    if let Err(e) = send(index).await {
                        failed.store(true, Ordering::Release);
                        return Err(e);
                    }
                    let _ = done_tx.send(index);
                }
            }
        })
        .collect();
    drop(done_tx);

    let progress = async {
        let mut completed = 0;
        while done_rx.recv().await.is_some() {
            completed += 1;
            on_progress(completed);
        }
    };

    let (results, ()) = tokio::join!(join_all(workers), progress);
    results.into_iter().collect::<Result<Vec<()>>>()?;
    Ok(())
}
