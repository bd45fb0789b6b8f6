//! Writer task: drains the session's write queue onto the socket.
//!
//! One writer task per session. User `write` calls stage buffers on the
//! queue from any thread; the writer marks a batch, writes it with
//! scatter/gather I/O, fires the `write` callback, recycles the batch
//! and loops. At most one batch is in flight at a time, so completed
//! batches are observed in submission order.
//!
//! ```text
//! write()  ─┐
//! write()  ─┼─► WriteQueue::pending ──mark()──► marked ──writev──► socket
//! write()  ─┘
//! ```

use std::io::IoSlice;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::persist::PersistentBuffer;
use crate::session::{Session, Status};

/// Main writer loop for one session.
///
/// Exits when the session closes, finalizing a graceful close once the
/// queue is drained.
pub(crate) async fn write_loop<W>(session: Arc<Session>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    loop {
        // Drain every markable batch.
        loop {
            let marker = session.queue().mark();
            if marker <= 0 {
                break;
            }
            let batch = session.queue().marked_snapshot();

            let result = tokio::select! {
                biased;
                _ = session.wait_status(Status::Closed) => return,
                r = write_batch(&mut writer, &batch) => r,
            };

            match result {
                Ok(()) => {
                    let handler = session.handler_adapter();
                    handler.write(&session, &batch);
                    session.queue().clear_marked();
                }
                Err(e) => {
                    session.fail(Error::Io(e));
                    return;
                }
            }
        }

        match session.status() {
            Status::Closed => return,
            Status::Closing if session.queue().is_idle() => {
                // Graceful close: queue drained, send FIN and finish.
                let _ = writer.shutdown().await;
                session.finalize_graceful_close();
                return;
            }
            _ => {}
        }

        session.wait_write_wake().await;
    }
}

/// Write a batch of buffers using scatter/gather I/O (`write_vectored`).
///
/// A single vectored write is the common case; on a partial write the
/// remaining byte ranges are rebuilt and retried until the batch is
/// fully on the wire.
async fn write_batch<W>(writer: &mut W, batch: &[PersistentBuffer]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(|b| b.len()).sum();
    if total == 0 {
        return Ok(());
    }

    let slices: Vec<IoSlice<'_>> = batch
        .iter()
        .filter(|b| !b.is_empty())
        .map(|b| IoSlice::new(b.as_slice()))
        .collect();

    let written = writer.write_vectored(&slices).await?;
    if written == total {
        return Ok(());
    }
    if written == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        ));
    }

    // Partial write: continue with the remaining ranges.
    let mut total_written = written;
    while total_written < total {
        let remaining = build_remaining_slices(batch, total_written);
        if remaining.is_empty() {
            break;
        }
        let written = writer.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    Ok(())
}

/// Build the `IoSlice` array for the bytes still unwritten after
/// `skip_bytes` of the batch went out.
fn build_remaining_slices(batch: &[PersistentBuffer], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for buf in batch {
        if buf.is_empty() {
            continue;
        }
        let start = skipped;
        let end = skipped + buf.len();
        if skip_bytes < end {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&buf.as_slice()[offset..]));
        }
        skipped = end;
    }

    slices
}
