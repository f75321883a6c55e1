// io_uring-based output writer for large prime files

use eyre::{WrapErr, eyre};
use io_uring::{IoUring, opcode, types};
use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::storage::{OutputFormat, create_output, encode_primes};

const QUEUE_DEPTH: u32 = 256; // io_uring queue depth
const MAX_IN_FLIGHT: usize = 200; // Backpressure threshold
const BATCH_SIZE: usize = 64; // Submit every N buffers
const PRIMES_PER_BUFFER: usize = 16 * 1024;

/// Batch writer issuing positioned writes through io_uring
struct UringBatchWriter {
    ring: IoUring,
    file: File, // Keep file alive to prevent FD from being closed
    pending: HashMap<u64, Vec<u8>>,
    offset: u64,
    next_id: u64,
    unsubmitted: usize,
}

impl UringBatchWriter {
    fn new(file: File, queue_depth: u32) -> std::io::Result<Self> {
        Ok(Self {
            ring: IoUring::new(queue_depth)?,
            file,
            pending: HashMap::new(),
            offset: 0,
            next_id: 0,
            unsubmitted: 0,
        })
    }

    /// Queue a write of `data` at the current end of file
    fn push_write(&mut self, data: Vec<u8>) -> std::io::Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "write buffer too large")
        })?;
        let id = self.next_id;

        let write_op = opcode::Write::new(types::Fd(self.file.as_raw_fd()), data.as_ptr(), len)
            .offset(self.offset)
            .build()
            .user_data(id);

        // SAFETY: the buffer stays in `pending` until its completion is reaped
        unsafe {
            self.ring.submission().push(&write_op).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::Other, "submission queue full")
            })?;
        }

        self.pending.insert(id, data);
        self.offset += u64::from(len);
        self.next_id += 1;
        self.unsubmitted += 1;
        Ok(())
    }

    fn submit_batch(&mut self) -> std::io::Result<()> {
        self.ring.submit()?;
        self.unsubmitted = 0;
        Ok(())
    }

    /// Reap whatever completions are ready without blocking
    fn poll_completions(&mut self) -> std::io::Result<usize> {
        let mut reaped = 0;
        loop {
            let Some(cqe) = self.ring.completion().next() else {
                break;
            };
            self.complete(cqe.user_data(), cqe.result())?;
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Block until `count` more writes have completed
    fn wait_completions(&mut self, count: usize) -> std::io::Result<()> {
        let mut reaped = 0;
        while reaped < count {
            self.ring.submit_and_wait(1)?;
            self.unsubmitted = 0;
            reaped += self.poll_completions()?;
        }
        Ok(())
    }

    fn complete(&mut self, id: u64, result: i32) -> std::io::Result<()> {
        let data = self.pending.remove(&id).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "completion for unknown write")
        })?;
        if result < 0 {
            return Err(std::io::Error::from_raw_os_error(-result));
        }
        if result as usize != data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", result, data.len()),
            ));
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn finish(mut self) -> std::io::Result<()> {
        if self.unsubmitted > 0 {
            self.submit_batch()?;
        }
        let remaining = self.in_flight();
        self.wait_completions(remaining)?;
        self.file.sync_data()
    }
}

impl Drop for UringBatchWriter {
    // An early error return must not free buffers the kernel is still writing
    fn drop(&mut self) {
        while !self.pending.is_empty() {
            if self.ring.submit_and_wait(1).is_err() {
                break;
            }
            loop {
                let Some(cqe) = self.ring.completion().next() else {
                    break;
                };
                self.pending.remove(&cqe.user_data());
            }
        }
    }
}

/// Writes `primes` to `path` using io_uring. Produces the same bytes as
/// [`crate::storage::save_primes`].
pub fn save_primes_uring(path: &Path, primes: &[u64], format: OutputFormat) -> eyre::Result<()> {
    let file = create_output(path)?;
    let mut writer = UringBatchWriter::new(file, QUEUE_DEPTH)
        .map_err(|e| eyre!("Error creating io_uring writer: {}", e))?;

    let context = || format!("Error writing to file '{}'", path.display());
    let mut peak_in_flight = 0;

    for chunk in primes.chunks(PRIMES_PER_BUFFER) {
        let mut buffer = Vec::with_capacity(chunk.len() * 8);
        encode_primes(chunk, format, &mut buffer);
        writer.push_write(buffer).wrap_err_with(context)?;

        if writer.unsubmitted >= BATCH_SIZE {
            writer.submit_batch().wrap_err_with(context)?;
        }

        // Backpressure: if too many in flight, wait for some to complete
        if writer.in_flight() > MAX_IN_FLIGHT {
            if writer.unsubmitted > 0 {
                writer.submit_batch().wrap_err_with(context)?;
            }
            writer.wait_completions(BATCH_SIZE).wrap_err_with(context)?;
        }

        writer.poll_completions().wrap_err_with(context)?;
        peak_in_flight = peak_in_flight.max(writer.in_flight());
    }

    writer.finish().wrap_err_with(context)?;

    log::info!(
        "wrote {} primes to {} via io_uring (peak in-flight: {} ops)",
        primes.len(),
        path.display(),
        peak_in_flight
    );
    Ok(())
}
