//! The portable fallback channel backend (spec.md §6: "Hosts without
//! POSIX-style shared memory may substitute an in-process equivalent; the
//! contract is identical."). Built on `std::sync::{Mutex, Condvar}` behind
//! an `Arc`, so `create`/`open_existing` within one process hand out
//! clones of the same channel rather than attaching to an OS resource.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::channel::record::{ChannelRecord, MAX_PAYLOAD_WORDS};
use crate::error::DriverError;

struct Inner {
    record: Mutex<ChannelRecord>,
    cmd_ready: Condvar,
    resp_ready: Condvar,
}

/// A channel handle usable from any number of threads within one process.
/// `create` and `open_existing` both hand out a clone of the same
/// underlying `Arc`, since there is no OS resource to attach to.
#[derive(Clone)]
pub struct InMemoryChannel {
    inner: Arc<Inner>,
}

impl InMemoryChannel {
    pub fn create() -> Result<Self, DriverError> {
        debug!("in-memory channel created");
        Ok(Self {
            inner: Arc::new(Inner {
                record: Mutex::new(ChannelRecord::default()),
                cmd_ready: Condvar::new(),
                resp_ready: Condvar::new(),
            }),
        })
    }

    /// Attach to an already-created channel. For the in-memory backend
    /// this is simply cloning the handle.
    pub fn open_existing(&self) -> Self {
        self.clone()
    }

    /// Release the channel. For the in-memory backend this just drops the
    /// `Arc` reference; the underlying state is freed once the last handle
    /// goes away.
    pub fn destroy(self) {}

    /// Detach without releasing. Identical to `destroy` for this backend.
    pub fn close(self) {}

    pub fn send_command(&self, kind: u32, p1: i32, p2: i32) -> Result<(), DriverError> {
        let mut rec = self.inner.record.lock().unwrap();
        while rec.command_pending {
            rec = self.inner.resp_ready.wait(rec).unwrap();
        }
        rec.command_kind = kind;
        rec.command_p1 = p1;
        rec.command_p2 = p2;
        rec.command_pending = true;
        rec.response_ready = false;
        self.inner.cmd_ready.notify_one();
        Ok(())
    }

    /// Blocking receive: waits for a pending command or shutdown.
    pub fn get_command(&self) -> Result<(u32, i32, i32), DriverError> {
        let mut rec = self.inner.record.lock().unwrap();
        while !rec.command_pending && !rec.shutdown_requested {
            rec = self.inner.cmd_ready.wait(rec).unwrap();
        }
        if rec.shutdown_requested {
            return Err(DriverError::Shutdown);
        }
        Ok((rec.command_kind, rec.command_p1, rec.command_p2))
    }

    /// Non-blocking receive. Returns `Ok(None)` if no command is pending.
    pub fn try_get_command(&self) -> Result<Option<(u32, i32, i32)>, DriverError> {
        let rec = self.inner.record.lock().unwrap();
        if rec.shutdown_requested {
            return Err(DriverError::Shutdown);
        }
        if !rec.command_pending {
            return Ok(None);
        }
        Ok(Some((rec.command_kind, rec.command_p1, rec.command_p2)))
    }

    pub fn send_response(&self, status: u32, data: &[i32], n: usize) -> Result<(), DriverError> {
        let mut rec = self.inner.record.lock().unwrap();
        let n = n.min(MAX_PAYLOAD_WORDS).min(data.len());
        rec.response_data[..n].copy_from_slice(&data[..n]);
        rec.response_len = n as u32;
        rec.response_status = status;
        rec.command_pending = false;
        rec.response_ready = true;
        self.inner.resp_ready.notify_all();
        Ok(())
    }

    pub fn wait_response(&self) -> Result<(u32, Vec<i32>), DriverError> {
        let mut rec = self.inner.record.lock().unwrap();
        while !rec.response_ready {
            rec = self.inner.resp_ready.wait(rec).unwrap();
        }
        let n = rec.response_len as usize;
        let data = rec.response_data[..n].to_vec();
        let status = rec.response_status;
        rec.response_ready = false;
        self.inner.resp_ready.notify_all();
        Ok((status, data))
    }

    /// Like `wait_response` but gives up after `timeout` -- not part of the
    /// spec's required contract, but convenient for tests that must not
    /// hang if a peer never answers.
    pub fn wait_response_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(u32, Vec<i32>)>, DriverError> {
        let guard = self.inner.record.lock().unwrap();
        let (mut guard, timed_out) = self
            .inner
            .resp_ready
            .wait_timeout_while(guard, timeout, |r| !r.response_ready)
            .unwrap();
        if timed_out.timed_out() {
            return Ok(None);
        }
        let n = guard.response_len as usize;
        let data = guard.response_data[..n].to_vec();
        let status = guard.response_status;
        guard.response_ready = false;
        self.inner.resp_ready.notify_all();
        Ok(Some((status, data)))
    }

    pub fn update_status(&self, status: crate::channel::record::StatusSnapshot) {
        let mut rec = self.inner.record.lock().unwrap();
        rec.status = status;
    }

    pub fn status_snapshot(&self) -> crate::channel::record::StatusSnapshot {
        self.inner.record.lock().unwrap().status
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.record.lock().unwrap().shutdown_requested
    }

    pub fn request_shutdown(&self) {
        let mut rec = self.inner.record.lock().unwrap();
        rec.shutdown_requested = true;
        drop(rec);
        self.inner.cmd_ready.notify_all();
        self.inner.resp_ready.notify_all();
    }
}
