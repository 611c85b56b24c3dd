//! The real cross-process channel backend (spec.md §4.5, §6): a named
//! POSIX shared-memory object holding a [`ChannelRecord`] plus a
//! process-shared mutex and two process-shared condition variables, driven
//! directly through `libc` FFI.
//!
//! Grounded in the only repo in the retrieval pack that drives real POSIX
//! shared memory for a motor-control system
//! (`other_examples/RTS007-evo-core`, which pairs `nix`'s `mman`/`signal`
//! features with a direct `libc` dependency); this module talks to `libc`
//! directly because every call here operates on an uninitialized `repr(C)`
//! struct laid over the mapping, which `nix`'s owned-value wrappers don't
//! model.

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::ptr;

use tracing::{debug, warn};

use crate::channel::record::{ChannelRecord, MAX_PAYLOAD_WORDS};
use crate::error::DriverError;

/// The region layout: the channel record plus its own synchronization
/// primitives, all `repr(C)` so the layout is identical in every process
/// that maps it.
#[repr(C)]
struct Region {
    mutex: libc::pthread_mutex_t,
    cmd_ready: libc::pthread_cond_t,
    resp_ready: libc::pthread_cond_t,
    record: ChannelRecord,
}

/// A handle to a POSIX shared-memory channel. The owner (whoever called
/// [`PosixChannel::create`]) is responsible for calling
/// [`PosixChannel::destroy`]; peers that attached via
/// [`PosixChannel::open_existing`] should call [`PosixChannel::close`]
/// instead.
pub struct PosixChannel {
    name: CString,
    region: *mut Region,
    len: usize,
    owner: bool,
}

// SAFETY: `Region`'s fields are all process-shared primitives or plain
// data; every access goes through the process-shared mutex except the
// handle's own bookkeeping (`name`, `len`, `owner`), which is only ever
// touched by the thread holding this handle.
unsafe impl Send for PosixChannel {}

impl PosixChannel {
    /// Create (or re-create) the named shared-memory object and initialize
    /// its mutex, condition variables, and slot states.
    pub fn create(name: &str) -> Result<Self, DriverError> {
        let cname = CString::new(name).map_err(|_| DriverError::InvalidArgument {
            what: "shared-memory name must not contain NUL",
        })?;
        let len = std::mem::size_of::<Region>();

        // SAFETY: `shm_open` with O_CREAT|O_RDWR and a valid NUL-terminated
        // name; the returned fd is owned by this call and closed below.
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(DriverError::ResourceUnavailable {
                what: "shm_open failed",
            });
        }

        // SAFETY: `fd` was just returned by `shm_open` above and is valid.
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            unsafe { libc::close(fd) };
            return Err(DriverError::ResourceUnavailable {
                what: "ftruncate failed",
            });
        }

        let region = Self::map(fd, len)?;
        // SAFETY: `fd` is no longer needed once mapped.
        unsafe { libc::close(fd) };

        // SAFETY: `region` points at a freshly `mmap`ed, zero-initialized
        // page; initializing the mutex/condvars in place is the standard
        // POSIX process-shared setup sequence.
        unsafe { Self::init_primitives(region)? };

        debug!(name, "posix channel created");
        Ok(Self {
            name: cname,
            region,
            len,
            owner: true,
        })
    }

    /// Attach to an already-created channel by name.
    pub fn open_existing(name: &str) -> Result<Self, DriverError> {
        let cname = CString::new(name).map_err(|_| DriverError::InvalidArgument {
            what: "shared-memory name must not contain NUL",
        })?;
        let len = std::mem::size_of::<Region>();

        // SAFETY: `shm_open` without O_CREAT; fails if the object does not
        // already exist.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(DriverError::ResourceUnavailable {
                what: "shm_open (open_existing) failed",
            });
        }

        let region = Self::map(fd, len)?;
        // SAFETY: `fd` is no longer needed once mapped.
        unsafe { libc::close(fd) };

        Ok(Self {
            name: cname,
            region,
            len,
            owner: false,
        })
    }

    fn map(fd: libc::c_int, len: usize) -> Result<*mut Region, DriverError> {
        // SAFETY: `fd` refers to a shared-memory object at least `len`
        // bytes long (guaranteed by `create`'s prior `ftruncate`, or by the
        // original creator for `open_existing`).
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DriverError::ResourceUnavailable { what: "mmap failed" });
        }
        Ok(ptr as *mut Region)
    }

    /// # Safety
    /// `region` must point at `size_of::<Region>()` freshly-mapped,
    /// writable bytes not yet observed by any other thread/process.
    unsafe fn init_primitives(region: *mut Region) -> Result<(), DriverError> {
        let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        libc::pthread_mutexattr_init(mattr.as_mut_ptr());
        libc::pthread_mutexattr_setpshared(mattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        libc::pthread_mutex_init(ptr::addr_of_mut!((*region).mutex), mattr.as_ptr());
        libc::pthread_mutexattr_destroy(mattr.as_mut_ptr());

        let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        libc::pthread_condattr_init(cattr.as_mut_ptr());
        libc::pthread_condattr_setpshared(cattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED);
        libc::pthread_cond_init(ptr::addr_of_mut!((*region).cmd_ready), cattr.as_ptr());
        libc::pthread_cond_init(ptr::addr_of_mut!((*region).resp_ready), cattr.as_ptr());
        libc::pthread_condattr_destroy(cattr.as_mut_ptr());

        ptr::addr_of_mut!((*region).record).write(ChannelRecord::default());
        Ok(())
    }

    /// # Safety
    /// Must only be called while holding `self.region`'s mutex.
    unsafe fn record(&self) -> &mut ChannelRecord {
        &mut (*self.region).record
    }

    fn lock(&self) {
        // SAFETY: `self.region` is a valid mapping for the lifetime of
        // `self`.
        unsafe { libc::pthread_mutex_lock(ptr::addr_of_mut!((*self.region).mutex)) };
    }

    fn unlock(&self) {
        // SAFETY: see `lock`.
        unsafe { libc::pthread_mutex_unlock(ptr::addr_of_mut!((*self.region).mutex)) };
    }

    fn wait_cmd_ready(&self) {
        // SAFETY: caller holds the mutex; `pthread_cond_wait` atomically
        // releases it while waiting and reacquires it on wake.
        unsafe {
            libc::pthread_cond_wait(
                ptr::addr_of_mut!((*self.region).cmd_ready),
                ptr::addr_of_mut!((*self.region).mutex),
            );
        }
    }

    fn wait_resp_ready(&self) {
        unsafe {
            libc::pthread_cond_wait(
                ptr::addr_of_mut!((*self.region).resp_ready),
                ptr::addr_of_mut!((*self.region).mutex),
            );
        }
    }

    fn signal_cmd_ready(&self) {
        unsafe { libc::pthread_cond_signal(ptr::addr_of_mut!((*self.region).cmd_ready)) };
    }

    fn broadcast_resp_ready(&self) {
        unsafe { libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.region).resp_ready)) };
    }

    fn broadcast_both(&self) {
        unsafe {
            libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.region).cmd_ready));
            libc::pthread_cond_broadcast(ptr::addr_of_mut!((*self.region).resp_ready));
        }
    }

    pub fn send_command(&self, kind: u32, p1: i32, p2: i32) -> Result<(), DriverError> {
        self.lock();
        // SAFETY: mutex held.
        while unsafe { self.record() }.command_pending {
            self.wait_resp_ready();
        }
        let rec = unsafe { self.record() };
        rec.command_kind = kind;
        rec.command_p1 = p1;
        rec.command_p2 = p2;
        rec.command_pending = true;
        rec.response_ready = false;
        self.signal_cmd_ready();
        self.unlock();
        Ok(())
    }

    pub fn get_command(&self) -> Result<(u32, i32, i32), DriverError> {
        self.lock();
        loop {
            let rec = unsafe { self.record() };
            if rec.command_pending {
                let out = (rec.command_kind, rec.command_p1, rec.command_p2);
                self.unlock();
                return Ok(out);
            }
            if rec.shutdown_requested {
                self.unlock();
                return Err(DriverError::Shutdown);
            }
            self.wait_cmd_ready();
        }
    }

    pub fn try_get_command(&self) -> Result<Option<(u32, i32, i32)>, DriverError> {
        self.lock();
        let rec = unsafe { self.record() };
        let result = if rec.shutdown_requested {
            Err(DriverError::Shutdown)
        } else if rec.command_pending {
            Ok(Some((rec.command_kind, rec.command_p1, rec.command_p2)))
        } else {
            Ok(None)
        };
        self.unlock();
        result
    }

    pub fn send_response(&self, status: u32, data: &[i32], n: usize) -> Result<(), DriverError> {
        self.lock();
        let rec = unsafe { self.record() };
        let n = n.min(MAX_PAYLOAD_WORDS).min(data.len());
        rec.response_data[..n].copy_from_slice(&data[..n]);
        rec.response_len = n as u32;
        rec.response_status = status;
        rec.command_pending = false;
        rec.response_ready = true;
        self.broadcast_resp_ready();
        self.unlock();
        Ok(())
    }

    pub fn wait_response(&self) -> Result<(u32, Vec<i32>), DriverError> {
        self.lock();
        while !unsafe { self.record() }.response_ready {
            self.wait_resp_ready();
        }
        let rec = unsafe { self.record() };
        let n = rec.response_len as usize;
        let data = rec.response_data[..n].to_vec();
        let status = rec.response_status;
        rec.response_ready = false;
        self.broadcast_resp_ready();
        self.unlock();
        Ok((status, data))
    }

    pub fn update_status(&self, status: crate::channel::record::StatusSnapshot) {
        self.lock();
        unsafe { self.record() }.status = status;
        self.unlock();
    }

    pub fn status_snapshot(&self) -> crate::channel::record::StatusSnapshot {
        self.lock();
        let snap = unsafe { self.record() }.status;
        self.unlock();
        snap
    }

    pub fn is_shutdown_requested(&self) -> bool {
        if self.region.is_null() {
            return true;
        }
        self.lock();
        let v = unsafe { self.record() }.shutdown_requested;
        self.unlock();
        v
    }

    pub fn request_shutdown(&self) {
        self.lock();
        unsafe { self.record() }.shutdown_requested = true;
        self.broadcast_both();
        self.unlock();
    }

    /// Detach without releasing the OS resource.
    pub fn close(self) {
        // Drop handles the unmap; nothing else to do.
    }

    /// Destroy the synchronization primitives and unlink the shared-memory
    /// object. Owner-only.
    pub fn destroy(mut self) -> Result<(), DriverError> {
        if !self.owner {
            return Err(DriverError::Precondition {
                what: "destroy is owner-only; peers should call close",
            });
        }
        // SAFETY: no other thread/process should be using the channel at
        // destroy time; this mirrors the teardown half of `create`.
        unsafe {
            libc::pthread_mutex_destroy(ptr::addr_of_mut!((*self.region).mutex));
            libc::pthread_cond_destroy(ptr::addr_of_mut!((*self.region).cmd_ready));
            libc::pthread_cond_destroy(ptr::addr_of_mut!((*self.region).resp_ready));
        }
        let name = self.name.clone();
        self.unmap();
        // SAFETY: `name` is the same NUL-terminated name passed to
        // `shm_open` in `create`.
        let rc = unsafe { libc::shm_unlink(name.as_ptr()) };
        if rc != 0 {
            warn!("shm_unlink failed during destroy");
        }
        self.region = ptr::null_mut();
        Ok(())
    }

    fn unmap(&mut self) {
        if !self.region.is_null() {
            // SAFETY: `self.region`/`self.len` describe the mapping made
            // in `create`/`open_existing`.
            unsafe { libc::munmap(self.region as *mut libc::c_void, self.len) };
            self.region = ptr::null_mut();
        }
    }
}

impl Drop for PosixChannel {
    fn drop(&mut self) {
        self.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::record::StatusSnapshot;

    /// Exercises the real POSIX path end-to-end within a single process
    /// (one thread as owner/controller, one as worker), matching scenario
    /// 7 of spec.md §8.
    #[test]
    fn round_trip_within_one_process() {
        let name = "/motor_driver_shm_test_posix";
        let owner = PosixChannel::create(name).expect("create");
        let peer = PosixChannel::open_existing(name).expect("open_existing");

        let worker = std::thread::spawn(move || {
            let (kind, p1, p2) = peer.get_command().expect("get_command");
            assert_eq!((kind, p1, p2), (1, 3000, 0));
            peer.send_response(0, &[1, 2, 3, 4], 4).expect("send_response");
        });

        owner.send_command(1, 3000, 0).expect("send_command");
        let (status, data) = owner.wait_response().expect("wait_response");
        assert_eq!(status, 0);
        assert_eq!(data, vec![1, 2, 3, 4]);

        worker.join().unwrap();

        owner.update_status(StatusSnapshot {
            motor_state: 2,
            motor_speed: 5000,
            ..Default::default()
        });
        assert_eq!(owner.status_snapshot().motor_speed, 5000);

        owner.destroy().expect("destroy");
    }

    /// Testable property 8 (spec.md §8): `shutdown_requested` transitions
    /// false -> true monotonically, and a peer blocked in `get_command`
    /// across the shared mapping observes it and returns
    /// `DriverError::Shutdown`.
    #[test]
    fn request_shutdown_wakes_blocked_get_command() {
        let name = "/motor_driver_shm_test_posix_shutdown";
        let owner = PosixChannel::create(name).expect("create");
        let peer = PosixChannel::open_existing(name).expect("open_existing");
        assert!(!owner.is_shutdown_requested());

        let worker = std::thread::spawn(move || peer.get_command());
        std::thread::sleep(std::time::Duration::from_millis(20));
        owner.request_shutdown();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(DriverError::Shutdown)));
        assert!(owner.is_shutdown_requested());

        owner.destroy().expect("destroy");
    }
}
