//! Cooperative cancel/abort of an in-flight packet loop.
//!
//! A session starts together with the busy claim and lasts until the
//! operation has drained. Another thread requesting a cancel or abort raises
//! a flag and then waits for the session it targeted to end, so it returns
//! only once that operation has finished. Each session bumps a generation
//! counter on exit; a requester never waits on a later session. The packet
//! loop polls the flags at each buffer read.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use log::debug;

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    /// Let the MAC finish the command and deliver its remaining packets.
    Cancel,
    /// Stop now and discard whatever is still in flight.
    Abort,
}

#[derive(Debug, Default)]
struct Flags {
    should_cancel: bool,
    should_abort: bool,
    cancelled: bool,
    owner: Option<ThreadId>,
    generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CancelCoordinator {
    flags: Mutex<Flags>,
    ended: Condvar,
}

/// Held by the packet-processing thread for the duration of a cancellable operation.
pub(crate) struct Session<'a> {
    coordinator: &'a CancelCoordinator,
}

impl CancelCoordinator {
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `claim` and, if it succeeds, start a cancellable operation owned
    /// by the calling thread. Both happen under the flags lock so a request
    /// never sees the claim without the owner.
    pub(crate) fn begin<G>(&self, claim: impl FnOnce() -> Result<G>) -> Result<(Session<'_>, G)> {
        let mut flags = self.flags();
        let guard = claim()?;
        flags.owner = Some(thread::current().id());
        flags.should_cancel = false;
        flags.should_abort = false;
        flags.cancelled = false;
        Ok((Session { coordinator: self }, guard))
    }

    /// Request a cancel or abort from another thread and wait until the
    /// operation in flight has finished.
    pub(crate) fn request(&self, request: Request, operation: &'static str) -> Result<()> {
        let mut flags = self.flags();
        match flags.owner {
            None => {
                debug!("{}: no cancellable operation in flight", operation);
                return Ok(());
            }
            Some(owner) if owner == thread::current().id() => {
                return Err(Error::new(
                    ErrorKind::CurrentlyNotAllowed,
                    operation,
                    "cannot be called from the thread processing packets",
                ));
            }
            Some(_) => {}
        }
        match request {
            Request::Cancel => flags.should_cancel = true,
            Request::Abort => flags.should_abort = true,
        }

        let generation = flags.generation;
        while flags.generation == generation {
            flags = self
                .ended
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Request a graceful cancel from the packet-processing thread itself.
    pub(crate) fn request_cancel_from_owner(&self) {
        let mut flags = self.flags();
        if !flags.cancelled {
            flags.should_cancel = true;
        }
    }

    /// Take the pending request, if any. Abort wins over cancel, and a
    /// cancel is handed out at most once per session.
    pub(crate) fn take(&self) -> Option<Request> {
        let mut flags = self.flags();
        if flags.should_abort {
            flags.should_abort = false;
            flags.should_cancel = false;
            Some(Request::Abort)
        } else if flags.should_cancel {
            flags.should_cancel = false;
            (!flags.cancelled).then_some(Request::Cancel)
        } else {
            None
        }
    }

    pub(crate) fn mark_cancelled(&self) {
        self.flags().cancelled = true;
    }

    pub(crate) fn was_cancelled(&self) -> bool {
        self.flags().cancelled
    }

    #[cfg(test)]
    pub(crate) fn is_owner(&self) -> bool {
        self.flags().owner == Some(thread::current().id())
    }

    #[cfg(test)]
    pub(crate) fn raise(&self, request: Request) {
        let mut flags = self.flags();
        match request {
            Request::Cancel => flags.should_cancel = true,
            Request::Abort => flags.should_abort = true,
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let mut flags = self.coordinator.flags();
        flags.owner = None;
        flags.should_cancel = false;
        flags.should_abort = false;
        flags.generation = flags.generation.wrapping_add(1);
        drop(flags);
        self.coordinator.ended.notify_all();
    }
}
