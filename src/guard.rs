//! Reference-counted ownership of one native camera handle.
//!
//! A [`ResourceGuard`] is the only owner of a [`NativeCamera`]. Consumers hold
//! [`BorrowToken`]s; the handle is closed exactly once, after a close has been
//! requested and the last token has been released.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::traits::{CameraError, CameraIdentity, NativeCamera, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Proof that a consumer holds a claim on a [`ResourceGuard`].
///
/// A token only entitles its holder to queue for the device; every native call
/// still takes the guard's execution lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BorrowToken {
    guard: u64,
    id: u64,
}

impl BorrowToken {
    /// Identifier of this token, unique within the process.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Outcome of [`ResourceGuard::request_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    /// The native handle has been released.
    Closed,
    /// The handle will be released when the last borrower lets go.
    Deferred,
}

#[derive(Debug, Default)]
struct GuardState {
    live: HashSet<u64>,
    close_requested: bool,
    closed: bool,
}

/// Lifecycle wrapper around one native camera handle.
pub struct ResourceGuard<C: NativeCamera> {
    id: u64,
    identity: CameraIdentity,
    state: Mutex<GuardState>,
    // Lock order: `handle` before `state`. Never hold `state` while waiting on `handle`.
    handle: Mutex<Option<C>>,
}

impl<C: NativeCamera> ResourceGuard<C> {
    /// Take ownership of an opened native handle.
    pub fn new(identity: CameraIdentity, handle: C) -> Self {
        Self {
            id: next_id(),
            identity,
            state: Mutex::new(GuardState::default()),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Identifier of this guard, unique within the process.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Device this guard belongs to.
    #[must_use]
    pub const fn identity(&self) -> CameraIdentity {
        self.identity
    }

    /// Number of outstanding borrow tokens.
    pub fn refcount(&self) -> usize {
        self.state().live.len()
    }

    /// Whether the native handle has been released.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Whether a close has been requested (it may still be pending).
    pub fn is_closing(&self) -> bool {
        self.state().close_requested
    }

    /// Register a new borrower.
    pub fn acquire(&self) -> Result<BorrowToken> {
        let mut state = self.state();
        if state.closed || state.close_requested {
            return Err(CameraError::DeviceClosed(self.identity));
        }

        let token = BorrowToken {
            guard: self.id,
            id: next_id(),
        };
        state.live.insert(token.id);
        debug!(identity = %self.identity, token = token.id, refcount = state.live.len(), "acquired");
        Ok(token)
    }

    /// Give back a borrow token, closing the handle if it was the last one after a close request.
    pub fn release(&self, token: &BorrowToken) -> Result<()> {
        if token.guard != self.id {
            return Err(CameraError::InvalidToken);
        }

        let mut state = self.state();
        if state.closed {
            return Err(CameraError::InvalidToken);
        }
        if !state.live.remove(&token.id) {
            warn!(identity = %self.identity, token = token.id, "token released twice");
            return Err(CameraError::RedundantOperation("release"));
        }
        debug!(identity = %self.identity, token = token.id, refcount = state.live.len(), "released");

        if state.live.is_empty() && state.close_requested {
            state.closed = true;
            drop(state);
            self.close_native();
        }
        Ok(())
    }

    /// Ask for the handle to be closed once nobody borrows it.
    pub fn request_close(&self) -> Result<CloseState> {
        let mut state = self.state();
        if state.closed || state.close_requested {
            warn!(identity = %self.identity, "close requested twice");
            return Err(CameraError::RedundantOperation("close"));
        }
        state.close_requested = true;

        if state.live.is_empty() {
            state.closed = true;
            drop(state);
            self.close_native();
            Ok(CloseState::Closed)
        } else {
            debug!(
                identity = %self.identity,
                refcount = state.live.len(),
                "close deferred until last release"
            );
            Ok(CloseState::Deferred)
        }
    }

    /// Run one native call with exclusive access to the handle.
    pub fn with_handle<T, F>(&self, token: &BorrowToken, call: F) -> Result<T>
    where
        F: FnOnce(&mut C) -> Result<T>,
    {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        self.check(token)?;
        let camera = handle
            .as_mut()
            .ok_or(CameraError::DeviceClosed(self.identity))?;
        call(camera)
    }

    fn check(&self, token: &BorrowToken) -> Result<()> {
        let state = self.state();
        if state.closed {
            return Err(CameraError::DeviceClosed(self.identity));
        }
        if token.guard != self.id || !state.live.contains(&token.id) {
            return Err(CameraError::InvalidToken);
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_native(&self) {
        let taken = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut camera) = taken {
            Self::shut(self.identity, &mut camera);
        }
    }

    fn shut(identity: CameraIdentity, camera: &mut C) {
        match camera.close() {
            Ok(()) => info!(identity = %identity, "device closed"),
            Err(err) => warn!(identity = %identity, error = %err, "device close failed"),
        }
    }
}

impl<C: NativeCamera> Drop for ResourceGuard<C> {
    fn drop(&mut self) {
        let taken = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut camera) = taken {
            debug!(identity = %self.identity, "guard dropped while open");
            Self::shut(self.identity, &mut camera);
        }
    }
}
