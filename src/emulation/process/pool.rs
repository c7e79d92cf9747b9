//! A bounded pool of forked sessions.
//!
//! The pool owns an initialized template session and hands out forks of it.
//! Forking is copy-on-write, so a fresh session costs a page-table copy instead
//! of a full load, link and `JNI_OnLoad`. Each pooled session serves one caller
//! at a time; when every session is busy, [`SessionPool::acquire`] blocks.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex},
};

use crate::{
    emulation::process::{Session, SessionState},
    Error, Result,
};

#[derive(Debug, Default)]
struct Slots {
    /// Healthy sessions waiting for a caller.
    idle: Vec<Session>,
    /// Sessions that exist, idle or handed out.
    live: usize,
}

/// Up to `capacity` sessions forked from a template.
///
/// # Example
///
/// ```rust,no_run
/// use droidemu::emulation::{Argument, SessionBuilder, SessionPool};
///
/// # fn main() -> droidemu::Result<()> {
/// let template = SessionBuilder::new().library_file("libnative.so").build()?;
/// let pool = SessionPool::new(template, 4)?;
///
/// std::thread::scope(|scope| {
///     for n in 0..8 {
///         let pool = &pool;
///         scope.spawn(move || -> droidemu::Result<u64> {
///             let mut session = pool.acquire()?;
///             session.invoke("work", &[Argument::Int(n)])
///         });
///     }
/// });
/// # Ok(())
/// # }
/// ```
pub struct SessionPool {
    template: Mutex<Session>,
    slots: Mutex<Slots>,
    available: Condvar,
    capacity: usize,
}

impl SessionPool {
    /// Creates a pool that forks up to `capacity` sessions from `template`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`], [`Error::SessionPoisoned`] or
    ///   [`Error::SessionClosed`] unless the template is initialized
    /// - [`Error::Error`] for a zero capacity
    pub fn new(template: Session, capacity: usize) -> Result<Self> {
        match template.state() {
            SessionState::Initialized => {}
            SessionState::Created => return Err(Error::NotInitialized),
            SessionState::Poisoned => return Err(Error::SessionPoisoned),
            SessionState::Closed => return Err(Error::SessionClosed),
        }
        if capacity == 0 {
            return Err(Error::Error("session pool capacity must be at least 1".to_string()));
        }
        Ok(Self {
            template: Mutex::new(template),
            slots: Mutex::new(Slots::default()),
            available: Condvar::new(),
            capacity,
        })
    }

    /// Maximum number of sessions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions currently waiting for a caller.
    pub fn idle(&self) -> usize {
        self.slots.lock().map(|slots| slots.idle.len()).unwrap_or(0)
    }

    /// Sessions currently alive, idle or in use.
    pub fn live(&self) -> usize {
        self.slots.lock().map(|slots| slots.live).unwrap_or(0)
    }

    /// Takes a session, forking a new one if the pool is below capacity and
    /// blocking until one is returned otherwise.
    ///
    /// # Errors
    ///
    /// - [`Error::LockError`] if a pool lock is poisoned
    /// - Every error of [`Session::fork`]
    pub fn acquire(&self) -> Result<PooledSession<'_>> {
        let mut slots = lock!(self.slots);
        loop {
            if let Some(session) = slots.idle.pop() {
                return Ok(PooledSession::new(self, session));
            }
            if slots.live < self.capacity {
                slots.live += 1;
                drop(slots);
                return match self.fork_template() {
                    Ok(session) => Ok(PooledSession::new(self, session)),
                    Err(error) => {
                        self.forget_one();
                        Err(error)
                    }
                };
            }
            slots = self.available.wait(slots).map_err(|_| Error::LockError)?;
        }
    }

    /// Takes a session only if one is idle or can be forked right away.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> Result<Option<PooledSession<'_>>> {
        let mut slots = lock!(self.slots);
        if let Some(session) = slots.idle.pop() {
            return Ok(Some(PooledSession::new(self, session)));
        }
        if slots.live >= self.capacity {
            return Ok(None);
        }
        slots.live += 1;
        drop(slots);
        match self.fork_template() {
            Ok(session) => Ok(Some(PooledSession::new(self, session))),
            Err(error) => {
                self.forget_one();
                Err(error)
            }
        }
    }

    fn fork_template(&self) -> Result<Session> {
        let mut template = lock!(self.template);
        let session = template.fork()?;
        log::debug!("session pool forked {}", template.name());
        Ok(session)
    }

    fn forget_one(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.live = slots.live.saturating_sub(1);
        }
        self.available.notify_one();
    }

    fn give_back(&self, session: Session) {
        if session.state() != SessionState::Initialized {
            log::debug!("discarding {:?} pooled session {}", session.state(), session.name());
            drop(session);
            self.forget_one();
            return;
        }
        if let Ok(mut slots) = self.slots.lock() {
            slots.idle.push(session);
        }
        self.available.notify_one();
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.capacity)
            .field("idle", &self.idle())
            .field("live", &self.live())
            .finish()
    }
}

/// A session borrowed from a [`SessionPool`].
///
/// Dereferences to [`Session`]. Dropping the guard returns a healthy session to
/// the pool; a poisoned one is discarded and replaced by a fresh fork on a later
/// [`acquire`](SessionPool::acquire).
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Session>,
}

impl<'a> PooledSession<'a> {
    fn new(pool: &'a SessionPool, session: Session) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Only `Drop` takes the session out.
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.give_back(session);
        }
    }
}

impl fmt::Debug for PooledSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledSession").field(&self.session).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{
        emulation::{process::Argument, EmulationConfig, SessionBuilder},
        test::control_image,
    };

    fn pool(capacity: usize) -> SessionPool {
        let template = SessionBuilder::new()
            .library(control_image())
            .config(EmulationConfig::testing())
            .build()
            .unwrap();
        SessionPool::new(template, capacity).unwrap()
    }

    #[test]
    fn test_reuses_sessions() {
        let pool = pool(2);
        {
            let mut session = pool.acquire().unwrap();
            assert_eq!(session.invoke("bump", &[Argument::Int(3)]).unwrap(), 3);
        }
        assert_eq!(pool.idle(), 1);
        let mut session = pool.acquire().unwrap();
        assert_eq!(session.invoke("bump", &[Argument::Int(3)]).unwrap(), 6);
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_replaces_poisoned_sessions() {
        let pool = pool(1);
        {
            let mut session = pool.acquire().unwrap();
            session.invoke("bump", &[Argument::Int(3)]).unwrap();
            assert!(session.invoke("null_deref", &[]).is_err());
        }
        assert_eq!(pool.live(), 0);
        let mut session = pool.acquire().unwrap();
        assert_eq!(session.invoke("bump", &[Argument::Int(1)]).unwrap(), 1);
    }

    #[test]
    fn test_try_acquire_at_capacity() {
        let pool = pool(1);
        let held = pool.acquire().unwrap();
        assert!(pool.try_acquire().unwrap().is_none());
        drop(held);
        assert!(pool.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_blocks_until_returned() {
        let pool = Arc::new(pool(2));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut session = pool.acquire().unwrap();
                    session.invoke("read_flag", &[]).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert!(pool.live() <= 2);
    }

    #[test]
    fn test_rejects_uninitialized_template() {
        let template = SessionBuilder::new()
            .library(control_image())
            .config(EmulationConfig::testing())
            .without_initialize()
            .build()
            .unwrap();
        assert!(matches!(SessionPool::new(template, 1), Err(Error::NotInitialized)));
    }
}
