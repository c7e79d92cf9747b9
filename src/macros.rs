/// Acquires a mutex, returning [`Error::LockError`](crate::Error::LockError)
/// from the enclosing function if the lock is poisoned.
///
/// ```rust, ignore
///  let mut slots = lock!(self.slots);
///  slots.live += 1;
/// ```
macro_rules! lock {
    ($mutex:expr) => {
        $mutex.lock().map_err(|_| $crate::Error::LockError)?
    };
}
