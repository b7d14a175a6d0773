//! Bounded polling
//!
//! Hardware handshakes here have no completion interrupt; every wait is a
//! poll with a fixed iteration cap.

/// Result of one attempt inside a bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Finished.
    Success(T),
    /// Not there yet; try again if attempts remain.
    Retry,
    /// Gave up.
    TimedOut,
}

impl<T> Attempt<T> {
    /// True for [`Attempt::Success`].
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Run `step` up to `attempts` times until it stops asking to retry.
///
/// `step` receives the zero-based attempt number. Returns the last outcome:
/// `Success`, `TimedOut` if `step` gave up, or `TimedOut` once attempts run out.
pub fn bounded<T, E>(
    attempts: u32,
    mut step: impl FnMut(u32) -> Result<Attempt<T>, E>,
) -> Result<Attempt<T>, E> {
    for n in 0..attempts {
        match step(n)? {
            Attempt::Retry => {}
            done => return Ok(done),
        }
    }
    Ok(Attempt::TimedOut)
}
