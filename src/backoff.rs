//! Randomized retry backoff.
//!
//! Spreads out retries after a contended exclusive-phase attempt so that
//! two or more contenders racing in lockstep don't just keep colliding on
//! the same instant forever. `rand`'s OS-seeded thread-local RNG is plenty
//! for this; nothing here needs to be cryptographically strong.

use std::time::Duration;

use rand::Rng;

/// Upper bound on backoff: about half a second.
pub(crate) const MAX_BACKOFF: Duration = Duration::from_micros(0x7_ffff);

/// Sleeps a uniformly random duration in `[0, max)`.
pub(crate) fn backoff_sleep(max: Duration) {
    let micros = (max.as_micros() as u64).max(1);
    let wait = rand::thread_rng().gen_range(0..micros);
    std::thread::sleep(Duration::from_micros(wait));
}
