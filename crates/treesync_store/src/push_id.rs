//! Time-ordered, collision-free child keys.
//!
//! A push id is 20 characters over a 64-symbol web-safe alphabet whose
//! ASCII order matches symbol order:
//!
//! - 8 characters encode the generation time in milliseconds
//! - 12 characters are random
//!
//! Ids generated within the same millisecond reuse the previous random
//! part incremented by one, so ids from one generator are unique and
//! sort in generation order.

use parking_lot::Mutex;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Alphabet in ascending ASCII order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Number of characters encoding the timestamp.
const TIME_CHARS: usize = 8;

/// Number of random characters.
const RANDOM_CHARS: usize = 12;

/// Length of a push id.
pub const PUSH_ID_LEN: usize = TIME_CHARS + RANDOM_CHARS;

#[derive(Debug, Default)]
struct PushState {
    started: bool,
    last_time: u64,
    last_random: [u8; RANDOM_CHARS],
}

/// Generates push ids.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<PushState>,
}

impl PushIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates an id for the current time.
    pub fn next_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.next_id_at(now)
    }

    /// Generates an id as if the clock read `millis`.
    ///
    /// A clock that moves backwards is clamped to the last time used.
    pub fn next_id_at(&self, millis: u64) -> String {
        let mut state = self.state.lock();
        let mut now = millis.max(state.last_time);

        if state.started && now == state.last_time {
            if !increment(&mut state.last_random) {
                // Random part exhausted within one millisecond.
                now += 1;
                randomize(&mut state.last_random);
            }
        } else {
            randomize(&mut state.last_random);
        }
        state.started = true;
        state.last_time = now;

        let mut id = [0u8; PUSH_ID_LEN];
        let mut time = now;
        for slot in id[..TIME_CHARS].iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        for (slot, &digit) in id[TIME_CHARS..].iter_mut().zip(state.last_random.iter()) {
            *slot = PUSH_CHARS[digit as usize];
        }

        id.iter().map(|&b| b as char).collect()
    }
}

fn randomize(digits: &mut [u8; RANDOM_CHARS]) {
    let mut rng = rand::thread_rng();
    for digit in digits.iter_mut() {
        *digit = rng.gen_range(0..64);
    }
}

/// Adds one to the base-64 number. Returns false on overflow.
fn increment(digits: &mut [u8; RANDOM_CHARS]) -> bool {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return true;
        }
    }
    false
}
