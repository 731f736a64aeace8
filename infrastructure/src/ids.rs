use application::{Clock, RecordIdGenerator};
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// 36^7 ≈ 7.8e10 suffixes per millisecond. Collisions are unlikely, not impossible.
pub const SUFFIX_LEN: usize = 7;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Lowercase base36 suffix from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSuffixGenerator;

impl RecordIdGenerator for RandomSuffixGenerator {
    fn suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect()
    }
}
