//! Offline push keys.
//!
//! Keys are 20 characters: 8 encode the creation time in milliseconds, 12
//! are random. They sort lexicographically in creation order, including keys
//! created within the same millisecond by one generator.

use chrono::Utc;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Generates chronologically sortable keys without a server round trip.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_millis: Option<i64>,
    last_random: [u8; RANDOM_CHARS],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a key stamped with the current time.
    pub fn next_id(&mut self) -> String {
        self.next_id_at(Utc::now().timestamp_millis())
    }

    /// Generates a key stamped with `millis` since the Unix epoch.
    pub fn next_id_at(&mut self, millis: i64) -> String {
        if self.last_millis == Some(millis) {
            self.increment_random();
        } else {
            self.last_millis = Some(millis);
            let entropy = uuid::Uuid::new_v4();
            for (slot, byte) in self.last_random.iter_mut().zip(entropy.as_bytes()) {
                *slot = byte % 64;
            }
        }

        let mut id = String::with_capacity(TIME_CHARS + RANDOM_CHARS);

        let mut time_chars = [0u8; TIME_CHARS];
        let mut remaining = millis.max(0) as u64;
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(
            self.last_random
                .iter()
                .map(|&index| PUSH_CHARS[index as usize] as char),
        );

        id
    }

    fn increment_random(&mut self) {
        for digit in self.last_random.iter_mut().rev() {
            if *digit == 63 {
                *digit = 0;
            } else {
                *digit += 1;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        let mut generator = PushIdGenerator::new();
        let id = generator.next_id();
        assert_eq!(id.len(), 20);
        assert!(id.bytes().all(|b| PUSH_CHARS.contains(&b)));
    }

    #[test]
    fn test_time_prefix() {
        let mut generator = PushIdGenerator::new();
        assert!(generator.next_id_at(0).starts_with("--------"));
        assert!(generator.next_id_at(65).starts_with("------00"));
    }

    #[test]
    fn test_same_millisecond_stays_sorted() {
        let mut generator = PushIdGenerator::new();
        let ids: Vec<String> = (0..50).map(|_| generator.next_id_at(1_700_000_000_000)).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        sorted.dedup();
        assert_eq!(sorted.len(), 50);
    }

    #[test]
    fn test_later_time_sorts_after() {
        let mut generator = PushIdGenerator::new();
        let first = generator.next_id_at(1_000);
        let second = generator.next_id_at(2_000);
        assert!(first < second);
    }
}
