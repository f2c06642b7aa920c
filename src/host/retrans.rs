use alloc::collections::BTreeMap;
use core::cmp;

use crate::config::{RETRANS_BACKOFF_CAP, RETRANS_MAX_DELAY};
use crate::time::{Duration, Instant};

/// Delay before the next firing of an entry that has been sent `turn`
/// times already.
pub(crate) fn retrans_delay(rto: Duration, turn: u32) -> Duration {
    cmp::min(
        rto << cmp::min(turn, RETRANS_BACKOFF_CAP),
        Duration::from_millis(RETRANS_MAX_DELAY),
    )
}

/// A transmitted segment waiting for acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetransEntry {
    pub flow: u32,
    pub offset: u64,
    pub len: usize,
    /// Number of retransmissions so far.
    pub turn: u32,
    pub deadline: Instant,
    /// When the segment was first transmitted.
    pub first_sent: Instant,
    seq: u64,
}

impl RetransEntry {
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// The retransmission table.
///
/// Entries are indexed twice: by `(flow, offset)` for acknowledgment
/// lookups, and by `(deadline, seq)` for the timeout sweep. The sequence
/// number makes entries with equal deadlines fire in insertion order.
#[derive(Debug, Default)]
pub(crate) struct RetransQueue {
    entries: BTreeMap<(u32, u64), RetransEntry>,
    schedule: BTreeMap<(Instant, u64), (u32, u64)>,
    next_seq: u64,
}

impl RetransQueue {
    pub fn new() -> RetransQueue {
        RetransQueue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, flow: u32, offset: u64) -> Option<&RetransEntry> {
        self.entries.get(&(flow, offset))
    }

    /// Track a segment that was just transmitted for the first time.
    pub fn insert(&mut self, flow: u32, offset: u64, len: usize, now: Instant, deadline: Instant) {
        self.remove(flow, offset);
        let seq = self.bump_seq();
        self.entries.insert(
            (flow, offset),
            RetransEntry {
                flow,
                offset,
                len,
                turn: 0,
                deadline,
                first_sent: now,
                seq,
            },
        );
        self.schedule.insert((deadline, seq), (flow, offset));
    }

    pub fn remove(&mut self, flow: u32, offset: u64) -> Option<RetransEntry> {
        let entry = self.entries.remove(&(flow, offset))?;
        self.schedule.remove(&(entry.deadline, entry.seq));
        Some(entry)
    }

    /// Remove every entry of `flow` lying entirely inside `[start, end)`,
    /// passing each to `f`. Returns the number of entries removed.
    pub fn remove_covered<F>(&mut self, flow: u32, start: u64, end: u64, mut f: F) -> usize
    where
        F: FnMut(&RetransEntry),
    {
        if start >= end {
            return 0;
        }
        let mut covered: heapless::Vec<u64, 32> = heapless::Vec::new();
        let mut count = 0;
        loop {
            covered.clear();
            for (_, entry) in self.entries.range((flow, start)..(flow, end)) {
                if entry.end() > end {
                    break;
                }
                if covered.push(entry.offset).is_err() {
                    break;
                }
            }
            if covered.is_empty() {
                return count;
            }
            for &offset in covered.iter() {
                if let Some(entry) = self.remove(flow, offset) {
                    f(&entry);
                    count += 1;
                }
            }
        }
    }

    /// Drop every entry of `flow`. Returns the number of entries removed.
    pub fn remove_flow(&mut self, flow: u32) -> usize {
        let offsets: alloc::vec::Vec<u64> = self
            .entries
            .range((flow, 0)..=(flow, u64::MAX))
            .map(|(&(_, offset), _)| offset)
            .collect();
        for &offset in offsets.iter() {
            self.remove(flow, offset);
        }
        offsets.len()
    }

    /// The lowest outstanding entry of `flow`.
    pub fn first_of_flow(&self, flow: u32) -> Option<&RetransEntry> {
        self.entries
            .range((flow, 0)..=(flow, u64::MAX))
            .next()
            .map(|(_, entry)| entry)
    }

    /// The earliest entry whose deadline is not after `now`.
    pub fn next_expired(&self, now: Instant) -> Option<RetransEntry> {
        let (&(deadline, _), key) = self.schedule.iter().next()?;
        if deadline > now {
            return None;
        }
        self.entries.get(key).copied()
    }

    /// Record a retransmission of the entry and schedule its next firing
    /// `delay` after `now`. Returns the new turn.
    pub fn rearm(&mut self, flow: u32, offset: u64, now: Instant, delay: Duration) -> Option<u32> {
        let seq = self.bump_seq();
        let entry = self.entries.get_mut(&(flow, offset))?;
        self.schedule.remove(&(entry.deadline, entry.seq));
        entry.turn += 1;
        entry.deadline = now + delay;
        entry.seq = seq;
        self.schedule.insert((entry.deadline, seq), (flow, offset));
        Some(entry.turn)
    }

    /// Pull the deadline of the entry to `now`, keeping its turn.
    pub fn reschedule_now(&mut self, flow: u32, offset: u64, now: Instant) -> bool {
        let seq = self.bump_seq();
        let Some(entry) = self.entries.get_mut(&(flow, offset)) else {
            return false;
        };
        if entry.deadline <= now {
            return true;
        }
        self.schedule.remove(&(entry.deadline, entry.seq));
        entry.deadline = now;
        entry.seq = seq;
        self.schedule.insert((now, seq), (flow, offset));
        true
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.schedule.keys().next().map(|&(deadline, _)| deadline)
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn at(millis: i64) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn test_delay_backoff() {
        let rto = Duration::from_millis(100);
        assert_eq!(retrans_delay(rto, 0), Duration::from_millis(100));
        assert_eq!(retrans_delay(rto, 1), Duration::from_millis(200));
        assert_eq!(retrans_delay(rto, 6), Duration::from_millis(6400));
        assert_eq!(retrans_delay(rto, 9), Duration::from_millis(6400));
        let rto = Duration::from_millis(1000);
        assert_eq!(retrans_delay(rto, 6), Duration::from_millis(30_000));
    }

    #[test]
    fn test_equal_deadlines_fire_in_order() {
        let mut queue = RetransQueue::new();
        queue.insert(2, 0, 10, at(0), at(100));
        queue.insert(1, 0, 10, at(0), at(100));
        queue.insert(1, 10, 10, at(0), at(50));

        assert_eq!(queue.next_expired(at(99)).map(|e| (e.flow, e.offset)), Some((1, 10)));
        queue.remove(1, 10);
        assert_eq!(queue.next_expired(at(99)), None);
        assert_eq!(queue.next_expired(at(100)).map(|e| e.flow), Some(2));
        queue.remove(2, 0);
        assert_eq!(queue.next_expired(at(100)).map(|e| e.flow), Some(1));
    }

    #[test]
    fn test_deadline_increases_with_each_firing() {
        let mut queue = RetransQueue::new();
        let rto = Duration::from_millis(100);
        queue.insert(1, 0, 10, at(0), at(100));

        let mut prev = at(100);
        let mut now = at(100);
        for expected_turn in 1..=8 {
            let entry = queue.next_expired(now).unwrap();
            let turn = queue
                .rearm(1, 0, now, retrans_delay(rto, entry.turn))
                .unwrap();
            assert_eq!(turn, expected_turn);
            let deadline = queue.get(1, 0).unwrap().deadline;
            assert!(deadline > prev);
            assert_eq!(queue.next_expired(now), None);
            prev = deadline;
            now = deadline;
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_covered() {
        let mut queue = RetransQueue::new();
        for i in 0..4u64 {
            queue.insert(1, i * 10, 10, at(0), at(100));
        }
        queue.insert(2, 0, 10, at(0), at(100));

        let mut removed = std::vec::Vec::new();
        // The range ends inside the entry at 20.
        let count = queue.remove_covered(1, 5, 25, |e| removed.push(e.offset));
        assert_eq!(count, 1);
        assert_eq!(removed, [10]);
        assert!(queue.get(1, 0).is_some());
        assert!(queue.get(1, 20).is_some());

        assert_eq!(queue.remove_covered(1, 0, 40, |_| ()), 3);
        assert!(queue.first_of_flow(1).is_none());
        assert!(queue.first_of_flow(2).is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_no_resurrection_after_removal() {
        let mut queue = RetransQueue::new();
        queue.insert(1, 0, 10, at(0), at(100));
        assert!(queue.remove(1, 0).is_some());
        assert_eq!(queue.remove_covered(1, 0, 10, |_| ()), 0);
        assert_eq!(queue.rearm(1, 0, at(100), Duration::from_millis(10)), None);
        assert!(!queue.reschedule_now(1, 0, at(100)));
        assert_eq!(queue.next_expired(at(1000)), None);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_remove_flow() {
        let mut queue = RetransQueue::new();
        queue.insert(1, 0, 10, at(0), at(100));
        queue.insert(1, 10, 10, at(0), at(110));
        queue.insert(3, 0, 10, at(0), at(120));
        assert_eq!(queue.remove_flow(1), 2);
        assert_eq!(queue.next_deadline(), Some(at(120)));
        assert_eq!(queue.first_of_flow(3).map(|e| e.offset), Some(0));
    }

    #[test]
    fn test_reschedule_now() {
        let mut queue = RetransQueue::new();
        queue.insert(1, 0, 10, at(0), at(500));
        queue.insert(1, 10, 10, at(0), at(400));
        assert!(queue.reschedule_now(1, 0, at(20)));
        let entry = queue.next_expired(at(20)).unwrap();
        assert_eq!((entry.offset, entry.turn), (0, 0));
    }
}
