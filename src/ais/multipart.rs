//! Reassembly of multi-sentence AIS payloads.
//!
//! Only one group is buffered at a time, keyed by fragment count, sequential
//! message id and radio channel.  Fragments must arrive in order; anything
//! else abandons the group in progress.

use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentKey {
    pub total:    u8,
    pub sequence: String,
    pub channel:  String,
}

#[derive(Debug)]
struct Pending {
    key:      FragmentKey,
    received: u8,
    payload:  String,
}

#[derive(Debug, Default)]
pub struct MultipartBuffer {
    pending: Option<Pending>,
}

impl MultipartBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add fragment `index` (1-based) of a group.  Returns the concatenated
    /// payload with the fill-bit count of the final fragment once the group
    /// is complete.
    pub fn push(
        &mut self,
        key: FragmentKey,
        index: u8,
        fragment: &str,
        fill_bits: usize,
    ) -> Option<(String, usize)> {
        if index == 1 {
            if let Some(old) = self.pending.take() {
                debug!(
                    "AIS: abandoning group seq={:?} after {}/{} fragments",
                    old.key.sequence, old.received, old.key.total
                );
            }
            self.pending = Some(Pending { key, received: 1, payload: fragment.to_string() });
        } else {
            match self.pending.as_mut() {
                Some(p) if p.key == key && p.received + 1 == index => {
                    p.payload.push_str(fragment);
                    p.received = index;
                }
                _ => {
                    debug!(
                        "AIS: dropping fragment {index}/{} seq={:?} ch={:?}",
                        key.total, key.sequence, key.channel
                    );
                    self.pending = None;
                    return None;
                }
            }
        }

        let complete = self
            .pending
            .as_ref()
            .is_some_and(|p| p.received == p.key.total);
        if complete {
            self.pending.take().map(|p| (p.payload, fill_bits))
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(total: u8, seq: &str, ch: &str) -> FragmentKey {
        FragmentKey { total, sequence: seq.into(), channel: ch.into() }
    }

    #[test]
    fn completes_in_order() {
        let mut buf = MultipartBuffer::new();
        assert_eq!(buf.push(key(3, "1", "A"), 1, "ab", 0), None);
        assert!(buf.is_pending());
        assert_eq!(buf.push(key(3, "1", "A"), 2, "cd", 0), None);
        assert_eq!(buf.push(key(3, "1", "A"), 3, "ef", 4), Some(("abcdef".into(), 4)));
        assert!(!buf.is_pending());
    }

    #[test]
    fn out_of_order_fragment_resets() {
        let mut buf = MultipartBuffer::new();
        buf.push(key(3, "1", "A"), 1, "ab", 0);
        assert_eq!(buf.push(key(3, "1", "A"), 3, "ef", 0), None);
        assert!(!buf.is_pending());
        // the late part 2 has nothing to attach to
        assert_eq!(buf.push(key(3, "1", "A"), 2, "cd", 0), None);
    }

    #[test]
    fn foreign_fragment_resets() {
        let mut buf = MultipartBuffer::new();
        buf.push(key(2, "1", "A"), 1, "ab", 0);
        assert_eq!(buf.push(key(2, "2", "A"), 2, "cd", 0), None);
        assert!(!buf.is_pending());

        buf.push(key(2, "1", "A"), 1, "ab", 0);
        assert_eq!(buf.push(key(2, "1", "B"), 2, "cd", 0), None);
        assert!(!buf.is_pending());
    }

    #[test]
    fn new_first_fragment_replaces_group() {
        let mut buf = MultipartBuffer::new();
        buf.push(key(2, "1", "A"), 1, "old", 0);
        buf.push(key(2, "2", "A"), 1, "new", 0);
        assert_eq!(buf.push(key(2, "2", "A"), 2, "er", 2), Some(("newer".into(), 2)));
    }
}
