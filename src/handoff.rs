//! Single-slot hand-off of converted frames between a producer and one consumer.
//!
//! The slot holds exactly one buffer and one ownership bit. The producer may
//! only write while it owns the slot; the consumer may only read while it owns
//! the slot. A frame offered while the consumer still holds the previous one
//! is dropped, never queued.

/// Side that currently owns the converted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Capture/convert step; may overwrite the buffer.
    Producer,
    /// Reader; may look at the buffer until it releases it.
    Consumer,
}

/// Outcome of offering a new frame to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Buffer was filled and ownership moved to the consumer.
    Published,
    /// Consumer still owns the previous buffer; the new frame was discarded.
    Dropped,
}

/// One converted buffer plus its ownership flag.
#[derive(Debug)]
pub struct FrameSlot {
    buffer: Vec<u8>,
    owner: Owner,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    /// Empty slot owned by the producer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            owner: Owner::Producer,
        }
    }

    /// Current owner.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        self.owner
    }

    /// Fill the buffer with `len` bytes via `fill` and hand it to the consumer.
    ///
    /// Returns `Dropped` without calling `fill` while the consumer owns the
    /// slot. If `fill` fails the producer keeps ownership.
    pub fn produce<F, E>(&mut self, len: usize, fill: F) -> Result<Handoff, E>
    where
        F: FnOnce(&mut [u8]) -> Result<(), E>,
    {
        if self.owner == Owner::Consumer {
            return Ok(Handoff::Dropped);
        }

        self.buffer.resize(len, 0);
        fill(&mut self.buffer)?;
        self.owner = Owner::Consumer;
        Ok(Handoff::Published)
    }

    /// The buffer, if the consumer owns it.
    #[must_use]
    pub fn claim(&self) -> Option<&[u8]> {
        match self.owner {
            Owner::Consumer => Some(&self.buffer),
            Owner::Producer => None,
        }
    }

    /// Give the buffer back to the producer. Contents are left untouched.
    pub fn release(&mut self) {
        self.owner = Owner::Producer;
    }

    /// The buffer regardless of owner.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(slot: &mut FrameSlot, value: u8) -> Handoff {
        slot.produce(4, |buf| {
            buf.fill(value);
            Ok::<(), ()>(())
        })
        .expect("fill never fails here")
    }

    #[test]
    fn test_new_slot_is_producer_owned() {
        let slot = FrameSlot::new();
        assert_eq!(slot.owner(), Owner::Producer);
        assert!(slot.claim().is_none());
    }

    #[test]
    fn test_publish_moves_ownership() {
        let mut slot = FrameSlot::new();
        assert_eq!(publish(&mut slot, 7), Handoff::Published);
        assert_eq!(slot.owner(), Owner::Consumer);
        assert_eq!(slot.claim(), Some(&[7u8, 7, 7, 7][..]));
    }

    #[test]
    fn test_unclaimed_frame_keeps_oldest() {
        let mut slot = FrameSlot::new();
        publish(&mut slot, 1);
        assert_eq!(publish(&mut slot, 2), Handoff::Dropped);
        assert_eq!(slot.claim(), Some(&[1u8, 1, 1, 1][..]));
    }

    #[test]
    fn test_dropped_frame_does_not_run_fill() {
        let mut slot = FrameSlot::new();
        publish(&mut slot, 1);
        let mut called = false;
        let outcome = slot
            .produce(4, |_| {
                called = true;
                Ok::<(), ()>(())
            })
            .expect("no error");
        assert_eq!(outcome, Handoff::Dropped);
        assert!(!called);
    }

    #[test]
    fn test_release_keeps_contents() {
        let mut slot = FrameSlot::new();
        publish(&mut slot, 9);
        slot.release();
        assert_eq!(slot.owner(), Owner::Producer);
        assert!(slot.claim().is_none());
        assert_eq!(slot.contents(), &[9, 9, 9, 9]);
    }

    #[test]
    fn test_release_is_unconditional() {
        let mut slot = FrameSlot::new();
        slot.release();
        assert_eq!(slot.owner(), Owner::Producer);
        slot.release();
        assert_eq!(slot.owner(), Owner::Producer);
    }

    #[test]
    fn test_failed_fill_keeps_producer_ownership() {
        let mut slot = FrameSlot::new();
        let result = slot.produce(4, |_| Err("conversion failed"));
        assert_eq!(result, Err("conversion failed"));
        assert_eq!(slot.owner(), Owner::Producer);
        assert!(slot.claim().is_none());
    }
}
