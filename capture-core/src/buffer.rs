//! Owned sample container passed between acquisition, persistence, and read-back.
//!
//! A [`SampleBuffer`] reserves its storage once, up front, and never grows past
//! that reservation. Buffers are move-only: whoever holds one owns the readings
//! and releases them by dropping it. An empty buffer never holds an allocation,
//! which keeps "no samples" and "no storage" the same state.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use core::fmt;

/// Width of one persisted sample in bytes.
pub const SAMPLE_BYTES: usize = core::mem::size_of::<f64>();

/// Reservation failure reported when the heap cannot provide the requested slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocationError {
    pub requested: usize,
}

impl AllocationError {
    #[must_use]
    pub const fn new(requested: usize) -> Self {
        Self { requested }
    }
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to reserve {} sample slots", self.requested)
    }
}

impl From<(usize, TryReserveError)> for AllocationError {
    fn from((requested, _): (usize, TryReserveError)) -> Self {
        Self::new(requested)
    }
}

/// Returned by [`SampleBuffer::push`] once every reserved slot is in use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CapacityExhausted;

/// Owned, fixed-capacity run of readings in capture order.
///
/// `limit` is the slot count that was asked for. The allocator may hand back
/// more than that, so pushes are bounded by `limit`, never by `Vec::capacity`.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    values: Vec<f64>,
    limit: usize,
}

impl PartialEq for SampleBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl SampleBuffer {
    /// Buffer with no storage and no samples.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            values: Vec::new(),
            limit: 0,
        }
    }

    /// Reserves exactly `slots` entries.
    ///
    /// A zero-slot request returns [`SampleBuffer::empty`] without touching the
    /// allocator.
    pub fn with_capacity(slots: usize) -> Result<Self, AllocationError> {
        let mut values = Vec::new();
        if slots > 0 {
            values
                .try_reserve_exact(slots)
                .map_err(|err| AllocationError::from((slots, err)))?;
        }
        Ok(Self {
            values,
            limit: slots,
        })
    }

    /// Wraps an already-populated vector.
    #[must_use]
    pub fn from_vec(values: Vec<f64>) -> Self {
        let limit = values.len();
        let mut buffer = Self { values, limit };
        buffer.release_if_empty();
        buffer
    }

    /// Appends a reading without ever reallocating.
    pub fn push(&mut self, value: f64) -> Result<(), CapacityExhausted> {
        if self.values.len() >= self.limit {
            return Err(CapacityExhausted);
        }
        self.values.push(value);
        Ok(())
    }

    /// Appends a reading stored in the raw flash layout.
    pub fn push_ne_bytes(&mut self, raw: [u8; SAMPLE_BYTES]) -> Result<(), CapacityExhausted> {
        self.push(f64::from_ne_bytes(raw))
    }

    /// Number of valid readings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Slots reserved when the buffer was created.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Slots still available for [`push`](Self::push).
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.len())
    }

    /// Returns `true` when the buffer owns heap storage.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.values.capacity() > 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> core::slice::Iter<'_, f64> {
        self.values.iter()
    }

    /// Consumes the buffer, handing the readings to the caller.
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// Seals a capture: drops the reservation when nothing was recorded.
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.release_if_empty();
        self
    }

    /// Size of the persisted representation (`len × 8`).
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.values.len() * SAMPLE_BYTES
    }

    /// Raw native-endian layout written to flash: samples back to back, no
    /// header. Produced lazily so callers can stream it without a copy.
    pub fn ne_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.values.iter().flat_map(|value| value.to_ne_bytes())
    }

    fn release_if_empty(&mut self) {
        if self.values.is_empty() {
            self.values = Vec::new();
            self.limit = 0;
        }
    }
}

impl<'a> IntoIterator for &'a SampleBuffer {
    type Item = &'a f64;
    type IntoIter = core::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn zero_slot_request_does_not_allocate() {
        let buffer = SampleBuffer::with_capacity(0).expect("zero reservation");
        assert!(buffer.is_empty());
        assert!(!buffer.is_allocated());
    }

    #[test]
    fn push_stops_at_reserved_capacity() {
        let mut buffer = SampleBuffer::with_capacity(2).expect("reservation");
        assert_eq!(buffer.capacity(), 2);
        buffer.push(0.5).expect("first slot");
        buffer.push(1.5).expect("second slot");
        assert_eq!(buffer.push(2.5), Err(CapacityExhausted));
        assert_eq!(buffer.as_slice(), &[0.5, 1.5]);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn finish_releases_unused_reservation() {
        let buffer = SampleBuffer::with_capacity(16).expect("reservation");
        assert!(buffer.is_allocated());

        let sealed = buffer.finish();
        assert_eq!(sealed.len(), 0);
        assert!(!sealed.is_allocated());
    }

    #[test]
    fn finish_keeps_populated_storage() {
        let mut buffer = SampleBuffer::with_capacity(4).expect("reservation");
        buffer.push(3.3).expect("slot");
        let sealed = buffer.finish();
        assert_eq!(sealed.len(), 1);
        assert!(sealed.is_allocated());
    }

    #[test]
    fn raw_layout_is_packed_native_endian() {
        let buffer = SampleBuffer::from_vec(vec![1.0, -2.0]);
        let bytes: Vec<u8> = buffer.ne_bytes().collect();

        assert_eq!(bytes.len(), buffer.byte_len());
        assert_eq!(&bytes[..8], &1.0f64.to_ne_bytes());
        assert_eq!(&bytes[8..], &(-2.0f64).to_ne_bytes());
    }

    #[test]
    fn push_is_bounded_by_requested_slots_not_allocator_capacity() {
        let mut buffer = SampleBuffer::with_capacity(3).expect("reservation");
        // grow the backing vector past the request, as a generous allocator may
        buffer.values.reserve(64);
        assert!(buffer.values.capacity() > 3);

        for value in [0.1, 0.2, 0.3] {
            buffer.push(value).expect("reserved slot");
        }
        assert_eq!(buffer.push(0.4), Err(CapacityExhausted));
        assert_eq!(buffer.capacity(), 3);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn from_vec_has_no_spare_slots() {
        let mut buffer = SampleBuffer::from_vec(vec![1.0, 2.0]);
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(buffer.push(3.0), Err(CapacityExhausted));
    }
}
