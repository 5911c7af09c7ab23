//! Fixed-capacity packet buffers
//!
//! A protocol encoder allocates a [`Packet`] sized for the unit it is about to
//! produce, writes into the unused suffix, commits what it wrote, and finally
//! freezes the used prefix into an immutable [`Bytes`] handle that can be
//! shared by the sequence log and every consumer without copying.
//!
//! ```text
//! +---------------------------+-----------------------+
//! | used (committed)          | unused (writable)     |
//! +---------------------------+-----------------------+
//! 0                      used_bytes              capacity
//! ```

use bytes::Bytes;

use crate::error::MediaError;

/// Owned byte buffer with a committed prefix and a free suffix
#[derive(Debug, Default)]
pub struct Packet {
    buf: Vec<u8>,
    used: usize,
}

impl Packet {
    /// Allocate a packet with the given capacity
    pub fn with_capacity(capacity: usize) -> Result<Self, MediaError> {
        let mut packet = Self::default();
        packet.allocate(capacity)?;
        Ok(packet)
    }

    /// Allocate a packet holding a copy of `data`, fully committed
    pub fn copy_from_slice(data: &[u8]) -> Result<Self, MediaError> {
        let mut packet = Self::with_capacity(data.len())?;
        packet.write(data)?;
        Ok(packet)
    }

    /// Replace the buffer with a fresh one of `capacity` bytes
    ///
    /// Any prior contents are discarded and `used_bytes` resets to zero.
    /// Allocation failure is reported, never aborts.
    pub fn allocate(&mut self, capacity: usize) -> Result<(), MediaError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| MediaError::AllocationFailed { capacity })?;
        buf.resize(capacity, 0);

        self.buf = buf;
        self.used = 0;
        Ok(())
    }

    /// Mark `n` more bytes of the unused view as written
    pub fn commit(&mut self, n: usize) -> Result<(), MediaError> {
        let available = self.remaining();
        if n > available {
            return Err(MediaError::CommitOverflow {
                requested: n,
                available,
            });
        }
        self.used += n;
        Ok(())
    }

    /// Copy `data` into the unused view and commit it
    pub fn write(&mut self, data: &[u8]) -> Result<(), MediaError> {
        let available = self.remaining();
        if data.len() > available {
            return Err(MediaError::CommitOverflow {
                requested: data.len(),
                available,
            });
        }
        self.unused_view()[..data.len()].copy_from_slice(data);
        self.commit(data.len())
    }

    /// Writable view of the free suffix
    pub fn unused_view(&mut self) -> &mut [u8] {
        &mut self.buf[self.used..]
    }

    /// Committed prefix
    pub fn used_view(&self) -> &[u8] {
        &self.buf[..self.used]
    }

    /// Entire buffer, committed or not
    pub fn whole_view(&self) -> &[u8] {
        &self.buf
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }

    /// Publish the committed prefix as an immutable, shareable handle
    pub fn freeze(mut self) -> Bytes {
        self.buf.truncate(self.used);
        Bytes::from(self.buf)
    }
}
