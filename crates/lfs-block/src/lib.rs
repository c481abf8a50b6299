#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! `BlockDevice` presents a byte region as a fixed array of 4096-byte
//! blocks with copying reads/writes and in-place views. The region
//! itself comes from an external provider (the CLI loads and flushes
//! image files; tests use plain vectors) through the `ByteRegion` seam.

use lfs_error::{LfsError, Result};
use lfs_types::{BLOCK_SIZE, BlockId};
use tracing::{debug, trace};

/// A fixed-size byte region backing a block device.
///
/// Implementors hand out the full image as contiguous bytes. Mutations
/// through `as_bytes_mut` must be visible to later `as_bytes` calls;
/// durability to persistent storage stays with the provider.
pub trait ByteRegion: Send {
    /// Total region length in bytes.
    fn len_bytes(&self) -> usize;

    /// Shared view of the whole region.
    fn as_bytes(&self) -> &[u8];

    /// Exclusive view of the whole region.
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

impl ByteRegion for Vec<u8> {
    fn len_bytes(&self) -> usize {
        self.len()
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl ByteRegion for Box<[u8]> {
    fn len_bytes(&self) -> usize {
        self.len()
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// Fixed array of `BLOCK_SIZE`-byte blocks over a byte region.
///
/// All accesses are range-checked; a view handed out by
/// `borrow_block` aliases the region directly, so mutations through it
/// and through `write_block` are equivalent.
#[derive(Debug)]
pub struct BlockDevice<R: ByteRegion> {
    region: R,
    block_count: u64,
}

impl<R: ByteRegion> BlockDevice<R> {
    /// Wrap a region. The capacity must be a non-zero exact multiple of
    /// the block size.
    pub fn new(region: R) -> Result<Self> {
        let len = region.len_bytes();
        if len == 0 || len % BLOCK_SIZE != 0 {
            return Err(LfsError::InvalidArgument(
                "region capacity must be a non-zero multiple of the block size",
            ));
        }
        let block_count = (len / BLOCK_SIZE) as u64;
        debug!(target: "lfs::block", blocks = block_count, "device attached");
        Ok(Self {
            region,
            block_count,
        })
    }

    /// Total number of blocks.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn check(&self, block: BlockId) -> Result<usize> {
        if block.0 >= self.block_count {
            return Err(LfsError::OutOfRange {
                kind: "block",
                index: block.0,
                limit: self.block_count,
            });
        }
        Ok(block.0 as usize * BLOCK_SIZE)
    }

    /// Copy block `block` into `dst`, which must be exactly one block
    /// long.
    pub fn read_block(&self, block: BlockId, dst: &mut [u8]) -> Result<()> {
        let offset = self.check(block)?;
        if dst.len() != BLOCK_SIZE {
            return Err(LfsError::InvalidArgument(
                "read buffer must be exactly one block",
            ));
        }
        dst.copy_from_slice(&self.region.as_bytes()[offset..offset + BLOCK_SIZE]);
        Ok(())
    }

    /// Copy `src`, which must be exactly one block long, into block
    /// `block`.
    pub fn write_block(&mut self, block: BlockId, src: &[u8]) -> Result<()> {
        let offset = self.check(block)?;
        if src.len() != BLOCK_SIZE {
            return Err(LfsError::InvalidArgument(
                "write buffer must be exactly one block",
            ));
        }
        self.region.as_bytes_mut()[offset..offset + BLOCK_SIZE].copy_from_slice(src);
        Ok(())
    }

    /// Shared in-place view of one block.
    pub fn block_view(&self, block: BlockId) -> Result<&[u8]> {
        let offset = self.check(block)?;
        Ok(&self.region.as_bytes()[offset..offset + BLOCK_SIZE])
    }

    /// Exclusive in-place view of one block.
    ///
    /// At most one such view is live at a time; the borrow checker
    /// enforces what the on-image format merely demands.
    pub fn borrow_block(&mut self, block: BlockId) -> Result<&mut [u8]> {
        let offset = self.check(block)?;
        Ok(&mut self.region.as_bytes_mut()[offset..offset + BLOCK_SIZE])
    }

    /// Zero the entire region. Used by the formatter before laying down
    /// metadata.
    pub fn wipe(&mut self) {
        trace!(target: "lfs::block", blocks = self.block_count, "wipe");
        self.region.as_bytes_mut().fill(0);
    }

    /// Hand the region back to the provider (for flushing, or to mount
    /// a fresh engine over the same image).
    #[must_use]
    pub fn into_region(self) -> R {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(blocks: usize) -> BlockDevice<Vec<u8>> {
        BlockDevice::new(vec![0_u8; blocks * BLOCK_SIZE]).expect("device")
    }

    #[test]
    fn rejects_unaligned_capacity() {
        assert!(BlockDevice::new(vec![0_u8; BLOCK_SIZE + 1]).is_err());
        assert!(BlockDevice::new(Vec::new()).is_err());
        assert!(BlockDevice::new(vec![0_u8; 3 * BLOCK_SIZE]).is_ok());
    }

    #[test]
    fn read_write_round_trip() {
        let mut dev = device(4);
        let mut block = vec![0_u8; BLOCK_SIZE];
        block[0] = 0xAB;
        block[BLOCK_SIZE - 1] = 0xCD;
        dev.write_block(BlockId(2), &block).unwrap();

        let mut out = vec![0_u8; BLOCK_SIZE];
        dev.read_block(BlockId(2), &mut out).unwrap();
        assert_eq!(out, block);

        // Neighbouring blocks stay untouched.
        dev.read_block(BlockId(1), &mut out).unwrap();
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut dev = device(2);
        let buf = vec![0_u8; BLOCK_SIZE];
        let err = dev.write_block(BlockId(2), &buf).unwrap_err();
        assert!(matches!(err, LfsError::OutOfRange { index: 2, .. }));

        let mut out = vec![0_u8; BLOCK_SIZE];
        assert!(dev.read_block(BlockId(9), &mut out).is_err());
        assert!(dev.borrow_block(BlockId(2)).is_err());
    }

    #[test]
    fn wrong_length_buffers_are_rejected() {
        let mut dev = device(1);
        let short = vec![0_u8; 16];
        assert!(matches!(
            dev.write_block(BlockId(0), &short),
            Err(LfsError::InvalidArgument(_))
        ));
        let mut short_out = vec![0_u8; 16];
        assert!(dev.read_block(BlockId(0), &mut short_out).is_err());
    }

    #[test]
    fn borrow_and_write_are_equivalent() {
        let mut dev = device(2);
        dev.borrow_block(BlockId(1)).unwrap()[7] = 0x5A;

        let mut out = vec![0_u8; BLOCK_SIZE];
        dev.read_block(BlockId(1), &mut out).unwrap();
        assert_eq!(out[7], 0x5A);

        // Same address across calls: a second borrow sees the byte.
        assert_eq!(dev.borrow_block(BlockId(1)).unwrap()[7], 0x5A);
        assert_eq!(dev.block_view(BlockId(1)).unwrap()[7], 0x5A);
    }

    #[test]
    fn wipe_clears_every_block() {
        let mut dev = device(3);
        dev.borrow_block(BlockId(0)).unwrap().fill(0xFF);
        dev.borrow_block(BlockId(2)).unwrap().fill(0xFF);
        dev.wipe();
        for b in 0..3 {
            assert!(dev.block_view(BlockId(b)).unwrap().iter().all(|x| *x == 0));
        }
    }

    #[test]
    fn region_survives_detach() {
        let mut dev = device(2);
        dev.borrow_block(BlockId(0)).unwrap()[0] = 1;
        let region = dev.into_region();
        assert_eq!(region[0], 1);

        let dev2 = BlockDevice::new(region).unwrap();
        assert_eq!(dev2.block_view(BlockId(0)).unwrap()[0], 1);
    }
}
