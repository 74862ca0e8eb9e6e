//! Persistence of sample buffers to a fixed non-volatile region.
//!
//! The region holds a raw run of native-endian `f64` values with no header,
//! length, or checksum. Writers erase whole erase granules from the region
//! start, then program the packed samples padded to a whole program granule.
//! Both steps run inside a [`FlashFence`] so nothing else touches the array
//! while it is busy. Readers must supply the sample count themselves.

use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use crate::buffer::{AllocationError, SAMPLE_BYTES, SampleBuffer};

/// Default byte offset of the sample region (top 40 KiB of a 512 KiB array).
pub const SAMPLE_REGION_OFFSET: usize = 0x0007_6000;
/// Default size of the sample region.
pub const SAMPLE_REGION_SIZE: usize = 0xA000;
/// Upper bound on waiting for the fence before the write is considered stuck.
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_millis(0xFFFF_FFFF);
/// Stack staging area for programming; program granules must divide into it.
pub const PROGRAM_SCRATCH_BYTES: usize = 256;

/// Fixed span of the non-volatile array reserved for samples.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StorageRegion {
    pub offset: usize,
    pub size: usize,
}

impl StorageRegion {
    #[must_use]
    pub const fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// One past the last byte of the region.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Largest sample count the region can hold.
    #[must_use]
    pub const fn sample_capacity(&self) -> usize {
        self.size / SAMPLE_BYTES
    }

    /// Checks that `len` bytes starting at `offset` stay inside the region.
    pub fn check(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        let inside = offset >= self.offset
            && offset
                .checked_add(len)
                .is_some_and(|last| last <= self.end());
        if inside {
            Ok(())
        } else {
            Err(StorageError::OutOfRegion { offset, len })
        }
    }

    /// Verifies the region is erase-aligned and fits in `storage`.
    pub fn validate<S: NvStorage>(&self, storage: &S) -> Result<(), StorageError> {
        if self.offset % S::ERASE_GRANULE != 0 || self.size % S::ERASE_GRANULE != 0 {
            return Err(StorageError::Misaligned {
                offset: self.offset,
            });
        }
        if self.end() > storage.capacity() {
            return Err(StorageError::OutOfRegion {
                offset: self.offset,
                len: self.size,
            });
        }
        Ok(())
    }
}

impl Default for StorageRegion {
    fn default() -> Self {
        Self::new(SAMPLE_REGION_OFFSET, SAMPLE_REGION_SIZE)
    }
}

/// Contiguous run of erase granules.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EraseSpan {
    pub offset: usize,
    pub len: usize,
}

impl EraseSpan {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn granules(&self, granule: usize) -> usize {
        self.len / granule
    }
}

/// Erase span covering `byte_len` bytes from the start of `region`.
///
/// Rounds up to whole granules; a zero-length payload erases nothing.
#[must_use]
pub const fn erase_span(byte_len: usize, region: StorageRegion, granule: usize) -> EraseSpan {
    EraseSpan {
        offset: region.offset,
        len: byte_len.div_ceil(granule) * granule,
    }
}

/// Step of the write cycle that runs under the fence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FenceStage {
    Erase,
    Program,
}

impl fmt::Display for FenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FenceStage::Erase => f.write_str("erase"),
            FenceStage::Program => f.write_str("program"),
        }
    }
}

/// Failures surfaced by the storage layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageError {
    /// Offset or length not aligned to the required granule.
    Misaligned { offset: usize },
    /// Access would leave the region or the device.
    OutOfRegion { offset: usize, len: usize },
    EraseFailed,
    ProgramFailed,
    ReadFailed,
    /// The fence could not be acquired in time.
    FenceTimeout(FenceStage),
    /// Program granule larger than [`PROGRAM_SCRATCH_BYTES`].
    UnsupportedGranule { granule: usize },
    Allocation(AllocationError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Misaligned { offset } => write!(f, "misaligned access at {offset:#x}"),
            StorageError::OutOfRegion { offset, len } => {
                write!(f, "{len} bytes at {offset:#x} fall outside the region")
            }
            StorageError::EraseFailed => f.write_str("erase failed"),
            StorageError::ProgramFailed => f.write_str("program failed"),
            StorageError::ReadFailed => f.write_str("read failed"),
            StorageError::FenceTimeout(stage) => write!(f, "fence timeout during {stage}"),
            StorageError::UnsupportedGranule { granule } => {
                write!(f, "{granule}-byte program granule exceeds the staging area")
            }
            StorageError::Allocation(err) => err.fmt(f),
        }
    }
}

impl From<AllocationError> for StorageError {
    fn from(value: AllocationError) -> Self {
        StorageError::Allocation(value)
    }
}

/// Raw non-volatile array with erase-before-write semantics.
pub trait NvStorage {
    /// Smallest erasable unit in bytes.
    const ERASE_GRANULE: usize;
    /// Smallest programmable unit in bytes.
    const PROGRAM_GRANULE: usize;
    /// Value every byte holds after an erase.
    const ERASED_BYTE: u8 = 0xFF;

    /// Total addressable bytes.
    fn capacity(&self) -> usize;

    fn erase(&mut self, span: EraseSpan) -> Result<(), StorageError>;

    /// Programs `data` at `offset`; both must be program-granule aligned.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), StorageError>;
}

/// The fence could not be entered within the allotted time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FenceTimeout;

impl fmt::Display for FenceTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("flash fence timed out")
    }
}

/// Mutual exclusion around operations that make the array unreadable.
pub trait FlashFence {
    /// Runs `op` with every other accessor of the array held off.
    fn execute<R>(&mut self, timeout: Duration, op: impl FnOnce() -> R) -> Result<R, FenceTimeout>;
}

/// Fence for single-context callers that already hold the array exclusively.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExclusiveAccess;

impl FlashFence for ExclusiveAccess {
    fn execute<R>(&mut self, _: Duration, op: impl FnOnce() -> R) -> Result<R, FenceTimeout> {
        Ok(op())
    }
}

/// What to do when the fence times out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FencePolicy {
    /// Panic; the array state is unknown and execution cannot safely continue.
    Abort,
    /// Return [`StorageError::FenceTimeout`] to the caller.
    Report,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StorageConfig {
    pub region: StorageRegion,
    pub policy: FencePolicy,
    pub fence_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: StorageRegion::default(),
            policy: FencePolicy::Abort,
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
        }
    }
}

/// Summary of a completed write cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SaveReport {
    pub samples: usize,
    pub erased: EraseSpan,
    /// Bytes programmed including granule padding.
    pub programmed: usize,
}

/// Erase/program/read front end over one array.
pub struct StorageManager<S, F> {
    storage: S,
    fence: F,
    config: StorageConfig,
}

impl<S, F> StorageManager<S, F>
where
    S: NvStorage,
    F: FlashFence,
{
    pub fn new(storage: S, fence: F, config: StorageConfig) -> Self {
        Self {
            storage,
            fence,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn region(&self) -> StorageRegion {
        self.config.region
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn fence_mut(&mut self) -> &mut F {
        &mut self.fence
    }

    pub fn into_parts(self) -> (S, F) {
        (self.storage, self.fence)
    }

    /// Checks the configured region and the device granules once, at start-up.
    pub fn validate(&self) -> Result<(), StorageError> {
        scratch_len::<S>()?;
        self.config.region.validate(&self.storage)
    }

    /// Writes `buffer` to `region`: fenced erase, then fenced program.
    ///
    /// Samples are programmed straight from `buffer` through a stack staging
    /// area, so saving never allocates. Nothing is read back afterwards.
    ///
    /// # Panics
    ///
    /// Panics when the fence times out under [`FencePolicy::Abort`].
    pub fn save(
        &mut self,
        buffer: &SampleBuffer,
        region: StorageRegion,
    ) -> Result<SaveReport, StorageError> {
        let span = erase_span(buffer.byte_len(), region, S::ERASE_GRANULE);
        region.check(span.offset, span.len)?;

        let chunk = scratch_len::<S>()?;
        let programmed = buffer.byte_len().div_ceil(S::PROGRAM_GRANULE) * S::PROGRAM_GRANULE;
        region.check(region.offset, programmed)?;

        let report = SaveReport {
            samples: buffer.len(),
            erased: span,
            programmed,
        };
        if span.is_empty() {
            return Ok(report);
        }

        let policy = self.config.policy;
        let timeout = self.config.fence_timeout;
        fenced(&mut self.fence, policy, timeout, FenceStage::Erase, || {
            self.storage.erase(span)
        })??;
        fenced(&mut self.fence, policy, timeout, FenceStage::Program, || {
            program_streamed(&mut self.storage, region.offset, programmed, chunk, buffer)
        })??;

        Ok(report)
    }

    /// Rebuilds `count` samples from the start of `region`.
    ///
    /// Whatever bytes are present are returned as samples; nothing checks that
    /// a save ever completed. Only reads past the region are refused.
    pub fn load(
        &mut self,
        region: StorageRegion,
        count: usize,
    ) -> Result<SampleBuffer, StorageError> {
        let byte_len = count
            .checked_mul(SAMPLE_BYTES)
            .ok_or(StorageError::OutOfRegion {
                offset: region.offset,
                len: usize::MAX,
            })?;
        region.check(region.offset, byte_len)?;

        let mut buffer = SampleBuffer::with_capacity(count)?;
        let mut raw = [0u8; SAMPLE_BYTES];
        for index in 0..count {
            self.storage
                .read(region.offset + index * SAMPLE_BYTES, &mut raw)?;
            if buffer.push_ne_bytes(raw).is_err() {
                break;
            }
        }
        Ok(buffer.finish())
    }
}

/// Largest multiple of the program granule that fits the staging area.
fn scratch_len<S: NvStorage>() -> Result<usize, StorageError> {
    let granule = S::PROGRAM_GRANULE;
    if granule == 0 || granule > PROGRAM_SCRATCH_BYTES {
        return Err(StorageError::UnsupportedGranule { granule });
    }
    Ok(PROGRAM_SCRATCH_BYTES - PROGRAM_SCRATCH_BYTES % granule)
}

/// Programs `len` bytes at `offset`, taking samples from `buffer` and filling
/// the tail of the last granule with the erased value.
fn program_streamed<S: NvStorage>(
    storage: &mut S,
    offset: usize,
    len: usize,
    chunk: usize,
    buffer: &SampleBuffer,
) -> Result<(), StorageError> {
    let mut scratch = [S::ERASED_BYTE; PROGRAM_SCRATCH_BYTES];
    let mut bytes = buffer.ne_bytes();
    let mut written = 0;
    while written < len {
        let staged = &mut scratch[..chunk.min(len - written)];
        for slot in staged.iter_mut() {
            *slot = bytes.next().unwrap_or(S::ERASED_BYTE);
        }
        storage.program(offset + written, staged)?;
        written += staged.len();
    }
    Ok(())
}

fn fenced<F: FlashFence, R>(
    fence: &mut F,
    policy: FencePolicy,
    timeout: Duration,
    stage: FenceStage,
    op: impl FnOnce() -> R,
) -> Result<R, StorageError> {
    match fence.execute(timeout, op) {
        Ok(value) => Ok(value),
        Err(FenceTimeout) => match policy {
            FencePolicy::Abort => panic!("flash fence timed out during {stage}"),
            FencePolicy::Report => Err(StorageError::FenceTimeout(stage)),
        },
    }
}

/// RAM-backed NOR flash model.
///
/// Erase sets bytes to `0xFF`; programming can only clear bits, like the real
/// array, so writing over unerased data corrupts it the same way hardware does.
#[derive(Clone, Debug)]
pub struct MemoryStorage<const ERASE: usize = 2048, const PROGRAM: usize = 8> {
    bytes: Vec<u8>,
    erases: usize,
    programs: usize,
}

impl<const ERASE: usize, const PROGRAM: usize> MemoryStorage<ERASE, PROGRAM> {
    /// Fully erased array of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_contents(alloc::vec![0xFF; capacity])
    }

    /// Array preloaded with arbitrary contents.
    #[must_use]
    pub fn with_contents(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            erases: 0,
            programs: 0,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Granules erased since construction.
    #[must_use]
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Program calls since construction.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs
    }

    fn bounds(&self, offset: usize, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(offset..end),
            _ => Err(StorageError::OutOfRegion { offset, len }),
        }
    }
}

impl<const ERASE: usize, const PROGRAM: usize> NvStorage for MemoryStorage<ERASE, PROGRAM> {
    const ERASE_GRANULE: usize = ERASE;
    const PROGRAM_GRANULE: usize = PROGRAM;

    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn erase(&mut self, span: EraseSpan) -> Result<(), StorageError> {
        if span.offset % ERASE != 0 || span.len % ERASE != 0 {
            return Err(StorageError::Misaligned {
                offset: span.offset,
            });
        }
        let range = self.bounds(span.offset, span.len)?;
        self.bytes[range].fill(Self::ERASED_BYTE);
        self.erases += span.granules(ERASE);
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        if offset % PROGRAM != 0 || data.len() % PROGRAM != 0 {
            return Err(StorageError::Misaligned { offset });
        }
        let range = self.bounds(offset, data.len())?;
        for (cell, byte) in self.bytes[range].iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.programs += 1;
        Ok(())
    }

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), StorageError> {
        let range = self.bounds(offset, out.len())?;
        out.copy_from_slice(&self.bytes[range]);
        Ok(())
    }
}
