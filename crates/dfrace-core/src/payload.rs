//! # Shared request payload
//!
//! An opaque, zero-initialized request buffer with a fixed header and a
//! variable-length tail. Exactly one header field is raced. That field is
//! only touched through word-sized atomic operations. Every other byte is
//! reached through bounds-checked accessors that refuse to overlap it and
//! go through relaxed byte atomics, so the payload can be shared freely
//! between threads. A multi-byte plain value written concurrently with a
//! read may be observed torn; ordering comes from the rendezvous, not here.

use std::alloc::{self, Layout};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::error::{HarnessError, Result};

/// Integer type of the raced field.
pub trait RaceWord: Copy + Eq + Debug + Send + Sync + 'static {
    const WIDTH: usize;

    /// # Safety
    /// `ptr` must be valid for `WIDTH` bytes and aligned to `WIDTH`.
    unsafe fn atomic_store(ptr: *mut u8, value: Self);

    /// # Safety
    /// Same as [`atomic_store`](Self::atomic_store).
    unsafe fn atomic_load(ptr: *const u8) -> Self;

    /// The field value describing `count` tail elements, if representable.
    fn from_count(count: usize) -> Option<Self>;

    fn as_u64(self) -> u64;
}

macro_rules! race_word {
    ($int:ty, $atomic:ty) => {
        impl RaceWord for $int {
            const WIDTH: usize = std::mem::size_of::<$int>();

            #[inline(always)]
            unsafe fn atomic_store(ptr: *mut u8, value: Self) {
                (*(ptr as *const $atomic)).store(value, Ordering::Relaxed);
            }

            #[inline(always)]
            unsafe fn atomic_load(ptr: *const u8) -> Self {
                (*(ptr as *const $atomic)).load(Ordering::Relaxed)
            }

            fn from_count(count: usize) -> Option<Self> {
                <$int>::try_from(count).ok()
            }

            fn as_u64(self) -> u64 {
                self as u64
            }
        }
    };
}

race_word!(u16, AtomicU16);
race_word!(u32, AtomicU32);
race_word!(u64, AtomicU64);

/// Shape of a request structure.
pub trait PayloadLayout: Send + Sync + 'static {
    type Word: RaceWord;

    /// Fixed header bytes before the tail.
    const HEADER_SIZE: usize;
    /// Bytes per tail element.
    const ELEMENT_SIZE: usize;
    /// Buffer alignment. Must be a power of two and at least `Word::WIDTH`.
    const ALIGN: usize;
    /// Byte offset of the raced field inside the header.
    const RACE_OFFSET: usize;
}

/// Widest [`Scalar`] in bytes.
pub const MAX_SCALAR: usize = 8;

/// Plain integers that may be read or written at arbitrary (non-raced) offsets.
pub trait Scalar: Copy {
    const SIZE: usize;

    /// Native-endian bytes in the first `SIZE` entries.
    fn to_raw(self) -> [u8; MAX_SCALAR];

    fn from_raw(raw: [u8; MAX_SCALAR]) -> Self;
}

macro_rules! scalar {
    ($($t:ty),*) => {
        $(impl Scalar for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline(always)]
            fn to_raw(self) -> [u8; MAX_SCALAR] {
                let mut raw = [0u8; MAX_SCALAR];
                raw[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
                raw
            }

            #[inline(always)]
            fn from_raw(raw: [u8; MAX_SCALAR]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$t>()];
                bytes.copy_from_slice(&raw[..Self::SIZE]);
                <$t>::from_ne_bytes(bytes)
            }
        })*
    };
}

scalar!(u8, u16, u32, u64, i32, i64);

/// Heap request buffer shared by the controller, the mutator and the target.
pub struct SharedPayload<L: PayloadLayout> {
    ptr: NonNull<u8>,
    layout: Layout,
    elements: usize,
    valid: L::Word,
    _layout: PhantomData<L>,
}

// Safety: after allocation every access is atomic. The raced word is only
// touched as a whole word, plain fields only as single bytes, and the two
// ranges never overlap, so no two accesses of different sizes share a byte.
unsafe impl<L: PayloadLayout> Send for SharedPayload<L> {}
unsafe impl<L: PayloadLayout> Sync for SharedPayload<L> {}

impl<L: PayloadLayout> SharedPayload<L> {
    /// Allocate a zeroed buffer for `elements` tail entries and store the
    /// element count into the raced field.
    pub fn new(elements: usize) -> Result<Self> {
        Self::check_layout()?;

        let valid = L::Word::from_count(elements).ok_or_else(|| {
            HarnessError::InvalidLayout(format!(
                "{} elements do not fit a {}-byte count field",
                elements,
                L::Word::WIDTH
            ))
        })?;

        let size = L::ELEMENT_SIZE
            .checked_mul(elements)
            .and_then(|tail| tail.checked_add(L::HEADER_SIZE))
            .ok_or(HarnessError::Alloc { size: usize::MAX })?;
        let layout =
            Layout::from_size_align(size, L::ALIGN).map_err(|_| HarnessError::Alloc { size })?;

        // Safety: HEADER_SIZE > 0 is enforced by check_layout, so size > 0.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(HarnessError::Alloc { size })?;

        let payload = Self {
            ptr,
            layout,
            elements,
            valid,
            _layout: PhantomData,
        };
        payload.reset();
        Ok(payload)
    }

    fn check_layout() -> Result<()> {
        let width = L::Word::WIDTH;
        if L::HEADER_SIZE == 0 {
            return Err(HarnessError::InvalidLayout("empty header".into()));
        }
        if L::RACE_OFFSET + width > L::HEADER_SIZE {
            return Err(HarnessError::InvalidLayout(format!(
                "race field at {}..{} is outside the {}-byte header",
                L::RACE_OFFSET,
                L::RACE_OFFSET + width,
                L::HEADER_SIZE
            )));
        }
        if L::RACE_OFFSET % width != 0 || L::ALIGN < width {
            return Err(HarnessError::InvalidLayout(format!(
                "race field at offset {} is not {}-byte aligned",
                L::RACE_OFFSET,
                width
            )));
        }
        Ok(())
    }

    /// Number of tail elements actually allocated.
    pub fn elements(&self) -> usize {
        self.elements
    }

    /// Total buffer size in bytes.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// The in-bounds value the controller restores after each attempt.
    pub fn valid_value(&self) -> L::Word {
        self.valid
    }

    /// Current raced field value.
    #[inline(always)]
    pub fn race_value(&self) -> L::Word {
        // Safety: offset/alignment validated in check_layout.
        unsafe { L::Word::atomic_load(self.ptr.as_ptr().add(L::RACE_OFFSET)) }
    }

    /// Overwrite the raced field and fence, so the store is ordered before
    /// any handshake transition that follows.
    #[inline(always)]
    pub fn store_race(&self, value: L::Word) {
        // Safety: offset/alignment validated in check_layout.
        unsafe { L::Word::atomic_store(self.ptr.as_ptr().add(L::RACE_OFFSET), value) };
        fence(Ordering::SeqCst);
    }

    /// Restore the raced field to its valid value.
    #[inline(always)]
    pub fn reset(&self) {
        self.store_race(self.valid);
    }

    /// Read a scalar at `offset`. `None` if out of bounds or overlapping the raced field.
    pub fn read<T: Scalar>(&self, offset: usize) -> Option<T> {
        if !self.plain_range_ok(offset, T::SIZE) {
            return None;
        }
        let mut raw = [0u8; MAX_SCALAR];
        for (i, b) in raw.iter_mut().take(T::SIZE).enumerate() {
            *b = self.byte(offset + i).load(Ordering::Relaxed);
        }
        Some(T::from_raw(raw))
    }

    /// Write a scalar at `offset`. Returns false if out of bounds or
    /// overlapping the raced field.
    pub fn write<T: Scalar>(&self, offset: usize, value: T) -> bool {
        if !self.plain_range_ok(offset, T::SIZE) {
            return false;
        }
        for (i, b) in value.to_raw().iter().take(T::SIZE).enumerate() {
            self.byte(offset + i).store(*b, Ordering::Relaxed);
        }
        true
    }

    /// Byte offset of tail element `index`.
    pub fn element_offset(&self, index: usize) -> usize {
        L::HEADER_SIZE + index * L::ELEMENT_SIZE
    }

    #[inline(always)]
    fn byte(&self, offset: usize) -> &AtomicU8 {
        debug_assert!(offset < self.layout.size());
        // Safety: callers bounds-check `offset`; AtomicU8 has alignment 1.
        unsafe { &*(self.ptr.as_ptr().add(offset) as *const AtomicU8) }
    }

    fn plain_range_ok(&self, offset: usize, size: usize) -> bool {
        let Some(end) = offset.checked_add(size) else {
            return false;
        };
        let race_start = L::RACE_OFFSET;
        let race_end = L::RACE_OFFSET + L::Word::WIDTH;
        end <= self.layout.size() && (end <= race_start || offset >= race_end)
    }
}

impl<L: PayloadLayout> Drop for SharedPayload<L> {
    fn drop(&mut self) {
        // Safety: allocated in `new` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl<L: PayloadLayout> Debug for SharedPayload<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPayload")
            .field("size", &self.size())
            .field("elements", &self.elements)
            .field("race", &self.race_value())
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tiny;
    impl PayloadLayout for Tiny {
        type Word = u16;
        const HEADER_SIZE: usize = 8;
        const ELEMENT_SIZE: usize = 4;
        const ALIGN: usize = 8;
        const RACE_OFFSET: usize = 2;
    }

    struct Misaligned;
    impl PayloadLayout for Misaligned {
        type Word = u32;
        const HEADER_SIZE: usize = 8;
        const ELEMENT_SIZE: usize = 4;
        const ALIGN: usize = 8;
        const RACE_OFFSET: usize = 2;
    }

    #[test]
    fn test_new_sets_valid_count() {
        let p = SharedPayload::<Tiny>::new(5).unwrap();
        assert_eq!(p.size(), 8 + 5 * 4);
        assert_eq!(p.race_value(), 5);
        assert_eq!(p.valid_value(), 5);
        assert_eq!(p.read::<u16>(0), Some(0));
    }

    #[test]
    fn test_store_and_reset() {
        let p = SharedPayload::<Tiny>::new(3).unwrap();
        p.store_race(0xffff);
        assert_eq!(p.race_value(), 0xffff);
        p.reset();
        assert_eq!(p.race_value(), 3);
    }

    #[test]
    fn test_plain_access_cannot_touch_race_field() {
        let p = SharedPayload::<Tiny>::new(1).unwrap();
        assert!(p.read::<u32>(0).is_none());
        assert!(p.read::<u16>(2).is_none());
        assert!(!p.write::<u8>(3, 1));
        assert!(p.write::<u32>(4, 0xdead_beef));
        assert_eq!(p.read::<u32>(4), Some(0xdead_beef));
        assert_eq!(p.race_value(), 1);
    }

    #[test]
    fn test_out_of_bounds_access_rejected() {
        let p = SharedPayload::<Tiny>::new(1).unwrap();
        assert!(p.read::<u32>(8).is_some());
        assert!(p.read::<u32>(9).is_none());
        assert!(p.read::<u64>(usize::MAX).is_none());
    }

    #[test]
    fn test_count_too_large_for_field() {
        let err = SharedPayload::<Tiny>::new(70_000).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidLayout(_)));
    }

    #[test]
    fn test_misaligned_race_field_rejected() {
        assert!(SharedPayload::<Misaligned>::new(1).is_err());
    }

    #[test]
    fn test_zero_elements() {
        let p = SharedPayload::<Tiny>::new(0).unwrap();
        assert_eq!(p.size(), 8);
        assert_eq!(p.race_value(), 0);
        assert_eq!(p.element_offset(0), 8);
    }

    #[test]
    fn test_scalar_bytes_are_native_endian() {
        let p = SharedPayload::<Tiny>::new(2).unwrap();
        assert!(p.write::<u32>(8, 0x0102_0304));
        assert_eq!(p.read::<u8>(8), Some(0x0102_0304u32.to_ne_bytes()[0]));
        assert!(p.write::<i64>(8, -2));
        assert_eq!(p.read::<i64>(8), Some(-2));
    }

    #[test]
    fn test_concurrent_plain_access_is_race_free() {
        // Every byte written is 0x01 or 0x02, so a torn read still only
        // contains those bytes (or the initial zeroes).
        let p = SharedPayload::<Tiny>::new(4).unwrap();
        let ones = u64::from_ne_bytes([1; 8]);
        let twos = u64::from_ne_bytes([2; 8]);

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    assert!(p.write::<u64>(8, ones));
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    assert!(p.write::<u64>(8, twos));
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    let v = p.read::<u64>(8).unwrap();
                    assert!(v.to_ne_bytes().iter().all(|b| *b <= 2));
                }
            });
        });

        let last = p.read::<u64>(8).unwrap().to_ne_bytes();
        assert!(last.iter().all(|b| *b == 1 || *b == 2));
        assert_eq!(p.race_value(), 4);
    }
}
