//! # Component Storage
//!
//! Pre-allocated, dense, type-erased component columns.
//!
//! The storage uses a dense array strategy:
//! - Field columns hold `capacity * stride` bytes, allocated on first use
//! - Access is O(1) via record index
//! - Buffer columns keep one growable byte list per record slot

use bytemuck::Pod;

/// Dense storage for one single-value component type.
///
/// # Example
///
/// ```rust,ignore
/// let mut column = FieldColumn::new(4, 1_000);
/// column.write(0, &7u32.to_ne_bytes());
/// ```
pub struct FieldColumn {
    /// The dense byte array (`capacity * stride` bytes).
    data: Box<[u8]>,
    /// Size of one value.
    stride: usize,
}

impl FieldColumn {
    /// Creates a zero-filled column.
    ///
    /// # Arguments
    ///
    /// * `stride` - Size of one value in bytes
    /// * `capacity` - Number of record slots
    #[must_use]
    pub fn new(stride: usize, capacity: usize) -> Self {
        Self {
            data: vec![0u8; stride * capacity].into_boxed_slice(),
            stride,
        }
    }

    /// Size of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Reads the value bytes at a slot.
    #[inline]
    #[must_use]
    pub fn read(&self, index: usize) -> Option<&[u8]> {
        let start = index * self.stride;
        self.data.get(start..start + self.stride)
    }

    /// Overwrites the value bytes at a slot.
    ///
    /// # Returns
    ///
    /// `false` if the index is out of bounds or the size does not match.
    #[inline]
    pub fn write(&mut self, index: usize, bytes: &[u8]) -> bool {
        if bytes.len() != self.stride {
            return false;
        }
        let start = index * self.stride;
        match self.data.get_mut(start..start + self.stride) {
            Some(slot) => {
                slot.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Resets a slot to zero bytes.
    #[inline]
    pub fn reset(&mut self, index: usize) {
        let start = index * self.stride;
        if let Some(slot) = self.data.get_mut(start..start + self.stride) {
            slot.fill(0);
        }
    }
}

/// Per-record list of fixed-size elements, stored contiguously.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawBuffer {
    bytes: Vec<u8>,
}

impl RawBuffer {
    /// Wraps existing element bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Unwraps the element bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Read-only view with the given element stride.
    #[inline]
    #[must_use]
    pub fn view(&self, stride: usize) -> BufferView<'_> {
        BufferView::new(stride, &self.bytes)
    }

    /// Appends every element of `values`.
    ///
    /// With `unique`, elements already present (byte equality) are skipped,
    /// including duplicates within `values` itself.
    ///
    /// # Returns
    ///
    /// Number of elements actually appended.
    pub fn append(&mut self, stride: usize, values: &[u8], unique: bool) -> usize {
        if stride == 0 {
            return 0;
        }
        let mut appended = 0;
        for element in values.chunks_exact(stride) {
            if unique && self.position(stride, element).is_some() {
                continue;
            }
            self.bytes.extend_from_slice(element);
            appended += 1;
        }
        appended
    }

    /// Removes the first occurrence of each element of `values`, moving the
    /// last element into the freed position.
    ///
    /// # Returns
    ///
    /// Number of elements removed.
    pub fn swap_remove(&mut self, stride: usize, values: &[u8]) -> usize {
        if stride == 0 {
            return 0;
        }
        let mut removed = 0;
        for element in values.chunks_exact(stride) {
            let Some(index) = self.position(stride, element) else {
                continue;
            };
            let last = self.bytes.len() / stride - 1;
            if index != last {
                let (head, tail) = self.bytes.split_at_mut(last * stride);
                head[index * stride..(index + 1) * stride].copy_from_slice(&tail[..stride]);
            }
            self.bytes.truncate(last * stride);
            removed += 1;
        }
        removed
    }

    /// Replaces the entire contents.
    pub fn replace(&mut self, values: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(values);
    }

    /// Removes every element.
    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    fn position(&self, stride: usize, element: &[u8]) -> Option<usize> {
        self.bytes.chunks_exact(stride).position(|candidate| candidate == element)
    }
}

/// Borrowed view over a record buffer.
#[derive(Clone, Copy, Debug)]
pub struct BufferView<'a> {
    stride: usize,
    bytes: &'a [u8],
}

impl<'a> BufferView<'a> {
    /// Wraps raw element bytes.
    #[inline]
    #[must_use]
    pub const fn new(stride: usize, bytes: &'a [u8]) -> Self {
        Self { stride, bytes }
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.bytes.len() / self.stride
        }
    }

    /// Whether the buffer has no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of every element, in order.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Raw bytes of one element.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.stride;
        self.bytes.get(start..start + self.stride)
    }

    /// Decodes one element.
    ///
    /// Storage is byte-aligned, so elements are read unaligned.
    #[must_use]
    pub fn get<T: Pod>(&self, index: usize) -> Option<T> {
        if std::mem::size_of::<T>() != self.stride {
            return None;
        }
        self.element(index).map(bytemuck::pod_read_unaligned)
    }

    /// Decodes every element into a vector.
    #[must_use]
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        if std::mem::size_of::<T>() != self.stride || self.stride == 0 {
            return Vec::new();
        }
        self.bytes
            .chunks_exact(self.stride)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }
}
