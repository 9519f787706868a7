//! Growable typed buffers with power-of-two capacity growth.

use std::ops::{Deref, DerefMut};

use crate::gc::ObjRef;

use super::Var;

/// Smallest non-zero capacity a buffer grows to.
pub const MIN_CAPACITY: usize = 8;

/// A growable array whose capacity is always zero or a power of two.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer<T> {
    data: Vec<T>,
}

pub type ByteBuffer = Buffer<u8>;
pub type UintBuffer = Buffer<u32>;
pub type VarBuffer = Buffer<Var>;
pub type StringBuffer = Buffer<ObjRef>;
pub type ClosureBuffer = Buffer<ObjRef>;

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Buffer<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(size: usize) -> Self {
        let mut buffer = Self::new();
        buffer.reserve(size);
        buffer
    }

    /// Drop every element and release the storage.
    pub fn clear(&mut self) {
        self.data = Vec::new();
    }

    /// Make room for at least `size` elements in total.
    pub fn reserve(&mut self, size: usize) {
        if self.data.capacity() >= size {
            return;
        }
        let capacity = power_of_two_ceil(size.max(MIN_CAPACITY));
        self.data.reserve_exact(capacity - self.data.len());
    }

    pub fn write(&mut self, value: T) {
        self.reserve(self.data.len() + 1);
        self.data.push(value);
    }

    pub fn insert(&mut self, index: usize, value: T) {
        self.reserve(self.data.len() + 1);
        self.data.insert(index, value);
    }

    pub fn remove(&mut self, index: usize) -> T {
        self.data.remove(index)
    }

    pub fn pop(&mut self) -> Option<T> {
        self.data.pop()
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Clone> Buffer<T> {
    /// Append `count` copies of `value`.
    pub fn fill(&mut self, value: T, count: usize) {
        self.reserve(self.data.len() + count);
        self.data.extend(std::iter::repeat(value).take(count));
    }

    /// Append every element of `other`.
    pub fn concat(&mut self, other: &[T]) {
        self.reserve(self.data.len() + other.len());
        self.data.extend_from_slice(other);
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> From<Vec<T>> for Buffer<T> {
    fn from(data: Vec<T>) -> Self {
        let mut buffer = Self { data };
        let len = buffer.data.len();
        buffer.reserve(len);
        buffer
    }
}

impl<T> FromIterator<T> for Buffer<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

/// Smallest power of two that is `>= n` (and at least 1).
pub fn power_of_two_ceil(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_grows_in_powers_of_two() {
        let mut buffer = UintBuffer::new();
        assert_eq!(buffer.capacity(), 0);
        buffer.write(1);
        assert!(buffer.capacity() >= MIN_CAPACITY);
        for i in 0..9 {
            buffer.write(i);
        }
        assert_eq!(buffer.len(), 10);
        assert!(buffer.capacity() >= 16);
    }

    #[test]
    fn test_fill_and_concat() {
        let mut buffer = ByteBuffer::new();
        buffer.fill(b'a', 3);
        buffer.concat(b"bc");
        assert_eq!(buffer.as_slice(), b"aaabc");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn test_deref_gives_indexed_access() {
        let mut buffer: Buffer<i32> = vec![3, 1, 2].into();
        buffer[0] = 7;
        buffer.sort();
        assert_eq!(&buffer[..], &[1, 2, 7]);
    }
}
