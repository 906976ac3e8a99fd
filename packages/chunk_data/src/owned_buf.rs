//! Exclusively owned numeric buffers that move between threads.

use std::{
    fmt::{self, Formatter, Debug},
    mem::take,
    ops::{
        Deref,
        DerefMut,
    },
};


/// Exclusively owned, fixed-length buffer.
///
/// Deliberately not `Clone`. Handing one to another thread (or to another pipeline stage) is a
/// move, and the only way to keep reading it afterwards is to take an explicit `duplicate`
/// first. `take` moves the contents out of a place and leaves it empty, for hand-offs out of a
/// borrowed struct.
#[derive(Default, PartialEq, Eq)]
pub struct OwnedBuf<T>(Box<[T]>);

impl<T> OwnedBuf<T> {
    /// Construct empty.
    pub fn empty() -> Self {
        OwnedBuf(Vec::new().into_boxed_slice())
    }

    pub fn from_vec(vec: Vec<T>) -> Self {
        OwnedBuf(vec.into_boxed_slice())
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0.into_vec()
    }

    /// Move the contents out, leaving this empty.
    pub fn take(&mut self) -> Self {
        OwnedBuf(take(&mut self.0))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.0
    }
}

impl<T: Clone> OwnedBuf<T> {
    /// Explicitly copy the buffer.
    pub fn duplicate(&self) -> Self {
        OwnedBuf(self.0.clone())
    }
}

impl<T: Clone + Default> OwnedBuf<T> {
    /// Construct with `len` default elements.
    pub fn zeroed(len: usize) -> Self {
        OwnedBuf(vec![T::default(); len].into_boxed_slice())
    }
}

impl<T> From<Vec<T>> for OwnedBuf<T> {
    fn from(vec: Vec<T>) -> Self {
        Self::from_vec(vec)
    }
}

impl<T> Deref for OwnedBuf<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> DerefMut for OwnedBuf<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

impl<T> Debug for OwnedBuf<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // contents can be megabytes
        write!(f, "OwnedBuf(len={})", self.0.len())
    }
}


#[test]
fn test_take_leaves_empty() {
    let mut a = OwnedBuf::from_vec(vec![1u32, 2, 3]);
    let b = a.take();
    assert!(a.is_empty());
    assert_eq!(b.as_slice(), &[1, 2, 3]);
}

#[test]
fn test_duplicate_is_independent() {
    let mut a = OwnedBuf::from_vec(vec![1u32, 2, 3]);
    let b = a.duplicate();
    a[0] = 9;
    assert_eq!(b[0], 1);
    assert_eq!(format!("{:?}", a), "OwnedBuf(len=3)");
}
