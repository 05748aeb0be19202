//! Virtual address newtype.
//!
//! The spec's data model treats addresses as raw 64-bit values in the traced process's
//! address space (no shared-library relocation bookkeeping, per the Non-goals). A thin
//! newtype still buys `Display`/ordering without letting a `u64` offset or a register
//! number silently stand in for an address.

use std::fmt;
use std::ops::{Add, Sub};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub u64);

impl Address {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Address {
    fn from(v: u64) -> Self {
        Address(v)
    }
}

impl From<usize> for Address {
    fn from(v: usize) -> Self {
        Address(v as u64)
    }
}

impl From<Address> for u64 {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl From<Address> for usize {
    fn from(a: Address) -> Self {
        a.0 as usize
    }
}

impl Add<u64> for Address {
    type Output = Address;
    fn add(self, rhs: u64) -> Address {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address {
    type Output = Address;
    fn sub(self, rhs: u64) -> Address {
        Address(self.0.wrapping_sub(rhs))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
