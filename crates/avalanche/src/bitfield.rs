//! Wrapper types around Bitvec.
//!
//! `Msb0` keeps the in-memory order equal to the wire order: bit 0 is the
//! most significant bit of the first byte.
use bitvec::prelude::*;

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait BitfieldExt {
    /// A cleared bitfield with one bit per piece.
    fn from_piece(pieces: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; pieces]
    }

    /// Build from wire bytes, truncating or extending to `pieces` bits.
    fn from_wire(bytes: &[u8], pieces: usize) -> Bitfield {
        let mut b = Bitfield::from_slice(bytes);
        b.resize(pieces, false);
        b
    }

    /// Bytes ready to be sent, with the padding bits cleared.
    fn to_wire(&self) -> Vec<u8>;

    /// Indices of the bits that are set.
    fn pieces(&self) -> Vec<usize>;
}

impl BitfieldExt for Bitfield {
    fn to_wire(&self) -> Vec<u8> {
        let mut b = self.clone();
        b.set_uninitialized(false);
        b.into_vec()
    }

    fn pieces(&self) -> Vec<usize> {
        self.iter_ones().collect()
    }
}
