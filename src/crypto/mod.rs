//! Cryptography module - BLAKE3 hashing, Schnorr signatures, Merkle trees and SPV proofs

mod hash;
mod schnorr;
mod merkle;

pub use hash::*;
pub use schnorr::*;
pub use merkle::*;
