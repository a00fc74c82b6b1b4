//! Piece storage module
//!
//! In-memory tracking of piece and block acquisition with SHA1
//! verification. Persisting verified bytes to disk is a storage
//! collaborator's job, not part of the engine.

pub mod piece;

pub use piece::{Block, BlockRequest, Piece, PieceState, PieceStore, BLOCK_SIZE};
