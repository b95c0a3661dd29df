//! The editing buffer core of a minimal terminal text editor.
//!
//! A document being edited is represented as a piece table: an immutable
//! original byte store plus an append-only edit log, stitched together by an
//! ordered sequence of pieces whose concatenation is the current document.
//! Edits never rewrite either store; a write appends to the edit log and
//! splices one new piece in at the cursor. Rendering, input handling, and
//! file plumbing are the host editor's business; it drives a [`Buffer`]
//! through its read/write/seek contract.

pub mod buffer;
pub mod piece_table;

pub use self::buffer::{Buffer, Error};
pub use self::piece_table::{Backing, Piece, PieceId, PieceTable};
