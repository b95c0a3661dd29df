use smallvec::{smallvec, SmallVec};
use thiserror::Error;

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("offset {offset} is out of range (document length {len})")]
    OffsetOutOfRange { offset: u64, len: u64 },
}

/// Which byte store a piece's range points into: the read-only original
/// document, or the append-only log of inserted bytes.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Backing {
    Original,
    EditLog,
}

/// Index of a piece in the table's arena. Pieces are never destroyed, so an
/// id stays valid for the lifetime of its table.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct PieceId(usize);

/// A contiguous byte range in one of the two backing stores, linked to its
/// document-order neighbors by arena index. A piece never owns or copies
/// bytes, only describes where they live.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Piece {
    backing: Backing,
    start: u64,
    len: u64,
    prev: Option<PieceId>,
    next: Option<PieceId>,
}

impl Piece {
    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Start offset within the backing store.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Re-partitions the piece's range at a local position `0 <= pos <= len`:
    /// `left` covers local `[0, pos)` and `right` covers `[pos, len)`, both
    /// referencing the same backing store. No bytes move. `pos == 0` or
    /// `pos == len` leaves one side empty; callers must not link an empty
    /// half into a table.
    ///
    /// `left` keeps the outgoing `prev` link and `right` the outgoing `next`
    /// link; the inner links are the splicer's job.
    pub fn split(&self, pos: u64) -> (Piece, Piece) {
        assert!(
            pos <= self.len,
            "split position {} beyond piece length {}",
            pos,
            self.len
        );
        let left = Piece {
            backing: self.backing,
            start: self.start,
            len: pos,
            prev: self.prev,
            next: None,
        };
        let right = Piece {
            backing: self.backing,
            start: self.start + pos,
            len: self.len - pos,
            prev: None,
            next: self.next,
        };
        (left, right)
    }
}

/// An ordered sequence of pieces whose concatenation is the current document.
///
/// Pieces live in a grow-only arena and link to each other by index, so
/// splicing in the middle never invalidates other pieces or their ids. The
/// table starts as a single piece spanning the whole original document and
/// only ever gains pieces; there is no delete operation.
#[derive(Debug)]
pub struct PieceTable {
    arena: SmallVec<[Piece; 16]>,
    head: PieceId,
}

impl PieceTable {
    pub fn new(original_len: u64) -> Self {
        // A zero-length original yields the one permitted empty piece, the
        // sentinel replaced outright by the first insert.
        let arena = smallvec![Piece {
            backing: Backing::Original,
            start: 0,
            len: original_len,
            prev: None,
            next: None,
        }];
        PieceTable {
            arena,
            head: PieceId(0),
        }
    }

    /// Walks the pieces in document order.
    pub fn iter(&self) -> Pieces<'_> {
        Pieces {
            table: self,
            next: Some(self.head),
        }
    }

    /// Total logical length: the sum of all piece lengths.
    pub fn len(&self) -> u64 {
        self.iter().map(Piece::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn piece(&self, id: PieceId) -> &Piece {
        &self.arena[id.0]
    }

    fn piece_mut(&mut self, id: PieceId) -> &mut Piece {
        &mut self.arena[id.0]
    }

    /// Finds the piece whose cumulative range `[cum, cum + len)` contains
    /// `offset`, returning its id and the local position within it. The scan
    /// stops at that piece regardless of what follows it. `offset` equal to
    /// the total length resolves to the last piece with a local position of
    /// its full length (an append).
    ///
    /// O(pieces), which grow with edit count rather than document size. An
    /// indexed structure (balanced tree over cumulative lengths) would make
    /// this O(log n) if edit counts ever warrant it.
    fn locate(&self, offset: u64) -> Result<(PieceId, u64)> {
        let mut cum = 0;
        let mut id = self.head;
        loop {
            let piece = self.piece(id);
            if offset < cum + piece.len {
                return Ok((id, offset - cum));
            }
            cum += piece.len;
            match piece.next {
                Some(next) => id = next,
                None => break,
            }
        }
        if offset == cum {
            return Ok((id, self.piece(id).len));
        }
        Err(Error::OffsetOutOfRange { offset, len: cum })
    }

    /// Splices a new piece covering `[start, start + len)` of `backing` into
    /// the document at `offset`, splitting at most one existing piece. Every
    /// piece other than the split one keeps its backing, start, and length.
    pub fn insert(&mut self, offset: u64, backing: Backing, start: u64, len: u64) -> Result<()> {
        debug_assert!(len > 0, "zero-length pieces are never linked in");

        // First edit of an empty document replaces the sentinel in place.
        if self.arena.len() == 1 && self.piece(self.head).len == 0 {
            if offset != 0 {
                return Err(Error::OffsetOutOfRange { offset, len: 0 });
            }
            let head = self.head;
            let sentinel = self.piece_mut(head);
            sentinel.backing = backing;
            sentinel.start = start;
            sentinel.len = len;
            return Ok(());
        }

        let (target, local) = self.locate(offset)?;
        let new_id = PieceId(self.arena.len());

        if local == 0 {
            // On a piece boundary; link in front of the located piece.
            let prev = self.piece(target).prev;
            self.arena.push(Piece {
                backing,
                start,
                len,
                prev,
                next: Some(target),
            });
            self.piece_mut(target).prev = Some(new_id);
            match prev {
                Some(prev) => self.piece_mut(prev).next = Some(new_id),
                None => self.head = new_id,
            }
        } else if local == self.piece(target).len {
            // Past the last piece; link after it.
            debug_assert!(self.piece(target).next.is_none());
            self.arena.push(Piece {
                backing,
                start,
                len,
                prev: Some(target),
                next: None,
            });
            self.piece_mut(target).next = Some(new_id);
        } else {
            // Mid-piece: the target keeps its id as the left half, so links
            // pointing at it from the front stay valid; the right half and
            // the inserted piece are fresh arena entries.
            let right_id = PieceId(self.arena.len() + 1);
            let (left, mut right) = self.piece(target).split(local);
            right.prev = Some(new_id);
            *self.piece_mut(target) = Piece {
                next: Some(new_id),
                ..left
            };
            self.arena.push(Piece {
                backing,
                start,
                len,
                prev: Some(target),
                next: Some(right_id),
            });
            self.arena.push(right);
            if let Some(after) = self.piece(right_id).next {
                self.piece_mut(after).prev = Some(right_id);
            }
        }

        Ok(())
    }
}

pub struct Pieces<'a> {
    table: &'a PieceTable,
    next: Option<PieceId>,
}

impl<'a> Iterator for Pieces<'a> {
    type Item = &'a Piece;

    fn next(&mut self) -> Option<&'a Piece> {
        let id = self.next?;
        let piece = self.table.piece(id);
        self.next = piece.next;
        Some(piece)
    }
}
