use std::cmp;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

use crate::piece_table::{self, Backing, PieceTable};

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Storage-layer failure on the source or the edit log, propagated
    /// verbatim and never retried.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A piece's backing store yielded fewer bytes than the piece declares.
    /// Table correctness assumes every piece is fully retrievable, so this
    /// aborts the read instead of returning miscounted bytes.
    #[error("expected to read {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error(transparent)]
    Table(#[from] piece_table::Error),
    /// A write appended to the edit log but the table splice failed; logical
    /// length and table are out of sync and this instance is unusable.
    #[error("buffer poisoned: edit log and piece table are out of sync")]
    Poisoned,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(err) => err,
            Error::ShortRead { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            Error::Table(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            Error::Poisoned => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

/// An editing buffer over an immutable original document (`S`) and an
/// append-only edit log (`E`). Writes land at the cursor by appending bytes
/// to the edit log and splicing a piece referencing them into the table;
/// neither store is ever rewritten.
///
/// Seeking and writing go through the [`Seek`] and [`Write`] impls. Reading
/// is the inherent [`read`](Buffer::read): it always walks the whole document
/// from the head, independent of the cursor, which is why `Buffer` does not
/// implement [`Read`] (stream adapters expect a cursor-advancing reader).
///
/// The buffer owns both handles for its lifetime; dropping it releases them
/// on every exit path. Operations take `&mut self` since a seek-then-read on
/// the underlying handles is not atomic; sharing across threads requires an
/// external mutex.
#[derive(Debug)]
pub struct Buffer<S, E> {
    source: S,
    edits: E,
    table: PieceTable,
    len: u64,
    cursor: u64,
    poisoned: bool,
}

impl<S: Read + Seek, E: Read + Write + Seek> Buffer<S, E> {
    pub fn new(source: S, edits: E, original_len: u64) -> Self {
        Buffer {
            source,
            edits,
            table: PieceTable::new(original_len),
            len: original_len,
            cursor: 0,
            poisoned: false,
        }
    }

    /// Total logical length of the document.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor offset, always within `[0, len]`.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn guard(&self) -> Result<()> {
        if self.poisoned {
            Err(Error::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Copies the document from its beginning into `buf`, in piece order,
    /// until `buf` is full or the pieces are exhausted. Returns the count of
    /// bytes copied; a count smaller than `buf.len()` means the whole
    /// document fit. The cursor is not consulted or moved.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.guard()?;
        let mut filled = 0;
        for piece in self.table.iter() {
            if filled == buf.len() {
                break;
            }
            if piece.len() == 0 {
                // The pre-edit sentinel of an empty document.
                continue;
            }
            let want = cmp::min(piece.len(), (buf.len() - filled) as u64) as usize;
            let dst = &mut buf[filled..filled + want];
            match piece.backing() {
                Backing::Original => {
                    self.source.seek(SeekFrom::Start(piece.start()))?;
                    read_full(&mut self.source, dst)?;
                }
                Backing::EditLog => {
                    self.edits.seek(SeekFrom::Start(piece.start()))?;
                    read_full(&mut self.edits, dst)?;
                }
            }
            filled += want;
        }
        Ok(filled)
    }

    /// Reads the whole document into a fresh vector.
    pub fn contents(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0; self.len as usize];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

impl Buffer<File, File> {
    /// Opens `path` read-only as the original document and pairs it with an
    /// anonymous temporary file as the edit log. Both handles are owned by
    /// the buffer and released when it drops, construction errors included.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = File::open(path)?;
        let original_len = source.metadata()?.len();
        let edits = tempfile::tempfile()?;
        Ok(Buffer::new(source, edits, original_len))
    }
}

impl<S: Read + Seek, E: Read + Write + Seek> Seek for Buffer<S, E> {
    /// Moves the cursor, clamped to `[0, len]`. `Start` is absolute;
    /// `Current` and `End` both add their signed delta to the current cursor
    /// (end-relative movement is deliberately cursor-relative, matching
    /// forward/backward movement from the editing position).
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.guard().map_err(io::Error::from)?;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) | SeekFrom::End(delta) => {
                self.cursor as i128 + delta as i128
            }
        };
        self.cursor = cmp::min(cmp::max(target, 0), self.len as i128) as u64;
        Ok(self.cursor)
    }
}

impl<S: Read + Seek, E: Read + Write + Seek> Write for Buffer<S, E> {
    /// Appends `buf` to the edit log tail, splices a piece covering the
    /// appended range in at the cursor, and advances cursor and length by
    /// `buf.len()`. The original document is never touched and previously
    /// appended log ranges are never rewritten.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard().map_err(io::Error::from)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let start = self.edits.seek(SeekFrom::End(0))?;
        self.edits.write_all(buf)?;
        let len = buf.len() as u64;
        // The append cannot be rolled back; if the splice fails the length
        // and table disagree, so the instance is dead from here on.
        if let Err(err) = self.table.insert(self.cursor, Backing::EditLog, start, len) {
            self.poisoned = true;
            return Err(Error::from(err).into());
        }
        self.cursor += len;
        self.len += len;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.edits.flush()
    }
}

/// Fills `buf` completely from `r` or fails with `ShortRead`.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(Error::ShortRead {
                    expected: buf.len(),
                    got,
                })
            }
            Ok(n) => got += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn buffer_from(text: &[u8]) -> Buffer<Cursor<Vec<u8>>, Cursor<Vec<u8>>> {
        Buffer::new(
            Cursor::new(text.to_vec()),
            Cursor::new(Vec::new()),
            text.len() as u64,
        )
    }

    #[test]
    fn fresh_buffer_reads_back_the_original() {
        let mut buffer = buffer_from(b"hello world");
        assert_eq!(buffer.contents().unwrap(), b"hello world".as_ref());
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.cursor(), 0);
    }

    #[test]
    fn splices_writes_at_the_seek_position() {
        let cases: &[(&str, &str, u64, &str)] = &[
            ("hello world", " new", 5, "hello new world"),
            (
                "the quick brownjumps over the lazy dog",
                " fox ",
                15,
                "the quick brown fox jumps over the lazy dog",
            ),
        ];
        for &(initial, text, pos, expected) in cases {
            let mut buffer = buffer_from(initial.as_bytes());
            buffer.seek(SeekFrom::Start(pos)).unwrap();
            assert_eq!(buffer.write(text.as_bytes()).unwrap(), text.len());
            assert_eq!(buffer.cursor(), pos + text.len() as u64);
            assert_eq!(buffer.contents().unwrap(), expected.as_bytes());
            assert_eq!(buffer.len(), expected.len() as u64);
        }
    }

    #[test]
    fn two_writes_split_only_their_own_targets() {
        let mut buffer = buffer_from(b"0123456789");
        buffer.seek(SeekFrom::Start(3)).unwrap();
        buffer.write(b"AB").unwrap();
        assert_eq!(buffer.table.iter().count(), 3);

        buffer.seek(SeekFrom::Start(8)).unwrap();
        buffer.write(b"XY").unwrap();
        assert_eq!(buffer.table.iter().count(), 5);

        assert_eq!(buffer.contents().unwrap(), b"012AB345XY6789".as_ref());
    }

    #[test]
    fn seek_clamps_to_document_bounds() {
        let mut buffer = buffer_from(b"hello");
        assert_eq!(buffer.seek(SeekFrom::Start(99)).unwrap(), 5);
        assert_eq!(buffer.seek(SeekFrom::Current(-100)).unwrap(), 0);
        assert_eq!(buffer.seek(SeekFrom::Current(3)).unwrap(), 3);
        // End-relative deltas move from the cursor, not the document end.
        assert_eq!(buffer.seek(SeekFrom::End(1)).unwrap(), 4);
        assert_eq!(buffer.seek(SeekFrom::End(100)).unwrap(), 5);
    }

    #[test]
    fn read_reports_end_of_data_by_short_count() {
        let mut buffer = buffer_from(b"abcdef");
        let mut buf = [0u8; 16];
        let n = buffer.read(&mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..n], b"abcdef");

        // A smaller destination fills completely with the document prefix.
        let mut small = [0u8; 4];
        assert_eq!(buffer.read(&mut small).unwrap(), 4);
        assert_eq!(&small, b"abcd");
    }

    #[test]
    fn short_source_read_is_an_error() {
        // Declared length exceeds what the source can actually deliver.
        let mut buffer = Buffer::new(Cursor::new(b"abc".to_vec()), Cursor::new(Vec::new()), 10);
        let mut buf = [0u8; 10];
        match buffer.read(&mut buf) {
            Err(Error::ShortRead {
                expected: 10,
                got: 3,
            }) => {}
            other => panic!("expected short read failure, got {:?}", other),
        }
    }

    #[test]
    fn empty_original_accepts_writes() {
        let mut buffer = buffer_from(b"");
        assert_eq!(buffer.contents().unwrap(), Vec::<u8>::new());
        buffer.write(b"hi").unwrap();
        buffer.write(b"!").unwrap();
        assert_eq!(buffer.contents().unwrap(), b"hi!".as_ref());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn write_never_touches_the_source_and_only_appends_to_the_log() {
        let mut buffer = buffer_from(b"hello world");
        buffer.seek(SeekFrom::Start(5)).unwrap();
        buffer.write(b" new").unwrap();
        let log_after_first = buffer.edits.get_ref().clone();

        buffer.seek(SeekFrom::Start(0)).unwrap();
        buffer.write(b">> ").unwrap();

        assert_eq!(buffer.source.get_ref().as_slice(), b"hello world");
        assert!(buffer.edits.get_ref().starts_with(&log_after_first));
        assert_eq!(buffer.contents().unwrap(), b">> hello new world".as_ref());
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let mut buffer = buffer_from(b"abc");
        buffer.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(buffer.write(b"").unwrap(), 0);
        assert_eq!(buffer.cursor(), 1);
        assert_eq!(buffer.table.iter().count(), 1);
        assert_eq!(buffer.contents().unwrap(), b"abc".as_ref());
    }

    #[test]
    fn poisoned_buffer_refuses_operations_and_keeps_cursor() {
        let mut buffer = buffer_from(b"abc");
        buffer.seek(SeekFrom::Start(2)).unwrap();
        buffer.poisoned = true;

        assert!(buffer.write(b"x").is_err());
        assert!(buffer.seek(SeekFrom::Start(0)).is_err());
        assert!(matches!(buffer.read(&mut [0u8; 4]), Err(Error::Poisoned)));
        assert_eq!(buffer.cursor(), 2);
    }

    #[test]
    fn from_path_opens_source_and_scratch_log() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let mut buffer = Buffer::from_path(file.path()).unwrap();
        assert_eq!(buffer.len(), 11);
        buffer.seek(SeekFrom::Start(5)).unwrap();
        buffer.write(b" new").unwrap();
        buffer.flush().unwrap();
        assert_eq!(buffer.contents().unwrap(), b"hello new world".as_ref());
    }

    #[test]
    fn random_insert_sequences_match_a_reference_model() {
        for seed in 0..10u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let original: Vec<u8> = (0..rng.gen_range(0..64))
                .map(|_| rng.gen_range(b'a'..=b'z'))
                .collect();
            let mut model = original.clone();
            let mut buffer = buffer_from(&original);

            for _ in 0..32 {
                let offset = rng.gen_range(0..=model.len());
                let text: Vec<u8> = (0..rng.gen_range(1..=8))
                    .map(|_| rng.gen_range(b'A'..=b'Z'))
                    .collect();

                buffer.seek(SeekFrom::Start(offset as u64)).unwrap();
                buffer.write(&text).unwrap();

                let tail = model.split_off(offset);
                model.extend_from_slice(&text);
                model.extend(tail);

                assert_eq!(buffer.contents().unwrap(), model);
                assert_eq!(buffer.len(), model.len() as u64);
                assert_eq!(buffer.table.len(), buffer.len());
            }
        }
    }
}
