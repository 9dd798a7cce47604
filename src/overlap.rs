//! Local alignment records and the `.las` container.
//!
//! A `Path` holds one banded local alignment: coordinate ranges on both
//! contigs, the difference count, and a trace of interleaved
//! `[diffs, blen]` bytes, one pair per TSPACE segment of the A range.
//! An `Overlap` adds the contig pair and orientation flags.  On disk the
//! record is nine little-endian i32 fields followed by the trace bytes;
//! a `.las` file prefixes records with an i64 count (patched on close)
//! and the i32 trace spacing.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path as FsPath;

use crate::config::TSPACE;

/// B-contig is reverse-complement relative to A.
pub const COMP_FLAG: u32 = 0x1;
/// Transient mark used by the redundancy filter.
pub const ELIM_FLAG: u32 = 0x4;

/// Bytes of one overlap record on disk, excluding its trace.
pub const OVL_RECORD: usize = 9 * 4;

#[derive(Debug, Clone, Default)]
pub struct AlnPath {
    pub abpos: i32,
    pub bbpos: i32,
    pub aepos: i32,
    pub bepos: i32,
    pub diffs: i32,
    pub trace: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Overlap {
    pub path: AlnPath,
    pub flags: u32,
    pub aread: i32,
    pub bread: i32,
}

impl Overlap {
    pub fn disk_size(&self) -> usize {
        OVL_RECORD + self.path.trace.len()
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        let p = &self.path;
        let mut rec = [0u8; OVL_RECORD];
        let fields = [
            p.trace.len() as i32,
            p.diffs,
            p.abpos,
            p.bbpos,
            p.aepos,
            p.bepos,
            self.flags as i32,
            self.aread,
            self.bread,
        ];
        for (i, v) in fields.iter().enumerate() {
            rec[4 * i..4 * i + 4].copy_from_slice(&v.to_le_bytes());
        }
        w.write_all(&rec)?;
        w.write_all(&p.trace)
    }

    pub fn read(r: &mut impl Read) -> io::Result<Overlap> {
        let mut rec = [0u8; OVL_RECORD];
        r.read_exact(&mut rec)?;
        let f = |i: usize| i32::from_le_bytes([rec[4 * i], rec[4 * i + 1], rec[4 * i + 2], rec[4 * i + 3]]);
        let tlen = f(0) as usize;
        let mut trace = vec![0u8; tlen];
        r.read_exact(&mut trace)?;
        Ok(Overlap {
            path: AlnPath {
                diffs: f(1),
                abpos: f(2),
                bbpos: f(3),
                aepos: f(4),
                bepos: f(5),
                trace,
            },
            flags: f(6) as u32,
            aread: f(7),
            bread: f(8),
        })
    }
}

/// Writer for one `.las` shard; the record count in the header is patched
/// when the writer is finished.
pub struct LasWriter {
    file: File,
    nels: i64,
}

impl LasWriter {
    pub fn create(path: &FsPath) -> io::Result<LasWriter> {
        let mut file = File::create(path)?;
        file.write_all(&0i64.to_le_bytes())?;
        file.write_all(&TSPACE.to_le_bytes())?;
        Ok(LasWriter { file, nels: 0 })
    }

    pub fn write_overlap(&mut self, ovl: &Overlap) -> io::Result<()> {
        ovl.write(&mut self.file)?;
        self.nels += 1;
        Ok(())
    }

    pub fn nels(&self) -> i64 {
        self.nels
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.nels.to_le_bytes())?;
        self.file.sync_all()
    }
}

/// Read back a `.las` shard (used by the tests and the filter stage).
pub fn read_las(path: &FsPath) -> io::Result<Vec<Overlap>> {
    let mut file = File::open(path)?;
    let mut b8 = [0u8; 8];
    file.read_exact(&mut b8)?;
    let nels = i64::from_le_bytes(b8);
    let mut b4 = [0u8; 4];
    file.read_exact(&mut b4)?;
    let tspace = i32::from_le_bytes(b4);
    if tspace != TSPACE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: unexpected trace spacing {}", path.display(), tspace),
        ));
    }
    let mut ovls = Vec::with_capacity(nels.max(0) as usize);
    for _ in 0..nels {
        ovls.push(Overlap::read(&mut file)?);
    }
    Ok(ovls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn las_shard_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.las");

        let ovl = Overlap {
            path: AlnPath {
                abpos: 10,
                bbpos: 12,
                aepos: 310,
                bepos: 314,
                diffs: 3,
                trace: vec![1, 90, 2, 104, 0, 108],
            },
            flags: COMP_FLAG,
            aread: 4,
            bread: 7,
        };

        let mut w = LasWriter::create(&path).unwrap();
        w.write_overlap(&ovl).unwrap();
        w.finish().unwrap();

        let back = read_las(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].path.aepos, 310);
        assert_eq!(back[0].path.trace, ovl.path.trace);
        assert_eq!(back[0].flags, COMP_FLAG);
    }
}
