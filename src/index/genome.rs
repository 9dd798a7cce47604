//! Assembly skeleton reader: `<root>.gdb` holds the contig directory,
//! `<root>.bps` the 2-bit packed bases (4 bases/byte, high bits first).
//! Contig sequences are loaded on demand; each search thread keeps its own
//! `BaseLoader` so it owns a private file offset.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{index_file, open_err, read_i32, read_i64};
use crate::bytes::get_base;

#[derive(Debug, Clone, Copy)]
pub struct ContigRec {
    pub rlen: i64,
    pub boff: i64,
}

pub struct Genome {
    pub nctg: usize,
    pub totlen: i64,
    pub maxlen: i64,
    pub contigs: Vec<ContigRec>,
    bps: PathBuf,
}

impl Genome {
    pub fn open(src: &Path) -> io::Result<Genome> {
        let gdb = index_file(src, "gdb");
        let mut f = File::open(&gdb).map_err(|_| open_err(&gdb, "assembly"))?;

        let nctg = read_i32(&mut f)? as usize;
        let totlen = read_i64(&mut f)?;
        let maxlen = read_i64(&mut f)?;
        let mut contigs = Vec::with_capacity(nctg);
        for _ in 0..nctg {
            let rlen = read_i64(&mut f)?;
            let boff = read_i64(&mut f)?;
            contigs.push(ContigRec { rlen, boff });
        }

        let bps = index_file(src, "bps");
        if !bps.is_file() {
            return Err(open_err(&bps, "assembly bases"));
        }
        Ok(Genome {
            nctg,
            totlen,
            maxlen,
            contigs,
            bps,
        })
    }

    /// A private handle on the base file for one thread.
    pub fn base_loader(&self) -> io::Result<BaseLoader> {
        let file = File::open(&self.bps).map_err(|_| open_err(&self.bps, "assembly bases"))?;
        Ok(BaseLoader {
            file,
            packed: Vec::new(),
        })
    }
}

pub struct BaseLoader {
    file: File,
    packed: Vec<u8>,
}

impl BaseLoader {
    /// Load contig `ctg` as base codes 0..4 into `out` (resized to rlen).
    pub fn load(&mut self, genome: &Genome, ctg: usize, out: &mut Vec<u8>) -> io::Result<()> {
        let rec = genome.contigs[ctg];
        let rlen = rec.rlen as usize;
        let nbytes = rlen.div_ceil(4);

        self.packed.resize(nbytes, 0);
        self.file.seek(SeekFrom::Start(rec.boff as u64))?;
        self.file.read_exact(&mut self.packed)?;

        out.resize(rlen, 0);
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = get_base(&self.packed, i);
        }
        Ok(())
    }
}

/// Reverse complement a base-code sequence in place.
pub fn complement_seq(seq: &mut [u8]) {
    seq.reverse();
    for b in seq.iter_mut() {
        *b ^= 0x3;
    }
}
