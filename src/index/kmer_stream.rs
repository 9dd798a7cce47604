//! Streaming reader for a sharded k-mer table (`<root>.ktab` stub plus
//! `<root>.ktab.<p>` shard files, p = 1..nsqrt^2).
//!
//! Entries are `kbyte = hbyte + 2` bytes: the k-mer suffix beyond the
//! 12-base prefix (2 bits/base, high bits first), a 1-byte position count
//! (saturating at 255) and a 1-byte lcp with the previous entry.  The
//! 12-base prefix itself is carried by a per-shard run list in the shard
//! header; the stream replays it to expose the current prefix `cpre`.
//! Shard boundaries fall on fixed prefix-panel boundaries, so shard p of
//! both genomes' tables covers the same prefix range.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{index_file, open_err, read_i32, read_i64};
use crate::config::{PREFIX_BASES, PREFIX_BYTES};

/// Entries buffered per refill.
const KTAB_BLOCK: usize = 1024;

pub struct KmerStream {
    pub kmer: usize,
    pub nsqrt: usize,
    pub nthr: usize,
    pub minval: usize,
    pub hbyte: usize, // suffix bytes per entry
    pub kbyte: usize, // full entry width (suffix + count + lcp)
    pub nels: i64,
    pub neps: Vec<i64>, // cumulative entry count through each shard

    stub: PathBuf,
    shard_nels: Vec<i64>,
    head_len: Vec<u64>, // header bytes per shard (seek base for records)

    // Current position.
    pub cidx: i64,
    part: usize, // current shard, == nthr once exhausted
    file: Option<File>,
    bufr: Vec<u8>,
    bptr: usize, // entry index within the buffer
    btop: usize, // entries in the buffer
    shard_left: i64,

    // Prefix run list of the current shard.
    runs: Vec<(u32, i64)>,
    run_idx: usize,
    run_left: i64,
}

impl KmerStream {
    pub fn open(src: &Path) -> io::Result<KmerStream> {
        let stub = index_file(src, "ktab");
        let mut f = File::open(&stub).map_err(|_| open_err(&stub, "genome index"))?;

        let kmer = read_i32(&mut f)? as usize;
        let nsqrt = read_i32(&mut f)? as usize;
        let minval = read_i32(&mut f)? as usize;
        let ibyte = read_i32(&mut f)? as usize;
        if ibyte != PREFIX_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: unsupported prefix width {}", stub.display(), ibyte),
            ));
        }
        if kmer <= PREFIX_BASES || kmer > 255 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: bad k-mer size {}", stub.display(), kmer),
            ));
        }

        let hbyte = kmer.div_ceil(4) - PREFIX_BYTES;
        let kbyte = hbyte + 2;
        let nthr = nsqrt * nsqrt;

        let mut neps = Vec::with_capacity(nthr);
        let mut shard_nels = Vec::with_capacity(nthr);
        let mut head_len = Vec::with_capacity(nthr);
        let mut nels: i64 = 0;
        for p in 0..nthr {
            let path = shard_path(&stub, p);
            let mut sf = File::open(&path).map_err(|_| open_err(&path, "table part"))?;
            let skmer = read_i32(&mut sf)? as usize;
            let snels = read_i64(&mut sf)?;
            let npre = read_i64(&mut sf)?;
            if skmer != kmer {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: k-mer size does not match stub", path.display()),
                ));
            }
            let hdr = 4 + 8 + 8 + (npre as u64) * (PREFIX_BYTES as u64 + 8);
            let want = hdr + snels as u64 * kbyte as u64;
            let have = sf.metadata()?.len();
            if have != want {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: size {} does not match header ({})", path.display(), have, want),
                ));
            }
            nels += snels;
            neps.push(nels);
            shard_nels.push(snels);
            head_len.push(hdr);
        }

        let mut stream = KmerStream {
            kmer,
            nsqrt,
            nthr,
            minval,
            hbyte,
            kbyte,
            nels,
            neps,
            stub,
            shard_nels,
            head_len,
            cidx: 0,
            part: 0,
            file: None,
            bufr: vec![0u8; KTAB_BLOCK * kbyte],
            bptr: 0,
            btop: 0,
            shard_left: 0,
            runs: Vec::new(),
            run_idx: 0,
            run_left: 0,
        };
        stream.first()?;
        Ok(stream)
    }

    /// A fresh stream over the same table: own descriptors, own buffer.
    pub fn clone_stream(&self) -> io::Result<KmerStream> {
        KmerStream::open(&self.stub)
    }

    pub fn first(&mut self) -> io::Result<()> {
        self.goto_index(0)
    }

    fn open_shard(&mut self, p: usize) -> io::Result<File> {
        let path = shard_path(&self.stub, p);
        let mut f = File::open(&path).map_err(|_| open_err(&path, "table part"))?;
        read_i32(&mut f)?;
        read_i64(&mut f)?;
        let npre = read_i64(&mut f)?;
        self.runs.clear();
        let mut pre = [0u8; PREFIX_BYTES];
        for _ in 0..npre {
            f.read_exact(&mut pre)?;
            let cnt = read_i64(&mut f)?;
            // First base in the high bits: numeric prefix order equals
            // k-mer sort order.
            let v = ((pre[0] as u32) << 16) | ((pre[1] as u32) << 8) | (pre[2] as u32);
            self.runs.push((v, cnt));
        }
        Ok(f)
    }

    fn exhaust(&mut self) {
        self.part = self.nthr;
        self.file = None;
        self.bptr = 0;
        self.btop = 0;
        self.run_left = 0;
    }

    /// Refill the entry buffer, moving to the next non-empty shard when the
    /// current one is drained.
    fn refill(&mut self) -> io::Result<()> {
        while self.shard_left == 0 {
            let next = if self.file.is_none() { self.part } else { self.part + 1 };
            if next >= self.nthr {
                self.exhaust();
                return Ok(());
            }
            self.part = next;
            let f = self.open_shard(next)?;
            self.file = Some(f);
            self.shard_left = self.shard_nels[next];
            self.run_idx = 0;
            self.run_left = self.runs.first().map(|r| r.1).unwrap_or(0);
        }
        let n = (self.shard_left as usize).min(KTAB_BLOCK);
        if let Some(f) = &mut self.file {
            f.read_exact(&mut self.bufr[..n * self.kbyte])?;
        }
        self.bptr = 0;
        self.btop = n;
        self.shard_left -= n as i64;
        Ok(())
    }

    pub fn goto_index(&mut self, idx: i64) -> io::Result<()> {
        if idx >= self.nels {
            self.cidx = self.nels;
            self.exhaust();
            return Ok(());
        }
        let mut p = 0usize;
        while idx >= self.neps[p] {
            p += 1;
        }
        let rel = if p > 0 { idx - self.neps[p - 1] } else { idx };

        let mut f = self.open_shard(p)?;
        // Position the prefix run cursor at the rel'th entry of the shard.
        let mut acc: i64 = 0;
        self.run_idx = self.runs.len();
        self.run_left = 0;
        for (i, &(_, cnt)) in self.runs.iter().enumerate() {
            if acc + cnt > rel {
                self.run_idx = i;
                self.run_left = acc + cnt - rel;
                break;
            }
            acc += cnt;
        }
        f.seek(SeekFrom::Start(self.head_len[p] + rel as u64 * self.kbyte as u64))?;

        self.part = p;
        self.file = Some(f);
        self.shard_left = self.shard_nels[p] - rel;
        self.cidx = idx;
        self.bptr = 0;
        self.btop = 0;
        self.refill()
    }

    /// Advance one entry.  Safe past the end: the stream pins itself in the
    /// exhausted state (`cpre()` becomes `i64::MAX`).
    pub fn next_entry(&mut self) -> io::Result<()> {
        if self.part >= self.nthr {
            return Ok(());
        }
        self.cidx += 1;
        self.bptr += 1;
        self.run_left -= 1;
        if self.run_left == 0 {
            self.run_idx += 1;
            self.run_left = self.runs.get(self.run_idx).map(|r| r.1).unwrap_or(0);
        }
        if self.bptr >= self.btop {
            if self.cidx >= self.nels {
                self.exhaust();
                return Ok(());
            }
            self.refill()?;
        }
        Ok(())
    }

    /// The current entry's 12-base prefix as a 24-bit value, or `i64::MAX`
    /// once the stream is exhausted.
    #[inline]
    pub fn cpre(&self) -> i64 {
        if self.part >= self.nthr || self.run_idx >= self.runs.len() {
            i64::MAX
        } else {
            self.runs[self.run_idx].0 as i64
        }
    }

    /// Current entry bytes: suffix, count, lcp.
    #[inline]
    pub fn csuf(&self) -> &[u8] {
        let off = self.bptr * self.kbyte;
        &self.bufr[off..off + self.kbyte]
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.bufr[self.bptr * self.kbyte + self.hbyte] as usize
    }

    #[inline]
    pub fn lcp(&self) -> usize {
        self.bufr[self.bptr * self.kbyte + self.hbyte + 1] as usize
    }

    /// Cumulative entries before shard `s`.
    pub fn shard_start(&self, s: usize) -> i64 {
        if s == 0 {
            0
        } else {
            self.neps[s - 1]
        }
    }
}

fn shard_path(stub: &Path, p: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}", stub.display(), p + 1))
}
