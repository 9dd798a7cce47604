//! Streaming reader for a sharded position list (`<root>.post` stub plus
//! `<root>.post.<p>` shard files).  Each entry is `pbyte + cbyte` bytes
//! little-endian: within-contig position in the low bytes, contig index in
//! the high bytes with the strand flag in the top bit.  Entries correspond
//! 1:1, in order, with the k-mer table's per-entry counts.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{index_file, open_err, read_i32, read_i64};
use crate::bytes::get_uint_le;

const POST_BLOCK: usize = 1024;

pub struct PostList {
    pub pbyte: usize, // position bytes
    pub cbyte: usize, // contig + sign bytes
    pub ebyte: usize, // full entry width
    pub nsqrt: usize,
    pub nthr: usize,
    pub maxp: i64, // largest prefix-panel entry count in the paired table
    pub freq: usize,
    pub nctg: usize,
    pub perm: Vec<usize>,
    pub nels: i64,
    pub neps: Vec<i64>,

    stub: PathBuf,
    shard_nels: Vec<i64>,

    pub cidx: i64,
    part: usize,
    file: Option<File>,
    bufr: Vec<u8>,
    bptr: usize,
    btop: usize,
    shard_left: i64,
}

const SHARD_HEADER: u64 = 4 + 4 + 8;

impl PostList {
    pub fn open(src: &Path) -> io::Result<PostList> {
        let stub = index_file(src, "post");
        let mut f = File::open(&stub).map_err(|_| open_err(&stub, "genome index"))?;

        let pbyte = read_i32(&mut f)? as usize;
        let cbyte = read_i32(&mut f)? as usize;
        let nsqrt = read_i32(&mut f)? as usize;
        let maxp = read_i64(&mut f)?;
        let freq = read_i32(&mut f)? as usize;
        let nctg = read_i32(&mut f)? as usize;
        let ebyte = pbyte + cbyte;
        if ebyte == 0 || ebyte > 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: bad post entry width {}", stub.display(), ebyte),
            ));
        }

        let mut perm = Vec::with_capacity(nctg);
        for _ in 0..nctg {
            perm.push(read_i32(&mut f)? as usize);
        }

        let nthr = nsqrt * nsqrt;
        let mut neps = Vec::with_capacity(nthr);
        let mut shard_nels = Vec::with_capacity(nthr);
        let mut nels: i64 = 0;
        for p in 0..nthr {
            let path = shard_path(&stub, p);
            let mut sf = File::open(&path).map_err(|_| open_err(&path, "post list part"))?;
            let pb = read_i32(&mut sf)? as usize;
            let cb = read_i32(&mut sf)? as usize;
            let snels = read_i64(&mut sf)?;
            if pb + cb != ebyte {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: post size does not match stub", path.display()),
                ));
            }
            let want = SHARD_HEADER + snels as u64 * ebyte as u64;
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
        }

        let mut list = PostList {
            pbyte,
            cbyte,
            ebyte,
            nsqrt,
            nthr,
            maxp,
            freq,
            nctg,
            perm,
            nels,
            neps,
            stub,
            shard_nels,
            cidx: 0,
            part: 0,
            file: None,
            bufr: vec![0u8; POST_BLOCK * ebyte],
            bptr: 0,
            btop: 0,
            shard_left: 0,
        };
        list.first()?;
        Ok(list)
    }

    pub fn clone_stream(&self) -> io::Result<PostList> {
        PostList::open(&self.stub)
    }

    pub fn first(&mut self) -> io::Result<()> {
        self.goto_index(0)
    }

    fn exhaust(&mut self) {
        self.part = self.nthr;
        self.file = None;
        self.bptr = 0;
        self.btop = 0;
    }

    fn refill(&mut self) -> io::Result<()> {
        while self.shard_left == 0 {
            let next = if self.file.is_none() { self.part } else { self.part + 1 };
            if next >= self.nthr {
                self.exhaust();
                return Ok(());
            }
            let path = shard_path(&self.stub, next);
            let mut f = File::open(&path).map_err(|_| open_err(&path, "post list part"))?;
            f.seek(SeekFrom::Start(SHARD_HEADER))?;
            self.part = next;
            self.file = Some(f);
            self.shard_left = self.shard_nels[next];
        }
        let n = (self.shard_left as usize).min(POST_BLOCK);
        if let Some(f) = &mut self.file {
            f.read_exact(&mut self.bufr[..n * self.ebyte])?;
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

        let path = shard_path(&self.stub, p);
        let mut f = File::open(&path).map_err(|_| open_err(&path, "post list part"))?;
        f.seek(SeekFrom::Start(SHARD_HEADER + rel as u64 * self.ebyte as u64))?;

        self.part = p;
        self.file = Some(f);
        self.shard_left = self.shard_nels[p] - rel;
        self.cidx = idx;
        self.bptr = 0;
        self.btop = 0;
        self.refill()
    }

    pub fn next_entry(&mut self) -> io::Result<()> {
        if self.part >= self.nthr {
            return Ok(());
        }
        self.cidx += 1;
        self.bptr += 1;
        if self.bptr >= self.btop {
            if self.cidx >= self.nels {
                self.exhaust();
                return Ok(());
            }
            self.refill()?;
        }
        Ok(())
    }

    /// Skip `del` entries, seeking when the target leaves the buffer.
    pub fn jump(&mut self, del: i64) -> io::Result<()> {
        if del == 0 {
            return Ok(());
        }
        let target = self.cidx + del;
        if del > 0 && (self.bptr as i64 + del) < self.btop as i64 {
            self.bptr += del as usize;
            self.cidx = target;
            return Ok(());
        }
        self.goto_index(target)
    }

    /// The current post entry as a little-endian value (position low,
    /// contig + sign flag high).
    #[inline]
    pub fn current(&self) -> u64 {
        let off = self.bptr * self.ebyte;
        get_uint_le(&self.bufr[off..off + self.ebyte], self.ebyte)
    }

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
