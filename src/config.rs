use std::io;
use std::path::{Path, PathBuf};

/// Trace segment width in A-bases.  With TSPACE below 126 every trace
/// element fits one byte on disk.
pub const TSPACE: i32 = 100;

/// Diagonal bucket geometry: chains are searched over buckets of 64
/// adjacent diagonals and may span two adjacent buckets.
pub const BUCK_WIDTH: i64 = 64;
pub const BUCK_SHIFT: u32 = 6;

/// Byte-aligned lower bound on an adaptive seed: the 12-base prefix panel.
pub const PREFIX_BASES: usize = 12;
pub const PREFIX_BYTES: usize = 3;

/// Circular position buffer in the merger, plus a FREQ-sized overflow tail
/// so a wrapped slice can be copied out contiguously before seed emission.
pub const POST_BUF_LEN: usize = 0x1000;
pub const POST_BUF_MASK: usize = 0x0fff;

/// Per-(worker, part, orientation) seed output buffer size in bytes.
pub const SEED_BUF_LEN: usize = 1_000_000;

/// A configuration error: named message, reported on stderr, exit 1.
pub fn cfg_err(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

/// Command-line parameters, fixed for the run.
#[derive(Debug, Clone)]
pub struct Params {
    pub verbose: bool,
    pub freq: usize,
    pub chain_min: i64,
    pub chain_break: i64,
    pub align_min: i32,
    pub align_rate: f64,
    pub sort_path: PathBuf,
    pub out_root: Option<String>,
    pub src1: PathBuf,
    pub src2: PathBuf,
}

impl Params {
    pub fn validate(&self) -> io::Result<()> {
        if self.freq == 0 || self.freq > 255 {
            return Err(cfg_err(format!(
                "adaptive seed count cutoff -f{} must be in [1,255]",
                self.freq
            )));
        }
        if self.align_rate < 0.6 || self.align_rate >= 1.0 {
            return Err(cfg_err(format!(
                "minimum alignment similarity -e{} must be in [0.6,1.0)",
                self.align_rate
            )));
        }
        if !self.sort_path.is_dir() {
            return Err(cfg_err(format!(
                "cannot open scratch directory {}",
                self.sort_path.display()
            )));
        }
        Ok(())
    }

    /// Root name of the final .las: `-o` if given, else `<root1>.<root2>`.
    pub fn output_root(&self) -> String {
        if let Some(ref o) = self.out_root {
            return o.clone();
        }
        format!("{}.{}", source_root(&self.src1), source_root(&self.src2))
    }
}

/// Strip the directory and a trailing `.gdb` from a source path.
pub fn source_root(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.strip_suffix(".gdb") {
        Some(root) => root.to_string(),
        None => base,
    }
}

/// Byte geometry and contig partition derived from the two indices.
/// Immutable once built; every component takes it by reference.
#[derive(Debug)]
pub struct Layout {
    pub kmer: usize,
    pub nthreads: usize, // = index nsqrt

    // P1 entry geometry (A side)
    pub ibyte: usize, // full entry width
    pub ipost: usize, // position bytes
    pub icont: usize, // contig + sign bytes
    pub isign: usize, // byte index of the sign bit

    // P2 entry geometry (B side)
    pub jbyte: usize,
    pub jpost: usize,
    pub jcont: usize,
    pub jsign: usize,

    // k-mer table entry geometry
    pub kbyte: usize, // suffix + count + lcp
    pub cbyte: usize, // byte index of the count
    pub lbyte: usize, // byte index of the lcp

    pub dbyte: usize,  // diagonal bucket field width
    pub eshift: u32,   // shift extracting the contig from a P1 post
    pub swide: usize,  // sort record width

    pub nconts: usize,         // # of A contigs
    pub nparts: usize,         // # of A-contig panels
    pub select: Vec<usize>,    // contig -> panel
    pub idb_split: Vec<usize>, // panel -> first contig
    pub perm1: Vec<usize>,     // A contig sort permutation
    pub perm2: Vec<usize>,     // B contig sort permutation
}

/// Partition contigs (in permutation order) into `nthreads` panels of
/// roughly equal total length, greedily over the cumulative sum.
pub fn split_contigs(lengths: &[i64], nthreads: usize) -> (usize, Vec<usize>, Vec<usize>) {
    let nconts = lengths.len();
    let total: i64 = lengths.iter().sum();
    let mut select = vec![0usize; nconts];
    let mut split = vec![0usize];

    if nconts > 0 {
        let mut p = 0usize;
        let mut r = nthreads;
        let mut t = total / nthreads as i64;
        let mut cum = lengths[0];
        for x in 1..nconts {
            if cum >= t && x >= r {
                p += 1;
                split.push(x);
                t = (total * (p as i64 + 1)) / nthreads as i64;
                r += nthreads;
            }
            select[x] = p;
            cum += lengths[x];
        }
    }
    let nparts = split.len();
    split.push(nconts);
    (nparts, select, split)
}

/// Scratch file naming: names embed the process id so concurrent runs in
/// one scratch directory do not collide.
#[derive(Debug, Clone)]
pub struct Scratch {
    dir: PathBuf,
    pid: u32,
}

impl Scratch {
    pub fn new(dir: &Path) -> Self {
        Scratch {
            dir: dir.to_path_buf(),
            pid: std::process::id(),
        }
    }

    /// Seed shard `k = thread * nparts + part`, N family (same strand) or
    /// C family (opposite strand).
    pub fn pair_file(&self, k: usize, comp: bool) -> PathBuf {
        let tag = if comp { 'C' } else { 'N' };
        self.dir.join(format!("_pair.{}.{}.{}", self.pid, k, tag))
    }

    /// Per-thread pre-filter alignment temp file.
    pub fn algn_file(&self, thread: usize) -> PathBuf {
        self.dir.join(format!("_algn.{}.{}.las", self.pid, thread))
    }

    /// Per-thread post-filter output shard.
    pub fn uniq_file(&self, thread: usize) -> PathBuf {
        self.dir.join(format!("_uniq.{}.{}.las", self.pid, thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_balances_lengths() {
        let lengths = vec![100, 100, 100, 100, 100, 100, 100, 100];
        let (nparts, select, split) = split_contigs(&lengths, 4);
        assert_eq!(nparts, 4);
        assert_eq!(split, vec![0, 2, 4, 6, 8]);
        for (x, &s) in select.iter().enumerate() {
            assert!(split[s] <= x && x < split[s + 1]);
        }
    }

    #[test]
    fn split_single_large_contig() {
        let (nparts, select, split) = split_contigs(&[1_000_000], 4);
        assert_eq!(nparts, 1);
        assert_eq!(select, vec![0]);
        assert_eq!(split, vec![0, 1]);
    }

    #[test]
    fn split_uneven() {
        // One dominant contig followed by small ones: the dominant contig
        // fills its panel and the remainder is spread over the rest.
        let lengths = vec![1000, 10, 10, 10, 10, 10, 10, 10];
        let (nparts, _, split) = split_contigs(&lengths, 2);
        assert!(nparts >= 1 && nparts <= 2);
        assert_eq!(*split.last().unwrap(), lengths.len());
    }
}
