//! Seed shard sort (phase 2a).
//!
//! Each worker re-imports the packed seed records it wrote during the
//! merge, computes the pair diagonal, and scatters fixed-width sort
//! records into a shared array at slots handed out by its pre-summed
//! bucket cursors.  The array is then sorted per a-contig panel: an LSD
//! radix pass over the trailing key bytes yields (b-contig, diagonal
//! bucket, a-post) order, the order the chain search consumes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use rayon::prelude::*;

use crate::bytes::{get_uint_le, put_uint_le};
use crate::config::{Layout, BUCK_SHIFT};

/// A search thread's slice of the sorted array: contigs `[beg, end)`
/// starting at byte `off`.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub beg: usize,
    pub end: usize,
    pub off: i64,
}

/// Shared destination for the re-import scatter.  The bucket cursors give
/// every (worker, contig) pair a disjoint run of slots, so concurrent
/// writers never touch the same bytes.
pub struct SortSlab {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for SortSlab {}
unsafe impl Sync for SortSlab {}

impl SortSlab {
    pub fn new(backing: &mut [u8]) -> SortSlab {
        SortSlab {
            ptr: backing.as_mut_ptr(),
            len: backing.len(),
        }
    }

    /// # Safety
    /// Callers must hold slots disjoint from every other writer's.
    #[inline]
    pub unsafe fn write(&self, off: usize, bytes: &[u8]) {
        debug_assert!(off + bytes.len() <= self.len);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(off), bytes.len());
        }
    }
}

const IO_CHUNK: usize = 1 << 20;

/// Stream one seed shard file back in, placing one sort record per seed.
/// `jlens` holds B-contig lengths in permuted order; `buck` is this
/// worker's cursor array (exclusive prefix sums on entry).
pub fn reimport(
    path: &Path,
    layout: &Layout,
    comp: bool,
    jlens: &[i64],
    buck: &mut [i64],
    slab: &SortSlab,
) -> io::Result<()> {
    let mut file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("cannot open {}", path.display())))?;

    let iunit = 1 + layout.ibyte + layout.jbyte;
    let swide = layout.swide;
    let ipost_w = layout.ipost;
    let icont_w = layout.icont;
    let jpost_w = layout.jpost;
    let jcont_w = layout.jcont;
    let kmer = layout.kmer as i64;

    let flag = 1i64 << (8 * jcont_w as u32 - 1);
    let mask = flag - 1;

    let mut bufr = vec![0u8; IO_CHUNK];
    let mut have = 0usize;
    let mut rec = vec![0u8; swide];

    loop {
        let got = file.read(&mut bufr[have..])?;
        if got == 0 {
            if have != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: truncated seed record", path.display()),
                ));
            }
            break;
        }
        have += got;

        let full = (have / iunit) * iunit;
        let mut b = 0usize;
        while b < full {
            let r = &bufr[b..b + iunit];
            b += iunit;

            let lcp = r[0] as i64;
            let mut ipost = get_uint_le(&r[1..], ipost_w) as i64;
            let icont = get_uint_le(&r[1 + ipost_w..], icont_w) as usize;
            let jpost = get_uint_le(&r[1 + layout.ibyte..], jpost_w) as i64;
            let jraw = get_uint_le(&r[1 + layout.ibyte + jpost_w..], jcont_w) as i64;
            let flip = jraw & flag != 0;
            let jcont = (jraw & mask) as usize;

            debug_assert!(jpost <= jlens[jcont]);

            let dtot = if comp {
                ipost + jpost
            } else {
                let d = (ipost - jpost) + jlens[jcont];
                if flip {
                    ipost += kmer - lcp;
                }
                d
            };
            let dbuck = dtot >> BUCK_SHIFT;

            rec[0] = lcp as u8;
            rec[1] = (dtot - (dbuck << BUCK_SHIFT)) as u8;
            put_uint_le(&mut rec[2..], ipost_w, ipost as u64);
            put_uint_le(&mut rec[2 + ipost_w..], layout.dbyte, dbuck as u64);
            put_uint_le(&mut rec[2 + ipost_w + layout.dbyte..], jcont_w, jcont as u64);

            let slot = buck[icont] as usize;
            buck[icont] += 1;
            // Slots are disjoint across workers by bucket construction.
            unsafe { slab.write(slot * swide, &rec) };
        }

        bufr.copy_within(full..have, 0);
        have -= full;
    }
    Ok(())
}

/// Sort every contig panel of the array by its trailing key bytes and
/// carve the panels into at most `nthreads` byte-balanced search ranges.
pub fn sort_seeds(
    sarr: &mut [u8],
    swide: usize,
    panel: &[i64],
    nthreads: usize,
) -> Vec<Range> {
    let mut slices: Vec<&mut [u8]> = Vec::with_capacity(panel.len());
    let mut rest = sarr;
    for &bytes in panel {
        let (head, tail) = rest.split_at_mut(bytes as usize);
        slices.push(head);
        rest = tail;
    }

    slices
        .par_iter_mut()
        .for_each(|s| radix_sort_records(s, swide));

    thread_ranges(panel, nthreads)
}

/// LSD radix sort of fixed-width records on bytes [2, swide): the key is
/// the little-endian integer (a-post, diag bucket, b-contig), so the most
/// significant pass leaves records grouped by b-contig, then bucket, then
/// ascending a-post.
pub fn radix_sort_records(s: &mut [u8], swide: usize) {
    let n = s.len() / swide;
    if n < 2 {
        return;
    }
    if n <= 32 {
        insertion_sort_records(s, swide);
        return;
    }

    let mut scratch = vec![0u8; s.len()];
    let mut src: &mut [u8] = s;
    let mut dst: &mut [u8] = &mut scratch;
    let mut flipped = false;

    for pos in 2..swide {
        let mut count = [0usize; 256];
        for i in 0..n {
            count[src[i * swide + pos] as usize] += 1;
        }
        let mut sum = 0usize;
        let mut offs = [0usize; 256];
        for v in 0..256 {
            offs[v] = sum;
            sum += count[v];
        }
        for i in 0..n {
            let v = src[i * swide + pos] as usize;
            let o = offs[v];
            offs[v] += 1;
            dst[o * swide..(o + 1) * swide].copy_from_slice(&src[i * swide..(i + 1) * swide]);
        }
        std::mem::swap(&mut src, &mut dst);
        flipped = !flipped;
    }

    if flipped {
        // Results live in the scratch buffer; src points at it after the
        // final swap.
        dst.copy_from_slice(src);
    }
}

fn insertion_sort_records(s: &mut [u8], swide: usize) {
    let n = s.len() / swide;
    let key_cmp = |a: &[u8], b: &[u8]| {
        for p in (2..swide).rev() {
            match a[p].cmp(&b[p]) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        std::cmp::Ordering::Equal
    };
    let mut tmp = vec![0u8; swide];
    for i in 1..n {
        let mut j = i;
        tmp.copy_from_slice(&s[i * swide..(i + 1) * swide]);
        while j > 0 && key_cmp(&s[(j - 1) * swide..j * swide], &tmp) == std::cmp::Ordering::Greater
        {
            s.copy_within((j - 1) * swide..j * swide, j * swide);
            j -= 1;
        }
        s[j * swide..(j + 1) * swide].copy_from_slice(&tmp);
    }
}

fn thread_ranges(panel: &[i64], nthreads: usize) -> Vec<Range> {
    let total: i64 = panel.iter().sum();
    if total == 0 {
        return Vec::new();
    }
    let mut ranges = Vec::with_capacity(nthreads);
    let mut beg = 0usize;
    let mut off = 0i64;
    let mut acc = 0i64;
    for (j, &bytes) in panel.iter().enumerate() {
        acc += bytes;
        let r = ranges.len() as i64;
        if acc >= (total * (r + 1)) / nthreads as i64 && ranges.len() + 1 < nthreads {
            ranges.push(Range {
                beg,
                end: j + 1,
                off,
            });
            beg = j + 1;
            off = acc;
        }
    }
    if beg < panel.len() {
        ranges.push(Range {
            beg,
            end: panel.len(),
            off,
        });
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn key_of(rec: &[u8], swide: usize) -> Vec<u8> {
        rec[2..swide].iter().rev().copied().collect()
    }

    #[test]
    fn radix_orders_by_trailing_key() {
        let swide = 9;
        let n = 500;
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = vec![0u8; n * swide];
        rng.fill(&mut data[..]);

        let mut sorted = data.clone();
        radix_sort_records(&mut sorted, swide);

        // Same multiset of records.
        let mut a: Vec<Vec<u8>> = data.chunks(swide).map(|c| c.to_vec()).collect();
        let mut b: Vec<Vec<u8>> = sorted.chunks(swide).map(|c| c.to_vec()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);

        // Non-decreasing keys.
        for w in sorted.chunks(swide).collect::<Vec<_>>().windows(2) {
            assert!(key_of(w[0], swide) <= key_of(w[1], swide));
        }
    }

    #[test]
    fn radix_matches_insertion_on_small_input() {
        let swide = 7;
        let mut rng = StdRng::seed_from_u64(11);
        for n in [2usize, 3, 16, 33, 100] {
            let mut data = vec![0u8; n * swide];
            rng.fill(&mut data[..]);
            let mut by_radix = data.clone();
            let mut by_insert = data.clone();
            radix_sort_records(&mut by_radix, swide);
            insertion_sort_records(&mut by_insert, swide);
            for (x, y) in by_radix.chunks(swide).zip(by_insert.chunks(swide)) {
                assert_eq!(key_of(x, swide), key_of(y, swide));
            }
        }
    }

    #[test]
    fn ranges_cover_all_panels() {
        let panel = vec![10i64, 0, 30, 5, 5, 100, 0, 2];
        let ranges = thread_ranges(&panel, 3);
        assert!(!ranges.is_empty() && ranges.len() <= 3);
        assert_eq!(ranges[0].beg, 0);
        assert_eq!(ranges.last().unwrap().end, panel.len());
        for w in ranges.windows(2) {
            assert_eq!(w[0].end, w[1].beg);
            let bytes: i64 = panel[w[0].beg..w[0].end].iter().sum();
            assert_eq!(w[1].off - w[0].off, bytes);
        }
    }

    #[test]
    fn empty_panels_give_no_ranges() {
        assert!(thread_ranges(&[0, 0, 0], 4).is_empty());
    }
}
