//! Adaptive-seed merger (phase 1).
//!
//! Workers drive a synchronized walk of the two k-mer tables and their
//! position lists.  For every k-mer of genome 1, the worker finds the
//! longest prefix `plen >= 12` whose matching k-mer range in genome 2
//! carries fewer than FREQ positions, and emits one packed seed record per
//! (a-position, b-position) pair into the shard file selected by the
//! a-contig's panel and the pair's relative orientation.
//!
//! Worker t owns shard rows [t*nsqrt, (t+1)*nsqrt) of all four streams;
//! shard boundaries sit on shared prefix panels, so the walk never leaves
//! the worker's rows.  All merge state lives in one `PanelState` record
//! per worker; cache positions are entry offsets, not pointers.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;

use crate::bytes::put_uint_le;
use crate::config::{Layout, Params, Scratch, POST_BUF_LEN, POST_BUF_MASK, PREFIX_BASES, SEED_BUF_LEN};
use crate::index::kmer_stream::KmerStream;
use crate::index::post_list::PostList;

#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStats {
    pub nhits: i64, // seeds emitted
    pub g1len: i64, // genome-1 positions participating
    pub tseed: i64, // sum of lcp * freq over emitted seeds
}

/// Buffered writer for one seed shard temp file.
pub struct SeedWriter {
    pub path: PathBuf,
    file: File,
    bufr: Vec<u8>,
}

impl SeedWriter {
    fn create(path: PathBuf) -> io::Result<SeedWriter> {
        let file = File::create(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("cannot create {}", path.display()))
        })?;
        Ok(SeedWriter {
            path,
            file,
            bufr: Vec::with_capacity(SEED_BUF_LEN),
        })
    }

    #[inline]
    fn push(&mut self, rec: &[u8]) -> io::Result<()> {
        if self.bufr.len() + rec.len() > SEED_BUF_LEN {
            self.file.write_all(&self.bufr)?;
            self.bufr.clear();
        }
        self.bufr.extend_from_slice(rec);
        Ok(())
    }

    fn finish(mut self) -> io::Result<()> {
        if !self.bufr.is_empty() {
            self.file.write_all(&self.bufr)?;
        }
        self.file.sync_all()
    }
}

/// Per-worker merge state for one prefix panel: the cached genome-2
/// suffixes sharing the panel prefix, the per-length range starts, and the
/// circular position buffer with its FREQ-sized overflow tail.
struct PanelState {
    cache: Vec<u8>,
    kbyte: usize,
    cbyte: usize, // count byte index within an entry
    lbyte: usize, // lcp byte index
    ctop: usize,  // cached entries (sentinel lives at ctop)
    plen: usize,
    vlcp: Vec<usize>,
    rend: usize,
    vlow: isize, // highest entry known to push freq over the cutoff
    vhgh: usize, // entries with positions already in the buffer
    eorun: bool, // rend is past the matching range
    pdx: usize,
    cdx: usize,
    post: Vec<u64>,
}

impl PanelState {
    fn new(maxp: usize, kbyte: usize, kmer: usize, freq: usize) -> PanelState {
        PanelState {
            cache: vec![0u8; (maxp + 1) * kbyte],
            kbyte,
            cbyte: kbyte - 2,
            lbyte: kbyte - 1,
            ctop: 0,
            plen: 0,
            vlcp: vec![0usize; kmer + 1],
            rend: 0,
            vlow: -1,
            vhgh: 0,
            eorun: false,
            pdx: POST_BUF_MASK,
            cdx: 0,
            post: vec![0u64; POST_BUF_LEN + freq],
        }
    }

    #[inline]
    fn count(&self, e: usize) -> usize {
        self.cache[e * self.kbyte + self.cbyte] as usize
    }

    #[inline]
    fn lcp(&self, e: usize) -> usize {
        self.cache[e * self.kbyte + self.lbyte] as usize
    }

    #[inline]
    fn suf(&self, e: usize, h: usize) -> u8 {
        self.cache[e * self.kbyte + h]
    }

    /// Step a cache cursor one entry, loading its positions into the
    /// circular buffer on first visit.  Returns the advanced cursor.
    fn advance(&mut self, l: usize, p2: &mut PostList) -> io::Result<usize> {
        if l >= self.vhgh {
            for _ in 0..self.count(l) {
                self.pdx = (self.pdx + 1) & POST_BUF_MASK;
                self.post[self.pdx] = p2.current();
                p2.next_entry()?;
            }
            self.vhgh = l + 1;
        }
        self.cdx = (self.cdx + self.count(l)) & POST_BUF_MASK;
        Ok(l + 1)
    }
}

/// Byte index (within the stored suffix) and mask selecting base `plen` of
/// a table k-mer.
#[inline]
fn suf_slot(plen: usize) -> (usize, u8) {
    let off = plen - PREFIX_BASES;
    (off >> 2, 0xc0u8 >> (2 * (off & 3)))
}

pub struct WorkerOut {
    pub nbuck: Vec<i64>,
    pub cbuck: Vec<i64>,
    pub stats: MergeStats,
}

/// Run the merge phase: `nsqrt` workers, each owning its shard rows and
/// its `2 * nparts` output files.  Returns per-worker bucket counters for
/// the sort phase plus summed statistics.
pub fn adaptamer_merge(
    params: &Params,
    layout: &Layout,
    scratch: &Scratch,
    t1: &KmerStream,
    t2: &KmerStream,
    p1: &PostList,
    p2: &PostList,
    maxp: usize,
) -> io::Result<(Vec<WorkerOut>, MergeStats)> {
    let nthreads = layout.nthreads;

    log::info!("starting adaptive seed merge with {} threads", nthreads);

    let mut outs: Vec<io::Result<WorkerOut>> = Vec::with_capacity(nthreads);
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(nthreads);
        for tid in 0..nthreads {
            handles.push(scope.spawn(move || -> io::Result<WorkerOut> {
                let mut wt1 = t1.clone_stream()?;
                let mut wt2 = t2.clone_stream()?;
                let mut wp1 = p1.clone_stream()?;
                let mut wp2 = p2.clone_stream()?;
                merge_worker(tid, params, layout, scratch, &mut wt1, &mut wt2, &mut wp1, &mut wp2, maxp)
            }));
        }
        for h in handles {
            outs.push(h.join().unwrap_or_else(|_| {
                Err(io::Error::other("merge worker panicked"))
            }));
        }
    });

    let mut workers = Vec::with_capacity(nthreads);
    let mut total = MergeStats::default();
    for out in outs {
        let out = out?;
        total.nhits += out.stats.nhits;
        total.g1len += out.stats.g1len;
        total.tseed += out.stats.tseed;
        workers.push(out);
    }

    if params.verbose && total.nhits > 0 {
        log::info!(
            "total seeds = {}, ave. len = {:.1}, seeds per G1 position = {:.1}",
            total.nhits,
            total.tseed as f64 / total.nhits as f64,
            total.nhits as f64 / total.g1len as f64
        );
    }
    Ok((workers, total))
}

#[allow(clippy::too_many_arguments)]
fn merge_worker(
    tid: usize,
    params: &Params,
    layout: &Layout,
    scratch: &Scratch,
    t1: &mut KmerStream,
    t2: &mut KmerStream,
    p1: &mut PostList,
    p2: &mut PostList,
    maxp: usize,
) -> io::Result<WorkerOut> {
    let nsqrt = layout.nthreads;
    let nparts = layout.nparts;
    let freq = params.freq;
    let kmer = layout.kmer;
    let kbyte = layout.kbyte;
    let ibyte = layout.ibyte;
    let jbyte = layout.jbyte;
    let eshift = layout.eshift;

    let mut nunits = Vec::with_capacity(nparts);
    let mut cunits = Vec::with_capacity(nparts);
    for j in 0..nparts {
        let k = tid * nparts + j;
        nunits.push(SeedWriter::create(scratch.pair_file(k, false))?);
        cunits.push(SeedWriter::create(scratch.pair_file(k, true))?);
    }
    let mut nbuck = vec![0i64; layout.nconts];
    let mut cbuck = vec![0i64; layout.nconts];
    let mut stats = MergeStats::default();

    let spart = tid * nsqrt;
    let tbeg = t1.shard_start(spart);
    let tend = t1.neps[spart + nsqrt - 1];
    t1.goto_index(tbeg)?;
    t2.goto_index(t2.shard_start(spart))?;
    p1.goto_index(p1.shard_start(spart))?;
    p2.goto_index(p2.shard_start(spart))?;

    let mut st = PanelState::new(maxp, kbyte, kmer, freq);
    let mut cpre: i64 = -1;
    let mut qcnt: i64 = -1;
    let mut suf1 = vec![0u8; kbyte];
    let mut rec = vec![0u8; 1 + ibyte + jbyte];

    'entries: while t1.cidx < tend {
        suf1.copy_from_slice(t1.csuf());
        let t1cnt = suf1[kbyte - 2] as usize;

        'decide: {
            if t1.cpre() != cpre {
                if params.verbose && tid == 0 && tend > tbeg {
                    let pcnt = ((t1.cidx - tbeg) * 10) / (tend - tbeg);
                    if pcnt > qcnt {
                        log::info!("merge {}% complete", pcnt * 10);
                    }
                    qcnt = pcnt;
                }

                // Skip the unloaded tail of the old panel plus all smaller
                // T2 prefixes with one position-list jump.
                let mut bidx: i64 = 0;
                for e in st.vhgh..st.ctop {
                    bidx += st.count(e) as i64;
                }
                cpre = t1.cpre();
                while t2.cpre() < cpre {
                    bidx += t2.count() as i64;
                    t2.next_entry()?;
                }
                p2.jump(bidx)?;

                // Cache all T2 entries of the new panel.
                let mut n = 0usize;
                while t2.cpre() == cpre {
                    st.cache[n * kbyte..(n + 1) * kbyte].copy_from_slice(t2.csuf());
                    t2.next_entry()?;
                    n += 1;
                }
                st.ctop = n;
                st.cache[n * kbyte + st.cbyte] = 0;
                st.cache[n * kbyte + st.lbyte] = (PREFIX_BASES - 1) as u8;

                if n == 0 {
                    // Nothing shares this prefix: skip T1's whole panel.
                    let mut bidx: i64 = 0;
                    while t1.cpre() == cpre {
                        bidx += t1.count() as i64;
                        t1.next_entry()?;
                    }
                    p1.jump(bidx)?;
                    continue 'entries;
                }

                st.plen = PREFIX_BASES;
                st.vlcp[PREFIX_BASES] = 0;
                st.rend = 0;
                st.vlow = -1;
                st.vhgh = 0;
                st.pdx = POST_BUF_MASK;
                st.cdx = 0;
                st.eorun = false;
            } else {
                let nlcp = suf1[kbyte - 1] as usize;
                if nlcp > st.plen {
                    break 'decide;
                } else if nlcp == st.plen {
                    if st.eorun {
                        break 'decide;
                    }
                } else {
                    if !st.eorun {
                        st.rend = st.advance(st.rend, p2)?;
                    }
                    while st.lcp(st.rend) > nlcp {
                        st.rend = st.advance(st.rend, p2)?;
                    }
                    st.plen = st.lcp(st.rend);
                    if st.plen < nlcp {
                        st.eorun = true;
                        st.plen = nlcp;
                        break 'decide;
                    }
                    st.eorun = false;
                }
            }

            // Extend the match byte by byte against the T1 suffix.
            while st.plen < kmer {
                let (h, m) = suf_slot(st.plen);
                let c = suf1[h] & m;
                let mut d = st.suf(st.rend, h) & m;
                while d < c {
                    st.rend = st.advance(st.rend, p2)?;
                    if st.lcp(st.rend) < st.plen {
                        st.eorun = true;
                        break 'decide;
                    }
                    d = st.suf(st.rend, h) & m;
                }
                if d > c {
                    break 'decide;
                }
                st.plen += 1;
                st.vlcp[st.plen] = st.rend;
            }
            st.rend = st.advance(st.rend, p2)?;
            st.eorun = true;
        }

        // Count positions over the matched range; reject at the cutoff.
        let emit = 'pairs: {
            let vcp = st.vlcp[st.plen];
            if (vcp as isize) <= st.vlow {
                break 'pairs None;
            }
            let mut freq_cnt = 0usize;
            let mut l = st.rend;
            while l > vcp {
                l -= 1;
                freq_cnt += st.count(l);
                if freq_cnt >= freq {
                    st.vlow = l as isize;
                    break 'pairs None;
                }
            }
            let lcs = freq_cnt;
            if !st.eorun {
                let udx = st.cdx;
                let mut l = st.rend;
                freq_cnt += st.count(l);
                if freq_cnt >= freq {
                    break 'pairs None;
                }
                l = st.advance(l, p2)?;
                while st.lcp(l) >= st.plen {
                    freq_cnt += st.count(l);
                    if freq_cnt >= freq {
                        st.cdx = udx;
                        break 'pairs None;
                    }
                    l = st.advance(l, p2)?;
                }
                st.cdx = udx;
            }

            // The matched positions are the freq_cnt buffer slots ending at
            // cdx + (freq_cnt - lcs); unwrap the circle into the overflow
            // tail when the slice crosses the end.
            let b = if st.cdx >= lcs {
                st.cdx - lcs
            } else {
                st.cdx + POST_BUF_LEN - lcs
            };
            if b + freq_cnt > POST_BUF_LEN {
                let wrap = (b + freq_cnt) & POST_BUF_MASK;
                for i in (0..wrap).rev() {
                    st.post[POST_BUF_LEN + i] = st.post[i];
                }
            }
            Some((b, freq_cnt))
        };

        match emit {
            Some((b, freq_cnt)) => {
                stats.nhits += (t1cnt * freq_cnt) as i64;
                stats.g1len += t1cnt as i64;
                stats.tseed += (t1cnt * freq_cnt * st.plen) as i64;

                let asign_bit = 1u64 << (8 * ibyte as u32 - 1);
                let jsign_bit = 1u64 << (8 * jbyte as u32 - 1);
                rec[0] = st.plen as u8;
                for _ in 0..t1cnt {
                    let mut apost = p1.current();
                    let asign = apost & asign_bit != 0;
                    apost &= !asign_bit;
                    let acont = (apost >> eshift) as usize;
                    let adest = layout.select[acont];
                    put_uint_le(&mut rec[1..], ibyte, apost);
                    for k in 0..freq_cnt {
                        let jp = st.post[b + k];
                        let same = asign == (jp & jsign_bit != 0);
                        put_uint_le(&mut rec[1 + ibyte..], jbyte, jp);
                        if same {
                            nunits[adest].push(&rec)?;
                            nbuck[acont] += 1;
                        } else {
                            cunits[adest].push(&rec)?;
                            cbuck[acont] += 1;
                        }
                    }
                    p1.next_entry()?;
                }
            }
            None => {
                p1.jump(t1cnt as i64)?;
            }
        }
        t1.next_entry()?;
    }

    for u in nunits {
        u.finish()?;
    }
    for u in cunits {
        u.finish()?;
    }

    Ok(WorkerOut {
        nbuck,
        cbuck,
        stats,
    })
}
