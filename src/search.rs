//! Chain search (phase 2b).
//!
//! Each worker walks its slice of the sorted seed array grouped by
//! (a-contig, b-contig).  Within a contig pair, seeds are inspected in
//! windows spanning two adjacent diagonal buckets; runs on the two buckets
//! are merged by ascending a-post into chains broken at CHAIN_BREAK gaps.
//! A chain covering CHAIN_MIN bases on both genomes seeds one call into
//! the banded local aligner; accepted alignments go to the per-thread temp
//! file and are redundancy-filtered per pair.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use crate::bytes::get_uint_le;
use crate::config::{Layout, Params, BUCK_SHIFT, BUCK_WIDTH};
use crate::filter;
use crate::index::genome::{complement_seq, BaseLoader, Genome};
use crate::local_align::LocalAligner;
use crate::overlap::{LasWriter, Overlap, COMP_FLAG};
use crate::seed_sort::Range;

#[derive(Debug, Default, Clone, Copy)]
pub struct SearchStats {
    pub nhits: i64, // chains passing both coverage filters
    pub nlass: i64, // local alignments written pre-filter
    pub nlive: i64, // alignments surviving the redundancy filter
    pub nlcov: i64, // a-bases covered by survivors
}

#[derive(Debug, Clone, Copy)]
struct Jspan {
    jpost: i64,
    lcp: i64,
}

/// Union-cover update: extend the covered span `cov` by the part of
/// `[post, post+lcp)` lying beyond the previous high-water mark `lps`.
#[inline]
fn cover_step(lps: &mut i64, cov: &mut i64, post: i64, lcp: i64) {
    let cps = post + lcp;
    if cps > *lps {
        if post >= *lps {
            *cov += lcp;
        } else {
            *cov += cps - *lps;
        }
        *lps = cps;
    }
}

/// Per-thread resources persisting across parts: contig buffers, aligner
/// scratch, private base-file handles, and the two .las files.
pub struct SearchContext<'a> {
    pub genome1: &'a Genome,
    pub genome2: &'a Genome,
    load1: BaseLoader,
    load2: BaseLoader,
    aseq: Vec<u8>,
    bseq: Vec<u8>,
    cur_a: i64,
    cur_b: i64,
    pub comp: bool,
    aligner: LocalAligner,
    list: Vec<Jspan>,
    pub ofile: LasWriter,
    tfile: File,
    pub stats: SearchStats,
}

impl<'a> SearchContext<'a> {
    pub fn new(
        genome1: &'a Genome,
        genome2: &'a Genome,
        aligner: LocalAligner,
        ofile: LasWriter,
        tfile: File,
    ) -> io::Result<SearchContext<'a>> {
        Ok(SearchContext {
            genome1,
            genome2,
            load1: genome1.base_loader()?,
            load2: genome2.base_loader()?,
            aseq: Vec::new(),
            bseq: Vec::new(),
            cur_a: -1,
            cur_b: -1,
            comp: false,
            aligner,
            list: Vec::with_capacity(1000),
            ofile,
            tfile,
            stats: SearchStats::default(),
        })
    }

    /// Invalidate the loaded contigs (orientation changed between passes).
    pub fn set_comp(&mut self, comp: bool) {
        if self.comp != comp {
            self.comp = comp;
            self.cur_a = -1;
            self.cur_b = -1;
        }
    }
}

/// Walk a worker's contig range of the sorted array, splitting each
/// a-contig panel into b-contig runs.
pub fn search_part(
    ctx: &mut SearchContext,
    params: &Params,
    layout: &Layout,
    sarr: &[u8],
    panel: &[i64],
    range: &Range,
) -> io::Result<()> {
    let swide = layout.swide;
    let foffs = swide - layout.jcont;
    let mut x = range.off as usize;

    for icrnt in range.beg..range.end {
        let e = x + panel[icrnt] as usize;
        if e == x {
            continue;
        }
        let mut b = x;
        let mut jcrnt = get_uint_le(&sarr[x + foffs..], layout.jcont);
        let mut y = x + swide;
        while y < e {
            let jc = get_uint_le(&sarr[y + foffs..], layout.jcont);
            if jc != jcrnt {
                align_contigs(ctx, params, layout, &sarr[b..y], icrnt, jcrnt as usize)?;
                jcrnt = jc;
                b = y;
            }
            y += swide;
        }
        align_contigs(ctx, params, layout, &sarr[b..e], icrnt, jcrnt as usize)?;
        x = e;
    }
    Ok(())
}

/// Chain search over all seeds of one (a-contig, b-contig) pair, followed
/// by the pair's redundancy filter.
fn align_contigs(
    ctx: &mut SearchContext,
    params: &Params,
    layout: &Layout,
    recs: &[u8],
    icrnt: usize,
    jcrnt: usize,
) -> io::Result<()> {
    let swide = layout.swide;
    let ipost_w = layout.ipost;
    let dbyte = layout.dbyte;
    let nrec = recs.len() / swide;
    if nrec == 0 {
        return Ok(());
    }

    let lcp_at = |i: usize| recs[i * swide] as i64;
    let drem_at = |i: usize| recs[i * swide + 1] as i64;
    let ipost_at = |i: usize| get_uint_le(&recs[i * swide + 2..], ipost_w) as i64;
    let dbuck_at = |i: usize| {
        if i >= nrec {
            -1
        } else {
            get_uint_le(&recs[i * swide + 2 + ipost_w..], dbyte) as i64
        }
    };

    let comp = ctx.comp;
    let ctg1 = layout.perm1[icrnt];
    let ctg2 = layout.perm2[jcrnt];
    let alen = ctx.genome1.contigs[ctg1].rlen;
    let blen = ctx.genome2.contigs[ctg2].rlen;
    let aoffset = alen - layout.kmer as i64;

    let chain_break = params.chain_break;
    let chain_min = params.chain_min;

    let mut nhit: i64 = 0;
    let mut nlas: i64 = 0;

    // Find runs [b, m) on bucket cdiag and [m, e) on cdiag+1; the pair is
    // examined when the upper run exists or cdiag was just entered, since
    // a chain confined to cdiag alone was a subset of the previous
    // (cdiag-1, cdiag) window's chains.
    let mut b = 0usize;
    let mut e = 0usize;
    let mut cdiag = dbuck_at(0);
    while dbuck_at(e) == cdiag {
        e += 1;
    }
    let mut new = true;

    loop {
        let m = e;
        let mut aux = false;
        while dbuck_at(e) == cdiag + 1 {
            e += 1;
            aux = true;
        }

        if new || aux {
            let doffset;
            let mut alast: i64;
            if comp {
                doffset = aoffset - (cdiag << BUCK_SHIFT);
                alast = alen + 1;
            } else {
                doffset = (cdiag << BUCK_SHIFT) - blen;
                alast = -1;
            }

            // Merge [b, m) and [m, e) by ascending a-post, extending the
            // running chain while gaps stay under CHAIN_BREAK.  A sentinel
            // a-post flushes the final chain.
            let mut is = b;
            let mut it = m;
            let mut ipost = ipost_at(is);
            let mut apost = if aux { ipost_at(it) } else { i64::MAX };

            let mut lps: i64 = -chain_break;
            let mut cov: i64 = 0;
            let mut mix: u8 = 0;
            let mut dgmin: i64 = 0;
            let mut dgmax: i64 = 0;
            let mut apmin: i64 = 0;
            ctx.list.clear();

            let mut go = true;
            while go {
                let (lcp, dg, npost, wch);
                if apost < ipost {
                    lcp = lcp_at(it);
                    dg = drem_at(it) + BUCK_WIDTH;
                    npost = apost;
                    it += 1;
                    apost = if it >= e { i64::MAX } else { ipost_at(it) };
                    wch = 0x2u8;
                } else {
                    if is < m {
                        lcp = lcp_at(is);
                        dg = drem_at(is);
                    } else {
                        lcp = 0;
                        dg = 0;
                    }
                    npost = ipost;
                    is += 1;
                    if is >= m {
                        if is > m {
                            go = false;
                        } else {
                            ipost = i64::MAX;
                        }
                    } else {
                        ipost = ipost_at(is);
                    }
                    wch = 0x1u8;
                }

                if npost < lps + chain_break {
                    cover_step(&mut lps, &mut cov, npost, lcp);
                    ctx.list.push(Jspan {
                        jpost: npost - dg,
                        lcp,
                    });
                    mix |= wch;
                    if dg < dgmin {
                        dgmin = dg;
                    } else if dg > dgmax {
                        dgmax = dg;
                    }
                } else {
                    if cov >= chain_min && (mix != 1 || new) {
                        nhit += 1;

                        // The a-side covers enough; check the b-side too.
                        ctx.list.sort_by_key(|s| s.jpost);
                        let mut jlps: i64 = -128;
                        let mut jcov: i64 = 0;
                        for s in &ctx.list {
                            cover_step(&mut jlps, &mut jcov, s.jpost, s.lcp);
                        }

                        if jcov >= chain_min {
                            let apmax = lps;

                            if ctg1 as i64 != ctx.cur_a {
                                ctx.load1.load(ctx.genome1, ctg1, &mut ctx.aseq)?;
                                if comp {
                                    complement_seq(&mut ctx.aseq);
                                }
                                ctx.cur_a = ctg1 as i64;
                            }
                            if ctg2 as i64 != ctx.cur_b {
                                ctx.load2.load(ctx.genome2, ctg2, &mut ctx.bseq)?;
                                ctx.cur_b = ctg2 as i64;
                            }

                            let mo;
                            let mut dg_lo = 0i64;
                            let mut dg_hi = 0i64;
                            let mut anti = 0i64;
                            if comp {
                                mo = apmax <= alast;
                                if mo {
                                    let t = doffset - dgmin;
                                    dg_lo = doffset - dgmax;
                                    dg_hi = t;
                                    anti = ((aoffset << 1) - (apmin + apmax)) - ((dg_hi + dg_lo) >> 1);
                                }
                            } else {
                                mo = apmin >= alast;
                                if mo {
                                    dg_lo = dgmin + doffset;
                                    dg_hi = dgmax + doffset;
                                    anti = (apmin + apmax) - ((dg_hi + dg_lo) >> 1);
                                }
                            }

                            if mo {
                                if let Some(path) =
                                    ctx.aligner.find(&ctx.aseq, &ctx.bseq, dg_lo, dg_hi, anti)
                                {
                                    alast = if comp {
                                        alen - path.abpos as i64
                                    } else {
                                        path.aepos as i64
                                    };
                                    if path.aepos - path.abpos >= params.align_min {
                                        let ovl = Overlap {
                                            path,
                                            flags: if comp { COMP_FLAG } else { 0 },
                                            aread: ctg1 as i32,
                                            bread: ctg2 as i32,
                                        };
                                        ovl.write(&mut ctx.tfile)?;
                                        nlas += 1;
                                    }
                                }
                            }
                        }
                    }

                    if go {
                        cov = lcp;
                        lps = npost + lcp;
                        mix = wch;
                        ctx.list.clear();
                        ctx.list.push(Jspan {
                            jpost: npost - dg,
                            lcp,
                        });
                        dgmin = dg;
                        dgmax = dg;
                        apmin = npost;
                    }
                }
            }
        }

        if e >= nrec {
            break;
        }
        if aux {
            b = m;
            cdiag += 1;
            new = false;
        } else {
            b = e;
            cdiag = dbuck_at(e);
            while dbuck_at(e) == cdiag {
                e += 1;
            }
            new = true;
        }
    }

    ctx.stats.nhits += nhit;
    ctx.stats.nlass += nlas;
    if nlas > 0 {
        let (nliv, ncov) = filter::filter_pair(&mut ctx.tfile, nlas as usize, &mut ctx.ofile)?;
        ctx.stats.nlive += nliv;
        ctx.stats.nlcov += ncov;
        ctx.tfile.seek(SeekFrom::Start(0))?;
    }
    Ok(())
}
