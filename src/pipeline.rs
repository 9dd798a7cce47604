//! Orchestrator: opens and validates the indices, derives the run layout,
//! drives the merge / sort / search phases over the scratch shard matrix,
//! and hands the per-thread output shards to the external `LAsort` /
//! `LAmerge` utilities for the final merge.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::thread;

use crate::config::{cfg_err, split_contigs, Layout, Params, Scratch};
use crate::index::genome::Genome;
use crate::index::kmer_stream::KmerStream;
use crate::index::post_list::PostList;
use crate::local_align::{AlignSpec, LocalAligner};
use crate::merge::{adaptamer_merge, WorkerOut};
use crate::overlap::LasWriter;
use crate::search::{search_part, SearchContext, SearchStats};
use crate::seed_sort::{reimport, sort_seeds, SortSlab};
use crate::util::{cputime, realtime};

/// Full run: discovery pipeline plus the external sort/merge into
/// `<out_root>.las`.
pub fn run(params: &Params) -> io::Result<()> {
    let rt0 = realtime();
    let shards = align(params)?;
    merge_las(params, &shards)?;
    if params.verbose {
        log::info!(
            "done in {:.1}s wall, {:.1}s cpu",
            realtime() - rt0,
            cputime()
        );
    }
    Ok(())
}

/// The discovery pipeline: produces one post-filter `.las` shard per
/// thread under the scratch directory and returns their paths.
pub fn align(params: &Params) -> io::Result<Vec<PathBuf>> {
    let params = &normalize_sort_path(params)?;
    params.validate()?;
    let scratch = Scratch::new(&params.sort_path);

    let t1 = KmerStream::open(&params.src1)?;
    let t2 = KmerStream::open(&params.src2)?;
    let p1 = PostList::open(&params.src1)?;
    let p2 = PostList::open(&params.src2)?;
    let genome1 = Genome::open(&params.src1)?;
    let genome2 = Genome::open(&params.src2)?;

    check_indices(params, &t1, &t2, &p1, &p2, &genome1, &genome2)?;
    let layout = build_layout(&t1, &p1, &p2, &genome1);

    if params.verbose {
        log::info!(
            "using {} threads over {} a-contig panels",
            layout.nthreads,
            layout.nparts
        );
    }

    let maxp = p2.maxp as usize;
    let (mut workers, _merge_stats) =
        adaptamer_merge(params, &layout, &scratch, &t1, &t2, &p1, &p2, maxp)?;
    drop((t1, t2, p1, p2));

    // Weave the per-worker seed counters into exclusive prefix sums that
    // serve as scatter cursors; panels restart at part boundaries.
    let nel_n = weave_buckets(&mut workers, false, &layout.select);
    let nel_c = weave_buckets(&mut workers, true, &layout.select);
    let nelmax = nel_n.max(nel_c) as usize;

    let swide = layout.swide;
    let mut sarr = vec![0u8; (nelmax + 1) * swide];
    let mut panel = vec![0i64; layout.nconts];
    let jlens: Vec<i64> = layout
        .perm2
        .iter()
        .map(|&c| genome2.contigs[c].rlen)
        .collect();

    let nthreads = layout.nthreads;
    let spec = AlignSpec::new(params.align_rate);
    let mut ctxs = Vec::with_capacity(nthreads);
    let mut shard_paths = Vec::with_capacity(nthreads);
    for t in 0..nthreads {
        let upath = scratch.uniq_file(t);
        let ofile = LasWriter::create(&upath)?;
        let tfile = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(scratch.algn_file(t))?;
        ctxs.push(SearchContext::new(
            &genome1,
            &genome2,
            LocalAligner::new(spec),
            ofile,
            tfile,
        )?);
        shard_paths.push(upath);
    }

    // Pass 2 reads the shard matrix transposed: part-major, thread-minor,
    // so each part's shards (written thread-major in phase 1) are consumed
    // together.
    for comp in [false, true] {
        for part in 0..layout.nparts {
            if params.verbose {
                log::info!(
                    "loading and sorting seeds for part {} of {}",
                    comp as usize * layout.nparts + part + 1,
                    2 * layout.nparts
                );
            }

            // Re-import this part's seed shards, one worker per merge
            // thread, scattering into the shared sort array.
            let slab = SortSlab::new(&mut sarr);
            let mut results: Vec<io::Result<()>> = Vec::with_capacity(nthreads);
            thread::scope(|scope| {
                let mut handles = Vec::with_capacity(nthreads);
                for (t, w) in workers.iter_mut().enumerate() {
                    let path = scratch.pair_file(t * layout.nparts + part, comp);
                    let buck = if comp { &mut w.cbuck } else { &mut w.nbuck };
                    let slab = &slab;
                    let layout = &layout;
                    let jlens = &jlens;
                    handles.push(scope.spawn(move || reimport(&path, layout, comp, jlens, buck, slab)));
                }
                for h in handles {
                    results.push(
                        h.join()
                            .unwrap_or_else(|_| Err(io::Error::other("re-import worker panicked"))),
                    );
                }
            });
            for r in results {
                r?;
            }
            for t in 0..nthreads {
                let _ = fs::remove_file(scratch.pair_file(t * layout.nparts + part, comp));
            }

            // Panel sizes in bytes; the last worker's cursors are the
            // inclusive per-contig totals for this part.
            let last = if comp {
                &workers[nthreads - 1].cbuck
            } else {
                &workers[nthreads - 1].nbuck
            };
            panel.fill(0);
            let mut prev = 0i64;
            let mut nels = 0i64;
            for j in layout.idb_split[part]..layout.idb_split[part + 1] {
                panel[j] = (last[j] - prev) * swide as i64;
                prev = last[j];
                nels = last[j];
            }

            let ranges = sort_seeds(&mut sarr[..nels as usize * swide], swide, &panel, nthreads);

            for ctx in ctxs.iter_mut() {
                ctx.set_comp(comp);
            }
            let sorted: &[u8] = &sarr[..nels as usize * swide];
            let mut results: Vec<io::Result<()>> = Vec::with_capacity(ranges.len());
            thread::scope(|scope| {
                let mut handles = Vec::with_capacity(ranges.len());
                for (ctx, range) in ctxs.iter_mut().zip(ranges.iter()) {
                    let panel = &panel;
                    let layout = &layout;
                    handles.push(
                        scope.spawn(move || search_part(ctx, params, layout, sorted, panel, range)),
                    );
                }
                for h in handles {
                    results.push(
                        h.join()
                            .unwrap_or_else(|_| Err(io::Error::other("search worker panicked"))),
                    );
                }
            });
            for r in results {
                r?;
            }
        }
    }

    let mut stats = SearchStats::default();
    for (t, ctx) in ctxs.into_iter().enumerate() {
        let s = ctx.stats;
        stats.nhits += s.nhits;
        stats.nlass += s.nlass;
        stats.nlive += s.nlive;
        stats.nlcov += s.nlcov;
        ctx.ofile.finish()?;
        let _ = fs::remove_file(scratch.algn_file(t));
    }

    if params.verbose {
        let ave = if stats.nlive > 0 {
            stats.nlcov / stats.nlive
        } else {
            0
        };
        log::info!(
            "total chain hits over {} = {}, {} la's, {} non-redundant la's of ave len {}",
            params.chain_min,
            stats.nhits,
            stats.nlass,
            stats.nlive,
            ave
        );
    }

    Ok(shard_paths)
}

/// Invoke `LAsort -a` then `LAmerge -a` on the per-thread shards; scratch
/// is removed whether or not the utilities succeed.
fn merge_las(params: &Params, shards: &[PathBuf]) -> io::Result<()> {
    let out = format!("{}.las", params.output_root());
    let sorted: Vec<PathBuf> = shards
        .iter()
        .map(|p| {
            let s = p.to_string_lossy();
            PathBuf::from(format!("{}.S.las", s.trim_end_matches(".las")))
        })
        .collect();

    let cleanup = || {
        for p in shards.iter().chain(sorted.iter()) {
            let _ = fs::remove_file(p);
        }
    };

    if params.verbose {
        log::info!("sorting and merging local alignments");
    }

    let status = Command::new("LAsort").arg("-a").args(shards).status();
    match status {
        Ok(s) if s.success() => {}
        Ok(_) => {
            cleanup();
            return Err(cfg_err("alignment sorts with LAsort failed".to_string()));
        }
        Err(e) => {
            cleanup();
            return Err(io::Error::new(e.kind(), "cannot run LAsort"));
        }
    }

    let status = Command::new("LAmerge").arg("-a").arg(&out).args(&sorted).status();
    match status {
        Ok(s) if s.success() => {}
        Ok(_) => {
            cleanup();
            return Err(cfg_err("alignment merge with LAmerge failed".to_string()));
        }
        Err(e) => {
            cleanup();
            return Err(io::Error::new(e.kind(), "cannot run LAmerge"));
        }
    }

    cleanup();
    Ok(())
}

/// Resolve a relative scratch path against the working directory.
fn normalize_sort_path(params: &Params) -> io::Result<Params> {
    let mut p = params.clone();
    if p.sort_path.is_relative() {
        let cwd = std::env::current_dir()?;
        p.sort_path = cwd.join(&p.sort_path);
    }
    Ok(p)
}

#[allow(clippy::too_many_arguments)]
fn check_indices(
    params: &Params,
    t1: &KmerStream,
    t2: &KmerStream,
    p1: &PostList,
    p2: &PostList,
    genome1: &Genome,
    genome2: &Genome,
) -> io::Result<()> {
    if t1.kmer != t2.kmer {
        return Err(cfg_err(format!(
            "indices not made with the same k-mer size ({} vs {})",
            t1.kmer, t2.kmer
        )));
    }
    if p1.nsqrt != p2.nsqrt || t1.nsqrt != p1.nsqrt {
        return Err(cfg_err(format!(
            "genome indices {} & {} built with different thread counts",
            params.src1.display(),
            params.src2.display()
        )));
    }
    if p1.freq < params.freq {
        return Err(cfg_err(format!(
            "genome index for {} has cutoff {} below the requested cutoff",
            params.src1.display(),
            p1.freq
        )));
    }
    if p2.freq < params.freq {
        return Err(cfg_err(format!(
            "genome index for {} has cutoff {} below the requested cutoff",
            params.src2.display(),
            p2.freq
        )));
    }
    if p1.nctg != genome1.nctg || p2.nctg != genome2.nctg {
        return Err(cfg_err(format!(
            "post list contig counts do not match the assemblies ({}/{} vs {}/{})",
            p1.nctg, p2.nctg, genome1.nctg, genome2.nctg
        )));
    }
    Ok(())
}

fn build_layout(t1: &KmerStream, p1: &PostList, p2: &PostList, genome1: &Genome) -> Layout {
    let ibyte = p1.ebyte;
    let icont = p1.cbyte;
    let ipost = ibyte - icont;
    let jbyte = p2.ebyte;
    let jcont = p2.cbyte;
    let jpost = jbyte - jcont;
    let dbyte = ipost.max(jpost);

    let perm1 = p1.perm.clone();
    let perm2 = p2.perm.clone();
    let lengths: Vec<i64> = perm1.iter().map(|&c| genome1.contigs[c].rlen).collect();
    let (nparts, select, idb_split) = split_contigs(&lengths, p1.nsqrt);

    Layout {
        kmer: t1.kmer,
        nthreads: p1.nsqrt,
        ibyte,
        ipost,
        icont,
        isign: ibyte - 1,
        jbyte,
        jpost,
        jcont,
        jsign: jbyte - 1,
        kbyte: t1.kbyte,
        cbyte: t1.hbyte,
        lbyte: t1.hbyte + 1,
        dbyte,
        eshift: 8 * ipost as u32,
        swide: ipost + dbyte + jcont + 2,
        nconts: genome1.nctg,
        nparts,
        select,
        idb_split,
        perm1,
        perm2,
    }
}

/// Turn the per-(worker, contig) seed counts into the scatter cursors the
/// re-import threads consume: an exclusive running sum in (contig-major,
/// worker-minor) order, restarting at every part boundary.  Returns the
/// largest per-part element count (the sort array bound).
fn weave_buckets(workers: &mut [WorkerOut], comp: bool, select: &[usize]) -> i64 {
    let nthreads = workers.len();
    let nconts = select.len();
    let mut nelmax = 0i64;
    let mut cum = 0i64;

    for j in 0..nconts {
        for w in workers.iter_mut() {
            let buck = if comp { &mut w.cbuck } else { &mut w.nbuck };
            cum += buck[j];
            buck[j] = cum;
        }
        if j + 1 == nconts || select[j] != select[j + 1] {
            nelmax = nelmax.max(cum);
            cum = 0;
        }
    }

    for j in (0..nconts).rev() {
        for i in (1..nthreads).rev() {
            let prev = {
                let b = if comp {
                    &workers[i - 1].cbuck
                } else {
                    &workers[i - 1].nbuck
                };
                b[j]
            };
            let buck = if comp {
                &mut workers[i].cbuck
            } else {
                &mut workers[i].nbuck
            };
            buck[j] = prev;
        }
        let first = if j == 0 || select[j] != select[j - 1] {
            0
        } else if comp {
            workers[nthreads - 1].cbuck[j - 1]
        } else {
            workers[nthreads - 1].nbuck[j - 1]
        };
        let buck = if comp {
            &mut workers[0].cbuck
        } else {
            &mut workers[0].nbuck
        };
        buck[j] = first;
    }

    nelmax
}
