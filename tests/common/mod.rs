//! Helpers building small on-disk indices for pipeline tests: the same
//! `.gdb`/`.bps`/`.ktab`/`.post` files the production index builder would
//! emit, constructed directly from in-memory contigs.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::Rng;

const PREFIX_BASES: usize = 12;
const PREFIX_SPACE: u64 = 1 << (2 * PREFIX_BASES as u32);

pub fn rand_genome(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen_range(0..4u8)).collect()
}

pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| b ^ 0x3).collect()
}

fn pack_2bit(seq: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; seq.len().div_ceil(4)];
    for (i, &b) in seq.iter().enumerate() {
        out[i >> 2] |= b << (6 - 2 * (i & 3));
    }
    out
}

fn bytes_for(v: u64) -> usize {
    let mut n = 1;
    while n < 8 && v >= 1u64 << (8 * n) {
        n += 1;
    }
    n
}

struct Occur {
    kbytes: Vec<u8>,
    contig: u32,
    pos: u64,
    rc: bool,
}

fn kmer_bytes(seq: &[u8], kmer: usize) -> Vec<u8> {
    pack_2bit(&seq[..kmer])
}

/// Write `.gdb`, `.bps`, `.ktab(.p)` and `.post(.p)` for one genome.
pub fn write_test_index(
    dir: &Path,
    root: &str,
    contigs: &[Vec<u8>],
    kmer: usize,
    nsqrt: usize,
    freq: usize,
) -> io::Result<()> {
    assert!(kmer > PREFIX_BASES && kmer % 4 == 0);
    let nthr = nsqrt * nsqrt;
    let kb_total = kmer / 4;
    let hbyte = kb_total - 3;
    let kbyte = hbyte + 2;

    // Assembly skeleton and 2-bit bases.
    let mut bps = Vec::new();
    let mut recs: Vec<(i64, i64)> = Vec::new(); // (rlen, boff)
    let mut totlen = 0i64;
    let mut maxlen = 0i64;
    for c in contigs {
        recs.push((c.len() as i64, bps.len() as i64));
        bps.extend_from_slice(&pack_2bit(c));
        totlen += c.len() as i64;
        maxlen = maxlen.max(c.len() as i64);
    }
    {
        let mut f = File::create(dir.join(format!("{}.gdb", root)))?;
        f.write_all(&(contigs.len() as i32).to_le_bytes())?;
        f.write_all(&totlen.to_le_bytes())?;
        f.write_all(&maxlen.to_le_bytes())?;
        for (rlen, boff) in &recs {
            f.write_all(&rlen.to_le_bytes())?;
            f.write_all(&boff.to_le_bytes())?;
        }
        File::create(dir.join(format!("{}.bps", root)))?.write_all(&bps)?;
    }

    // Canonical k-mer occurrences.
    let mut occs: Vec<Occur> = Vec::new();
    for (ci, c) in contigs.iter().enumerate() {
        if c.len() < kmer {
            continue;
        }
        for p in 0..=c.len() - kmer {
            let fwd = &c[p..p + kmer];
            let rev = revcomp(fwd);
            let (canon, rc) = if rev[..] < fwd[..] {
                (rev.clone(), true)
            } else {
                (fwd.to_vec(), false)
            };
            occs.push(Occur {
                kbytes: kmer_bytes(&canon, kmer),
                contig: ci as u32,
                pos: p as u64,
                rc,
            });
        }
    }
    occs.sort_by(|a, b| {
        a.kbytes
            .cmp(&b.kbytes)
            .then(a.contig.cmp(&b.contig))
            .then(a.pos.cmp(&b.pos))
    });

    // Group into table entries (count saturates at 255; the position list
    // is capped identically so counts and posts stay 1:1).
    struct Entry {
        kbytes: Vec<u8>,
        lcp: u8,
        posts: Vec<(u32, u64, bool)>,
    }
    let mut entries: Vec<Entry> = Vec::new();
    let mut i = 0usize;
    while i < occs.len() {
        let mut j = i + 1;
        while j < occs.len() && occs[j].kbytes == occs[i].kbytes {
            j += 1;
        }
        let posts: Vec<(u32, u64, bool)> = occs[i..j]
            .iter()
            .take(255)
            .map(|o| (o.contig, o.pos, o.rc))
            .collect();
        entries.push(Entry {
            kbytes: occs[i].kbytes.clone(),
            lcp: 0,
            posts,
        });
        i = j;
    }

    // Base-level lcp with the previous entry; prefix-run firsts carry the
    // sentinel 12.
    let prefix_of = |kb: &[u8]| -> u32 {
        ((kb[0] as u32) << 16) | ((kb[1] as u32) << 8) | kb[2] as u32
    };
    for e in 0..entries.len() {
        if e == 0 || prefix_of(&entries[e].kbytes) != prefix_of(&entries[e - 1].kbytes) {
            entries[e].lcp = PREFIX_BASES as u8;
        } else {
            let (a, b) = (&entries[e - 1].kbytes, &entries[e].kbytes);
            let mut lcp = 0usize;
            while lcp < kmer {
                let by = lcp / 4;
                let sh = 6 - 2 * (lcp % 4);
                if (a[by] >> sh) & 3 != (b[by] >> sh) & 3 {
                    break;
                }
                lcp += 1;
            }
            entries[e].lcp = lcp as u8;
        }
    }

    // Post entry geometry.
    let pbyte = bytes_for(maxlen.max(1) as u64);
    let mut cbyte = 1usize;
    while (contigs.len() as u64) > (1u64 << (8 * cbyte - 1)) {
        cbyte += 1;
    }
    let maxp = {
        let mut best = 0i64;
        let mut run = 0i64;
        let mut last = u32::MAX;
        for e in &entries {
            let p = prefix_of(&e.kbytes);
            if p != last {
                run = 0;
                last = p;
            }
            run += 1;
            best = best.max(run);
        }
        best
    };

    // Shard assignment by fixed prefix ranges shared across genomes.
    let shard_of = |pre: u32| -> usize { ((pre as u64 * nthr as u64) / PREFIX_SPACE) as usize };

    let mut shard_entries: Vec<Vec<usize>> = vec![Vec::new(); nthr];
    for (e, entry) in entries.iter().enumerate() {
        shard_entries[shard_of(prefix_of(&entry.kbytes))].push(e);
    }

    // Stubs.
    {
        let mut f = File::create(dir.join(format!("{}.ktab", root)))?;
        f.write_all(&(kmer as i32).to_le_bytes())?;
        f.write_all(&(nsqrt as i32).to_le_bytes())?;
        f.write_all(&1i32.to_le_bytes())?;
        f.write_all(&3i32.to_le_bytes())?;

        let mut g = File::create(dir.join(format!("{}.post", root)))?;
        g.write_all(&(pbyte as i32).to_le_bytes())?;
        g.write_all(&(cbyte as i32).to_le_bytes())?;
        g.write_all(&(nsqrt as i32).to_le_bytes())?;
        g.write_all(&maxp.to_le_bytes())?;
        g.write_all(&(freq as i32).to_le_bytes())?;
        g.write_all(&(contigs.len() as i32).to_le_bytes())?;
        for c in 0..contigs.len() {
            g.write_all(&(c as i32).to_le_bytes())?;
        }
    }

    // Shard files.
    for (s, idxs) in shard_entries.iter().enumerate() {
        // Prefix run list.
        let mut runs: Vec<(u32, i64)> = Vec::new();
        for &e in idxs {
            let p = prefix_of(&entries[e].kbytes);
            match runs.last_mut() {
                Some(r) if r.0 == p => r.1 += 1,
                _ => runs.push((p, 1)),
            }
        }

        let mut f = File::create(dir.join(format!("{}.ktab.{}", root, s + 1)))?;
        f.write_all(&(kmer as i32).to_le_bytes())?;
        f.write_all(&(idxs.len() as i64).to_le_bytes())?;
        f.write_all(&(runs.len() as i64).to_le_bytes())?;
        for &(p, n) in &runs {
            f.write_all(&[(p >> 16) as u8, (p >> 8) as u8, p as u8])?;
            f.write_all(&n.to_le_bytes())?;
        }
        let mut body = Vec::with_capacity(idxs.len() * kbyte);
        for &e in idxs {
            body.extend_from_slice(&entries[e].kbytes[3..]);
            body.push(entries[e].posts.len() as u8);
            body.push(entries[e].lcp);
        }
        f.write_all(&body)?;

        let mut g = File::create(dir.join(format!("{}.post.{}", root, s + 1)))?;
        g.write_all(&(pbyte as i32).to_le_bytes())?;
        g.write_all(&(cbyte as i32).to_le_bytes())?;
        let nposts: i64 = idxs.iter().map(|&e| entries[e].posts.len() as i64).sum();
        g.write_all(&nposts.to_le_bytes())?;
        let ebyte = pbyte + cbyte;
        let mut body = Vec::with_capacity(nposts as usize * ebyte);
        for &e in idxs {
            for &(contig, pos, rc) in &entries[e].posts {
                let mut v = pos | (contig as u64) << (8 * pbyte as u32);
                if rc {
                    v |= 1u64 << (8 * ebyte as u32 - 1);
                }
                for b in 0..ebyte {
                    body.push((v >> (8 * b)) as u8);
                }
            }
        }
        g.write_all(&body)?;
    }

    Ok(())
}
