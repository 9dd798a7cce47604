//! End-to-end pipeline tests over synthetic on-disk indices: run the
//! discovery phases (merge, sort, search, filter) and inspect the
//! per-thread output shards.

mod common;

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use common::{rand_genome, revcomp, write_test_index};
use galign::config::Params;
use galign::overlap::{read_las, Overlap, COMP_FLAG};
use galign::pipeline;

const KMER: usize = 16;

fn setup(contigs1: &[Vec<u8>], contigs2: &[Vec<u8>], freq: usize) -> (TempDir, Params) {
    let dir = tempfile::tempdir().unwrap();
    write_test_index(dir.path(), "g1", contigs1, KMER, 1, freq).unwrap();
    write_test_index(dir.path(), "g2", contigs2, KMER, 1, freq).unwrap();
    let params = Params {
        verbose: false,
        freq,
        chain_min: 100,
        chain_break: 500,
        align_min: 100,
        align_rate: 0.7,
        sort_path: dir.path().to_path_buf(),
        out_root: None,
        src1: dir.path().join("g1"),
        src2: dir.path().join("g2"),
    };
    (dir, params)
}

fn collect(shards: &[PathBuf]) -> Vec<Overlap> {
    let mut all = Vec::new();
    for s in shards {
        all.extend(read_las(s).unwrap());
    }
    all.sort_by_key(|o| o.path.abpos);
    all
}

#[test]
fn identical_genomes_one_perfect_alignment() {
    let mut rng = StdRng::seed_from_u64(42);
    let g = rand_genome(&mut rng, 1500);
    let (_dir, params) = setup(&[g.clone()], &[g], 10);

    let shards = pipeline::align(&params).unwrap();
    let ovls = collect(&shards);

    assert_eq!(ovls.len(), 1);
    let p = &ovls[0].path;
    assert_eq!(ovls[0].flags, 0);
    assert_eq!((p.abpos, p.aepos), (0, 1500));
    assert_eq!((p.bbpos, p.bepos), (0, 1500));
    assert_eq!(p.diffs, 0);
    assert!(p.trace.iter().step_by(2).all(|&d| d == 0));
}

#[test]
fn reverse_complement_genome_flags_comp() {
    let mut rng = StdRng::seed_from_u64(43);
    let g = rand_genome(&mut rng, 1500);
    let rc = revcomp(&g);
    let (_dir, params) = setup(&[g], &[rc], 10);

    let shards = pipeline::align(&params).unwrap();
    let ovls = collect(&shards);

    assert_eq!(ovls.len(), 1);
    let p = &ovls[0].path;
    assert_eq!(ovls[0].flags, COMP_FLAG);
    assert_eq!(p.aepos - p.abpos, 1500);
    assert_eq!(p.bepos - p.bbpos, 1500);
    assert_eq!(p.diffs, 0);
}

#[test]
fn single_substitution_one_diff() {
    let mut rng = StdRng::seed_from_u64(44);
    let g = rand_genome(&mut rng, 1500);
    let mut h = g.clone();
    h[700] ^= 0x1;
    let (_dir, params) = setup(&[g], &[h], 10);

    let shards = pipeline::align(&params).unwrap();
    let ovls = collect(&shards);

    assert_eq!(ovls.len(), 1);
    let p = &ovls[0].path;
    assert_eq!((p.abpos, p.aepos), (0, 1500));
    assert_eq!(p.diffs, 1);
    let hot: Vec<usize> = p
        .trace
        .iter()
        .step_by(2)
        .enumerate()
        .filter(|&(_, &d)| d > 0)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(hot, vec![700 / 100]);
}

#[test]
fn long_insertion_splits_into_two_alignments() {
    let mut rng = StdRng::seed_from_u64(45);
    let g = rand_genome(&mut rng, 3000);
    let ins = rand_genome(&mut rng, 1000);
    let mut h = g[..1500].to_vec();
    h.extend_from_slice(&ins);
    h.extend_from_slice(&g[1500..]);
    let (_dir, params) = setup(&[g], &[h], 10);

    let shards = pipeline::align(&params).unwrap();
    let ovls = collect(&shards);

    assert_eq!(ovls.len(), 2);
    let first = &ovls[0].path;
    let second = &ovls[1].path;
    assert!(first.abpos <= 20 && (first.aepos - 1500).abs() <= 60);
    assert!(first.bbpos <= 20 && (first.bepos - 1500).abs() <= 60);
    assert!((second.abpos - 1500).abs() <= 60 && second.aepos >= 2980);
    assert!((second.bbpos - 2500).abs() <= 60 && second.bepos >= 3980);
}

#[test]
fn repeat_window_over_cutoff_still_bridged() {
    let mut rng = StdRng::seed_from_u64(46);
    let mut g = rand_genome(&mut rng, 1000);
    g.extend(std::iter::repeat(0u8).take(300)); // 300-base A run
    g.extend(rand_genome(&mut rng, 1000));
    let (_dir, params) = setup(&[g.clone()], &[g], 10);

    let shards = pipeline::align(&params).unwrap();
    let ovls = collect(&shards);

    // The repeat suppresses its seeds but the flanks chain across it.
    assert!(!ovls.is_empty());
    let p = &ovls[0].path;
    assert_eq!((p.abpos, p.aepos), (0, 2300));
    assert_eq!(p.diffs, 0);
}

#[test]
fn empty_second_genome_yields_empty_output() {
    let mut rng = StdRng::seed_from_u64(47);
    let g = rand_genome(&mut rng, 1200);
    let (_dir, params) = setup(&[g], &[], 10);

    let shards = pipeline::align(&params).unwrap();
    assert!(!shards.is_empty());
    assert!(collect(&shards).is_empty());
}

#[test]
fn mismatched_kmer_sizes_rejected() {
    let mut rng = StdRng::seed_from_u64(48);
    let g = rand_genome(&mut rng, 600);
    let dir = tempfile::tempdir().unwrap();
    write_test_index(dir.path(), "g1", &[g.clone()], 16, 1, 10).unwrap();
    write_test_index(dir.path(), "g2", &[g], 20, 1, 10).unwrap();
    let params = Params {
        verbose: false,
        freq: 10,
        chain_min: 100,
        chain_break: 500,
        align_min: 100,
        align_rate: 0.7,
        sort_path: dir.path().to_path_buf(),
        out_root: None,
        src1: dir.path().join("g1"),
        src2: dir.path().join("g2"),
    };
    let err = pipeline::align(&params).unwrap_err();
    assert!(err.to_string().contains("k-mer size"));
}

#[test]
fn chain_min_above_contig_length_finds_nothing() {
    let mut rng = StdRng::seed_from_u64(49);
    let g = rand_genome(&mut rng, 400);
    let (_dir, mut params) = setup(&[g.clone()], &[g], 10);
    params.chain_min = 1000;

    let shards = pipeline::align(&params).unwrap();
    assert!(collect(&shards).is_empty());
}

#[test]
fn multi_contig_pairing() {
    let mut rng = StdRng::seed_from_u64(50);
    let c1 = rand_genome(&mut rng, 900);
    let c2 = rand_genome(&mut rng, 700);
    let (_dir, params) = setup(&[c1.clone(), c2.clone()], &[c2, c1], 10);

    let shards = pipeline::align(&params).unwrap();
    let ovls = collect(&shards);

    // Contig 0 of A matches contig 1 of B and vice versa.
    assert_eq!(ovls.len(), 2);
    let mut pairs: Vec<(i32, i32)> = ovls.iter().map(|o| (o.aread, o.bread)).collect();
    pairs.sort();
    assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    for o in &ovls {
        assert_eq!(o.path.diffs, 0);
        assert_eq!(o.path.abpos, 0);
    }
}
