#![allow(dead_code)]

use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{Gamma, Poisson};

use rnaseq_de::prelude::*;

pub const N_GENES: usize = 40;
pub const N_DE: usize = 8;

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
}

/// Two groups of three, condition levels "control" and "treated"
pub fn metadata() -> SampleMetadata {
    let mut meta = SampleMetadata::new(ids("S", 6)).unwrap();
    let levels = ["control", "control", "control", "treated", "treated", "treated"];
    meta.add_condition("condition", levels.iter().map(|s| s.to_string()).collect())
        .unwrap();
    meta
}

/// [`metadata`] plus a batch column crossing both conditions
pub fn metadata_with_batch() -> SampleMetadata {
    let mut meta = metadata();
    let batches = ["b1", "b2", "b1", "b1", "b2", "b2"];
    meta.add_condition("batch", batches.iter().map(|s| s.to_string()).collect())
        .unwrap();
    meta
}

/// Gamma-Poisson counts with dispersion 0.1
///
/// Genes 1..=8 change fourfold in the treated group (odd up, even down),
/// the last gene has no counts at all.
pub fn simulated_counts(seed: u64) -> CountMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let alpha = 0.1;
    let size_factors = [0.8, 1.1, 1.0, 1.2, 0.9, 1.0];
    let mut values = ndarray::Array2::<f64>::zeros((N_GENES, 6));
    for g in 0..N_GENES - 1 {
        let base: f64 = rng.gen_range(3.0..7.0_f64).exp();
        for (j, sf) in size_factors.iter().enumerate() {
            let fold = if g < N_DE && j >= 3 {
                if g % 2 == 0 {
                    4.0
                } else {
                    0.25
                }
            } else {
                1.0
            };
            let mu = base * fold * sf;
            let lambda = Gamma::new(1.0 / alpha, 1.0 / (alpha * mu)).unwrap().sample(&mut rng);
            values[[g, j]] = Poisson::new(lambda.max(1e-8)).unwrap().sample(&mut rng);
        }
    }
    CountMatrix::new(values, ids("gene", N_GENES), ids("S", 6)).unwrap()
}

/// The 4 genes x 4 samples two-versus-two experiment
pub fn four_by_four() -> (CountMatrix, SampleMetadata) {
    let counts = CountMatrix::new(
        ndarray::array![
            [100.0, 120.0, 10.0, 8.0],
            [50.0, 50.0, 51.0, 49.0],
            [80.0, 82.0, 78.0, 80.0],
            [200.0, 190.0, 210.0, 205.0],
        ],
        vec!["G1".into(), "G2".into(), "G3".into(), "G4".into()],
        ids("S", 4),
    )
    .unwrap();
    let mut meta = SampleMetadata::new(ids("S", 4)).unwrap();
    meta.add_condition(
        "condition",
        vec!["a".into(), "a".into(), "b".into(), "b".into()],
    )
    .unwrap();
    (counts, meta)
}
