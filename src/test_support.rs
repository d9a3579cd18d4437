//! Shared fixtures for unit tests

use ndarray::array;

use crate::data::{CountMatrix, SampleMetadata};
use crate::glm::{Design, DesignSpec};

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Metadata with a single `condition` column, `per_group` samples at level
/// "a" followed by `per_group` at level "b"
pub fn two_group_metadata(per_group: usize) -> SampleMetadata {
    let ids: Vec<String> = (1..=2 * per_group).map(|i| format!("s{}", i)).collect();
    let levels: Vec<String> = (0..2 * per_group)
        .map(|i| if i < per_group { "a".to_string() } else { "b".to_string() })
        .collect();
    let mut meta = SampleMetadata::new(ids).unwrap();
    meta.add_condition("condition", levels).unwrap();
    meta
}

pub fn two_group_design(per_group: usize) -> Design {
    Design::build(&two_group_metadata(per_group), &DesignSpec::single("condition")).unwrap()
}

/// Six overdispersed genes over two groups of three: g1 up, g5 down, g3 all
/// zero, the others unchanged
pub fn small_experiment_counts() -> CountMatrix {
    CountMatrix::new(
        array![
            [10.0, 20.0, 6.0, 90.0, 140.0, 60.0],
            [40.0, 70.0, 45.0, 60.0, 35.0, 55.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [200.0, 150.0, 260.0, 180.0, 240.0, 150.0],
            [30.0, 50.0, 20.0, 5.0, 9.0, 3.0],
            [80.0, 50.0, 110.0, 95.0, 60.0, 70.0],
        ],
        strings(&["g1", "g2", "g3", "g4", "g5", "g6"]),
        strings(&["s1", "s2", "s3", "s4", "s5", "s6"]),
    )
    .unwrap()
}
