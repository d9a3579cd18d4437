mod common;

use rnaseq_de::prelude::*;
use tempfile::tempdir;

#[test]
fn test_two_versus_two_scenario() {
    let (counts, metadata) = common::four_by_four();
    let out = run_pipeline(counts, metadata, &PipelineConfig::default()).unwrap();

    assert!(out.filter.dropped.is_empty());
    assert_eq!(out.results.len(), 4);

    let g1 = out.results.get("G1").unwrap();
    assert!(g1.log2_fold_change < -2.5, "G1 log2FC {}", g1.log2_fold_change);
    assert!(g1.padj.unwrap() < 0.05);

    let g2 = out.results.get("G2").unwrap();
    assert!(g2.log2_fold_change.abs() < 0.5);
    assert!(g2.padj.map_or(true, |p| p >= 0.05));

    let called: Vec<&str> = out.significant.gene_ids();
    assert!(called.contains(&"G1"));
    assert!(!called.contains(&"G2"));
    assert_eq!(out.summary.down, 1);
}

#[test]
fn test_simulated_experiment_recovers_changed_genes() {
    let mut config = PipelineConfig::default();
    config.report.lfc_cutoff = 0.0;
    let out = run_pipeline(common::simulated_counts(7), common::metadata(), &config).unwrap();

    assert_eq!(out.filter.dropped, vec![format!("gene{}", common::N_GENES)]);
    assert_eq!(out.contrast, Contrast::new("condition", "treated", "control"));

    let true_hits = out
        .significant
        .rows
        .iter()
        .filter(|r| {
            let idx: usize = r.gene_id.trim_start_matches("gene").parse().unwrap();
            idx <= common::N_DE
        })
        .count();
    assert!(true_hits >= common::N_DE / 2, "only {} true hits", true_hits);
    assert!(out.significant.len() <= common::N_DE + 3);

    for row in &out.significant.rows {
        let idx: usize = row.gene_id.trim_start_matches("gene").parse().unwrap();
        if idx <= common::N_DE {
            // odd genes go up, even genes down
            assert_eq!(row.log2_fold_change > 0.0, idx % 2 == 1, "{}", row.gene_id);
        }
    }
}

#[test]
fn test_interaction_design_reports_last_factor() {
    let mut config = PipelineConfig::default();
    config.model.design = vec!["batch".to_string(), "condition".to_string()];
    config.model.interaction = true;
    let out = run_pipeline(common::simulated_counts(7), common::metadata_with_batch(), &config).unwrap();

    assert_eq!(out.model.design.coef_names().len(), 4);
    assert_eq!(out.contrast, Contrast::new("condition", "treated", "control"));
    assert_eq!(out.results.contrast, "condition treated vs control");
    assert_eq!(out.results.len(), common::N_GENES - 1);

    let ids = out.results.gene_ids();
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
    assert!(out.results.rows.iter().all(|r| r.log2_fold_change.is_finite()));
}

#[test]
fn test_run_writes_output_directory() {
    let dir = tempdir().unwrap();
    let counts_path = dir.path().join("counts.tsv");
    let metadata_path = dir.path().join("samples.csv");
    write_count_matrix(&counts_path, &common::simulated_counts(11)).unwrap();
    std::fs::write(
        &metadata_path,
        "sample,condition\nS1,control\nS2,control\nS3,control\nS4,treated\nS5,treated\nS6,treated\n",
    )
    .unwrap();

    let counts = read_count_matrix(&counts_path).unwrap();
    let metadata = read_metadata(&metadata_path).unwrap();
    let out = run_pipeline(counts, metadata, &PipelineConfig::default()).unwrap();

    let out_dir = dir.path().join("out");
    out.write_to(&out_dir).unwrap();
    let results = read_results(out_dir.join("results.tsv")).unwrap();
    assert_eq!(results.len(), out.results.len());
    assert_eq!(results.contrast, "condition treated vs control");

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["n_genes"], out.results.len());
}

#[test]
fn test_misordered_samples_need_explicit_reordering() {
    let counts = common::simulated_counts(3);
    let order = [1, 0, 2, 3, 4, 5];
    let shuffled = CountMatrix::new(
        counts.counts().select(ndarray::Axis(1), &order),
        counts.gene_ids().to_vec(),
        order.iter().map(|&j| counts.sample_ids()[j].clone()).collect(),
    )
    .unwrap();
    let metadata = common::metadata();

    let err = run_pipeline(shuffled.clone(), metadata.clone(), &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, DeError::SampleOrder { .. }));

    let reordered = reorder_to_metadata(&shuffled, &metadata).unwrap();
    assert_eq!(reordered.counts(), counts.counts());
    assert!(run_pipeline(reordered, metadata, &PipelineConfig::default()).is_ok());
}

#[test]
fn test_single_level_factor_is_rejected() {
    let counts = common::simulated_counts(5);
    let mut metadata = SampleMetadata::new(counts.sample_ids().to_vec()).unwrap();
    metadata.add_condition("condition", vec!["x".to_string(); 6]).unwrap();

    let err = run_pipeline(counts, metadata, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, DeError::DegenerateDesign { .. }));
}
