mod common;

use std::io::Write;

use rnaseq_de::annotation::FileAnnotationSource;
use rnaseq_de::prelude::*;
use tempfile::NamedTempFile;

fn mean_trend_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.model.fit_type = TrendFitMethod::Mean;
    config
}

#[test]
fn test_filter_is_idempotent_and_respects_threshold() {
    let counts = common::simulated_counts(1);
    for threshold in [0.0, 10.0, 500.0, 5000.0] {
        let once = filter_low_counts(&counts, threshold);
        let twice = filter_low_counts(&once.counts, threshold);
        assert_eq!(twice.counts, once.counts);
        assert!(twice.dropped.is_empty());

        for total in once.counts.row_sums() {
            assert!(total >= threshold);
        }
        for id in &once.dropped {
            let idx = counts.gene_index(id).unwrap();
            assert!(counts.gene_counts(idx).sum() < threshold);
        }
        assert_eq!(once.n_kept() + once.n_dropped(), counts.n_genes());
    }
}

#[test]
fn test_transforms_keep_identifiers() {
    let counts = filter_low_counts(&common::simulated_counts(2), 10.0).counts;
    let experiment = Experiment::new(counts.clone(), common::metadata()).unwrap();
    let options = FitOptions {
        fit_type: TrendFitMethod::Mean,
        ..Default::default()
    };
    let model = fit_model(&experiment, &DesignSpec::single("condition"), &options).unwrap();

    for mode in [TransformMode::Log2, TransformMode::Vst, TransformMode::Rlog] {
        for blind in [true, false] {
            let out = transform_counts(&experiment, Some(&model), mode, blind, &options).unwrap();
            assert_eq!(out.gene_ids, counts.gene_ids());
            assert_eq!(out.sample_ids, counts.sample_ids());
            assert_eq!(out.values.dim(), (counts.n_genes(), counts.n_samples()));
            assert!(out.values.iter().all(|v| v.is_finite()), "{:?} blind={}", mode, blind);
        }
    }
}

#[test]
fn test_shrinkage_keeps_significant_set() {
    let config = mean_trend_config();
    let out = run_pipeline(common::simulated_counts(4), common::metadata(), &config).unwrap();
    let padj_cutoff = config.report.padj_cutoff;
    let unshrunk = significant(&out.results, padj_cutoff, 0.0);

    for prior in [
        ShrinkagePrior::Normal,
        ShrinkagePrior::AdaptiveT,
        ShrinkagePrior::AdaptiveHeavyTailed,
    ] {
        let shrunk = shrink_lfc(&out.model, &out.results, &out.contrast, prior).unwrap();
        assert_eq!(
            significant(&shrunk.table, padj_cutoff, 0.0).gene_ids(),
            unshrunk.gene_ids(),
            "{:?}",
            prior
        );

        let mut with_prior = config.clone();
        with_prior.shrinkage.prior = Some(prior);
        let rerun = run_pipeline(common::simulated_counts(4), common::metadata(), &with_prior).unwrap();
        assert_eq!(rerun.significant.gene_ids(), out.significant.gene_ids());
    }
}

#[test]
fn test_annotation_join_keeps_every_row() {
    let out = run_pipeline(common::simulated_counts(6), common::metadata(), &mean_trend_config()).unwrap();

    let mut mapping = NamedTempFile::new().unwrap();
    writeln!(mapping, "gene_id\tsymbol\tterm").unwrap();
    writeln!(mapping, "gene1\tSYM1\tGO:0000001").unwrap();
    writeln!(mapping, "gene1\tSYM1\tGO:0000002").unwrap();
    writeln!(mapping, "gene2\tSYM2\tNA").unwrap();
    writeln!(mapping, "unrelated\tSYMX\tGO:0000003").unwrap();
    mapping.flush().unwrap();

    let ids: Vec<String> = out.results.rows.iter().map(|r| r.gene_id.clone()).collect();
    let annotation = FileAnnotationSource::new(mapping.path()).lookup(&ids).unwrap();
    let joined = left_join(&out.results, &annotation);

    assert_eq!(joined.gene_ids(), out.results.gene_ids());
    assert_eq!(joined.len(), out.results.len() + 1);

    let gene1: Vec<_> = joined.rows.iter().filter(|r| r.result.gene_id == "gene1").collect();
    assert_eq!(gene1.len(), 2);
    let gene2 = joined.rows.iter().find(|r| r.result.gene_id == "gene2").unwrap();
    assert_eq!(gene2.symbol.as_deref(), Some("SYM2"));
    assert_eq!(gene2.term, None);
    let gene3 = joined.rows.iter().find(|r| r.result.gene_id == "gene3").unwrap();
    assert_eq!((gene3.symbol.as_ref(), gene3.term.as_ref()), (None, None));
}

#[test]
fn test_ranking_is_deterministic() {
    let config = mean_trend_config();
    let first = run_pipeline(common::simulated_counts(9), common::metadata(), &config).unwrap();
    let second = run_pipeline(common::simulated_counts(9), common::metadata(), &config).unwrap();

    let ranked = rank_by_padj(&first.results);
    let again = rank_by_padj(&second.results);
    assert_eq!(ranked.gene_ids(), again.gene_ids());
    let padj = |t: &ResultTable| t.rows.iter().map(|r| r.padj).collect::<Vec<_>>();
    assert_eq!(padj(&ranked), padj(&again));
    assert_eq!(rank_by_padj(&ranked).gene_ids(), ranked.gene_ids());
    assert_eq!(first.significant.gene_ids(), second.significant.gene_ids());

    for pair in ranked.rows.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        match (a.padj, b.padj) {
            (Some(x), Some(y)) => assert!(x < y || (x == y && a.gene_id < b.gene_id)),
            (None, Some(_)) => panic!("{} without padj ranked before {}", a.gene_id, b.gene_id),
            (Some(_), None) => {}
            (None, None) => assert!(a.gene_id < b.gene_id),
        }
    }
    assert_eq!(top_n(&first.results, 5).gene_ids(), ranked.gene_ids()[..5].to_vec());
}
