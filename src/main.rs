//! rnaseq-de command-line interface

use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use rnaseq_de::cli::{Cli, Commands, RunArgs};
use rnaseq_de::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run_workflow(&args),
        Commands::Normalize {
            counts,
            output,
            method,
        } => run_normalize(&counts, &output, method),
        Commands::Transform {
            counts,
            metadata,
            design,
            mode,
            design_aware,
            fit_type,
            output,
        } => run_transform(&counts, &metadata, &design, mode, design_aware, fit_type, &output),
        Commands::Filter {
            counts,
            min_total_count,
            output,
        } => run_filter(&counts, min_total_count, &output),
        Commands::Annotate {
            results,
            mapping,
            cache,
            classifier,
            output,
        } => run_annotate(
            &results,
            AnnotationConfig {
                mapping,
                cache,
                classifiers: classifier,
            },
            &output,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_inputs(counts_path: &Path, metadata_path: &Path, reorder: bool) -> Result<(CountMatrix, SampleMetadata)> {
    let counts = read_count_matrix(counts_path)?;
    let metadata = read_metadata(metadata_path)?;
    let counts = if reorder {
        reorder_to_metadata(&counts, &metadata)?
    } else {
        check_alignment(&counts, &metadata)?;
        counts
    };
    Ok((counts, metadata))
}

fn run_workflow(args: &RunArgs) -> Result<()> {
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .ok();
    }

    let config = args.load_config()?;
    let (counts, metadata) = load_inputs(&args.counts, &args.metadata, args.reorder_samples)?;

    let output = run_pipeline(counts, metadata, &config)?;
    output.write_to(&args.output)?;
    write_json(args.output.join("config.json"), &config)?;

    println!("{}", output.summary);
    Ok(())
}

fn run_normalize(counts_path: &Path, output_path: &Path, method: SizeFactorMethod) -> Result<()> {
    let counts = read_count_matrix(counts_path)?;
    let normalized = NormalizedCounts::from_counts(&counts, method)?;
    let factors: Vec<String> = normalized.size_factors.iter().map(|s| format!("{:.4}", s)).collect();
    info!("Size factors ({:?}): {}", method, factors.join(", "));
    write_normalized_counts(output_path, &normalized)?;
    info!("Wrote normalized counts to {}", output_path.display());
    Ok(())
}

fn run_transform(
    counts_path: &Path,
    metadata_path: &Path,
    design: &[String],
    mode: TransformMode,
    design_aware: bool,
    fit_type: TrendFitMethod,
    output_path: &Path,
) -> Result<()> {
    let (counts, metadata) = load_inputs(counts_path, metadata_path, false)?;
    let experiment = Experiment::new(counts, metadata)?;
    let options = FitOptions {
        fit_type,
        ..Default::default()
    };

    let model = if design_aware && mode != TransformMode::Log2 {
        let spec = DesignSpec {
            factors: design.to_vec(),
            ..Default::default()
        };
        Some(fit_model(&experiment, &spec, &options)?)
    } else {
        None
    };

    let transformed = transform_counts(&experiment, model.as_ref(), mode, !design_aware, &options)?;
    write_transformed(output_path, &transformed)?;
    info!("Wrote transformed matrix to {}", output_path.display());
    Ok(())
}

fn run_filter(counts_path: &Path, min_total_count: f64, output_path: &Path) -> Result<()> {
    let counts = read_count_matrix(counts_path)?;
    let outcome = filter_low_counts(&counts, min_total_count);
    write_count_matrix(output_path, &outcome.counts)?;
    println!(
        "Kept {} genes, dropped {} (total count < {})",
        outcome.n_kept(),
        outcome.n_dropped(),
        min_total_count
    );
    Ok(())
}

fn run_annotate(results_path: &Path, config: AnnotationConfig, output_path: &Path) -> Result<()> {
    let table = read_results(results_path)?;
    let annotated = annotate(&table, &config)?;
    write_annotated(output_path, &annotated)?;
    info!(
        "Wrote {} annotated rows for {} genes to {}",
        annotated.len(),
        annotated.gene_ids().len(),
        output_path.display()
    );
    Ok(())
}
