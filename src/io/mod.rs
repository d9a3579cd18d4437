//! Reading and writing flat files

mod readers;
mod writers;

pub use readers::{
    append_annotation_records, read_annotation_table, read_count_matrix, read_gene_classes, read_metadata,
    read_results,
};
pub use writers::{
    write_annotated, write_count_matrix, write_json, write_normalized_counts, write_results, write_shrunken_results,
    write_transformed,
};
