//! Where annotation records come from

use std::path::{Path, PathBuf};

use super::{AnnotationRecord, AnnotationTable};
use crate::error::{DeError, Result};
use crate::io::{append_annotation_records, read_annotation_table};

/// Anything that can map gene ids to annotation records
pub trait AnnotationSource {
    /// Records of `ids`; ids without any mapping are simply absent
    fn lookup(&self, ids: &[String]) -> Result<AnnotationTable>;
}

/// Tab-delimited `gene_id, symbol, term` export of an annotation service
#[derive(Debug, Clone)]
pub struct FileAnnotationSource {
    path: PathBuf,
}

impl FileAnnotationSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl AnnotationSource for FileAnnotationSource {
    fn lookup(&self, ids: &[String]) -> Result<AnnotationTable> {
        let table = read_annotation_table(&self.path).map_err(|e| DeError::AnnotationSource {
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        Ok(table.restrict_to(ids))
    }
}

/// Local TSV cache in front of another source
///
/// Cached ids are answered locally. Misses go to the inner source once and
/// are appended to the cache, with an empty record for ids the source does
/// not know. Without an inner source the cache alone answers and uncached
/// ids stay unannotated.
#[derive(Debug, Clone)]
pub struct CachedAnnotationSource<S> {
    cache: PathBuf,
    inner: Option<S>,
}

impl<S: AnnotationSource> CachedAnnotationSource<S> {
    pub fn new<P: AsRef<Path>>(cache: P, inner: Option<S>) -> Self {
        Self {
            cache: cache.as_ref().to_path_buf(),
            inner,
        }
    }

    fn read_cache(&self) -> Result<AnnotationTable> {
        if self.cache.exists() {
            read_annotation_table(&self.cache)
        } else {
            Ok(AnnotationTable::default())
        }
    }
}

impl<S: AnnotationSource> AnnotationSource for CachedAnnotationSource<S> {
    fn lookup(&self, ids: &[String]) -> Result<AnnotationTable> {
        let mut cached = self.read_cache()?;
        let misses: Vec<String> = ids.iter().filter(|id| !cached.contains(id)).cloned().collect();
        if misses.is_empty() {
            log::info!("All {} ids served from annotation cache {}", ids.len(), self.cache.display());
            return Ok(cached.restrict_to(ids));
        }

        let inner = match &self.inner {
            Some(inner) => inner,
            None => {
                log::warn!(
                    "{} ids are not in annotation cache {} and no source is configured",
                    misses.len(),
                    self.cache.display()
                );
                return Ok(cached.restrict_to(ids));
            }
        };

        let found = inner.lookup(&misses)?;
        let mut new_records: Vec<AnnotationRecord> = found.records().to_vec();
        for id in &misses {
            if !found.contains(id) {
                new_records.push(AnnotationRecord {
                    gene_id: id.clone(),
                    symbol: None,
                    term: None,
                });
            }
        }
        append_annotation_records(&self.cache, &new_records)?;
        log::info!(
            "Looked up {} uncached ids, {} records added to {}",
            misses.len(),
            new_records.len(),
            self.cache.display()
        );
        cached.extend(new_records);
        Ok(cached.restrict_to(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    /// Counts how many ids reach the wrapped source
    struct Counting<S> {
        inner: S,
        asked: Cell<usize>,
    }

    impl<S: AnnotationSource> AnnotationSource for Counting<S> {
        fn lookup(&self, ids: &[String]) -> Result<AnnotationTable> {
            self.asked.set(self.asked.get() + ids.len());
            self.inner.lookup(ids)
        }
    }

    fn mapping_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tsymbol\tterm").unwrap();
        writeln!(file, "g1\tABC1\tGO:0001").unwrap();
        writeln!(file, "g1\tABC1\tGO:0002").unwrap();
        writeln!(file, "g2\tDEF2\tGO:0003").unwrap();
        file
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_file_source_filters_ids() {
        let file = mapping_file();
        let table = FileAnnotationSource::new(file.path()).lookup(&ids(&["g1", "g7"])).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table.contains("g7"));
    }

    #[test]
    fn test_missing_file_is_annotation_error() {
        let source = FileAnnotationSource::new("/nonexistent/annotation.tsv");
        assert!(matches!(source.lookup(&ids(&["g1"])), Err(DeError::AnnotationSource { .. })));
    }

    #[test]
    fn test_cache_looks_up_each_id_once() {
        let file = mapping_file();
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("cache.tsv");
        let source = CachedAnnotationSource::new(
            &cache_path,
            Some(Counting {
                inner: FileAnnotationSource::new(file.path()),
                asked: Cell::new(0),
            }),
        );

        let first = source.lookup(&ids(&["g1", "g5"])).unwrap();
        assert_eq!(first.for_gene("g1").len(), 2);
        let second = source.lookup(&ids(&["g1", "g5", "g2"])).unwrap();
        assert_eq!(second.for_gene("g2").len(), 1);
        assert_eq!(source.inner.as_ref().unwrap().asked.get(), 3);

        let offline: CachedAnnotationSource<FileAnnotationSource> = CachedAnnotationSource::new(&cache_path, None);
        let table = offline.lookup(&ids(&["g1", "g2", "g5"])).unwrap();
        assert_eq!(table.for_gene("g1").len(), 2);
        assert!(table.for_gene("g5")[0].symbol.is_none());
    }
}
