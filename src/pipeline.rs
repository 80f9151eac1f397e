/// Batch orchestration: run the target search over a list of images,
/// isolating per-file failures so one bad input never aborts the rest.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;
use tracing::{error, info};

use crate::analysis::{SearchResult, TargetSearch};

/// Per-file outcome; errors are carried, not thrown.
pub struct BatchOutcome {
    pub path: PathBuf,
    pub result: Result<SearchResult>,
}

/// Process every path, collecting one outcome per input in input order.
/// Images are independent, so `parallel` fans out one task per image.
pub fn run_batch(paths: &[PathBuf], search: &TargetSearch, parallel: bool) -> Vec<BatchOutcome> {
    if parallel {
        paths.par_iter().map(|p| process_one(p, search)).collect()
    } else {
        paths.iter().map(|p| process_one(p, search)).collect()
    }
}

fn process_one(path: &Path, search: &TargetSearch) -> BatchOutcome {
    let result = search.search_file(path);
    match &result {
        Ok(r) => info!(
            path = %path.display(),
            sources = r.sources.len(),
            min_distance = ?r.min_distance,
            alert = r.alert,
            "image processed"
        ),
        Err(e) => error!(path = %path.display(), "image failed, continuing batch: {:#}", e),
    }
    BatchOutcome {
        path: path.to_path_buf(),
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::fits::write_test_fits;
    use crate::types::SkyCoordinate;

    fn write_valid_image(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut data = vec![0.0_f32; 64 * 64];
        // Faint deterministic ripple so the grid is not degenerate
        for (i, v) in data.iter_mut().enumerate() {
            *v = ((i % 7) as f32 - 3.0) * 0.1;
        }
        let cards = [
            ("CRVAL1", 107.5766458),
            ("CRVAL2", -25.9075789),
            ("CRPIX1", 33.0),
            ("CRPIX2", 33.0),
            ("CDELT1", -0.01),
            ("CDELT2", 0.01),
        ];
        write_test_fits(&path, 64, 64, &data, &cards).unwrap();
        path
    }

    #[test]
    fn test_one_bad_file_does_not_poison_the_batch() {
        let good = write_valid_image("skyscan_batch_good.fits");
        let missing = std::env::temp_dir().join("skyscan_batch_missing.fits");
        let garbage = std::env::temp_dir().join("skyscan_batch_garbage.fits");
        std::fs::write(&garbage, b"not a fits file at all").unwrap();

        let paths = vec![good.clone(), missing.clone(), garbage.clone()];
        let search = TargetSearch::new(SkyCoordinate::new(107.5766458, -25.9075789));

        for parallel in [false, true] {
            let outcomes = run_batch(&paths, &search, parallel);
            assert_eq!(outcomes.len(), 3);
            assert_eq!(outcomes[0].path, good);
            assert!(outcomes[0].result.is_ok());
            assert!(outcomes[1].result.is_err());
            assert!(outcomes[2].result.is_err());
        }

        std::fs::remove_file(&good).ok();
        std::fs::remove_file(&garbage).ok();
    }

    #[test]
    fn test_empty_batch() {
        let search = TargetSearch::new(SkyCoordinate::new(0.0, 0.0));
        assert!(run_batch(&[], &search, true).is_empty());
    }
}
