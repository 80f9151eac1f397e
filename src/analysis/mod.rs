/// Targeted point-source search: robust background, matched-filter
/// detection, proximity correlation against a predicted position.

mod background;
mod correlate;
mod detection;
mod fitting;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::formats;
use crate::types::SkyCoordinate;
use crate::wcs::TanWcs;

pub use background::{estimate_background, fill_non_finite, BackgroundStats};
pub use correlate::{correlate, Correlation};
pub use detection::DetectedSource;

use detection::DetectionParams;

/// Full search result for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub width: usize,
    pub height: usize,
    /// Robust background statistics of the raw grid.
    pub stats: BackgroundStats,
    /// Detection threshold in intensity units above background.
    pub detection_threshold: f32,
    /// Predicted target position, grid-index (0-based) coordinates.
    pub predicted_x: f32,
    pub predicted_y: f32,
    /// Detected sources; ordering carries no meaning.
    pub sources: Vec<DetectedSource>,
    /// Distance to the nearest source, `None` iff `sources` is empty.
    pub min_distance: Option<f32>,
    /// True iff a source lies strictly within the proximity tolerance.
    pub alert: bool,
}

/// Search configuration with builder-style setup.
pub struct TargetSearch {
    target: SkyCoordinate,
    sigma_clip: f32,
    detection_sigma: f32,
    fwhm: f32,
    tolerance: f32,
    gaussian_centroid: bool,
}

impl TargetSearch {
    pub fn new(target: SkyCoordinate) -> Self {
        TargetSearch {
            target,
            sigma_clip: 3.0,
            detection_sigma: 5.0,
            fwhm: 3.0,
            tolerance: 5.0,
            gaussian_centroid: true,
        }
    }

    /// Background clipping threshold in σ units.
    pub fn with_sigma_clip(mut self, sigma: f32) -> Self {
        self.sigma_clip = sigma.max(0.5);
        self
    }

    /// Source detection threshold in σ above background.
    pub fn with_detection_sigma(mut self, sigma: f32) -> Self {
        self.detection_sigma = sigma.max(1.0);
        self
    }

    /// Expected point-spread FWHM in grid units.
    pub fn with_fwhm(mut self, fwhm: f32) -> Self {
        self.fwhm = fwhm.max(1.0);
        self
    }

    /// Proximity tolerance in pixels for the alert decision.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    /// Use plain moment centroids instead of the Gaussian refinement.
    pub fn without_gaussian_centroid(mut self) -> Self {
        self.gaussian_centroid = false;
        self
    }

    pub fn target(&self) -> SkyCoordinate {
        self.target
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Run the full search on a FITS image: load the grid, resolve the
    /// predicted target through the image's WCS, then delegate to
    /// [`search_grid`](Self::search_grid).
    pub fn search_file<P: AsRef<Path>>(&self, path: P) -> Result<SearchResult> {
        let path = path.as_ref();
        let (meta, mut data) =
            formats::read_image(path).context("Failed to read image for target search")?;
        let wcs_header = meta
            .wcs
            .as_ref()
            .context("Image header carries no WCS keywords")?;
        let wcs = TanWcs::from_header(wcs_header)?;

        let replaced = background::fill_non_finite(&mut data);
        if replaced > 0 {
            debug!(replaced, "substituted non-finite samples with the grid median");
        }

        let (px, py) = wcs.world_to_pixel(self.target.ra_deg, self.target.dec_deg);
        // FITS pixel (1,1) is grid sample (0,0)
        Ok(self.search_grid(
            &data,
            meta.width,
            meta.height,
            (px - 1.0) as f32,
            (py - 1.0) as f32,
        ))
    }

    /// Run the search stages on a finite grid: background estimation,
    /// subtraction, detection, correlation. Stateless; identical input
    /// yields identical output.
    pub fn search_grid(
        &self,
        data: &[f32],
        width: usize,
        height: usize,
        predicted_x: f32,
        predicted_y: f32,
    ) -> SearchResult {
        let stats = background::estimate_background(data, self.sigma_clip);

        let subtracted: Vec<f32> = data.iter().map(|v| v - stats.median).collect();

        let params = DetectionParams {
            detection_sigma: self.detection_sigma,
            fwhm: self.fwhm,
            gaussian_centroid: self.gaussian_centroid,
        };
        let sources = detection::detect_sources(&subtracted, width, height, stats.std_dev, &params);

        let correlation = correlate::correlate(predicted_x, predicted_y, &sources, self.tolerance);
        debug!(
            n_sources = sources.len(),
            min_distance = ?correlation.min_distance,
            alert = correlation.alert,
            "search finished"
        );

        SearchResult {
            width,
            height,
            stats,
            detection_threshold: self.detection_sigma * stats.std_dev,
            predicted_x,
            predicted_y,
            sources,
            min_distance: correlation.min_distance,
            alert: correlation.alert,
        }
    }
}
