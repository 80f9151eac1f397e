/// TAN-projection world coordinate system: sky (RA/Dec) ↔ fractional pixel.
///
/// The CD matrix (2×2, degrees/pixel) maps pixel offsets from the reference
/// pixel (CRPIX) to tangent-plane coordinates at the reference sky point
/// (CRVAL). Pixel coordinates follow the FITS convention: (1, 1) is the
/// center of the first grid sample.
///
/// Reference: Calabretta & Greisen (2002), FITS WCS Paper II, §5.1.1.

use anyhow::{bail, Result};
use nalgebra::{Matrix2, Vector2};

/// Raw WCS keywords as read from a FITS header.
#[derive(Debug, Clone, PartialEq)]
pub struct WcsHeader {
    pub crval1: f64,
    pub crval2: f64,
    pub crpix1: f64,
    pub crpix2: f64,
    /// CD1_1, CD1_2, CD2_1, CD2_2; present only if all four cards are.
    pub cd: Option<[f64; 4]>,
    pub cdelt1: Option<f64>,
    pub cdelt2: Option<f64>,
    pub crota2: Option<f64>,
}

/// Resolved gnomonic (TAN) mapping for one image.
#[derive(Debug, Clone)]
pub struct TanWcs {
    /// Reference sky point, radians.
    crval_ra: f64,
    crval_dec: f64,
    /// Reference pixel, 1-based.
    crpix: Vector2<f64>,
    /// Degrees per pixel.
    cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
}

impl TanWcs {
    /// Build the mapping from raw header keywords.
    ///
    /// Uses the CD matrix when present, otherwise CDELT1/2 with an optional
    /// CROTA2 rotation. A missing scale or a singular CD matrix is an input
    /// error.
    pub fn from_header(h: &WcsHeader) -> Result<Self> {
        let cd = if let Some([cd11, cd12, cd21, cd22]) = h.cd {
            Matrix2::new(cd11, cd12, cd21, cd22)
        } else if let (Some(cdelt1), Some(cdelt2)) = (h.cdelt1, h.cdelt2) {
            let rot = h.crota2.unwrap_or(0.0).to_radians();
            let (sin_r, cos_r) = rot.sin_cos();
            Matrix2::new(
                cdelt1 * cos_r,
                -cdelt2 * sin_r,
                cdelt1 * sin_r,
                cdelt2 * cos_r,
            )
        } else {
            bail!("WCS header has neither CD matrix nor CDELT scale");
        };

        let cd_inv = match cd.try_inverse() {
            Some(inv) => inv,
            None => bail!("Singular WCS CD matrix"),
        };

        Ok(TanWcs {
            crval_ra: h.crval1.to_radians(),
            crval_dec: h.crval2.to_radians(),
            crpix: Vector2::new(h.crpix1, h.crpix2),
            cd,
            cd_inv,
        })
    }

    /// Sky → fractional pixel (1-based).
    ///
    /// Never fails: a target at or beyond the tangent-plane horizon projects
    /// to an arbitrarily distant pixel, which downstream distance checks
    /// treat as "nowhere near the grid".
    pub fn world_to_pixel(&self, ra_deg: f64, dec_deg: f64) -> (f64, f64) {
        let (xi, eta) = tan_project(
            ra_deg.to_radians(),
            dec_deg.to_radians(),
            self.crval_ra,
            self.crval_dec,
        );
        let offset = self.cd_inv * Vector2::new(xi.to_degrees(), eta.to_degrees());
        (self.crpix.x + offset.x, self.crpix.y + offset.y)
    }

    /// Fractional pixel (1-based) → sky, RA normalized to [0°, 360°).
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let plane = self.cd * Vector2::new(x - self.crpix.x, y - self.crpix.y);
        let (ra, dec) = inverse_tan_project(
            plane.x.to_radians(),
            plane.y.to_radians(),
            self.crval_ra,
            self.crval_dec,
        );
        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }
}

/// Forward gnomonic projection of `(ra, dec)` onto the tangent plane at
/// `(crval_ra, crval_dec)`. All angles in radians; returns `(ξ, η)`.
fn tan_project(ra: f64, dec: f64, crval_ra: f64, crval_dec: f64) -> (f64, f64) {
    let da = ra - crval_ra;
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = crval_dec.sin_cos();
    let cos_da = da.cos();

    // Points at or behind the tangent plane have denom <= 0; clamping keeps
    // the projection defined everywhere and pushes them far off-grid.
    let denom = (sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da).max(1e-12);

    let xi = cos_dec * da.sin() / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    (xi, eta)
}

/// Inverse gnomonic projection: tangent-plane `(ξ, η)` (radians) at the
/// reference point back to `(ra, dec)` in radians.
fn inverse_tan_project(xi: f64, eta: f64, crval_ra: f64, crval_dec: f64) -> (f64, f64) {
    let (sin_dec0, cos_dec0) = crval_dec.sin_cos();
    let rho_sq = xi * xi + eta * eta;

    if rho_sq < 1e-30 {
        return (crval_ra, crval_dec);
    }

    let rho = rho_sq.sqrt();
    let c = rho.atan();
    let (sin_c, cos_c) = c.sin_cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = crval_ra + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> WcsHeader {
        WcsHeader {
            crval1: 107.5766458,
            crval2: -25.9075789,
            crpix1: 51.0,
            crpix2: 51.0,
            cd: None,
            cdelt1: Some(-0.01),
            cdelt2: Some(0.01),
            crota2: None,
        }
    }

    #[test]
    fn test_reference_point_maps_to_reference_pixel() {
        let h = test_header();
        let wcs = TanWcs::from_header(&h).unwrap();
        let (x, y) = wcs.world_to_pixel(h.crval1, h.crval2);
        assert!((x - 51.0).abs() < 1e-9, "x: {}", x);
        assert!((y - 51.0).abs() < 1e-9, "y: {}", y);
    }

    #[test]
    fn test_axis_directions() {
        let h = test_header();
        let wcs = TanWcs::from_header(&h).unwrap();
        // +0.01 deg in Dec is one pixel step along +y (CDELT2 = 0.01)
        let (_, y) = wcs.world_to_pixel(h.crval1, h.crval2 + 0.01);
        assert!((y - 52.0).abs() < 1e-3, "y: {}", y);
        // RA increases toward -x (CDELT1 < 0), scaled by cos(dec)
        let (x, _) = wcs.world_to_pixel(h.crval1 + 0.01, h.crval2);
        assert!(x < 51.0, "x: {}", x);
    }

    #[test]
    fn test_round_trip() {
        let wcs = TanWcs::from_header(&test_header()).unwrap();
        for (dra, ddec) in [(0.0, 0.0), (0.31, -0.17), (-0.42, 0.25), (0.05, 0.49)] {
            let ra = 107.5766458 + dra;
            let dec = -25.9075789 + ddec;
            let (x, y) = wcs.world_to_pixel(ra, dec);
            let (ra2, dec2) = wcs.pixel_to_world(x, y);
            assert!((ra2 - ra).abs() < 1e-6, "ra {} -> {}", ra, ra2);
            assert!((dec2 - dec).abs() < 1e-6, "dec {} -> {}", dec, dec2);
        }
    }

    #[test]
    fn test_cd_matrix_preferred_over_cdelt() {
        let mut h = test_header();
        // CD with a 90° rotation relative to the CDELT fallback
        h.cd = Some([0.0, 0.01, 0.01, 0.0]);
        let wcs = TanWcs::from_header(&h).unwrap();
        let (x, y) = wcs.world_to_pixel(h.crval1, h.crval2 + 0.01);
        assert!((x - 52.0).abs() < 1e-3, "x: {}", x);
        assert!((y - 51.0).abs() < 1e-3, "y: {}", y);
    }

    #[test]
    fn test_missing_scale_is_an_error() {
        let mut h = test_header();
        h.cdelt1 = None;
        h.cdelt2 = None;
        assert!(TanWcs::from_header(&h).is_err());
    }

    #[test]
    fn test_singular_cd_is_an_error() {
        let mut h = test_header();
        h.cd = Some([0.01, 0.01, 0.01, 0.01]);
        assert!(TanWcs::from_header(&h).is_err());
    }

    #[test]
    fn test_far_target_projects_off_grid() {
        let h = test_header();
        let wcs = TanWcs::from_header(&h).unwrap();
        // 90° off the field center: still a coordinate, just nowhere near
        let (x, y) = wcs.world_to_pixel(h.crval1 + 90.0, 0.0);
        assert!(x.abs() > 1e4 || y.abs() > 1e4, "({}, {})", x, y);
    }
}
