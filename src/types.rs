use anyhow::{bail, Context, Result};

use crate::wcs::WcsHeader;

/// Source sample type of a FITS image (BITPIX). All data is converted to
/// `f32` on load; this records what was in the file.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum DataType {
    UInt8,
    Int16,
    Int32,
    Float32,
    Float64,
}

pub struct ImageMetadata {
    pub width: usize,
    pub height: usize,
    pub dtype: DataType,
    /// Raw WCS keywords from the header, if present.
    pub wcs: Option<WcsHeader>,
}

/// A fixed celestial position (ICRS right ascension / declination, degrees).
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct SkyCoordinate {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyCoordinate {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        SkyCoordinate { ra_deg, dec_deg }
    }

    /// Parse a coordinate pair. Each component is either decimal degrees or
    /// sexagesimal: `07h10m18.395s` for RA, `-25d54m27.284s` for Dec.
    pub fn parse(ra: &str, dec: &str) -> Result<Self> {
        let ra_deg = parse_ra(ra).with_context(|| format!("Invalid RA: {}", ra))?;
        let dec_deg = parse_dec(dec).with_context(|| format!("Invalid Dec: {}", dec))?;
        if !(-90.0..=90.0).contains(&dec_deg) {
            bail!("Declination {} out of range [-90, 90]", dec_deg);
        }
        Ok(SkyCoordinate { ra_deg, dec_deg })
    }
}

fn parse_ra(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.contains('h') {
        // Hour angle: 1h = 15 degrees
        Ok(parse_sexagesimal(s, 'h')? * 15.0)
    } else {
        s.parse::<f64>().context("expected decimal degrees or HhMmS.Ss")
    }
}

fn parse_dec(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.contains('d') {
        parse_sexagesimal(s, 'd')
    } else {
        s.parse::<f64>().context("expected decimal degrees or DdMmS.Ss")
    }
}

/// Parse `WWxMMmSS.Ss` where `x` is the major-unit marker (`h` or `d`).
/// The seconds field (and trailing `s`) may be omitted.
fn parse_sexagesimal(s: &str, major: char) -> Result<f64> {
    let (sign, rest) = if let Some(r) = s.strip_prefix('-') {
        (-1.0, r)
    } else if let Some(r) = s.strip_prefix('+') {
        (1.0, r)
    } else {
        (1.0, s)
    };

    let (whole, rest) = rest
        .split_once(major)
        .with_context(|| format!("missing '{}' separator", major))?;
    let whole: f64 = whole.parse().context("bad whole part")?;

    let (minutes, seconds) = match rest.split_once('m') {
        Some((m, sec)) => (m, sec.strip_suffix('s').unwrap_or(sec)),
        None => (rest, ""),
    };
    let minutes: f64 = if minutes.is_empty() {
        0.0
    } else {
        minutes.parse().context("bad minutes part")?
    };
    let seconds: f64 = if seconds.is_empty() {
        0.0
    } else {
        seconds.parse().context("bad seconds part")?
    };

    if !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        bail!("minutes/seconds out of range");
    }

    Ok(sign * (whole + minutes / 60.0 + seconds / 3600.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        let c = SkyCoordinate::parse("107.5766", "-25.9076").unwrap();
        assert!((c.ra_deg - 107.5766).abs() < 1e-9);
        assert!((c.dec_deg + 25.9076).abs() < 1e-9);
    }

    #[test]
    fn test_parse_sexagesimal() {
        let c = SkyCoordinate::parse("07h10m18.395s", "-25d54m27.284s").unwrap();
        // 7h10m18.395s = (7 + 10/60 + 18.395/3600) * 15 deg
        assert!((c.ra_deg - 107.5766458).abs() < 1e-5, "ra: {}", c.ra_deg);
        assert!((c.dec_deg + 25.9075789).abs() < 1e-5, "dec: {}", c.dec_deg);
    }

    #[test]
    fn test_parse_no_seconds() {
        let c = SkyCoordinate::parse("12h30m", "+45d15m").unwrap();
        assert!((c.ra_deg - 187.5).abs() < 1e-9, "ra: {}", c.ra_deg);
        assert!((c.dec_deg - 45.25).abs() < 1e-9, "dec: {}", c.dec_deg);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SkyCoordinate::parse("not-an-angle", "0.0").is_err());
        assert!(SkyCoordinate::parse("10h70m", "0.0").is_err());
        assert!(SkyCoordinate::parse("0.0", "91.0").is_err());
    }
}
