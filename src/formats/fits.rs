use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::types::{DataType, ImageMetadata};
use crate::wcs::WcsHeader;

const FITS_BLOCK_SIZE: usize = 2880;
const FITS_CARD_SIZE: usize = 80;

struct FitsHeader {
    bitpix: i32,
    naxis: i32,
    naxis1: usize,
    naxis2: usize,
    bzero: f64,
    bscale: f64,
    crval1: Option<f64>,
    crval2: Option<f64>,
    crpix1: Option<f64>,
    crpix2: Option<f64>,
    cd1_1: Option<f64>,
    cd1_2: Option<f64>,
    cd2_1: Option<f64>,
    cd2_2: Option<f64>,
    cdelt1: Option<f64>,
    cdelt2: Option<f64>,
    crota2: Option<f64>,
}

fn get_keyword_value(card: &str, keyword: &str) -> Option<String> {
    if !card.starts_with(keyword) {
        return None;
    }
    let eq_pos = card.find('=')?;
    let val = card[eq_pos + 1..].trim_start();
    Some(val.to_string())
}

fn parse_int_keyword(card: &str, keyword: &str) -> Option<i32> {
    let val = get_keyword_value(card, keyword)?;
    let num_str: String = val
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        .collect();
    num_str.parse().ok()
}

fn parse_float_keyword(card: &str, keyword: &str) -> Option<f64> {
    let val = get_keyword_value(card, keyword)?;
    let num_str: String = val
        .chars()
        .take_while(|c| {
            c.is_ascii_digit() || *c == '-' || *c == '+' || *c == '.' || *c == 'E' || *c == 'e'
        })
        .collect();
    num_str.parse().ok()
}

fn read_fits_header(reader: &mut BufReader<File>) -> Result<FitsHeader> {
    let mut hdr = FitsHeader {
        bitpix: 0,
        naxis: 0,
        naxis1: 0,
        naxis2: 0,
        bzero: 0.0,
        bscale: 1.0,
        crval1: None,
        crval2: None,
        crpix1: None,
        crpix2: None,
        cd1_1: None,
        cd1_2: None,
        cd2_1: None,
        cd2_2: None,
        cdelt1: None,
        cdelt2: None,
        crota2: None,
    };

    let mut block = [0u8; FITS_BLOCK_SIZE];
    let mut found_end = false;

    while !found_end {
        reader
            .read_exact(&mut block)
            .context("Failed to read FITS header block")?;

        for i in 0..(FITS_BLOCK_SIZE / FITS_CARD_SIZE) {
            let card_bytes = &block[i * FITS_CARD_SIZE..(i + 1) * FITS_CARD_SIZE];
            let card = std::str::from_utf8(card_bytes).unwrap_or("");

            if card.starts_with("END") && card.as_bytes().get(3).map_or(true, |&b| b == b' ') {
                found_end = true;
                break;
            }

            // Padded keywords first so "NAXIS" does not swallow "NAXIS1"
            if let Some(v) = parse_int_keyword(card, "BITPIX  ") {
                hdr.bitpix = v;
            } else if let Some(v) = parse_int_keyword(card, "NAXIS   ") {
                hdr.naxis = v;
            } else if let Some(v) = parse_int_keyword(card, "NAXIS1") {
                hdr.naxis1 = v as usize;
            } else if let Some(v) = parse_int_keyword(card, "NAXIS2") {
                hdr.naxis2 = v as usize;
            } else if let Some(v) = parse_float_keyword(card, "BZERO") {
                hdr.bzero = v;
            } else if let Some(v) = parse_float_keyword(card, "BSCALE") {
                hdr.bscale = v;
            } else if let Some(v) = parse_float_keyword(card, "CRVAL1") {
                hdr.crval1 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CRVAL2") {
                hdr.crval2 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CRPIX1") {
                hdr.crpix1 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CRPIX2") {
                hdr.crpix2 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CD1_1") {
                hdr.cd1_1 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CD1_2") {
                hdr.cd1_2 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CD2_1") {
                hdr.cd2_1 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CD2_2") {
                hdr.cd2_2 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CDELT1") {
                hdr.cdelt1 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CDELT2") {
                hdr.cdelt2 = Some(v);
            } else if let Some(v) = parse_float_keyword(card, "CROTA2") {
                hdr.crota2 = Some(v);
            }
        }
    }

    if hdr.bitpix == 0 {
        bail!("Missing BITPIX keyword in FITS header");
    }
    if hdr.naxis < 2 {
        bail!("FITS image must have at least 2 dimensions");
    }
    if hdr.naxis1 == 0 || hdr.naxis2 == 0 {
        bail!("Invalid FITS image dimensions");
    }

    Ok(hdr)
}

fn wcs_from_header(hdr: &FitsHeader) -> Option<WcsHeader> {
    let cd = match (hdr.cd1_1, hdr.cd1_2, hdr.cd2_1, hdr.cd2_2) {
        (Some(a), Some(b), Some(c), Some(d)) => Some([a, b, c, d]),
        _ => None,
    };
    Some(WcsHeader {
        crval1: hdr.crval1?,
        crval2: hdr.crval2?,
        crpix1: hdr.crpix1?,
        crpix2: hdr.crpix2?,
        cd,
        cdelt1: hdr.cdelt1,
        cdelt2: hdr.cdelt2,
        crota2: hdr.crota2,
    })
}

/// Read the primary HDU of a FITS file into an `f32` intensity grid.
///
/// Samples are scaled by BZERO/BSCALE. For cubes (NAXIS >= 3) only the
/// first plane is read; the survey cutouts this tool targets are
/// single-plane. Non-finite samples are passed through untouched; the
/// caller substitutes them before analysis.
pub fn read_fits_image(path: &Path) -> Result<(ImageMetadata, Vec<f32>)> {
    let file = File::open(path).context("Failed to open FITS file")?;
    let mut reader = BufReader::new(file);

    let hdr = read_fits_header(&mut reader)?;

    let num_pixels = hdr.naxis1 * hdr.naxis2;
    let bytes_per_pixel = (hdr.bitpix.unsigned_abs() as usize) / 8;
    let data_size = num_pixels * bytes_per_pixel;

    let mut raw_data = vec![0u8; data_size];
    reader
        .read_exact(&mut raw_data)
        .context("Failed to read FITS data")?;

    const CHUNK: usize = 65536;
    const PAR_THRESHOLD: usize = CHUNK * 2;

    let bzero = hdr.bzero;
    let bscale = hdr.bscale;
    let use_par = num_pixels >= PAR_THRESHOLD;
    let mut data = vec![0f32; num_pixels];

    let dtype = match hdr.bitpix {
        8 => {
            let convert = |s: &[u8], d: &mut [f32]| {
                for i in 0..d.len() {
                    d[i] = (bzero + bscale * s[i] as f64) as f32;
                }
            };
            if use_par {
                raw_data
                    .par_chunks(CHUNK)
                    .zip(data.par_chunks_mut(CHUNK))
                    .for_each(|(s, d)| convert(s, d));
            } else {
                convert(&raw_data, &mut data);
            }
            DataType::UInt8
        }
        16 => {
            let convert = |s: &[u8], d: &mut [f32]| {
                for i in 0..d.len() {
                    let val = i16::from_be_bytes([s[i * 2], s[i * 2 + 1]]);
                    d[i] = (bzero + bscale * val as f64) as f32;
                }
            };
            if use_par {
                raw_data
                    .par_chunks(CHUNK * 2)
                    .zip(data.par_chunks_mut(CHUNK))
                    .for_each(|(s, d)| convert(s, d));
            } else {
                convert(&raw_data, &mut data);
            }
            DataType::Int16
        }
        32 => {
            let convert = |s: &[u8], d: &mut [f32]| {
                for i in 0..d.len() {
                    let off = i * 4;
                    let val = i32::from_be_bytes([s[off], s[off + 1], s[off + 2], s[off + 3]]);
                    d[i] = (bzero + bscale * val as f64) as f32;
                }
            };
            if use_par {
                raw_data
                    .par_chunks(CHUNK * 4)
                    .zip(data.par_chunks_mut(CHUNK))
                    .for_each(|(s, d)| convert(s, d));
            } else {
                convert(&raw_data, &mut data);
            }
            DataType::Int32
        }
        -32 => {
            let convert = |s: &[u8], d: &mut [f32]| {
                for i in 0..d.len() {
                    let off = i * 4;
                    let val = f32::from_be_bytes([s[off], s[off + 1], s[off + 2], s[off + 3]]);
                    d[i] = (bzero + bscale * val as f64) as f32;
                }
            };
            if use_par {
                raw_data
                    .par_chunks(CHUNK * 4)
                    .zip(data.par_chunks_mut(CHUNK))
                    .for_each(|(s, d)| convert(s, d));
            } else {
                convert(&raw_data, &mut data);
            }
            DataType::Float32
        }
        -64 => {
            let convert = |s: &[u8], d: &mut [f32]| {
                for i in 0..d.len() {
                    let off = i * 8;
                    let val = f64::from_be_bytes([
                        s[off],
                        s[off + 1],
                        s[off + 2],
                        s[off + 3],
                        s[off + 4],
                        s[off + 5],
                        s[off + 6],
                        s[off + 7],
                    ]);
                    d[i] = (bzero + bscale * val) as f32;
                }
            };
            if use_par {
                raw_data
                    .par_chunks(CHUNK * 8)
                    .zip(data.par_chunks_mut(CHUNK))
                    .for_each(|(s, d)| convert(s, d));
            } else {
                convert(&raw_data, &mut data);
            }
            DataType::Float64
        }
        other => bail!("Unsupported BITPIX value: {}", other),
    };

    let meta = ImageMetadata {
        width: hdr.naxis1,
        height: hdr.naxis2,
        dtype,
        wcs: wcs_from_header(&hdr),
    };

    Ok((meta, data))
}

/// Write a minimal single-HDU BITPIX=-32 FITS file for tests.
#[cfg(test)]
pub(crate) fn write_test_fits(
    path: &Path,
    width: usize,
    height: usize,
    data: &[f32],
    wcs_cards: &[(&str, f64)],
) -> std::io::Result<()> {
    use std::io::Write;

    assert_eq!(data.len(), width * height);

    let mut cards: Vec<String> = vec![
        format!("{:<8}= {:>20}", "SIMPLE", "T"),
        format!("{:<8}= {:>20}", "BITPIX", -32),
        format!("{:<8}= {:>20}", "NAXIS", 2),
        format!("{:<8}= {:>20}", "NAXIS1", width),
        format!("{:<8}= {:>20}", "NAXIS2", height),
    ];
    for (key, val) in wcs_cards {
        cards.push(format!("{:<8}= {:>20.12E}", key, val));
    }
    cards.push("END".to_string());

    let mut bytes = Vec::new();
    for card in &cards {
        let mut b = card.as_bytes().to_vec();
        b.resize(FITS_CARD_SIZE, b' ');
        bytes.extend_from_slice(&b);
    }
    while bytes.len() % FITS_BLOCK_SIZE != 0 {
        bytes.push(b' ');
    }

    for v in data {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    while bytes.len() % FITS_BLOCK_SIZE != 0 {
        bytes.push(0);
    }

    let mut f = File::create(path)?;
    f.write_all(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_back_synthetic_image() {
        let path = std::env::temp_dir().join("skyscan_fits_roundtrip.fits");
        let width = 17;
        let height = 11;
        let data: Vec<f32> = (0..width * height).map(|i| i as f32 * 0.25 - 3.0).collect();
        let cards = [
            ("CRVAL1", 107.5766458),
            ("CRVAL2", -25.9075789),
            ("CRPIX1", 9.0),
            ("CRPIX2", 6.0),
            ("CDELT1", -0.01),
            ("CDELT2", 0.01),
        ];
        write_test_fits(&path, width, height, &data, &cards).unwrap();

        let (meta, read) = read_fits_image(&path).unwrap();
        assert_eq!(meta.width, width);
        assert_eq!(meta.height, height);
        assert_eq!(meta.dtype, DataType::Float32);
        assert_eq!(read, data);

        let wcs = meta.wcs.expect("WCS keywords should be present");
        assert!((wcs.crval1 - 107.5766458).abs() < 1e-9);
        assert!((wcs.crpix2 - 6.0).abs() < 1e-9);
        assert_eq!(wcs.cd, None);
        assert!((wcs.cdelt1.unwrap() + 0.01).abs() < 1e-12);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_wcs_yields_none() {
        let path = std::env::temp_dir().join("skyscan_fits_nowcs.fits");
        let data = vec![1.0f32; 16];
        write_test_fits(&path, 4, 4, &data, &[]).unwrap();

        let (meta, _) = read_fits_image(&path).unwrap();
        assert!(meta.wcs.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_non_fits_bytes() {
        let path = std::env::temp_dir().join("skyscan_fits_garbage.fits");
        std::fs::write(&path, b"this is not a FITS file").unwrap();
        assert!(read_fits_image(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
