use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use skyscan::{run_batch, SkyCoordinate, TargetSearch};
use tracing_subscriber::EnvFilter;

fn print_usage(program: &str) {
    eprintln!("Targeted point-source search in sky survey maps");
    eprintln!();
    eprintln!("Usage: {} --ra <RA> --dec <DEC> [OPTIONS] <image.fits>...", program);
    eprintln!();
    eprintln!("Target coordinate:");
    eprintln!("  --ra <RA>            Right ascension: decimal degrees or 07h10m18.395s");
    eprintln!("  --dec <DEC>          Declination: decimal degrees or -25d54m27.284s");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --sigma-clip <S>     Background clipping threshold in sigma (default: 3.0)");
    eprintln!("  --threshold <S>      Detection threshold in sigma (default: 5.0)");
    eprintln!("  --fwhm <F>           Expected source FWHM in pixels (default: 3.0)");
    eprintln!("  --tolerance <T>      Alert tolerance in pixels (default: 5.0)");
    eprintln!("  --no-gaussian-centroid  Use moment centroids only");
    eprintln!("  --sequential         Process images one at a time");
    eprintln!("  --log                Verbose per-stage logging");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --ra 107.577 --dec -25.908 map1.fits map2.fits", program);
    eprintln!(
        "  {} --ra 07h10m18.395s --dec -25d54m27.284s --tolerance 3 cutout.fits",
        program
    );
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut ra: Option<String> = None;
    let mut dec: Option<String> = None;
    let mut sigma_clip = 3.0_f32;
    let mut threshold = 5.0_f32;
    let mut fwhm = 3.0_f32;
    let mut tolerance = 5.0_f32;
    let mut gaussian_centroid = true;
    let mut parallel = true;
    let mut log_enabled = false;
    let mut files: Vec<PathBuf> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ra" => {
                ra = Some(take_value(&args, i, "--ra")?);
                i += 2;
            }
            "--dec" => {
                dec = Some(take_value(&args, i, "--dec")?);
                i += 2;
            }
            "--sigma-clip" => {
                sigma_clip = take_value(&args, i, "--sigma-clip")?
                    .parse()
                    .context("Invalid --sigma-clip value")?;
                i += 2;
            }
            "--threshold" => {
                threshold = take_value(&args, i, "--threshold")?
                    .parse()
                    .context("Invalid --threshold value")?;
                i += 2;
            }
            "--fwhm" => {
                fwhm = take_value(&args, i, "--fwhm")?
                    .parse()
                    .context("Invalid --fwhm value")?;
                i += 2;
            }
            "--tolerance" => {
                tolerance = take_value(&args, i, "--tolerance")?
                    .parse()
                    .context("Invalid --tolerance value")?;
                i += 2;
            }
            "--no-gaussian-centroid" => {
                gaussian_centroid = false;
                i += 1;
            }
            "--sequential" => {
                parallel = false;
                i += 1;
            }
            "--log" => {
                log_enabled = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                return Ok(());
            }
            other if other.starts_with("--") => {
                return Err(anyhow::anyhow!("Unknown option: {}", other));
            }
            file => {
                files.push(PathBuf::from(file));
                i += 1;
            }
        }
    }

    let default_level = if log_enabled { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (ra, dec) = match (ra, dec) {
        (Some(ra), Some(dec)) => (ra, dec),
        _ => {
            print_usage(&args[0]);
            return Err(anyhow::anyhow!("--ra and --dec are required"));
        }
    };
    if files.is_empty() {
        print_usage(&args[0]);
        return Err(anyhow::anyhow!("No input images given"));
    }

    let target = SkyCoordinate::parse(&ra, &dec)?;

    let mut search = TargetSearch::new(target)
        .with_sigma_clip(sigma_clip)
        .with_detection_sigma(threshold)
        .with_fwhm(fwhm)
        .with_tolerance(tolerance);
    if !gaussian_centroid {
        search = search.without_gaussian_centroid();
    }

    println!(
        "Searching {} image(s) for a source at RA {:.6} Dec {:.6} (tolerance {} px)",
        files.len(),
        target.ra_deg,
        target.dec_deg,
        tolerance
    );
    println!(
        "{:<40} {:>12} {:>12} {:>5} {:>10} {:>7}",
        "FILE", "BACKGROUND", "NOISE", "SRC", "MINDIST", "ALERT"
    );
    println!("{}", "-".repeat(92));

    let outcomes = run_batch(&files, &search, parallel);

    let mut alerts = Vec::new();
    for outcome in &outcomes {
        let name = outcome
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| outcome.path.display().to_string());

        match &outcome.result {
            Ok(r) => {
                let min_dist = r
                    .min_distance
                    .map(|d| format!("{:.2}", d))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<40} {:>12.4e} {:>12.4e} {:>5} {:>10} {:>7}",
                    name,
                    r.stats.median,
                    r.stats.std_dev,
                    r.sources.len(),
                    min_dist,
                    if r.alert { "YES" } else { "no" },
                );
                if r.alert {
                    alerts.push(name);
                }
            }
            Err(e) => {
                println!("{:<40} ERROR: {:#}", name, e);
            }
        }
    }

    println!();
    if alerts.is_empty() {
        println!("No significant point source found at the predicted coordinates.");
    } else {
        for name in &alerts {
            println!(
                "!!! ALERT: significant point source detected at the predicted position in {}",
                name
            );
        }
    }

    Ok(())
}

fn take_value(args: &[String], i: usize, flag: &str) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
}
