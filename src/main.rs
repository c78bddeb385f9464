use std::{
    path::{Path, PathBuf},
    thread::scope,
};

use clap::{AppSettings, Parser};
use crossbeam_channel::{bounded, Sender};
use crossbeam_utils::atomic::AtomicCell;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use ndarray::prelude::*;
use vec1::Vec1;

use g280::{
    cosmic_rays::{remove_spatial_outliers_with_progress, remove_temporal_outliers_with_progress},
    embed::FullFramePlanes,
    extract::Cutout,
    light_curve::make_light_curve,
    read::FltReader,
    trace::{fit_trace, PolynomialDispersion},
    write::{write_full_frame_file, write_light_curve},
    Exposure, G280Error, UVIS_CHIP_SHAPE,
};

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The _flt.fits files of the time series. They are processed in
    /// alphabetical order.
    #[clap(required = true)]
    data: Vec<PathBuf>,

    /// The light curve CSV to be written out.
    #[clap(short, long)]
    output: PathBuf,

    /// The JSON file describing the grism dispersion.
    #[clap(short, long)]
    dispersion_model: PathBuf,

    /// The x pixel position of the source on the (full-frame) direct image.
    #[clap(long)]
    source_x: f64,

    /// The y pixel position of the source on the (full-frame) direct image.
    #[clap(long)]
    source_y: f64,

    /// The spectral order to extract.
    #[clap(long, default_value = "+1", allow_hyphen_values = true)]
    order: String,

    /// The first full-frame row of the extraction aperture.
    #[clap(long)]
    y_min: f64,

    /// The full-frame row after the last row of the extraction aperture.
    #[clap(long)]
    y_max: f64,

    /// The shortest wavelength of the trace [Angstrom].
    #[clap(long, default_value_t = 2000.0)]
    wl_min: f64,

    /// The longest wavelength of the trace [Angstrom].
    #[clap(long, default_value_t = 8000.0)]
    wl_max: f64,

    /// The shortest wavelength summed into the light curve [Angstrom].
    /// Defaults to --wl-min.
    #[clap(long)]
    lc_wl_min: Option<f64>,

    /// The longest wavelength summed into the light curve [Angstrom]. Defaults
    /// to --wl-max.
    #[clap(long)]
    lc_wl_max: Option<f64>,

    /// Temporal cosmic rays deviate from the per-pixel median by more than
    /// this many RMS deviations.
    #[clap(long, default_value_t = 4.0)]
    temporal_sigma: f64,

    /// The number of temporal cosmic-ray passes.
    #[clap(long, default_value_t = 4)]
    temporal_iterations: usize,

    /// Spatial cosmic rays deviate from the local median by more than this
    /// many local standard deviations.
    #[clap(long, default_value_t = 3.0)]
    spatial_sigma: f64,

    /// The side length of the square window used to find spatial cosmic rays.
    #[clap(long, default_value_t = 3)]
    kernel_size: usize,

    /// If given, each exposure is also written to this directory as a
    /// full-frame _f_flt.fits file.
    #[clap(long)]
    full_frame_dir: Option<PathBuf>,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), G280Error> {
    let mut args = Args::parse();
    args.data.sort_unstable();
    setup_logging(args.verbosity);

    let files = Vec1::try_from_vec(args.data).map_err(|_| G280Error::NoInputs)?;
    info!("Reducing {} exposures", files.len());

    let model = PolynomialDispersion::from_json_file(&args.dispersion_model)?;
    let trace = fit_trace(
        &model,
        args.source_x,
        args.source_y,
        &args.order,
        args.wl_min,
        args.wl_max,
    )?;
    if trace.is_empty() {
        return Err(G280Error::EmptyTrace {
            order: args.order,
            wl_min: args.wl_min,
            wl_max: args.wl_max,
        });
    }
    info!(
        "Order {} trace: {} pixels, {:.1} to {:.1} Angstroms",
        args.order,
        trace.len(),
        trace.wavelength[0],
        trace.wavelength[trace.len() - 1]
    );

    let cutout = Cutout::new(
        trace.x.view(),
        args.y_min,
        args.y_max,
        args.kernel_size,
        UVIS_CHIP_SHAPE,
    );
    debug!(
        "Working on rows {:?}, columns {:?} of the full frame",
        cutout.rows, cutout.cols
    );
    if let Some(dir) = &args.full_frame_dir {
        std::fs::create_dir_all(dir)?;
    }

    let num_exposures = files.len();
    let multi_progress = MultiProgress::with_draw_target(if args.no_progress_bars {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stdout()
    });
    let new_bar = |len: usize, unit: &str, message: &'static str| {
        let template = format!(
            "{{msg:17}}: [{{wide_bar:.blue}}] {{pos:2}}/{{len:2}} {unit} ({{elapsed_precise}}<{{eta_precise}})"
        );
        multi_progress.add(
            ProgressBar::new(len as _)
                .with_style(
                    ProgressStyle::default_bar()
                        .template(&template)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                )
                .with_position(0)
                .with_message(message),
        )
    };
    let read_progress = new_bar(num_exposures, "exposures", "Reading");
    let temporal_progress = new_bar(args.temporal_iterations, "passes", "Temporal CRs");
    let spatial_progress = new_bar(num_exposures, "exposures", "Spatial CRs");
    read_progress.tick();
    temporal_progress.tick();
    spatial_progress.tick();

    // Read the exposures on one thread while (optionally) writing out their
    // full frames and cutting them down on this one.
    let (tx, rx) = bounded(2);
    let error = AtomicCell::new(false);
    type Cutouts = (Vec<Exposure>, Array3<f64>, Array3<f64>);
    let (exposures, science, uncertainty) = scope(|s| -> Result<Cutouts, G280Error> {
        let reader = s.spawn(|| read_exposures(&files, tx, &error, &read_progress));

        let mut exposures = Vec::with_capacity(num_exposures);
        let (rows, cols) = cutout.shape();
        let mut science = Array3::zeros((num_exposures, rows, cols));
        let mut uncertainty = Array3::zeros((num_exposures, rows, cols));
        for (i_exposure, exposure, planes) in rx {
            if let Some(dir) = &args.full_frame_dir {
                match write_full_frame_file(&exposure.path, dir, &planes) {
                    Ok(output) => debug!("Wrote {}", output.display()),
                    Err(e) => {
                        error.store(true);
                        return Err(G280Error::from(e));
                    }
                }
            }
            science
                .index_axis_mut(Axis(0), i_exposure)
                .assign(&cutout.slice(planes.science.view()).mapv(f64::from));
            uncertainty
                .index_axis_mut(Axis(0), i_exposure)
                .assign(&cutout.slice(planes.error.view()).mapv(f64::from));
            exposures.push(exposure);
        }

        match reader.join() {
            Ok(result) => result?,
            Err(panic) => std::panic::resume_unwind(panic),
        }
        Ok((exposures, science, uncertainty))
    })?;
    read_progress.finish();

    let temporal = remove_temporal_outliers_with_progress(
        science.view(),
        args.temporal_sigma,
        args.temporal_iterations,
        Some(&temporal_progress),
    )?;
    temporal_progress.finish();
    info!("Replaced {} temporal outliers", temporal.num_flagged());

    let spatial = remove_spatial_outliers_with_progress(
        temporal.cleaned.view(),
        args.spatial_sigma,
        args.kernel_size,
        Some(&spatial_progress),
    )?;
    spatial_progress.finish();
    info!("Replaced {} spatial outliers", spatial.num_flagged());

    let mut spectra = vec![];
    for (image, image_err) in spatial
        .cleaned
        .outer_iter()
        .zip(uncertainty.outer_iter())
    {
        let spectrum = cutout.extract(image, image_err, args.y_min, args.y_max, trace.x.view())?;
        spectra.push(spectrum.counts);
    }
    let num_bins = spectra.first().map(|s| s.len()).unwrap_or(0);
    let mut counts_time_series = Array2::zeros((num_exposures, num_bins));
    for (mut row, spectrum) in counts_time_series.outer_iter_mut().zip(&spectra) {
        row.assign(spectrum);
    }

    let light_curve = make_light_curve(
        trace.wavelength.view(),
        counts_time_series.view(),
        args.lc_wl_min.unwrap_or(args.wl_min),
        args.lc_wl_max.unwrap_or(args.wl_max),
    )?;
    write_light_curve(&args.output, &exposures, &light_curve)?;
    info!("Wrote {}", args.output.display());

    Ok(())
}

/// Read each exposure, embed it into the full frame and send it on. Stops
/// early if the receiving side has signalled an error.
fn read_exposures(
    files: &Vec1<PathBuf>,
    tx: Sender<(usize, Exposure, FullFramePlanes)>,
    error: &AtomicCell<bool>,
    progress_bar: &ProgressBar,
) -> Result<(), G280Error> {
    for (i_exposure, file) in files.iter().enumerate() {
        if error.load() {
            return Ok(());
        }
        let result = read_exposure(file);
        let (exposure, planes) = match result {
            Ok(r) => r,
            Err(e) => {
                error.store(true);
                return Err(e);
            }
        };
        // If the receiver has gone away, it has an error to report.
        if tx.send((i_exposure, exposure, planes)).is_err() {
            return Ok(());
        }
        progress_bar.inc(1);
    }
    Ok(())
}

fn read_exposure(file: &Path) -> Result<(Exposure, FullFramePlanes), G280Error> {
    debug!("Working on {}", file.display());
    let reader = FltReader::new(file)?;
    let planes = reader.read_full_frame()?;
    Ok((reader.exposure, planes))
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
