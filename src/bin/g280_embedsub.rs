//! Embed WFC3/UVIS subarray exposures into full-frame _f_flt.fits files.

use std::path::PathBuf;

use clap::{AppSettings, Parser};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;

use g280::{write::embedsub_file, G280Error};

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The _flt.fits files to embed.
    #[clap(required = true)]
    data: Vec<PathBuf>,

    /// The directory to write the _f_flt.fits files into. It is created if it
    /// doesn't exist.
    #[clap(short, long)]
    output_dir: PathBuf,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv).
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
    let args = Args::parse();
    setup_logging(args.verbosity);
    std::fs::create_dir_all(&args.output_dir)?;

    let progress = ProgressBar::with_draw_target(
        Some(args.data.len() as _),
        if args.no_progress_bars {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stdout()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} files ({elapsed_precise}<{eta_precise})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    )
    .with_message("Embedding");

    for flt in &args.data {
        let output = embedsub_file(flt, &args.output_dir)?;
        progress.println(format!("{} -> {}", flt.display(), output.display()));
        progress.inc(1);
    }
    progress.finish();
    info!(
        "Embedded {} files into {}",
        args.data.len(),
        args.output_dir.display()
    );
    Ok(())
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    builder.filter_level(match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });
    builder.init();
}
