use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use reflow_trace::{build_comparison, Comparison, Params, ProfileTable, DEFAULT_PROFILE};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reflow oven run plotter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plot a temperature log against heater duty-cycle and a reference profile
    Plot(PlotArgs),
    /// List the available reference profiles
    Profiles(ProfilesArgs),
}

#[derive(Parser, Debug)]
struct PlotArgs {
    /// Temperature log from the logger (`cat /dev/ttyACM* >> log.txt`)
    #[arg(value_hint = ValueHint::FilePath)]
    log: PathBuf,

    /// Heater duty-cycle log (`m:s, 0..1` or `start-end: 0..1` lines)
    #[arg(long, alias = "heat", value_hint = ValueHint::FilePath)]
    duty: Option<PathBuf>,

    /// Shift the duty-cycle trace by this many seconds
    #[arg(long, alias = "heat-shift", default_value_t = 0.0, allow_hyphen_values = true)]
    duty_shift: f64,

    /// Overlay the reference reflow profile aligned on the observed peak
    #[arg(long, action = ArgAction::SetTrue)]
    reflow_profile: bool,

    /// Reference profile name
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Extra reference profiles (JSON: {"NAME": [[seconds, celsius], ...]})
    #[arg(long, value_hint = ValueHint::FilePath)]
    profile_file: Option<PathBuf>,

    /// Do not write the default figure (`<LOG>.png` next to the log) when `--save` is absent
    #[arg(long, action = ArgAction::SetTrue)]
    no_show: bool,

    /// Save the figure to this file (`.svg` for SVG, PNG otherwise)
    #[arg(long, value_hint = ValueHint::FilePath)]
    save: Option<PathBuf>,

    /// Export the aligned series as CSV (`-` for stdout)
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ProfilesArgs {
    /// Extra reference profiles to merge into the built-in table
    #[arg(long, value_hint = ValueHint::FilePath)]
    profile_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Plot(args) => args.verbose,
        Command::Profiles(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Plot(args) => handle_plot(args),
        Command::Profiles(args) => handle_profiles(args),
    }
}

fn load_profiles(path: Option<&Path>) -> Result<ProfileTable> {
    let mut table = ProfileTable::builtin();
    if let Some(path) = path {
        let added = table
            .extend_from_file(path)
            .with_context(|| format!("failed to load profiles from {}", path.display()))?;
        info!("Loaded {} profile(s) from {}", added, path.display());
    }
    Ok(table)
}

fn handle_plot(args: PlotArgs) -> Result<()> {
    let profiles = load_profiles(args.profile_file.as_deref())?;

    let params = Params {
        duty_shift_s: args.duty_shift,
        reference_profile: args.reflow_profile.then(|| args.profile.clone()),
    };

    let temperature_text = fs::read_to_string(&args.log)
        .with_context(|| format!("failed to read {}", args.log.display()))?;
    let duty_text = match args.duty.as_ref() {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let comparison = build_comparison(
        &temperature_text,
        duty_text.as_deref(),
        &profiles,
        &params,
    )
    .with_context(|| match args.duty.as_ref() {
        Some(duty) => format!(
            "failed to process {} with {}",
            args.log.display(),
            duty.display()
        ),
        None => format!("failed to process {}", args.log.display()),
    })?;

    if let Some(reference) = comparison.reference.as_ref() {
        info!(
            "Profile {} shifted by {:.1} s onto peak {:.1} C",
            reference.name, reference.shift_s, comparison.peak.value
        );
    }

    if let Some(path) = args.csv.as_ref() {
        if path.as_os_str() == "-" {
            let stdout = io::stdout();
            write_series_csv(&comparison, csv::Writer::from_writer(stdout.lock()))?;
        } else {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_series_csv(&comparison, csv::Writer::from_writer(file))?;
            info!("Wrote series CSV: {}", path.display());
        }
    }

    let figure = match args.save.clone() {
        Some(path) => Some(path),
        None if !args.no_show => Some(args.log.with_extension("png")),
        None => None,
    };
    if let Some(path) = figure {
        let kind = ChartKind::from_path(&path);
        if let Err(err) = render_chart_guard(&comparison, &path, kind) {
            warn!("Skipping plot render ({}): {}", path.display(), err);
        } else {
            info!("Wrote plot: {}", path.display());
        }
    }

    Ok(())
}

fn handle_profiles(args: ProfilesArgs) -> Result<()> {
    let profiles = load_profiles(args.profile_file.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for profile in profiles.iter() {
        match profile.peak() {
            Some((t, c)) => writeln!(
                out,
                "{}\t{} points\tpeak {:.0} C at {:.0} s",
                profile.name,
                profile.points.len(),
                c,
                t
            )?,
            None => writeln!(out, "{}\tempty", profile.name)?,
        }
    }
    Ok(())
}

fn write_series_csv<W: Write>(comparison: &Comparison, mut writer: csv::Writer<W>) -> Result<()> {
    writer.write_record(["series", "time_s", "value"])?;
    for sample in &comparison.temperature {
        writer.write_record([
            "temperature".to_string(),
            sample.time_s.to_string(),
            sample.value.to_string(),
        ])?;
    }
    if let Some(duty) = comparison.duty.as_ref() {
        for point in &duty.trace.points {
            writer.write_record([
                "duty".to_string(),
                point.time_s.to_string(),
                point.level.map(|v| v.to_string()).unwrap_or_default(),
            ])?;
        }
    }
    if let Some(reference) = comparison.reference.as_ref() {
        for (t, c) in &reference.points {
            writer.write_record(["reference".to_string(), t.to_string(), c.to_string()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("svg") => ChartKind::Svg,
            _ => ChartKind::Png,
        }
    }
}

struct ChartSeries {
    label: String,
    points: Vec<(f64, f64)>,
    color: RGBColor,
}

fn chart_series(comparison: &Comparison) -> Vec<ChartSeries> {
    let mut series = vec![ChartSeries {
        label: "Temperature (C)".to_string(),
        points: comparison
            .temperature
            .iter()
            .map(|s| (s.time_s, s.value))
            .collect(),
        color: RGBColor(31, 119, 180),
    }];
    if let Some(duty) = comparison.duty.as_ref() {
        series.push(ChartSeries {
            label: format!("Heater duty ({:?}, x peak)", duty.mode),
            points: duty.trace.scaled_points(comparison.peak.value),
            color: RED,
        });
    }
    if let Some(reference) = comparison.reference.as_ref() {
        series.push(ChartSeries {
            label: format!("{} ({:+.0} s)", reference.name, reference.shift_s),
            points: reference.points.clone(),
            color: RGBColor(0, 128, 0),
        });
    }
    series
}

fn render_chart_guard(comparison: &Comparison, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let series = chart_series(comparison);
        let drawn = match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, (1280, 760)).into_drawing_area();
                draw_chart(root, &series)
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, (1280, 760)).into_drawing_area();
                draw_chart(root, &series)
            }
        };
        drawn.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn axis_bounds(series: &[ChartSeries]) -> ((f64, f64), (f64, f64)) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_max = 0.0_f64;
    for (x, y) in series.iter().flat_map(|s| s.points.iter().copied()) {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_max = y_max.max(y);
    }
    if !x_min.is_finite() || !x_max.is_finite() {
        return ((0.0, 1.0), (0.0, 1.0));
    }
    if x_max - x_min < 1.0 {
        x_max = x_min + 1.0;
    }
    ((x_min, x_max), (0.0, (y_max * 1.05).max(1.0)))
}

fn draw_chart<DB>(root: DrawingArea<DB, plotters::coord::Shift>, series: &[ChartSeries]) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let area = root;
    area.fill(&WHITE)?;
    let ((x_min, x_max), (y_min, y_max)) = axis_bounds(series);
    let mut chart = ChartBuilder::on(&area)
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 20.0, FontStyle::Normal);

    chart
        .configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_desc("time (s)")
        .y_desc("temp (C)")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.clone().color(&BLACK.mix(0.85)))
        .axis_desc_style(axis_font)
        .draw()?;

    for entry in series {
        let color = entry.color;
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        chart
            .draw_series(LineSeries::new(entry.points.iter().copied(), style))?
            .label(entry.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    let legend_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(legend_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    area.present()?;
    Ok(())
}
