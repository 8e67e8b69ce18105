// ============================================================================
// Colorbook CLI: headless page processing and saved-artwork management
// ============================================================================
//
// Usage examples:
//   colorbook fill -i page.png -x 120 -y 80 --color Gold -o filled.png
//   colorbook outline -i "art/*.png" --output-dir lines/
//   colorbook completion -i "saved/*.png"
//   colorbook gallery --store ~/colorbook-store
//   colorbook export --page 42 --name "Star Stage" --output-dir downloads/
//   colorbook delete --page 42

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{debug, info};

use colorbook::buffer::{EncodeFormat, PixelBuffer};
use colorbook::completion::estimate;
use colorbook::error::{CanvasError, StoreError};
use colorbook::fill::flood_fill;
use colorbook::outline::outline_buffer;
use colorbook::palette::{Palette, PaletteError, parse_hex};
use colorbook::persistence::Persistence;
use colorbook::session::export_file_name;
use colorbook::settings::ColoringSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Colorbook headless page tool.
#[derive(Parser, Debug)]
#[command(
    name = "colorbook",
    about = "Colorbook headless page tool",
    long_about = "Fill, outline and score coloring pages, and manage saved artwork,\n\
                  without opening the app.\n\n\
                  Example:\n  \
                  colorbook fill -i page.png -x 10 -y 10 --color Red -o out.png\n  \
                  colorbook completion -i \"saved/*.png\""
)]
pub struct CliArgs {
    /// Log at debug level and print per-file timing.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file to use instead of the one in the user config dir.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Saved-artwork store directory (overrides the settings file).
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Flood-fill one region of an image.
    Fill {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short = 'x')]
        x: i32,
        #[arg(short = 'y')]
        y: i32,
        /// Palette colour name or #RRGGBB.
        #[arg(short, long)]
        color: String,
        /// Per-channel match tolerance (defaults to the settings value).
        #[arg(short, long)]
        tolerance: Option<u8>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Convert images to black line art.
    Outline {
        /// Input file(s). Glob patterns accepted.
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<String>,
        /// Edge threshold (defaults to the settings value).
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Output file path. Only valid for single-file input.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Output directory for batch processing.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Print the completion percentage of each image.
    Completion {
        /// Input file(s). Glob patterns accepted.
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<String>,
    },
    /// List saved artwork, newest first.
    Gallery,
    /// Write a page's saved artwork as PNG.
    Export {
        #[arg(short, long)]
        page: u32,
        /// Display name used for the file name (defaults to "page-<id>").
        #[arg(short, long)]
        name: Option<String>,
        /// Output file path.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Directory to write the generated file name into.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Remove a page's saved artwork.
    Delete {
        #[arg(short, long)]
        page: u32,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no input files matched the given pattern(s)")]
    NoInputs,
    #[error("{0}")]
    Usage(String),
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Palette(#[from] PaletteError),
    #[error("no saved artwork for page {0}")]
    NotFound(u32),
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
/// `0` = success, `1` = one or more failures.
pub fn run(args: CliArgs, settings: ColoringSettings) -> ExitCode {
    let verbose = args.verbose;
    let result = match args.command {
        Command::Fill {
            input,
            x,
            y,
            color,
            tolerance,
            output,
        } => run_fill(
            &input,
            x,
            y,
            &color,
            tolerance.unwrap_or(settings.fill_tolerance),
            &output,
        ),
        Command::Outline {
            input,
            threshold,
            output,
            output_dir,
        } => run_outline(
            &input,
            threshold.unwrap_or(settings.outline_threshold),
            output.as_deref(),
            output_dir.as_deref(),
            verbose,
        ),
        Command::Completion { input } => run_completion(&input, &settings),
        Command::Gallery => run_gallery(&settings),
        Command::Export {
            page,
            name,
            output,
            output_dir,
        } => run_export(&settings, page, name, output, output_dir),
        Command::Delete { page } => run_delete(&settings, page),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_fill(
    input: &Path,
    x: i32,
    y: i32,
    color: &str,
    tolerance: u8,
    output: &Path,
) -> Result<(), CliError> {
    let rgb = match Palette::default().find(color) {
        Some(c) => c.rgb,
        None => parse_hex(color)?,
    };
    let mut buffer = load_buffer(input)?;
    match flood_fill(&mut buffer, x, y, image::Rgba([rgb[0], rgb[1], rgb[2], 255]), tolerance) {
        Some(report) => println!("filled {} pixels", report.filled),
        None => println!("nothing to fill at ({}, {})", x, y),
    }
    write_png(&buffer, output)
}

fn run_outline(
    patterns: &[String],
    threshold: f32,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    verbose: bool,
) -> Result<(), CliError> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err(CliError::NoInputs);
    }
    if inputs.len() > 1 && output.is_some() && output_dir.is_none() {
        return Err(CliError::Usage(format!(
            "{} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        )));
    }
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir).map_err(|source| CliError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let total = inputs.len();
    let mut any_failure = false;
    for (idx, input) in inputs.iter().enumerate() {
        if total > 1 || verbose {
            println!("[{}/{}] {}", idx + 1, total, input.display());
        }
        let started = Instant::now();
        let result = build_output_path(input, output, output_dir).and_then(|out| {
            let lines = outline_buffer(&load_buffer(input)?, threshold)?;
            write_png(&lines, &out)?;
            Ok(out)
        });
        match result {
            Ok(out) => {
                if total > 1 || verbose {
                    println!(
                        "  → {} ({:.0}ms)",
                        out.display(),
                        started.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }
    if any_failure {
        Err(CliError::Usage("one or more files failed".into()))
    } else {
        Ok(())
    }
}

fn run_completion(patterns: &[String], settings: &ColoringSettings) -> Result<(), CliError> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err(CliError::NoInputs);
    }
    let mut any_failure = false;
    for input in &inputs {
        match load_buffer(input) {
            Ok(buffer) => {
                let pct = estimate(&buffer, settings.completion_stride, settings.white_cutoff);
                let mark = if pct >= settings.completion_threshold { "  complete" } else { "" };
                println!("{}\t{:.1}%{}", input.display(), pct, mark);
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }
    if any_failure {
        Err(CliError::Usage("one or more files failed".into()))
    } else {
        Ok(())
    }
}

fn run_gallery(settings: &ColoringSettings) -> Result<(), CliError> {
    let store = Persistence::open_dir(&settings.store_dir)?;
    let artworks = store.saved_artworks()?;
    if artworks.is_empty() {
        println!("no saved artwork in {}", settings.store_dir.display());
        return Ok(());
    }
    for art in artworks {
        let when = Local
            .timestamp_millis_opt(art.timestamp)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "?".into());
        let size = art
            .dimensions
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "-".into());
        let completion = art
            .completion
            .map(|c| format!("{:.0}%", c))
            .unwrap_or_else(|| "-".into());
        println!(
            "page {:>5}  {}  {:<11}  {:>9}  {:>5}  {} bytes",
            art.page_id,
            when,
            format!("{:?}", art.source),
            size,
            completion,
            art.byte_size
        );
    }
    Ok(())
}

fn run_export(
    settings: &ColoringSettings,
    page: u32,
    name: Option<String>,
    output: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let store = Persistence::open_dir(&settings.store_dir)?;
    let (buffer, source) = store.restore(page).ok_or(CliError::NotFound(page))?;
    debug!(page, ?source, "artwork restored for export");
    let out = match output {
        Some(path) => path,
        None => {
            let name = name.unwrap_or_else(|| format!("page-{}", page));
            let file = export_file_name(&name, Local::now());
            output_dir.unwrap_or_else(|| PathBuf::from(".")).join(file)
        }
    };
    write_png(&buffer, &out)?;
    println!("{}", out.display());
    Ok(())
}

fn run_delete(settings: &ColoringSettings, page: u32) -> Result<(), CliError> {
    let store = Persistence::open_dir(&settings.store_dir)?;
    store.delete_artwork(page)?;
    println!("deleted saved artwork for page {}", page);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_buffer(path: &Path) -> Result<PixelBuffer, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(PixelBuffer::decode(&bytes)?)
}

fn write_png(buffer: &PixelBuffer, path: &Path) -> Result<(), CliError> {
    let bytes = buffer.encode(EncodeFormat::Png)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CliError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, bytes).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "image written");
    Ok(())
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Output path for one outlined file.
///
/// Priority:
/// 1. `--output`
/// 2. `--output-dir` joined with `<stem>.png`
/// 3. Next to the input as `<stem>_outline.png`
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<PathBuf, CliError> {
    if let Some(out) = output {
        return Ok(out.to_path_buf());
    }
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| {
            CliError::Usage(format!(
                "cannot determine output path for '{}'",
                input.display()
            ))
        })?;
    let ext = EncodeFormat::Png.extension();
    if let Some(dir) = output_dir {
        return Ok(dir.join(format!("{}.{}", stem, ext)));
    }
    let parent = input.parent().unwrap_or(Path::new("."));
    Ok(parent.join(format!("{}_outline.{}", stem, ext)))
}
