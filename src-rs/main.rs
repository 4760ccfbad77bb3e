use std::collections::HashSet;
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use promptmark::collection::{Collection, ImageEntry};
use promptmark::gallery::{self, DEFAULT_TITLE};
use promptmark::settings::{Color, OverlayPosition, OverlaySettings};
use promptmark::{logging, Compositor, FontLibrary, RenderOutput, RenderRequest};

const FONT_DIR_ENV: &str = "PROMPTMARK_FONT_DIR";

#[derive(Parser, Debug)]
#[command(
    name = "promptmark",
    version,
    about = "Caption overlays and HTML galleries for PNG collections with embedded descriptions"
)]
struct Cli {
    /// Increase log detail on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::enum_variant_names)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// List images with their descriptions and job IDs
    Inspect(InspectArgs),
    /// Render caption overlays and corner text onto images
    Overlay(OverlayArgs),
    /// Export an HTML gallery of thumbnails and descriptions
    Gallery(GalleryArgs),
    /// Print the effective overlay settings JSON
    Settings(SettingsArgs),
    /// List available font families
    Fonts(FontsArgs),
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// PNG files or zip archives
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Print entries as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct OverlayArgs {
    /// PNG files or zip archives
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Directory for overlay_<name>.png outputs
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Only render the entry at this index (see `inspect`)
    #[arg(long)]
    index: Option<usize>,
    /// Corner watermark text
    #[arg(long)]
    corner_text: Option<String>,
    /// Disable metadata sidecar output
    #[arg(long, action = ArgAction::SetTrue)]
    no_meta: bool,
    #[command(flatten)]
    source: SettingsSource,
}

#[derive(Args, Debug)]
struct GalleryArgs {
    /// PNG files or zip archives
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Heading of the HTML document
    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,
    /// Output HTML path (default: derived from batch names)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[command(flatten)]
    source: SettingsSource,
}

#[derive(Args, Debug)]
struct FontsArgs {
    /// Directory of .ttf/.otf files, registered by file stem
    #[arg(long, env = FONT_DIR_ENV)]
    font_dir: Option<PathBuf>,
}

/// Settings file plus per-field overrides.
#[derive(Args, Debug, Default)]
struct SettingsSource {
    /// Overlay settings JSON file (or - for stdin)
    #[arg(long)]
    settings: Option<String>,
    /// Directory of .ttf/.otf files, registered by file stem
    #[arg(long, env = FONT_DIR_ENV)]
    font_dir: Option<PathBuf>,
    #[command(flatten)]
    overrides: SettingsOverrides,
}

#[derive(Args, Debug, Default)]
struct SettingsOverrides {
    /// Font family (see `fonts`)
    #[arg(long)]
    font: Option<String>,
    #[arg(long)]
    font_size: Option<u32>,
    #[arg(long)]
    text_color: Option<Color>,
    #[arg(long)]
    stroke_color: Option<Color>,
    #[arg(long)]
    stroke_width: Option<u32>,
    /// Share of the image width used for wrapping (0-100)
    #[arg(long)]
    wrap_width: Option<f64>,
    /// Line spacing in percent of the natural line height
    #[arg(long)]
    line_spacing: Option<f64>,
    /// Vertical panel padding in percent of the image height
    #[arg(long)]
    vertical_padding: Option<f64>,
    /// Horizontal panel padding in percent of the image width
    #[arg(long)]
    horizontal_padding: Option<f64>,
    /// Panel distance from its edge in percent of the free space
    #[arg(long)]
    margin: Option<f64>,
    #[arg(long, value_enum)]
    position: Option<OverlayPosition>,
    /// Brightness delta for the panel background (-255..=255)
    #[arg(long, allow_hyphen_values = true)]
    brightness: Option<i32>,
    /// Enable tinting with this color
    #[arg(long)]
    tint: Option<Color>,
    /// Tint opacity (0.0-1.0)
    #[arg(long)]
    tint_opacity: Option<f64>,
    /// Skip the caption panel, keep only the corner text
    #[arg(long, action = ArgAction::SetTrue)]
    no_overlay: bool,
    #[arg(long)]
    watermark_size: Option<u32>,
}

impl SettingsOverrides {
    fn apply(&self, settings: &mut OverlaySettings) {
        if let Some(font) = &self.font {
            settings.font_family = font.clone();
        }
        if let Some(v) = self.font_size {
            settings.font_size = v;
        }
        if let Some(v) = self.text_color {
            settings.text_color = v;
        }
        if let Some(v) = self.stroke_color {
            settings.stroke_color = v;
        }
        if let Some(v) = self.stroke_width {
            settings.stroke_width = v;
        }
        if let Some(v) = self.wrap_width {
            settings.wrap_width_percentage = v;
        }
        if let Some(v) = self.line_spacing {
            settings.line_spacing_percentage = v;
        }
        if let Some(v) = self.vertical_padding {
            settings.vertical_padding_percentage = v;
        }
        if let Some(v) = self.horizontal_padding {
            settings.horizontal_padding_percentage = v;
        }
        if let Some(v) = self.margin {
            settings.overlay_margin_percentage = v;
        }
        if let Some(v) = self.position {
            settings.position = v;
        }
        if let Some(v) = self.brightness {
            settings.brightness = v;
        }
        if let Some(v) = self.tint {
            settings.tint_enabled = true;
            settings.tint_color = v;
        }
        if let Some(v) = self.tint_opacity {
            settings.tint_opacity = v;
        }
        if self.no_overlay {
            settings.include_overlay = false;
        }
        if let Some(v) = self.watermark_size {
            settings.watermark_font_size = v;
        }
    }
}

impl SettingsSource {
    fn resolve(&self) -> Result<OverlaySettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings(path)?,
            None => OverlaySettings::default(),
        };
        self.overrides.apply(&mut settings);
        Ok(settings)
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Inspect(args) => command_inspect(args),
        Commands::Overlay(args) => command_overlay(args),
        Commands::Gallery(args) => command_gallery(args),
        Commands::Settings(args) => command_settings(args),
        Commands::Fonts(args) => command_fonts(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "inspect",
            "description": "List images in PNG files and zip archives with descriptions and job IDs."
        }),
        json!({
            "name": "overlay",
            "description": "Render blurred caption panels and corner text onto images."
        }),
        json!({
            "name": "gallery",
            "description": "Export an HTML table of thumbnails and descriptions."
        }),
        json!({
            "name": "settings",
            "description": "Print the effective overlay settings as JSON."
        }),
        json!({
            "name": "fonts",
            "description": "List the font families available for overlays."
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_inspect(args: InspectArgs) -> Result<()> {
    let collection = Collection::load(&args.inputs)?;

    if args.json {
        let rows: Vec<_> = collection
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| entry.summary(idx))
            .collect();
        let payload = json!({
            "entries": rows,
            "total_images": collection.total_images,
            "gallery_file_name": collection.gallery_file_name(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for (idx, entry) in collection.entries.iter().enumerate() {
        println!(
            "{idx}\t{}\t{}\t{}",
            entry.filename,
            entry.job_id_or_default(),
            entry.description
        );
    }
    Ok(())
}

fn command_overlay(args: OverlayArgs) -> Result<()> {
    let settings = args.source.resolve()?;
    let compositor = Compositor::new(load_fonts(args.source.font_dir.as_deref())?);
    let collection = Collection::load(&args.inputs)?;

    let selected: Vec<(usize, &ImageEntry)> = match args.index {
        Some(index) => {
            let Some(entry) = collection.entries.get(index) else {
                bail!(
                    "index {index} out of range ({} entries)",
                    collection.entries.len()
                );
            };
            vec![(index, entry)]
        }
        None => collection.entries.iter().enumerate().collect(),
    };
    if selected.is_empty() {
        bail!("no images found in inputs");
    }

    fs::create_dir_all(&args.out_dir).with_context(|| {
        format!("failed to create output directory: {}", args.out_dir.display())
    })?;

    let mut used_names = HashSet::new();
    for (index, entry) in selected {
        let request = RenderRequest::new(&entry.image, &entry.description, &settings)
            .with_watermark(args.corner_text.as_deref());
        let rendered = compositor
            .render(&request)
            .with_context(|| format!("failed to render {}", entry.filename))?;

        let file_name = unique_output_name(&mut used_names, &entry.overlay_file_name(), index);
        let output = args.out_dir.join(&file_name);
        rendered
            .image
            .save(&output)
            .with_context(|| format!("failed to save output image: {}", output.display()))?;
        info!(entry = %entry.filename, output = %output.display(), "wrote overlay");

        if !args.no_meta {
            let meta_path = default_sidecar_for(&output);
            let payload = overlay_meta(entry, index, &output, &meta_path, &rendered, &settings);
            write_json_pretty(&meta_path, &payload)?;
        }

        println!("{}", abs_path(&output).display());
    }
    Ok(())
}

fn command_gallery(args: GalleryArgs) -> Result<()> {
    if args.title.trim().is_empty() {
        bail!("gallery title must not be empty");
    }
    let collection = Collection::load(&args.inputs)?;
    let rows = gallery::rows_from_collection(&collection)?;
    let html = gallery::render_html(&args.title, &rows);

    let output = args
        .out
        .unwrap_or_else(|| PathBuf::from(collection.gallery_file_name()));
    ensure_parent_dir(&output)?;
    fs::write(&output, html)
        .with_context(|| format!("failed to write gallery: {}", output.display()))?;
    info!(rows = rows.len(), output = %output.display(), "wrote gallery");

    println!("{}", abs_path(&output).display());
    Ok(())
}

fn command_settings(args: SettingsArgs) -> Result<()> {
    let settings = args.source.resolve()?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn command_fonts(args: FontsArgs) -> Result<()> {
    let fonts = load_fonts(args.font_dir.as_deref())?;
    for family in fonts.families() {
        println!("{family}");
    }
    Ok(())
}

fn load_fonts(dir: Option<&Path>) -> Result<FontLibrary> {
    let mut fonts = FontLibrary::builtin();
    if let Some(dir) = dir {
        let count = fonts.load_dir(dir)?;
        info!(dir = %dir.display(), count, "loaded fonts");
    }
    Ok(fonts)
}

fn load_settings(path: &str) -> Result<OverlaySettings> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read settings from stdin")?;
        buf
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {path}"))?
    };
    serde_json::from_str(&raw).context("invalid settings JSON")
}

fn overlay_meta(
    entry: &ImageEntry,
    index: usize,
    output: &Path,
    meta_path: &Path,
    rendered: &RenderOutput,
    settings: &OverlaySettings,
) -> Value {
    json!({
        "overlay_meta_version": 1,
        "index": index,
        "source": entry.filename,
        "output_path": abs_path(output).display().to_string(),
        "meta_path": abs_path(meta_path).display().to_string(),
        "generated_at": timestamp_iso(),
        "size": {
            "width": rendered.image.width(),
            "height": rendered.image.height(),
            "units": "px"
        },
        "description": entry.description,
        "job_id": entry.job_id,
        "lines": rendered.lines,
        "panel": rendered.panel,
        "watermark": rendered.watermark,
        "settings": settings,
    })
}

/// Keeps outputs from different archive folders from overwriting each other.
fn unique_output_name(used: &mut HashSet<String>, name: &str, index: usize) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let stem = name.strip_suffix(".png").unwrap_or(name);
    let candidate = format!("{stem}-{index}.png");
    used.insert(candidate.clone());
    candidate
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_parses_overlay_flags() {
        let cli = Cli::try_parse_from([
            "promptmark",
            "-vv",
            "overlay",
            "a.zip",
            "b.png",
            "--out-dir",
            "out",
            "--font-size",
            "40",
            "--position",
            "top",
            "--brightness",
            "-80",
            "--tint",
            "#102030",
            "--corner-text",
            "ACME",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Overlay(args) = cli.command else {
            panic!("expected overlay command");
        };
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.corner_text.as_deref(), Some("ACME"));

        let settings = args.source.resolve().unwrap();
        assert_eq!(settings.font_size, 40);
        assert_eq!(settings.position, OverlayPosition::Top);
        assert_eq!(settings.brightness, -80);
        assert!(settings.tint_enabled);
        assert_eq!(settings.tint_color, Color([0x10, 0x20, 0x30, 255]));
    }

    #[test]
    fn cli_rejects_bad_colors() {
        let parsed = Cli::try_parse_from(["promptmark", "settings", "--text-color", "blurple"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r##"{"font_size": 30, "stroke_width": 2, "text_color": "#FFFFFF"}"##,
        )
        .unwrap();

        let source = SettingsSource {
            settings: Some(path.display().to_string()),
            font_dir: None,
            overrides: SettingsOverrides {
                stroke_width: Some(0),
                no_overlay: true,
                ..SettingsOverrides::default()
            },
        };
        let settings = source.resolve().unwrap();
        assert_eq!(settings.font_size, 30);
        assert_eq!(settings.stroke_width, 0);
        assert_eq!(settings.text_color, Color::WHITE);
        assert!(!settings.include_overlay);
    }

    #[test]
    fn invalid_settings_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let err = load_settings(&path.display().to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid settings JSON"));
    }

    #[test]
    fn output_names_are_deduplicated() {
        let mut used = HashSet::new();
        assert_eq!(unique_output_name(&mut used, "overlay_a.png", 0), "overlay_a.png");
        assert_eq!(unique_output_name(&mut used, "overlay_a.png", 3), "overlay_a-3.png");
        assert_eq!(unique_output_name(&mut used, "overlay_b.png", 4), "overlay_b.png");
    }

    #[test]
    fn sidecar_sits_next_to_output() {
        assert_eq!(
            default_sidecar_for(Path::new("out/overlay_x.png")),
            PathBuf::from("out/overlay_x.json")
        );
    }

    #[test]
    fn writes_json_pretty() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn missing_font_dir_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_fonts(Some(&dir.path().join("nope"))).is_err());
        assert_eq!(load_fonts(None).unwrap().families(), vec!["builtin-mono"]);
    }
}
