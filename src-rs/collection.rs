//! Loading image collections from PNG files and zip archives.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

pub const NO_DESCRIPTION: &str = "No Description Found";
pub const NO_JOB_ID: &str = "No Job ID Found";
pub const DEFAULT_GALLERY_NAME: &str = "image_metadata.html";
pub const THUMBNAIL_SIZE: u32 = 100;

const DESCRIPTION_KEY: &str = "Description";
const JOB_ID_MARKER: &str = "Job ID:";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

fn job_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Job ID: ([\w-]+)").expect("job id pattern is valid"))
}

fn batch_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{1,2}-\d{1,2})_\[(\d+)-(\d+)\]").expect("batch pattern is valid")
    })
}

/// One decoded image plus the text pulled from its metadata.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    /// Upload name, or the member path inside an archive.
    pub filename: String,
    pub image: DynamicImage,
    /// Description with the trailing job-ID section removed.
    pub description: String,
    pub job_id: Option<String>,
    pub from_archive: bool,
}

impl ImageEntry {
    pub fn job_id_or_default(&self) -> &str {
        self.job_id.as_deref().unwrap_or(NO_JOB_ID)
    }

    /// Last path component of `filename`.
    pub fn base_name(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("image.png")
    }

    /// `overlay_<name>.png` for the rendered copy.
    pub fn overlay_file_name(&self) -> String {
        let stem = Path::new(self.base_name())
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        format!("overlay_{stem}.png")
    }

    pub fn thumbnail_png(&self) -> Result<Vec<u8>> {
        thumbnail_png(&self.image)
    }

    pub fn summary(&self, index: usize) -> EntrySummary {
        EntrySummary {
            index,
            filename: self.filename.clone(),
            width: self.image.width(),
            height: self.image.height(),
            description: self.description.clone(),
            job_id: self.job_id.clone(),
            from_archive: self.from_archive,
        }
    }
}

/// Serializable listing row for `inspect --json`.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub index: usize,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub description: String,
    pub job_id: Option<String>,
    pub from_archive: bool,
}

#[derive(Debug, Default)]
pub struct Collection {
    pub entries: Vec<ImageEntry>,
    /// Dates parsed from batch-style upload names.
    pub dates: BTreeSet<String>,
    pub total_images: u64,
}

impl Collection {
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut collection = Self::default();
        for path in paths {
            collection.add_path(path)?;
        }
        Ok(collection)
    }

    pub fn add_path(&mut self, path: &Path) -> Result<()> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read input: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        self.add_upload(&name, bytes)
    }

    /// Adds one uploaded file: an archive contributes every `.png` member,
    /// anything else is decoded as a single image.
    pub fn add_upload(&mut self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.count_batch_name(name);

        if is_zip(&bytes) {
            self.add_archive(name, bytes)
        } else {
            self.total_images += 1;
            let entry = decode_entry(name, &bytes, false)
                .with_context(|| format!("failed to decode image: {name}"))?;
            self.entries.push(entry);
            Ok(())
        }
    }

    fn add_archive(&mut self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .with_context(|| format!("failed to open archive: {name}"))?;
        for index in 0..archive.len() {
            let mut member = archive
                .by_index(index)
                .with_context(|| format!("failed to read member {index} of {name}"))?;
            if member.is_dir() || !member.name().to_ascii_lowercase().ends_with(".png") {
                continue;
            }
            let member_name = member.name().to_string();
            let mut data = Vec::new();
            member
                .read_to_end(&mut data)
                .with_context(|| format!("failed to extract {member_name} from {name}"))?;
            match decode_entry(&member_name, &data, true) {
                Ok(entry) => self.entries.push(entry),
                Err(err) => warn!(archive = name, member = %member_name, "skipping member: {err:#}"),
            }
        }
        debug!(archive = name, entries = self.entries.len(), "loaded archive");
        Ok(())
    }

    fn count_batch_name(&mut self, name: &str) {
        let Some(caps) = batch_name_pattern().captures(name) else {
            return;
        };
        self.dates.insert(caps[1].to_string());
        let start: u64 = caps[2].parse().unwrap_or(0);
        let end: u64 = caps[3].parse().unwrap_or(0);
        if end >= start {
            self.total_images += end - start + 1;
        }
    }

    /// `<dates>-[<total>].html` when batch names were seen.
    pub fn gallery_file_name(&self) -> String {
        if self.dates.is_empty() {
            return DEFAULT_GALLERY_NAME.to_string();
        }
        let dates: Vec<&str> = self.dates.iter().map(String::as_str).collect();
        format!("{}-[{}].html", dates.join("_"), self.total_images)
    }
}

pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

fn decode_entry(name: &str, bytes: &[u8], from_archive: bool) -> Result<ImageEntry> {
    let image = image::load_from_memory(bytes)?;
    let raw = description_chunk(bytes);
    Ok(ImageEntry {
        filename: name.to_string(),
        image,
        description: clean_description(raw.as_deref()),
        job_id: raw.as_deref().and_then(extract_job_id),
        from_archive,
    })
}

/// Text of the `Description` chunk (tEXt, zTXt or iTXt) of a PNG stream.
/// Only chunks ahead of the image data are seen.
pub fn description_chunk(bytes: &[u8]) -> Option<String> {
    let reader = png::Decoder::new(Cursor::new(bytes)).read_info().ok()?;
    let info = reader.info();

    if let Some(chunk) = info
        .uncompressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == DESCRIPTION_KEY)
    {
        return Some(chunk.text.clone());
    }
    if let Some(text) = info
        .compressed_latin1_text
        .iter()
        .filter(|chunk| chunk.keyword == DESCRIPTION_KEY)
        .find_map(|chunk| chunk.get_text().ok())
    {
        return Some(text);
    }
    info.utf8_text
        .iter()
        .filter(|chunk| chunk.keyword == DESCRIPTION_KEY)
        .find_map(|chunk| chunk.get_text().ok())
}

/// Part of the description ahead of `Job ID:`, trimmed.
pub fn clean_description(raw: Option<&str>) -> String {
    match raw {
        Some(text) => text
            .split(JOB_ID_MARKER)
            .next()
            .unwrap_or_default()
            .trim()
            .to_string(),
        None => NO_DESCRIPTION.to_string(),
    }
}

pub fn extract_job_id(description: &str) -> Option<String> {
    job_id_pattern()
        .captures(description)
        .map(|caps| caps[1].to_string())
}

/// PNG bytes of `image` shrunk to fit a 100x100 box.
pub fn thumbnail_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let thumb = image.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    let mut buffer = Cursor::new(Vec::new());
    thumb
        .write_to(&mut buffer, ImageFormat::Png)
        .context("failed to encode thumbnail")?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn png_with_description(width: u32, height: u32, description: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            if let Some(text) = description {
                encoder
                    .add_text_chunk(DESCRIPTION_KEY.to_string(), text.to_string())
                    .unwrap();
            }
            let mut writer = encoder.write_header().unwrap();
            let data: Vec<u8> = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
            writer.write_image_data(&data).unwrap();
        }
        out
    }

    fn zip_of(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in members {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn description_and_job_id_come_from_text_chunk() {
        let bytes = png_with_description(
            4,
            3,
            Some("a lighthouse at dusk, volumetric fog Job ID: 1f2e-abc_9"),
        );
        let mut collection = Collection::default();
        collection.add_upload("dusk.png", bytes).unwrap();

        let entry = &collection.entries[0];
        assert_eq!(entry.description, "a lighthouse at dusk, volumetric fog");
        assert_eq!(entry.job_id.as_deref(), Some("1f2e-abc_9"));
        assert!(!entry.from_archive);
        assert_eq!(collection.total_images, 1);
    }

    #[test]
    fn missing_metadata_uses_placeholders() {
        let bytes = png_with_description(2, 2, None);
        let mut collection = Collection::default();
        collection.add_upload("plain.png", bytes).unwrap();
        let entry = &collection.entries[0];
        assert_eq!(entry.description, NO_DESCRIPTION);
        assert_eq!(entry.job_id_or_default(), NO_JOB_ID);
    }

    #[test]
    fn archives_contribute_png_members_only() {
        let archive = zip_of(&[
            ("batch/one.png", png_with_description(3, 3, Some("first"))),
            ("batch/notes.txt", b"ignore me".to_vec()),
            ("batch/TWO.PNG", png_with_description(3, 3, Some("second"))),
            ("batch/broken.png", b"not a png".to_vec()),
        ]);
        let mut collection = Collection::default();
        collection
            .add_upload("2024-3-15_[1-40].zip", archive)
            .unwrap();

        let names: Vec<&str> = collection.entries.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["batch/one.png", "batch/TWO.PNG"]);
        assert!(collection.entries.iter().all(|e| e.from_archive));
        assert_eq!(collection.entries[1].base_name(), "TWO.PNG");
        assert_eq!(collection.entries[1].overlay_file_name(), "overlay_TWO.png");
        assert_eq!(collection.total_images, 40);
        assert_eq!(collection.gallery_file_name(), "2024-3-15-[40].html");
    }

    #[test]
    fn gallery_name_joins_sorted_dates() {
        let mut collection = Collection::default();
        collection.count_batch_name("2024-05-02_[10-19].zip");
        collection.count_batch_name("2024-05-01_[1-9].zip");
        collection.count_batch_name("holiday.png");
        assert_eq!(collection.gallery_file_name(), "2024-05-01_2024-05-02-[19].html");

        assert_eq!(Collection::default().gallery_file_name(), DEFAULT_GALLERY_NAME);
    }

    #[test]
    fn job_id_requires_marker() {
        assert_eq!(extract_job_id("no id here"), None);
        assert_eq!(extract_job_id("Job ID: a-b-c trailing"), Some("a-b-c".to_string()));
        assert_eq!(clean_description(Some("  just text  ")), "just text");
        assert_eq!(clean_description(Some("Job ID: x")), "");
    }

    #[test]
    fn thumbnails_fit_the_box() {
        let image = DynamicImage::new_rgb8(400, 200);
        let bytes = thumbnail_png(&image).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (100, 50));
    }

    #[test]
    fn load_reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        fs::write(&path, png_with_description(5, 5, Some("on disk"))).unwrap();
        let collection = Collection::load(&[path]).unwrap();
        assert_eq!(collection.entries[0].filename, "shot.png");
        assert_eq!(collection.entries[0].description, "on disk");

        let missing = Collection::load(&[dir.path().join("nope.png")]);
        assert!(missing.is_err());
    }

    #[test]
    fn undecodable_plain_file_is_an_error() {
        let mut collection = Collection::default();
        let err = collection
            .add_upload("bad.png", b"garbage".to_vec())
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad.png"));
    }
}
