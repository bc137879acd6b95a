use ocrmode_ocr::preprocess::is_supported_image;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Columns before the transcription in a SROIE box line (`x1,y1,...,x4,y4`).
const BOX_COORDINATE_FIELDS: usize = 8;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image directory not found: {0}")]
    MissingImageDir(PathBuf),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroundTruthError {
    #[error("No ground-truth file at {0}")]
    Missing(PathBuf),
    #[error("Failed to read ground truth: {0}")]
    Unreadable(String),
    #[error("Malformed ground truth: {0}")]
    Malformed(String),
}

/// Where a sample's image bytes come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Memory(Arc<Vec<u8>>),
}

impl ImageSource {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            ImageSource::Path(path) => tokio::fs::read(path).await,
            ImageSource::Memory(bytes) => Ok(bytes.as_ref().clone()),
        }
    }
}

/// One labeled receipt image.
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: String,
    pub image: ImageSource,
    pub ground_truth: Result<String, GroundTruthError>,
}

impl Sample {
    pub fn in_memory(id: impl Into<String>, bytes: Vec<u8>, ground_truth: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: ImageSource::Memory(Arc::new(bytes)),
            ground_truth: Ok(ground_truth.into()),
        }
    }

    /// File stem of the sample id, used to name exported images.
    pub fn stem(id: &str) -> &str {
        Path::new(id).file_stem().and_then(|s| s.to_str()).unwrap_or(id)
    }
}

/// Load a SROIE v2 style split: `<root>/<split>/img/*` images paired with
/// `<root>/<split>/box/<stem>.txt` annotations. Images are ordered by file
/// name and truncated to `max` when given.
///
/// Missing or malformed annotations do not fail the load; they are carried on
/// the sample so the harness can count the exclusion.
pub async fn load_split(root: &Path, split: &str, max: Option<usize>) -> Result<Vec<Sample>, DatasetError> {
    let split_dir = root.join(split);
    let img_dir = split_dir.join("img");
    let box_dir = split_dir.join("box");
    if !is_dir(&img_dir).await {
        return Err(DatasetError::MissingImageDir(img_dir));
    }

    let mut images: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(&img_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_supported_image(&path) && is_file(&path).await {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if let Some(max) = max {
        images.truncate(max);
    }

    let mut samples = Vec::with_capacity(images.len());
    for path in images {
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let gt_path = box_dir.join(format!("{}.txt", Sample::stem(&id)));
        let ground_truth = load_ground_truth(&gt_path).await;
        samples.push(Sample { id, image: ImageSource::Path(path), ground_truth });
    }

    tracing::info!(split, samples = samples.len(), dir = %img_dir.display(), "Loaded split");
    Ok(samples)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

pub async fn load_ground_truth(path: &Path) -> Result<String, GroundTruthError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GroundTruthError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(GroundTruthError::Unreadable(e.to_string())),
    };
    parse_box_annotations(&data)
}

/// Extract the transcriptions from box annotation lines, one per line.
///
/// The transcription is everything after the eighth comma, so it may itself
/// contain commas. Lines with fewer fields are ignored.
pub fn parse_box_annotations(data: &[u8]) -> Result<String, GroundTruthError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(data);

    let mut lines = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| GroundTruthError::Malformed(e.to_string()))?;
        if record.len() <= BOX_COORDINATE_FIELDS {
            continue;
        }
        let transcription = record
            .iter()
            .skip(BOX_COORDINATE_FIELDS)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(",");
        let transcription = transcription.trim();
        if !transcription.is_empty() {
            lines.push(transcription.to_string());
        }
    }

    if lines.is_empty() {
        return Err(GroundTruthError::Malformed("no transcription lines".into()));
    }
    Ok(lines.join("\n"))
}
