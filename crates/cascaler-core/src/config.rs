// crates/cascaler-core/src/config.rs
//
// Layered configuration: embedded defaults < appsettings.json < CLI flags.
// The file lives at <platform config dir>/cascaler/appsettings.json with
// PascalCase sections for compatibility with existing user files. Missing
// keys fall back to the embedded defaults via serde(default).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CasError, Result};

pub const APP_DIR: &str = "cascaler";
pub const SETTINGS_FILE: &str = "appsettings.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(rename = "FFmpeg")]
    pub ffmpeg: FfmpegSection,
    #[serde(rename = "Processing")]
    pub processing: ProcessingSection,
    #[serde(rename = "VideoEncoding")]
    pub video_encoding: VideoEncodingSection,
    #[serde(rename = "Output")]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FfmpegSection {
    pub library_path: Option<PathBuf>,
    pub enable_auto_detection: bool,
}

impl Default for FfmpegSection {
    fn default() -> Self {
        Self {
            library_path: None,
            enable_auto_detection: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ProcessingSection {
    pub max_image_threads: usize,
    pub max_video_threads: usize,
    pub processing_timeout_seconds: u64,
    #[serde(rename = "MinimumItemsForETA")]
    pub minimum_items_for_eta: u64,
    pub default_scale_percent: f64,
    pub default_fps: f64,
    pub default_video_frame_format: String,
    pub default_image_output_format: String,
    #[serde(rename = "DefaultDeltaX")]
    pub default_delta_x: f64,
    pub default_rigidity: f64,
    pub default_scale_back: bool,
    pub default_vibrato: bool,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        let cores = num_cpus::get().max(1);
        Self {
            max_image_threads: cores,
            max_video_threads: (cores / 2).max(1),
            processing_timeout_seconds: 30,
            minimum_items_for_eta: 3,
            default_scale_percent: 50.0,
            default_fps: 30.0,
            default_video_frame_format: "png".into(),
            default_image_output_format: "png".into(),
            default_delta_x: 1.0,
            default_rigidity: 0.0,
            default_scale_back: false,
            default_vibrato: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct VideoEncodingSection {
    #[serde(rename = "DefaultCRF")]
    pub default_crf: u32,
    pub default_preset: String,
    pub default_pixel_format: String,
    pub default_codec: String,
}

impl Default for VideoEncodingSection {
    fn default() -> Self {
        Self {
            default_crf: 23,
            default_preset: "medium".into(),
            default_pixel_format: "yuv420p".into(),
            default_codec: "libx264".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OutputSection {
    pub suffix: String,
    pub progress_character: String,
    pub show_estimated_duration: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            suffix: "-cas".into(),
            progress_character: "#".into(),
            show_estimated_duration: true,
        }
    }
}

impl AppConfig {
    /// `${APPDATA}/cascaler` on Windows, `${HOME}/.config/cascaler` elsewhere
    /// (dirs resolves the platform difference).
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or_else(|| CasError::config("could not determine the configuration directory"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(SETTINGS_FILE))
    }

    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("logs"))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CasError::config(format!("{}: {e}", path.display())))
    }

    /// Load the user file when present, otherwise the embedded defaults.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CasError::config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

// ── FFmpeg shared-library resolution ─────────────────────────────────────────
//
// The bindings link libav* at build time, so this search cannot change what
// is loaded at runtime; it backs `config init/export --detect-ffmpeg` and the
// startup log line. Priority: configured LibraryPath → FFMPEG_PATH → common
// platform dirs → sibling `lib` of an ffmpeg binary on PATH.

#[cfg(target_os = "windows")]
const LIB_SUFFIXES: &[&str] = &[".dll"];
#[cfg(target_os = "macos")]
const LIB_SUFFIXES: &[&str] = &[".dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const LIB_SUFFIXES: &[&str] = &[".so"];

fn contains_lib(dir: &Path, name: &str) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let file = entry.file_name();
        let Some(file) = file.to_str() else { continue };
        let matches_name = file.starts_with(name) || file.starts_with(&format!("lib{name}"));
        // Accept version suffixes (libavcodec.so.61, avcodec-61.dll).
        if matches_name && LIB_SUFFIXES.iter().any(|s| file.contains(s)) {
            return true;
        }
    }
    false
}

/// A directory qualifies when it holds the essential libraries.
pub fn has_essential_libs(dir: &Path) -> bool {
    dir.is_dir() && contains_lib(dir, "avcodec") && contains_lib(dir, "avformat")
}

#[cfg(target_os = "windows")]
fn platform_lib_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\ffmpeg\bin"),
        PathBuf::from(r"C:\Program Files\ffmpeg\bin"),
    ]
}

#[cfg(target_os = "macos")]
fn platform_lib_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/opt/homebrew/lib"),
        PathBuf::from("/usr/local/lib"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_lib_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/lib"),
        PathBuf::from("/usr/lib/x86_64-linux-gnu"),
        PathBuf::from("/usr/local/lib"),
    ]
}

pub fn resolve_ffmpeg_dir(cfg: &FfmpegSection) -> Option<PathBuf> {
    if let Some(dir) = &cfg.library_path {
        if has_essential_libs(dir) {
            return Some(dir.clone());
        }
        log::warn!(
            "configured FFmpeg LibraryPath {} is missing the essential libraries",
            dir.display()
        );
    }
    if !cfg.enable_auto_detection {
        return None;
    }
    if let Ok(env_dir) = std::env::var("FFMPEG_PATH") {
        let dir = PathBuf::from(env_dir);
        if has_essential_libs(&dir) {
            return Some(dir);
        }
    }
    for dir in platform_lib_dirs() {
        if has_essential_libs(&dir) {
            return Some(dir);
        }
    }
    // Last resort: the lib directory next to an ffmpeg binary on PATH
    // (and the bin directory itself, where Windows builds keep the DLLs).
    if let Ok(bin) = which::which("ffmpeg") {
        if let Some(bin_dir) = bin.parent() {
            if has_essential_libs(bin_dir) {
                return Some(bin_dir.to_path_buf());
            }
            if let Some(prefix) = bin_dir.parent() {
                let lib = prefix.join("lib");
                if has_essential_libs(&lib) {
                    return Some(lib);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_pascal_case_sections() {
        let json = serde_json::to_string(&AppConfig::default()).unwrap();
        for key in [
            "\"FFmpeg\"",
            "\"Processing\"",
            "\"VideoEncoding\"",
            "\"Output\"",
            "\"DefaultCRF\"",
            "\"MinimumItemsForETA\"",
            "\"DefaultDeltaX\"",
            "\"MaxImageThreads\"",
            "\"ProgressCharacter\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn partial_file_layers_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"{ "VideoEncoding": { "DefaultCRF": 18 }, "Output": { "Suffix": "-lqr" } }"#,
        )
        .unwrap();
        let cfg = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.video_encoding.default_crf, 18);
        assert_eq!(cfg.output.suffix, "-lqr");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.processing.processing_timeout_seconds, 30);
        assert_eq!(cfg.video_encoding.default_preset, "medium");
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let mut cfg = AppConfig::default();
        cfg.processing.max_video_threads = 2;
        cfg.save_to_file(&path).unwrap();
        let back = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(back.processing.max_video_threads, 2);
    }

    #[test]
    fn lib_detection_requires_both_essentials() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_essential_libs(dir.path()));
        let suffix = LIB_SUFFIXES[0];
        fs::write(dir.path().join(format!("libavcodec{suffix}.61")), b"").unwrap();
        assert!(!has_essential_libs(dir.path()));
        fs::write(dir.path().join(format!("libavformat{suffix}.61")), b"").unwrap();
        assert!(has_essential_libs(dir.path()));
    }
}
