use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::terminal::cell::pack_rgb;

const DEFAULT_CONFIG: &str = include_str!("../../assets/default_config.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    /// Margin around the cell grid in physical pixels.
    #[serde(default = "default_margin")]
    pub margin: u32,
}

fn default_margin() -> u32 {
    8
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { width: 1024, height: 768, margin: default_margin() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontConfig {
    pub family: String,
    /// Cell height in pixels; the advance width is measured from the font.
    pub height: u32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self { family: "DejaVu Sans Mono".to_string(), height: 17 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorsConfig {
    pub foreground: String,
    pub background: String,
    #[serde(default = "default_cursor_bright")]
    pub cursor_bright: String,
    #[serde(default = "default_cursor_dim")]
    pub cursor_dim: String,
}

fn default_cursor_bright() -> String {
    "#ffffff".to_string()
}

fn default_cursor_dim() -> String {
    "#222222".to_string()
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            foreground: "#afafaf".to_string(),
            background: "#0c0c0c".to_string(),
            cursor_bright: default_cursor_bright(),
            cursor_dim: default_cursor_dim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_scrollback_bytes")]
    pub scrollback_bytes: usize,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_hash_count")]
    pub hash_count: usize,
    #[serde(default = "default_split_line_at")]
    pub split_line_at: usize,
    #[serde(default)]
    pub fast_pipe: bool,
    #[serde(default = "default_true")]
    pub line_wrap: bool,
    #[serde(default = "default_true")]
    pub throttle: bool,
}

fn default_scrollback_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_max_lines() -> usize {
    8192
}
fn default_hash_count() -> usize {
    4096
}
fn default_split_line_at() -> usize {
    4096
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scrollback_bytes: default_scrollback_bytes(),
            max_lines: default_max_lines(),
            hash_count: default_hash_count(),
            split_line_at: default_split_line_at(),
            fast_pipe: false,
            line_wrap: true,
            throttle: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub font: FontConfig,
    #[serde(default)]
    pub colors: ColorsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    pub fn config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("~/.config"));
        base.join("torrent_terminal").join("config.toml")
    }

    pub fn load_or_default() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(error) => {
                        log::warn!("failed to parse config at {:?}: {}", path, error);
                    }
                },
                Err(error) => {
                    log::warn!("failed to read config at {:?}: {}", path, error);
                }
            }
        } else {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(&path, DEFAULT_CONFIG);
        }
        toml::from_str(DEFAULT_CONFIG).unwrap_or_default()
    }
}

/// `#rrggbb` → packed `0x00BBGGRR`, or `fallback` when malformed.
pub fn parse_packed_color(hex: &str, fallback: u32) -> u32 {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return fallback;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(r), Some(g), Some(b)) => pack_rgb(r as u32, g as u32, b as u32),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).expect("default config");
        assert_eq!(config.engine.scrollback_bytes, 16 * 1024 * 1024);
        assert_eq!(config.engine.max_lines, 8192);
        assert!(config.engine.line_wrap);
    }

    #[test]
    fn packed_colors_use_bgr_layout() {
        assert_eq!(parse_packed_color("#ff0000", 0), 0x0000FF);
        assert_eq!(parse_packed_color("#0c0c0c", 0), 0x0C0C0C);
        assert_eq!(parse_packed_color("bogus", 7), 7);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("[font]\nfamily = \"Test\"\nheight = 20\n").unwrap();
        assert_eq!(config.font.family, "Test");
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.engine.split_line_at, 4096);
    }
}
