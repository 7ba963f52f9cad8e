// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use lumen_render::{BackendKind, RecoveryPolicy, DEFAULT_CLEAR};
use lumen_render_gl::GlConfig;
use lumen_render_vk::{VkConfig, VkVsyncMode};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Presentation backend: auto | vk | gl | software
    #[arg(long)]
    pub backend: Option<String>,
    /// Config file
    #[arg(long, default_value = "lumen.toml")]
    pub config: PathBuf,
    /// GL only: skip every other frame
    #[arg(long)]
    pub performance_mode: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PresentCfg {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_frames_in_flight")]
    pub max_frames_in_flight: usize,
    #[serde(default)]
    pub vsync_mode: VsyncMode,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_stable_frames")]
    pub stable_frames: u32,
    #[serde(default)]
    pub performance_mode: bool,
    #[serde(default)]
    pub target_fps: u32,
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub present: PresentCfg,
}

impl Default for PresentCfg {
    fn default() -> Self {
        PresentCfg {
            backend: default_backend(),
            clear_color: default_clear(),
            max_frames_in_flight: default_frames_in_flight(),
            vsync_mode: VsyncMode::Fifo,
            retry_budget: default_retry_budget(),
            stable_frames: default_stable_frames(),
            performance_mode: false,
            target_fps: 0,
            fence_timeout_ms: default_fence_timeout_ms(),
        }
    }
}

fn default_backend() -> String {
    "auto".to_owned()
}
fn default_clear() -> [f32; 4] {
    DEFAULT_CLEAR
}
fn default_frames_in_flight() -> usize {
    2
}
fn default_retry_budget() -> u32 {
    3
}
fn default_stable_frames() -> u32 {
    120
}
fn default_fence_timeout_ms() -> u64 {
    1000
}

/// Reads the config file. A missing or malformed file means defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("{}: {err}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(_) => {
            info!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
    }
}

impl PresentCfg {
    /// Command-line values win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(backend) = &args.backend {
            self.backend.clone_from(backend);
        }
        if args.performance_mode {
            self.performance_mode = true;
        }
    }

    /// `None` lets selection pick the best available backend. An unknown
    /// name is treated the same way.
    pub fn preference(&self) -> Option<BackendKind> {
        if self.backend.eq_ignore_ascii_case("auto") {
            return None;
        }
        match self.backend.parse() {
            Ok(kind) => Some(kind),
            Err(err) => {
                warn!("{err}; selecting automatically");
                None
            }
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            retry_budget: self.retry_budget,
            stable_frames: self.stable_frames,
        }
    }

    pub fn vk_config(&self) -> VkConfig {
        VkConfig {
            max_frames_in_flight: self.max_frames_in_flight,
            vsync_mode: match self.vsync_mode {
                VsyncMode::Fifo => VkVsyncMode::Fifo,
                VsyncMode::Mailbox => VkVsyncMode::Mailbox,
            },
            fence_timeout: Duration::from_millis(self.fence_timeout_ms),
            ..VkConfig::default()
        }
    }

    pub fn gl_config(&self) -> GlConfig {
        GlConfig {
            vsync: true,
            performance_mode: self.performance_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.present.preference(), None);
        assert_eq!(cfg.present.recovery_policy(), RecoveryPolicy::default());
    }

    #[test]
    fn present_table_overrides_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [present]
            backend = "gl"
            clear_color = [1.0, 0.0, 0.0, 1.0]
            max_frames_in_flight = 9
            vsync_mode = "mailbox"
            retry_budget = 5
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();
        let p = &cfg.present;
        assert_eq!(p.preference(), Some(BackendKind::OpenGl));
        assert_eq!(p.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(p.stable_frames, 120);

        let vk = p.vk_config();
        assert_eq!(vk.frames_in_flight(), 4);
        assert_eq!(vk.vsync_mode, VkVsyncMode::Mailbox);
        assert_eq!(vk.fence_timeout, Duration::from_millis(250));
        assert_eq!(p.recovery_policy().retry_budget, 5);
    }

    #[test]
    fn unknown_backend_selects_automatically() {
        let cfg = PresentCfg {
            backend: "metal".into(),
            ..PresentCfg::default()
        };
        assert_eq!(cfg.preference(), None);
    }

    #[test]
    fn missing_or_malformed_file_falls_back() {
        let dir = std::env::temp_dir().join(format!("lumen-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        assert_eq!(load_cfg(&dir.join("absent.toml")), AppCfg::default());

        let bad = dir.join("bad.toml");
        fs::write(&bad, "[present]\nretry_budget = \"lots\"\n").unwrap();
        assert_eq!(load_cfg(&bad), AppCfg::default());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cli_overrides_file() {
        let args = Args::try_parse_from([
            "lumen",
            "--backend",
            "software",
            "--performance-mode",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("lumen.toml"));

        let mut cfg = PresentCfg {
            backend: "vk".into(),
            ..PresentCfg::default()
        };
        cfg.apply_args(&args);
        assert_eq!(cfg.preference(), Some(BackendKind::Software));
        assert!(cfg.gl_config().performance_mode);
    }
}
