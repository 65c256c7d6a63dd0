//! Runtime configuration settings

use crate::error::{Result, SeparationError};
use crate::types::{StemKind, StemMap};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of Wiener refinement iterations
pub const DEFAULT_WIENER_ITERATIONS: usize = 4;

/// Floor for powers and masks; keeps every ratio finite
pub const DEFAULT_EPS: f32 = 1e-8;

/// How the left/right masks of a stem combine into its initial power estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StereoMaskMode {
    /// Average of both channel masks
    #[default]
    Shared,
    /// Larger of both channel masks
    PerChannel,
}

/// Parameters for the optional waveform-domain refinement pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondPassSettings {
    /// Analysis size, independent of the models' fft size
    pub fft_size: usize,
    pub hop_size: usize,
    /// Exponent applied to stem magnitudes when weighting
    pub power: f32,
    pub iterations: usize,
}

impl Default for SecondPassSettings {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            hop_size: 1024,
            power: 1.5,
            iterations: 3,
        }
    }
}

/// Separation engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationSettings {
    /// Wiener refinement iterations over the full spectrogram
    pub wiener_iterations: usize,
    /// Numeric floor for masks and powers
    pub eps: f32,
    /// Per-stem mask sharpening exponent; stems not listed use 1.0
    pub mask_sharpen: StemMap<f32>,
    /// Stem that absorbs whatever the other stems leave of the mixture
    pub residual_target: StemKind,
    pub stereo_mask_mode: StereoMaskMode,
    /// Run the second refinement pass after resynthesis
    pub second_pass: Option<SecondPassSettings>,
    /// Scale the mixture down to this peak before analysis
    pub normalize_peak: Option<f32>,
}

impl SeparationSettings {
    /// Sharpening exponent for a stem
    pub fn sharpen_exponent(&self, kind: StemKind) -> f32 {
        self.mask_sharpen.get(&kind).copied().unwrap_or(1.0)
    }

    /// Check the engine parameters for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.wiener_iterations == 0 {
            return Err(SeparationError::config_error(
                "wiener_iterations must be at least 1",
            ));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(SeparationError::config_error(format!(
                "eps must be a small positive number, got {}",
                self.eps
            )));
        }
        if let Some((kind, alpha)) = self
            .mask_sharpen
            .iter()
            .find(|(_, a)| !(a.is_finite() && **a > 0.0))
        {
            return Err(SeparationError::config_error(format!(
                "mask sharpening exponent for {} must be positive, got {}",
                kind, alpha
            )));
        }
        if let Some(pass) = &self.second_pass {
            if pass.iterations == 0 {
                return Err(SeparationError::config_error(
                    "second pass iterations must be at least 1",
                ));
            }
            if !(pass.power.is_finite() && pass.power > 0.0) {
                return Err(SeparationError::config_error(format!(
                    "second pass power must be positive, got {}",
                    pass.power
                )));
            }
        }
        if let Some(peak) = self.normalize_peak {
            if !(peak.is_finite() && peak > 0.0) {
                return Err(SeparationError::config_error(format!(
                    "normalize_peak must be positive, got {}",
                    peak
                )));
            }
        }
        Ok(())
    }

    /// Apply the engine flags given on the command line
    pub fn with_cli_overrides(mut self, cli: &super::cli::Cli) -> Self {
        if let Some(iters) = cli.wiener_iters {
            self.wiener_iterations = iters;
        }
        if let Some(residual) = cli.residual {
            self.residual_target = residual;
        }
        if cli.second_pass && self.second_pass.is_none() {
            self.second_pass = Some(SecondPassSettings::default());
        }
        if cli.normalize && self.normalize_peak.is_none() {
            self.normalize_peak = Some(crate::audio::DEFAULT_PEAK_TARGET);
        }
        self
    }
}

impl Default for SeparationSettings {
    fn default() -> Self {
        let mask_sharpen = StemMap::from([
            (StemKind::Vocal, 1.0),
            (StemKind::Bass, 1.2),
            (StemKind::Drums, 1.2),
            (StemKind::Piano, 1.2),
            (StemKind::Guitar, 1.2),
            (StemKind::Others, 1.0),
        ]);
        Self {
            wiener_iterations: DEFAULT_WIENER_ITERATIONS,
            eps: DEFAULT_EPS,
            mask_sharpen,
            residual_target: StemKind::Others,
            stereo_mask_mode: StereoMaskMode::Shared,
            second_pass: None,
            normalize_peak: None,
        }
    }
}

/// Runtime settings for the command-line host
#[derive(Debug, Clone)]
pub struct Settings {
    /// Input WAV file
    pub input: PathBuf,
    /// Directory receiving the stem files
    pub output: PathBuf,
    /// Model configuration (builtin heuristics for every stem when absent)
    pub models_path: Option<PathBuf>,
    /// Worker threads for per-frame parallelism
    pub threads: usize,
    /// Show a progress bar
    pub show_progress: bool,
    /// Engine parameters
    pub separation: SeparationSettings,
}

impl Settings {
    /// Create settings from CLI arguments
    pub fn from_cli(cli: &super::cli::Cli) -> Self {
        let default_threads = num_cpus::get().saturating_sub(1).max(1);

        Self {
            input: cli.input.clone(),
            output: cli.output.clone(),
            models_path: cli.models.clone(),
            threads: cli.threads.unwrap_or(default_threads),
            show_progress: !cli.quiet,
            separation: SeparationSettings::default().with_cli_overrides(cli),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: PathBuf::from("mix.wav"),
            output: PathBuf::from("./stems"),
            models_path: None,
            threads: num_cpus::get().saturating_sub(1).max(1),
            show_progress: true,
            separation: SeparationSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = SeparationSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.wiener_iterations, 4);
        assert_eq!(settings.residual_target, StemKind::Others);
        assert_eq!(settings.sharpen_exponent(StemKind::Bass), 1.2);
        assert_eq!(settings.sharpen_exponent(StemKind::Vocal), 1.0);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let settings = SeparationSettings {
            wiener_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(SeparationError::Config { .. })));
    }

    #[test]
    fn test_negative_sharpen_rejected() {
        let mut settings = SeparationSettings::default();
        settings.mask_sharpen.insert(StemKind::Drums, -1.0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        use clap::Parser;
        let cli = super::super::cli::Cli::try_parse_from([
            "musicroom", "-i", "a.wav", "-o", "out", "--wiener-iters", "7", "--second-pass",
            "--residual", "drums", "-j", "3",
        ])
        .unwrap();
        let settings = Settings::from_cli(&cli);
        assert_eq!(settings.threads, 3);
        assert_eq!(settings.separation.wiener_iterations, 7);
        assert_eq!(settings.separation.residual_target, StemKind::Drums);
        assert_eq!(
            settings.separation.second_pass,
            Some(SecondPassSettings::default())
        );
        assert_eq!(settings.separation.normalize_peak, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: SeparationSettings = serde_json::from_str(
            r#"{ "wiener_iterations": 2, "stereo_mask_mode": "per-channel", "second_pass": {} }"#,
        )
        .unwrap();
        assert_eq!(settings.wiener_iterations, 2);
        assert_eq!(settings.stereo_mask_mode, StereoMaskMode::PerChannel);
        assert_eq!(settings.second_pass, Some(SecondPassSettings::default()));
        assert_eq!(settings.eps, DEFAULT_EPS);
    }
}
