//! Pipeline orchestration
//!
//! Coordinates one separation run: parse, analyse, estimate masks, refine,
//! redistribute, resynthesise and encode. Stages run one after another;
//! per-frame work inside a stage fans out on the current rayon pool.

use super::progress::{Progress, ProgressTracker, Stage};
use crate::audio::{self, BitDepth};
use crate::config::{ModelSource, ModelSpec, SeparationSettings};
use crate::error::{Result, SeparationError};
use crate::separation::mask::{initial_power, sharpen};
use crate::separation::redistribute::project_residual;
use crate::separation::stft::{validate_resolution, Plane};
use crate::separation::wiener::refine_waveforms;
use crate::separation::{
    HeuristicBandMask, InferenceAdapter, LearnedModelMask, MaskProvider, Redistributor,
    SpectralTransform, WienerRefiner,
};
use crate::types::{EncodedStem, SeparatedStems, StemKind, StemMap, StereoBuffer};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A model together with the provider chosen for it
struct BoundModel {
    spec: ModelSpec,
    provider: Arc<dyn MaskProvider>,
}

/// Validated, reusable separation pipeline
pub struct SeparationPipeline {
    settings: SeparationSettings,
    models: Vec<BoundModel>,
    fft_size: usize,
    hop_size: usize,
    transform: SpectralTransform,
    refiner: WienerRefiner,
    redistributor: Redistributor,
}

impl SeparationPipeline {
    /// Validate the configuration and pick a mask provider for every model
    ///
    /// Learned models need `adapter`; without one they are a configuration error.
    pub fn new(
        settings: SeparationSettings,
        models: Vec<ModelSpec>,
        adapter: Option<Arc<dyn InferenceAdapter>>,
    ) -> Result<Self> {
        settings.validate()?;

        let first = models
            .first()
            .ok_or_else(|| SeparationError::config_error("at least one model is required"))?;
        let (fft_size, hop_size) = (first.fft_size, first.hop_size);
        validate_resolution(fft_size, hop_size)?;

        if let Some(pass) = &settings.second_pass {
            validate_resolution(pass.fft_size, pass.hop_size)?;
        }

        let mut targets = BTreeSet::new();
        for model in &models {
            if model.fft_size != fft_size || model.hop_size != hop_size {
                return Err(SeparationError::config_error(format!(
                    "model '{}' uses fft {} / hop {}, expected fft {} / hop {} like '{}'",
                    model.name, model.fft_size, model.hop_size, fft_size, hop_size, first.name
                )));
            }
            if !targets.insert(model.target) {
                return Err(SeparationError::config_error(format!(
                    "more than one model targets {}",
                    model.target
                )));
            }
        }

        let heuristic: Arc<dyn MaskProvider> = Arc::new(HeuristicBandMask::new());
        let learned: Option<Arc<dyn MaskProvider>> = adapter
            .map(|adapter| Arc::new(LearnedModelMask::new(adapter)) as Arc<dyn MaskProvider>);

        let models = models
            .into_iter()
            .map(|spec| {
                let provider = match &spec.source {
                    ModelSource::Builtin { .. } => Arc::clone(&heuristic),
                    ModelSource::Onnx { path } => learned.clone().ok_or_else(|| {
                        SeparationError::config_error(format!(
                            "model '{}' ({}) needs an inference adapter; build with --features onnx",
                            spec.name,
                            path.display()
                        ))
                    })?,
                };
                debug!("Model '{}' -> {} for {}", spec.name, provider.name(), spec.target);
                Ok(BoundModel { spec, provider })
            })
            .collect::<Result<Vec<_>>>()?;

        let refiner = WienerRefiner::new(settings.wiener_iterations, settings.eps);
        let redistributor = Redistributor::new(settings.residual_target, settings.eps);

        Ok(Self {
            settings,
            models,
            fft_size,
            hop_size,
            transform: SpectralTransform::new(),
            refiner,
            redistributor,
        })
    }

    /// Stems a run produces: every model target plus the residual target
    pub fn stems(&self) -> BTreeSet<StemKind> {
        self.models
            .iter()
            .map(|m| m.spec.target)
            .chain(std::iter::once(self.settings.residual_target))
            .collect()
    }

    /// Separate one WAV mixture
    ///
    /// Progress reports are non-decreasing and end with [`Stage::Done`] on
    /// success. On failure nothing is returned but the error.
    pub fn run(&self, wav: &[u8], progress: &mut dyn FnMut(Progress)) -> Result<SeparatedStems> {
        let run_start = Instant::now();
        let mut tracker = ProgressTracker::new(progress);

        // Parse
        let mixture = self.prepare_mixture(wav)?;
        info!(
            "Separating {:.2}s of audio ({} samples at {}Hz) into {} stems",
            mixture.duration,
            mixture.len(),
            mixture.sample_rate,
            self.stems().len()
        );
        tracker.complete(Stage::Parsing);

        // Analyse
        let start = Instant::now();
        let spectrogram = self
            .transform
            .forward(&mixture, self.fft_size, self.hop_size)?;
        debug!(
            "STFT: {} frames x {} bins in {:.1?}",
            spectrogram.num_frames(),
            spectrogram.num_bins(),
            start.elapsed()
        );
        tracker.complete(Stage::Transforming);

        // Masks
        let magnitude = spectrogram.magnitudes();
        let mixture_power = spectrogram.mean_power();
        let mut power: StemMap<Plane> = StemMap::new();
        for (i, model) in self.models.iter().enumerate() {
            let mask = model
                .provider
                .estimate(&magnitude, &model.spec, mixture.sample_rate)?;
            let alpha = self.settings.sharpen_exponent(model.spec.target);
            let mask = sharpen(&mask, alpha, self.settings.eps);
            power.insert(
                model.spec.target,
                initial_power(
                    &mask,
                    self.settings.stereo_mask_mode,
                    &mixture_power,
                    self.settings.eps,
                ),
            );
            tracker.step(Stage::Estimating, i + 1, self.models.len());
        }

        // Refine
        let start = Instant::now();
        let stems = self.refiner.refine(&spectrogram, power, &mut |done, total| {
            tracker.step(Stage::Refining, done, total)
        })?;
        info!(
            "Wiener refinement ({} iterations) in {:.1?}",
            self.refiner.iterations(),
            start.elapsed()
        );

        // Redistribute
        let stems = self.redistributor.apply(stems, &spectrogram);
        tracker.complete(Stage::Redistributing);

        let mut waveforms: StemMap<StereoBuffer> = stems
            .iter()
            .map(|(&kind, spec)| Ok((kind, self.transform.inverse(spec)?)))
            .collect::<Result<_>>()?;

        if let Some(pass) = &self.settings.second_pass {
            let start = Instant::now();
            waveforms = refine_waveforms(
                &self.transform,
                &waveforms,
                &mixture,
                pass,
                &mut |done, total| tracker.step(Stage::SecondPass, done, total),
            )?;
            info!("Second pass in {:.1?}", start.elapsed());
        }

        let waveforms = project_residual(waveforms, &mixture, self.settings.residual_target);

        // Encode
        let output = SeparatedStems {
            stems: waveforms
                .iter()
                .map(|(&kind, buffer)| Ok((kind, encode_stem(buffer)?)))
                .collect::<Result<_>>()?,
        };
        tracker.complete(Stage::Encoding);

        info!(
            "Separated {} stems in {:.1?}",
            output.len(),
            run_start.elapsed()
        );
        tracker.complete(Stage::Done);
        Ok(output)
    }

    /// Parse the WAV bytes and condition the mixture
    fn prepare_mixture(&self, wav: &[u8]) -> Result<StereoBuffer> {
        let (mixture, replaced) = audio::sanitize(audio::parse(wav)?);
        if replaced > 0 {
            warn!("Replaced {} non-finite samples with silence", replaced);
        }
        if mixture.sample_rate == 0 {
            return Err(SeparationError::format_error("sample rate is zero"));
        }
        Ok(match self.settings.normalize_peak {
            Some(target) => audio::normalize_peak(&mixture, target).0,
            None => mixture,
        })
    }
}

/// Render a stem at both bit depths
fn encode_stem(buffer: &StereoBuffer) -> Result<EncodedStem> {
    Ok(EncodedStem {
        wav_f32: audio::encode(buffer, BitDepth::Float32)?,
        wav_i16: audio::encode(buffer, BitDepth::Int16)?,
        duration_seconds: buffer.duration,
        sample_rate: buffer.sample_rate,
        peak: buffer.peak(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_models;

    fn small_models(targets: &[StemKind]) -> Vec<ModelSpec> {
        targets
            .iter()
            .map(|&t| ModelSpec::builtin(t).with_resolution(512, 128))
            .collect()
    }

    fn tone_wav(len: usize) -> Vec<u8> {
        let samples: Vec<f32> = (0..len)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 330.0 * i as f32 / 44100.0).sin())
            .collect();
        audio::encode(
            &StereoBuffer::new(samples.clone(), samples, 44100),
            BitDepth::Float32,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_model_list_rejected() {
        let result = SeparationPipeline::new(SeparationSettings::default(), Vec::new(), None);
        assert!(matches!(result, Err(SeparationError::Config { .. })));
    }

    #[test]
    fn test_mismatched_resolution_rejected() {
        let mut models = small_models(&[StemKind::Bass, StemKind::Vocal]);
        models[1].hop_size = 256;
        assert!(SeparationPipeline::new(SeparationSettings::default(), models, None).is_err());
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let models = small_models(&[StemKind::Bass, StemKind::Bass]);
        assert!(SeparationPipeline::new(SeparationSettings::default(), models, None).is_err());
    }

    #[test]
    fn test_non_power_of_two_fft_rejected() {
        let models = small_models(&[StemKind::Bass])
            .into_iter()
            .map(|m| m.with_resolution(1000, 250))
            .collect();
        assert!(matches!(
            SeparationPipeline::new(SeparationSettings::default(), models, None),
            Err(SeparationError::Config { .. })
        ));
    }

    #[test]
    fn test_learned_model_without_adapter_rejected() {
        let mut models = small_models(&[StemKind::Vocal]);
        models[0].source = ModelSource::Onnx {
            path: "vocals.onnx".into(),
        };
        let err = SeparationPipeline::new(SeparationSettings::default(), models, None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("inference adapter"));
    }

    #[test]
    fn test_residual_slot_always_present() {
        let pipeline = SeparationPipeline::new(
            SeparationSettings::default(),
            small_models(&[StemKind::Bass, StemKind::Vocal]),
            None,
        )
        .unwrap();
        let stems = pipeline.stems();
        assert!(stems.contains(&StemKind::Others));

        let out = pipeline.run(&tone_wav(4096), &mut |_| {}).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.get(StemKind::Others).is_some());
    }

    #[test]
    fn test_run_reports_stages_in_order() {
        let pipeline = SeparationPipeline::new(
            SeparationSettings::default(),
            small_models(&[StemKind::Bass, StemKind::Drums, StemKind::Others]),
            None,
        )
        .unwrap();
        let mut reports = Vec::new();
        pipeline
            .run(&tone_wav(3000), &mut |p| reports.push(p))
            .unwrap();

        assert!(reports.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(reports.windows(2).all(|w| w[0].stage <= w[1].stage));
        let last = reports.last().unwrap();
        assert_eq!(last.stage, Stage::Done);
        assert_eq!(last.percent, 100.0);
        // One report per model and per Wiener iteration
        assert_eq!(
            reports.iter().filter(|p| p.stage == Stage::Estimating).count(),
            3
        );
        assert_eq!(
            reports.iter().filter(|p| p.stage == Stage::Refining).count(),
            4
        );
    }

    #[test]
    fn test_malformed_wav_is_format_error() {
        let pipeline =
            SeparationPipeline::new(SeparationSettings::default(), default_models(), None).unwrap();
        let result = pipeline.run(b"RIFF\x00\x00\x00\x00WAVE", &mut |_| {});
        assert!(matches!(result, Err(SeparationError::Format { .. })));
    }

    #[test]
    fn test_encoded_stems_parse_back() {
        let pipeline = SeparationPipeline::new(
            SeparationSettings::default(),
            small_models(&[StemKind::Vocal]),
            None,
        )
        .unwrap();
        let out = pipeline.run(&tone_wav(2048), &mut |_| {}).unwrap();
        for stem in out.stems.values() {
            let f32_buf = audio::parse(&stem.wav_f32).unwrap();
            let i16_buf = audio::parse(&stem.wav_i16).unwrap();
            assert_eq!(f32_buf.len(), 2048);
            assert_eq!(i16_buf.len(), 2048);
            assert_eq!(stem.sample_rate, 44100);
            assert!(stem.peak.is_finite());
        }
    }
}
