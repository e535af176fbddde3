//! The ordered, bounded, short-circuiting decode pipeline.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use image::{GrayImage, ImageFormat};
use rxing::{BarcodeFormat, DecodeHintType, DecodeHintValue, DecodingHintDictionary};

use crate::config::DecoderConfig;
use crate::decoder::stages;
use crate::decoder::{DecodeFailure, DecodedCode, ScanInput, Symbology};
use crate::observability::metrics;
use crate::security::validate::validate_code;

/// Largest accepted frame edge. Bounds pixel work independently of the byte
/// cap, since a small file can still decompress huge.
const MAX_DIMENSION: u32 = 4096;

fn symbology_from(format: &BarcodeFormat) -> Symbology {
    match format {
        BarcodeFormat::CODE_128 => Symbology::Code128,
        BarcodeFormat::CODE_39 => Symbology::Code39,
        BarcodeFormat::QR_CODE => Symbology::Qr,
        _ => Symbology::Other,
    }
}

/// Multi-symbology decode pipeline. Cheap to clone behind an `Arc`; decoding
/// is CPU-bound and should run on a blocking thread from async contexts.
pub struct DecodePipeline {
    config: DecoderConfig,
}

impl DecodePipeline {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Resolve a scan payload into a code.
    pub fn decode(&self, input: ScanInput) -> Result<DecodedCode, DecodeFailure> {
        match input {
            ScanInput::Text(text) => self.decode_text(&text),
            ScanInput::Image(bytes) => self.decode_image(&bytes),
        }
    }

    /// Hardware-scanner payloads are already machine-readable; they only
    /// pass through format validation.
    fn decode_text(&self, text: &str) -> Result<DecodedCode, DecodeFailure> {
        let value = validate_code(text, self.config.max_code_len)
            .map_err(|e| DecodeFailure::InvalidInput(e.to_string()))?;
        metrics::record_decode("ok", Some(0));
        Ok(DecodedCode {
            value,
            symbology: Symbology::Other,
            source_stage: 0,
        })
    }

    fn decode_image(&self, bytes: &[u8]) -> Result<DecodedCode, DecodeFailure> {
        // Gate on bytes before any pixel work.
        if bytes.len() < self.config.min_image_bytes {
            metrics::record_decode("invalid_input", None);
            return Err(DecodeFailure::InvalidInput(
                "image payload too small".into(),
            ));
        }
        if bytes.len() > self.config.max_image_bytes {
            metrics::record_decode("invalid_input", None);
            return Err(DecodeFailure::InvalidInput(
                "image payload exceeds size limit".into(),
            ));
        }
        let format = image::guess_format(bytes).map_err(|_| {
            metrics::record_decode("invalid_input", None);
            DecodeFailure::InvalidInput("unrecognized image container".into())
        })?;
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
            metrics::record_decode("invalid_input", None);
            return Err(DecodeFailure::InvalidInput(format!(
                "unsupported image format {:?}",
                format
            )));
        }

        let frame = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| {
                metrics::record_decode("invalid_input", None);
                DecodeFailure::InvalidInput(format!("corrupt image: {}", e))
            })?
            .to_luma8();

        if frame.width() > MAX_DIMENSION || frame.height() > MAX_DIMENSION {
            metrics::record_decode("invalid_input", None);
            return Err(DecodeFailure::InvalidInput("image dimensions too large".into()));
        }

        self.decode_gray(frame)
    }

    /// Run the staged pipeline over a grayscale frame.
    pub(crate) fn decode_gray(&self, frame: GrayImage) -> Result<DecodedCode, DecodeFailure> {
        let budget = Duration::from_millis(self.config.time_budget_ms);
        let started = Instant::now();

        // Stage 0: the raw frame, cheapest path.
        if let Some(code) = self.attempt(&frame, 0, started, budget)? {
            return Ok(code);
        }

        // Stage 1: contrast normalization.
        let equalized = stages::equalize(&frame);
        if let Some(code) = self.attempt(&equalized, 1, started, budget)? {
            return Ok(code);
        }

        // Stage 2: adaptive thresholding on the equalized frame.
        let thresholded = stages::threshold(&equalized);
        if let Some(code) = self.attempt(&thresholded, 2, started, budget)? {
            return Ok(code);
        }

        // Stage 3: morphological noise removal on the binarized frame.
        let denoised = stages::denoise(&thresholded);
        if let Some(code) = self.attempt(&denoised, 3, started, budget)? {
            return Ok(code);
        }

        // Stage 4: rotation probes. These reach back to the equalized frame;
        // compounding them onto the binarized one costs accuracy.
        for rotated in stages::rotations(&equalized) {
            if let Some(code) = self.attempt(&rotated, stages::ROTATE_STAGE, started, budget)? {
                return Ok(code);
            }
        }

        // Stage 5: upscale for frames where the module width fell below
        // what the readers resolve.
        let upscaled = stages::upscale(&equalized);
        if let Some(code) = self.attempt(&upscaled, 5, started, budget)? {
            return Ok(code);
        }

        metrics::record_decode("no_match", None);
        Err(DecodeFailure::NoMatch)
    }

    /// One decode attempt with budget enforcement. `Ok(None)` means "no hit,
    /// keep going"; errors short-circuit the pipeline.
    fn attempt(
        &self,
        img: &GrayImage,
        stage: usize,
        started: Instant,
        budget: Duration,
    ) -> Result<Option<DecodedCode>, DecodeFailure> {
        if started.elapsed() > budget {
            tracing::debug!(
                stage = stages::STAGE_NAMES[stage],
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Decode budget exhausted"
            );
            metrics::record_decode("timeout", Some(stage));
            return Err(DecodeFailure::Timeout(budget));
        }

        match self.read_barcode(img) {
            Some((raw_value, symbology)) => {
                let value = validate_code(&raw_value, self.config.max_code_len)
                    .map_err(|e| DecodeFailure::InvalidInput(e.to_string()))?;
                tracing::debug!(
                    stage = stages::STAGE_NAMES[stage],
                    symbology = ?symbology,
                    "Scan resolved"
                );
                metrics::record_decode("ok", Some(stage));
                Ok(Some(DecodedCode {
                    value,
                    symbology,
                    source_stage: stage,
                }))
            }
            None => Ok(None),
        }
    }

    fn read_barcode(&self, img: &GrayImage) -> Option<(String, Symbology)> {
        let mut hints: DecodingHintDictionary = HashMap::from([
            (DecodeHintType::TRY_HARDER, DecodeHintValue::TryHarder(true)),
            (
                DecodeHintType::POSSIBLE_FORMATS,
                DecodeHintValue::PossibleFormats(HashSet::from([
                    BarcodeFormat::CODE_128,
                    BarcodeFormat::CODE_39,
                    BarcodeFormat::QR_CODE,
                ])),
            ),
        ]);

        // The luma helpers take height before width.
        match rxing::helpers::detect_in_luma_with_hints(
            img.as_raw().clone(),
            img.height(),
            img.width(),
            None,
            &mut hints,
        ) {
            Ok(result) => Some((
                result.getText().to_string(),
                symbology_from(result.getBarcodeFormat()),
            )),
            Err(_) => None,
        }
    }
}
