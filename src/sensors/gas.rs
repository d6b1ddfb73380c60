use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::config::SensorConfig;
use crate::common::error::{KioskError, Result};
use crate::sensors::Adc;

/// Converts a mean gas reading into promille against a clean-air baseline.
/// Never negative; readings below baseline clamp to 0.
pub fn promille_from_mean(mean: f64, baseline: f64, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 0.0;
    }
    ((mean - baseline).max(0.0)) / scale
}

fn median(values: &mut [u16]) -> f64 {
    values.sort_unstable();
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2] as f64
    } else {
        (values[n / 2 - 1] as f64 + values[n / 2] as f64) / 2.0
    }
}

/// MQ-3 channel plus the shared baseline. Clones share the baseline.
#[derive(Clone)]
pub struct GasSensor {
    adc: Arc<dyn Adc>,
    channel: u8,
    baseline_samples: usize,
    scale: f64,
    baseline: Arc<RwLock<Option<f64>>>,
}

impl GasSensor {
    pub fn new(adc: Arc<dyn Adc>, config: &SensorConfig) -> Self {
        Self {
            adc,
            channel: config.mq3_channel,
            baseline_samples: config.baseline_samples,
            scale: config.promille_scale,
            baseline: Arc::new(RwLock::new(None)),
        }
    }

    pub fn read_raw(&self) -> Result<u16> {
        self.adc.read_channel(self.channel)
    }

    pub fn baseline(&self) -> Option<f64> {
        *self.baseline.read()
    }

    /// Median of `baseline_samples` reads. Failed reads are skipped; if all
    /// fail the previous baseline is kept and an error returned.
    pub fn calibrate(&self) -> Result<f64> {
        let mut samples = Vec::with_capacity(self.baseline_samples);
        let mut failures = 0usize;
        for _ in 0..self.baseline_samples {
            match self.read_raw() {
                Ok(v) => samples.push(v),
                Err(_) => failures += 1,
            }
        }
        if samples.is_empty() {
            return Err(KioskError::Sensor(format!(
                "Gas calibration failed: all {} reads failed", failures
            )));
        }
        if failures > 0 {
            tracing::warn!(failures, "gas calibration skipped failed reads");
        }

        let baseline = median(&mut samples);
        *self.baseline.write() = Some(baseline);
        tracing::info!(baseline, samples = samples.len(), "gas_baseline_set");
        Ok(baseline)
    }

    /// Promille for a batch of blow samples.
    ///
    /// An empty batch takes a single fresh read. Without a baseline the batch
    /// mean becomes it, which yields 0 for that measurement.
    pub fn promille_from_samples(&self, samples: &[u16]) -> Result<f64> {
        let mean = if samples.is_empty() {
            self.read_raw()? as f64
        } else {
            samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64
        };

        let baseline = {
            let mut guard = self.baseline.write();
            match *guard {
                Some(b) => b,
                None => {
                    tracing::warn!(baseline = mean, "no gas baseline, adopting measurement mean");
                    *guard = Some(mean);
                    mean
                }
            }
        };

        Ok(promille_from_mean(mean, baseline, self.scale))
    }
}
