use std::sync::Arc;

use crate::sensors::Adc;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MicBurst {
    /// Peak-to-peak over the burst.
    pub amplitude: u16,
    pub average: f64,
}

impl MicBurst {
    pub fn from_samples(samples: &[u16]) -> Self {
        let (Some(&min), Some(&max)) = (samples.iter().min(), samples.iter().max()) else {
            return Self::default();
        };
        let average = samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64;
        Self {
            amplitude: max - min,
            average,
        }
    }
}

#[derive(Clone)]
pub struct Microphone {
    adc: Arc<dyn Adc>,
    channel: u8,
    samples: usize,
}

impl Microphone {
    pub fn new(adc: Arc<dyn Adc>, channel: u8, samples: usize) -> Self {
        Self { adc, channel, samples }
    }

    /// A failed read anywhere in the burst yields a silent burst.
    pub fn burst(&self) -> MicBurst {
        let mut values = Vec::with_capacity(self.samples);
        for _ in 0..self.samples {
            match self.adc.read_channel(self.channel) {
                Ok(v) => values.push(v),
                Err(e) => {
                    tracing::debug!("microphone read failed: {}", e);
                    return MicBurst::default();
                }
            }
        }
        MicBurst::from_samples(&values)
    }
}
