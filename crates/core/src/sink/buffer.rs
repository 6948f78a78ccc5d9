use crate::sink::{AudioSink, Continuation};

/// Keeps a copy of every chunk in memory.
#[derive(Clone, Debug, Default)]
pub struct BufferSink {
    samples: Vec<f32>,
    chunk_lens: Vec<usize>,
    max_samples: Option<usize>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the producer to stop once at least `max_samples` samples are held.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = Some(max_samples);
        self
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_lens.len()
    }

    /// Iterates the chunks in delivery order.
    pub fn chunks(&self) -> impl Iterator<Item = &[f32]> {
        let mut offset = 0;
        self.chunk_lens.iter().map(move |&len| {
            let chunk = &self.samples[offset..offset + len];
            offset += len;
            chunk
        })
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl AudioSink for BufferSink {
    fn deliver(&mut self, samples: &[f32]) -> Continuation {
        self.samples.extend_from_slice(samples);
        self.chunk_lens.push(samples.len());

        match self.max_samples {
            Some(max) if self.samples.len() >= max => Continuation::Stop,
            _ => Continuation::Continue,
        }
    }
}
