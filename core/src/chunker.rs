use crate::config::ChunkingConfig;
use fastcdc::v2020::{
    FastCDC, AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN,
};

/// Content-defined chunker. Sizes are clamped into the range FastCDC accepts.
#[derive(Debug, Clone)]
pub struct Chunker {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
}

impl Chunker {
    pub fn new(min_size: u32, avg_size: u32, max_size: u32) -> Self {
        Self {
            min_size: min_size.clamp(MINIMUM_MIN, MINIMUM_MAX),
            avg_size: avg_size.clamp(AVERAGE_MIN, AVERAGE_MAX),
            max_size: max_size.clamp(MAXIMUM_MIN, MAXIMUM_MAX),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.min_size, config.normal_size, config.max_size)
    }

    pub fn chunk_data<'a>(&self, data: &'a [u8]) -> Vec<Chunk<'a>> {
        FastCDC::new(data, self.min_size, self.avg_size, self.max_size)
            .map(|chunk| Chunk {
                offset: chunk.offset,
                data: &data[chunk.offset..chunk.offset + chunk.length],
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub offset: usize,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking() {
        let chunker = Chunker::new(256, 1024, 4096);
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7919 % 251) as u8).collect();
        let chunks = chunker.chunk_data(&data);

        assert!(chunks.len() > 1);
        let total_size: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total_size, data.len());
        assert!(chunks.iter().all(|c| c.len() <= 4096));
    }

    #[test]
    fn test_sizes_are_clamped() {
        let chunker = Chunker::new(1, 1, 1);
        assert_eq!(chunker.min_size, MINIMUM_MIN);
        let chunks = chunker.chunk_data(&[5u8; 3000]);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 3000);
    }

    #[test]
    fn test_empty_input() {
        let chunker = Chunker::from_config(&ChunkingConfig::default());
        assert!(chunker.chunk_data(&[]).is_empty());
    }
}
