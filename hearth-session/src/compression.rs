//! Pooled zlib compression for session payloads.

use crate::error::{SessionError, SessionResult};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use parking_lot::Mutex;

/// Payloads strictly larger than this are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 512;

/// Upper bound on decompressed output.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 64 * 1024;

/// Idle instances kept per direction.
const DEFAULT_POOL_CAPACITY: usize = 32;

const CHUNK: usize = 4096;

/// A concurrency-safe pool of zlib compressors and decompressors.
///
/// Instances are reset and returned to the pool after every use instead of
/// being reallocated per request.
pub struct CompressorPool {
    level: Compression,
    max_output: usize,
    capacity: usize,
    compressors: Mutex<Vec<Compress>>,
    decompressors: Mutex<Vec<Decompress>>,
}

impl Default for CompressorPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECOMPRESSED_SIZE)
    }
}

impl CompressorPool {
    /// Create a pool whose decompressor refuses to produce more than
    /// `max_output` bytes.
    pub fn new(max_output: usize) -> Self {
        Self {
            level: Compression::default(),
            max_output,
            capacity: DEFAULT_POOL_CAPACITY,
            compressors: Mutex::new(Vec::new()),
            decompressors: Mutex::new(Vec::new()),
        }
    }

    /// Set the zlib compression level.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    /// Maximum decompressed size.
    pub fn max_output(&self) -> usize {
        self.max_output
    }

    /// Compress `input` into a zlib stream.
    pub fn compress(&self, input: &[u8]) -> SessionResult<Vec<u8>> {
        let mut compressor = self
            .compressors
            .lock()
            .pop()
            .unwrap_or_else(|| Compress::new(self.level, true));

        let result = deflate(&mut compressor, input);

        compressor.reset();
        let mut idle = self.compressors.lock();
        if idle.len() < self.capacity {
            idle.push(compressor);
        }

        result
    }

    /// Decompress a zlib stream, failing if the output would exceed the
    /// configured bound.
    pub fn decompress(&self, input: &[u8]) -> SessionResult<Vec<u8>> {
        let mut decompressor = self
            .decompressors
            .lock()
            .pop()
            .unwrap_or_else(|| Decompress::new(true));

        let result = inflate(&mut decompressor, input, self.max_output);

        decompressor.reset(true);
        let mut idle = self.decompressors.lock();
        if idle.len() < self.capacity {
            idle.push(decompressor);
        }

        result
    }

    #[cfg(test)]
    fn idle_counts(&self) -> (usize, usize) {
        (self.compressors.lock().len(), self.decompressors.lock().len())
    }
}

fn deflate(compressor: &mut Compress, input: &[u8]) -> SessionResult<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    loop {
        if out.capacity() - out.len() < 64 {
            out.reserve(CHUNK);
        }
        let consumed = compressor.total_in() as usize;
        let status = compressor
            .compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)
            .map_err(|e| SessionError::Compression(e.to_string()))?;
        if status == Status::StreamEnd {
            return Ok(out);
        }
    }
}

fn inflate(decompressor: &mut Decompress, input: &[u8], limit: usize) -> SessionResult<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len().saturating_mul(2).clamp(64, limit.max(64)));
    loop {
        if out.capacity() - out.len() < 64 {
            out.reserve(CHUNK);
        }
        let consumed = decompressor.total_in() as usize;
        let produced = decompressor.total_out();
        let status = decompressor
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| SessionError::Compression(e.to_string()))?;

        if out.len() > limit {
            return Err(SessionError::Compression(format!(
                "decompressed size exceeds {} bytes",
                limit
            )));
        }
        if status == Status::StreamEnd {
            return Ok(out);
        }
        // No forward progress with room to spare: the stream is truncated.
        if decompressor.total_in() as usize == consumed
            && decompressor.total_out() == produced
            && out.capacity() > out.len()
        {
            return Err(SessionError::Compression("truncated zlib stream".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let pool = CompressorPool::default();
        let input = b"session data ".repeat(200);
        let compressed = pool.compress(&input).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(pool.decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn test_empty_input() {
        let pool = CompressorPool::default();
        let compressed = pool.compress(b"").unwrap();
        assert_eq!(pool.decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_instances_are_reused() {
        let pool = CompressorPool::default();
        for i in 0..10 {
            let input = format!("payload number {}", i).repeat(50);
            let compressed = pool.compress(input.as_bytes()).unwrap();
            assert_eq!(pool.decompress(&compressed).unwrap(), input.as_bytes());
        }
        assert_eq!(pool.idle_counts(), (1, 1));
    }

    #[test]
    fn test_decompression_bound() {
        let pool = CompressorPool::new(1024);
        let bomb = pool.compress(&vec![0u8; 100_000]).unwrap();
        assert!(matches!(
            pool.decompress(&bomb),
            Err(SessionError::Compression(_))
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let pool = CompressorPool::default();
        let compressed = pool.compress(&b"abcdefgh".repeat(100)).unwrap();
        assert!(pool.decompress(&compressed[..compressed.len() / 2]).is_err());
    }

    #[test]
    fn test_garbage_input() {
        let pool = CompressorPool::default();
        assert!(pool.decompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_concurrent_use() {
        let pool = std::sync::Arc::new(CompressorPool::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let input = vec![i as u8; 2048];
                    let compressed = pool.compress(&input).unwrap();
                    assert_eq!(pool.decompress(&compressed).unwrap(), input);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
