use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Error, Debug)]
pub enum AudioSourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// Sequential supplier of raw audio chunks. `None` means the source is exhausted.
#[async_trait]
pub trait AudioSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AudioSourceError>;
}

/// Splits any async byte stream into `chunk_size` pieces.
///
/// Every chunk except the last is exactly `chunk_size` bytes, even when the
/// underlying reader returns short reads.
pub struct ChunkedReader<R> {
    reader: R,
    chunk_size: usize,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin + Send> ChunkedReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self, AudioSourceError> {
        if chunk_size == 0 {
            return Err(AudioSourceError::ZeroChunkSize);
        }
        Ok(Self {
            reader,
            chunk_size,
            exhausted: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl ChunkedReader<tokio::fs::File> {
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, AudioSourceError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        log::debug!("Opened audio file {}", path.as_ref().display());
        Self::new(file, chunk_size)
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AudioSource for ChunkedReader<R> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, AudioSourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut chunk = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self.reader.read(&mut chunk[filled..]).await?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect<S: AudioSource>(source: &mut S) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_chunk_sizes() {
        let data: Vec<u8> = (0..2600u32).map(|i| (i % 251) as u8).collect();
        let mut reader = ChunkedReader::new(data.as_slice(), 1024).unwrap();
        let chunks = collect(&mut reader).await;

        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1024, 1024, 552]);
        assert_eq!(chunks.concat(), data);

        // Stays exhausted
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exact_multiple() {
        let data = vec![7u8; 2048];
        let mut reader = ChunkedReader::new(data.as_slice(), 1024).unwrap();
        assert_eq!(collect(&mut reader).await.len(), 2);
    }

    #[tokio::test]
    async fn test_short_reads_are_coalesced() {
        // A duplex pipe delivers the data in small pieces
        let (mut tx, rx) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for _ in 0..10 {
                tx.write_all(&[1u8; 10]).await.unwrap();
            }
        });

        let mut reader = ChunkedReader::new(rx, 40).unwrap();
        let chunks = collect(&mut reader).await;
        writer.await.unwrap();

        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![40, 40, 20]);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut reader = ChunkedReader::new(&b""[..], 1024).unwrap();
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkedReader::new(&[1u8][..], 0),
            Err(AudioSourceError::ZeroChunkSize)
        ));
    }

    #[tokio::test]
    async fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[3u8; 1500]).unwrap();
        file.flush().unwrap();

        let mut reader = ChunkedReader::open(file.path(), 1024).await.unwrap();
        assert_eq!(reader.chunk_size(), 1024);
        let chunks = collect(&mut reader).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 476);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let result = ChunkedReader::open("/definitely/not/here.wav", 1024).await;
        assert!(matches!(result, Err(AudioSourceError::Io(_))));
    }
}
