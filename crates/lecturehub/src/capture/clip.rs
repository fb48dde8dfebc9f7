/// Clip assembly for one capture window
use crate::config::CaptureConfig;
use bytes::{Bytes, BytesMut};

/// Fixed fields sent alongside every clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipMetadata {
    pub gender: String,
    pub stream: String,
    pub inference_interval: String,
}

impl From<&CaptureConfig> for ClipMetadata {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            gender: config.gender.clone(),
            stream: config.stream.clone(),
            inference_interval: config.inference_interval.clone(),
        }
    }
}

/// Media recorded during one capture window, ready for upload.
#[derive(Debug, Clone)]
pub struct VideoClip {
    pub cycle: u64,
    pub data: Bytes,
    pub chunk_count: usize,
    pub mime_type: String,
    pub file_name: String,
    pub metadata: ClipMetadata,
}

/// Accumulates chunks until the window closes.
#[derive(Debug, Default)]
pub struct ClipBuilder {
    buf: BytesMut,
    chunks: usize,
}

impl ClipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.buf.extend_from_slice(chunk);
        self.chunks += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn finish(self, cycle: u64, mime_type: &str, metadata: ClipMetadata) -> VideoClip {
        VideoClip {
            cycle,
            data: self.buf.freeze(),
            chunk_count: self.chunks,
            mime_type: mime_type.to_string(),
            file_name: format!("clip.{}", extension_for_mime(mime_type)),
            metadata,
        }
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence {
        "video/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        "video/webm" => "webm",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_concatenates_chunks() {
        let mut builder = ClipBuilder::new();
        builder.push(b"abc");
        builder.push(b"");
        builder.push(b"de");
        assert_eq!(builder.len(), 5);

        let metadata = ClipMetadata::from(&CaptureConfig::default());
        let clip = builder.finish(3, "video/webm;codecs=vp8", metadata);
        assert_eq!(&clip.data[..], b"abcde");
        assert_eq!(clip.chunk_count, 2);
        assert_eq!(clip.cycle, 3);
        assert_eq!(clip.file_name, "clip.webm");
        assert_eq!(clip.metadata.gender, "male");
    }
}
