
use tracing::debug;

/// Default maximum chunk length in characters
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Split text into consecutive, non-overlapping slices of at most `size` characters.
///
/// Slicing counts Unicode scalar values, so multi-byte text is never cut inside a
/// character. Only the last slice may be shorter than `size`. A `size` of zero is
/// treated as one.
#[inline]
pub fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0;

    let boundaries = text
        .char_indices()
        .map(|(offset, _)| offset)
        .skip(size)
        .step_by(size)
        .chain(std::iter::once(text.len()));

    for end in boundaries {
        if let Some(chunk) = text.get(start..end).filter(|c| !c.is_empty()) {
            chunks.push(chunk);
        }
        start = end;
    }

    debug!(
        "Chunked {} bytes into {} chunks of at most {} characters",
        text.len(),
        chunks.len(),
        size
    );

    chunks
}

/// Stable identifier of the `index`-th chunk of `source`
#[inline]
pub fn chunk_id(source: &str, index: usize) -> String {
    format!("{source}_part_{index}")
}
