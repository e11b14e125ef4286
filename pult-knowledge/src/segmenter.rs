//! Paragraph-accumulating text segmenter.
//!
//! Splits extracted text on blank-line paragraph boundaries and accumulates
//! paragraphs up to a target size, reseeding each new chunk with the
//! trailing overlap of the previous one. Every chunk is an exact span of
//! the input, so concatenating chunk texts while trimming the known overlap
//! prefix of every chunk after the first reproduces the input losslessly.

/// One emitted chunk. Offsets are character positions in the input text.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    /// Characters at the head of `text` repeated from the previous segment.
    pub overlap_chars: usize,
}

/// Split `text` into overlapping chunks of roughly `target_size` characters.
///
/// A single paragraph longer than `target_size` becomes its own oversized
/// chunk rather than being split mid-sentence. The final non-empty buffer is
/// always emitted.
pub fn segment_text(text: &str, target_size: usize, overlap: usize) -> Vec<Segment> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let target_size = target_size.max(1);

    let paragraphs = paragraph_ranges(text);
    let mut segments: Vec<Segment> = Vec::new();

    // byte positions into `text`
    let mut chunk_start = 0usize;
    let mut overlap_bytes = 0usize;
    let mut last_para_end = 0usize;
    let mut paras_in_chunk = 0usize;

    for (_, para_end) in paragraphs {
        if paras_in_chunk > 0 {
            let candidate_chars = text[chunk_start..para_end].chars().count();
            if candidate_chars > target_size {
                push_segment(&mut segments, text, chunk_start, last_para_end, overlap_bytes);
                // reseed with the trailing overlap of the emitted chunk
                let reseeded = back_up_chars(text, last_para_end, overlap).max(chunk_start);
                overlap_bytes = last_para_end - reseeded;
                chunk_start = reseeded;
                paras_in_chunk = 0;
            }
        }
        last_para_end = para_end;
        paras_in_chunk += 1;
    }

    if paras_in_chunk > 0 {
        // the last chunk runs to the end of the input so no trailing
        // separator characters are lost
        push_segment(&mut segments, text, chunk_start, text.len(), overlap_bytes);
    }

    segments
}

/// Rejoin segments into the original text by trimming the known overlap
/// prefix of every segment after the first.
pub fn rejoin_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            out.push_str(&segment.text);
        } else {
            let mut chars = segment.text.chars();
            for _ in 0..segment.overlap_chars {
                chars.next();
            }
            out.push_str(chars.as_str());
        }
    }
    out
}

fn push_segment(
    segments: &mut Vec<Segment>,
    text: &str,
    start: usize,
    end: usize,
    overlap_bytes: usize,
) {
    let slice = &text[start..end];
    segments.push(Segment {
        index: segments.len(),
        text: slice.to_string(),
        start_char: text[..start].chars().count(),
        end_char: text[..end].chars().count(),
        overlap_chars: text[start..start + overlap_bytes].chars().count(),
    });
}

/// Byte position `n` characters before `pos`, clamped to the start.
fn back_up_chars(text: &str, pos: usize, n: usize) -> usize {
    let mut idx = pos;
    for _ in 0..n {
        match text[..idx].chars().next_back() {
            Some(c) => idx -= c.len_utf8(),
            None => break,
        }
    }
    idx
}

/// Byte ranges of paragraphs: maximal runs of non-blank lines. A range
/// covers the first line's start through the last line's content (without
/// its trailing newline); separators between paragraphs stay between the
/// ranges and are absorbed by the chunk spans.
fn paragraph_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(range) = current.take() {
                ranges.push(range);
            }
        } else {
            let content_end = offset + line.trim_end_matches(['\r', '\n']).len();
            match &mut current {
                Some((_, end)) => *end = content_end,
                None => current = Some((offset, content_end)),
            }
        }
        offset += line.len();
    }
    if let Some(range) = current {
        ranges.push(range);
    }

    ranges
}
