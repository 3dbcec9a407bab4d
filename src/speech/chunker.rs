//! Long-utterance chunking for speech output
//!
//! Speech engines choke on very long inputs, so replies above a character
//! budget are split into ordered chunks. Splits prefer sentence boundaries,
//! then whitespace; a hard cut happens only inside a boundary-free run.

/// Split `text` into chunks of at most `max_chars` characters each.
///
/// Always returns at least one chunk for non-blank input. Chunks are
/// trimmed; original sentence punctuation is preserved.
pub fn chunk_utterance(text: &str, max_chars: usize) -> Vec<String> {
    let mut rest = text.trim();
    if rest.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    loop {
        let window_end = match rest.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                // Remainder fits in one chunk.
                chunks.push(rest.to_string());
                return chunks;
            }
        };
        let window = &rest[..window_end];

        let (cut, skip) = match sentence_break(window) {
            Some(idx) => (idx, 0),
            None => match window.rfind(char::is_whitespace) {
                Some(idx) => {
                    let ws_len = window[idx..].chars().next().map_or(0, char::len_utf8);
                    (idx, ws_len)
                }
                None => (window_end, 0),
            },
        };

        let chunk = rest[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[cut + skip..].trim_start();
        if rest.is_empty() {
            return chunks;
        }
    }
}

/// Byte index just past the last sentence-ending punctuation in `window`
/// that is followed by whitespace. Punctuation at the very end of the
/// window is not trusted as a boundary: the sentence may continue past it
/// (abbreviations, decimals), and whitespace confirms it does not.
fn sentence_break(window: &str) -> Option<usize> {
    let mut best = None;
    let mut prev: Option<(usize, char)> = None;
    for (idx, ch) in window.char_indices() {
        if let Some((p_idx, p_ch)) = prev {
            if matches!(p_ch, '.' | '!' | '?') && ch.is_whitespace() {
                best = Some(p_idx + p_ch.len_utf8());
            }
        }
        prev = Some((idx, ch));
    }
    best
}
