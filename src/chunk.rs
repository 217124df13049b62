//! Paragraph-boundary text chunker.
//!
//! Splits documentation text into [`TextChunk`]s no longer than
//! `max_chars` characters. Text that already fits is returned untouched as
//! a single chunk. Longer text is split on blank-line paragraph boundaries
//! and paragraphs are packed greedily. Every chunk after the first is
//! prefixed with the Markdown header of the section it starts in, so it
//! still reads sensibly on its own.
//!
//! A paragraph that does not fit a chunk by itself is split at the last
//! whitespace inside the window. Only a single run of non-whitespace longer
//! than the window is cut mid-word.
//!
//! Lengths are counted in characters, not bytes.

/// One segment of a longer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub index: u32,
    pub total: u32,
}

/// Split text into chunks of at most `max_chars` characters.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(text: &str, max_chars: usize, overlap_headers: bool) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);

    if char_len(text) <= max_chars {
        return vec![TextChunk {
            text: text.to_string(),
            index: 0,
            total: 1,
        }];
    }

    let mut packer = Packer::new(max_chars, overlap_headers);

    for para in split_paragraphs(text) {
        if let Some(header) = heading_of(para) {
            packer.section_header = Some(header.to_string());
        }
        packer.push_paragraph(para);
    }

    let bodies = packer.finish();
    let total = bodies.len() as u32;
    bodies
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextChunk {
            text,
            index: i as u32,
            total,
        })
        .collect()
}

struct Packer {
    max_chars: usize,
    overlap_headers: bool,
    /// Most recent `#` heading line seen so far.
    section_header: Option<String>,
    chunks: Vec<String>,
    buf: String,
    buf_len: usize,
    /// Header prefix for the chunk currently being filled.
    prefix: Option<String>,
}

impl Packer {
    fn new(max_chars: usize, overlap_headers: bool) -> Self {
        Self {
            max_chars,
            overlap_headers,
            section_header: None,
            chunks: Vec::new(),
            buf: String::new(),
            buf_len: 0,
            prefix: None,
        }
    }

    fn budget(&self) -> usize {
        match &self.prefix {
            Some(p) => self.max_chars - char_len(p) - 2,
            None => self.max_chars,
        }
    }

    fn push_paragraph(&mut self, para: &str) {
        let para_len = char_len(para);

        if self.buf_len > 0 && self.buf_len + 2 + para_len > self.budget() {
            self.flush();
        }
        if self.buf_len == 0 {
            self.start_chunk(para);
        }

        if para_len <= self.budget() {
            if self.buf_len > 0 {
                self.buf.push_str("\n\n");
                self.buf_len += 2;
            }
            self.buf.push_str(para);
            self.buf_len += para_len;
            return;
        }

        // Oversized paragraph: emit full windows, keep the tail open.
        let mut remaining = para;
        loop {
            let budget = self.budget();
            if char_len(remaining) <= budget {
                self.buf.push_str(remaining);
                self.buf_len = char_len(remaining);
                break;
            }
            let (head, tail) = split_window(remaining, budget);
            self.buf.push_str(head);
            self.buf_len = char_len(head);
            self.flush();
            remaining = tail;
            if remaining.is_empty() {
                break;
            }
            self.start_chunk(remaining);
        }
    }

    /// Decide the header prefix for a chunk whose body begins with `first`.
    fn start_chunk(&mut self, first: &str) {
        self.prefix = None;
        if !self.overlap_headers || self.chunks.is_empty() || heading_of(first).is_some() {
            return;
        }
        if let Some(header) = &self.section_header {
            // Keep at least half of every chunk for body text.
            if char_len(header) + 2 <= self.max_chars / 2 {
                self.prefix = Some(header.clone());
            }
        }
    }

    fn flush(&mut self) {
        if self.buf_len == 0 {
            return;
        }
        let body = std::mem::take(&mut self.buf);
        let text = match self.prefix.take() {
            Some(p) => format!("{}\n\n{}", p, body),
            None => body,
        };
        self.chunks.push(text);
        self.buf_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Paragraphs separated by one or more blank (whitespace-only) lines,
/// trimmed, empty ones dropped.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push(text[s..end].trim());
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        paragraphs.push(text[s..end].trim());
    }

    paragraphs.retain(|p| !p.is_empty());
    paragraphs
}

/// The first line of a paragraph if it is a Markdown ATX heading.
fn heading_of(para: &str) -> Option<&str> {
    let first = para.lines().next()?.trim_end();
    let hashes = first.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) && first[hashes..].starts_with(' ') {
        Some(first)
    } else {
        None
    }
}

/// Split `s` so the head holds at most `max_chars` characters, preferring
/// the last whitespace inside the window. Both halves are trimmed at the cut.
fn split_window(s: &str, max_chars: usize) -> (&str, &str) {
    let window_end = s
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let window = &s[..window_end];
    let cut = window
        .char_indices()
        .rev()
        .find(|(i, c)| c.is_whitespace() && *i > 0)
        .map(|(i, _)| i);

    match cut {
        Some(i) => (s[..i].trim_end(), s[i..].trim_start()),
        None => (window, s[window_end..].trim_start()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{:03}", i % 1000))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1500, true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("", 1500, true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_1499_chars_is_one_chunk() {
        let text = "x".repeat(1499);
        let chunks = chunk_text(&text, 1500, true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_3000_chars_without_blank_lines() {
        let mut text = words(400);
        text.truncate(3000);
        assert_eq!(text.chars().count(), 3000);

        let chunks = chunk_text(&text, 1500, true);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.text.chars().count() <= 1500, "chunk too long");
            assert_eq!(c.total as usize, chunks.len());
        }
    }

    #[test]
    fn test_never_splits_mid_word() {
        let text = words(500);
        let chunks = chunk_text(&text, 300, false);
        for c in &chunks {
            for w in c.text.split_whitespace() {
                assert_eq!(w.len(), 7, "partial word {:?}", w);
            }
        }
    }

    #[test]
    fn test_single_huge_word_is_hard_split() {
        let text = "y".repeat(3200);
        let chunks = chunk_text(&text, 1500, true);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 1500);
        assert_eq!(chunks[2].text.len(), 200);
    }

    #[test]
    fn test_later_chunks_carry_section_header() {
        let para = words(40); // ~320 chars
        let text = format!(
            "# Deferral\n\n{}\n\n{}\n\n{}\n\n{}",
            para, para, para, para
        );
        let chunks = chunk_text(&text, 700, true);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].text.starts_with("# Deferral"));
        for c in &chunks[1..] {
            assert!(c.text.starts_with("# Deferral\n\n"), "missing header: {:?}", &c.text[..20]);
            assert!(c.text.chars().count() <= 700);
        }
    }

    #[test]
    fn test_no_header_prefix_when_disabled() {
        let para = words(40);
        let text = format!("# Deferral\n\n{}\n\n{}\n\n{}", para, para, para);
        let chunks = chunk_text(&text, 700, false);
        assert!(chunks.len() >= 2);
        assert!(!chunks[1].text.starts_with('#'));
    }

    #[test]
    fn test_header_tracks_current_section() {
        let para = words(40);
        let text = format!(
            "# One\n\n{}\n\n{}\n\n# Two\n\n{}\n\n{}",
            para, para, para, para
        );
        let chunks = chunk_text(&text, 700, true);
        let last = chunks.last().unwrap();
        assert!(last.text.starts_with("# Two"));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..80)
            .map(|i| format!("Paragraph number {} with some padding text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 250, true);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index as usize, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = format!("# A\n\n{}\n\n{}", words(200), words(150));
        let c1 = chunk_text(&text, 500, true);
        let c2 = chunk_text(&text, 500, true);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "äöü ".repeat(1000);
        let chunks = chunk_text(&text, 1500, true);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.text.chars().count() <= 1500);
        }
    }
}
