use serde::Serialize;

use crate::loader::PageText;

/// A window of rulebook text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub text: String,
    /// 1-based source page; `None` for synthetic content.
    pub page: Option<u32>,
    /// Character (not byte) offset of the chunk's first character in its page.
    pub start_offset: usize,
}

/// Split every page into overlapping windows of at most `chunk_size` characters.
///
/// Output follows page order, then in-page order. Windows never cross a page
/// boundary.
pub fn chunk_pages(pages: &[PageText], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|p| chunk_text(&p.text, p.page, chunk_size, overlap))
        .collect()
}

/// Split one page.
///
/// Each window prefers to end at a paragraph break, then a line break, then a
/// space, provided the window keeps at least half of `chunk_size`. The next
/// window starts `overlap` characters before the previous end, moved forward to
/// the next word start when one lies inside the overlap.
pub fn chunk_text(text: &str, page: Option<u32>, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < n {
        while start < n && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= n {
            break;
        }

        let hard_end = (start + chunk_size).min(n);
        let end = if hard_end < n {
            find_break(&chars, start, hard_end, chunk_size / 2)
        } else {
            hard_end
        };

        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim_end();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                text: trimmed.to_string(),
                page,
                start_offset: start,
            });
        }

        if end >= n {
            break;
        }
        start = next_start(&chars, start, end, overlap);
    }
    chunks
}

fn find_break(chars: &[char], start: usize, hard_end: usize, min_len: usize) -> usize {
    let floor = start + min_len.max(1);
    let separators: [&[char]; 3] = [&['\n', '\n'], &['\n'], &[' ']];
    for sep in separators {
        let mut i = hard_end.saturating_sub(sep.len());
        while i >= floor {
            if &chars[i..i + sep.len()] == sep {
                return i;
            }
            i -= 1;
        }
    }
    hard_end
}

fn next_start(chars: &[char], start: usize, end: usize, overlap: usize) -> usize {
    let mut next = end.saturating_sub(overlap);
    if next <= start {
        return end;
    }
    if !chars[next - 1].is_whitespace()
        && let Some(p) = chars[next..end].iter().position(|c| c.is_whitespace())
    {
        next += p + 1;
    }
    next
}
