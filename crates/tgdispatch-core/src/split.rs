//! Length-limited message splitting.
//!
//! Long replies are built from logical segments (one per summarized topic,
//! for example). [`split_into_groups`] packs them greedily into groups whose
//! rendered form fits in one platform message, keeping the original order.
//!
//! Lengths are counted in Unicode scalar values, after markup normalization.

use tracing::trace;

/// Separator placed between segments of the same group.
pub const SEPARATOR: &str = "\n\n";

const SEPARATOR_LEN: usize = 2;

/// A group of segments rendered as one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGroup {
    segments: Vec<String>,
}

impl MessageGroup {
    /// Returns the segments of this group.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Renders the group as message text.
    pub fn render(&self) -> String {
        self.segments.join(SEPARATOR)
    }

    /// Returns the rendered length in characters.
    pub fn char_len(&self) -> usize {
        let content: usize = self.segments.iter().map(|s| char_len(s)).sum();
        content + SEPARATOR_LEN * self.segments.len().saturating_sub(1)
    }
}

/// Converts lightweight markdown into the platform's HTML emphasis.
///
/// - `# Title` .. `###### Title` lines become `<b>Title</b>`
/// - `**text**` becomes `<b>text</b>`
pub fn normalize_markup(text: &str) -> String {
    text.split('\n')
        .map(|line| replace_delimited(&convert_heading(line), "**", "<b>", "</b>"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Packs `segments` into groups of at most `limit` rendered characters.
///
/// Segments that are empty after normalization are dropped. A segment longer
/// than `limit` on its own is cut into pieces (see [`cut_oversized`]); the
/// last piece may share its group with following segments.
pub fn split_into_groups<S: AsRef<str>>(segments: &[S], limit: usize) -> Vec<MessageGroup> {
    let limit = limit.max(1);
    let mut groups = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for segment in segments {
        let normalized = normalize_markup(segment.as_ref());
        if normalized.trim().is_empty() {
            continue;
        }

        let len = char_len(&normalized);
        if len > limit {
            flush(&mut groups, &mut current, &mut current_len);

            let mut pieces = cut_oversized(&normalized, limit);
            trace!(len, limit, pieces = pieces.len(), "Cut oversized segment");
            let last = pieces.pop();
            groups.extend(pieces.into_iter().map(|p| MessageGroup { segments: vec![p] }));
            if let Some(last) = last {
                current_len = char_len(&last);
                current.push(last);
            }
            continue;
        }

        let needed = if current.is_empty() {
            len
        } else {
            current_len + SEPARATOR_LEN + len
        };

        if needed > limit {
            flush(&mut groups, &mut current, &mut current_len);
            current_len = len;
        } else {
            current_len = needed;
        }
        current.push(normalized);
    }

    flush(&mut groups, &mut current, &mut current_len);
    groups
}

fn flush(groups: &mut Vec<MessageGroup>, current: &mut Vec<String>, current_len: &mut usize) {
    if !current.is_empty() {
        groups.push(MessageGroup {
            segments: std::mem::take(current),
        });
    }
    *current_len = 0;
}

/// Cuts a single segment into pieces of at most `limit` characters.
///
/// Cut preference, per piece:
/// 1. after the last newline within budget that is outside any styling element;
/// 2. the last character boundary outside any tag and styling element;
/// 3. inside a styling element right after a content character, closing it at
///    the cut and reopening it in the next piece;
/// 4. a hard cut at `limit`, moved back before a tag that straddles it.
///
/// A cut never lands inside the characters of a tag unless a single tag is
/// itself longer than `limit`. Every piece consumes input, so the loop ends
/// for any `limit`. When an element's tags leave no room for content the
/// hard cut applies and the pieces are not balanced.
pub fn cut_oversized(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut rest = text.to_string();

    while char_len(&rest) > limit {
        let cut = find_cut(&rest, limit);
        let mut piece = rest[..cut.at].to_string();
        piece.push_str(&cut.closing);
        pieces.push(piece);

        let mut next = cut.reopening;
        next.push_str(&rest[cut.at..]);
        rest = next;
    }

    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Where to cut, and the tags to close and reopen around the cut.
struct Cut {
    at: usize,
    closing: String,
    reopening: String,
}

impl Cut {
    fn plain(at: usize) -> Self {
        Self {
            at,
            closing: String::new(),
            reopening: String::new(),
        }
    }
}

/// An open styling element: its name and the literal opening tag.
#[derive(Clone)]
struct OpenTag {
    name: String,
    literal: String,
}

fn find_cut(text: &str, budget: usize) -> Cut {
    let mut stack: Vec<OpenTag> = Vec::new();
    let mut tag_buf = String::new();
    let mut in_tag = false;
    let mut tag_start = 0usize;
    let mut count = 0usize;

    let mut line_cut = None;
    let mut plain_cut = None;
    let mut styled_cut: Option<(usize, Vec<OpenTag>)> = None;
    let mut hard_cut = None;

    for (idx, ch) in text.char_indices() {
        if count >= budget {
            break;
        }
        let boundary = idx + ch.len_utf8();

        let tag_char = if in_tag {
            tag_buf.push(ch);
            if ch == '>' {
                in_tag = false;
                apply_tag(&tag_buf, &mut stack);
                tag_buf.clear();
            }
            true
        } else if ch == '<' && starts_tag(&text[boundary..]) {
            in_tag = true;
            tag_start = idx;
            tag_buf.push(ch);
            true
        } else {
            false
        };
        count += 1;

        if in_tag {
            continue;
        }
        hard_cut = Some(boundary);

        if stack.is_empty() {
            if ch == '\n' {
                line_cut = Some(boundary);
            }
            plain_cut = Some(boundary);
        } else if !tag_char {
            // Only after content, so the piece holds more than the reopened tags.
            let closing_len: usize = stack.iter().map(|t| t.name.len() + 3).sum();
            if count + closing_len <= budget {
                styled_cut = Some((boundary, stack.clone()));
            }
        }
    }

    if let Some(at) = line_cut.or(plain_cut) {
        return Cut::plain(at);
    }

    if let Some((at, open)) = styled_cut {
        let closing = open
            .iter()
            .rev()
            .map(|t| format!("</{}>", t.name))
            .collect::<String>();
        let reopening = open.iter().map(|t| t.literal.as_str()).collect::<String>();
        return Cut {
            at,
            closing,
            reopening,
        };
    }

    // Degenerate budget: keep whole tags together when possible.
    let at = match (in_tag, hard_cut) {
        (true, _) if tag_start > 0 => tag_start,
        (_, Some(at)) => at,
        _ => byte_offset(text, budget),
    };
    Cut::plain(at)
}

fn starts_tag(after: &str) -> bool {
    after
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '/')
}

fn apply_tag(tag: &str, stack: &mut Vec<OpenTag>) {
    let inner = tag.trim_start_matches('<').trim_end_matches('>');
    if inner.ends_with('/') {
        return;
    }

    if let Some(name) = inner.strip_prefix('/') {
        let name = tag_name(name);
        if let Some(pos) = stack.iter().rposition(|t| t.name == name) {
            stack.truncate(pos);
        }
        return;
    }

    stack.push(OpenTag {
        name: tag_name(inner).to_string(),
        literal: tag.to_string(),
    });
}

fn tag_name(inner: &str) -> &str {
    inner
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn convert_heading(line: &str) -> String {
    let level = line.bytes().take_while(|&b| b == b'#').count();
    if level == 0 || level > 6 {
        return line.to_string();
    }
    match line[level..].strip_prefix(' ') {
        Some(title) if !title.trim().is_empty() => format!("<b>{}</b>", title.trim()),
        _ => line.to_string(),
    }
}

fn replace_delimited(text: &str, delim: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    while let Some(rel) = text[i..].find(delim) {
        let start = i + rel;
        out.push_str(&text[i..start]);
        let content_start = start + delim.len();
        match text[content_start..].find(delim) {
            Some(end_rel) if end_rel > 0 => {
                let end = content_start + end_rel;
                out.push_str(open);
                out.push_str(&text[content_start..end]);
                out.push_str(close);
                i = end + delim.len();
            }
            _ => {
                out.push_str(&text[start..]);
                return out;
            }
        }
    }
    out.push_str(&text[i..]);
    out
}
