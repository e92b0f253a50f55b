//! Minimal tag scanner for the pages a book build produces.
//!
//! Documents are never re-serialized: edits are byte-range splices over the
//! original text, so an unchanged page always yields an identical body.

use std::ops::Range;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    /// Absolute byte range of the value including any quotes.
    pub value_range: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub closing: bool,
    pub self_closing: bool,
    pub attrs: Vec<Attribute>,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|value| value.split_whitespace().any(|item| item == class))
    }

    pub fn is_void(&self) -> bool {
        self.self_closing || VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Every start and end tag in document order. Comments, doctypes and the
/// contents of `script`/`style` are skipped.
pub fn scan_tags(html: &str) -> Vec<Tag> {
    let bytes = html.as_bytes();
    let mut output = Vec::new();
    let mut index = 0usize;

    while index < html.len() {
        let Some(lt) = html[index..].find('<') else {
            break;
        };
        let at = index + lt;
        if starts_with_at(html, at, "<!--") {
            index = index_of(html, "-->", at + 4).map_or(html.len(), |end| end + 3);
            continue;
        }
        if starts_with_at(html, at, "<!") || starts_with_at(html, at, "<?") {
            index = find_tag_end(html, at).map_or(html.len(), |end| end + 1);
            continue;
        }

        let closing = bytes.get(at + 1).copied() == Some(b'/');
        let name_start = if closing { at + 2 } else { at + 1 };
        let name_end = scan_name(bytes, name_start);
        if name_end == name_start || !bytes[name_start].is_ascii_alphabetic() {
            index = at + 1;
            continue;
        }
        let Some(end) = find_tag_end(html, at) else {
            break;
        };
        let name = html[name_start..name_end].to_ascii_lowercase();
        let self_closing = !closing && end > at && bytes[end - 1] == b'/';
        let attrs = if closing {
            Vec::new()
        } else {
            parse_attributes(html, name_end, end)
        };
        let raw_text = !closing && RAW_TEXT_ELEMENTS.contains(&name.as_str());
        output.push(Tag {
            name: name.clone(),
            start: at,
            end: end + 1,
            closing,
            self_closing,
            attrs,
        });
        index = end + 1;

        if raw_text && !self_closing {
            let close = format!("</{name}");
            index = index_of_ignore_case(html, &close, index).unwrap_or(html.len());
        }
    }

    output
}

/// Outer byte range of the element opened by `tags[open]`.
pub fn element_range(tags: &[Tag], open: usize) -> Option<Range<usize>> {
    let opening = tags.get(open)?;
    if opening.closing {
        return None;
    }
    if opening.is_void() {
        return Some(opening.start..opening.end);
    }
    let mut depth = 0usize;
    for tag in &tags[open + 1..] {
        if tag.name != opening.name || tag.self_closing {
            continue;
        }
        if !tag.closing {
            depth += 1;
        } else if depth == 0 {
            return Some(opening.start..tag.end);
        } else {
            depth -= 1;
        }
    }
    None
}

pub fn find_by_id(tags: &[Tag], id: &str) -> Option<Range<usize>> {
    let open = tags
        .iter()
        .position(|tag| !tag.closing && tag.attr("id") == Some(id))?;
    element_range(tags, open)
}

/// Outermost elements carrying `class` inside `within`.
pub fn find_by_class(tags: &[Tag], class: &str, within: &Range<usize>) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (position, tag) in tags.iter().enumerate() {
        if tag.closing || tag.start < within.start || tag.end > within.end {
            continue;
        }
        if ranges.last().is_some_and(|last| tag.start < last.end) {
            continue;
        }
        if !tag.has_class(class) {
            continue;
        }
        if let Some(range) = element_range(tags, position)
            && range.end <= within.end
        {
            ranges.push(range);
        }
    }
    ranges
}

/// Start tags named `name` whose whole tag lies inside `within`.
pub fn tags_within<'a>(tags: &'a [Tag], name: &'a str, within: &'a Range<usize>) -> impl Iterator<Item = &'a Tag> + 'a {
    tags.iter().filter(move |tag| {
        !tag.closing && tag.name == name && tag.start >= within.start && tag.end <= within.end
    })
}

pub fn extract_title(html: &str, tags: &[Tag]) -> Option<String> {
    let open = tags
        .iter()
        .position(|tag| !tag.closing && tag.name == "title")?;
    let close = tags[open + 1..]
        .iter()
        .find(|tag| tag.closing && tag.name == "title")?;
    let decoded = decode_html(&html[tags[open].end..close.start]);
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// `content` of the first `<meta name=...>` matching `name` (case-insensitive).
pub fn meta_content(tags: &[Tag], name: &str) -> Option<String> {
    tags.iter()
        .filter(|tag| !tag.closing && tag.name == "meta")
        .find(|tag| {
            tag.attr("name")
                .or_else(|| tag.attr("property"))
                .is_some_and(|value| value.eq_ignore_ascii_case(name))
        })
        .and_then(|tag| tag.attr("content"))
        .map(|content| content.trim().to_string())
}

/// Replace the value of attribute `name` on `tag`; `None` when absent or valueless.
pub fn replace_attribute(tag: &Tag, name: &str, value: &str) -> Option<Splice> {
    let attr = tag.attrs.iter().find(|attr| attr.name == name)?;
    let range = attr.value_range.clone()?;
    Some(Splice {
        range,
        replacement: format!("\"{}\"", encode_attribute(value)),
    })
}

/// Apply non-overlapping splices to `html`.
pub fn apply_splices(html: &str, mut splices: Vec<Splice>) -> String {
    splices.sort_by_key(|splice| splice.range.start);
    let mut output = String::with_capacity(html.len());
    let mut cursor = 0usize;
    for splice in splices {
        if splice.range.start < cursor {
            continue;
        }
        output.push_str(&html[cursor..splice.range.start]);
        output.push_str(&splice.replacement);
        cursor = splice.range.end;
    }
    output.push_str(&html[cursor..]);
    output
}

/// The text of `within` with every range in `cuts` removed.
pub fn slice_without(html: &str, within: &Range<usize>, cuts: &[Range<usize>]) -> String {
    let mut output = String::with_capacity(within.len());
    let mut cursor = within.start;
    for cut in cuts {
        if cut.start < cursor || cut.end > within.end {
            continue;
        }
        output.push_str(&html[cursor..cut.start]);
        cursor = cut.end;
    }
    output.push_str(&html[cursor..within.end]);
    output
}

const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("ldquo", '\u{201c}'),
    ("rdquo", '\u{201d}'),
    ("ndash", '\u{2013}'),
    ("mdash", '\u{2014}'),
    ("hellip", '\u{2026}'),
    ("laquo", '\u{ab}'),
    ("raquo", '\u{bb}'),
    ("copy", '\u{a9}'),
    ("reg", '\u{ae}'),
    ("trade", '\u{2122}'),
    ("deg", '\u{b0}'),
    ("times", '\u{d7}'),
    ("middot", '\u{b7}'),
    ("para", '\u{b6}'),
    ("sect", '\u{a7}'),
    ("bull", '\u{2022}'),
    ("rarr", '\u{2192}'),
    ("larr", '\u{2190}'),
];

/// Decode character references in one pass. Unknown or malformed references
/// are kept verbatim.
pub fn decode_html(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        output.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .char_indices()
            .take(32)
            .find(|(_, ch)| *ch == ';')
            .and_then(|(semi, _)| decode_reference(&after[..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                output.push(ch);
                rest = &after[semi + 1..];
            }
            None => {
                output.push('&');
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

fn decode_reference(reference: &str) -> Option<char> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).filter(|ch| *ch != '\0');
    }
    NAMED_ENTITIES
        .iter()
        .find(|(name, _)| *name == reference)
        .map(|(_, ch)| *ch)
}

pub fn encode_attribute(text: &str) -> String {
    text.replace('&', "&amp;").replace('"', "&quot;")
}

fn scan_name(bytes: &[u8], start: usize) -> usize {
    let mut index = start;
    while index < bytes.len()
        && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'-' || bytes[index] == b':')
    {
        index += 1;
    }
    index
}

fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut index = start;
    let mut quote = None::<u8>;
    while index < bytes.len() {
        let byte = bytes[index];
        if let Some(active) = quote {
            if byte == active {
                quote = None;
            }
            index += 1;
            continue;
        }
        if (byte == b'"' || byte == b'\'') && index > start && bytes[index - 1] == b'=' {
            quote = Some(byte);
            index += 1;
            continue;
        }
        if byte == b'"' || byte == b'\'' {
            let previous = html[start..index].trim_end();
            if previous.ends_with('=') {
                quote = Some(byte);
                index += 1;
                continue;
            }
        }
        if byte == b'>' {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn parse_attributes(html: &str, from: usize, tag_end: usize) -> Vec<Attribute> {
    let bytes = html.as_bytes();
    let mut attrs = Vec::new();
    let mut index = from;

    while index < tag_end {
        let byte = bytes[index];
        if byte == b'/' || byte.is_ascii_whitespace() {
            index += 1;
            continue;
        }

        let name_start = index;
        while index < tag_end {
            let ch = bytes[index];
            if ch.is_ascii_whitespace() || ch == b'=' || ch == b'/' {
                break;
            }
            index += 1;
        }
        if name_start == index {
            index += 1;
            continue;
        }
        let name = html[name_start..index].to_ascii_lowercase();
        while index < tag_end && bytes[index].is_ascii_whitespace() {
            index += 1;
        }

        let mut value = String::new();
        let mut value_range = None;
        if index < tag_end && bytes[index] == b'=' {
            index += 1;
            while index < tag_end && bytes[index].is_ascii_whitespace() {
                index += 1;
            }
            if index < tag_end && (bytes[index] == b'"' || bytes[index] == b'\'') {
                let quote = bytes[index];
                let range_start = index;
                index += 1;
                let value_start = index;
                while index < tag_end && bytes[index] != quote {
                    index += 1;
                }
                value = html[value_start..index].to_string();
                if index < tag_end {
                    index += 1;
                }
                value_range = Some(range_start..index);
            } else {
                let value_start = index;
                while index < tag_end && !bytes[index].is_ascii_whitespace() {
                    index += 1;
                }
                let mut value_end = index;
                if value_end > value_start && value_end == tag_end && bytes[value_end - 1] == b'/' {
                    value_end -= 1;
                }
                value = html[value_start..value_end].to_string();
                value_range = Some(value_start..value_end);
            }
        }

        attrs.push(Attribute {
            name,
            value: decode_html(&value),
            value_range,
        });
    }

    attrs
}

fn index_of(text: &str, search: &str, start: usize) -> Option<usize> {
    text.get(start..)?.find(search).map(|offset| start + offset)
}

fn index_of_ignore_case(text: &str, search: &str, start: usize) -> Option<usize> {
    let text_bytes = text.as_bytes();
    let search_bytes = search.as_bytes();
    if search_bytes.len() > text_bytes.len() || start >= text_bytes.len() {
        return None;
    }
    let last_start = text_bytes.len().saturating_sub(search_bytes.len());
    (start..=last_start).find(|&index| {
        text_bytes[index..index + search_bytes.len()].eq_ignore_ascii_case(search_bytes)
    })
}

fn starts_with_at(text: &str, index: usize, sequence: &str) -> bool {
    text.as_bytes()
        .get(index..index + sequence.len())
        .is_some_and(|slice| slice == sequence.as_bytes())
}
