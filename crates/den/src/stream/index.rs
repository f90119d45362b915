//! Index file codec.
//!
//! The index is line oriented markup: a prolog, a `<stream>` element with
//! the format version, one `<info>` element, an optional `<meta>` element,
//! one `<chunk>` element per chunk and the closing `</stream>`. Lines are
//! rendered one at a time so the writer can append chunks while recording;
//! the parser accepts an index without the closing tag as in-progress.

use super::{Chunk, Metadata, SampleType, StreamDescriptor, Version};
use crate::error::{Result, StreamError};
use crate::file::Encoding;
use std::fmt::Write as _;
use tracing::debug;

pub(crate) const PROLOG: &str = "<?xml version=\"1.0\" ?>";
pub(crate) const CLOSE: &str = "</stream>";

const SKELETON_NAME: &str = "skeleton";
const FACE_NAME: &str = "face";

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let end = rest[start..]
            .find(';')
            .map(|i| start + i)
            .ok_or_else(|| StreamError::Format(format!("unterminated entity in '{value}'")))?;
        let entity = &rest[start + 1..end];
        let c = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    entity.strip_prefix('#').and_then(|d| d.parse().ok())
                };
                code.and_then(char::from_u32).ok_or_else(|| {
                    StreamError::Format(format!("unknown entity '&{entity};'"))
                })?
            }
        };
        out.push(c);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn element(name: &str, attrs: &[(&str, String)]) -> String {
    let mut line = format!("\t<{name}");
    for (key, value) in attrs {
        let _ = write!(line, " {key}=\"{}\"", escape(value));
    }
    line.push_str("/>");
    line
}

pub(crate) fn stream_line(version: Version) -> String {
    format!("<stream ssi-v=\"{}\">", version.number())
}

pub(crate) fn info_line(encoding: Encoding, desc: &StreamDescriptor, delim: &str) -> String {
    element(
        "info",
        &[
            ("ftype", encoding.name().to_string()),
            ("sr", desc.sample_rate.to_string()),
            ("dim", desc.dim.to_string()),
            ("byte", desc.byte.to_string()),
            ("type", desc.sample_type.name().to_string()),
            ("delim", delim.to_string()),
        ],
    )
}

pub(crate) fn meta_line(meta: &Metadata) -> String {
    match meta {
        Metadata::Image {
            width,
            height,
            depth,
            channels,
            flip,
        } => element(
            "meta",
            &[
                ("width", width.to_string()),
                ("height", height.to_string()),
                ("depth", depth.to_string()),
                ("channels", channels.to_string()),
                ("flip", u8::from(*flip).to_string()),
            ],
        ),
        Metadata::Skeleton { count, layout } => element(
            "meta",
            &[
                ("name", SKELETON_NAME.to_string()),
                ("num", count.to_string()),
                ("type", layout.clone()),
            ],
        ),
        Metadata::Face { count, layout } => element(
            "meta",
            &[
                ("name", FACE_NAME.to_string()),
                ("num", count.to_string()),
                ("type", layout.clone()),
            ],
        ),
        Metadata::Custom(pairs) => {
            let attrs: Vec<(&str, String)> =
                pairs.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            element("meta", &attrs)
        }
    }
}

pub(crate) fn chunk_line(chunk: &Chunk) -> String {
    element(
        "chunk",
        &[
            ("from", chunk.from.to_string()),
            ("to", chunk.to.to_string()),
            ("byte", chunk.byte.to_string()),
            ("num", chunk.num.to_string()),
        ],
    )
}

/// Contents of a parsed index file.
#[derive(Debug, Clone)]
pub(crate) struct IndexHeader {
    pub version: Version,
    pub encoding: Encoding,
    pub descriptor: StreamDescriptor,
    pub delim: Option<String>,
    pub meta: Option<Metadata>,
    pub chunks: Vec<Chunk>,
    /// True if the closing `</stream>` tag was present.
    pub complete: bool,
}

/// One markup tag.
#[derive(Debug)]
enum Tag<'a> {
    Open {
        name: &'a str,
        attrs: Vec<(&'a str, String)>,
    },
    Close(&'a str),
}

struct Tags<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tags<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Returns the next tag; `None` at the end of the text or at a tag cut
    /// off by an in-progress write.
    fn next_tag(&mut self) -> Result<Option<Tag<'a>>> {
        let text = self.text;
        loop {
            let Some(start) = text[self.pos..].find('<').map(|i| self.pos + i) else {
                return Ok(None);
            };
            let Some(end) = find_tag_end(text, start) else {
                return Ok(None);
            };
            self.pos = end + 1;
            let body = &text[start + 1..end];
            if body.starts_with('?') || body.starts_with('!') {
                continue;
            }
            if let Some(name) = body.strip_prefix('/') {
                return Ok(Some(Tag::Close(name.trim())));
            }
            return parse_open(body).map(Some);
        }
    }
}

fn find_tag_end(text: &str, start: usize) -> Option<usize> {
    let mut quote = None;
    for (i, c) in text[start..].char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '>') => return Some(start + i),
            _ => {}
        }
    }
    None
}

fn parse_open(body: &str) -> Result<Tag<'_>> {
    let body = body.trim_end().strip_suffix('/').unwrap_or(body).trim();
    let name_end = body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(body.len());
    let name = &body[..name_end];
    let mut rest = body[name_end..].trim_start();
    let mut attrs = Vec::new();

    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| StreamError::Format(format!("malformed attribute in <{name}>")))?;
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| StreamError::Format(format!("unquoted attribute '{key}' in <{name}>")))?;
        let close = after[1..]
            .find(quote)
            .ok_or_else(|| StreamError::Format(format!("unterminated attribute '{key}'")))?;
        attrs.push((key, unescape(&after[1..1 + close])?));
        rest = after[close + 2..].trim_start();
    }
    Ok(Tag::Open { name, attrs })
}

struct Attrs<'a> {
    element: &'a str,
    attrs: Vec<(&'a str, String)>,
}

impl<'a> Attrs<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            StreamError::Format(format!("<{}> is missing '{key}'", self.element))
        })
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<T> {
        let value = self.required(key)?;
        value.trim().parse().map_err(|_| {
            StreamError::Format(format!(
                "<{}> has invalid '{key}' value '{value}'",
                self.element
            ))
        })
    }
}

fn parse_meta(attrs: &Attrs<'_>) -> Result<Metadata> {
    if attrs.get("width").is_some() && attrs.get("height").is_some() {
        return Ok(Metadata::Image {
            width: attrs.parse("width")?,
            height: attrs.parse("height")?,
            depth: attrs.parse("depth")?,
            channels: attrs.parse("channels")?,
            flip: attrs.parse::<u8>("flip")? != 0,
        });
    }
    match attrs.get("name") {
        Some(SKELETON_NAME) => Ok(Metadata::Skeleton {
            count: attrs.parse("num")?,
            layout: attrs.required("type")?.to_string(),
        }),
        Some(FACE_NAME) => Ok(Metadata::Face {
            count: attrs.parse("num")?,
            layout: attrs.required("type")?.to_string(),
        }),
        _ => Ok(Metadata::Custom(
            attrs
                .attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )),
    }
}

/// Parses an index file, rejecting versions without a structured index.
pub(crate) fn parse(text: &str) -> Result<IndexHeader> {
    let mut tags = Tags::new(text);

    let version = match tags.next_tag()? {
        Some(Tag::Open { name: "stream", attrs }) => {
            let attrs = Attrs {
                element: "stream",
                attrs,
            };
            let number: u32 = attrs.parse("ssi-v")?;
            match Version::from_number(number) {
                Some(v) if v.is_structured() => v,
                _ => return Err(StreamError::UnsupportedVersion(number)),
            }
        }
        _ => return Err(StreamError::Format("missing <stream> element".to_string())),
    };

    let mut info: Option<(Encoding, StreamDescriptor, Option<String>)> = None;
    let mut meta = None;
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut complete = false;

    while let Some(tag) = tags.next_tag()? {
        match tag {
            Tag::Close("stream") => {
                complete = true;
                break;
            }
            Tag::Close(_) => {}
            Tag::Open { name, attrs } => {
                let attrs = Attrs {
                    element: name,
                    attrs,
                };
                match name {
                    "info" => {
                        let ftype = attrs.required("ftype")?;
                        let encoding = Encoding::from_name(ftype).ok_or_else(|| {
                            StreamError::Format(format!("unknown ftype '{ftype}'"))
                        })?;
                        let type_name = attrs.required("type")?;
                        let sample_type = SampleType::from_name(type_name).ok_or_else(|| {
                            StreamError::Format(format!("unknown type '{type_name}'"))
                        })?;
                        let desc = StreamDescriptor {
                            sample_rate: attrs.parse("sr")?,
                            dim: attrs.parse("dim")?,
                            byte: attrs.parse("byte")?,
                            sample_type,
                            sample_count: 0,
                        };
                        info = Some((encoding, desc, attrs.get("delim").map(str::to_string)));
                    }
                    "meta" => meta = Some(parse_meta(&attrs)?),
                    "chunk" => {
                        let Some((_, desc, _)) = &info else {
                            return Err(StreamError::Format(
                                "<chunk> before <info>".to_string(),
                            ));
                        };
                        let from: f64 = attrs.parse("from")?;
                        let byte: u64 = attrs.parse("byte")?;
                        let num: u64 = attrs.parse("num")?;
                        let to = match attrs.get("to") {
                            Some(_) => attrs.parse("to")?,
                            None => from + num as f64 / desc.sample_rate,
                        };
                        if let Some(last) = chunks.last() {
                            if byte < last.byte {
                                return Err(StreamError::Format(format!(
                                    "chunk {} starts at byte {byte} before its predecessor ({})",
                                    chunks.len(),
                                    last.byte
                                )));
                            }
                        }
                        chunks.push(Chunk {
                            from,
                            to,
                            byte,
                            num,
                        });
                    }
                    other => debug!("ignoring <{}> in index", other),
                }
            }
        }
    }

    let (encoding, mut descriptor, delim) =
        info.ok_or_else(|| StreamError::Format("missing <info> element".to_string()))?;
    descriptor.sample_count = chunks.iter().map(|c| c.num).sum();

    Ok(IndexHeader {
        version,
        encoding,
        descriptor,
        delim,
        meta,
        chunks,
        complete,
    })
}
