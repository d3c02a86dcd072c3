//! The line-oriented manifest: in-memory model, renderer, and parser.
//!
//! One manifest file describes a whole environment: a header (format
//! version, id prefix, suffix counter, root frame), the item records with
//! their keyed attributes, and the four relation tables as edge lists.
//! Tokens are percent-escaped so ids, labels, and attribute values may
//! contain whitespace.

use std::io::{BufRead, Write};

use veldt_core::StorageError;

/// First line of every manifest.
pub const FORMAT_LINE: &str = "veldt-manifest 1";

/// Manifest file name inside a serialized environment directory.
pub const MANIFEST_NAME: &str = "env.manifest";

/// Escape a token for a manifest line.
///
/// Percent-escapes `%`, whitespace, and newlines; the empty string is
/// written as a bare `%`, which no other escaped token can be.
pub fn escape_token(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_owned();
    }
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '\n' => out.push_str("%0A"),
            '\t' => out.push_str("%09"),
            other => out.push(other),
        }
    }
    out
}

/// Undo [`escape_token`]. `None` means the escape sequence is invalid.
pub fn unescape_token(escaped: &str) -> Option<String> {
    if escaped == "%" {
        return Some(String::new());
    }
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let hi = chars.next()?;
        let lo = chars.next()?;
        let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
        out.push(byte as char);
    }
    Some(out)
}

/// One item record: class tag, id, label, and the attributes its
/// serialize hook wrote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestItem {
    /// The item's class tag, keying the factory registry.
    pub class_tag: String,
    /// The full id the item had when serialized.
    pub id: String,
    /// The free-form label.
    pub label: String,
    /// Keyed attributes, in write order.
    pub attrs: Vec<(String, String)>,
}

/// In-memory form of a manifest file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    /// The environment's id prefix.
    pub prefix: String,
    /// The running suffix counter at serialization time.
    pub counter: u64,
    /// Id of the designated root frame.
    pub root: String,
    /// Item records, in id order.
    pub items: Vec<ManifestItem>,
    /// Frame tree edges `(child, parent)`.
    pub frame_edges: Vec<(String, String)>,
    /// Layer hierarchy edges `(child, parent)`.
    pub layer_edges: Vec<(String, String)>,
    /// Operator input edges `(operator, layer)`.
    pub input_edges: Vec<(String, String)>,
    /// Operator output edges `(operator, layer)`.
    pub output_edges: Vec<(String, String)>,
    /// Cartesian bindings `(map, frame)`.
    pub binding_edges: Vec<(String, String)>,
}

impl Manifest {
    /// Render the manifest to a writer.
    pub fn render(&self, w: &mut dyn Write) -> Result<(), StorageError> {
        writeln!(w, "{FORMAT_LINE}")?;
        writeln!(w, "prefix {}", escape_token(&self.prefix))?;
        writeln!(w, "counter {}", self.counter)?;
        writeln!(w, "root {}", escape_token(&self.root))?;
        writeln!(w, "items")?;
        for item in &self.items {
            writeln!(
                w,
                "item {} {} {}",
                escape_token(&item.class_tag),
                escape_token(&item.id),
                escape_token(&item.label),
            )?;
            for (key, value) in &item.attrs {
                writeln!(w, "attr {} {}", escape_token(key), escape_token(value))?;
            }
        }
        Self::render_edges(w, "frame-tree", &self.frame_edges)?;
        Self::render_edges(w, "layer-tree", &self.layer_edges)?;
        Self::render_edges(w, "operator-inputs", &self.input_edges)?;
        Self::render_edges(w, "operator-outputs", &self.output_edges)?;
        Self::render_edges(w, "cartesian-bindings", &self.binding_edges)?;
        writeln!(w, "end")?;
        Ok(())
    }

    fn render_edges(
        w: &mut dyn Write,
        section: &str,
        edges: &[(String, String)],
    ) -> Result<(), StorageError> {
        writeln!(w, "{section}")?;
        for (a, b) in edges {
            writeln!(w, "edge {} {}", escape_token(a), escape_token(b))?;
        }
        Ok(())
    }

    /// Parse a manifest from a buffered reader.
    pub fn parse(r: impl BufRead) -> Result<Self, StorageError> {
        let mut manifest = Manifest::default();
        let mut section = Section::Header;
        let mut saw_format = false;
        let mut saw_end = false;

        for (index, line) in r.lines().enumerate() {
            let number = index + 1;
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            if !saw_format {
                if line != FORMAT_LINE {
                    return Err(malformed(number, format!("expected '{FORMAT_LINE}'")));
                }
                saw_format = true;
                continue;
            }
            if saw_end {
                return Err(malformed(number, "content after 'end'".into()));
            }

            let mut tokens = line.split(' ');
            let keyword = tokens.next().unwrap_or_default();
            match keyword {
                "prefix" => manifest.prefix = take_token(&mut tokens, number)?,
                "counter" => {
                    let raw = take_raw(&mut tokens, number)?;
                    manifest.counter = raw
                        .parse()
                        .map_err(|e| malformed(number, format!("counter: {e}")))?;
                }
                "root" => manifest.root = take_token(&mut tokens, number)?,
                "items" => section = Section::Items,
                "frame-tree" => section = Section::FrameTree,
                "layer-tree" => section = Section::LayerTree,
                "operator-inputs" => section = Section::Inputs,
                "operator-outputs" => section = Section::Outputs,
                "cartesian-bindings" => section = Section::Bindings,
                "end" => saw_end = true,
                "item" => {
                    if section != Section::Items {
                        return Err(malformed(number, "item record outside 'items'".into()));
                    }
                    manifest.items.push(ManifestItem {
                        class_tag: take_token(&mut tokens, number)?,
                        id: take_token(&mut tokens, number)?,
                        label: take_token(&mut tokens, number)?,
                        attrs: Vec::new(),
                    });
                }
                "attr" => {
                    let record = manifest.items.last_mut().ok_or_else(|| {
                        malformed(number, "attribute before any item record".into())
                    })?;
                    let key = take_token(&mut tokens, number)?;
                    let value = take_token(&mut tokens, number)?;
                    record.attrs.push((key, value));
                }
                "edge" => {
                    let a = take_token(&mut tokens, number)?;
                    let b = take_token(&mut tokens, number)?;
                    let edges = match section {
                        Section::FrameTree => &mut manifest.frame_edges,
                        Section::LayerTree => &mut manifest.layer_edges,
                        Section::Inputs => &mut manifest.input_edges,
                        Section::Outputs => &mut manifest.output_edges,
                        Section::Bindings => &mut manifest.binding_edges,
                        _ => return Err(malformed(number, "edge outside a relation table".into())),
                    };
                    edges.push((a, b));
                }
                other => {
                    return Err(malformed(number, format!("unknown keyword '{other}'")));
                }
            }
        }

        if !saw_format {
            return Err(malformed(0, "empty manifest".into()));
        }
        if !saw_end {
            return Err(malformed(0, "missing 'end'".into()));
        }
        Ok(manifest)
    }
}

#[derive(PartialEq)]
enum Section {
    Header,
    Items,
    FrameTree,
    LayerTree,
    Inputs,
    Outputs,
    Bindings,
}

fn malformed(line: usize, detail: String) -> StorageError {
    StorageError::MalformedManifest { line, detail }
}

fn take_raw<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: usize) -> Result<String, StorageError> {
    tokens
        .next()
        .map(str::to_owned)
        .ok_or_else(|| malformed(line, "missing token".into()))
}

fn take_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<String, StorageError> {
    let raw = take_raw(tokens, line)?;
    unescape_token(&raw).ok_or_else(|| malformed(line, format!("bad escape in '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrips_awkward_tokens() {
        for raw in ["", "plain", "with space", "per%cent", "tab\there", "nl\nline"] {
            let escaped = escape_token(raw);
            assert!(!escaped.contains(' '), "escaped token has a space: {escaped:?}");
            assert_eq!(unescape_token(&escaped).unwrap(), raw);
        }
    }

    #[test]
    fn render_parse_roundtrip() {
        let manifest = Manifest {
            prefix: "/scan/".into(),
            counter: 7,
            root: "/scan/root".into(),
            items: vec![
                ManifestItem {
                    class_tag: "veldt::Frame".into(),
                    id: "/scan/root".into(),
                    label: String::new(),
                    attrs: vec![("tx".into(), "0".into())],
                },
                ManifestItem {
                    class_tag: "test::Map".into(),
                    id: "/scan/cloud0".into(),
                    label: "left camera".into(),
                    attrs: vec![],
                },
            ],
            frame_edges: vec![("/scan/a".into(), "/scan/root".into())],
            layer_edges: vec![],
            input_edges: vec![("/scan/op".into(), "/scan/cloud0".into())],
            output_edges: vec![],
            binding_edges: vec![("/scan/cloud0".into(), "/scan/root".into())],
        };
        let mut buf = Vec::new();
        manifest.render(&mut buf).unwrap();
        let parsed = Manifest::parse(buf.as_slice()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn unknown_format_line_is_rejected() {
        let result = Manifest::parse("veldt-manifest 99\nend\n".as_bytes());
        assert!(matches!(
            result,
            Err(StorageError::MalformedManifest { line: 1, .. })
        ));
    }

    #[test]
    fn truncated_manifest_is_rejected() {
        let mut buf = Vec::new();
        Manifest::default().render(&mut buf).unwrap();
        buf.truncate(buf.len() - 5);
        assert!(Manifest::parse(buf.as_slice()).is_err());
    }
}
