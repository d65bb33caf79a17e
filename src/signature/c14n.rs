//! Canonical XML 1.0 (inclusive and exclusive) over the quick-xml event stream.

use std::collections::BTreeMap;

use anyhow::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Inclusive,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub mode: Mode,
    pub with_comments: bool,
    /// Exclusive mode only: prefixes treated as visibly utilized everywhere
    pub inclusive_prefixes: Vec<String>,
}

/// Which part of the document to canonicalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subtree {
    /// The whole document (same-document reference `""`)
    Document,
    /// The element carrying `ID`, `Id` or `id` with this value
    ElementId(String),
    /// The `SignedInfo` child of the n-th `Signature` element
    SignedInfo { signature: usize },
}

/// Canonicalize `subtree` of `xml`, leaving out the subtree of the n-th
/// `Signature` element when `exclude_signature` is set (enveloped transform).
pub fn canonicalize(
    xml: &str,
    subtree: &Subtree,
    exclude_signature: Option<usize>,
    options: &Options,
) -> Result<String> {
    // Parsers hand out normalized line endings; quick-xml does not
    let xml = xml.replace("\r\n", "\n").replace('\r', "\n");
    let mut reader = Reader::from_str(&xml);
    reader.config_mut().expand_empty_elements = true;

    let mut out = String::new();
    // In-scope declarations per open element, innermost last
    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();
    // Declarations rendered by each open output element
    let mut rendered: Vec<BTreeMap<String, String>> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    let mut signature_count = 0usize;
    let mut in_signature: Option<usize> = None;
    let mut excluded_depth: Option<usize> = None;
    let mut output_depth: Option<usize> = None;
    let mut done = false;
    let mut root_seen = false;
    let mut document_started = false;

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) => anyhow::bail!("XML parse error at position {}: {}", reader.error_position(), e),
        };
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                let depth = names.len();
                let qname = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let local = qname.rsplit(':').next().unwrap_or(&qname).to_string();
                scopes.push(namespace_decls(&e)?);
                names.push(qname.clone());

                if local == "Signature" {
                    if exclude_signature == Some(signature_count) && excluded_depth.is_none() {
                        excluded_depth = Some(depth);
                    }
                    if in_signature.is_none() {
                        in_signature = Some(signature_count);
                    }
                    signature_count += 1;
                }

                if output_depth.is_none() && !done {
                    let selected = match subtree {
                        Subtree::Document => !root_seen,
                        Subtree::ElementId(id) => has_id(&e, id),
                        Subtree::SignedInfo { signature } => {
                            local == "SignedInfo" && in_signature == Some(*signature)
                        }
                    };
                    if selected {
                        output_depth = Some(depth);
                        document_started = true;
                    }
                }
                root_seen = true;

                if output_depth.is_some() && excluded_depth.is_none() {
                    let parent_rendered = rendered.last().cloned().unwrap_or_default();
                    let (tag, now_rendered) = render_start(&e, &qname, &scopes, &parent_rendered, options)?;
                    out.push_str(&tag);
                    rendered.push(now_rendered);
                }
            }
            Event::End(_) => {
                let Some(qname) = names.pop() else {
                    anyhow::bail!("Unbalanced end tag at position {}", reader.error_position());
                };
                scopes.pop();
                let depth = names.len();
                let local = qname.rsplit(':').next().unwrap_or(&qname);

                if output_depth.is_some() && excluded_depth.is_none() {
                    out.push_str("</");
                    out.push_str(&qname);
                    out.push('>');
                    rendered.pop();
                }
                if excluded_depth == Some(depth) {
                    excluded_depth = None;
                }
                if local == "Signature" && in_signature.is_some() && !names.iter().any(|n| is_signature(n)) {
                    in_signature = None;
                }
                if output_depth == Some(depth) {
                    output_depth = None;
                    done = true;
                }
            }
            Event::Text(t) => {
                if output_depth.is_some() && excluded_depth.is_none() {
                    let text = t
                        .unescape()
                        .map_err(|e| anyhow::anyhow!("XML text error at position {}: {}", reader.error_position(), e))?;
                    out.push_str(&escape_text(&text));
                }
            }
            Event::CData(c) => {
                if output_depth.is_some() && excluded_depth.is_none() {
                    out.push_str(&escape_text(&String::from_utf8_lossy(&c)));
                }
            }
            Event::Comment(c) => {
                if options.with_comments && excluded_depth.is_none() {
                    let text = String::from_utf8_lossy(&c).to_string();
                    if output_depth.is_some() {
                        out.push_str(&format!("<!--{}-->", text));
                    } else if *subtree == Subtree::Document {
                        push_outside_root(&mut out, &format!("<!--{}-->", text), root_seen, done);
                    }
                }
            }
            Event::PI(p) => {
                if excluded_depth.is_some() {
                    continue;
                }
                let raw = String::from_utf8_lossy(&p).to_string();
                let pi = match raw.split_once(|c: char| c.is_whitespace()) {
                    Some((target, data)) => format!("<?{} {}?>", target, data.trim_start()),
                    None => format!("<?{}?>", raw),
                };
                if output_depth.is_some() {
                    out.push_str(&pi);
                } else if *subtree == Subtree::Document {
                    push_outside_root(&mut out, &pi, root_seen, done);
                }
            }
            _ => {}
        }
    }

    anyhow::ensure!(document_started, "Referenced element not found");
    Ok(out)
}

fn is_signature(qname: &str) -> bool {
    qname.rsplit(':').next() == Some("Signature")
}

/// Nodes before the root element get a trailing newline, nodes after it a leading one.
fn push_outside_root(out: &mut String, node: &str, root_seen: bool, done: bool) {
    if !root_seen {
        out.push_str(node);
        out.push('\n');
    } else if done {
        out.push('\n');
        out.push_str(node);
    }
}

fn has_id(e: &BytesStart<'_>, id: &str) -> bool {
    e.attributes().filter_map(|a| a.ok()).any(|a| {
        matches!(a.key.as_ref(), b"ID" | b"Id" | b"id")
            && a.unescape_value().map(|v| v == id).unwrap_or(false)
    })
}

/// `xmlns` / `xmlns:p` declarations on one element as `(prefix, uri)`; default has prefix `""`.
fn namespace_decls(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let prefix = if key == "xmlns" {
            String::new()
        } else if let Some(p) = key.strip_prefix("xmlns:") {
            p.to_string()
        } else {
            continue;
        };
        decls.push((prefix, attr.unescape_value()?.to_string()));
    }
    Ok(decls)
}

fn lookup<'a>(scopes: &'a [Vec<(String, String)>], prefix: &str) -> Option<&'a str> {
    if prefix == "xml" {
        return Some(XML_NS);
    }
    scopes
        .iter()
        .rev()
        .flat_map(|s| s.iter())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
}

/// Every prefix bound at this point, innermost binding wins.
fn in_scope(scopes: &[Vec<(String, String)>]) -> BTreeMap<String, String> {
    let mut all = BTreeMap::new();
    for scope in scopes {
        for (p, uri) in scope {
            all.insert(p.clone(), uri.clone());
        }
    }
    all
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map(|(p, _)| p).unwrap_or("")
}

fn render_start(
    e: &BytesStart<'_>,
    qname: &str,
    scopes: &[Vec<(String, String)>],
    parent_rendered: &BTreeMap<String, String>,
    options: &Options,
) -> Result<(String, BTreeMap<String, String>)> {
    // (namespace uri, local name, qualified name, value)
    let mut attrs: Vec<(String, String, String, String)> = Vec::new();
    let mut utilized: Vec<String> = vec![prefix_of(qname).to_string()];

    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        // Literal whitespace is normalized to spaces by attribute-value normalization
        let raw = String::from_utf8_lossy(&attr.value).replace(['\t', '\n'], " ");
        let value = quick_xml::escape::unescape(&raw)?.to_string();
        let (uri, local) = match key.split_once(':') {
            Some((p, l)) => {
                utilized.push(p.to_string());
                let uri = lookup(scopes, p)
                    .ok_or_else(|| anyhow::anyhow!("Unbound namespace prefix {}", p))?;
                (uri.to_string(), l.to_string())
            }
            None => (String::new(), key.clone()),
        };
        attrs.push((uri, local, key, value));
    }
    attrs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    let mut now_rendered = parent_rendered.clone();
    let mut decls: BTreeMap<String, String> = BTreeMap::new();

    match options.mode {
        Mode::Exclusive => {
            utilized.extend(options.inclusive_prefixes.iter().map(|p| {
                if p == "#default" {
                    String::new()
                } else {
                    p.clone()
                }
            }));
            for prefix in utilized {
                if prefix == "xml" {
                    continue;
                }
                let uri = lookup(scopes, &prefix).unwrap_or("");
                if prefix.is_empty() && uri.is_empty() {
                    // xmlns="" only undoes a default rendered further up
                    if parent_rendered.get("").is_some_and(|u| !u.is_empty()) {
                        decls.insert(String::new(), String::new());
                    }
                    continue;
                }
                if uri.is_empty() {
                    continue;
                }
                if parent_rendered.get(&prefix).map(String::as_str) != Some(uri) {
                    decls.insert(prefix, uri.to_string());
                }
            }
        }
        Mode::Inclusive => {
            for (prefix, uri) in in_scope(scopes) {
                if prefix == "xml" {
                    continue;
                }
                if prefix.is_empty() && uri.is_empty() {
                    if parent_rendered.get("").is_some_and(|u| !u.is_empty()) {
                        decls.insert(String::new(), String::new());
                    }
                    continue;
                }
                if parent_rendered.get(&prefix) != Some(&uri) {
                    decls.insert(prefix, uri);
                }
            }
        }
    }

    let mut tag = String::from("<");
    tag.push_str(qname);
    for (prefix, uri) in &decls {
        if prefix.is_empty() {
            tag.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri)));
        } else {
            tag.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape_attr(uri)));
        }
        now_rendered.insert(prefix.clone(), uri.clone());
    }
    for (_, _, key, value) in &attrs {
        tag.push_str(&format!(" {}=\"{}\"", key, escape_attr(value)));
    }
    tag.push('>');

    Ok((tag, now_rendered))
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}
