//! Markdown fields: link classification, rendering and summaries.
//!
//! Link destinations fall into five groups:
//!
//! | Destination | Kind | Rendered as |
//! |---|---|---|
//! | `TOC` | table-of-contents marker | untouched |
//! | `#section` | in-page anchor | untouched |
//! | `https://…`, `mailto:a@b` | external | untouched |
//! | `@node.parent.title` | expression | evaluated against the render context |
//! | `../other#part` | internal | href of the target node, fragment kept |
//!
//! Internal links are checked during validation and stored on the bound
//! [`Markdown`]; expressions need a render context and are only evaluated
//! when rendering.
//!
//! Text may also hold render macros, which splice a rendered value into the
//! HTML:
//!
//! ```text
//! {{render content=node.hero arguments='{"width": 640, "height": 480}' /}}
//! {{render content=node.parent.title}}
//! ```
//!
//! `content` is an expression; `arguments` is a JSON literal or an `args`
//! expression and is passed to [`Renderable::render`]. Macros are checked
//! for syntax during validation and evaluated when rendering. Macros inside
//! code are left alone.

use crate::context::Phase;
use crate::node::{Markdown, Node, Value};
use crate::render::{RenderContext, RenderError, RenderFrame, Renderable};
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd};
use thiserror::Error;

/// Marker separating a summary from the rest of the body.
pub const MORE_MARKER: &str = "<!--more-->";

const TOC_MARKER: &str = "TOC";

const MACRO_OPEN: &str = "{{";
const MACRO_CLOSERS: [&str; 2] = ["/}}", "}}"];

/// First segment of every expression.
const EXPRESSION_ROOTS: [&str; 3] = ["node", "root", "args"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind<'a> {
    Toc,
    Anchor,
    External,
    /// Expression text after the `@`.
    Expression(&'a str),
    Internal {
        path: &'a str,
        fragment: Option<&'a str>,
    },
}

pub fn classify_link(url: &str) -> LinkKind<'_> {
    if url == TOC_MARKER || url.starts_with("TOC ") {
        return LinkKind::Toc;
    }
    if let Some(expression) = url.strip_prefix('@') {
        return LinkKind::Expression(expression);
    }
    if url.contains("://") || url.contains('@') || has_scheme(url) {
        return LinkKind::External;
    }
    if url.is_empty() || url.starts_with('#') {
        return LinkKind::Anchor;
    }
    match url.split_once('#') {
        Some((path, fragment)) => LinkKind::Internal {
            path,
            fragment: Some(fragment),
        },
        None => LinkKind::Internal {
            path: url,
            fragment: None,
        },
    }
}

/// `tel:`, `data:` and friends: a scheme before any `/`.
fn has_scheme(url: &str) -> bool {
    match url.find(':') {
        Some(colon) => {
            let scheme = &url[..colon];
            !scheme.is_empty()
                && !scheme.contains('/')
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_HEADING_ATTRIBUTES
}

/// Destinations of every link in `source`, in document order.
pub fn link_urls(source: &str) -> Vec<String> {
    Parser::new_ext(source, options())
        .filter_map(|event| match event {
            Event::Start(Tag::Link { dest_url, .. }) => Some(dest_url.into_string()),
            _ => None,
        })
        .collect()
}

/// Source of the first paragraph, or `""` when there is none.
fn first_paragraph(source: &str) -> &str {
    let mut start = None;
    for (event, range) in Parser::new_ext(source, options()).into_offset_iter() {
        match event {
            Event::Start(Tag::Paragraph) if start.is_none() => start = Some(range.start),
            Event::End(TagEnd::Paragraph) => {
                if let Some(start) = start {
                    return &source[start..range.end];
                }
            }
            _ => {}
        }
    }
    ""
}

impl Markdown {
    /// Text before [`MORE_MARKER`] if present, otherwise the first paragraph.
    pub fn summary(&self, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
        ctx.phase()
            .require_after(Phase::Loading, "rendering a markdown summary")?;
        let source = match self.source.find(MORE_MARKER) {
            Some(pos) => &self.source[..pos],
            None => first_paragraph(&self.source),
        };
        self.render_source(source, ctx, None)
    }

    fn render_source(
        &self,
        source: &str,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        if ctx.is_rendering(self) {
            let owner = ctx.renderer.graph().node(self.owner());
            return Err(RenderError::Cycle {
                node: owner.path().clone(),
            });
        }
        let frame = RenderFrame::new(self, ctx);
        let ctx = &ctx.entering(&frame);

        let mut events = Vec::new();
        let mut text = String::new();
        let mut in_code_block = false;
        for event in Parser::new_ext(source, options()) {
            let event = match event {
                Event::Text(t) if !in_code_block => {
                    text.push_str(&t);
                    continue;
                }
                Event::Start(Tag::Link {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) => {
                    let (dest_url, title) = self.rewrite_link(dest_url, title, ctx, args)?;
                    Event::Start(Tag::Link {
                        link_type,
                        dest_url,
                        title,
                        id,
                    })
                }
                other => other,
            };
            match &event {
                Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
                Event::End(TagEnd::CodeBlock) => in_code_block = false,
                _ => {}
            }
            expand_macros(&std::mem::take(&mut text), &mut events, ctx, args)?;
            events.push(event);
        }
        expand_macros(&text, &mut events, ctx, args)?;

        let mut html = String::new();
        pulldown_cmark::html::push_html(&mut html, events.into_iter());
        Ok(html)
    }

    /// New destination and title for one link. Internal links without a
    /// title borrow the target node's title.
    fn rewrite_link<'a>(
        &self,
        dest_url: CowStr<'a>,
        title: CowStr<'a>,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<(CowStr<'a>, CowStr<'a>), RenderError> {
        let rewritten = match classify_link(&dest_url) {
            LinkKind::Toc | LinkKind::Anchor | LinkKind::External => None,
            LinkKind::Expression(expression) => Some((evaluate(expression, ctx, args)?, None)),
            LinkKind::Internal { path, fragment } => {
                let target = self.resolve_link(path, ctx)?;
                let mut href = ctx.renderer.href(target.id(), false);
                if let Some(fragment) = fragment {
                    href.push('#');
                    href.push_str(fragment);
                }
                Some((href, target.title().map(str::to_string)))
            }
        };
        let Some((href, target_title)) = rewritten else {
            return Ok((dest_url, title));
        };
        let title = match target_title {
            Some(target_title) if title.is_empty() => CowStr::from(target_title),
            _ => title,
        };
        Ok((CowStr::from(href), title))
    }

    fn resolve_link<'r>(
        &self,
        path: &str,
        ctx: &RenderContext<'r>,
    ) -> Result<&'r Node, RenderError> {
        let graph = ctx.renderer.graph();
        if let Some(id) = self.link_target(path) {
            return Ok(graph.node(id));
        }
        let owner = graph.node(self.owner());
        owner
            .path()
            .resolve(path)
            .ok()
            .and_then(|resolved| graph.find(&resolved))
            .ok_or_else(|| RenderError::UnknownLink {
                node: owner.path().clone(),
                url: path.to_string(),
            })
    }
}

impl Renderable for Markdown {
    fn render(
        &self,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        ctx.phase().require_after(Phase::Loading, "rendering markdown")?;
        self.render_source(&self.source, ctx, args)
    }
}

// =============================================================================
// Expressions
// =============================================================================

enum Cursor<'r> {
    Node(&'r Node),
    Value(&'r Value),
    Json(&'r serde_json::Value),
    Text(String),
}

/// Evaluate a dotted expression such as `node.parent.title` or
/// `root.navigation.0`.
///
/// Roots are `node` (the node being rendered), `root` (the graph root) and
/// `args`. References are followed transparently; on nodes, `href`, `path`
/// and `parent` are available besides the node's own fields. The final
/// value is rendered: nodes render as their href.
pub fn evaluate(
    expression: &str,
    ctx: &RenderContext<'_>,
    args: Option<&serde_json::Value>,
) -> Result<String, RenderError> {
    let cursor = lookup(expression, ctx, args)?;
    render_cursor(cursor, expression, ctx, None)
}

fn expression_error(expression: &str, message: impl Into<String>) -> RenderError {
    RenderError::Expression {
        expression: expression.to_string(),
        message: message.into(),
    }
}

fn lookup<'a>(
    expression: &str,
    ctx: &RenderContext<'a>,
    args: Option<&'a serde_json::Value>,
) -> Result<Cursor<'a>, RenderError> {
    let fail = |message: String| expression_error(expression, message);
    let graph = ctx.renderer.graph();

    let mut segments = expression.split('.');
    let mut cursor = match segments.next().unwrap_or_default() {
        "node" => Cursor::Node(ctx.node),
        "root" => Cursor::Node(graph.root()),
        "args" => Cursor::Json(args.ok_or_else(|| fail("no arguments were given".into()))?),
        other => return Err(fail(format!("unknown root `{other}`"))),
    };

    for segment in segments {
        let followed = match &cursor {
            Cursor::Value(Value::Reference(r)) => Some(r.target()),
            _ => None,
        };
        if let Some(target) = followed {
            cursor = Cursor::Node(graph.node(target));
        }
        cursor = match cursor {
            Cursor::Node(node) => match node.field(segment) {
                Some(value) => Cursor::Value(value),
                None => match segment {
                    "href" => Cursor::Text(ctx.renderer.href(node.id(), false)),
                    "path" => Cursor::Text(node.path().to_string()),
                    "parent" => match node.parent() {
                        Some(parent) => Cursor::Node(graph.node(parent)),
                        None => return Err(fail("the root has no parent".into())),
                    },
                    _ => return Err(fail(format!("{} has no field `{segment}`", node.path()))),
                },
            },
            Cursor::Value(Value::List(items)) => {
                let item = segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or_else(|| fail(format!("no list item `{segment}`")))?;
                Cursor::Value(item)
            }
            Cursor::Json(json) => {
                let next = match json {
                    serde_json::Value::Array(items) => {
                        segment.parse::<usize>().ok().and_then(|i| items.get(i))
                    }
                    _ => json.get(segment),
                };
                Cursor::Json(next.ok_or_else(|| fail(format!("no argument `{segment}`")))?)
            }
            Cursor::Value(_) | Cursor::Text(_) => {
                return Err(fail(format!("cannot look up `{segment}` in a scalar")));
            }
        };
    }
    Ok(cursor)
}

fn render_cursor(
    cursor: Cursor<'_>,
    expression: &str,
    ctx: &RenderContext<'_>,
    args: Option<&serde_json::Value>,
) -> Result<String, RenderError> {
    match cursor {
        Cursor::Node(node) => Ok(ctx.renderer.href(node.id(), false)),
        Cursor::Value(Value::Markdown(md)) if ctx.is_rendering(md) => {
            Err(expression_error(expression, "cyclic expression"))
        }
        Cursor::Value(value) => value.render(ctx, args),
        Cursor::Json(serde_json::Value::String(s)) => Ok(s.clone()),
        Cursor::Json(json) => Ok(json.to_string()),
        Cursor::Text(text) => Ok(text),
    }
}

// =============================================================================
// Render macros
// =============================================================================

/// A parsed `{{render ...}}` macro.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderMacro {
    /// Expression naming the value to render.
    pub content: String,
    pub arguments: Option<MacroArguments>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroArguments {
    /// Inline JSON, e.g. `'{"width": 100}'`.
    Literal(serde_json::Value),
    /// An `args` expression, forwarding (part of) the caller's arguments.
    Expression(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid macro `{text}`: {message}")]
pub struct MacroError {
    pub text: String,
    pub message: String,
}

fn macro_error(text: &str, message: impl Into<String>) -> MacroError {
    let end = text.find("}}").map_or(text.len(), |i| i + 2);
    MacroError {
        text: text[..end].to_string(),
        message: message.into(),
    }
}

enum Segment<'a> {
    Text(&'a str),
    Macro(RenderMacro),
}

/// Every render macro in `source`, in document order. Code spans and code
/// blocks are not searched.
pub fn macros(source: &str) -> Result<Vec<RenderMacro>, MacroError> {
    let mut found = Vec::new();
    let mut text = String::new();
    let mut in_code_block = false;
    for event in Parser::new_ext(source, options()) {
        match event {
            Event::Text(t) if !in_code_block => {
                text.push_str(&t);
                continue;
            }
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            _ => {}
        }
        collect_macros(&std::mem::take(&mut text), &mut found)?;
    }
    collect_macros(&text, &mut found)?;
    Ok(found)
}

fn collect_macros(text: &str, found: &mut Vec<RenderMacro>) -> Result<(), MacroError> {
    for segment in split_macros(text)? {
        if let Segment::Macro(m) = segment {
            found.push(m);
        }
    }
    Ok(())
}

/// Replace the macros in one run of text with their rendered HTML.
fn expand_macros<'e>(
    text: &str,
    events: &mut Vec<Event<'e>>,
    ctx: &RenderContext<'_>,
    args: Option<&serde_json::Value>,
) -> Result<(), RenderError> {
    if text.is_empty() {
        return Ok(());
    }
    for segment in split_macros(text)? {
        let event = match segment {
            Segment::Text(t) => Event::Text(CowStr::from(t.to_string())),
            Segment::Macro(m) => Event::InlineHtml(CowStr::from(render_macro(&m, ctx, args)?)),
        };
        events.push(event);
    }
    Ok(())
}

fn render_macro(
    m: &RenderMacro,
    ctx: &RenderContext<'_>,
    args: Option<&serde_json::Value>,
) -> Result<String, RenderError> {
    let arguments = match &m.arguments {
        None => None,
        Some(MacroArguments::Literal(json)) => Some(json.clone()),
        Some(MacroArguments::Expression(expression)) => match lookup(expression, ctx, args)? {
            Cursor::Json(json) => Some(json.clone()),
            _ => return Err(expression_error(expression, "arguments must come from `args`")),
        },
    };
    let cursor = lookup(&m.content, ctx, args)?;
    render_cursor(cursor, &m.content, ctx, arguments.as_ref())
}

fn split_macros(text: &str) -> Result<Vec<Segment<'_>>, MacroError> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(start) = find_macro(rest) {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let (parsed, len) = parse_macro(&rest[start..])?;
        segments.push(Segment::Macro(parsed));
        rest = &rest[start + len..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

/// `{{` directly followed by a letter opens a macro; other braces are text.
fn find_macro(text: &str) -> Option<usize> {
    text.char_indices().map(|(i, _)| i).find(|&i| {
        text[i..].starts_with(MACRO_OPEN)
            && text[i + MACRO_OPEN.len()..].starts_with(|c: char| c.is_ascii_alphabetic())
    })
}

/// Parse the macro at the start of `text`; returns it with its length.
fn parse_macro(text: &str) -> Result<(RenderMacro, usize), MacroError> {
    let body = &text[MACRO_OPEN.len()..];
    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(body.len());
    let name = &body[..name_len];

    let mut pos = name_len;
    let mut content = None;
    let mut arguments = None;
    loop {
        let rest = body[pos..].trim_start();
        pos = body.len() - rest.len();
        if let Some(closer) = MACRO_CLOSERS.iter().find(|c| rest.starts_with(**c)) {
            pos += closer.len();
            break;
        }
        if rest.is_empty() {
            return Err(macro_error(text, "missing closing `}}`"));
        }
        let key = match rest.find('=') {
            Some(eq) if eq > 0 && !rest[..eq].contains(char::is_whitespace) => &rest[..eq],
            _ => return Err(macro_error(text, "expected `name=value`")),
        };
        let (value, used) = attribute_value(&rest[key.len() + 1..])
            .ok_or_else(|| macro_error(text, format!("unterminated value for `{key}`")))?;
        pos += key.len() + 1 + used;
        match key {
            "content" => content = Some(value),
            "arguments" => arguments = Some(value),
            other => return Err(macro_error(text, format!("unknown attribute `{other}`"))),
        }
    }

    if name != "render" {
        return Err(macro_error(text, format!("unsupported macro `{name}`")));
    }
    let content = content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| macro_error(text, "missing `content`"))?;
    let root = content.split('.').next().unwrap_or_default();
    if !EXPRESSION_ROOTS.contains(&root) {
        return Err(macro_error(text, format!("unknown root `{root}`")));
    }
    let arguments = match arguments {
        None => None,
        Some(value) if value.starts_with(['{', '[']) => {
            let json = serde_json::from_str(value)
                .map_err(|e| macro_error(text, format!("invalid JSON arguments: {e}")))?;
            Some(MacroArguments::Literal(json))
        }
        Some(value) => Some(MacroArguments::Expression(value.to_string())),
    };

    Ok((
        RenderMacro {
            content: content.to_string(),
            arguments,
        },
        MACRO_OPEN.len() + pos,
    ))
}

/// A quoted or bare attribute value and the bytes it spans.
fn attribute_value(text: &str) -> Option<(&str, usize)> {
    match text.chars().next() {
        Some(quote @ ('\'' | '"')) => {
            let end = text[1..].find(quote)?;
            Some((&text[1..1 + end], end + 2))
        }
        _ => {
            let end = text.find(char::is_whitespace).unwrap_or(text.len());
            let end = MACRO_CLOSERS
                .iter()
                .filter_map(|c| text[..end].find(c))
                .min()
                .unwrap_or(end);
            Some((&text[..end], end))
        }
    }
}
