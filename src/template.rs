//! Statement templates.
//!
//! A template is literal statement text interleaved with `{{ }}` tags. Tags either
//! substitute an escaped value (`{{name}}`, `{{: name}}`, `{{? name}}`), call a
//! registered helper (`{{_trim name}}`), or open and close blocks
//! (`{{#each fields}} ... {{else}} ... {{/each}}`). Grammar details live in
//! `template.pest`.
//!
//! [`CompiledTemplate::compile`] resolves every helper reference against a
//! [`Helpers`] registry up front, so an unknown helper or broken block nesting is
//! reported once, at compile time. A compiled template holds no mutable state and
//! can be rendered concurrently.

use std::fmt;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use serde_json::{Map, Value};

use crate::error::{Result, SupersequelError};
use crate::escape::Mode;
use crate::helpers::{HelperFn, Helpers};
use crate::history::History;
use crate::value::{stringify, truthy};

#[derive(Parser)]
#[grammar = "template.pest"]
struct TemplateParser;

// ------------- Expressions -------------

#[derive(Debug, Clone, PartialEq)]
enum Head {
    This,
    Property(String),
    Data(String),
    History(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    parents: usize,
    head: Head,
    tail: Vec<String>,
}

impl Path {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut rest = text;
        let mut parents = 0;
        while let Some(stripped) = rest.strip_prefix("../") {
            parents += 1;
            rest = stripped;
        }
        let mut segments = rest.split('.').filter(|s| !s.is_empty()).map(str::to_string);
        let head = match segments.next() {
            None => Head::This,
            Some(first) if first == "this" => Head::This,
            Some(first) if first == "$history" => match segments.next() {
                Some(id) => Head::History(id),
                None => return Err("history reference needs a query id".to_string()),
            },
            Some(first) if first.starts_with('@') => Head::Data(first[1..].to_string()),
            Some(first) => Head::Property(first),
        };
        Ok(Self { parents, head, tail: segments.collect() })
    }
}

#[derive(Clone)]
enum Expr {
    Literal(Value),
    Path(Path),
    Call { name: String, helper: HelperFn, args: Vec<Expr> },
}

impl Expr {
    fn reads_history(&self) -> bool {
        match self {
            Expr::Literal(_) => false,
            Expr::Path(path) => matches!(path.head, Head::History(_)),
            Expr::Call { args, .. } => args.iter().any(Expr::reads_history),
        }
    }
}

#[derive(Clone)]
enum BlockKind {
    Each,
    If,
    Unless,
    With,
    Helper { name: String, helper: HelperFn },
}

impl BlockKind {
    fn builtin(name: &str) -> Option<Self> {
        match name {
            "each" => Some(BlockKind::Each),
            "if" => Some(BlockKind::If),
            "unless" => Some(BlockKind::Unless),
            "with" => Some(BlockKind::With),
            _ => None,
        }
    }
}

#[derive(Clone)]
enum Node {
    Text(String),
    Substitute { mode: Mode, expr: Expr },
    Block { kind: BlockKind, args: Vec<Expr>, body: Vec<Node>, inverse: Vec<Node> },
}

impl Node {
    fn reads_history(&self) -> bool {
        match self {
            Node::Text(_) => false,
            Node::Substitute { expr, .. } => expr.reads_history(),
            Node::Block { args, body, inverse, .. } => {
                args.iter().any(Expr::reads_history)
                    || body.iter().any(Node::reads_history)
                    || inverse.iter().any(Node::reads_history)
            }
        }
    }
}

// ------------- Compilation -------------

fn located(pair: &Pair<Rule>, message: impl Into<String>) -> SupersequelError {
    let (line, col) = pair.as_span().start_pos().line_col();
    SupersequelError::TemplateCompile { message: message.into(), line: Some(line), col: Some(col) }
}

/// An open block waiting for its close tag.
struct OpenBlock {
    name: String,
    kind: BlockKind,
    args: Vec<Expr>,
    body: Vec<Node>,
    inverse: Vec<Node>,
    in_inverse: bool,
    line: usize,
    col: usize,
}

impl OpenBlock {
    fn push(&mut self, node: Node) {
        if self.in_inverse { self.inverse.push(node) } else { self.body.push(node) }
    }
}

struct Compiler<'h> {
    helpers: &'h Helpers,
}

impl<'h> Compiler<'h> {
    fn helper(&self, pair: &Pair<Rule>, name: &str) -> Result<HelperFn> {
        self.helpers
            .get(name)
            .cloned()
            .ok_or_else(|| located(pair, format!("unknown helper: {name}")))
    }

    fn argument(&self, pair: Pair<Rule>) -> Result<Expr> {
        match pair.as_rule() {
            Rule::subexpr => {
                let call = pair.into_inner().next().ok_or_else(|| SupersequelError::template("empty sub-expression"))?;
                let (name, args) = self.call_parts(call.clone())?;
                let helper = self.helper(&call, &name)?;
                Ok(Expr::Call { name, helper, args })
            }
            Rule::string => {
                let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                Ok(Expr::Literal(Value::String(unescape_string(raw))))
            }
            Rule::number => {
                let number = serde_json::from_str::<Value>(pair.as_str())
                    .map_err(|e| located(&pair, format!("invalid number: {e}")))?;
                Ok(Expr::Literal(number))
            }
            Rule::boolean => Ok(Expr::Literal(Value::Bool(pair.as_str() == "true"))),
            Rule::null => Ok(Expr::Literal(Value::Null)),
            Rule::path => {
                let path = Path::parse(pair.as_str()).map_err(|m| located(&pair, m))?;
                Ok(Expr::Path(path))
            }
            other => Err(located(&pair, format!("unexpected {other:?} in argument position"))),
        }
    }

    fn call_parts(&self, call: Pair<Rule>) -> Result<(String, Vec<Expr>)> {
        let mut inner = call.into_inner();
        let name = inner
            .next()
            .map(|p| p.as_str().to_string())
            .ok_or_else(|| SupersequelError::template("empty tag"))?;
        let args = inner.map(|p| self.argument(p)).collect::<Result<Vec<_>>>()?;
        Ok((name, args))
    }

    /// A substitution tag names either a helper or a path.
    fn substitution(&self, call: Pair<Rule>) -> Result<Expr> {
        let (name, args) = self.call_parts(call.clone())?;
        if let Some(helper) = self.helpers.get(&name) {
            return Ok(Expr::Call { name, helper: helper.clone(), args });
        }
        if !args.is_empty() {
            return Err(located(&call, format!("unknown helper: {name}")));
        }
        let path = Path::parse(&name).map_err(|m| located(&call, m))?;
        Ok(Expr::Path(path))
    }

    fn open_block(&self, call: Pair<Rule>) -> Result<OpenBlock> {
        let (line, col) = call.as_span().start_pos().line_col();
        let (name, args) = self.call_parts(call.clone())?;
        let kind = match BlockKind::builtin(&name) {
            Some(kind) => {
                if args.len() != 1 {
                    return Err(located(&call, format!("#{name} takes exactly one argument")));
                }
                kind
            }
            None => BlockKind::Helper { name: name.clone(), helper: self.helper(&call, &name)? },
        };
        Ok(OpenBlock { name, kind, args, body: Vec::new(), inverse: Vec::new(), in_inverse: false, line, col })
    }

    fn compile(&self, source: &str) -> Result<Vec<Node>> {
        let template = TemplateParser::parse(Rule::template, source)?
            .next()
            .ok_or_else(|| SupersequelError::template("empty parse"))?;
        let mut root: Vec<Node> = Vec::new();
        let mut stack: Vec<OpenBlock> = Vec::new();
        for pair in template.into_inner() {
            let node = match pair.as_rule() {
                Rule::text => Node::Text(pair.as_str().to_string()),
                Rule::comment | Rule::EOI => continue,
                Rule::substitution => {
                    let mut mode = Mode::Literal;
                    let mut expr = None;
                    for part in pair.clone().into_inner() {
                        match part.as_rule() {
                            Rule::sigil if part.as_str() == ":" => mode = Mode::Identifier,
                            Rule::sigil => mode = Mode::Html,
                            _ => expr = Some(self.substitution(part)?),
                        }
                    }
                    let expr = expr.ok_or_else(|| located(&pair, "empty substitution"))?;
                    Node::Substitute { mode, expr }
                }
                Rule::open_block => {
                    let call = pair.clone().into_inner().next().ok_or_else(|| located(&pair, "empty block"))?;
                    stack.push(self.open_block(call)?);
                    continue;
                }
                Rule::else_tag => {
                    match stack.last_mut() {
                        Some(open) if matches!(open.kind, BlockKind::Helper { .. }) => {
                            return Err(located(&pair, format!("{{{{else}}}} is not allowed in #{}", open.name)));
                        }
                        Some(open) if !open.in_inverse => open.in_inverse = true,
                        Some(open) => return Err(located(&pair, format!("second {{{{else}}}} in #{}", open.name))),
                        None => return Err(located(&pair, "{{else}} outside of a block")),
                    }
                    continue;
                }
                Rule::close_block => {
                    let name = pair.clone().into_inner().next().map(|p| p.as_str()).unwrap_or("");
                    let open = stack
                        .pop()
                        .ok_or_else(|| located(&pair, format!("{{{{/{name}}}}} closes nothing")))?;
                    if open.name != name {
                        return Err(located(
                            &pair,
                            format!("{{{{/{name}}}}} does not match #{} opened at {}:{}", open.name, open.line, open.col),
                        ));
                    }
                    Node::Block { kind: open.kind, args: open.args, body: open.body, inverse: open.inverse }
                }
                other => return Err(located(&pair, format!("unexpected {other:?}"))),
            };
            match stack.last_mut() {
                Some(open) => open.push(node),
                None => root.push(node),
            }
        }
        if let Some(open) = stack.pop() {
            return Err(SupersequelError::TemplateCompile {
                message: format!("#{} is never closed", open.name),
                line: Some(open.line),
                col: Some(open.col),
            });
        }
        Ok(root)
    }
}

fn unescape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ------------- Rendering -------------

/// Everything a render can look at besides the template itself.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub properties: &'a Value,
    pub history: &'a History,
    /// Batch position of the request being rendered; bounds which history it sees.
    pub reader: usize,
}

impl<'a> RenderContext<'a> {
    /// A context that sees every recorded history entry.
    pub fn new(properties: &'a Value, history: &'a History) -> Self {
        Self { properties, history, reader: usize::MAX }
    }

    /// Restrict history to entries written before position `reader`.
    pub fn reader(mut self, reader: usize) -> Self {
        self.reader = reader;
        self
    }
}

/// One level of scope: `this` plus the `@` data variables of the enclosing `#each`.
struct Frame {
    this: Value,
    data: Map<String, Value>,
}

impl Frame {
    fn new(this: Value) -> Self {
        Self { this, data: Map::new() }
    }
}

fn navigate(mut value: Value, tail: &[String]) -> Value {
    for segment in tail {
        value = match value {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    value
}

struct Renderer<'a> {
    ctx: RenderContext<'a>,
    frames: Vec<Frame>,
}

impl<'a> Renderer<'a> {
    fn frame(&self, parents: usize) -> Option<&Frame> {
        self.frames.len().checked_sub(parents + 1).and_then(|i| self.frames.get(i))
    }

    fn resolve(&self, path: &Path) -> Result<Value> {
        let start = match &path.head {
            Head::History(id) => match self.ctx.history.visible_to(id, self.ctx.reader) {
                Some(results) => Value::String(results),
                None => return Err(SupersequelError::MissingHistoryReference { id: id.clone() }),
            },
            Head::Data(name) if name == "root" => self.ctx.properties.clone(),
            head => {
                let Some(frame) = self.frame(path.parents) else {
                    return Ok(Value::Null);
                };
                match head {
                    Head::This => frame.this.clone(),
                    Head::Property(name) => frame.this.get(name).cloned().unwrap_or(Value::Null),
                    Head::Data(name) => frame.data.get(name).cloned().unwrap_or(Value::Null),
                    Head::History(_) => Value::Null,
                }
            }
        };
        Ok(navigate(start, &path.tail))
    }

    fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => self.resolve(path),
            Expr::Call { name, helper, args } => {
                let args = args.iter().map(|a| self.evaluate(a)).collect::<Result<Vec<_>>>()?;
                self.call(name, helper, &args)
            }
        }
    }

    fn call(&self, name: &str, helper: &HelperFn, args: &[Value]) -> Result<Value> {
        let this = self.frames.last().map(|f| &f.this).unwrap_or(&Value::Null);
        (**helper)(args, this).map_err(|message| SupersequelError::Helper { name: name.to_string(), message })
    }

    fn scoped(&mut self, frame: Frame, nodes: &[Node], out: &mut String) -> Result<()> {
        self.frames.push(frame);
        let rendered = self.render(nodes, out);
        self.frames.pop();
        rendered
    }

    fn each(&mut self, collection: Value, body: &[Node], inverse: &[Node], out: &mut String) -> Result<()> {
        let items: Vec<(Value, Value)> = match collection {
            Value::Array(items) => items.into_iter().enumerate().map(|(i, v)| (Value::from(i), v)).collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            _ => Vec::new(),
        };
        if items.is_empty() {
            return self.render(inverse, out);
        }
        let last = items.len() - 1;
        for (index, (key, value)) in items.into_iter().enumerate() {
            let mut frame = Frame::new(value);
            frame.data.insert("key".to_string(), key);
            frame.data.insert("index".to_string(), Value::from(index));
            frame.data.insert("first".to_string(), Value::Bool(index == 0));
            frame.data.insert("last".to_string(), Value::Bool(index == last));
            self.scoped(frame, body, out)?;
        }
        Ok(())
    }

    fn render(&mut self, nodes: &[Node], out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Substitute { mode, expr } => {
                    let value = self.evaluate(expr)?;
                    out.push_str(&mode.apply(&value)?);
                }
                Node::Block { kind, args, body, inverse } => match kind {
                    BlockKind::Helper { name, helper } => {
                        let mut inner = String::new();
                        self.render(body, &mut inner)?;
                        let mut values = Vec::with_capacity(args.len() + 1);
                        values.push(Value::String(inner));
                        for arg in args {
                            values.push(self.evaluate(arg)?);
                        }
                        out.push_str(&stringify(&self.call(name, helper, &values)?));
                    }
                    builtin => {
                        let value = match args.first() {
                            Some(arg) => self.evaluate(arg)?,
                            None => Value::Null,
                        };
                        match builtin {
                            BlockKind::Each => self.each(value, body, inverse, out)?,
                            BlockKind::If if truthy(&value) => self.render(body, out)?,
                            BlockKind::Unless if !truthy(&value) => self.render(body, out)?,
                            BlockKind::With if truthy(&value) => {
                                let data = self.frames.last().map(|f| f.data.clone()).unwrap_or_default();
                                self.scoped(Frame { this: value, data }, body, out)?
                            }
                            _ => self.render(inverse, out)?,
                        }
                    }
                },
            }
        }
        Ok(())
    }
}

// ------------- Compiled template -------------

/// A parsed template with every helper reference resolved.
#[derive(Clone)]
pub struct CompiledTemplate {
    source: String,
    nodes: Vec<Node>,
    reads_history: bool,
}

impl CompiledTemplate {
    pub fn compile(source: &str, helpers: &Helpers) -> Result<Self> {
        let nodes = Compiler { helpers }.compile(source)?;
        let reads_history = nodes.iter().any(Node::reads_history);
        Ok(Self { source: source.to_string(), nodes, reads_history })
    }

    pub fn render(&self, ctx: RenderContext) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut renderer = Renderer { ctx, frames: vec![Frame::new(ctx.properties.clone())] };
        renderer.render(&self.nodes, &mut out)?;
        Ok(out)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether rendering consults `$history`.
    pub fn reads_history(&self) -> bool {
        self.reads_history
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("source", &self.source)
            .field("reads_history", &self.reads_history)
            .finish()
    }
}
