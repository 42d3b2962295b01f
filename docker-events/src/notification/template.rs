//! User supplied message templates.
//!
//! Templates use the Go `text/template` action syntax. Fields on the root:
//!
//! | Field | Value |
//! |---|---|
//! | `.Time` | event time, RFC 3339 in local time |
//! | `.Type`, `.Action`, `.Status`, `.From`, `.Scope` | event fields |
//! | `.ID`, `.ShortID` | event id, full and first 12 characters |
//! | `.Name` | container name (container events only) |
//! | `.Actor.ID`, `.Actor.Attributes.<key>` | actor id and attributes |
//! | `.Attribute "key"` | actor attribute, empty when absent |
//! | `.EventCount` | number of events in the notification |
//! | `.Event` | the primary event (first of a batch) |
//! | `.Events` | every event of the notification |
//! | `.Logs` / `.GetLogs` | tail of the container's output |
//!
//! Root fields describe the first event of a batch. An event reached through
//! `.Event` or `range .Events` has `ID`, `ShortID`, `Name`, `Type`, `Action`,
//! `Status`, `From`, `Scope`, `Time`, `Timestamp` and `Actor`; `$` refers to
//! the root from inside a `range`.
//!
//! Supported actions: `{{if}}`/`{{else if}}`/`{{else}}`/`{{end}}`,
//! `{{range}}` (with optional `{{else}}`) over `.Events` or an attribute map,
//! comments, `{{-`/`-}}` whitespace trimming, and the functions `eq`, `ne`,
//! `not`, `and`, `or`, `len` and `index`. Pipelines and parentheses are not
//! supported. Field names are checked when the template is parsed.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use crate::docker::{Actor, DockerEvent};
use crate::{Error, Result};

static ACTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(-\s)?(.*?)(\s-)?\}\}").unwrap());

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)"|[^\s"]+"#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    /// A field chain, from the current dot or from the root (`$`).
    Field { root: bool, path: Vec<String> },
    Str(String),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Eq,
    Ne,
    Not,
    And,
    Or,
    Len,
    Index,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "not" => Self::Not,
            "and" => Self::And,
            "or" => Self::Or,
            "len" => Self::Len,
            "index" => Self::Index,
            _ => return None,
        })
    }

    fn check_arity(self, name: &str, args: usize) -> Result<()> {
        let ok = match self {
            Self::Eq => args >= 2,
            Self::Ne | Self::Index => args == 2,
            Self::Not | Self::Len => args == 1,
            Self::And | Self::Or => args >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::template(format!(
                "wrong number of arguments for {}: {}",
                name, args
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Arg(Arg),
    /// `.Attribute "key"`
    Attribute(String),
    Call(Func, Vec<Arg>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Output(Expr),
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        over: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Values a template is rendered against.
#[derive(Debug, Clone)]
pub struct TemplateData<'a> {
    event: &'a DockerEvent,
    events: &'a [DockerEvent],
    logs: Option<String>,
}

impl<'a> TemplateData<'a> {
    pub fn single(event: &'a DockerEvent) -> Self {
        Self {
            event,
            events: std::slice::from_ref(event),
            logs: None,
        }
    }

    /// Data for a batch, keyed on its first event. `None` for an empty batch.
    pub fn grouped(events: &'a [DockerEvent]) -> Option<Self> {
        events.first().map(|event| Self {
            event,
            events,
            logs: None,
        })
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = Some(logs.into());
        self
    }

    pub fn event(&self) -> &DockerEvent {
        self.event
    }
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    nodes: Vec<Node>,
    uses_logs: bool,
}

impl MessageTemplate {
    /// Parse a template, rejecting unknown fields and malformed actions.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            tokens: tokens.into_iter(),
        };
        let nodes = match parser.parse_list()? {
            (nodes, Stop::Eof) => nodes,
            (_, stop) => return Err(Error::template(format!("unexpected {}", stop))),
        };

        let mut checker = Checker::default();
        checker.check_nodes(&nodes, Kind::Root)?;

        Ok(Self {
            nodes,
            uses_logs: checker.uses_logs,
        })
    }

    /// Whether rendering needs container logs.
    pub fn uses_logs(&self) -> bool {
        self.uses_logs
    }

    /// Render the template. The result is trimmed.
    pub fn render(&self, data: &TemplateData<'_>) -> Result<String> {
        let mut out = String::new();
        Renderer { data }.render_nodes(&self.nodes, &Value::Root, &mut out)?;
        Ok(out.trim().to_string())
    }
}

enum Token {
    Text(String),
    Action(String),
}

/// Split `source` into text and action bodies, applying trim markers.
fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    let mut trim_next = false;

    for caps in ACTION_REGEX.captures_iter(source) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        let mut text = &source[last..whole.start()];
        if trim_next {
            text = text.trim_start();
        }
        if caps.get(1).is_some() {
            text = text.trim_end();
        }
        push_text(&mut tokens, text)?;

        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        if !(body.starts_with("/*") && body.ends_with("*/")) {
            tokens.push(Token::Action(body.to_string()));
        }
        trim_next = caps.get(3).is_some();
        last = whole.end();
    }

    let mut text = &source[last..];
    if trim_next {
        text = text.trim_start();
    }
    push_text(&mut tokens, text)?;
    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str) -> Result<()> {
    if text.contains("{{") {
        return Err(Error::template(format!("unclosed action near {:?}", text.trim())));
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
    Ok(())
}

/// What ended a node list.
enum Stop {
    Eof,
    End,
    Else,
    ElseIf(Expr),
}

impl std::fmt::Display for Stop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => write!(f, "end of template"),
            Self::End => write!(f, "{{{{end}}}}"),
            Self::Else | Self::ElseIf(_) => write!(f, "{{{{else}}}}"),
        }
    }
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            let body = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Token::Action(body) => body,
            };

            let words = split_words(&body)?;
            let (keyword, rest) = match words.split_first() {
                Some((Word::Bare(keyword), rest)) => (keyword.as_str(), rest),
                Some(_) => {
                    nodes.push(Node::Output(parse_expr(&words)?));
                    continue;
                }
                None => return Err(Error::template("empty action")),
            };

            match keyword {
                "if" => {
                    let cond = parse_expr(rest)?;
                    nodes.push(self.parse_if(cond)?);
                }
                "range" => {
                    let over = parse_expr(rest)?;
                    nodes.push(self.parse_range(over)?);
                }
                "end" if rest.is_empty() => return Ok((nodes, Stop::End)),
                "else" if rest.is_empty() => return Ok((nodes, Stop::Else)),
                "else" if rest.first() == Some(&Word::Bare("if".to_string())) => {
                    return Ok((nodes, Stop::ElseIf(parse_expr(&rest[1..])?)));
                }
                "end" | "else" => {
                    return Err(Error::template(format!("unexpected arguments in {{{{{}}}}}", body)));
                }
                "with" | "define" | "template" | "block" | "break" | "continue" => {
                    return Err(Error::template(format!("unsupported action {}", keyword)));
                }
                _ => nodes.push(Node::Output(parse_expr(&words)?)),
            }
        }

        Ok((nodes, Stop::Eof))
    }

    fn parse_if(&mut self, cond: Expr) -> Result<Node> {
        let (then, stop) = self.parse_list()?;
        let otherwise = match stop {
            Stop::End => Vec::new(),
            Stop::Else => self.parse_block_end("if")?,
            Stop::ElseIf(next) => vec![self.parse_if(next)?],
            Stop::Eof => return Err(Error::template("unexpected end of template in if")),
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_range(&mut self, over: Expr) -> Result<Node> {
        let (body, stop) = self.parse_list()?;
        let otherwise = match stop {
            Stop::End => Vec::new(),
            Stop::Else => self.parse_block_end("range")?,
            Stop::ElseIf(_) => return Err(Error::template("else if is not allowed in range")),
            Stop::Eof => return Err(Error::template("unexpected end of template in range")),
        };
        Ok(Node::Range {
            over,
            body,
            otherwise,
        })
    }

    /// Parse an `{{else}}` branch up to its `{{end}}`.
    fn parse_block_end(&mut self, block: &str) -> Result<Vec<Node>> {
        match self.parse_list()? {
            (nodes, Stop::End) => Ok(nodes),
            (_, stop) => Err(Error::template(format!("unexpected {} in {}", stop, block))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    Quoted(String),
    Bare(String),
}

fn split_words(body: &str) -> Result<Vec<Word>> {
    let mut words = Vec::new();
    for caps in WORD_REGEX.captures_iter(body) {
        if let Some(quoted) = caps.get(1) {
            words.push(Word::Quoted(unescape(quoted.as_str())));
            continue;
        }
        let word = caps.get(0).map_or("", |m| m.as_str());
        if word == "|" || word.contains(['(', ')']) {
            return Err(Error::template(format!(
                "pipelines and parentheses are not supported: {:?}",
                body
            )));
        }
        words.push(Word::Bare(word.to_string()));
    }
    Ok(words)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_arg(word: &Word) -> Result<Arg> {
    let word = match word {
        Word::Quoted(s) => return Ok(Arg::Str(s.clone())),
        Word::Bare(word) => word.as_str(),
    };

    let (root, chain) = match word {
        "." => return Ok(Arg::Field { root: false, path: Vec::new() }),
        "$" => return Ok(Arg::Field { root: true, path: Vec::new() }),
        "true" => return Ok(Arg::Bool(true)),
        "false" => return Ok(Arg::Bool(false)),
        _ => match (word.strip_prefix("$."), word.strip_prefix('.')) {
            (Some(chain), _) => (true, chain),
            (None, Some(chain)) => (false, chain),
            (None, None) => {
                return word
                    .parse::<i64>()
                    .map(Arg::Int)
                    .map_err(|_| Error::template(format!("unexpected {:?} in action", word)));
            }
        },
    };

    let path: Vec<String> = chain.split('.').map(str::to_string).collect();
    if path
        .iter()
        .any(|name| name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_'))
    {
        return Err(Error::template(format!("bad field name {:?}", word)));
    }
    Ok(Arg::Field { root, path })
}

fn parse_expr(words: &[Word]) -> Result<Expr> {
    let Some((first, rest)) = words.split_first() else {
        return Err(Error::template("missing value"));
    };

    if let Word::Bare(name) = first {
        if let Some(func) = Func::lookup(name) {
            func.check_arity(name, rest.len())?;
            let args = rest.iter().map(parse_arg).collect::<Result<Vec<_>>>()?;
            return Ok(Expr::Call(func, args));
        }
    }

    let arg = parse_arg(first)?;
    let is_attribute = matches!(
        &arg,
        Arg::Field { root: false, path } if path.len() == 1 && path[0] == "Attribute"
    );

    match (is_attribute, rest) {
        (true, [Word::Quoted(key)]) => Ok(Expr::Attribute(key.clone())),
        (true, _) => Err(Error::template("Attribute requires one quoted key")),
        (false, []) => Ok(Expr::Arg(arg)),
        (false, _) => Err(Error::template(format!(
            "{} takes no argument",
            first_word(first)
        ))),
    }
}

fn first_word(word: &Word) -> &str {
    match word {
        Word::Quoted(s) | Word::Bare(s) => s,
    }
}

/// Static type of a value, used to check field chains at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Root,
    Event,
    Actor,
    Attributes,
    Events,
    Text,
    Number,
    Bool,
}

impl Kind {
    fn field(self, name: &str) -> Option<Kind> {
        let kind = match (self, name) {
            (
                Self::Root,
                "Time" | "Type" | "Action" | "ID" | "ShortID" | "Name" | "Status" | "From"
                | "Scope" | "Logs" | "GetLogs",
            ) => Self::Text,
            (Self::Root, "EventCount") => Self::Number,
            (Self::Root, "Events") => Self::Events,
            (Self::Root, "Event") => Self::Event,
            (Self::Root | Self::Event, "Actor") => Self::Actor,
            (
                Self::Event,
                "ID" | "ShortID" | "Name" | "Type" | "Action" | "Status" | "From" | "Scope"
                | "Time" | "Timestamp",
            ) => Self::Text,
            (Self::Actor, "ID") => Self::Text,
            (Self::Actor, "Attributes") => Self::Attributes,
            (Self::Attributes, _) => Self::Text,
            _ => return None,
        };
        Some(kind)
    }

    fn element(self) -> Option<Kind> {
        match self {
            Self::Events => Some(Self::Event),
            Self::Attributes => Some(Self::Text),
            _ => None,
        }
    }

    fn is_printable(self) -> bool {
        matches!(
            self,
            Self::Text | Self::Number | Self::Bool | Self::Attributes
        )
    }
}

#[derive(Default)]
struct Checker {
    uses_logs: bool,
}

impl Checker {
    fn check_nodes(&mut self, nodes: &[Node], dot: Kind) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Output(expr) => {
                    let kind = self.check_expr(expr, dot)?;
                    if !kind.is_printable() {
                        return Err(Error::template(format!("{:?} value cannot be printed", kind)));
                    }
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    self.check_expr(cond, dot)?;
                    self.check_nodes(then, dot)?;
                    self.check_nodes(otherwise, dot)?;
                }
                Node::Range {
                    over,
                    body,
                    otherwise,
                } => {
                    let kind = self.check_expr(over, dot)?;
                    let element = kind.element().ok_or_else(|| {
                        Error::template(format!("range can't iterate over {:?}", kind))
                    })?;
                    self.check_nodes(body, element)?;
                    self.check_nodes(otherwise, dot)?;
                }
            }
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &Expr, dot: Kind) -> Result<Kind> {
        match expr {
            Expr::Arg(arg) => self.check_arg(arg, dot),
            Expr::Attribute(_) if matches!(dot, Kind::Root | Kind::Event) => Ok(Kind::Text),
            Expr::Attribute(_) => Err(Error::template(format!(
                "can't evaluate Attribute on {:?}",
                dot
            ))),
            Expr::Call(func, args) => {
                let kinds = args
                    .iter()
                    .map(|arg| self.check_arg(arg, dot))
                    .collect::<Result<Vec<_>>>()?;
                match (func, kinds.as_slice()) {
                    (Func::Len, [Kind::Events | Kind::Attributes | Kind::Text]) => Ok(Kind::Number),
                    (Func::Len, _) => Err(Error::template("len of a value without length")),
                    (Func::Index, [Kind::Attributes, Kind::Text]) => Ok(Kind::Text),
                    (Func::Index, _) => Err(Error::template("index expects attributes and a key")),
                    (Func::And | Func::Or, [.., last]) => Ok(*last),
                    _ => Ok(Kind::Bool),
                }
            }
        }
    }

    fn check_arg(&mut self, arg: &Arg, dot: Kind) -> Result<Kind> {
        match arg {
            Arg::Str(_) => Ok(Kind::Text),
            Arg::Int(_) => Ok(Kind::Number),
            Arg::Bool(_) => Ok(Kind::Bool),
            Arg::Field { root, path } => {
                let mut kind = if *root { Kind::Root } else { dot };
                for name in path {
                    if kind == Kind::Root && matches!(name.as_str(), "Logs" | "GetLogs") {
                        self.uses_logs = true;
                    }
                    kind = kind.field(name).ok_or_else(|| {
                        Error::template(format!("can't evaluate field {} on {:?}", name, kind))
                    })?;
                }
                Ok(kind)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Value<'a> {
    Root,
    Event(&'a DockerEvent),
    Actor(&'a Actor),
    Attributes(&'a BTreeMap<String, String>),
    Events(&'a [DockerEvent]),
    Text(Cow<'a, str>),
    Number(i64),
    Bool(bool),
}

impl Value<'_> {
    fn is_truthy(&self) -> bool {
        match self {
            Self::Root | Self::Event(_) | Self::Actor(_) => true,
            Self::Attributes(map) => !map.is_empty(),
            Self::Events(events) => !events.is_empty(),
            Self::Text(text) => !text.is_empty(),
            Self::Number(n) => *n != 0,
            Self::Bool(b) => *b,
        }
    }

    fn equals(&self, other: &Value<'_>) -> Result<bool> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Ok(a == b),
            (Value::Number(a), Value::Number(b)) => Ok(a == b),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            _ => Err(Error::template("incompatible types for comparison")),
        }
    }

    fn write_to(&self, out: &mut String) -> Result<()> {
        match self {
            Self::Text(text) => out.push_str(text),
            Self::Number(n) => {
                let _ = write!(out, "{}", n);
            }
            Self::Bool(b) => {
                let _ = write!(out, "{}", b);
            }
            Self::Attributes(map) => {
                let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
                let _ = write!(out, "map[{}]", pairs.join(" "));
            }
            other => {
                return Err(Error::template(format!("{:?} cannot be printed", other)));
            }
        }
        Ok(())
    }
}

struct Renderer<'d, 'a> {
    data: &'d TemplateData<'a>,
}

impl<'d, 'a> Renderer<'d, 'a> {
    fn render_nodes(&self, nodes: &[Node], dot: &Value<'d>, out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => self.eval(expr, dot)?.write_to(out)?,
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let branch = if self.eval(cond, dot)?.is_truthy() {
                        then
                    } else {
                        otherwise
                    };
                    self.render_nodes(branch, dot, out)?;
                }
                Node::Range {
                    over,
                    body,
                    otherwise,
                } => {
                    let elements: Vec<Value<'d>> = match self.eval(over, dot)? {
                        Value::Events(events) => events.iter().map(Value::Event).collect(),
                        Value::Attributes(map) => map
                            .values()
                            .map(|v| Value::Text(Cow::Borrowed(v.as_str())))
                            .collect(),
                        other => {
                            return Err(Error::template(format!(
                                "range can't iterate over {:?}",
                                other
                            )));
                        }
                    };
                    if elements.is_empty() {
                        self.render_nodes(otherwise, dot, out)?;
                    }
                    for element in &elements {
                        self.render_nodes(body, element, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, dot: &Value<'d>) -> Result<Value<'d>> {
        match expr {
            Expr::Arg(arg) => self.eval_arg(arg, dot),
            Expr::Attribute(key) => {
                let event = match *dot {
                    Value::Root => self.data.event,
                    Value::Event(event) => event,
                    ref other => {
                        return Err(Error::template(format!(
                            "can't evaluate Attribute on {:?}",
                            other
                        )));
                    }
                };
                Ok(Value::Text(Cow::Borrowed(
                    event.attribute(key).unwrap_or_default(),
                )))
            }
            Expr::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|arg| self.eval_arg(arg, dot))
                    .collect::<Result<Vec<_>>>()?;
                call(*func, values)
            }
        }
    }

    fn eval_arg(&self, arg: &Arg, dot: &Value<'d>) -> Result<Value<'d>> {
        match arg {
            Arg::Str(s) => Ok(Value::Text(Cow::Owned(s.clone()))),
            Arg::Int(n) => Ok(Value::Number(*n)),
            Arg::Bool(b) => Ok(Value::Bool(*b)),
            Arg::Field { root, path } => {
                let mut value = if *root { Value::Root } else { dot.clone() };
                for name in path {
                    value = self.field(&value, name)?;
                }
                Ok(value)
            }
        }
    }

    fn field(&self, value: &Value<'d>, name: &str) -> Result<Value<'d>> {
        let data = self.data;
        let value = match (value, name) {
            (&Value::Root, "EventCount") => {
                Value::Number(i64::try_from(data.events.len()).unwrap_or(i64::MAX))
            }
            (&Value::Root, "Events") => Value::Events(data.events),
            (&Value::Root, "Event") => Value::Event(data.event),
            (&Value::Root, "Logs" | "GetLogs") => {
                Value::Text(Cow::Borrowed(data.logs.as_deref().unwrap_or_default()))
            }
            (&Value::Root, name) => return self.field(&Value::Event(data.event), name),
            (&Value::Event(event), name) => event_field(event, name)?,
            (&Value::Actor(actor), "ID") => Value::Text(Cow::Borrowed(actor.id.as_str())),
            (&Value::Actor(actor), "Attributes") => Value::Attributes(&actor.attributes),
            (&Value::Attributes(map), key) => Value::Text(Cow::Borrowed(
                map.get(key).map(String::as_str).unwrap_or_default(),
            )),
            (other, name) => {
                return Err(Error::template(format!(
                    "can't evaluate field {} on {:?}",
                    name, other
                )));
            }
        };
        Ok(value)
    }
}

fn event_field<'a>(event: &'a DockerEvent, name: &str) -> Result<Value<'a>> {
    let text = match name {
        "ID" => Cow::Borrowed(event.id.as_str()),
        "ShortID" => Cow::Borrowed(event.short_id()),
        "Name" => Cow::Borrowed(event.container_name().unwrap_or_default()),
        "Type" => Cow::Borrowed(event.event_type.as_str()),
        "Action" => Cow::Borrowed(event.action.as_str()),
        "Status" => Cow::Borrowed(event.status.as_str()),
        "From" => Cow::Borrowed(event.from.as_str()),
        "Scope" => Cow::Borrowed(event.scope.as_str()),
        "Time" | "Timestamp" => Cow::Owned(event.time()),
        "Actor" => return Ok(Value::Actor(&event.actor)),
        other => {
            return Err(Error::template(format!("can't evaluate field {} on event", other)));
        }
    };
    Ok(Value::Text(text))
}

fn call<'a>(func: Func, mut args: Vec<Value<'a>>) -> Result<Value<'a>> {
    let value = match func {
        Func::Eq => {
            let (first, rest) = args
                .split_first()
                .ok_or_else(|| Error::template("eq needs arguments"))?;
            let mut matched = false;
            for other in rest {
                matched |= first.equals(other)?;
            }
            Value::Bool(matched)
        }
        Func::Ne => match args.as_slice() {
            [a, b] => Value::Bool(!a.equals(b)?),
            _ => return Err(Error::template("ne needs two arguments")),
        },
        Func::Not => Value::Bool(!args.first().is_some_and(Value::is_truthy)),
        Func::And => {
            let pick = args.iter().position(|v| !v.is_truthy());
            take(&mut args, pick)?
        }
        Func::Or => {
            let pick = args.iter().position(Value::is_truthy);
            take(&mut args, pick)?
        }
        Func::Len => {
            let len = match args.first() {
                Some(Value::Events(events)) => events.len(),
                Some(Value::Attributes(map)) => map.len(),
                Some(Value::Text(text)) => text.len(),
                _ => return Err(Error::template("len of a value without length")),
            };
            Value::Number(i64::try_from(len).unwrap_or(i64::MAX))
        }
        Func::Index => match args.as_slice() {
            [Value::Attributes(map), Value::Text(key)] => {
                let map: &'a BTreeMap<String, String> = *map;
                Value::Text(Cow::Borrowed(
                    map.get(&**key).map(String::as_str).unwrap_or_default(),
                ))
            }
            _ => return Err(Error::template("index expects attributes and a key")),
        },
    };
    Ok(value)
}

/// The argument at `index`, or the last one when `index` is `None`.
fn take<'a>(args: &mut Vec<Value<'a>>, index: Option<usize>) -> Result<Value<'a>> {
    let index = index.unwrap_or(args.len().saturating_sub(1));
    if index < args.len() {
        Ok(args.swap_remove(index))
    } else {
        Err(Error::template("missing arguments"))
    }
}
