//! Tolerant syntax tree for host UI-registration scripts.
//!
//! Only the structure the patcher needs is modelled: functions, blocks,
//! compound statements and call statements. Everything else is kept as an
//! opaque statement that remembers its byte span, so printing a modified tree
//! reproduces the original text byte for byte outside of inserted nodes.

use crate::error::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number,
    Punct(char),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    span: Span,
}

impl Token {
    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(ident) if ident == name)
    }

    fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(ident) => Some(ident),
            _ => None,
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let end_of = |idx: usize| chars.get(idx).map(|(offset, _)| *offset).unwrap_or(text.len());
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (start, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && next == Some('*') {
            let mut depth = 0usize;
            loop {
                let Some(&(_, here)) = chars.get(i) else {
                    return Err(SyntaxError::UnterminatedComment { offset: start });
                };
                let after = chars.get(i + 1).map(|(_, c)| *c);
                if here == '/' && after == Some('*') {
                    depth += 1;
                    i += 2;
                } else if here == '*' && after == Some('/') {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            continue;
        }
        if c == '"' || c == '\'' || c == '`' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&(_, here)) = chars.get(i) else {
                    return Err(SyntaxError::UnterminatedString { offset: start });
                };
                if here == quote {
                    i += 1;
                    break;
                }
                if here == '\\' && quote != '`' {
                    let Some(&(_, escaped)) = chars.get(i + 1) else {
                        return Err(SyntaxError::UnterminatedString { offset: start });
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                value.push(here);
                i += 1;
            }
            tokens.push(Token { kind: TokenKind::Str(value), span: Span::new(start, end_of(i)) });
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, here)) = chars.get(i) {
                if here.is_alphanumeric() || here == '_' {
                    ident.push(here);
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token { kind: TokenKind::Ident(ident), span: Span::new(start, end_of(i)) });
            continue;
        }
        if c.is_ascii_digit() {
            while let Some(&(_, here)) = chars.get(i) {
                let fraction = here == '.' && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit());
                if here.is_alphanumeric() || here == '_' || fraction {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token { kind: TokenKind::Number, span: Span::new(start, end_of(i)) });
            continue;
        }
        i += 1;
        tokens.push(Token { kind: TokenKind::Punct(c), span: Span::new(start, end_of(i)) });
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Ident(String),
    Expr(String),
}

impl Arg {
    fn to_source(&self) -> String {
        match self {
            Arg::Str(value) => {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
                format!("\"{escaped}\"")
            }
            Arg::Ident(name) | Arg::Expr(name) => name.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(value) => Some(value),
            _ => None,
        }
    }
}

/// `receiver.callee(args)` or `callee(args)` used as a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStmt {
    pub receiver: Option<String>,
    pub callee: String,
    pub args: Vec<Arg>,
    /// `None` for nodes inserted after parsing.
    pub span: Option<Span>,
    pub terminated: bool,
}

impl CallStmt {
    pub fn synthetic(receiver: Option<String>, callee: impl Into<String>, args: Vec<Arg>) -> Self {
        Self { receiver, callee: callee.into(), args, span: None, terminated: true }
    }

    pub fn to_source(&self) -> String {
        let args: Vec<String> = self.args.iter().map(Arg::to_source).collect();
        match &self.receiver {
            Some(receiver) => format!("{receiver}.{}({})", self.callee, args.join(", ")),
            None => format!("{}({})", self.callee, args.join(", ")),
        }
    }

    pub fn first_str_arg(&self) -> Option<&str> {
        self.args.first().and_then(Arg::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compound {
    pub blocks: Vec<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Call(CallStmt),
    Compound(Compound),
    Opaque { span: Span, terminated: bool },
}

impl Stmt {
    pub fn span(&self) -> Option<Span> {
        match self {
            Stmt::Call(call) => call.span,
            Stmt::Compound(compound) => Some(compound.span),
            Stmt::Opaque { span, .. } => Some(*span),
        }
    }

    fn needs_terminator(&self) -> bool {
        match self {
            Stmt::Call(call) => !call.terminated,
            Stmt::Compound(_) => false,
            Stmt::Opaque { terminated, .. } => !terminated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// Offset of the opening brace.
    pub open: usize,
    /// Offset of the closing brace.
    pub close: usize,
}

impl Block {
    fn contains_call(&self, callee: &str) -> bool {
        self.stmts.iter().any(|stmt| match stmt {
            Stmt::Call(call) => call.callee == callee,
            Stmt::Compound(compound) => compound.blocks.iter().any(|block| block.contains_call(callee)),
            Stmt::Opaque { .. } => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    pub span: Span,
}

impl FnDef {
    pub fn contains_call(&self, callee: &str) -> bool {
        self.body.contains_call(callee)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Fn(FnDef),
    Other(Span),
}

/// Location of a block: the function item, then `(statement, block)` index
/// pairs descending through compound statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockPath {
    pub item: usize,
    pub nested: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    text: String,
    pub items: Vec<Item>,
}

impl SourceFile {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn functions(&self) -> impl Iterator<Item = (usize, &FnDef)> {
        self.items.iter().enumerate().filter_map(|(idx, item)| match item {
            Item::Fn(def) => Some((idx, def)),
            Item::Other(_) => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FnDef> {
        self.functions().map(|(_, def)| def).find(|def| def.name == name)
    }

    pub fn slice(&self, span: Span) -> &str {
        &self.text[span.start..span.end]
    }

    pub fn block(&self, path: &BlockPath) -> Option<&Block> {
        let Some(Item::Fn(def)) = self.items.get(path.item) else {
            return None;
        };
        let mut block = &def.body;
        for &(stmt_idx, block_idx) in &path.nested {
            match block.stmts.get(stmt_idx) {
                Some(Stmt::Compound(compound)) => block = compound.blocks.get(block_idx)?,
                _ => return None,
            }
        }
        Some(block)
    }

    pub fn block_mut(&mut self, path: &BlockPath) -> Option<&mut Block> {
        let Some(Item::Fn(def)) = self.items.get_mut(path.item) else {
            return None;
        };
        let mut block = &mut def.body;
        for &(stmt_idx, block_idx) in &path.nested {
            match block.stmts.get_mut(stmt_idx) {
                Some(Stmt::Compound(compound)) => block = compound.blocks.get_mut(block_idx)?,
                _ => return None,
            }
        }
        Some(block)
    }

    /// Every block of function `item`, outermost first.
    pub fn blocks_of(&self, item: usize) -> Vec<(BlockPath, &Block)> {
        let mut out = Vec::new();
        if let Some(Item::Fn(def)) = self.items.get(item) {
            collect_blocks(&def.body, BlockPath { item, nested: Vec::new() }, &mut out);
        }
        out
    }

    /// Prints the tree back to source. Parsed nodes keep their original text;
    /// inserted call statements are spliced in with the indentation of their
    /// neighbours.
    pub fn render(&self) -> String {
        let mut splices: Vec<(usize, String)> = Vec::new();
        for (_, def) in self.functions() {
            self.collect_splices(&def.body, &mut splices);
        }
        splices.sort_by_key(|(offset, _)| *offset);
        let mut out = String::with_capacity(self.text.len() + splices.iter().map(|(_, s)| s.len()).sum::<usize>());
        let mut cursor = 0;
        for (offset, insert) in splices {
            out.push_str(&self.text[cursor..offset]);
            out.push_str(&insert);
            cursor = offset;
        }
        out.push_str(&self.text[cursor..]);
        out
    }

    fn collect_splices(&self, block: &Block, splices: &mut Vec<(usize, String)>) {
        for (idx, stmt) in block.stmts.iter().enumerate() {
            match stmt {
                Stmt::Compound(compound) => {
                    for inner in &compound.blocks {
                        self.collect_splices(inner, splices);
                    }
                }
                Stmt::Call(call) if call.span.is_none() => {
                    let following = block.stmts[idx + 1..].iter().find_map(Stmt::span);
                    let preceding = block.stmts[..idx].iter().rev().find(|stmt| stmt.span().is_some());
                    let code = call.to_source();
                    match following {
                        Some(span) => {
                            let indent = self.indentation_at(span.start);
                            splices.push(self.placed(span.start, &indent, &code));
                        }
                        None => {
                            if let Some(prev) = preceding {
                                if prev.needs_terminator() {
                                    if let Some(span) = prev.span() {
                                        splices.push((span.end, ";".to_string()));
                                    }
                                }
                            }
                            let indent = match preceding.and_then(Stmt::span) {
                                Some(span) => self.indentation_at(span.start),
                                None => format!("{}    ", self.indentation_at(block.close)),
                            };
                            splices.push(self.placed(block.close, &indent, &code));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Places `code` on its own line when `anchor` starts a line, otherwise
    /// inline right before it.
    fn placed(&self, anchor: usize, indent: &str, code: &str) -> (usize, String) {
        let line_start = line_start(&self.text, anchor);
        if self.text[line_start..anchor].trim().is_empty() {
            (line_start, format!("{indent}{code};\n"))
        } else {
            (anchor, format!("{code}; "))
        }
    }

    fn indentation_at(&self, offset: usize) -> String {
        let start = line_start(&self.text, offset);
        self.text[start..].chars().take_while(|c| *c == ' ' || *c == '\t').collect()
    }
}

fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

fn collect_blocks<'a>(block: &'a Block, path: BlockPath, out: &mut Vec<(BlockPath, &'a Block)>) {
    out.push((path.clone(), block));
    for (stmt_idx, stmt) in block.stmts.iter().enumerate() {
        if let Stmt::Compound(compound) = stmt {
            for (block_idx, inner) in compound.blocks.iter().enumerate() {
                let mut nested = path.clone();
                nested.nested.push((stmt_idx, block_idx));
                collect_blocks(inner, nested, out);
            }
        }
    }
}

pub fn parse(text: &str) -> Result<SourceFile, SyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { text, tokens, pos: 0 };
    let mut items = Vec::new();
    while parser.peek().is_some() {
        items.push(parser.parse_item()?);
    }
    Ok(SourceFile { text: text.to_string(), items })
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

const COMPOUND_KEYWORDS: &[&str] = &["if", "while", "for", "loop", "do"];

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Result<Token, SyntaxError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(SyntaxError::UnexpectedEof { context: "item" })?;
        self.pos += 1;
        Ok(token)
    }

    fn last_end(&self) -> usize {
        self.pos.checked_sub(1).and_then(|idx| self.tokens.get(idx)).map(|t| t.span.end).unwrap_or(0)
    }

    fn expect_punct(&mut self, c: char, expected: &'static str) -> Result<Token, SyntaxError> {
        match self.peek() {
            Some(token) if token.is_punct(c) => self.bump(),
            Some(token) => Err(SyntaxError::Expected { expected, offset: token.span.start }),
            None => Err(SyntaxError::UnexpectedEof { context: expected }),
        }
    }

    fn parse_item(&mut self) -> Result<Item, SyntaxError> {
        let is_fn = match (self.peek(), self.peek_at(1)) {
            (Some(first), _) if first.is_ident("fn") => true,
            (Some(first), Some(second)) if first.is_ident("private") && second.is_ident("fn") => true,
            _ => false,
        };
        if is_fn {
            return self.parse_fn().map(Item::Fn);
        }
        if let Some(token) = self.peek() {
            if token.is_punct('}') {
                return Err(SyntaxError::Unbalanced { delimiter: '}', offset: token.span.start });
            }
            if token.is_punct('{') || COMPOUND_KEYWORDS.iter().any(|kw| token.is_ident(kw)) {
                return self.parse_compound().map(|compound| Item::Other(compound.span));
            }
        }
        let start = self.peek().map(|t| t.span.start).unwrap_or(0);
        let end = self.skip_statement()?;
        Ok(Item::Other(Span::new(start, end.span_end)))
    }

    fn parse_fn(&mut self) -> Result<FnDef, SyntaxError> {
        let first = self.bump()?;
        let start = first.span.start;
        if first.is_ident("private") {
            self.bump()?;
        }
        let name_token = self.bump()?;
        let name = name_token
            .ident()
            .ok_or(SyntaxError::Expected { expected: "function name", offset: name_token.span.start })?
            .to_string();
        self.expect_punct('(', "parameter list")?;
        let mut params = Vec::new();
        loop {
            let token = self.bump()?;
            match &token.kind {
                TokenKind::Punct(')') => break,
                TokenKind::Punct(',') => {}
                TokenKind::Ident(param) => params.push(param.clone()),
                _ => return Err(SyntaxError::Expected { expected: "parameter", offset: token.span.start }),
            }
        }
        let body = self.parse_block()?;
        Ok(FnDef { name, params, span: Span::new(start, self.last_end()), body })
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let open = self.expect_punct('{', "block")?.span.start;
        let mut stmts = Vec::new();
        loop {
            let Some(token) = self.peek() else {
                return Err(SyntaxError::UnexpectedEof { context: "block" });
            };
            if token.is_punct('}') {
                let close = token.span.start;
                self.pos += 1;
                return Ok(Block { stmts, open, close });
            }
            if token.is_punct(';') {
                self.pos += 1;
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let Some(token) = self.peek() else {
            return Err(SyntaxError::UnexpectedEof { context: "statement" });
        };
        let compound = token.is_punct('{') || COMPOUND_KEYWORDS.iter().any(|kw| token.is_ident(kw));
        if compound {
            return self.parse_compound().map(Stmt::Compound);
        }
        let first = self.pos;
        let start = token.span.start;
        let end = self.skip_statement()?;
        let span = Span::new(start, end.span_end);
        let body = &self.tokens[first..end.body_end];
        Ok(match classify_call(self.text, body) {
            Some((receiver, callee, args)) => {
                Stmt::Call(CallStmt { receiver, callee, args, span: Some(span), terminated: end.terminated })
            }
            None => Stmt::Opaque { span, terminated: end.terminated },
        })
    }

    fn parse_compound(&mut self) -> Result<Compound, SyntaxError> {
        let start = self.peek().map(|t| t.span.start).unwrap_or(0);
        let mut blocks = Vec::new();
        let head = self.peek().and_then(Token::ident).map(str::to_string);
        match head.as_deref() {
            None => blocks.push(self.parse_block()?),
            Some("loop") => {
                self.pos += 1;
                blocks.push(self.parse_block()?);
            }
            Some("do") => {
                self.pos += 1;
                blocks.push(self.parse_block()?);
                self.skip_statement()?;
            }
            Some(keyword) => {
                let is_if = keyword == "if";
                self.pos += 1;
                self.skip_header()?;
                blocks.push(self.parse_block()?);
                while is_if && self.peek().is_some_and(|t| t.is_ident("else")) {
                    self.pos += 1;
                    if self.peek().is_some_and(|t| t.is_ident("if")) {
                        self.pos += 1;
                        self.skip_header()?;
                        blocks.push(self.parse_block()?);
                    } else {
                        blocks.push(self.parse_block()?);
                        break;
                    }
                }
            }
        }
        if self.peek().is_some_and(|t| t.is_punct(';')) {
            self.pos += 1;
        }
        Ok(Compound { blocks, span: Span::new(start, self.last_end()) })
    }

    /// Skips a condition or loop header up to (not including) its block.
    fn skip_header(&mut self) -> Result<(), SyntaxError> {
        let mut depth: Vec<char> = Vec::new();
        loop {
            let Some(token) = self.peek() else {
                return Err(SyntaxError::UnexpectedEof { context: "statement header" });
            };
            if depth.is_empty() && token.is_punct('{') {
                let map_literal = self.pos > 0 && self.tokens[self.pos - 1].is_punct('#');
                if !map_literal {
                    return Ok(());
                }
            }
            let token = token.clone();
            track_depth(&token, &mut depth)?;
            self.pos += 1;
        }
    }

    /// Skips one statement. Stops after a depth-0 `;` or before a depth-0 `}`.
    /// A `switch` statement ends with the brace that closes its arms.
    fn skip_statement(&mut self) -> Result<StatementEnd, SyntaxError> {
        let is_switch = self.peek().is_some_and(|t| t.is_ident("switch"));
        let mut depth: Vec<char> = Vec::new();
        loop {
            let Some(token) = self.peek().cloned() else {
                if depth.is_empty() && self.pos > 0 {
                    let end = self.last_end();
                    return Ok(StatementEnd { body_end: self.pos, span_end: end, terminated: false });
                }
                return Err(SyntaxError::UnexpectedEof { context: "statement" });
            };
            if depth.is_empty() {
                if token.is_punct(';') {
                    let body_end = self.pos;
                    self.pos += 1;
                    return Ok(StatementEnd { body_end, span_end: token.span.end, terminated: true });
                }
                if token.is_punct('}') {
                    return Ok(StatementEnd { body_end: self.pos, span_end: self.last_end(), terminated: false });
                }
            }
            track_depth(&token, &mut depth)?;
            self.pos += 1;
            if is_switch && depth.is_empty() && token.is_punct('}') {
                return Ok(StatementEnd { body_end: self.pos, span_end: token.span.end, terminated: true });
            }
        }
    }
}

struct StatementEnd {
    /// Token index one past the statement body (excludes the `;`).
    body_end: usize,
    span_end: usize,
    terminated: bool,
}

fn track_depth(token: &Token, depth: &mut Vec<char>) -> Result<(), SyntaxError> {
    if let TokenKind::Punct(c) = token.kind {
        match c {
            '(' => depth.push(')'),
            '[' => depth.push(']'),
            '{' => depth.push('}'),
            ')' | ']' | '}' => {
                if depth.pop() != Some(c) {
                    return Err(SyntaxError::Unbalanced { delimiter: c, offset: token.span.start });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

type CallParts = (Option<String>, String, Vec<Arg>);

fn classify_call(text: &str, tokens: &[Token]) -> Option<CallParts> {
    let mut path = Vec::new();
    let mut idx = 0;
    loop {
        path.push(tokens.get(idx)?.ident()?.to_string());
        idx += 1;
        if tokens.get(idx)?.is_punct('.') {
            idx += 1;
        } else {
            break;
        }
    }
    let call = &tokens[idx..];
    if !call.first()?.is_punct('(') {
        return None;
    }
    // the argument list must close on the final token; chained calls stay opaque
    let mut depth: Vec<char> = Vec::new();
    for (pos, token) in call.iter().enumerate() {
        track_depth(token, &mut depth).ok()?;
        if depth.is_empty() && pos + 1 != call.len() {
            return None;
        }
    }
    if !depth.is_empty() {
        return None;
    }
    let inner = &call[1..call.len() - 1];
    let mut args = Vec::new();
    let mut segment_start = 0;
    for (pos, token) in inner.iter().enumerate() {
        if depth.is_empty() && token.is_punct(',') {
            push_arg(text, &inner[segment_start..pos], &mut args);
            segment_start = pos + 1;
            continue;
        }
        track_depth(token, &mut depth).ok()?;
    }
    push_arg(text, &inner[segment_start..], &mut args);
    let callee = path.pop()?;
    let receiver = if path.is_empty() { None } else { Some(path.join(".")) };
    Some((receiver, callee, args))
}

fn push_arg(text: &str, tokens: &[Token], args: &mut Vec<Arg>) {
    let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
        return;
    };
    if tokens.len() == 1 {
        match &first.kind {
            TokenKind::Str(value) => return args.push(Arg::Str(value.clone())),
            TokenKind::Ident(name) => return args.push(Arg::Ident(name.clone())),
            _ => {}
        }
    }
    args.push(Arg::Expr(text[first.span.start..last.span.end].to_string()));
}
