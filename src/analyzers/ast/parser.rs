//! Recursive-descent reader that turns PowerShell tokens into a [`SyntaxTree`].
//!
//! The parser is structural rather than a full grammar: it recognises the
//! constructs the rules care about (assignments, strings, commands, member
//! calls, parameters, try blocks, pipelines, functions) and walks through
//! everything else while keeping brackets balanced. Unbalanced brackets and
//! unterminated strings are reported as [`Error::Parse`].

use super::lexer::{tokenize, Token, TokenKind};
use super::syntax::{
    Attribute, CommandElement, ElementKind, NodeId, NodeKind, QuoteKind, SyntaxTree, TreeBuilder,
};
use crate::error::{Error, Result};

type Parsed = Result<Vec<NodeId>>;

/// Parse PowerShell source into a syntax tree.
pub fn parse_script(source: &str) -> Result<SyntaxTree> {
    let mut builder = TreeBuilder::new(source);
    let lexed = tokenize(source).map_err(|e| {
        let (line, column) = builder.position(e.offset);
        Error::Parse {
            line,
            column,
            message: e.message,
        }
    })?;
    for &(start, end) in &lexed.comments {
        builder.add_comment(start, end);
    }
    Parser {
        src: source,
        tokens: lexed.tokens,
        pos: 0,
        last_end: 0,
        depth: 0,
        builder,
    }
    .parse()
}

/// Where an expression stops, beyond the closing brackets that always end it.
#[derive(Debug, Clone, Copy)]
struct ExprStop {
    comma: bool,
    newline: bool,
    assign: bool,
}

const STATEMENT: ExprStop = ExprStop {
    comma: false,
    newline: true,
    assign: true,
};

const ARGUMENT: ExprStop = ExprStop {
    comma: true,
    newline: false,
    assign: false,
};

const PARAM_DEFAULT: ExprStop = ExprStop {
    comma: true,
    newline: true,
    assign: false,
};

const INDEX: ExprStop = ExprStop {
    comma: false,
    newline: false,
    assign: false,
};

/// Bound on nested blocks, groupings and operands. Deeper input is rejected
/// before recursion can exhaust the stack.
const MAX_DEPTH: usize = 100;

const BLOCK_KEYWORDS: &[&str] = &[
    "begin",
    "process",
    "end",
    "clean",
    "dynamicparam",
    "do",
    "finally",
    "else",
];

const PAREN_KEYWORDS: &[&str] = &["if", "elseif", "while", "for", "foreach", "switch", "until"];

const NAMED_KEYWORDS: &[&str] = &["class", "enum", "data", "configuration", "trap"];

const FLOW_KEYWORDS: &[&str] = &["return", "throw", "exit", "break", "continue"];

struct Checkpoint {
    pos: usize,
    last_end: usize,
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    /// End offset of the last consumed token other than a newline.
    last_end: usize,
    /// Current recursion depth through statement lists and operands.
    depth: usize,
    builder: TreeBuilder,
}

impl<'s> Parser<'s> {
    fn parse(mut self) -> Result<SyntaxTree> {
        let children = self.parse_statements(None)?;
        let root = self
            .builder
            .push(NodeKind::Script, 0, self.src.len(), children);
        Ok(self.builder.finish(root))
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<Token> {
        self.tokens.get(self.pos + ahead).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.pos += 1;
        if token.kind != TokenKind::Newline {
            self.last_end = token.end;
        }
        Some(token)
    }

    fn text(&self, token: Token) -> &'s str {
        token.text(self.src)
    }

    fn is_word(&self, token: Token, word: &str) -> bool {
        token.kind == TokenKind::Word && self.text(token).eq_ignore_ascii_case(word)
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            last_end: self.last_end,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.last_end = checkpoint.last_end;
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> Error {
        let (line, column) = self.builder.position(offset);
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        let offset = self.peek().map_or(self.src.len(), |t| t.start);
        self.error_at(offset, message)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.bump();
                Ok(token)
            }
            Some(token) => Err(self.error_at(
                token.start,
                format!("expected '{}' but found '{}'", what, self.text(token)),
            )),
            None => Err(self.error_at(self.src.len(), format!("expected '{}' before end of script", what))),
        }
    }

    fn slice(&self, start: usize, end: usize) -> &'s str {
        self.src.get(start..end.max(start)).unwrap_or("").trim()
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error_here("nesting too deep"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ---- statements ----

    fn parse_statements(&mut self, close: Option<TokenKind>) -> Parsed {
        self.nested(|p| p.parse_statement_list(close))
    }

    fn parse_statement_list(&mut self, close: Option<TokenKind>) -> Parsed {
        let mut nodes = Vec::new();
        loop {
            match self.peek_kind() {
                None => {
                    if let Some(kind) = close {
                        return Err(self.error_here(format!("missing closing {}", closer_name(kind))));
                    }
                    break;
                }
                Some(kind) if Some(kind) == close => break,
                Some(TokenKind::Newline | TokenKind::Semicolon | TokenKind::ChainOperator) => {
                    self.bump();
                }
                Some(TokenKind::RParen | TokenKind::RBrace | TokenKind::RBracket) => {
                    let token = self.peek().map(|t| self.text(t)).unwrap_or_default();
                    return Err(self.error_here(format!("unexpected '{}'", token)));
                }
                Some(_) => {
                    let before = self.pos;
                    nodes.extend(self.parse_statement()?);
                    if self.pos == before {
                        self.bump();
                    }
                }
            }
        }
        Ok(nodes)
    }

    fn parse_statement(&mut self) -> Parsed {
        let Some(token) = self.peek() else {
            return Ok(Vec::new());
        };
        if token.kind == TokenKind::Word {
            let keyword = self.text(token).to_ascii_lowercase();
            let keyword = keyword.as_str();
            match keyword {
                "function" | "filter" | "workflow" => return self.parse_function(),
                "param" if self.next_significant_is(TokenKind::LParen) => {
                    return self.parse_param_block()
                }
                "try" if self.next_significant_is(TokenKind::LBrace) => return self.parse_try(),
                _ if PAREN_KEYWORDS.contains(&keyword)
                    && (self.next_significant_is(TokenKind::LParen)
                        || self.next_significant_is(TokenKind::Parameter)) =>
                {
                    return self.parse_keyword_statement(keyword)
                }
                _ if BLOCK_KEYWORDS.contains(&keyword)
                    && self.next_significant_is(TokenKind::LBrace) =>
                {
                    return self.parse_keyword_statement(keyword)
                }
                _ if NAMED_KEYWORDS.contains(&keyword) => return self.parse_keyword_statement(keyword),
                _ if FLOW_KEYWORDS.contains(&keyword) => {
                    self.bump();
                    if self.at_statement_end() {
                        return Ok(Vec::new());
                    }
                    return self.parse_pipeline();
                }
                _ => {}
            }
        }
        self.parse_pipeline()
    }

    /// Next token after the current one, skipping newlines, has `kind`.
    fn next_significant_is(&self, kind: TokenKind) -> bool {
        let mut ahead = 1;
        while let Some(token) = self.peek_at(ahead) {
            if token.kind != TokenKind::Newline {
                return token.kind == kind;
            }
            ahead += 1;
        }
        false
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            None | Some(
                TokenKind::Newline
                    | TokenKind::Semicolon
                    | TokenKind::RParen
                    | TokenKind::RBrace
                    | TokenKind::Pipe
                    | TokenKind::ChainOperator
            )
        )
    }

    fn parse_function(&mut self) -> Parsed {
        let Some(keyword) = self.bump() else {
            return Ok(Vec::new());
        };
        let name = match self.peek() {
            Some(token) if token.kind == TokenKind::Word => {
                self.bump();
                let raw = self.text(token);
                raw.rsplit_once(':').map_or(raw, |(_, n)| n).to_string()
            }
            _ => String::new(),
        };
        let mut children = Vec::new();
        self.skip_newlines();
        if self.at(TokenKind::LParen) {
            self.bump();
            children.extend(self.parse_parameter_list()?);
            self.skip_newlines();
        }
        self.expect(TokenKind::LBrace, "{")?;
        children.extend(self.parse_statements(Some(TokenKind::RBrace))?);
        let close = self.expect(TokenKind::RBrace, "}")?;
        let id = self.builder.push(
            NodeKind::FunctionDefinition { name },
            keyword.start,
            close.end,
            children,
        );
        Ok(vec![id])
    }

    fn parse_param_block(&mut self) -> Parsed {
        self.bump();
        self.skip_newlines();
        self.expect(TokenKind::LParen, "(")?;
        self.parse_parameter_list()
    }

    /// Parameters up to and including the closing `)`.
    fn parse_parameter_list(&mut self) -> Parsed {
        let mut params = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                None => return Err(self.error_here("missing closing ')' in parameter list")),
                Some(TokenKind::RParen) => {
                    self.bump();
                    break;
                }
                Some(TokenKind::Comma) => {
                    self.bump();
                    continue;
                }
                _ => {}
            }
            let Some(first) = self.peek() else { continue };
            let mut attributes = Vec::new();
            let mut type_name = None;
            while self.at(TokenKind::LBracket) {
                let (inner_start, inner_end) = self.skip_brackets()?;
                let inner = self.slice(inner_start, inner_end);
                match inner.find('(') {
                    Some(open) => {
                        let close = inner.rfind(')').unwrap_or(inner.len()).max(open + 1);
                        attributes.push(Attribute {
                            name: inner[..open].trim().to_string(),
                            arguments: inner[open + 1..close].trim().to_string(),
                        });
                    }
                    None => type_name = Some(inner.to_string()),
                }
                self.skip_newlines();
            }
            let variable = match self.peek() {
                Some(token) if token.kind == TokenKind::Variable => {
                    self.bump();
                    token
                }
                Some(token) if matches!(token.kind, TokenKind::RParen | TokenKind::Comma) => continue,
                Some(_) => {
                    self.bump();
                    continue;
                }
                None => continue,
            };
            let name = variable_name(self.text(variable));
            let mut children = Vec::new();
            let mut default = None;
            if self.at(TokenKind::Assign) {
                self.bump();
                let (start, end, nodes) = self.parse_expression(PARAM_DEFAULT)?;
                default = Some(self.slice(start, end).to_string());
                children = nodes;
            }
            let end = self.last_end.max(variable.end);
            let comment = self.adjacent_comment(first.start, end);
            let id = self.builder.push(
                NodeKind::ParameterDeclaration {
                    name,
                    type_name,
                    attributes,
                    default,
                    comment,
                },
                first.start,
                end,
                children,
            );
            params.push(id);
        }
        Ok(params)
    }

    /// A comment on the line directly above `start`, or trailing on the line of `end`.
    fn adjacent_comment(&self, start: usize, end: usize) -> Option<String> {
        let first_line = self.builder.line_of(start);
        let last_line = self.builder.line_of(end);
        self.builder
            .comments()
            .iter()
            .find(|c| {
                c.range.end_line + 1 == first_line
                    || (c.range.start_line == last_line && c.range.start_offset >= end)
            })
            .map(|c| c.text.clone())
    }

    fn parse_try(&mut self) -> Parsed {
        let Some(keyword) = self.bump() else {
            return Ok(Vec::new());
        };
        self.skip_newlines();
        self.expect(TokenKind::LBrace, "{")?;
        let body = self.parse_statements(Some(TokenKind::RBrace))?;
        let close = self.expect(TokenKind::RBrace, "}")?;
        let mut nodes = vec![self
            .builder
            .push(NodeKind::TryBlock, keyword.start, close.end, body)];
        loop {
            let checkpoint = self.checkpoint();
            self.skip_newlines();
            match self.peek() {
                Some(token) if self.is_word(token, "catch") => {
                    self.bump();
                    loop {
                        match self.peek_kind() {
                            Some(TokenKind::LBracket) => {
                                self.skip_brackets()?;
                            }
                            Some(TokenKind::Comma | TokenKind::Newline) => {
                                self.bump();
                            }
                            _ => break,
                        }
                    }
                    nodes.push(self.parse_block()?);
                }
                Some(token) if self.is_word(token, "finally") => {
                    self.bump();
                    self.skip_newlines();
                    nodes.push(self.parse_block()?);
                }
                _ => {
                    self.restore(checkpoint);
                    break;
                }
            }
        }
        Ok(nodes)
    }

    fn parse_block(&mut self) -> Result<NodeId> {
        let open = self.expect(TokenKind::LBrace, "{")?;
        let children = self.parse_statements(Some(TokenKind::RBrace))?;
        let close = self.expect(TokenKind::RBrace, "}")?;
        Ok(self
            .builder
            .push(NodeKind::ScriptBlock, open.start, close.end, children))
    }

    /// `if`, loops, `switch`, named blocks, `class` and friends: a keyword
    /// followed by any mix of conditions in parentheses and bodies in braces.
    fn parse_keyword_statement(&mut self, keyword: &str) -> Parsed {
        let continuations: &[&str] = match keyword {
            "if" | "elseif" => &["else", "elseif"],
            "do" => &["while", "until"],
            _ => &[],
        };
        let allows_names = NAMED_KEYWORDS.contains(&keyword);
        self.bump();
        let mut nodes = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::LParen) => {
                    self.bump();
                    nodes.extend(self.parse_statements(Some(TokenKind::RParen))?);
                    self.expect(TokenKind::RParen, ")")?;
                }
                Some(TokenKind::LBrace) => {
                    nodes.push(self.parse_block()?);
                    let checkpoint = self.checkpoint();
                    self.skip_newlines();
                    match self.peek() {
                        Some(token)
                            if continuations
                                .iter()
                                .any(|c| self.is_word(token, c)) =>
                        {
                            self.bump();
                        }
                        _ => {
                            self.restore(checkpoint);
                            break;
                        }
                    }
                }
                Some(TokenKind::Parameter) => {
                    self.bump();
                }
                Some(TokenKind::LBracket) => {
                    self.skip_brackets()?;
                }
                Some(TokenKind::Word | TokenKind::Member) if allows_names => {
                    self.bump();
                }
                Some(TokenKind::Newline) => {
                    let checkpoint = self.checkpoint();
                    self.skip_newlines();
                    if !self.at(TokenKind::LBrace) {
                        self.restore(checkpoint);
                        break;
                    }
                }
                _ => break,
            }
        }
        Ok(nodes)
    }

    // ---- pipelines and commands ----

    fn parse_pipeline(&mut self) -> Parsed {
        let start = self.peek().map_or(self.last_end, |t| t.start);
        let mut elements = Vec::new();
        loop {
            elements.push(self.parse_pipeline_element()?);
            if self.at(TokenKind::Pipe) {
                self.bump();
                self.skip_newlines();
                continue;
            }
            // a pipe may lead the next line
            let checkpoint = self.checkpoint();
            self.skip_newlines();
            if self.at(TokenKind::Pipe) {
                self.bump();
                self.skip_newlines();
                continue;
            }
            self.restore(checkpoint);
            break;
        }
        if elements.len() < 2 {
            return Ok(elements.pop().unwrap_or_default());
        }
        let children: Vec<NodeId> = elements.into_iter().flatten().collect();
        let end = self.last_end.max(start);
        Ok(vec![self.builder.push(NodeKind::Pipeline, start, end, children)])
    }

    fn parse_pipeline_element(&mut self) -> Parsed {
        let Some(token) = self.peek() else {
            return Ok(Vec::new());
        };
        match token.kind {
            TokenKind::Ampersand => {
                self.bump();
                return self.parse_command(token.start, None);
            }
            TokenKind::Operator if self.text(token) == "." => {
                self.bump();
                return self.parse_command(token.start, None);
            }
            TokenKind::Word if !self.text(token).starts_with(|c: char| c.is_ascii_digit()) => {
                return self.parse_command(token.start, Some(token));
            }
            _ => {}
        }

        let (start, end, mut nodes) = self.parse_expression(STATEMENT)?;
        let Some(op) = self.peek().filter(|t| t.kind == TokenKind::Assign) else {
            return Ok(nodes);
        };
        self.bump();
        self.skip_newlines();
        let value_start = self.peek().map_or(op.end, |t| t.start);
        nodes.extend(self.parse_statement()?);
        let value_end = self.last_end.max(value_start);
        let kind = NodeKind::Assignment {
            target: self.slice(start, end).to_string(),
            operator: self.text(op).to_string(),
            value: self.slice(value_start, value_end).to_string(),
        };
        Ok(vec![self.builder.push(kind, start, value_end, nodes)])
    }

    fn parse_command(&mut self, start: usize, name_token: Option<Token>) -> Parsed {
        let mut children = Vec::new();
        let name = match name_token {
            Some(token) => {
                self.bump();
                self.text(token).to_string()
            }
            None => {
                let first = self.peek().map_or(start, |t| t.start);
                children.extend(self.parse_primary()?);
                unquote(self.slice(first, self.last_end)).to_string()
            }
        };

        let mut elements: Vec<CommandElement> = Vec::new();
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Pipe
                | TokenKind::RParen
                | TokenKind::RBrace
                | TokenKind::RBracket
                | TokenKind::ChainOperator => break,
                TokenKind::Parameter => {
                    self.bump();
                    let raw = self.text(token);
                    let param = raw.trim_start_matches('-').trim_end_matches(':').to_string();
                    elements.push(CommandElement {
                        kind: ElementKind::Parameter(param),
                        text: raw.to_string(),
                        range: self.builder.range(token.start, token.end),
                    });
                    if raw.ends_with(':') && !self.at_statement_end() {
                        let (element, nodes) = self.parse_command_argument()?;
                        elements.push(element);
                        children.extend(nodes);
                    }
                }
                TokenKind::Comma => {
                    self.bump();
                    self.skip_newlines();
                    if self.at_statement_end() {
                        continue;
                    }
                    let (element, nodes) = self.parse_command_argument()?;
                    children.extend(nodes);
                    match elements.last_mut() {
                        // `-ArgumentList $user, $password` is a single array argument
                        Some(last) if last.is_argument() => {
                            let merged_start = last.range.start_offset;
                            let merged_end = element.range.end_offset;
                            last.text = self.slice(merged_start, merged_end).to_string();
                            last.range = self.builder.range(merged_start, merged_end);
                        }
                        _ => elements.push(element),
                    }
                }
                TokenKind::Operator if is_redirection(self.text(token)) => {
                    self.bump();
                    if !self.at_statement_end() && !self.text(token).contains('&') {
                        // redirection target is not an argument
                        let (_, nodes) = self.parse_command_argument()?;
                        children.extend(nodes);
                    }
                }
                TokenKind::Assign => {
                    self.bump();
                }
                _ => {
                    let (element, nodes) = self.parse_command_argument()?;
                    elements.push(element);
                    children.extend(nodes);
                }
            }
        }

        let end = self.last_end.max(start);
        let kind = NodeKind::CommandInvocation { name, elements };
        Ok(vec![self.builder.push(kind, start, end, children)])
    }

    fn parse_command_argument(&mut self) -> Result<(CommandElement, Vec<NodeId>)> {
        let start = self.peek().map_or(self.last_end, |t| t.start);
        let nodes = match self.peek() {
            Some(token) if token.kind == TokenKind::Word => {
                self.bump();
                let kind = NodeKind::StringLiteral {
                    value: self.text(token).to_string(),
                    quote: QuoteKind::Bare,
                };
                vec![self.builder.push(kind, token.start, token.end, Vec::new())]
            }
            _ => self.parse_primary()?,
        };
        let end = self.last_end.max(start);
        let element = CommandElement {
            kind: ElementKind::Argument,
            text: self.slice(start, end).to_string(),
            range: self.builder.range(start, end),
        };
        Ok((element, nodes))
    }

    // ---- expressions ----

    /// Returns the start and end offsets of the expression and the nodes found in it.
    fn parse_expression(&mut self, stop: ExprStop) -> Result<(usize, usize, Vec<NodeId>)> {
        let start = self.peek().map_or(self.last_end, |t| t.start);
        let mut nodes = Vec::new();
        while let Some(token) = self.peek() {
            let terminates = match token.kind {
                TokenKind::Semicolon
                | TokenKind::Pipe
                | TokenKind::RParen
                | TokenKind::RBrace
                | TokenKind::RBracket
                | TokenKind::ChainOperator => true,
                TokenKind::Newline => stop.newline,
                TokenKind::Comma => stop.comma,
                TokenKind::Assign => stop.assign,
                // `[CmdletBinding()]param(` on one line
                TokenKind::Word => {
                    self.is_word(token, "param")
                        && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::LParen)
                }
                _ => false,
            };
            if terminates {
                break;
            }
            if token.kind == TokenKind::Newline {
                self.bump();
                continue;
            }
            nodes.extend(self.parse_primary()?);
        }
        let end = self.last_end.max(start);
        Ok((start, end, nodes))
    }

    /// One operand with its member/index postfix chain. Always consumes a token.
    fn parse_primary(&mut self) -> Parsed {
        self.nested(Self::parse_operand)
    }

    fn parse_operand(&mut self) -> Parsed {
        let Some(token) = self.peek() else {
            return Ok(Vec::new());
        };
        let target_start = token.start;
        let mut nodes = match token.kind {
            TokenKind::LBracket => {
                self.skip_brackets()?;
                Vec::new()
            }
            TokenKind::Variable | TokenKind::Word => {
                self.bump();
                Vec::new()
            }
            TokenKind::StringLiteral(quote) => {
                self.bump();
                vec![self.string_node(token, quote)]
            }
            TokenKind::LParen | TokenKind::SubExprStart | TokenKind::ArrayStart => {
                self.bump();
                let inner = self.parse_statements(Some(TokenKind::RParen))?;
                self.expect(TokenKind::RParen, ")")?;
                inner
            }
            TokenKind::HashStart => {
                self.bump();
                self.parse_hashtable()?
            }
            TokenKind::LBrace => vec![self.parse_block()?],
            _ => {
                self.bump();
                return Ok(Vec::new());
            }
        };
        self.parse_postfix(target_start, &mut nodes)?;
        Ok(nodes)
    }

    fn parse_postfix(&mut self, target_start: usize, nodes: &mut Vec<NodeId>) -> Result<()> {
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Dot | TokenKind::ColonColon if !token.spaced => {
                    let is_static = token.kind == TokenKind::ColonColon;
                    self.bump();
                    let Some(member) = self.peek().filter(|t| t.kind == TokenKind::Member) else {
                        break;
                    };
                    self.bump();
                    let call = self
                        .peek()
                        .is_some_and(|t| t.kind == TokenKind::LParen && !t.spaced);
                    if !call {
                        continue;
                    }
                    self.bump();
                    let (arguments, argument_nodes) = self.parse_argument_list()?;
                    let mut children = std::mem::take(nodes);
                    children.extend(argument_nodes);
                    let kind = NodeKind::MemberInvocation {
                        target: self.slice(target_start, token.start).to_string(),
                        member: self.text(member).to_string(),
                        is_static,
                        arguments,
                    };
                    let id = self
                        .builder
                        .push(kind, target_start, self.last_end, children);
                    nodes.push(id);
                }
                TokenKind::LBracket if !token.spaced => {
                    self.bump();
                    let (_, _, inner) = self.parse_expression(INDEX)?;
                    nodes.extend(inner);
                    self.expect(TokenKind::RBracket, "]")?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Method arguments up to and including the closing `)`.
    fn parse_argument_list(&mut self) -> Result<(Vec<String>, Vec<NodeId>)> {
        let mut arguments = Vec::new();
        let mut nodes = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                None => return Err(self.error_here("missing closing ')' in argument list")),
                Some(TokenKind::RParen) => {
                    self.bump();
                    break;
                }
                Some(TokenKind::Comma) => {
                    self.bump();
                    continue;
                }
                _ => {}
            }
            let before = self.pos;
            let (start, end, inner) = self.parse_expression(ARGUMENT)?;
            if self.pos == before {
                let found = self.peek().map(|t| self.text(t)).unwrap_or_default();
                return Err(self.error_here(format!("unexpected '{}' in argument list", found)));
            }
            arguments.push(self.slice(start, end).to_string());
            nodes.extend(inner);
        }
        Ok((arguments, nodes))
    }

    /// Hashtable entries up to and including the closing `}`.
    fn parse_hashtable(&mut self) -> Parsed {
        let mut nodes = Vec::new();
        loop {
            match self.peek_kind() {
                None => return Err(self.error_here("missing closing '}' in hashtable")),
                Some(TokenKind::RBrace) => {
                    self.bump();
                    break;
                }
                Some(TokenKind::Newline | TokenKind::Semicolon) => {
                    self.bump();
                    continue;
                }
                Some(TokenKind::RParen | TokenKind::RBracket) => {
                    return Err(self.error_here("unbalanced bracket in hashtable"));
                }
                _ => {}
            }
            nodes.extend(self.parse_primary()?);
            if self.at(TokenKind::Assign) {
                self.bump();
                self.skip_newlines();
                nodes.extend(self.parse_statement()?);
            }
        }
        Ok(nodes)
    }

    /// Skip a balanced `[ ... ]`, returning the offsets of its contents.
    fn skip_brackets(&mut self) -> Result<(usize, usize)> {
        let open = self.expect(TokenKind::LBracket, "[")?;
        let mut depth = 1usize;
        loop {
            let Some(token) = self.bump() else {
                return Err(self.error_at(open.start, "missing closing ']'"));
            };
            match token.kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((open.end, token.start));
                    }
                }
                _ => {}
            }
        }
    }

    fn string_node(&mut self, token: Token, quote: QuoteKind) -> NodeId {
        let value = string_value(self.text(token), quote);
        self.builder.push(
            NodeKind::StringLiteral { value, quote },
            token.start,
            token.end,
            Vec::new(),
        )
    }
}

fn closer_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::RParen => "')'",
        TokenKind::RBrace => "'}'",
        TokenKind::RBracket => "']'",
        _ => "bracket",
    }
}

fn is_redirection(op: &str) -> bool {
    op.starts_with('>') || op.starts_with('<') || op.starts_with(|c: char| c.is_ascii_digit())
}

/// `$Name`, `${Name}` or `$script:Name` → `Name`.
fn variable_name(raw: &str) -> String {
    let name = raw.trim_start_matches(['$', '@']);
    let name = name
        .strip_prefix('{')
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    name.rsplit_once(':').map_or(name, |(_, n)| n).to_string()
}

fn unquote(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    raw
}

/// Contents of a string literal without its quotes.
fn string_value(raw: &str, quote: QuoteKind) -> String {
    match quote {
        QuoteKind::Single => unquote(raw).replace("''", "'"),
        QuoteKind::Double => unquote(raw).replace("\"\"", "\""),
        QuoteKind::SingleHere | QuoteKind::DoubleHere => {
            let body = raw.get(2..raw.len().saturating_sub(2)).unwrap_or("");
            let body = body.split_once('\n').map_or("", |(_, rest)| rest);
            body.strip_suffix('\n')
                .map(|b| b.strip_suffix('\r').unwrap_or(b))
                .unwrap_or(body)
                .to_string()
        }
        QuoteKind::Bare => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<&'static str> {
        let tree = parse_script(source).unwrap();
        tree.find_all(|_| true).iter().map(|n| n.kind().name()).collect()
    }

    #[test]
    fn test_assignment_with_string() {
        let tree = parse_script("$password = \"MyPassword123\"").unwrap();
        let assignments = tree.assignments();
        assert_eq!(assignments.len(), 1);
        match assignments[0].kind() {
            NodeKind::Assignment {
                target,
                operator,
                value,
            } => {
                assert_eq!(target, "$password");
                assert_eq!(operator, "=");
                assert_eq!(value, "\"MyPassword123\"");
            }
            other => panic!("unexpected {:?}", other),
        }
        let literal = tree.string_literals()[0];
        assert_eq!(literal.parent(), Some(assignments[0]));
        assert!(matches!(
            literal.kind(),
            NodeKind::StringLiteral { value, quote: QuoteKind::Double } if value == "MyPassword123"
        ));
    }

    #[test]
    fn test_command_elements() {
        let tree = parse_script("ConvertTo-SecureString 'P@ssw0rd!' -AsPlainText -Force").unwrap();
        let command = tree.commands_named(&["convertto-securestring"])[0];
        assert!(command.has_switch("AsPlainText"));
        assert!(command.has_switch("force"));
        let positional = command.positional_arguments(&["AsPlainText", "Force"]);
        assert_eq!(positional.len(), 1);
        assert_eq!(positional[0].text, "'P@ssw0rd!'");
    }

    #[test]
    fn test_parameter_value_lookup() {
        let tree = parse_script("Add-Type -TypeDefinition $source -Language CSharp").unwrap();
        let command = tree.commands_named(&["add-type"])[0];
        assert_eq!(command.parameter_value(&["TypeDefinition"]).unwrap().text, "$source");
        assert_eq!(command.parameter_value(&["language"]).unwrap().text, "CSharp");
        assert!(command.parameter_value(&["Path"]).is_none());
    }

    #[test]
    fn test_argument_list_is_merged() {
        let tree = parse_script("New-Object PSCredential -ArgumentList $user, $password").unwrap();
        let command = tree.commands_named(&["new-object"])[0];
        assert_eq!(
            command.parameter_value(&["ArgumentList"]).unwrap().text,
            "$user, $password"
        );
    }

    #[test]
    fn test_param_block() {
        let source = r#"
[CmdletBinding()]
param(
    # Security group allowed to use FAS
    [Parameter(Mandatory = $true)]
    [ValidatePattern('^S-1-5-21-\d+')]
    [string]$FASSecurityGroupSID,

    [string]$Password = "Default123",
    $Untyped
)
"#;
        let tree = parse_script(source).unwrap();
        let params = tree.parameters();
        assert_eq!(params.len(), 3);
        match params[0].kind() {
            NodeKind::ParameterDeclaration {
                name,
                type_name,
                attributes,
                comment,
                ..
            } => {
                assert_eq!(name, "FASSecurityGroupSID");
                assert_eq!(type_name.as_deref(), Some("string"));
                assert_eq!(attributes.len(), 2);
                assert!(attributes[1].is_named("ValidatePattern"));
                assert_eq!(attributes[1].arguments, r"'^S-1-5-21-\d+'");
                assert!(comment.as_deref().unwrap().contains("Security group"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match params[1].kind() {
            NodeKind::ParameterDeclaration { default, comment, .. } => {
                assert_eq!(default.as_deref(), Some("\"Default123\""));
                assert!(comment.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        let literal = tree.string_literals()[0];
        assert_eq!(literal.enclosing_parameter(), Some(params[1]));
        match params[2].kind() {
            NodeKind::ParameterDeclaration { type_name, .. } => assert!(type_name.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_function_with_inline_parameters() {
        let tree = parse_script("function Set-Secret([string]$Key) { Write-Host $Key }").unwrap();
        let functions = tree.find_all(|n| matches!(n.kind(), NodeKind::FunctionDefinition { .. }));
        assert_eq!(functions.len(), 1);
        let params = tree.parameters();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].parent(), Some(functions[0]));
        assert_eq!(tree.commands_named(&["write-host"]).len(), 1);
    }

    #[test]
    fn test_try_catch_structure() {
        let source = "try {\n  Get-ADUser -Identity jdoe\n}\ncatch [System.Exception] {\n  Get-ADGroup x\n}\nfinally { }";
        let tree = parse_script(source).unwrap();
        let user = tree.commands_named(&["get-aduser"])[0];
        let group = tree.commands_named(&["get-adgroup"])[0];
        assert!(user.is_within_try());
        assert!(!group.is_within_try());
    }

    #[test]
    fn test_pipeline_predecessor() {
        let tree = parse_script("Invoke-WebRequest $url | Invoke-Expression").unwrap();
        let iex = tree.commands_named(&["invoke-expression"])[0];
        let previous = iex.pipeline_predecessor().unwrap();
        assert_eq!(previous.command_name(), Some("Invoke-WebRequest"));
        assert_eq!(kinds("a | b"), vec!["script", "pipeline", "command_invocation", "command_invocation"]);
    }

    #[test]
    fn test_static_member_invocation() {
        let tree = parse_script("$sb = [ScriptBlock]::Create($code)\n$sb.Invoke()").unwrap();
        let calls = tree.member_invocations();
        assert_eq!(calls.len(), 2);
        match calls[0].kind() {
            NodeKind::MemberInvocation {
                target,
                member,
                is_static,
                arguments,
            } => {
                assert_eq!(target, "[ScriptBlock]");
                assert_eq!(member, "Create");
                assert!(*is_static);
                assert_eq!(arguments, &vec!["$code".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match calls[1].kind() {
            NodeKind::MemberInvocation { target, member, is_static, .. } => {
                assert_eq!(target, "$sb");
                assert_eq!(member, "Invoke");
                assert!(!*is_static);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chained_member_calls_nest() {
        let tree = parse_script("(New-Object Net.WebClient).DownloadString($u)").unwrap();
        let call = tree.member_invocations()[0];
        let command = tree.commands_named(&["new-object"])[0];
        assert_eq!(command.parent(), Some(call));
    }

    #[test]
    fn test_hashtable_values_are_visited() {
        let tree = parse_script("$cfg = @{\n  Server = 'dc01'\n  Secret = \"abc\"\n}").unwrap();
        assert_eq!(tree.string_literals().len(), 2);
    }

    #[test]
    fn test_control_flow_bodies() {
        let source = "if ($a -eq 1) {\n  Invoke-Expression $x\n}\nelse {\n  iex $y\n}\nforeach ($i in $items) { Get-Item $i }";
        let tree = parse_script(source).unwrap();
        assert_eq!(tree.commands_named(&["invoke-expression", "iex"]).len(), 2);
        assert_eq!(tree.commands_named(&["get-item"]).len(), 1);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let source = format!("$x = {}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse_script(&source).unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message == "nesting too deep"));

        let source = format!("$x = {}1{}", "$a[".repeat(5_000), "]".repeat(5_000));
        assert!(parse_script(&source).is_err());

        let source = format!("{}{}", "if ($a) {\n".repeat(5_000), "}\n".repeat(5_000));
        assert!(parse_script(&source).is_err());
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let source = format!("$x = {}1{}", "(".repeat(30), ")".repeat(30));
        assert!(parse_script(&source).is_ok());
    }

    #[test]
    fn test_unbalanced_braces_are_errors() {
        assert!(matches!(parse_script("function f {"), Err(Error::Parse { .. })));
        assert!(matches!(parse_script("Get-Item )"), Err(Error::Parse { .. })));
        let err = parse_script("$a = 1\n$b = 'open").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, column: 6, .. }));
    }

    #[test]
    fn test_string_values() {
        assert_eq!(string_value("'it''s'", QuoteKind::Single), "it's");
        assert_eq!(string_value("@\"\nline one\nline two\n\"@", QuoteKind::DoubleHere), "line one\nline two");
        assert_eq!(variable_name("${script:Foo}"), "Foo");
        assert_eq!(variable_name("$env:PASSWORD"), "PASSWORD");
    }

    #[test]
    fn test_find_all_is_stable() {
        let source = "param([string]$a)\n$b = 'x' | Out-Null\ntry { iex $c } catch { }";
        let tree = parse_script(source).unwrap();
        let first: Vec<_> = tree.find_all(|_| true).iter().map(|n| n.id()).collect();
        let second: Vec<_> = tree.find_all(|_| true).iter().map(|n| n.id()).collect();
        assert_eq!(first, second);
    }
}
