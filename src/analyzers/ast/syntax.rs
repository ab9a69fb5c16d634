//! Syntax tree for PowerShell scripts.
//!
//! The tree is an immutable arena built once per scan by the parser. Rules
//! read it through [`Node`], a cheap copyable view that mirrors the
//! navigation API of a tree-sitter node (`kind`, `parent`, `children`,
//! `text`).

use crate::types::SourceRange;
use std::fmt;

pub type NodeId = usize;

/// How a string literal was quoted in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    /// `'...'`
    Single,
    /// `"..."`
    Double,
    /// `@'...'@`
    SingleHere,
    /// `@"..."@`
    DoubleHere,
    /// Unquoted command argument (`Get-ADUser -Identity jdoe`).
    Bare,
}

impl QuoteKind {
    /// Whether `$var` and `$(...)` inside the literal are expanded at runtime.
    pub fn is_expandable(self) -> bool {
        matches!(self, QuoteKind::Double | QuoteKind::DoubleHere)
    }
}

/// An attribute attached to a parameter, e.g. `[ValidatePattern('^S-1-')]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Raw text between the attribute's parentheses.
    pub arguments: String,
}

impl Attribute {
    pub fn is_named(&self, name: &str) -> bool {
        let own = self.name.trim();
        own.eq_ignore_ascii_case(name)
            || own
                .rsplit('.')
                .next()
                .is_some_and(|short| short.eq_ignore_ascii_case(name))
            || own
                .strip_suffix("Attribute")
                .is_some_and(|short| short.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    /// `-Name`; the stored name has no leading dash or trailing colon.
    Parameter(String),
    Argument,
}

/// One element of a command invocation after the command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandElement {
    pub kind: ElementKind,
    pub text: String,
    pub range: SourceRange,
}

impl CommandElement {
    pub fn parameter_name(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Parameter(name) => Some(name),
            ElementKind::Argument => None,
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.kind, ElementKind::Argument)
    }
}

/// The closed set of node kinds produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Root of the tree.
    Script,
    /// `{ ... }` body of a script block, function, loop or clause.
    ScriptBlock,
    FunctionDefinition {
        name: String,
    },
    /// Two or more elements joined by `|`.
    Pipeline,
    /// Body of a `try` statement. `catch`/`finally` bodies are sibling
    /// script blocks, so only code inside the `try` body is guarded.
    TryBlock,
    Assignment {
        target: String,
        operator: String,
        value: String,
    },
    StringLiteral {
        value: String,
        quote: QuoteKind,
    },
    CommandInvocation {
        name: String,
        elements: Vec<CommandElement>,
    },
    MemberInvocation {
        target: String,
        member: String,
        is_static: bool,
        arguments: Vec<String>,
    },
    ParameterDeclaration {
        name: String,
        type_name: Option<String>,
        attributes: Vec<Attribute>,
        default: Option<String>,
        comment: Option<String>,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Script => "script",
            NodeKind::ScriptBlock => "script_block",
            NodeKind::FunctionDefinition { .. } => "function_definition",
            NodeKind::Pipeline => "pipeline",
            NodeKind::TryBlock => "try_block",
            NodeKind::Assignment { .. } => "assignment",
            NodeKind::StringLiteral { .. } => "string_literal",
            NodeKind::CommandInvocation { .. } => "command_invocation",
            NodeKind::MemberInvocation { .. } => "member_invocation",
            NodeKind::ParameterDeclaration { .. } => "parameter_declaration",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    kind: NodeKind,
    range: SourceRange,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A comment (`# ...` or `<# ... #>`) found while lexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub range: SourceRange,
}

/// Maps byte offsets to 1-based line/column positions.
#[derive(Debug, Clone)]
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// 1-based line and column (in characters) of a byte offset.
    pub(crate) fn position(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let start = self.line_starts[line];
        let column = source
            .get(start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(offset - start);
        (line + 1, column + 1)
    }

    pub(crate) fn range(&self, source: &str, start: usize, end: usize) -> SourceRange {
        let (start_line, start_column) = self.position(source, start);
        let (end_line, end_column) = self.position(source, end);
        SourceRange {
            start_offset: start,
            end_offset: end,
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }
}

/// An immutable parsed script.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    source: String,
    nodes: Vec<NodeData>,
    root: NodeId,
    comments: Vec<Comment>,
}

impl SyntaxTree {
    pub fn root(&self) -> Node<'_> {
        Node {
            tree: self,
            id: self.root,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn node(&self, id: NodeId) -> Option<Node<'_>> {
        (id < self.nodes.len()).then_some(Node { tree: self, id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// All nodes matching `predicate`, in pre-order.
    pub fn find_all<F>(&self, predicate: F) -> Vec<Node<'_>>
    where
        F: Fn(&Node<'_>) -> bool,
    {
        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = Node { tree: self, id };
            if predicate(&node) {
                found.push(node);
            }
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        found
    }

    pub fn assignments(&self) -> Vec<Node<'_>> {
        self.find_all(|n| matches!(n.kind(), NodeKind::Assignment { .. }))
    }

    pub fn string_literals(&self) -> Vec<Node<'_>> {
        self.find_all(|n| matches!(n.kind(), NodeKind::StringLiteral { .. }))
    }

    pub fn parameters(&self) -> Vec<Node<'_>> {
        self.find_all(|n| matches!(n.kind(), NodeKind::ParameterDeclaration { .. }))
    }

    pub fn member_invocations(&self) -> Vec<Node<'_>> {
        self.find_all(|n| matches!(n.kind(), NodeKind::MemberInvocation { .. }))
    }

    /// Command invocations whose name matches one of `names`, ignoring case.
    pub fn commands_named(&self, names: &[&str]) -> Vec<Node<'_>> {
        self.find_all(|n| {
            n.command_name()
                .is_some_and(|name| names.iter().any(|c| name.eq_ignore_ascii_case(c)))
        })
    }
}

/// Borrowed view of a node in a [`SyntaxTree`].
#[derive(Clone, Copy)]
pub struct Node<'t> {
    tree: &'t SyntaxTree,
    id: NodeId,
}

impl<'t> Node<'t> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'t SyntaxTree {
        self.tree
    }

    fn data(&self) -> &'t NodeData {
        &self.tree.nodes[self.id]
    }

    pub fn kind(&self) -> &'t NodeKind {
        &self.data().kind
    }

    pub fn range(&self) -> SourceRange {
        self.data().range
    }

    /// Source text covered by this node.
    pub fn text(&self) -> &'t str {
        let range = self.data().range;
        self.tree
            .source
            .get(range.start_offset..range.end_offset)
            .unwrap_or("")
    }

    pub fn parent(&self) -> Option<Node<'t>> {
        self.data().parent.map(|id| Node {
            tree: self.tree,
            id,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'t>> + 't {
        let tree = self.tree;
        self.data()
            .children
            .iter()
            .map(move |&id| Node { tree, id })
    }

    pub fn child_count(&self) -> usize {
        self.data().children.len()
    }

    /// Parent, grandparent and so on up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Node<'t>> + 't {
        std::iter::successors(self.parent(), |n| n.parent())
    }

    pub fn has_ancestor<F>(&self, predicate: F) -> bool
    where
        F: Fn(&Node<'t>) -> bool,
    {
        self.ancestors().any(|a| predicate(&a))
    }

    pub fn is_within_try(&self) -> bool {
        self.has_ancestor(|a| matches!(a.kind(), NodeKind::TryBlock))
    }

    pub fn enclosing_parameter(&self) -> Option<Node<'t>> {
        self.ancestors()
            .find(|a| matches!(a.kind(), NodeKind::ParameterDeclaration { .. }))
    }

    /// Sibling element immediately before this one when the parent is a pipeline.
    pub fn pipeline_predecessor(&self) -> Option<Node<'t>> {
        let parent = self.parent()?;
        if !matches!(parent.kind(), NodeKind::Pipeline) {
            return None;
        }
        let mut previous = None;
        for child in parent.children() {
            if child.id == self.id {
                return previous;
            }
            previous = Some(child);
        }
        None
    }

    pub fn command_name(&self) -> Option<&'t str> {
        match self.kind() {
            NodeKind::CommandInvocation { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn command_elements(&self) -> &'t [CommandElement] {
        match self.kind() {
            NodeKind::CommandInvocation { elements, .. } => elements,
            _ => &[],
        }
    }

    /// Whether a command carries the switch `-name` (case-insensitive).
    pub fn has_switch(&self, name: &str) -> bool {
        self.command_elements()
            .iter()
            .filter_map(CommandElement::parameter_name)
            .any(|p| p.eq_ignore_ascii_case(name))
    }

    /// Value passed to one of the named parameters: `-Name value` or `-Name:value`.
    pub fn parameter_value(&self, names: &[&str]) -> Option<&'t CommandElement> {
        let elements = self.command_elements();
        elements.iter().enumerate().find_map(|(i, element)| {
            let param = element.parameter_name()?;
            if !names.iter().any(|n| param.eq_ignore_ascii_case(n)) {
                return None;
            }
            elements.get(i + 1).filter(|next| next.is_argument())
        })
    }

    /// Arguments not bound to a named parameter. `switches` lists parameters
    /// that take no value.
    pub fn positional_arguments(&self, switches: &[&str]) -> Vec<&'t CommandElement> {
        let mut positional = Vec::new();
        let mut bound = false;
        for element in self.command_elements() {
            match &element.kind {
                ElementKind::Parameter(name) => {
                    bound = !switches.iter().any(|s| name.eq_ignore_ascii_case(s));
                }
                ElementKind::Argument => {
                    if !bound {
                        positional.push(element);
                    }
                    bound = false;
                }
            }
        }
        positional
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for Node<'_> {}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind().name())
            .field("range", &self.range())
            .finish()
    }
}

/// Bottom-up builder used by the parser: children are pushed before their
/// parent, and the root is pushed last.
pub(crate) struct TreeBuilder {
    source: String,
    index: LineIndex,
    nodes: Vec<NodeData>,
    comments: Vec<Comment>,
}

impl TreeBuilder {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            index: LineIndex::new(source),
            nodes: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub(crate) fn range(&self, start: usize, end: usize) -> SourceRange {
        self.index.range(&self.source, start, end)
    }

    pub(crate) fn line_of(&self, offset: usize) -> usize {
        self.index.position(&self.source, offset).0
    }

    pub(crate) fn position(&self, offset: usize) -> (usize, usize) {
        self.index.position(&self.source, offset)
    }

    pub(crate) fn push(&mut self, kind: NodeKind, start: usize, end: usize, children: Vec<NodeId>) -> NodeId {
        let id = self.nodes.len();
        for &child in &children {
            self.nodes[child].parent = Some(id);
        }
        let range = self.range(start, end);
        self.nodes.push(NodeData {
            kind,
            range,
            parent: None,
            children,
        });
        id
    }

    pub(crate) fn add_comment(&mut self, start: usize, end: usize) {
        let text = self.source.get(start..end).unwrap_or("").to_string();
        let range = self.range(start, end);
        self.comments.push(Comment { text, range });
    }

    pub(crate) fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub(crate) fn finish(self, root: NodeId) -> SyntaxTree {
        SyntaxTree {
            source: self.source,
            nodes: self.nodes,
            root,
            comments: self.comments,
        }
    }
}
