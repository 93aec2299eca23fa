//! The node model shared by parsed source and runtime values.
//!
//! A [`Node`] is a tagged value; list structure is a chain of cons cells and
//! nothing else. The reader produces these, the evaluator consumes and
//! produces them, and closures are just nodes that happen to capture an
//! environment. Nodes are shared (`Rc`) because quoted literals, captured
//! environments and macro expansions all alias subtrees; cons cells carry
//! interior mutability so `rplaca`/`rplacd`/`nconc` can observably mutate
//! shared structure.

use crate::env::EnvRef;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared handle to a node.
pub type NodeRef = Rc<Node>;

/// One cons cell. The only list constructor in the language.
#[derive(Debug)]
pub struct Cons {
    pub car: RefCell<NodeRef>,
    pub cdr: RefCell<NodeRef>,
}

/// A callable: parameter list, body forms and the captured environment.
///
/// `name` is set for callables registered by `defun`/`defmacro` and `None`
/// for anonymous lambdas.
#[derive(Clone)]
pub struct Closure {
    pub name: Option<String>,
    pub params: NodeRef,
    pub body: NodeRef,
    pub env: EnvRef,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The captured environment is omitted: environments reference the
        // closures defined in them, so printing it would not terminate.
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("body", &self.body)
            .finish()
    }
}

/// The tagged value used uniformly for source, data and callables.
#[derive(Debug)]
pub enum Node {
    /// Empty list and falsity. The two are identified.
    Nil,
    /// Canonical truth.
    T,
    Int(i64),
    Float(f64),
    Str(String),
    /// A symbol name. Symbols are not interned.
    Ident(String),
    /// `'x` - evaluates to the child verbatim.
    Quote(NodeRef),
    /// `` `x `` - evaluated by walking the child and splicing unquoted parts.
    Bquote(NodeRef),
    Cell(Cons),
    /// An anonymous function value.
    Lambda(Closure),
    /// A named callable as registered by `defun`/`defmacro`.
    Bound(Closure),
    /// A reified error message. Evaluation normally uses the error channel
    /// instead; this kind exists so error values can live in data.
    Error(String),
}

pub fn nil() -> NodeRef {
    Rc::new(Node::Nil)
}

pub fn t() -> NodeRef {
    Rc::new(Node::T)
}

pub fn int(i: i64) -> NodeRef {
    Rc::new(Node::Int(i))
}

pub fn float(f: f64) -> NodeRef {
    Rc::new(Node::Float(f))
}

pub fn string(s: impl Into<String>) -> NodeRef {
    Rc::new(Node::Str(s.into()))
}

pub fn ident(name: impl Into<String>) -> NodeRef {
    Rc::new(Node::Ident(name.into()))
}

pub fn quote(child: NodeRef) -> NodeRef {
    Rc::new(Node::Quote(child))
}

pub fn bquote(child: NodeRef) -> NodeRef {
    Rc::new(Node::Bquote(child))
}

pub fn error(message: impl Into<String>) -> NodeRef {
    Rc::new(Node::Error(message.into()))
}

/// Allocate one cons cell.
pub fn cons(car: NodeRef, cdr: NodeRef) -> NodeRef {
    Rc::new(Node::Cell(Cons {
        car: RefCell::new(car),
        cdr: RefCell::new(cdr),
    }))
}

/// Build a proper list from the elements; `Nil` when empty.
pub fn list(elems: Vec<NodeRef>) -> NodeRef {
    list_with_tail(elems, nil())
}

/// Build a list ending in `tail` (a dotted pair when `tail` is not a list).
pub fn list_with_tail(elems: Vec<NodeRef>, tail: NodeRef) -> NodeRef {
    let mut out = tail;
    for el in elems.into_iter().rev() {
        out = cons(el, out);
    }
    out
}

impl Node {
    pub fn is_nil(&self) -> bool {
        matches!(self, Node::Nil)
    }

    /// Truthiness as used by `if`, `cond`, `and` and `or`: `t` and non-zero
    /// numbers are true, everything else is false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Node::T => true,
            Node::Int(i) => *i != 0,
            Node::Float(f) => *f != 0.0,
            _ => false,
        }
    }

    pub fn as_cell(&self) -> Option<&Cons> {
        match self {
            Node::Cell(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Node::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// `car` of a cell; `Nil` for anything else.
    pub fn car(&self) -> NodeRef {
        match self {
            Node::Cell(c) => c.car.borrow().clone(),
            _ => nil(),
        }
    }

    /// `cdr` of a cell; `Nil` for anything else.
    pub fn cdr(&self) -> NodeRef {
        match self {
            Node::Cell(c) => c.cdr.borrow().clone(),
            _ => nil(),
        }
    }

    /// Iterate the elements (cars) of the list spine starting at this node.
    /// Stops at the first non-cell, so a dotted tail is not yielded.
    pub fn list_iter(&self) -> ListIter {
        ListIter {
            next: self
                .as_cell()
                .map(|c| (c.car.borrow().clone(), c.cdr.borrow().clone())),
        }
    }

    /// Number of cells in the list spine.
    pub fn list_len(&self) -> usize {
        self.list_iter().count()
    }
}

/// Iterator over the cars of a cell chain.
pub struct ListIter {
    next: Option<(NodeRef, NodeRef)>,
}

impl Iterator for ListIter {
    type Item = NodeRef;

    fn next(&mut self) -> Option<NodeRef> {
        let (car, cdr) = self.next.take()?;
        self.next = cdr
            .as_cell()
            .map(|c| (c.car.borrow().clone(), c.cdr.borrow().clone()));
        Some(car)
    }
}

fn fmt_string(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            '\u{8}' => write!(f, "\\b")?,
            '\u{c}' => write!(f, "\\f")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

/// The printer: the inverse of the reader, used by REPL output and the
/// print builtins. `parse` then `Display` round-trips to the same tree
/// (whitespace and comments aside).
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Nil => write!(f, "nil"),
            Node::T => write!(f, "t"),
            Node::Int(i) => write!(f, "{i}"),
            // {:?} keeps a decimal point on whole floats so the printed
            // form reads back as a float, not an int.
            Node::Float(x) => write!(f, "{x:?}"),
            Node::Str(s) => fmt_string(s, f),
            Node::Ident(name) => write!(f, "{name}"),
            Node::Quote(child) => write!(f, "'{child}"),
            Node::Bquote(child) => write!(f, "`{child}"),
            Node::Cell(cell) => {
                write!(f, "(")?;
                let mut car = cell.car.borrow().clone();
                let mut cdr = cell.cdr.borrow().clone();
                loop {
                    write!(f, "{car}")?;
                    let next = cdr;
                    match &*next {
                        Node::Nil => break,
                        Node::Cell(c) => {
                            write!(f, " ")?;
                            car = c.car.borrow().clone();
                            cdr = c.cdr.borrow().clone();
                        }
                        tail => {
                            write!(f, " . {tail}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Node::Lambda(c) => write!(f, "(lambda {} {})", c.params, c.body.car()),
            Node::Bound(c) => match &c.name {
                Some(name) => write!(f, "(defun {name} {} {})", c.params, c.body.car()),
                None => write!(f, "(lambda {} {})", c.params, c.body.car()),
            },
            Node::Error(msg) => write!(f, "{msg}"),
        }
    }
}

/// Structural equality. Closures compare their shape plus the identity of
/// the captured environment; errors compare by message.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Nil, Node::Nil) | (Node::T, Node::T) => true,
            (Node::Int(a), Node::Int(b)) => a == b,
            (Node::Float(a), Node::Float(b)) => a == b,
            (Node::Str(a), Node::Str(b)) => a == b,
            (Node::Ident(a), Node::Ident(b)) => a == b,
            (Node::Quote(a), Node::Quote(b)) | (Node::Bquote(a), Node::Bquote(b)) => a == b,
            (Node::Cell(a), Node::Cell(b)) => {
                *a.car.borrow() == *b.car.borrow() && *a.cdr.borrow() == *b.cdr.borrow()
            }
            (Node::Lambda(a), Node::Lambda(b)) | (Node::Bound(a), Node::Bound(b)) => {
                a.name == b.name
                    && a.params == b.params
                    && a.body == b.body
                    && Rc::ptr_eq(&a.env, &b.env)
            }
            (Node::Error(a), Node::Error(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_data_driven() {
        let test_cases: Vec<(NodeRef, &str)> = vec![
            (nil(), "nil"),
            (t(), "t"),
            (int(42), "42"),
            (int(-7), "-7"),
            (float(3.5), "3.5"),
            (float(10.0), "10.0"),
            (string("hi"), "\"hi\""),
            (string("a\nb\"c\\d"), "\"a\\nb\\\"c\\\\d\""),
            (ident("foo-bar?"), "foo-bar?"),
            (quote(ident("x")), "'x"),
            (bquote(list(vec![ident("a")])), "`(a)"),
            (list(vec![]), "nil"),
            (list(vec![int(1), int(2), int(3)]), "(1 2 3)"),
            (cons(int(1), int(2)), "(1 . 2)"),
            (
                list_with_tail(vec![int(1), int(2)], int(3)),
                "(1 2 . 3)",
            ),
            (
                list(vec![ident("a"), list(vec![ident("b"), int(1)])]),
                "(a (b 1))",
            ),
            (error("boom"), "boom"),
        ];

        for (i, (node, want)) in test_cases.iter().enumerate() {
            assert_eq!(
                node.to_string(),
                *want,
                "display case {} failed",
                i + 1
            );
        }
    }

    #[test]
    fn test_equality_and_truthiness() {
        assert_eq!(*list(vec![int(1), int(2)]), *list(vec![int(1), int(2)]));
        assert_ne!(*list(vec![int(1)]), *list(vec![int(2)]));
        assert_ne!(*int(1), *float(1.0));
        assert_eq!(*quote(ident("x")), *quote(ident("x")));

        assert!(t().is_truthy());
        assert!(int(1).is_truthy());
        assert!(float(0.5).is_truthy());
        assert!(!int(0).is_truthy());
        assert!(!float(0.0).is_truthy());
        assert!(!nil().is_truthy());
        assert!(!string("t").is_truthy());
        assert!(!list(vec![int(1)]).is_truthy());
    }

    #[test]
    fn test_list_iteration() {
        let xs = list(vec![int(1), int(2), int(3)]);
        let got: Vec<String> = xs.list_iter().map(|n| n.to_string()).collect();
        assert_eq!(got, vec!["1", "2", "3"]);
        assert_eq!(xs.list_len(), 3);

        // Dotted tails are spine cells but the tail itself is not an element.
        let dotted = list_with_tail(vec![int(1), int(2)], int(9));
        assert_eq!(dotted.list_len(), 2);
        assert_eq!(nil().list_len(), 0);
    }

    #[test]
    fn test_cell_mutation_is_shared() {
        let shared = list(vec![int(1), int(2)]);
        let alias = shared.clone();
        if let Node::Cell(c) = &*shared {
            *c.car.borrow_mut() = int(99);
        }
        assert_eq!(alias.to_string(), "(99 2)");
    }
}
