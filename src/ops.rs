//! The operator table: every special form and builtin the evaluator knows.
//!
//! The table is a process-wide, immutable registry built once at first use.
//! Each entry is either a **special form** (receives its arguments
//! unevaluated; the implementations live in [`crate::eval`]) or a
//! **builtin** (receives a freshly evaluated argument chain). Arity is
//! validated at dispatch, before the operator runs, so the implementations
//! can lean on the minimum argument count being present.

use crate::env::{Env, EnvRef};
use crate::eval::{self, ArgsStyle};
use crate::node::{self, Node, NodeRef};
use crate::Error;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Canonical operator signature: the environment and an argument chain.
pub type OpFn = fn(&EnvRef, &NodeRef) -> Result<NodeRef, Error>;

/// Whether an operator sees raw forms or evaluated values.
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Arguments arrive unevaluated.
    Special(OpFn),
    /// Arguments are evaluated left to right into a fresh chain first.
    Builtin(OpFn),
}

/// Expected number of arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn validate(&self, op: &str, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(lo, hi) => got >= lo && got <= hi,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::invalid_args(op))
        }
    }
}

/// One operator table entry.
pub struct OpDef {
    pub name: &'static str,
    pub kind: OpKind,
    pub arity: Arity,
}

impl OpDef {
    pub fn is_special_form(&self) -> bool {
        matches!(self.kind, OpKind::Special(_))
    }
}

/// Look up an operator by name.
pub fn find_op(name: &str) -> Option<&'static OpDef> {
    OP_INDEX.get(name).copied()
}

/// Run an operator against the raw call-site argument chain.
pub fn dispatch(op: &OpDef, env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    match op.kind {
        OpKind::Special(f) => {
            op.arity.validate(op.name, args.list_len())?;
            f(env, args)
        }
        OpKind::Builtin(f) => {
            let vals = eval::eval_args(env, args)?;
            op.arity.validate(op.name, vals.list_len())?;
            f(env, &vals)
        }
    }
}

/// Apply an operator or callable value to an already-evaluated argument
/// chain. This is the tail of `apply`: builtins get the chain as-is, user
/// callables bind it without re-evaluation.
fn apply_value(env: &EnvRef, f: &NodeRef, arglist: &NodeRef) -> Result<NodeRef, Error> {
    match &**f {
        Node::Ident(name) => {
            if let Some(op) = find_op(name) {
                let (OpKind::Special(fun) | OpKind::Builtin(fun)) = op.kind;
                op.arity.validate(op.name, arglist.list_len())?;
                return fun(env, arglist);
            }
            match Env::resolve_callable(env, name) {
                Some((callable, true)) => eval::expand_macro(env, &callable, arglist),
                Some((callable, false)) => eval::apply(env, &callable, arglist, ArgsStyle::Values),
                None => Err(Error::InvalidOp(name.clone())),
            }
        }
        Node::Lambda(_) | Node::Bound(_) => eval::apply(env, f, arglist, ArgsStyle::Values),
        _ => Err(Error::InvalidOp(f.to_string())),
    }
}

//
// Numeric plumbing. Integers wrap at 64 bits; mixing an integer with a
// float promotes the result to float.
//

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(v: &NodeRef, op: &'static str) -> Result<Num, Error> {
        match &**v {
            Node::Int(i) => Ok(Num::Int(*i)),
            Node::Float(f) => Ok(Num::Float(*f)),
            _ => Err(Error::invalid_args(op)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_node(self) -> NodeRef {
        match self {
            Num::Int(i) => node::int(i),
            Num::Float(f) => node::float(f),
        }
    }

    fn add(self, o: Num) -> Num {
        match (self, o) {
            (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_add(b)),
            _ => Num::Float(self.as_f64() + o.as_f64()),
        }
    }

    fn sub(self, o: Num) -> Num {
        match (self, o) {
            (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_sub(b)),
            _ => Num::Float(self.as_f64() - o.as_f64()),
        }
    }

    fn mul(self, o: Num) -> Num {
        match (self, o) {
            (Num::Int(a), Num::Int(b)) => Num::Int(a.wrapping_mul(b)),
            _ => Num::Float(self.as_f64() * o.as_f64()),
        }
    }

    fn div(self, o: Num, op: &'static str) -> Result<Num, Error> {
        match (self, o) {
            (Num::Int(a), Num::Int(b)) => {
                if b == 0 {
                    Err(Error::invalid_args(op))
                } else {
                    Ok(Num::Int(a.wrapping_div(b)))
                }
            }
            _ => Ok(Num::Float(self.as_f64() / o.as_f64())),
        }
    }
}

fn truth(b: bool) -> NodeRef {
    if b {
        node::t()
    } else {
        node::nil()
    }
}

//
// Builtin implementations. Arity is already validated; operand types are
// checked here.
//

fn builtin_add(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let mut acc = Num::Int(0);
    for v in args.list_iter() {
        acc = acc.add(Num::of(&v, "+")?);
    }
    Ok(acc.into_node())
}

fn builtin_sub(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let first = Num::of(&args.car(), "-")?;
    let rest = args.cdr();
    if rest.as_cell().is_none() {
        // Unary minus.
        return Ok(Num::Int(0).sub(first).into_node());
    }
    let mut acc = first;
    for v in rest.list_iter() {
        acc = acc.sub(Num::of(&v, "-")?);
    }
    Ok(acc.into_node())
}

fn builtin_mul(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let mut acc = Num::Int(1);
    for v in args.list_iter() {
        acc = acc.mul(Num::of(&v, "*")?);
    }
    Ok(acc.into_node())
}

fn builtin_div(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let first = Num::of(&args.car(), "/")?;
    let rest = args.cdr();
    if rest.as_cell().is_none() {
        // Reciprocal, in the operand's kind: integer division for ints.
        return Ok(Num::Int(1).div(first, "/")?.into_node());
    }
    let mut acc = first;
    for v in rest.list_iter() {
        acc = acc.div(Num::of(&v, "/")?, "/")?;
    }
    Ok(acc.into_node())
}

fn builtin_plus_one(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(Num::of(&args.car(), "1+")?.add(Num::Int(1)).into_node())
}

fn builtin_minus_one(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(Num::of(&args.car(), "1-")?.sub(Num::Int(1)).into_node())
}

fn builtin_mod(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let to_int = |v: &NodeRef| -> Result<i64, Error> {
        match &**v {
            Node::Int(i) => Ok(*i),
            Node::Float(f) => Ok(*f as i64),
            _ => Err(Error::invalid_args("mod")),
        }
    };
    let a = to_int(&args.car())?;
    let b = to_int(&args.cdr().car())?;
    if b == 0 {
        return Err(Error::invalid_args("mod"));
    }
    Ok(node::int(a.wrapping_rem(b)))
}

fn builtin_float(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(node::float(Num::of(&args.car(), "float")?.as_f64()))
}

// `=` compares numbers and strings; mismatched kinds are simply unequal.
// A mixed int/float pair compares through the integer domain.
fn builtin_num_eq(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let lhs = args.car();
    let rhs = args.cdr().car();
    let eq = match (&*lhs, &*rhs) {
        (Node::Int(a), Node::Int(b)) => a == b,
        (Node::Int(a), Node::Float(b)) => *a == *b as i64,
        (Node::Float(a), Node::Int(b)) => *a == *b as f64,
        (Node::Float(a), Node::Float(b)) => a == b,
        (Node::Str(a), Node::Str(b)) => a == b,
        _ => false,
    };
    Ok(truth(eq))
}

macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
            let lhs = Num::of(&args.car(), $op_str)?.as_f64();
            let rhs = Num::of(&args.cdr().car(), $op_str)?.as_f64();
            Ok(truth(lhs $op rhs))
        }
    };
}

numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_ge, >=, ">=");

fn builtin_not(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(truth(args.car().is_nil()))
}

fn builtin_cons(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(node::cons(args.car(), args.cdr().car()))
}

fn builtin_car(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let v = args.car();
    match &*v {
        // The head of a quote form is the symbol `quote`, so source
        // manipulation sees the expected shape.
        Node::Quote(_) => Ok(node::ident("quote")),
        Node::Cell(c) => Ok(c.car.borrow().clone()),
        Node::Nil => Ok(node::nil()),
        _ => Err(Error::invalid_args("car")),
    }
}

fn builtin_cdr(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let v = args.car();
    match &*v {
        Node::Quote(child) => Ok(node::cons(child.clone(), node::nil())),
        Node::Cell(c) => Ok(c.cdr.borrow().clone()),
        _ => Ok(node::nil()),
    }
}

fn builtin_list(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    // The evaluated argument chain is already a fresh proper list.
    Ok(args.clone())
}

fn builtin_length(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let v = args.car();
    let len = match &*v {
        Node::Str(s) => s.len() as i64,
        Node::Cell(_) => v.list_len() as i64,
        _ => 0,
    };
    Ok(node::int(len))
}

fn builtin_null(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(truth(args.car().is_nil()))
}

fn builtin_consp(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(truth(matches!(
        &*args.car(),
        Node::Cell(_) | Node::Quote(_) | Node::Bquote(_)
    )))
}

fn builtin_oddp(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let odd = match &*args.car() {
        Node::Int(i) => i % 2 != 0,
        Node::Float(f) => (*f as i64) % 2 != 0,
        _ => false,
    };
    Ok(truth(odd))
}

fn builtin_evenp(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let even = match &*args.car() {
        Node::Int(i) => i % 2 == 0,
        Node::Float(f) => (*f as i64) % 2 == 0,
        _ => false,
    };
    Ok(truth(even))
}

fn builtin_type_of(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let name = match &*args.car() {
        Node::Nil => "null",
        Node::T => "boolean",
        Node::Int(_) => "int",
        Node::Float(_) => "float",
        Node::Str(_) => "string",
        Node::Quote(_) | Node::Bquote(_) | Node::Cell(_) => "cons",
        Node::Lambda(_) => "function",
        Node::Ident(_) => "symbol",
        Node::Bound(_) => "environment",
        Node::Error(_) => "error",
    };
    Ok(node::string(name))
}

fn builtin_apply(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let items: Vec<NodeRef> = args.list_iter().collect();
    let f = items[0].clone();
    let (last, middle) = items[1..].split_last().expect("arity checked");
    let mut call_args: Vec<NodeRef> = middle.to_vec();
    match &**last {
        Node::Cell(_) => call_args.extend(last.list_iter()),
        Node::Nil => {}
        _ => return Err(Error::invalid_args("apply")),
    }
    apply_value(env, &f, &node::list(call_args))
}

fn builtin_funcall(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    // Build (F . ARGS) and evaluate it.
    let call = node::cons(args.car(), args.cdr());
    eval::eval(env, &call)
}

fn builtin_concatenate(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    // First argument is a result-type tag, conventionally `string`.
    let tag = args.car();
    if tag.as_ident().is_none() {
        return Err(Error::invalid_args("concatenate"));
    }
    let mut out = String::new();
    for v in args.cdr().list_iter() {
        match &*v {
            Node::Str(s) => out.push_str(s),
            _ => return Err(Error::invalid_args("concatenate")),
        }
    }
    Ok(node::string(out))
}

fn builtin_make_string(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    match &*args.car() {
        Node::Int(n) if *n >= 0 => Ok(node::string(" ".repeat(*n as usize))),
        _ => Err(Error::invalid_args("make-string")),
    }
}

fn builtin_rplaca(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let target = args.car();
    let value = args.cdr().car();
    match &*target {
        Node::Cell(c) => {
            *c.car.borrow_mut() = value;
            Ok(target.clone())
        }
        _ => Err(Error::invalid_args("rplaca")),
    }
}

fn builtin_rplacd(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let target = args.car();
    let value = args.cdr().car();
    match &*target {
        Node::Cell(c) => {
            *c.cdr.borrow_mut() = value;
            Ok(target.clone())
        }
        _ => Err(Error::invalid_args("rplacd")),
    }
}

fn builtin_nconc(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let items: Vec<NodeRef> = args.list_iter().collect();
    // Everything except the last argument must be a list.
    for item in items.iter().rev().skip(1) {
        if !matches!(&**item, Node::Cell(_) | Node::Nil) {
            return Err(Error::invalid_args("nconc"));
        }
    }
    let mut head: Option<NodeRef> = None;
    for (i, item) in items.iter().enumerate() {
        let is_last = i + 1 == items.len();
        if item.is_nil() && !is_last {
            continue;
        }
        match head.clone() {
            None => head = Some(item.clone()),
            Some(h) => {
                // Splice by mutating the cdr of the current last cell.
                let mut tail = h;
                loop {
                    let next = tail.cdr();
                    if next.as_cell().is_some() {
                        tail = next;
                    } else {
                        break;
                    }
                }
                if let Node::Cell(c) = &*tail {
                    *c.cdr.borrow_mut() = item.clone();
                }
            }
        }
    }
    Ok(head.unwrap_or_else(node::nil))
}

fn builtin_eval(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    eval::eval(env, &args.car())
}

fn builtin_load(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let path = match &*args.car() {
        Node::Str(s) => s.clone(),
        _ => return Err(Error::invalid_args("load")),
    };
    tracing::debug!(path = %path, "loading source file");
    let source = std::fs::read_to_string(&path)?;
    let forms = crate::reader::parse_program(&source)?;
    eval::eval_program(env, &forms)
}

fn builtin_getenv(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    match &*args.car() {
        Node::Str(name) => Ok(node::string(std::env::var(name).unwrap_or_default())),
        _ => Err(Error::invalid_args("getenv")),
    }
}

fn builtin_progn(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let mut ret = node::nil();
    for v in args.list_iter() {
        ret = v;
    }
    Ok(ret)
}

//
// Printing. Atom payloads print unquoted; lists and quote forms use the
// full printed representation. All three return their argument.
//

fn display_unquoted(v: &NodeRef) -> String {
    match &**v {
        Node::Str(s) => s.clone(),
        _ => v.to_string(),
    }
}

fn write_out(env: &EnvRef, text: &str) -> Result<(), Error> {
    let out = env.out();
    let mut sink = out.borrow_mut();
    write!(sink, "{text}")?;
    Ok(())
}

fn builtin_prin1(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let v = args.car();
    write_out(env, &display_unquoted(&v))?;
    Ok(v)
}

fn builtin_princ(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let v = args.car();
    write_out(env, &display_unquoted(&v))?;
    Ok(v)
}

fn builtin_print(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let v = args.car();
    write_out(env, &format!("{}\n", display_unquoted(&v)))?;
    Ok(v)
}

/// The operator table. Built once; immutable afterwards.
static OPS: LazyLock<Vec<OpDef>> = LazyLock::new(|| {
    fn special(name: &'static str, f: OpFn, arity: Arity) -> OpDef {
        OpDef {
            name,
            kind: OpKind::Special(f),
            arity,
        }
    }
    fn builtin(name: &'static str, f: OpFn, arity: Arity) -> OpDef {
        OpDef {
            name,
            kind: OpKind::Builtin(f),
            arity,
        }
    }

    vec![
        // Arithmetic and numerics
        builtin("+", builtin_add, Arity::Any),
        builtin("-", builtin_sub, Arity::AtLeast(1)),
        builtin("*", builtin_mul, Arity::Any),
        builtin("/", builtin_div, Arity::AtLeast(1)),
        builtin("1+", builtin_plus_one, Arity::Exact(1)),
        builtin("1-", builtin_minus_one, Arity::Exact(1)),
        builtin("mod", builtin_mod, Arity::Exact(2)),
        builtin("%", builtin_mod, Arity::Exact(2)),
        builtin("float", builtin_float, Arity::Exact(1)),
        // Comparison
        builtin("=", builtin_num_eq, Arity::Exact(2)),
        builtin("<", builtin_lt, Arity::Exact(2)),
        builtin("<=", builtin_le, Arity::Exact(2)),
        builtin(">", builtin_gt, Arity::Exact(2)),
        builtin(">=", builtin_ge, Arity::Exact(2)),
        // Boolean
        special("and", eval::eval_and, Arity::Any),
        special("or", eval::eval_or, Arity::Any),
        builtin("not", builtin_not, Arity::Exact(1)),
        // Control
        special("if", eval::eval_if, Arity::Range(2, 3)),
        special("cond", eval::eval_cond, Arity::Any),
        special("while", eval::eval_while, Arity::AtLeast(1)),
        special("dotimes", eval::eval_dotimes, Arity::AtLeast(1)),
        special("quote", eval::eval_quote, Arity::Exact(1)),
        builtin("progn", builtin_progn, Arity::Any),
        // Binding
        special("let", eval::eval_let, Arity::AtLeast(1)),
        special("let*", eval::eval_let_star, Arity::AtLeast(1)),
        special("setq", eval::eval_setq, Arity::AtLeast(2)),
        special("defun", eval::eval_defun, Arity::AtLeast(2)),
        special("defmacro", eval::eval_defmacro, Arity::AtLeast(2)),
        special("lambda", eval::eval_lambda, Arity::AtLeast(1)),
        special("flet", eval::eval_flet, Arity::AtLeast(1)),
        special("labels", eval::eval_labels, Arity::AtLeast(1)),
        // Lists
        builtin("cons", builtin_cons, Arity::Exact(2)),
        builtin("car", builtin_car, Arity::Exact(1)),
        builtin("cdr", builtin_cdr, Arity::Exact(1)),
        builtin("rest", builtin_cdr, Arity::Exact(1)),
        builtin("list", builtin_list, Arity::Any),
        builtin("length", builtin_length, Arity::Exact(1)),
        builtin("apply", builtin_apply, Arity::AtLeast(2)),
        builtin("funcall", builtin_funcall, Arity::AtLeast(1)),
        builtin("rplaca", builtin_rplaca, Arity::Exact(2)),
        builtin("rplacd", builtin_rplacd, Arity::Exact(2)),
        builtin("nconc", builtin_nconc, Arity::Any),
        builtin("eval", builtin_eval, Arity::Exact(1)),
        // Strings
        builtin("concatenate", builtin_concatenate, Arity::AtLeast(1)),
        builtin("make-string", builtin_make_string, Arity::Exact(1)),
        // Predicates
        builtin("null", builtin_null, Arity::Exact(1)),
        builtin("consp", builtin_consp, Arity::Exact(1)),
        builtin("oddp", builtin_oddp, Arity::Exact(1)),
        builtin("evenp", builtin_evenp, Arity::Exact(1)),
        builtin("type-of", builtin_type_of, Arity::Exact(1)),
        // I/O
        builtin("prin1", builtin_prin1, Arity::Exact(1)),
        builtin("princ", builtin_princ, Arity::Exact(1)),
        builtin("print", builtin_print, Arity::Exact(1)),
        builtin("getenv", builtin_getenv, Arity::Exact(1)),
        builtin("load", builtin_load, Arity::Exact(1)),
    ]
});

/// Name index over [`OPS`].
static OP_INDEX: LazyLock<HashMap<&'static str, &'static OpDef>> = LazyLock::new(|| {
    let ops: &'static [OpDef] = OPS.as_slice();
    ops.iter().map(|op| (op.name, op)).collect()
});
