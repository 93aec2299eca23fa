//! The tree-walking evaluator.
//!
//! `eval` dispatches on the node kind: atoms are self-evaluating, identifiers
//! resolve through the operator table and then the environment, quotes return
//! their child, backquotes are rebuilt with unquoted parts substituted, and
//! cells are applications. Application resolves the head to an operator, a
//! function, a macro or an inline lambda; user callables get a fresh child of
//! their captured environment for parameter binding, which is what makes
//! scope lexical.
//!
//! Special forms live here as free `eval_*` functions and are wired into the
//! operator table in [`crate::ops`].

use crate::env::{Env, EnvRef};
use crate::node::{self, Closure, Node, NodeRef};
use crate::ops;
use crate::Error;
use std::rc::Rc;

/// Evaluate each top-level form of `program` in order; the value of the
/// last form is the value of the program (`Nil` when empty).
pub fn eval_program(env: &EnvRef, program: &NodeRef) -> Result<NodeRef, Error> {
    let mut ret = node::nil();
    for form in program.list_iter() {
        ret = eval(env, &form)?;
    }
    Ok(ret)
}

/// Evaluate one form against an environment.
pub fn eval(env: &EnvRef, form: &NodeRef) -> Result<NodeRef, Error> {
    match &**form {
        Node::Ident(name) => {
            // Operator names are reserved; they resolve before variables and
            // evaluate to themselves so they can travel as values into
            // `apply`/`funcall`.
            if ops::find_op(name).is_some() {
                return Ok(form.clone());
            }
            Env::lookup(env, name).ok_or_else(|| Error::UndefinedSymbol(name.clone()))
        }
        Node::Cell(_) => eval_cell(env, form),
        Node::Quote(child) => Ok(child.clone()),
        Node::Bquote(child) => eval_bquote(env, child),
        _ => Ok(form.clone()),
    }
}

/// How call-site arguments reach parameter binding.
#[derive(Clone, Copy, PartialEq)]
pub(crate) enum ArgsStyle {
    /// Unevaluated forms: evaluate each in the caller's environment as it is
    /// bound. Normal function calls.
    Forms,
    /// Bind as-is. Used for macro calls (raw source forms) and for `apply`,
    /// whose arguments are values already.
    Values,
}

fn eval_cell(env: &EnvRef, form: &NodeRef) -> Result<NodeRef, Error> {
    let head = form.car();
    let args = form.cdr();
    match &*head {
        Node::Ident(name) => {
            if let Some(op) = ops::find_op(name) {
                return ops::dispatch(op, env, &args);
            }
            match Env::resolve_callable(env, name) {
                Some((callable, true)) => expand_macro(env, &callable, &args),
                Some((callable, false)) => apply(env, &callable, &args, ArgsStyle::Forms),
                None => Err(Error::InvalidOp(name.clone())),
            }
        }
        // A cell head whose car is `lambda` constructs the function in place.
        Node::Cell(_) if head.car().as_ident() == Some("lambda") => {
            let lam = eval_lambda(env, &head.cdr())?;
            apply(env, &lam, &args, ArgsStyle::Forms)
        }
        Node::Lambda(_) | Node::Bound(_) => apply(env, &head, &args, ArgsStyle::Forms),
        _ => Err(Error::InvalidOp(head.to_string())),
    }
}

/// Call a function value: bind parameters in a fresh child of the captured
/// environment, then evaluate the body forms.
pub(crate) fn apply(
    env: &EnvRef,
    callable: &NodeRef,
    args: &NodeRef,
    style: ArgsStyle,
) -> Result<NodeRef, Error> {
    let closure = match &**callable {
        Node::Lambda(c) | Node::Bound(c) => c,
        _ => return Err(Error::InvalidOp(callable.to_string())),
    };
    let scope = Env::child(&closure.env);
    bind_params(env, &scope, closure, args, style)?;
    eval_program(&scope, &closure.body)
}

/// Macro call: bind the raw forms, evaluate the body to an expansion, then
/// evaluate the expansion once in the calling environment.
pub(crate) fn expand_macro(
    env: &EnvRef,
    callable: &NodeRef,
    args: &NodeRef,
) -> Result<NodeRef, Error> {
    let expansion = apply(env, callable, args, ArgsStyle::Values)?;
    tracing::trace!(expansion = %expansion, "macro expanded");
    eval(env, &expansion)
}

/// Bind a parameter list against call-site arguments in `scope`.
///
/// Parameters are identifiers, optionally ending in `&rest name`; a bare
/// identifier instead of a list collects all arguments. Missing arguments
/// leave their parameter unbound (use then reports an undefined symbol);
/// excess arguments are ignored.
fn bind_params(
    caller: &EnvRef,
    scope: &EnvRef,
    closure: &Closure,
    args: &NodeRef,
    style: ArgsStyle,
) -> Result<(), Error> {
    let op_name = closure.name.as_deref().unwrap_or("lambda");
    match &*closure.params {
        Node::Nil => Ok(()),
        Node::Ident(name) => {
            let vals = collect_args(caller, args, style)?;
            scope.define_var(name, vals);
            Ok(())
        }
        Node::Cell(_) => {
            let mut param = closure.params.clone();
            let mut val = args.clone();
            loop {
                let (pname_node, rest_params) = match &*param {
                    Node::Cell(c) => (c.car.borrow().clone(), c.cdr.borrow().clone()),
                    _ => break,
                };
                let pname = pname_node
                    .as_ident()
                    .ok_or_else(|| Error::invalid_args(op_name))?;
                if pname == "&rest" {
                    let rest_name_node = rest_params.car();
                    let rest_name = rest_name_node
                        .as_ident()
                        .ok_or_else(|| Error::invalid_args(op_name))?;
                    let vals = collect_args(caller, &val, style)?;
                    scope.define_var(rest_name, vals);
                    return Ok(());
                }
                let next_val = match &*val {
                    Node::Cell(vc) => {
                        let raw = vc.car.borrow().clone();
                        let next = vc.cdr.borrow().clone();
                        let bound = match style {
                            ArgsStyle::Forms => eval(caller, &raw)?,
                            ArgsStyle::Values => raw,
                        };
                        scope.define_var(pname, bound);
                        next
                    }
                    _ => val.clone(),
                };
                val = next_val;
                param = rest_params;
            }
            Ok(())
        }
        _ => Err(Error::invalid_args(op_name)),
    }
}

fn collect_args(caller: &EnvRef, args: &NodeRef, style: ArgsStyle) -> Result<NodeRef, Error> {
    match style {
        ArgsStyle::Forms => eval_args(caller, args),
        // Fresh spine over the same elements, so the callee cannot extend
        // the caller's argument chain through its rest list.
        ArgsStyle::Values => Ok(node::list(args.list_iter().collect())),
    }
}

/// Evaluate each element of a form chain into a fresh value chain.
pub(crate) fn eval_args(env: &EnvRef, forms: &NodeRef) -> Result<NodeRef, Error> {
    let mut vals = Vec::new();
    for form in forms.list_iter() {
        vals.push(eval(env, &form)?);
    }
    Ok(node::list(vals))
}

/// Rebuild a backquoted list. Elements arrive from the reader either
/// quote-wrapped (literals) or as bare identifiers (unquotes, with a `@`
/// prefix for splices); everything is placed on a fresh spine.
fn eval_bquote(env: &EnvRef, child: &NodeRef) -> Result<NodeRef, Error> {
    if child.as_cell().is_none() {
        return Ok(child.clone());
    }
    let mut out = Vec::new();
    for el in child.list_iter() {
        match el.as_ident() {
            Some(name) => {
                if let Some(splice) = name.strip_prefix('@') {
                    let v = Env::lookup(env, splice)
                        .ok_or_else(|| Error::UndefinedSymbol(splice.to_string()))?;
                    if matches!(&*v, Node::Cell(_)) {
                        out.extend(v.list_iter());
                    } else if !v.is_nil() {
                        out.push(v);
                    }
                } else {
                    let v = Env::lookup(env, name)
                        .ok_or_else(|| Error::UndefinedSymbol(name.to_string()))?;
                    out.push(v);
                }
            }
            None => out.push(eval(env, &el)?),
        }
    }
    Ok(node::list(out))
}

//
// Special forms. Each receives its arguments unevaluated; arity has already
// been checked by the operator dispatch.
//

pub(crate) fn eval_quote(_env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(args.car())
}

pub(crate) fn eval_if(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let cond = eval(env, &args.car())?;
    let rest = args.cdr();
    if cond.is_truthy() {
        eval(env, &rest.car())
    } else {
        match &*rest.cdr() {
            Node::Cell(c) => {
                let else_form = c.car.borrow().clone();
                eval(env, &else_form)
            }
            _ => Ok(node::nil()),
        }
    }
}

pub(crate) fn eval_cond(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    for clause in args.list_iter() {
        if clause.as_cell().is_none() {
            continue;
        }
        let test = eval(env, &clause.car())?;
        if test.is_truthy() {
            let body = clause.cdr();
            return if body.as_cell().is_some() {
                eval_program(env, &body)
            } else {
                Ok(node::t())
            };
        }
    }
    Ok(node::nil())
}

pub(crate) fn eval_while(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let cond = args.car();
    let body = args.cdr();
    // The loop runs while the condition is exactly `t`, not merely truthy.
    loop {
        let v = eval(env, &cond)?;
        if !matches!(&*v, Node::T) {
            break;
        }
        let scope = Env::child(env);
        eval_program(&scope, &body)?;
    }
    Ok(node::nil())
}

pub(crate) fn eval_dotimes(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let head = args.car(); // (VAR COUNT RESULT?)
    let var_node = head.car();
    let var = var_node
        .as_ident()
        .ok_or_else(|| Error::invalid_args("dotimes"))?;
    let count_chain = head.cdr();
    if count_chain.as_cell().is_none() {
        return Err(Error::invalid_args("dotimes"));
    }
    let count = eval(env, &count_chain.car())?;
    let limit = match &*count {
        Node::Int(i) => (*i).max(0),
        _ => return Err(Error::invalid_args("dotimes")),
    };

    let scope = Env::child(env);
    let body = args.cdr();
    for i in 0..limit {
        scope.define_var(var, node::int(i));
        eval_program(&scope, &body)?;
    }
    scope.define_var(var, node::int(limit));

    match &*count_chain.cdr() {
        Node::Cell(c) => {
            let result_form = c.car.borrow().clone();
            eval(&scope, &result_form)
        }
        _ => Ok(node::nil()),
    }
}

fn eval_let_common(env: &EnvRef, args: &NodeRef, sequential: bool) -> Result<NodeRef, Error> {
    let op_name = if sequential { "let*" } else { "let" };
    let scope = Env::child(env);
    for binding in args.car().list_iter() {
        match &*binding {
            // Bare name: bound to nil.
            Node::Ident(name) => scope.define_var(name, node::nil()),
            Node::Cell(_) => {
                let name_node = binding.car();
                let name = name_node
                    .as_ident()
                    .ok_or_else(|| Error::invalid_args(op_name))?;
                let value = match &*binding.cdr() {
                    Node::Cell(vc) => {
                        let form = vc.car.borrow().clone();
                        let value_env = if sequential { &scope } else { env };
                        eval(value_env, &form)?
                    }
                    _ => node::nil(),
                };
                scope.define_var(name, value);
            }
            _ => return Err(Error::invalid_args(op_name)),
        }
    }
    eval_program(&scope, &args.cdr())
}

pub(crate) fn eval_let(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    eval_let_common(env, args, false)
}

pub(crate) fn eval_let_star(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    eval_let_common(env, args, true)
}

pub(crate) fn eval_setq(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let mut curr = args.clone();
    let mut ret = node::nil();
    loop {
        let (name_node, rest) = match &*curr {
            Node::Cell(c) => (c.car.borrow().clone(), c.cdr.borrow().clone()),
            _ => break,
        };
        let name = name_node
            .as_ident()
            .ok_or_else(|| Error::invalid_args("setq"))?;
        let value_form = match &*rest {
            Node::Cell(c) => c.car.borrow().clone(),
            _ => return Err(Error::invalid_args("setq")),
        };
        ret = eval(env, &value_form)?;
        Env::assign(env, name, ret.clone());
        curr = rest.cdr();
    }
    Ok(ret)
}

/// Build a closure from a `(PARAMS BODY...)` chain.
fn closure_from(env: &EnvRef, name: Option<String>, spec: &NodeRef) -> Result<Closure, Error> {
    match &**spec {
        Node::Cell(c) => Ok(Closure {
            name,
            params: c.car.borrow().clone(),
            body: c.cdr.borrow().clone(),
            env: env.clone(),
        }),
        _ => Err(Error::invalid_args("lambda")),
    }
}

pub(crate) fn eval_lambda(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    Ok(Rc::new(Node::Lambda(closure_from(env, None, args)?)))
}

pub(crate) fn eval_defun(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let name_node = args.car();
    let name = name_node
        .as_ident()
        .ok_or_else(|| Error::invalid_args("defun"))?;
    let closure = closure_from(env, Some(name.to_string()), &args.cdr())?;
    let callable = Rc::new(Node::Bound(closure));
    Env::define_global_fn(env, name, callable.clone());
    Ok(callable)
}

pub(crate) fn eval_defmacro(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    let name_node = args.car();
    let name = name_node
        .as_ident()
        .ok_or_else(|| Error::invalid_args("defmacro"))?;
    let closure = closure_from(env, Some(name.to_string()), &args.cdr())?;
    let callable = Rc::new(Node::Bound(closure));
    Env::define_global_macro(env, name, callable.clone());
    Ok(callable)
}

fn eval_flet_common(env: &EnvRef, args: &NodeRef, recursive: bool) -> Result<NodeRef, Error> {
    let op_name = if recursive { "labels" } else { "flet" };
    let scope = Env::child(env);
    for binding in args.car().list_iter() {
        let name_node = binding.car();
        let name = name_node
            .as_ident()
            .ok_or_else(|| Error::invalid_args(op_name))?;
        let rest = binding.cdr();
        if rest.as_cell().is_none() {
            return Err(Error::invalid_args(op_name));
        }
        // `labels` bindings close over the new scope (mutual recursion);
        // `flet` bindings close over the enclosing one.
        let closure_env = if recursive { &scope } else { env };
        let closure = closure_from(closure_env, None, &rest)?;
        scope.define_local_fn(name, Rc::new(Node::Lambda(closure)));
    }
    eval_program(&scope, &args.cdr())
}

pub(crate) fn eval_flet(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    eval_flet_common(env, args, false)
}

pub(crate) fn eval_labels(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    eval_flet_common(env, args, true)
}

pub(crate) fn eval_and(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    for form in args.list_iter() {
        if !eval(env, &form)?.is_truthy() {
            return Ok(node::nil());
        }
    }
    Ok(node::t())
}

pub(crate) fn eval_or(env: &EnvRef, args: &NodeRef) -> Result<NodeRef, Error> {
    for form in args.list_iter() {
        if eval(env, &form)?.is_truthy() {
            return Ok(node::t());
        }
    }
    Ok(node::nil())
}
