//! Lexical environments.
//!
//! An environment is one frame of bindings plus a parent link; the chain of
//! parents is the lexical scope. Each frame keeps three namespaces: `vars`
//! for variables, `fncs` for functions and `mcrs` for macros (Lisp-2
//! discipline - a name can be both a variable and a function). Macros and
//! `defun` registrations always land on the root frame, which is found by
//! walking the parent links.
//!
//! The root also owns the output sink used by the print builtins; child
//! frames share it.

use crate::node::{Node, NodeRef};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

/// Shared handle to an environment frame.
pub type EnvRef = Rc<Env>;

/// Where the print builtins write. Replaceable per environment so tests and
/// embedders can capture output.
pub type Output = Rc<RefCell<dyn Write>>;

type Bindings = RefCell<HashMap<String, NodeRef>>;

/// One binding frame.
pub struct Env {
    vars: Bindings,
    fncs: Bindings,
    mcrs: Bindings,
    parent: Option<EnvRef>,
    out: RefCell<Output>,
}

impl Env {
    /// Create a root environment writing to stdout.
    pub fn root() -> EnvRef {
        let out: Output = Rc::new(RefCell::new(io::stdout()));
        Rc::new(Env {
            vars: Bindings::default(),
            fncs: Bindings::default(),
            mcrs: Bindings::default(),
            parent: None,
            out: RefCell::new(out),
        })
    }

    /// Create a child frame. The output sink is inherited.
    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(Env {
            vars: Bindings::default(),
            fncs: Bindings::default(),
            mcrs: Bindings::default(),
            parent: Some(parent.clone()),
            out: RefCell::new(parent.out.borrow().clone()),
        })
    }

    /// Replace this frame's output sink.
    pub fn set_out(&self, out: Output) {
        *self.out.borrow_mut() = out;
    }

    pub fn out(&self) -> Output {
        self.out.borrow().clone()
    }

    /// Walk the parent links to the root frame.
    pub fn root_of(env: &EnvRef) -> EnvRef {
        let mut curr = env.clone();
        while let Some(parent) = curr.parent.clone() {
            curr = parent;
        }
        curr
    }

    /// Symbol lookup: `vars` along the parent chain, then `fncs` on the
    /// root. Local function frames (`flet`/`labels`) are deliberately not
    /// visible as values.
    pub fn lookup(env: &EnvRef, name: &str) -> Option<NodeRef> {
        let mut curr = Some(env.clone());
        while let Some(e) = curr {
            if let Some(v) = e.vars.borrow().get(name) {
                return Some(v.clone());
            }
            curr = e.parent.clone();
        }
        Env::root_of(env).fncs.borrow().get(name).cloned()
    }

    /// `setq` semantics: mutate the nearest frame that already binds the
    /// name, else bind on the frame where the assignment was evaluated.
    pub fn assign(env: &EnvRef, name: &str, value: NodeRef) {
        let mut curr = Some(env.clone());
        while let Some(e) = curr {
            if e.vars.borrow().contains_key(name) {
                e.vars.borrow_mut().insert(name.to_string(), value);
                return;
            }
            curr = e.parent.clone();
        }
        env.define_var(name, value);
    }

    /// Bind a variable on this frame.
    pub fn define_var(&self, name: &str, value: NodeRef) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// Bind a function on this frame (used by `flet`/`labels`).
    pub fn define_local_fn(&self, name: &str, value: NodeRef) {
        self.fncs.borrow_mut().insert(name.to_string(), value);
    }

    /// Register a function on the root, wherever the definition ran.
    pub fn define_global_fn(env: &EnvRef, name: &str, value: NodeRef) {
        Env::root_of(env)
            .fncs
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    /// Register a macro on the root.
    pub fn define_global_macro(env: &EnvRef, name: &str, value: NodeRef) {
        Env::root_of(env)
            .mcrs
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    /// Resolve a call-site name to a callable. Per frame the function
    /// namespace wins, then a variable holding a lambda; macros are only
    /// looked up on the root, last. Returns the callable and whether it is
    /// a macro.
    pub fn resolve_callable(env: &EnvRef, name: &str) -> Option<(NodeRef, bool)> {
        let mut curr = Some(env.clone());
        while let Some(e) = curr {
            if let Some(f) = e.fncs.borrow().get(name) {
                return Some((f.clone(), false));
            }
            if let Some(v) = e.vars.borrow().get(name) {
                if matches!(&**v, Node::Lambda(_)) {
                    return Some((v.clone(), false));
                }
            }
            curr = e.parent.clone();
        }
        Env::root_of(env)
            .mcrs
            .borrow()
            .get(name)
            .map(|m| (m.clone(), true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node;

    #[test]
    fn test_lookup_walks_chain_then_root_fncs() {
        let root = Env::root();
        let mid = Env::child(&root);
        let leaf = Env::child(&mid);

        root.define_var("a", node::int(1));
        mid.define_var("a", node::int(2));
        assert_eq!(Env::lookup(&leaf, "a"), Some(node::int(2)));

        Env::define_global_fn(&leaf, "f", node::int(9));
        assert_eq!(Env::lookup(&leaf, "f"), Some(node::int(9)));
        assert_eq!(Env::lookup(&leaf, "missing"), None);
    }

    #[test]
    fn test_assign_mutates_nearest_binding() {
        let root = Env::root();
        let inner = Env::child(&root);
        root.define_var("x", node::int(1));

        Env::assign(&inner, "x", node::int(5));
        assert_eq!(Env::lookup(&root, "x"), Some(node::int(5)));

        // No existing binding: lands on the assigning frame only.
        Env::assign(&inner, "y", node::int(7));
        assert_eq!(Env::lookup(&inner, "y"), Some(node::int(7)));
        assert_eq!(Env::lookup(&root, "y"), None);
    }

    #[test]
    fn test_defun_registers_on_root_from_any_frame() {
        let root = Env::root();
        let deep = Env::child(&Env::child(&root));
        Env::define_global_fn(&deep, "g", node::int(3));
        assert!(root.fncs.borrow().contains_key("g"));
    }

    #[test]
    fn test_resolve_callable_prefers_fncs_then_lambda_vars() {
        let root = Env::root();
        let lam = std::rc::Rc::new(Node::Lambda(crate::node::Closure {
            name: None,
            params: node::nil(),
            body: node::nil(),
            env: root.clone(),
        }));

        root.define_var("f", lam.clone());
        let (found, is_macro) = Env::resolve_callable(&root, "f").unwrap();
        assert!(!is_macro);
        assert_eq!(*found, *lam);

        // A variable holding a non-callable is not a call target.
        root.define_var("n", node::int(1));
        assert!(Env::resolve_callable(&root, "n").is_none());

        Env::define_global_macro(&root, "m", lam);
        let (_, is_macro) = Env::resolve_callable(&root, "m").unwrap();
        assert!(is_macro);
    }
}
