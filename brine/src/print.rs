//! Text renderings of a graph: source-ish expressions, a node table for
//! diagnostics, and Graphviz output.
use std::collections::HashSet;
use std::fmt::Write;

use crate::graph::{Graph, Node, Op};
use crate::types::TypeData;

impl Graph {
    /// Render a node as a source-like expression. A Return prints as a
    /// `return` statement; Stop prints its single return, or brackets all of
    /// them. Cycles through loop phis print the phi's label.
    pub fn print(&self, n: Node) -> String {
        let mut s = String::new();
        let mut path = HashSet::new();
        self.print_on(n, &mut s, &mut path);
        s
    }

    fn print_on(&self, n: Node, s: &mut String, path: &mut HashSet<Node>) {
        if self.is_dead(n) {
            s.push_str("<dead>");
            return;
        }
        if !path.insert(n) {
            s.push_str(&self.label(n));
            return;
        }
        match self.op(n) {
            Op::Stop => {
                let rets: Vec<Node> = self.ins(n).iter().copied().flatten().collect();
                if rets.len() == 1 {
                    self.print_on(rets[0], s, path);
                } else {
                    s.push_str("Stop[ ");
                    for r in rets {
                        self.print_on(r, s, path);
                        s.push(' ');
                    }
                    s.push(']');
                }
            }
            Op::Return => {
                s.push_str("return ");
                if let Some(e) = self.in_(n, 1) {
                    self.print_on(e, s, path);
                }
                s.push(';');
            }
            Op::Constant(t) => s.push_str(&self.types.str(*t)),
            Op::Add => self.print_bin(n, "+", s, path),
            Op::Sub => self.print_bin(n, "-", s, path),
            Op::Mul => self.print_bin(n, "*", s, path),
            Op::Div => self.print_bin(n, "/", s, path),
            Op::And => self.print_bin(n, "&", s, path),
            Op::Or => self.print_bin(n, "|", s, path),
            Op::Xor => self.print_bin(n, "^", s, path),
            Op::Shl => self.print_bin(n, "<<", s, path),
            Op::Shr => self.print_bin(n, ">>>", s, path),
            Op::Sar => self.print_bin(n, ">>", s, path),
            Op::Bool(b) => self.print_bin(n, b.str(), s, path),
            Op::Minus => {
                s.push_str("(-");
                if let Some(e) = self.in_(n, 1) {
                    self.print_on(e, s, path);
                }
                s.push(')');
            }
            Op::Not => {
                s.push_str("(!");
                if let Some(e) = self.in_(n, 1) {
                    self.print_on(e, s, path);
                }
                s.push(')');
            }
            Op::Phi(l) => {
                let _ = write!(s, "Phi({l}");
                for i in 1..self.num_ins(n) {
                    s.push(',');
                    match self.in_(n, i) {
                        Some(v) => self.print_on(v, s, path),
                        None => s.push('_'),
                    }
                }
                s.push(')');
            }
            // Slot 2 of the Start tuple is the incoming argument
            Op::Proj(2) if self.in_(n, 0) == Some(self.start) => s.push_str("arg"),
            Op::Load(mo) => {
                if let Some(p) = self.in_(n, 2) {
                    self.print_on(p, s, path);
                }
                s.push('.');
                s.push_str(&mo.name);
            }
            Op::Store(mo) => {
                if let Some(p) = self.in_(n, 2) {
                    self.print_on(p, s, path);
                }
                let _ = write!(s, ".{}=", mo.name);
                if let Some(v) = self.in_(n, 3) {
                    self.print_on(v, s, path);
                }
            }
            Op::New(t) => {
                let _ = write!(s, "new {}", self.types.str(*t));
            }
            _ => s.push_str(&self.label(n)),
        }
        path.remove(&n);
    }

    fn print_bin(&self, n: Node, op: &str, s: &mut String, path: &mut HashSet<Node>) {
        s.push('(');
        if let Some(a) = self.in_(n, 1) {
            self.print_on(a, s, path);
        }
        s.push_str(op);
        if let Some(b) = self.in_(n, 2) {
            self.print_on(b, s, path);
        }
        s.push(')');
    }

    /// One line per live node: id, label, type, input ids, output ids.
    /// This is the dump attached to internal errors.
    pub fn dump(&self) -> String {
        let mut ns = self.live_nodes();
        ns.sort();
        let mut s = String::new();
        for n in ns {
            let ty = match self.ty(n) {
                Some(t) => self.types.str(t),
                None => "?".to_string(),
            };
            let ins: Vec<String> = self
                .ins(n)
                .iter()
                .map(|i| match i {
                    Some(d) => d.to_string(),
                    None => "_".to_string(),
                })
                .collect();
            let outs: Vec<String> = self.outs(n).iter().map(|u| u.to_string()).collect();
            let _ = writeln!(
                s,
                "{:>5} {:<12} {:<10} [{}] [{}]",
                n.to_string(),
                self.label(n),
                ty,
                ins.join(" "),
                outs.join(" ")
            );
        }
        s
    }

    /// Graphviz rendering of the live graph. Control is boxed and wired in
    /// red, memory edges are blue, plain data is black.
    pub fn dot(&self) -> String {
        let mut ns = self.live_nodes();
        ns.sort();
        let mut s = String::new();
        s.push_str("digraph brine {\n  rankdir=BT;\n");
        for &n in &ns {
            let shape = if self.is_cfg(n) { "box" } else { "oval" };
            let _ = writeln!(
                s,
                "  n{} [label=\"{} {}\",shape={shape}];",
                n.index(),
                n,
                self.label(n)
            );
        }
        for &n in &ns {
            for (i, slot) in self.ins(n).iter().enumerate() {
                let Some(d) = *slot else { continue };
                let color = if self.is_cfg(d) && (i == 0 || self.is_cfg(n)) {
                    "red"
                } else if self
                    .ty(d)
                    .is_some_and(|t| matches!(self.types.data(t), TypeData::Mem { .. }))
                {
                    "blue"
                } else {
                    "black"
                };
                let _ = writeln!(s, "  n{} -> n{} [color={color}];", n.index(), d.index());
            }
        }
        s.push_str("}\n");
        s
    }
}

#[cfg(test)]
mod test {
    use crate::Graph;

    #[test]
    fn test_print_constant_fold() {
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let one = g.con(1);
        let two = g.con(2);
        let sum = g.add(one, two);
        let stop = g.stop;
        g.ret(ctrl, sum, &[]);
        assert_eq!(g.print(stop), "return 3;");
    }

    #[test]
    fn test_print_expression() {
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let arg = g.proj(g.start, 2);
        let two = g.con(2);
        let m = g.mul(arg, two);
        let stop = g.stop;
        g.ret(ctrl, m, &[]);
        assert_eq!(g.print(stop), "return (arg*2);");
    }

    #[test]
    fn test_dump_and_dot_render() {
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let arg = g.proj(g.start, 2);
        g.ret(ctrl, arg, &[]);
        let dump = g.dump();
        assert!(dump.contains("Start"));
        assert!(dump.contains("Return"));
        let dot = g.dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("shape=box"));
    }
}
