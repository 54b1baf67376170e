//! Shape rewrites.
//!
//! `idealize` returns `None` for no change, the node itself after an input
//! edge changed, or a replacement node. The driver applies these to fixpoint;
//! rules that inspect far-away nodes register dependencies so they get
//! retried when those nodes change.
use super::{Graph, Node, Op};
use crate::graph::op::{BoolOp, MemOp};
use crate::types::TypeData;

impl Graph {
    pub(crate) fn idealize(&mut self, n: Node) -> Option<Node> {
        match self.op(n).clone() {
            Op::Add => self.ideal_add(n),
            Op::Sub => self.ideal_sub(n),
            Op::Mul => self.ideal_mul(n),
            Op::Div => self.ideal_div(n),
            op @ (Op::And | Op::Or | Op::Xor | Op::Shl | Op::Shr | Op::Sar) => {
                self.ideal_bits(n, op)
            }
            Op::Minus => self.ideal_minus(n),
            Op::Bool(b) => self.ideal_bool(n, b),
            Op::If => self.ideal_if(n),
            Op::CProj(i) => self.ideal_cproj(n, i),
            Op::Region | Op::Loop => self.ideal_region(n),
            Op::Phi(_) => self.ideal_phi(n),
            Op::Load(mo) => self.ideal_load(n, mo),
            Op::Store(mo) => self.ideal_store(n, mo),
            _ => None,
        }
    }

    fn is_con(&self, x: Option<Node>) -> bool {
        let t = self.val_ty(x);
        self.types.is_constant(t)
    }

    fn con_val(&self, x: Option<Node>) -> Option<i64> {
        let t = self.val_ty(x);
        match *self.types.data(t) {
            TypeData::Int { lo, hi } if lo == hi => Some(lo),
            _ => None,
        }
    }

    fn swap12(&mut self, n: Node) -> Node {
        self.unlock(n);
        self.dm(n).ins.swap(1, 2);
        n
    }

    fn ideal_add(&mut self, n: Node) -> Option<Node> {
        let (a, b) = (self.in_(n, 1)?, self.in_(n, 2)?);
        // x + 0
        if self.ty(b) == Some(self.types.int_zero) {
            return Some(a);
        }
        // Constants to the right
        if self.is_con(Some(a)) && !self.is_con(Some(b)) {
            return Some(self.swap12(n));
        }
        // (x + c1) + c2 becomes x + (c1 + c2)
        if *self.op(a) == Op::Add {
            if let (Some(c2), Some(c1)) = (self.con_val(Some(b)), self.con_val(self.in_(a, 2))) {
                if let Some(sum) = c1.checked_add(c2) {
                    let x = self.in_(a, 1)?;
                    let c = self.con(sum);
                    self.set_def(n, 1, Some(x));
                    self.set_def(n, 2, Some(c));
                    return Some(n);
                }
            }
        }
        None
    }

    fn ideal_sub(&mut self, n: Node) -> Option<Node> {
        let (a, b) = (self.in_(n, 1)?, self.in_(n, 2)?);
        if a == b && matches!(*self.types.data(self.val_ty(Some(a))), TypeData::Int { .. }) {
            return Some(self.con(0));
        }
        if self.ty(b) == Some(self.types.int_zero) {
            return Some(a);
        }
        None
    }

    fn ideal_mul(&mut self, n: Node) -> Option<Node> {
        let (a, b) = (self.in_(n, 1)?, self.in_(n, 2)?);
        if self.ty(b) == Some(self.types.int_one) {
            return Some(a);
        }
        if self.is_con(Some(a)) && !self.is_con(Some(b)) {
            return Some(self.swap12(n));
        }
        None
    }

    fn ideal_div(&mut self, n: Node) -> Option<Node> {
        let (a, b) = (self.in_(n, 1)?, self.in_(n, 2)?);
        if self.ty(b) == Some(self.types.int_one) {
            return Some(a);
        }
        None
    }

    fn ideal_bits(&mut self, n: Node, op: Op) -> Option<Node> {
        let (a, b) = (self.in_(n, 1)?, self.in_(n, 2)?);
        if a == b && matches!(*self.types.data(self.val_ty(Some(a))), TypeData::Int { .. }) {
            match op {
                Op::And | Op::Or => return Some(a),
                Op::Xor => return Some(self.con(0)),
                _ => {}
            }
        }
        // Identity element on the right
        let cb = self.con_val(Some(b));
        match op {
            Op::And if cb == Some(-1) => return Some(a),
            Op::Or | Op::Xor if cb == Some(0) => return Some(a),
            Op::Shl | Op::Shr | Op::Sar if cb == Some(0) => return Some(a),
            _ => {}
        }
        // Constants to the right for the commutative three
        if matches!(op, Op::And | Op::Or | Op::Xor)
            && self.is_con(Some(a))
            && !self.is_con(Some(b))
        {
            return Some(self.swap12(n));
        }
        None
    }

    fn ideal_minus(&mut self, n: Node) -> Option<Node> {
        let a = self.in_(n, 1)?;
        // -(-x)
        if *self.op(a) == Op::Minus {
            return self.in_(a, 1);
        }
        None
    }

    fn ideal_bool(&mut self, n: Node, b: BoolOp) -> Option<Node> {
        let (x, y) = (self.in_(n, 1)?, self.in_(n, 2)?);
        // Comparison against self decides immediately
        if x == y {
            let v = match b {
                BoolOp::Eq | BoolOp::Le => 1,
                BoolOp::Lt => 0,
            };
            return Some(self.con(v));
        }
        // Canonical operand order for the commutative compare
        if b == BoolOp::Eq && !self.is_con(Some(y)) && (self.is_con(Some(x)) || x.index() > y.index())
        {
            return Some(self.swap12(n));
        }
        None
    }

    /// Hunt the dominator tree for an identical test; whichever projection
    /// we sit under decides this one
    fn ideal_if(&mut self, n: Node) -> Option<Node> {
        let pred = self.in_(n, 1)?;
        if self.types.is_high_or_const(self.val_ty(Some(pred))) {
            return None;
        }
        let mut prior = n;
        let mut dom = self.idom(n);
        while let Some(d) = dom {
            self.add_dep(n, d);
            if *self.op(d) == Op::If {
                if let Some(dpred) = self.in_(d, 1) {
                    self.add_dep(n, dpred);
                    if dpred == pred {
                        if let Op::CProj(idx) = *self.op(prior) {
                            let c = self.con(if idx == 0 { 1 } else { 0 });
                            self.set_def(n, 1, Some(c));
                            return Some(n);
                        }
                    }
                }
            }
            prior = d;
            dom = self.idom(d);
        }
        None
    }

    /// A projection off an If whose other side is dead is just the If's
    /// incoming control
    fn ideal_cproj(&mut self, n: Node, idx: u32) -> Option<Node> {
        let f = self.in_(n, 0)?;
        if *self.op(f) != Op::If {
            return None;
        }
        let ft = self.ty(f)?;
        let TypeData::Tuple(es) = self.types.data(ft) else {
            return None;
        };
        let other = es[1 - idx as usize];
        if other == self.types.xctrl {
            return self.in_(f, 0);
        }
        None
    }

    fn has_phi(&self, r: Node) -> bool {
        self.outs(r).iter().any(|&u| matches!(self.op(u), Op::Phi(_)))
    }

    fn ideal_region(&mut self, n: Node) -> Option<Node> {
        if self.in_progress(n) {
            return None;
        }
        // Delete a dead predecessor path, in lockstep with the phis.
        // The loop entry is never deleted; a dead entry kills the whole loop
        // through the types instead.
        let dead = (1..self.num_ins(n)).find(|&i| {
            self.val_ty(self.in_(n, i)) == self.types.xctrl
                && !(*self.op(n) == Op::Loop && i == 1)
        });
        if let Some(path) = dead {
            let phis: Vec<Node> = self
                .outs(n)
                .iter()
                .copied()
                .filter(|&u| matches!(self.op(u), Op::Phi(_)) && self.num_ins(u) == self.num_ins(n))
                .collect();
            for phi in phis {
                self.del_def(phi, path);
                self.work.push(phi);
            }
            self.del_def(n, path);
            return Some(n);
        }
        if self.num_ins(n) == 2 && !self.has_phi(n) {
            // Single live predecessor and nothing merging; vanish
            return self.in_(n, 1);
        }
        // An empty diamond collapses onto the If's incoming control
        if *self.op(n) == Op::Region && self.num_ins(n) == 3 && !self.has_phi(n) {
            let (a, b) = (self.in_(n, 1)?, self.in_(n, 2)?);
            if let (Op::CProj(_), Op::CProj(_)) = (self.op(a), self.op(b)) {
                let f = self.in_(a, 0)?;
                if Some(f) == self.in_(b, 0) && *self.op(f) == Op::If {
                    return self.in_(f, 0);
                }
            }
        }
        None
    }

    fn ideal_phi(&mut self, n: Node) -> Option<Node> {
        let r = self.in_(n, 0)?;
        // Region collapsed to plain control; the phi is its lone input
        if !matches!(self.op(r), Op::Region | Op::Loop) {
            return self.in_(n, 1);
        }
        if self.in_progress(r) {
            return None;
        }
        if *self.op(r) == Op::Loop && self.val_ty(self.in_(r, 1)) == self.types.xctrl {
            return None;
        }
        // Single unique live input collapses the phi
        let mut live: Option<Node> = None;
        for i in 1..self.num_ins(n) {
            if let Some(rc) = self.in_(r, i) {
                self.add_dep(n, rc);
                if self.ty(rc) == Some(self.types.xctrl) {
                    continue;
                }
            }
            let Some(v) = self.in_(n, i) else { continue };
            if v == n || Some(v) == live {
                continue;
            }
            if live.is_some() {
                return None;
            }
            live = Some(v);
        }
        live
    }

    fn ideal_load(&mut self, n: Node, mo: MemOp) -> Option<Node> {
        let mem = self.in_(n, 1)?;
        let ptr = self.in_(n, 2)?;
        // Load right after a store to the same location reads the stored value
        if let Op::Store(st) = self.op(mem) {
            if st.alias == mo.alias && self.in_(mem, 2) == Some(ptr) {
                return self.in_(mem, 3);
            }
        }
        // Push the load up through a memory phi when an arm will fold away.
        // Profitable at loops only when the backedge arm folds, otherwise the
        // load is dragged around the loop.
        if matches!(self.op(mem), Op::Phi(_)) && self.num_ins(mem) == 3 && !self.in_progress(mem) {
            let r = self.in_(mem, 0)?;
            if matches!(self.op(r), Op::Region | Op::Loop)
                && !self.in_progress(r)
                && self.ty(r) == Some(self.types.ctrl)
                // The address must not also vary over this region
                && !(matches!(self.op(ptr), Op::Phi(_)) && self.in_(ptr, 0) == Some(r))
            {
                let hoist = if *self.op(r) == Op::Loop {
                    self.load_folds_arm(n, mem, ptr, &mo, 2)
                } else {
                    self.load_folds_arm(n, mem, ptr, &mo, 1)
                        || self.load_folds_arm(n, mem, ptr, &mo, 2)
                };
                if hoist {
                    let m1 = self.in_(mem, 1);
                    let m2 = self.in_(mem, 2);
                    let l1 = self.init(Op::Load(mo.clone()), vec![None, m1, Some(ptr)]);
                    let l1 = self.peephole(l1);
                    self.keep(l1);
                    let l2 = self.init(Op::Load(mo.clone()), vec![None, m2, Some(ptr)]);
                    let l2 = self.peephole(l2);
                    self.unkeep(l1);
                    let phi = self.init(
                        Op::Phi(mo.name.clone()),
                        vec![Some(r), Some(l1), Some(l2)],
                    );
                    return Some(phi);
                }
            }
        }
        None
    }

    /// Would a copy of this load on arm `i` of the memory phi fold away?
    fn load_folds_arm(&mut self, n: Node, mem_phi: Node, ptr: Node, mo: &MemOp, i: usize) -> bool {
        let Some(arm) = self.in_(mem_phi, i) else {
            return false;
        };
        self.add_dep(n, arm);
        if let Op::Store(st) = self.op(arm) {
            return st.alias == mo.alias && self.in_(arm, 2) == Some(ptr);
        }
        false
    }

    fn ideal_store(&mut self, n: Node, mo: MemOp) -> Option<Node> {
        let mem = self.in_(n, 1)?;
        let ptr = self.in_(n, 2)?;
        // A store fully shadowed by this one drops out of the memory chain
        let prior_alias = match self.op(mem) {
            Op::Store(pm) => Some(pm.alias),
            _ => None,
        };
        if prior_alias == Some(mo.alias)
            && self.in_(mem, 2) == Some(ptr)
            && self.only_mem_use(mem, n)
        {
            let prior = self.in_(mem, 1);
            self.set_def(n, 1, prior);
            return Some(n);
        }
        None
    }

    /// True when `n` is the only reader of `mem`; otherwise watch the other
    /// readers so this retries when they go away
    fn only_mem_use(&mut self, mem: Node, n: Node) -> bool {
        if self.outs(mem).len() == 1 && self.outs(mem)[0] == n {
            return true;
        }
        let others: Vec<Node> = self.outs(mem).iter().copied().filter(|&u| u != n).collect();
        for u in others {
            self.add_dep(n, u);
        }
        false
    }
}
