//! The sea-of-nodes graph
//!
//! A [`Graph`] owns every node of one compilation session. Nodes are arena
//! cells addressed by dense [`Node`] ids; ids are never reused and never
//! zero, so they double as indices into side arrays. Control and data share
//! one graph: `Start`, `Region`, `If` and friends are nodes like any `Add`.
//!
//! Every node keeps its inputs in order (slot 0 reserved for control) and its
//! uses unordered; the two edge directions are kept exactly symmetric by the
//! mutators [`Graph::set_def`], [`Graph::add_def`] and [`Graph::del_def`].
//!
//! Construction is optimizing: the builder methods peephole every node as it
//! is made, so constant folding and value numbering happen inline.
//!
//! ```
//! # use brine::Graph;
//! let mut g = Graph::new();
//! let ctrl = g.cproj(g.start, 0);
//! let a = g.con(1);
//! let b = g.con(2);
//! let c = g.con(3);
//! let m = g.mul(b, c);
//! let s = g.add(a, m);
//! let five = g.con(5);
//! let e = g.minus(five);
//! let sum = g.add(s, e);
//! let stop = g.stop;
//! g.ret(ctrl, sum, &[]);
//! assert_eq!(g.print(stop), "return 2;");
//! ```
pub mod op;

mod compute;
mod ideal;

use std::collections::HashMap;
use std::fmt;

use crate::indexed::define_index;
use crate::opt::WorkList;
use crate::types::{Ty, Types};
pub use op::{BoolOp, MemOp, Op};

define_index!(Node, "Dense, never-reused id of a node in a `Graph`");

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index())
    }
}

#[derive(Clone, Debug)]
struct NodeData {
    op: Op,
    ins: Vec<Option<Node>>,
    outs: Vec<Node>,
    ty: Option<Ty>,
    /// Keep-alive count; a node with keeps is never killed for being unused
    keeps: u32,
    /// Present in the value-numbering table under its current `(op, ins)` key
    in_gvn: bool,
    /// Nodes to retry when this one changes; distant-pattern bookkeeping
    deps: Vec<Node>,
    /// Cached dominator-tree depth; 0 when not computed
    idepth: u32,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct GvnKey {
    op: Op,
    ins: Vec<Option<Node>>,
}

/// One compilation session: the node arena, its type arena, the value
/// numbering table and the peephole worklist.
pub struct Graph {
    nodes: Vec<NodeData>,
    pub types: Types,
    gvn: HashMap<GvnKey, Node>,
    pub(crate) work: WorkList,
    pub start: Node,
    pub stop: Node,
    start_ty: Ty,
    pub(crate) iter_cnt: usize,
    pub(crate) iter_nop: usize,
}

impl Graph {
    pub fn new() -> Self {
        let mut types = Types::new();
        let start_ty = {
            let (c, m, i) = (types.ctrl, types.mem_bot, types.int_bot);
            types.tuple(&[c, m, i])
        };
        let mut g = Self {
            nodes: vec![NodeData {
                // Reserved dummy so real ids start at 1
                op: Op::Stop,
                ins: vec![],
                outs: vec![],
                ty: None,
                keeps: 0,
                in_gvn: false,
                deps: vec![],
                idepth: 0,
            }],
            types,
            gvn: HashMap::new(),
            work: WorkList::new(),
            start: Node::from(0),
            stop: Node::from(0),
            start_ty,
            iter_cnt: 0,
            iter_nop: 0,
        };
        g.start = g.init(Op::Start, vec![]);
        g.stop = g.init(Op::Stop, vec![]);
        g
    }

    // ------------------------------------------------------------------
    // Accessors

    fn d(&self, n: Node) -> &NodeData {
        &self.nodes[n.index()]
    }

    fn dm(&mut self, n: Node) -> &mut NodeData {
        &mut self.nodes[n.index()]
    }

    pub fn op(&self, n: Node) -> &Op {
        &self.d(n).op
    }

    pub fn ty(&self, n: Node) -> Option<Ty> {
        self.d(n).ty
    }

    pub fn ins(&self, n: Node) -> &[Option<Node>] {
        &self.d(n).ins
    }

    pub fn outs(&self, n: Node) -> &[Node] {
        &self.d(n).outs
    }

    pub fn num_ins(&self, n: Node) -> usize {
        self.d(n).ins.len()
    }

    pub fn num_outs(&self, n: Node) -> usize {
        self.d(n).outs.len()
    }

    /// Input `i`, flattened over the `Option` gap
    pub fn in_(&self, n: Node, i: usize) -> Option<Node> {
        self.d(n).ins.get(i).copied().flatten()
    }

    pub fn label(&self, n: Node) -> String {
        self.d(n).op.label()
    }

    pub fn is_cfg(&self, n: Node) -> bool {
        self.d(n).op.is_cfg()
    }

    /// Severed from the graph: type cleared, no edges left
    pub fn is_dead(&self, n: Node) -> bool {
        let d = self.d(n);
        d.ty.is_none() && d.ins.is_empty() && d.outs.is_empty()
    }

    pub fn is_unused(&self, n: Node) -> bool {
        let d = self.d(n);
        d.outs.is_empty() && d.keeps == 0
    }

    /// Total node slots ever allocated (dense id space, including dead ids)
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Regions, loops and phis are built with a trailing gap and closed later;
    /// until then they opt out of value numbering and idealization
    pub(crate) fn in_progress(&self, n: Node) -> bool {
        let d = self.d(n);
        matches!(d.op, Op::Region | Op::Loop | Op::Phi(_))
            && !d.ins.is_empty()
            && d.ins.last() == Some(&None)
    }

    fn val_ty(&self, x: Option<Node>) -> Ty {
        x.and_then(|v| self.ty(v)).unwrap_or(self.types.bot)
    }

    // ------------------------------------------------------------------
    // Edge mutation; these four keep def-use symmetry

    fn add_use(&mut self, def: Node, use_: Node) {
        self.dm(def).outs.push(use_);
    }

    /// Remove one use; true if the def just became unused
    fn del_use(&mut self, def: Node, use_: Node) -> bool {
        let d = self.dm(def);
        let i = d.outs.iter().position(|&u| u == use_).expect("use edge missing");
        d.outs.swap_remove(i);
        d.outs.is_empty() && d.keeps == 0
    }

    /// Replace input `idx` of `n`. The new use is added before the old one is
    /// removed, so a def on both sides never transiently dies.
    pub fn set_def(&mut self, n: Node, idx: usize, new: Option<Node>) {
        let old = self.d(n).ins[idx];
        if old == new {
            return;
        }
        self.unlock(n);
        if let Some(nd) = new {
            self.add_use(nd, n);
        }
        self.dm(n).ins[idx] = new;
        if let Some(od) = old {
            if self.del_use(od, n) {
                self.kill(od);
            } else {
                self.work.push(od);
            }
        }
        self.move_deps(n);
    }

    pub fn add_def(&mut self, n: Node, new: Node) {
        self.unlock(n);
        self.dm(n).ins.push(Some(new));
        self.add_use(new, n);
    }

    /// Delete input `idx` by swapping the last input into its place.
    /// Callers deleting a region path must apply the same index to every phi
    /// so the input orders stay aligned.
    pub fn del_def(&mut self, n: Node, idx: usize) {
        self.unlock(n);
        let old = self.dm(n).ins.swap_remove(idx);
        if let Some(od) = old {
            if self.del_use(od, n) {
                self.kill(od);
            } else {
                self.work.push(od);
            }
            self.move_deps(n);
        }
    }

    /// Sever an unused node, recursively killing inputs that lose their last
    /// use. The id becomes a permanent tombstone.
    pub fn kill(&mut self, n: Node) {
        debug_assert!(self.is_unused(n), "killing a node that still has uses");
        self.unlock(n);
        self.move_deps(n);
        self.dm(n).ty = None;
        while let Some(slot) = self.dm(n).ins.pop() {
            if let Some(od) = slot {
                self.work.push(od);
                if self.del_use(od, n) {
                    self.kill(od);
                }
            }
        }
        debug_assert!(self.is_dead(n));
    }

    /// Repoint every user of `old` at `new`, then kill `old`
    pub fn subsume(&mut self, old: Node, new: Node) {
        debug_assert_ne!(old, new);
        while let Some(&u) = self.d(old).outs.last() {
            self.unlock(u);
            let i = self
                .d(u)
                .ins
                .iter()
                .position(|&x| x == Some(old))
                .expect("def edge missing");
            // Manual edge flip; set_def would re-enter kill on old
            self.dm(u).ins[i] = Some(new);
            self.add_use(new, u);
            let od = self.dm(old);
            let j = od.outs.iter().position(|&x| x == u).unwrap();
            od.outs.swap_remove(j);
            let uouts = self.d(u).outs.to_vec();
            self.work.add_all(&uouts);
        }
        self.kill(old);
    }

    pub fn keep(&mut self, n: Node) {
        self.dm(n).keeps += 1;
    }

    pub fn unkeep(&mut self, n: Node) {
        debug_assert!(self.d(n).keeps > 0);
        self.dm(n).keeps -= 1;
    }

    // ------------------------------------------------------------------
    // Value numbering

    fn gvn_key(&self, n: Node) -> GvnKey {
        let d = self.d(n);
        GvnKey { op: d.op.clone(), ins: d.ins.clone() }
    }

    /// Drop `n` from the value-numbering table before any edge change; its
    /// key is about to go stale
    fn unlock(&mut self, n: Node) {
        if self.d(n).in_gvn {
            let k = self.gvn_key(n);
            let hit = self.gvn.remove(&k);
            debug_assert_eq!(hit, Some(n));
            self.dm(n).in_gvn = false;
        }
    }

    // ------------------------------------------------------------------
    // Dependencies: distant-pattern retries

    /// Record that `watcher` should be retried when `watched` changes
    pub(crate) fn add_dep(&mut self, watcher: Node, watched: Node) {
        if watcher == watched {
            return;
        }
        let d = self.d(watched);
        if d.deps.contains(&watcher)
            || d.ins.contains(&Some(watcher))
            || d.outs.contains(&watcher)
        {
            return;
        }
        self.dm(watched).deps.push(watcher);
    }

    pub(crate) fn move_deps(&mut self, n: Node) {
        let deps = std::mem::take(&mut self.dm(n).deps);
        self.work.add_all(&deps);
    }

    // ------------------------------------------------------------------
    // Node creation and the peephole core

    fn raw(&mut self, op: Op, ins: Vec<Option<Node>>) -> Node {
        let nid = Node::from(self.nodes.len());
        for slot in &ins {
            if let Some(d) = *slot {
                self.nodes[d.index()].outs.push(nid);
            }
        }
        self.nodes.push(NodeData {
            op,
            ins,
            outs: vec![],
            ty: None,
            keeps: 0,
            in_gvn: false,
            deps: vec![],
            idepth: 0,
        });
        nid
    }

    /// Create a node with its type computed but no rewrites applied
    pub(crate) fn init(&mut self, op: Op, ins: Vec<Option<Node>>) -> Node {
        let n = self.raw(op, ins);
        let t = self.compute(n);
        self.dm(n).ty = Some(t);
        n
    }

    /// Update the cached type; recomputation only ever lifts it.
    /// Returns the previous type, pushing users and watchers on change.
    pub(crate) fn set_type(&mut self, n: Node, t: Ty) -> Option<Ty> {
        let old = self.d(n).ty;
        if let Some(o) = old {
            debug_assert!(
                self.types.isa(t, o),
                "type of {n} fell: {} to {}",
                self.types.str(o),
                self.types.str(t)
            );
        }
        if old != Some(t) {
            self.dm(n).ty = Some(t);
            let outs = self.d(n).outs.to_vec();
            self.work.add_all(&outs);
            self.move_deps(n);
        }
        old
    }

    /// One full peephole: repeatedly rewrite until this value settles, then
    /// collect any dead original. Returns the surviving node.
    pub fn peephole(&mut self, n: Node) -> Node {
        match self.peephole_opt(n) {
            None => n,
            Some(x) => {
                let x = if x != n && x.index() > n.index() {
                    self.peephole(x)
                } else {
                    x
                };
                self.dead_code_elim(n, x)
            }
        }
    }

    fn dead_code_elim(&mut self, old: Node, new: Node) -> Node {
        if new != old && self.is_unused(old) && !self.is_dead(old) {
            self.keep(new);
            self.kill(old);
            self.unkeep(new);
        }
        new
    }

    /// One peephole step: compute the type, try constant replacement, value
    /// numbering, then idealization. `None` means no progress.
    pub(crate) fn peephole_opt(&mut self, n: Node) -> Option<Node> {
        self.iter_cnt += 1;
        let t = self.compute(n);
        let old = self.set_type(n, t);

        // A high or constant type turns the node into a plain constant
        if self.types.is_high_or_const(t) && !matches!(self.op(n), Op::Constant(_)) {
            let s = self.start;
            let c = self.init(Op::Constant(t), vec![Some(s)]);
            return Some(self.peephole(c));
        }

        if !self.in_progress(n) {
            // Global value numbering over the (op, ins) shape
            if !self.d(n).in_gvn {
                let key = self.gvn_key(n);
                if let Some(&m) = self.gvn.get(&key) {
                    // Two interpretations of one value; it has both types
                    let mt = self.ty(m).unwrap_or(t);
                    let j = self.types.join(mt, t);
                    self.set_type(m, j);
                    return Some(m);
                }
                self.gvn.insert(key, n);
                self.dm(n).in_gvn = true;
            }

            if let Some(x) = self.idealize(n) {
                return Some(x);
            }
        }

        if old != Some(t) {
            return Some(n);
        }
        self.iter_nop += 1;
        None
    }

    // ------------------------------------------------------------------
    // Dominators (uncached walks; idepth memoized per GCM run)

    pub(crate) fn idom(&mut self, n: Node) -> Option<Node> {
        match self.op(n) {
            Op::Start => None,
            Op::Loop => self.in_(n, 1),
            Op::Region => {
                // Fold the pairwise dominator LCA over every predecessor
                let mut lca: Option<Node> = None;
                for i in 1..self.num_ins(n) {
                    let Some(c) = self.in_(n, i) else { continue };
                    lca = Some(match lca {
                        None => c,
                        Some(l) => {
                            let (mut a, mut b) = (l, c);
                            while a != b {
                                if self.idepth(a) >= self.idepth(b) {
                                    a = self.idom(a)?;
                                } else {
                                    b = self.idom(b)?;
                                }
                            }
                            a
                        }
                    });
                }
                lca
            }
            _ => self.in_(n, 0),
        }
    }

    pub(crate) fn idepth(&mut self, n: Node) -> u32 {
        let c = self.d(n).idepth;
        if c != 0 {
            return c;
        }
        let d = if matches!(self.op(n), Op::Start) {
            1
        } else {
            match self.idom(n) {
                Some(p) => self.idepth(p) + 1,
                None => 1,
            }
        };
        self.dm(n).idepth = d;
        d
    }

    /// Invalidate every cached idepth; the CFG changed shape
    pub(crate) fn clear_idepth(&mut self) {
        for nd in &mut self.nodes {
            nd.idepth = 0;
        }
    }

    // ------------------------------------------------------------------
    // Builder API; every node is peepholed as it is made

    pub fn con(&mut self, v: i64) -> Node {
        let t = self.types.int_con(v);
        self.con_ty(t)
    }

    pub fn con_f(&mut self, v: f64) -> Node {
        let t = self.types.flt_con(v);
        self.con_ty(t)
    }

    pub fn con_ty(&mut self, t: Ty) -> Node {
        let s = self.start;
        let c = self.init(Op::Constant(t), vec![Some(s)]);
        self.peephole(c)
    }

    fn data2(&mut self, op: Op, a: Node, b: Node) -> Node {
        let n = self.init(op, vec![None, Some(a), Some(b)]);
        self.peephole(n)
    }

    pub fn add(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Add, a, b)
    }

    pub fn sub(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Sub, a, b)
    }

    pub fn mul(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Mul, a, b)
    }

    pub fn div(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Div, a, b)
    }

    pub fn and(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::And, a, b)
    }

    pub fn or(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Or, a, b)
    }

    pub fn xor(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Xor, a, b)
    }

    pub fn shl(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Shl, a, b)
    }

    /// Logical right shift
    pub fn shr(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Shr, a, b)
    }

    /// Arithmetic right shift
    pub fn sar(&mut self, a: Node, b: Node) -> Node {
        self.data2(Op::Sar, a, b)
    }

    pub fn cmp(&mut self, op: BoolOp, a: Node, b: Node) -> Node {
        self.data2(Op::Bool(op), a, b)
    }

    pub fn minus(&mut self, a: Node) -> Node {
        let n = self.init(Op::Minus, vec![None, Some(a)]);
        self.peephole(n)
    }

    pub fn not(&mut self, a: Node) -> Node {
        let n = self.init(Op::Not, vec![None, Some(a)]);
        self.peephole(n)
    }

    pub fn iff(&mut self, ctrl: Node, pred: Node) -> Node {
        let n = self.init(Op::If, vec![Some(ctrl), Some(pred)]);
        self.peephole(n)
    }

    /// Control projection `idx` out of a multi-control node
    pub fn cproj(&mut self, multi: Node, idx: u32) -> Node {
        let n = self.init(Op::CProj(idx), vec![Some(multi)]);
        self.peephole(n)
    }

    /// Data projection `idx` out of a multi-value node
    pub fn proj(&mut self, multi: Node, idx: u32) -> Node {
        let n = self.init(Op::Proj(idx), vec![Some(multi)]);
        self.peephole(n)
    }

    /// Open a merge point. The trailing gap keeps the region in progress
    /// until [`Graph::close_region`], so phis can attach before the empty
    /// diamond rewrite is allowed to look at it.
    pub fn region(&mut self, preds: &[Node]) -> Node {
        let mut ins = vec![None];
        ins.extend(preds.iter().map(|&p| Some(p)));
        ins.push(None);
        self.init(Op::Region, ins)
    }

    /// Close an open merge once its phis are in place, then peephole it.
    pub fn close_region(&mut self, r: Node) -> Node {
        debug_assert!(self.in_progress(r));
        self.dm(r).ins.pop();
        let outs = self.d(r).outs.to_vec();
        self.work.add_all(&outs);
        self.peephole(r)
    }

    pub fn phi(&mut self, label: &str, region: Node, vals: &[Node]) -> Node {
        let mut ins = vec![Some(region)];
        ins.extend(vals.iter().map(|&v| Some(v)));
        let n = self.init(Op::Phi(label.into()), ins);
        self.peephole(n)
    }

    /// Open a loop header; the backedge stays a gap until [`Graph::close_loop`]
    pub fn loop_head(&mut self, entry: Node) -> Node {
        self.init(Op::Loop, vec![None, Some(entry), None])
    }

    /// A phi on an open loop; typed pessimistically until the loop closes
    pub fn loop_phi(&mut self, label: &str, loop_: Node, init: Node) -> Node {
        self.init(Op::Phi(label.into()), vec![Some(loop_), Some(init), None])
    }

    /// Close an open loop: fill the backedge and every phi's second arm,
    /// then queue the lot for refinement
    pub fn close_loop(&mut self, loop_: Node, back: Node, phis: &[(Node, Node)]) {
        self.set_def(loop_, 2, Some(back));
        for &(phi, val) in phis {
            self.set_def(phi, 2, Some(val));
        }
        self.work.push(loop_);
        for &(phi, _) in phis {
            self.work.push(phi);
        }
    }

    /// Allocate an object; yields the (never nil) pointer
    pub fn new_obj(&mut self, ctrl: Node, obj: Ty) -> Node {
        let t = self.types.ptr(obj, false);
        let n = self.init(Op::New(t), vec![Some(ctrl)]);
        self.peephole(n)
    }

    pub fn load(&mut self, mem: Node, ptr: Node, mo: MemOp) -> Node {
        let n = self.init(Op::Load(mo), vec![None, Some(mem), Some(ptr)]);
        self.peephole(n)
    }

    pub fn store(&mut self, mem: Node, ptr: Node, val: Node, mo: MemOp) -> Node {
        let n = self.init(Op::Store(mo), vec![None, Some(mem), Some(ptr), Some(val)]);
        self.peephole(n)
    }

    /// Return `expr` under `ctrl`, threading any live memory slices; the new
    /// Return becomes an input of Stop
    pub fn ret(&mut self, ctrl: Node, expr: Node, mems: &[Node]) -> Node {
        let mut ins = vec![Some(ctrl), Some(expr)];
        ins.extend(mems.iter().map(|&m| Some(m)));
        let r = self.init(Op::Return, ins);
        let stop = self.stop;
        self.add_def(stop, r);
        self.peephole(r)
    }

    // ------------------------------------------------------------------
    // Whole-graph walks

    /// Every node reachable from Start or Stop along either edge direction
    pub fn live_nodes(&self) -> Vec<Node> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::new();
        let mut stack = vec![self.start, self.stop];
        while let Some(n) = stack.pop() {
            if seen[n.index()] || self.is_dead(n) {
                continue;
            }
            seen[n.index()] = true;
            out.push(n);
            for slot in &self.d(n).ins {
                if let Some(d) = *slot {
                    stack.push(d);
                }
            }
            for &u in &self.d(n).outs {
                stack.push(u);
            }
        }
        out
    }

    /// Check def-use symmetry over the live graph; test support
    pub fn check_edges(&self) -> Result<(), String> {
        for n in self.live_nodes() {
            for slot in self.ins(n) {
                if let Some(d) = *slot {
                    let fwd = self.ins(n).iter().filter(|&&s| s == Some(d)).count();
                    let back = self.outs(d).iter().filter(|&&u| u == n).count();
                    if fwd != back {
                        return Err(format!(
                            "edge asymmetry between {d} and {n}: {fwd} defs vs {back} uses"
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let g = Graph::new();
        assert_eq!(g.start.index(), 1);
        assert_eq!(g.stop.index(), 2);
    }

    #[test]
    fn test_edge_symmetry() {
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let arg = g.proj(g.start, 2);
        let one = g.con(1);
        let s = g.add(arg, one);
        let d = g.mul(s, s); // same def on both sides
        g.ret(ctrl, d, &[]);
        g.check_edges().unwrap();
        assert_eq!(
            g.ins(d).iter().filter(|&&x| x == Some(s)).count(),
            g.outs(s).iter().filter(|&&u| u == d).count()
        );
    }

    #[test]
    fn test_gvn_dedup() {
        let mut g = Graph::new();
        let arg = g.proj(g.start, 2);
        let one = g.con(1);
        let a = g.add(arg, one);
        let b = g.add(arg, one);
        assert_eq!(a, b);
        // Constants value-number too
        assert_eq!(g.con(7), g.con(7));
    }

    #[test]
    fn test_set_def_shared_node_survives() {
        let mut g = Graph::new();
        let arg = g.proj(g.start, 2);
        let n = g.init(Op::Add, vec![None, Some(arg), Some(arg)]);
        // Replacing one edge with the same def must not kill it
        g.set_def(n, 1, Some(arg));
        g.check_edges().unwrap();
        assert!(!g.is_dead(arg));
    }

    #[test]
    fn test_kill_cascade() {
        let mut g = Graph::new();
        let arg = g.proj(g.start, 2);
        let one = g.con(1);
        let s = g.add(arg, one);
        let keep_arg = g.outs(arg).len();
        g.kill(s);
        assert!(g.is_dead(s));
        // A freshly unused constant dies with its user; arg keeps its Start use
        assert!(g.is_dead(one) || !g.outs(one).contains(&s));
        assert_eq!(g.outs(arg).len(), keep_arg - 1);
        assert!(!g.is_dead(arg));
    }
}
