//! Global code motion.
//!
//! The optimized graph has no schedule: values float, anchored only by their
//! data edges. This pass rebuilds a CFG over the control nodes, then places
//! every value twice. The early pass pins each value just below its deepest
//! input; the late pass sinks it toward the lowest common ancestor of its
//! uses, stopping at the shallowest loop depth on the way. Loads grow
//! anti-dependence edges so no store to the same alias class can slide in
//! between a load and the memory state it read.
//!
//! Loops with no exit get one forced on them first: a [`Op::Never`] test on
//! the backedge whose untaken side returns, so every block has a path to
//! Stop and dominators are well defined.
use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::error::Error;
use crate::graph::{Graph, Node, Op};
use crate::types::TypeData;

/// The scheduled form of a graph
pub struct Schedule {
    /// Owning block head for every scheduled node
    pub block: HashMap<Node, Node>,
    /// Instruction order per block: head first, phis next, then values in
    /// dependency order, block tail (if any) last
    pub order: HashMap<Node, Vec<Node>>,
    /// Block heads in reverse post-order
    pub rpo: Vec<Node>,
    /// Immediate dominator per block head; Start has none
    pub idom: HashMap<Node, Node>,
    /// Loop nesting depth per block head; 1 outside any loop
    pub loop_depth: HashMap<Node, u32>,
}

impl Schedule {
    /// Structural checks: every node sits in exactly one block, defs come
    /// before their same-block uses, blocks start with their head.
    /// Test support.
    pub fn verify(&self, g: &Graph) -> Result<(), String> {
        for (&n, &b) in &self.block {
            let Some(ord) = self.order.get(&b) else {
                return Err(format!("{n} assigned to block {b} which has no order"));
            };
            let hits = ord.iter().filter(|&&x| x == n).count();
            if hits != 1 {
                return Err(format!("{n} appears {hits} times in block {b}"));
            }
        }
        for (&b, ord) in &self.order {
            if ord.first() != Some(&b) {
                return Err(format!("block {b} does not start with its head"));
            }
            let pos: HashMap<Node, usize> =
                ord.iter().enumerate().map(|(i, &n)| (n, i)).collect();
            for &n in ord {
                if n == b || matches!(g.op(n), Op::Phi(_)) {
                    continue;
                }
                for d in g.ins(n).iter().flatten() {
                    if matches!(g.op(*d), Op::Phi(_)) {
                        continue;
                    }
                    if let Some(&pd) = pos.get(d) {
                        if pd >= pos[&n] {
                            return Err(format!("{d} ordered after its use {n} in block {b}"));
                        }
                    }
                }
            }
        }
        if self.rpo.first() != Some(&g.start) {
            return Err("schedule does not begin at Start".to_string());
        }
        Ok(())
    }
}

/// One entry in the loop forest
struct LoopInfo {
    head: Node,
    /// Enclosing loop, 0 while undiscovered; a loop still at 0 when control
    /// falls into it has no exit and gets one forced
    par: u32,
    /// Nesting depth, memoized; 0 until asked for
    depth: u32,
}

/// Scratch state for one scheduling run. Side tables are keyed by node id in
/// maps rather than dense arrays because forcing loop exits grows the graph
/// mid-pass.
struct Gcm {
    pre: HashMap<Node, u32>,
    pre_cnt: u32,
    post: HashSet<Node>,
    /// Innermost loop per CFG node
    ltree: HashMap<Node, u32>,
    loops: Vec<LoopInfo>,
    /// Anti-dependence path marks for the load currently being placed
    anti: HashMap<Node, Node>,
    /// Chosen block per placed node
    late: HashMap<Node, Node>,
    /// Floating values awaiting the control write-back
    ns: Vec<(Node, Node)>,
}

impl Graph {
    /// Schedule the graph: force exits onto exit-less loops, build the loop
    /// forest, then place every value between its earliest legal control and
    /// the latest block dominating all uses, preferring the shallowest loop.
    ///
    /// Runs the optimizer to fixpoint first; the schedule only exists for
    /// the graph's final shape.
    pub fn build_cfg(&mut self) -> Result<Schedule, Error> {
        self.iterate();
        self.clear_idepth();
        let mut gcm = Gcm::new(self.start);
        gcm.fix_loops(self)?;
        self.clear_idepth();
        let rpo = self.rpo_cfg();
        self.sched_early(&rpo)?;
        gcm.sched_late(self)?;
        let sched = gcm.finish(self, rpo)?;
        // The control write-backs queued their neighborhoods through the edge
        // mutators; the graph was already at fixpoint, so drop them
        self.work.clear();
        Ok(sched)
    }

    pub(crate) fn internal(&self, n: Node, what: &'static str) -> Error {
        Error::Internal {
            node: n.index(),
            what,
            dump: self.dump(),
        }
    }

    /// CFG nodes in reverse post-order from Start
    fn rpo_cfg(&self) -> Vec<Node> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.post_ord(self.start, &mut seen, &mut out);
        out.reverse();
        out
    }

    fn post_ord(&self, n: Node, seen: &mut HashSet<Node>, out: &mut Vec<Node>) {
        if !seen.insert(n) {
            return;
        }
        for &u in self.outs(n) {
            if self.is_cfg(u) {
                self.post_ord(u, seen, out);
            }
        }
        out.push(n);
    }

    /// Walk control edges up to the nearest block head
    fn block_head_of(&self, mut n: Node) -> Result<Node, Error> {
        while !(self.op(n).is_block_head() || n == self.stop) {
            n = self
                .in_(n, 0)
                .ok_or_else(|| self.internal(n, "control node without predecessor"))?;
        }
        Ok(n)
    }

    /// Pin every value as high as its inputs allow: just below the deepest
    /// input's control. CFG and pinned nodes stay put.
    fn sched_early(&mut self, rpo: &[Node]) -> Result<(), Error> {
        let mut seen: HashSet<Node> = rpo.iter().copied().collect();
        for &cfg in rpo {
            for i in 0..self.num_ins(cfg) {
                if let Some(d) = self.in_(cfg, i) {
                    self.sched_early_node(d, &mut seen)?;
                }
            }
        }
        Ok(())
    }

    fn sched_early_node(&mut self, n: Node, seen: &mut HashSet<Node>) -> Result<(), Error> {
        if !seen.insert(n) {
            return Ok(());
        }
        for i in 0..self.num_ins(n) {
            if let Some(d) = self.in_(n, i) {
                self.sched_early_node(d, seen)?;
            }
        }
        if self.op(n).is_pinned() {
            return Ok(());
        }
        let mut early = self.start;
        for i in 1..self.num_ins(n) {
            let Some(d) = self.in_(n, i) else { continue };
            let dcfg = if self.is_cfg(d) {
                d
            } else {
                self.in_(d, 0)
                    .ok_or_else(|| self.internal(d, "input placed without control"))?
            };
            if self.idepth(dcfg) > self.idepth(early) {
                early = dcfg;
            }
        }
        self.set_def(n, 0, Some(early));
        Ok(())
    }
}

/// Does this node produce a memory slice (or a tuple holding one)?
fn defines_mem(g: &Graph, n: Node) -> bool {
    let Some(t) = g.ty(n) else { return false };
    match g.types.data(t) {
        TypeData::Mem { .. } => true,
        TypeData::Tuple(es) => es
            .iter()
            .any(|&e| matches!(g.types.data(e), TypeData::Mem { .. })),
        _ => false,
    }
}

/// Lowest common ancestor in the dominator tree
fn idom_lca(g: &mut Graph, a: Node, b: Node) -> Result<Node, Error> {
    let (mut a, mut b) = (a, b);
    while a != b {
        if g.idepth(a) >= g.idepth(b) {
            a = g
                .idom(a)
                .ok_or_else(|| g.internal(a, "dominator walk escaped the graph"))?;
        } else {
            b = g
                .idom(b)
                .ok_or_else(|| g.internal(b, "dominator walk escaped the graph"))?;
        }
    }
    Ok(a)
}

impl Gcm {
    fn new(start: Node) -> Self {
        Self {
            pre: HashMap::new(),
            pre_cnt: 0,
            post: HashSet::new(),
            ltree: HashMap::new(),
            // Slot 0 is a dummy; slot 1 is the root of the loop forest
            loops: vec![
                LoopInfo { head: start, par: 0, depth: 1 },
                LoopInfo { head: start, par: 0, depth: 1 },
            ],
            anti: HashMap::new(),
            late: HashMap::new(),
            ns: Vec::new(),
        }
    }

    /// Find loops and force an exit onto any loop that has none, so every
    /// CFG node reaches Stop and the dominator tree is complete
    fn fix_loops(&mut self, g: &mut Graph) -> Result<(), Error> {
        // Report CFG nodes with no forward path to Stop; the walk below
        // repairs them as it finds their loops
        let mut reach = HashSet::new();
        let mut stack = vec![g.stop];
        while let Some(n) = stack.pop() {
            if !reach.insert(n) {
                continue;
            }
            for i in 0..g.num_ins(n) {
                if let Some(d) = g.in_(n, i) {
                    if g.is_cfg(d) {
                        stack.push(d);
                    }
                }
            }
        }
        for n in g.live_nodes() {
            if g.is_cfg(n) && !reach.contains(&n) {
                debug!("{n} ({}) has no path to Stop", g.label(n));
            }
        }
        let start = g.start;
        self.blt_walk(g, start)?;
        debug!("loop forest has {} loops", self.loops.len() - 2);
        Ok(())
    }

    /// DFS with pre/post numbering building the loop forest. A successor
    /// that is numbered but not finished is a backedge and names a loop
    /// head; falling into a loop head from outside continues in that loop's
    /// parent instead, forcing an exit if the loop never set one.
    fn blt_walk(&mut self, g: &mut Graph, n: Node) -> Result<(), Error> {
        self.pre_cnt += 1;
        self.pre.insert(n, self.pre_cnt);
        let succs: Vec<Node> = g.outs(n).iter().copied().filter(|&u| g.is_cfg(u)).collect();
        let mut inner = 0u32;
        for s in succs {
            let st = g.ty(s);
            if st == Some(g.types.xctrl) || st == Some(g.types.if_neither) {
                continue;
            }
            let cand = if self.pre.contains_key(&s) && !self.post.contains(&s) {
                // Backedge; s heads a loop
                match self.ltree.get(&s) {
                    Some(&lt) if self.loops[lt as usize].head == s => lt,
                    _ => {
                        let lt = self.loops.len() as u32;
                        self.loops.push(LoopInfo { head: s, par: 0, depth: 0 });
                        self.ltree.insert(s, lt);
                        lt
                    }
                }
            } else {
                if !self.pre.contains_key(&s) {
                    self.blt_walk(g, s)?;
                }
                let lt = self.ltree[&s];
                if self.loops[lt as usize].head == s {
                    // Entering the loop; we belong to its parent
                    let mut par = self.loops[lt as usize].par;
                    if par == 0 {
                        self.force_exit(g, s)?;
                        self.loops[lt as usize].par = 1;
                        par = 1;
                    }
                    par
                } else {
                    lt
                }
            };
            // Keep the innermost candidate; nesting order follows the
            // pre-order of the loop heads
            if inner == 0 || inner == cand {
                inner = cand;
            } else {
                let (outer, inn) = if self.pre[&self.loops[cand as usize].head]
                    < self.pre[&self.loops[inner as usize].head]
                {
                    (cand, inner)
                } else {
                    (inner, cand)
                };
                self.loops[inn as usize].par = outer;
                inner = inn;
            }
        }
        // A loop head already owns its loop from the backedge that named it
        self.ltree.entry(n).or_insert(if inner != 0 { inner } else { 1 });
        self.post.insert(n);
        Ok(())
    }

    /// Give an exit-less loop a way out: a Never test on the backedge whose
    /// untaken projection returns. The Never also holds the loop phis as
    /// extra inputs so the body stays live.
    fn force_exit(&mut self, g: &mut Graph, head: Node) -> Result<(), Error> {
        let back = g
            .in_(head, 2)
            .ok_or_else(|| g.internal(head, "loop without a backedge"))?;
        let phis: Vec<Node> = g
            .outs(head)
            .iter()
            .copied()
            .filter(|&u| matches!(g.op(u), Op::Phi(_)) && g.in_(u, 0) == Some(head))
            .collect();
        let mut ins: Vec<Option<Node>> = vec![Some(back)];
        ins.extend(phis.iter().map(|&p| Some(p)));
        let never = g.init(Op::Never, ins);
        let t = g.init(Op::CProj(0), vec![Some(never)]);
        let f = g.init(Op::CProj(1), vec![Some(never)]);
        g.set_def(head, 2, Some(t));
        let (top, start, stop) = (g.types.top, g.start, g.stop);
        let con = g.init(Op::Constant(top), vec![Some(start)]);
        let ret = g.init(Op::Return, vec![Some(f), Some(con)]);
        g.add_def(stop, ret);
        // The new control sits outside the DFS; number it as finished so
        // nothing mistakes the patched backedge for a second loop
        let lt = self.ltree[&head];
        for (c, l) in [(never, lt), (t, lt), (f, 1), (ret, 1)] {
            self.pre_cnt += 1;
            self.pre.insert(c, self.pre_cnt);
            self.post.insert(c);
            self.ltree.insert(c, l);
        }
        debug!("forced an exit onto loop {head}");
        Ok(())
    }

    fn depth(&mut self, lt: u32) -> u32 {
        let l = &self.loops[lt as usize];
        if l.depth != 0 {
            return l.depth;
        }
        let par = if l.par == 0 { 1 } else { l.par };
        let d = self.depth(par) + 1;
        self.loops[lt as usize].depth = d;
        d
    }

    fn cfg_depth(&mut self, n: Node) -> u32 {
        match self.ltree.get(&n) {
            Some(&lt) => self.depth(lt),
            None => 1,
        }
    }

    /// Place every node in a block. CFG, phis and pinned nodes sit where
    /// they are; floating values wait until all their uses have homes, then
    /// pick the best block on the dominator path between early and the LCA
    /// of the uses.
    fn sched_late(&mut self, g: &mut Graph) -> Result<(), Error> {
        let mut queue: VecDeque<Node> = g.live_nodes().into();
        let mut queued: HashSet<Node> = queue.iter().copied().collect();
        'outer: while let Some(n) = queue.pop_front() {
            queued.remove(&n);
            if self.late.contains_key(&n) {
                continue;
            }
            if g.is_cfg(n) {
                let l = if g.op(n).is_block_head() || n == g.stop {
                    n
                } else {
                    g.in_(n, 0)
                        .ok_or_else(|| g.internal(n, "control node without predecessor"))?
                };
                self.late.insert(n, l);
            } else if matches!(g.op(n), Op::Phi(_)) {
                let r = g
                    .in_(n, 0)
                    .ok_or_else(|| g.internal(n, "phi without a region"))?;
                self.late.insert(n, r);
            } else if g.op(n).is_pinned() {
                let l = g
                    .in_(n, 0)
                    .ok_or_else(|| g.internal(n, "pinned node without control"))?;
                self.late.insert(n, l);
            } else {
                // Not ready until every use is placed
                for &u in g.outs(n) {
                    if !self.late.contains_key(&u) {
                        continue 'outer;
                    }
                }
                // A load also waits for the writers of its memory, whose
                // placement decides the anti-dependences
                if matches!(g.op(n), Op::Load(_)) {
                    let mem = g
                        .in_(n, 1)
                        .ok_or_else(|| g.internal(n, "load without memory"))?;
                    for &u in g.outs(mem) {
                        if defines_mem(g, u) && !self.late.contains_key(&u) {
                            continue 'outer;
                        }
                    }
                }
                self.do_sched_late(g, n)?;
            }
            // Newly placed; defs may have become ready
            for i in 0..g.num_ins(n) {
                let Some(d) = g.in_(n, i) else { continue };
                if !self.late.contains_key(&d) && queued.insert(d) {
                    queue.push_back(d);
                }
                if defines_mem(g, d) {
                    let loads: Vec<Node> = g.outs(d).to_vec();
                    for u in loads {
                        if matches!(g.op(u), Op::Load(_))
                            && !self.late.contains_key(&u)
                            && queued.insert(u)
                        {
                            queue.push_back(u);
                        }
                    }
                }
            }
        }
        // Write the chosen controls back
        let ns = std::mem::take(&mut self.ns);
        for (n, best) in ns {
            g.set_def(n, 0, Some(best));
        }
        Ok(())
    }

    fn do_sched_late(&mut self, g: &mut Graph, n: Node) -> Result<(), Error> {
        let early = g
            .in_(n, 0)
            .ok_or_else(|| g.internal(n, "value has no early placement"))?;
        let mut lca: Option<Node> = None;
        for u in g.outs(n).to_vec() {
            let ub = self.use_block(g, n, u)?;
            lca = Some(match lca {
                None => ub,
                Some(l) => idom_lca(g, l, ub)?,
            });
        }
        let mut lca = lca.ok_or_else(|| g.internal(n, "value with no uses"))?;
        if matches!(g.op(n), Op::Load(_)) {
            lca = self.find_anti_dep(g, n, lca, early)?;
        }
        // Walk up from the LCA to early, taking the shallowest loop; ties go
        // to the latest block
        let mut best = lca;
        let stop_at = g.idom(early);
        let mut cur = g.idom(lca);
        while cur != stop_at {
            let c =
                cur.ok_or_else(|| g.internal(n, "late placement not dominated by early"))?;
            if self.better(g, c, best) {
                best = c;
            }
            cur = g.idom(c);
        }
        if matches!(g.op(best), Op::If | Op::Never) {
            return Err(g.internal(n, "placement landed on a block tail"));
        }
        self.ns.push((n, best));
        self.late.insert(n, best);
        Ok(())
    }

    /// Is `lca` a better home than `best`? Shallower loops always win; at
    /// equal depth prefer the deeper (later) block. A block tail is never
    /// kept.
    fn better(&mut self, g: &mut Graph, lca: Node, best: Node) -> bool {
        let dl = self.cfg_depth(lca);
        let db = self.cfg_depth(best);
        dl < db
            || (dl == db && g.idepth(lca) > g.idepth(best))
            || matches!(g.op(best), Op::If | Op::Never)
    }

    /// The block where `u` needs `n`: for a phi that is the predecessor
    /// feeding the matching arm, not the phi's own block
    fn use_block(&mut self, g: &mut Graph, n: Node, u: Node) -> Result<Node, Error> {
        if !matches!(g.op(u), Op::Phi(_)) {
            return self
                .late
                .get(&u)
                .copied()
                .ok_or_else(|| g.internal(u, "use not yet placed"));
        }
        let r = g
            .in_(u, 0)
            .ok_or_else(|| g.internal(u, "phi without a region"))?;
        let mut found: Option<Node> = None;
        for i in 1..g.num_ins(u) {
            if g.in_(u, i) == Some(n) {
                let c = g
                    .in_(r, i)
                    .ok_or_else(|| g.internal(r, "region path missing"))?;
                found = Some(match found {
                    None => c,
                    Some(f) => idom_lca(g, f, c)?,
                });
            }
        }
        found.ok_or_else(|| g.internal(u, "phi use without a matching path"))
    }

    /// Hoisting a load can move it above a store it used to be ordered
    /// after. Mark the dominator path from the use LCA to early, then for
    /// every same-alias store on this memory, sink the LCA to cover the
    /// store's span and add an anti edge when they land in one block.
    fn find_anti_dep(
        &mut self,
        g: &mut Graph,
        load: Node,
        mut lca: Node,
        early: Node,
    ) -> Result<Node, Error> {
        let stop_at = g.idom(early);
        let mut cur = Some(lca);
        while cur != stop_at {
            let c = cur.ok_or_else(|| g.internal(load, "anti-dependence walk escaped early"))?;
            self.anti.insert(c, load);
            cur = g.idom(c);
        }
        let alias = match g.op(load) {
            Op::Load(mo) => mo.alias,
            _ => unreachable!(),
        };
        let mem = g
            .in_(load, 1)
            .ok_or_else(|| g.internal(load, "load without memory"))?;
        for u in g.outs(mem).to_vec() {
            match g.op(u).clone() {
                Op::Store(st) => {
                    // Stores on other alias classes can never interfere
                    if st.alias != alias {
                        continue;
                    }
                    let st_late = *self
                        .late
                        .get(&u)
                        .ok_or_else(|| g.internal(u, "store placed after its loads"))?;
                    let st_early = g
                        .in_(u, 0)
                        .ok_or_else(|| g.internal(u, "store has no early placement"))?;
                    lca = self.anti_dep(g, load, st_late, st_early, lca, Some(u))?;
                }
                Op::Phi(_) => {
                    // The memory escapes into a merge; treat each arm that
                    // carries it as a use at the matching predecessor
                    let r = g
                        .in_(u, 0)
                        .ok_or_else(|| g.internal(u, "phi without a region"))?;
                    let def_blk = g
                        .in_(mem, 0)
                        .ok_or_else(|| g.internal(mem, "memory def without control"))?;
                    for i in 1..g.num_ins(u) {
                        if g.in_(u, i) == Some(mem) {
                            let blk = g
                                .in_(r, i)
                                .ok_or_else(|| g.internal(r, "region path missing"))?;
                            lca = self.anti_dep(g, load, blk, def_blk, lca, None)?;
                        }
                    }
                }
                Op::Load(_) | Op::Return | Op::Never => {}
                _ => return Err(g.internal(u, "unexpected memory user")),
            }
        }
        Ok(lca)
    }

    /// Walk from a store's block up to its memory def; hitting a block the
    /// load marked means the store can clobber it, so the load's LCA must
    /// cover that block. Same block means an explicit edge orders them.
    fn anti_dep(
        &mut self,
        g: &mut Graph,
        load: Node,
        stblk: Node,
        defblk: Node,
        mut lca: Node,
        st: Option<Node>,
    ) -> Result<Node, Error> {
        let stop_at = g.idom(defblk);
        let mut cur = Some(stblk);
        while cur != stop_at {
            let c = cur.ok_or_else(|| g.internal(load, "store walk escaped its memory def"))?;
            if self.anti.get(&c) == Some(&load) {
                lca = idom_lca(g, lca, c)?;
                if lca == c {
                    if let Some(s) = st {
                        if !g.ins(s).contains(&Some(load)) {
                            g.add_def(s, load);
                        }
                    }
                }
                return Ok(lca);
            }
            cur = g.idom(c);
        }
        Ok(lca)
    }

    /// Fold the placement tables into block membership and a per-block
    /// instruction order
    fn finish(mut self, g: &mut Graph, cfg_rpo: Vec<Node>) -> Result<Schedule, Error> {
        let stop = g.stop;
        let heads: Vec<Node> = cfg_rpo
            .iter()
            .copied()
            .filter(|&c| g.op(c).is_block_head() || c == stop)
            .collect();
        let mut block: HashMap<Node, Node> = HashMap::new();
        for &c in &cfg_rpo {
            block.insert(c, g.block_head_of(c)?);
        }
        for (&n, &l) in &self.late {
            if g.is_cfg(n) || g.is_dead(n) {
                continue;
            }
            block.insert(n, g.block_head_of(l)?);
        }

        let mut members: HashMap<Node, Vec<Node>> = HashMap::new();
        for (&n, &h) in &block {
            if n != h {
                members.entry(h).or_default().push(n);
            }
        }
        let mut order: HashMap<Node, Vec<Node>> = HashMap::new();
        for &h in &heads {
            let mut ms = members.remove(&h).unwrap_or_default();
            ms.sort();
            let mut out = vec![h];
            out.extend(ms.iter().copied().filter(|&m| matches!(g.op(m), Op::Phi(_))));
            let rest: Vec<Node> = ms
                .iter()
                .copied()
                .filter(|&m| !matches!(g.op(m), Op::Phi(_)) && !g.is_cfg(m))
                .collect();
            // Topological order over same-block value edges, smallest id
            // first among the ready
            let in_block: HashSet<Node> = rest.iter().copied().collect();
            let mut cnt: HashMap<Node, usize> = rest
                .iter()
                .map(|&m| {
                    let c = g
                        .ins(m)
                        .iter()
                        .flatten()
                        .filter(|d| in_block.contains(d))
                        .count();
                    (m, c)
                })
                .collect();
            let mut remaining: HashSet<Node> = in_block.clone();
            while !remaining.is_empty() {
                let next = remaining
                    .iter()
                    .copied()
                    .filter(|m| cnt[m] == 0)
                    .min()
                    .ok_or_else(|| g.internal(h, "cycle in block ordering"))?;
                remaining.remove(&next);
                out.push(next);
                for &u in g.outs(next) {
                    if remaining.contains(&u) {
                        *cnt.get_mut(&u).unwrap() -= 1;
                    }
                }
            }
            let mut tail: Vec<Node> = ms.iter().copied().filter(|&m| g.is_cfg(m)).collect();
            tail.sort();
            out.extend(tail);
            order.insert(h, out);
        }

        let mut idom = HashMap::new();
        let mut loop_depth = HashMap::new();
        for &h in &heads {
            let d = self.cfg_depth(h);
            loop_depth.insert(h, d);
            if let Some(p) = g.idom(h) {
                idom.insert(h, g.block_head_of(p)?);
            }
        }
        debug!("scheduled {} blocks", heads.len());
        Ok(Schedule {
            block,
            order,
            rpo: heads,
            idom,
            loop_depth,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::BoolOp;

    #[test]
    fn test_straight_line() {
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let arg = g.proj(g.start, 2);
        let one = g.con(1);
        let sum = g.add(arg, one);
        g.ret(ctrl, sum, &[]);
        let s = g.build_cfg().unwrap();
        s.verify(&g).unwrap();
        // The add sinks to the block returning it
        assert_eq!(s.block[&sum], ctrl);
        assert_eq!(s.loop_depth[&ctrl], 1);
    }

    #[test]
    fn test_forced_loop_exit() {
        // while(1) i = i + arg; never returns on its own
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let arg = g.proj(g.start, 2);
        let head = g.loop_head(ctrl);
        let i0 = g.con(0);
        let i = g.loop_phi("i", head, i0);
        let next = g.add(i, arg);
        g.close_loop(head, head, &[(i, next)]);
        g.iterate();
        let s = g.build_cfg().unwrap();
        s.verify(&g).unwrap();
        assert!(
            g.live_nodes().iter().any(|&n| *g.op(n) == Op::Never),
            "an exit must have been forced"
        );
        assert_eq!(s.loop_depth[&head], 2);
    }

    #[test]
    fn test_loop_body_schedules_in_loop() {
        // while(i < 10) i = i + 1; return i
        let mut g = Graph::new();
        let ctrl = g.cproj(g.start, 0);
        let head = g.loop_head(ctrl);
        let i0 = g.con(0);
        let i = g.loop_phi("i", head, i0);
        let ten = g.con(10);
        let cond = g.cmp(BoolOp::Lt, i, ten);
        let iff = g.iff(head, cond);
        let enter = g.cproj(iff, 0);
        let exit = g.cproj(iff, 1);
        let one = g.con(1);
        let next = g.add(i, one);
        g.close_loop(head, enter, &[(i, next)]);
        g.ret(exit, i, &[]);
        let s = g.build_cfg().unwrap();
        s.verify(&g).unwrap();
        assert_eq!(s.loop_depth[&head], 2);
        assert_eq!(s.loop_depth[&exit], 1);
        // The increment belongs to the loop
        assert_eq!(s.block[&next], s.block[&enter]);
    }
}
