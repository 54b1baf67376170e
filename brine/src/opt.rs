//! The global optimizer: a worklist run to fixpoint.
//!
//! Every node whose neighborhood changed goes on the worklist; the engine
//! pops in random order (seeded, so runs reproduce) and peepholes. Random
//! pull order keeps rewrite rules honest: nothing may depend on visit order.
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::graph::{Graph, Node, Op};

/// Worklist with constant-time duplicate suppression and a randomized pull
pub(crate) struct WorkList {
    items: Vec<Node>,
    on: Vec<bool>,
    rng: StdRng,
}

impl WorkList {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            on: Vec::new(),
            rng: StdRng::seed_from_u64(123),
        }
    }

    pub fn push(&mut self, n: Node) {
        let i = n.index();
        if i >= self.on.len() {
            self.on.resize(i + 1, false);
        }
        if !self.on[i] {
            self.on[i] = true;
            self.items.push(n);
        }
    }

    pub fn add_all(&mut self, ns: &[Node]) {
        for &n in ns {
            self.push(n);
        }
    }

    pub fn pop(&mut self) -> Option<Node> {
        if self.items.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..self.items.len());
        let n = self.items.swap_remove(i);
        self.on[n.index()] = false;
        Some(n)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.on.fill(false);
    }
}

impl Graph {
    /// Run every pending peephole to fixpoint.
    ///
    /// On progress the neighborhood is requeued: the node's users, the
    /// replacement, and (when replaced) the node's inputs; registered
    /// dependencies come back via the type/edge mutators. Replaced nodes are
    /// subsumed so their users see the new value.
    pub fn iterate(&mut self) {
        let (cnt0, nop0) = (self.iter_cnt, self.iter_nop);
        while let Some(n) = self.work.pop() {
            if self.is_dead(n) {
                continue;
            }
            let Some(x) = self.peephole_opt(n) else {
                continue;
            };
            if self.is_dead(x) {
                continue;
            }
            if self.ty(x).is_none() {
                let t = self.compute(x);
                self.set_type(x, t);
            }
            if x != n || !matches!(self.op(n), Op::Constant(_)) {
                let outs = self.outs(n).to_vec();
                self.work.add_all(&outs);
                self.work.push(x);
                if x != n {
                    for slot in self.ins(n).to_vec() {
                        if let Some(d) = slot {
                            self.work.push(d);
                        }
                    }
                    self.subsume(n, x);
                }
                self.move_deps(x);
            }
        }
        debug!(
            "iterate: {} visits, {} without progress",
            self.iter_cnt - cnt0,
            self.iter_nop - nop0
        );
    }

    /// Requeue every live node; a converged graph then iterates with zero
    /// changes. Debugging and test support.
    pub fn flood_worklist(&mut self) {
        for n in self.live_nodes() {
            self.work.push(n);
        }
    }

    /// Anything still queued?
    pub fn pending_work(&self) -> bool {
        !self.work.is_empty()
    }
}
