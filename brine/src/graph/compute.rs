//! Per-operator type transfer functions.
//!
//! `compute` is pure: it reads the node's operator and its input types and
//! produces a type, never touching edges. Monotonicity is the contract that
//! makes the global pass terminate; recomputation only ever lifts a type.
use super::{Graph, Node, Op};
use crate::graph::op::BoolOp;
use crate::types::{Ty, TypeData};

impl Graph {
    pub(crate) fn compute(&mut self, n: Node) -> Ty {
        let op = self.op(n).clone();
        match op {
            Op::Start => self.start_ty,
            Op::Stop | Op::Return => self.types.bot,
            Op::Constant(t) => t,
            Op::Region => self.compute_region(n),
            Op::Loop => {
                if self.in_progress(n) {
                    self.types.ctrl
                } else {
                    self.val_ty(self.in_(n, 1))
                }
            }
            Op::If => self.compute_if(n),
            Op::Never => {
                let ct = self.val_ty(self.in_(n, 0));
                if ct != self.types.ctrl && ct != self.types.bot {
                    self.types.if_neither
                } else {
                    self.types.if_both
                }
            }
            Op::CProj(i) | Op::Proj(i) => {
                let t = self.val_ty(self.in_(n, 0));
                match self.types.data(t) {
                    TypeData::Tuple(es) => es[i as usize],
                    _ => self.types.bot,
                }
            }
            Op::Phi(_) => self.compute_phi(n),
            Op::Add | Op::Sub | Op::Mul | Op::Div => self.compute_arith(n, &op),
            Op::And | Op::Or | Op::Xor | Op::Shl | Op::Shr | Op::Sar => {
                self.compute_bits(n, &op)
            }
            Op::Minus => {
                let t = self.val_ty(self.in_(n, 1));
                match *self.types.data(t) {
                    TypeData::FltCon(v) => return self.types.flt_con(-v.0),
                    TypeData::FltTop => return self.types.flt_top,
                    TypeData::FltBot => return self.types.flt_bot,
                    _ => {}
                }
                if self.types.is_high(t) {
                    return self.types.int_top;
                }
                match *self.types.data(t) {
                    TypeData::Int { lo, hi } => match (hi.checked_neg(), lo.checked_neg()) {
                        (Some(l), Some(h)) => self.types.int(l, h),
                        _ => self.types.int_bot,
                    },
                    _ => self.types.int_bot,
                }
            }
            Op::Not => self.compute_not(n),
            Op::Bool(b) => self.compute_bool(n, b),
            Op::New(t) => t,
            Op::Load(mo) => mo.declared,
            Op::Store(mo) => {
                let v = self.val_ty(self.in_(n, 3));
                self.types.mem(mo.alias, v)
            }
        }
    }

    fn compute_region(&mut self, n: Node) -> Ty {
        if self.in_progress(n) {
            return self.types.ctrl;
        }
        let mut t = self.types.xctrl;
        for i in 1..self.num_ins(n) {
            let ti = self.val_ty(self.in_(n, i));
            t = self.types.meet(t, ti);
        }
        t
    }

    fn compute_if(&mut self, n: Node) -> Ty {
        // An unreachable If reaches neither projection
        let ct = self.val_ty(self.in_(n, 0));
        if ct != self.types.ctrl && ct != self.types.bot {
            return self.types.if_neither;
        }
        let t = self.val_ty(self.in_(n, 1));
        // Wait for a high predicate to fall before picking a side
        if self.types.is_high(t) {
            return self.types.if_neither;
        }
        if self.types.is_constant(t) {
            let zeroish = t == self.types.int_zero || t == self.types.ptr_null;
            return if zeroish { self.types.if_false } else { self.types.if_true };
        }
        match *self.types.data(t) {
            TypeData::Int { lo, hi } if lo > 0 || hi < 0 => self.types.if_true,
            TypeData::Ptr { nil: false, .. } => self.types.if_true,
            _ => self.types.if_both,
        }
    }

    fn compute_phi(&mut self, n: Node) -> Ty {
        let Some(r) = self.in_(n, 0) else {
            return self.types.bot;
        };
        // Region already collapsed to plain control; idealize folds us next
        if !matches!(self.op(r), Op::Region | Op::Loop) {
            return self.val_ty(self.in_(n, 1));
        }
        if self.in_progress(n) || self.in_progress(r) {
            // Open backedge: stay pessimistic within the init value's family
            let t = self.val_ty(self.in_(n, 1));
            return self.types.glb(t);
        }
        let mut t = self.types.top;
        for i in 1..self.num_ins(n) {
            // Only live paths contribute
            if self.val_ty(self.in_(r, i)) != self.types.xctrl {
                let vi = self.val_ty(self.in_(n, i));
                t = self.types.meet(t, vi);
            }
        }
        t
    }

    fn flt_operand(&self, t: Ty) -> bool {
        matches!(
            self.types.data(t),
            TypeData::FltTop | TypeData::FltBot | TypeData::FltCon(_)
        )
    }

    fn compute_arith(&mut self, n: Node, op: &Op) -> Ty {
        let ta = self.val_ty(self.in_(n, 1));
        let tb = self.val_ty(self.in_(n, 2));
        if self.flt_operand(ta) || self.flt_operand(tb) {
            return self.compute_flt(ta, tb, op);
        }
        if self.types.is_high(ta) || self.types.is_high(tb) {
            return self.types.int_top;
        }
        let (TypeData::Int { lo: l1, hi: h1 }, TypeData::Int { lo: l2, hi: h2 }) =
            (self.types.data(ta).clone(), self.types.data(tb).clone())
        else {
            return self.types.int_bot;
        };
        match op {
            Op::Add => match (l1.checked_add(l2), h1.checked_add(h2)) {
                (Some(lo), Some(hi)) => self.types.int(lo, hi),
                _ => self.types.int_bot,
            },
            Op::Sub => match (l1.checked_sub(h2), h1.checked_sub(l2)) {
                (Some(lo), Some(hi)) => self.types.int(lo, hi),
                _ => self.types.int_bot,
            },
            Op::Mul => {
                if l1 == h1 && l2 == h2 {
                    match l1.checked_mul(l2) {
                        Some(v) => self.types.int_con(v),
                        None => self.types.int_bot,
                    }
                } else {
                    self.types.int_bot
                }
            }
            Op::Div => {
                if l1 == h1 && l2 == h2 {
                    // Division by zero folds to zero, like the source language
                    let v = if l2 == 0 { 0 } else { l1.wrapping_div(l2) };
                    self.types.int_con(v)
                } else {
                    self.types.int_bot
                }
            }
            _ => unreachable!(),
        }
    }

    fn compute_flt(&mut self, ta: Ty, tb: Ty, op: &Op) -> Ty {
        use TypeData::*;
        match (self.types.data(ta).clone(), self.types.data(tb).clone()) {
            (FltCon(x), FltCon(y)) => {
                // IEEE semantics throughout; division by zero is inf/nan
                let v = match op {
                    Op::Add => x.0 + y.0,
                    Op::Sub => x.0 - y.0,
                    Op::Mul => x.0 * y.0,
                    Op::Div => x.0 / y.0,
                    _ => unreachable!(),
                };
                self.types.flt_con(v)
            }
            (FltTop, FltTop | FltBot | FltCon(_)) | (FltBot | FltCon(_), FltTop) => {
                self.types.flt_top
            }
            (FltBot, FltBot | FltCon(_)) | (FltCon(_), FltBot) => self.types.flt_bot,
            // A float met an integer; nothing sound to say
            _ => self.types.bot,
        }
    }

    fn compute_bits(&mut self, n: Node, op: &Op) -> Ty {
        let ta = self.val_ty(self.in_(n, 1));
        let tb = self.val_ty(self.in_(n, 2));
        if self.types.is_high(ta) || self.types.is_high(tb) {
            return self.types.int_top;
        }
        let (TypeData::Int { lo: l1, hi: h1 }, TypeData::Int { lo: l2, hi: h2 }) =
            (self.types.data(ta).clone(), self.types.data(tb).clone())
        else {
            return self.types.int_bot;
        };
        if l1 == h1 && l2 == h2 {
            // Shift counts wrap at the word size
            let v = match op {
                Op::And => l1 & l2,
                Op::Or => l1 | l2,
                Op::Xor => l1 ^ l2,
                Op::Shl => l1 << (l2 & 63),
                Op::Shr => ((l1 as u64) >> (l2 & 63)) as i64,
                Op::Sar => l1 >> (l2 & 63),
                _ => unreachable!(),
            };
            return self.types.int_con(v);
        }
        // A non-negative mask bounds the result
        if *op == Op::And {
            if l2 >= 0 {
                return self.types.int(0, h2);
            }
            if l1 >= 0 {
                return self.types.int(0, h1);
            }
        }
        self.types.int_bot
    }

    fn compute_not(&mut self, n: Node) -> Ty {
        let t = self.val_ty(self.in_(n, 1));
        if self.types.is_high(t) {
            return self.types.int_top;
        }
        match *self.types.data(t) {
            TypeData::Int { lo, hi } => {
                if (lo, hi) == (0, 0) {
                    self.types.int_one
                } else if lo > 0 || hi < 0 {
                    self.types.int_zero
                } else {
                    self.types.int_bool
                }
            }
            TypeData::Ptr { nil, .. } => {
                if t == self.types.ptr_null {
                    self.types.int_one
                } else if !nil {
                    self.types.int_zero
                } else {
                    self.types.int_bool
                }
            }
            _ => self.types.int_bool,
        }
    }

    fn compute_bool(&mut self, n: Node, b: BoolOp) -> Ty {
        let ta = self.val_ty(self.in_(n, 1));
        let tb = self.val_ty(self.in_(n, 2));
        if self.types.is_high(ta) || self.types.is_high(tb) {
            return self.types.int_top;
        }
        if let (TypeData::Int { lo: l1, hi: h1 }, TypeData::Int { lo: l2, hi: h2 }) =
            (self.types.data(ta).clone(), self.types.data(tb).clone())
        {
            if l1 == h1 && l2 == h2 {
                return if b.apply(l1, l2) { self.types.int_one } else { self.types.int_zero };
            }
            let known = match b {
                // Fully ordered ranges decide without constants
                BoolOp::Lt if h1 < l2 => Some(true),
                BoolOp::Lt if l1 >= h2 => Some(false),
                BoolOp::Le if h1 <= l2 => Some(true),
                BoolOp::Le if l1 > h2 => Some(false),
                BoolOp::Eq if h1 < l2 || h2 < l1 => Some(false),
                _ => None,
            };
            return match known {
                Some(true) => self.types.int_one,
                Some(false) => self.types.int_zero,
                None => self.types.int_bool,
            };
        }
        if let (TypeData::FltCon(x), TypeData::FltCon(y)) =
            (self.types.data(ta).clone(), self.types.data(tb).clone())
        {
            let r = match b {
                BoolOp::Eq => x == y,
                BoolOp::Lt => x < y,
                BoolOp::Le => x <= y,
            };
            return if r { self.types.int_one } else { self.types.int_zero };
        }
        // Pointer equality against null
        if b == BoolOp::Eq {
            let null = self.types.ptr_null;
            if ta == null && tb == null {
                return self.types.int_one;
            }
            let nonnil = |g: &Self, t: Ty| {
                matches!(*g.types.data(t), TypeData::Ptr { nil: false, .. })
            };
            if (ta == null && nonnil(self, tb)) || (tb == null && nonnil(self, ta)) {
                return self.types.int_zero;
            }
        }
        self.types.int_bool
    }
}
