//! The interned type lattice
//!
//! Every node in a [`Graph`](crate::Graph) carries a type drawn from this
//! lattice. Types are interned in a per-session [`Types`] arena: structurally
//! equal types share a single [`Ty`] handle, so lattice-element equality is
//! handle equality and never requires a deep compare.
//!
//! The lattice is a family of mini-lattices (control, integer ranges, floats,
//! tuples, memory slices, pointers, structs) glued together under a global
//! `Top` and `Bot`. `meet` moves down toward `Bot`, `dual` reflects through
//! the centerline, and `join` is defined as `dual(meet(dual, dual))`.
//!
//! ```
//! # use brine::Types;
//! let mut ts = Types::new();
//! let a = ts.int(0, 5);
//! let b = ts.int(3, 9);
//! assert_eq!(ts.meet(a, b), ts.int(0, 9));
//! assert_eq!(ts.join(a, b), ts.int(3, 5));
//! ```
use ordered_float::OrderedFloat;

use crate::indexed::{define_index, IndexMap};

define_index!(Ty, "Handle for an interned type in a particular `Types` arena");

/// One field of a struct type.
///
/// The alias class is assigned once per declared storage location and never
/// shared, so two loads on different alias classes can never observe the same
/// memory.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Field {
    pub name: Box<str>,
    pub ty: Ty,
    pub alias: u32,
}

/// Structural payload of an interned type
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeData {
    /// Bottom of the whole lattice: "any value, possibly many"
    Bot,
    /// Top of the whole lattice: "no value yet"
    Top,
    /// Reachable control
    Ctrl,
    /// Unreachable (dead) control
    XCtrl,
    /// Integer range `[lo, hi]`; constant iff `lo == hi`, high iff `lo > hi`
    Int { lo: i64, hi: i64 },
    FltBot,
    FltTop,
    FltCon(OrderedFloat<f64>),
    /// Fixed-arity product, used for multi-result nodes (`Start`, `If`)
    Tuple(Box<[Ty]>),
    /// One alias class of memory; alias 0 stands for all of memory
    Mem { alias: u32, t: Ty },
    /// Pointer to `obj`, possibly nil
    Ptr { obj: Ty, nil: bool },
    /// Named struct with per-field alias classes
    Struct { name: Box<str>, fields: Box<[Field]> },
    StructBot,
    StructTop,
}

/// Per-session type arena.
///
/// Commonly used lattice elements are interned up front and exposed as plain
/// fields (`bot`, `ctrl`, `int_bot`, ...). Everything else is built through
/// the constructor methods, which deduplicate via the interning map.
pub struct Types {
    store: IndexMap<TypeData, Ty>,
    next_alias: u32,

    pub bot: Ty,
    pub top: Ty,
    pub ctrl: Ty,
    pub xctrl: Ty,
    pub int_bot: Ty,
    pub int_top: Ty,
    pub int_zero: Ty,
    pub int_one: Ty,
    pub int_bool: Ty,
    pub flt_bot: Ty,
    pub flt_top: Ty,
    pub mem_bot: Ty,
    pub mem_top: Ty,
    pub struct_bot: Ty,
    pub struct_top: Ty,
    pub ptr_bot: Ty,
    pub ptr_top: Ty,
    pub ptr_null: Ty,
    pub if_both: Ty,
    pub if_true: Ty,
    pub if_false: Ty,
    pub if_neither: Ty,
}

impl Types {
    pub fn new() -> Self {
        let mut store: IndexMap<TypeData, Ty> = IndexMap::default();
        let bot = store.insert(TypeData::Bot);
        let top = store.insert(TypeData::Top);
        let ctrl = store.insert(TypeData::Ctrl);
        let xctrl = store.insert(TypeData::XCtrl);
        let int_bot = store.insert(TypeData::Int { lo: i64::MIN, hi: i64::MAX });
        let int_top = store.insert(TypeData::Int { lo: i64::MAX, hi: i64::MIN });
        let int_zero = store.insert(TypeData::Int { lo: 0, hi: 0 });
        let int_one = store.insert(TypeData::Int { lo: 1, hi: 1 });
        let int_bool = store.insert(TypeData::Int { lo: 0, hi: 1 });
        let flt_bot = store.insert(TypeData::FltBot);
        let flt_top = store.insert(TypeData::FltTop);
        let mem_bot = store.insert(TypeData::Mem { alias: 0, t: bot });
        let mem_top = store.insert(TypeData::Mem { alias: 0, t: top });
        let struct_bot = store.insert(TypeData::StructBot);
        let struct_top = store.insert(TypeData::StructTop);
        let ptr_bot = store.insert(TypeData::Ptr { obj: struct_bot, nil: true });
        let ptr_top = store.insert(TypeData::Ptr { obj: struct_top, nil: false });
        let ptr_null = store.insert(TypeData::Ptr { obj: struct_top, nil: true });
        let if_both = store.insert(TypeData::Tuple(Box::new([ctrl, ctrl])));
        let if_true = store.insert(TypeData::Tuple(Box::new([ctrl, xctrl])));
        let if_false = store.insert(TypeData::Tuple(Box::new([xctrl, ctrl])));
        let if_neither = store.insert(TypeData::Tuple(Box::new([xctrl, xctrl])));
        Self {
            store,
            next_alias: 0,
            bot,
            top,
            ctrl,
            xctrl,
            int_bot,
            int_top,
            int_zero,
            int_one,
            int_bool,
            flt_bot,
            flt_top,
            mem_bot,
            mem_top,
            struct_bot,
            struct_top,
            ptr_bot,
            ptr_top,
            ptr_null,
            if_both,
            if_true,
            if_false,
            if_neither,
        }
    }

    /// Structural payload behind a handle
    pub fn data(&self, t: Ty) -> &TypeData {
        &self.store[t]
    }

    pub fn int(&mut self, lo: i64, hi: i64) -> Ty {
        self.store.insert(TypeData::Int { lo, hi })
    }

    pub fn int_con(&mut self, v: i64) -> Ty {
        self.int(v, v)
    }

    pub fn flt_con(&mut self, v: f64) -> Ty {
        self.store.insert(TypeData::FltCon(OrderedFloat(v)))
    }

    pub fn tuple(&mut self, elems: &[Ty]) -> Ty {
        self.store.insert(TypeData::Tuple(elems.into()))
    }

    pub fn mem(&mut self, alias: u32, t: Ty) -> Ty {
        self.store.insert(TypeData::Mem { alias, t })
    }

    pub fn ptr(&mut self, obj: Ty, nil: bool) -> Ty {
        self.store.insert(TypeData::Ptr { obj, nil })
    }

    /// Declare a struct type, assigning a fresh alias class to every field.
    ///
    /// Two declarations never share alias classes even when their shapes
    /// agree, so each call describes a distinct set of storage locations.
    pub fn make_struct(&mut self, name: &str, fields: &[(&str, Ty)]) -> Ty {
        let fields: Box<[Field]> = fields
            .iter()
            .map(|&(fname, ty)| {
                self.next_alias += 1;
                Field { name: fname.into(), ty, alias: self.next_alias }
            })
            .collect();
        self.store.insert(TypeData::Struct { name: name.into(), fields })
    }

    /// Look up a field of a struct type by name
    pub fn field(&self, s: Ty, name: &str) -> Option<&Field> {
        match self.data(s) {
            TypeData::Struct { fields, .. } => fields.iter().find(|f| &*f.name == name),
            _ => None,
        }
    }

    /// Greatest lower bound over `a` and `b`
    pub fn meet(&mut self, a: Ty, b: Ty) -> Ty {
        if a == b {
            return a;
        }
        use TypeData::*;
        let (da, db) = (self.data(a).clone(), self.data(b).clone());
        match (da, db) {
            (Top, _) => b,
            (_, Top) => a,
            (Bot, _) | (_, Bot) => self.bot,

            (Ctrl, XCtrl) | (XCtrl, Ctrl) => self.ctrl,

            (Int { lo: l1, hi: h1 }, Int { lo: l2, hi: h2 }) => {
                self.int(l1.min(l2), h1.max(h2))
            }

            (FltTop, FltBot | FltCon(_)) => b,
            (FltBot | FltCon(_), FltTop) => a,
            // Unequal constants, or anything against FltBot
            (FltBot | FltCon(_), FltBot | FltCon(_)) => self.flt_bot,

            (Tuple(xs), Tuple(ys)) => {
                if xs.len() != ys.len() {
                    return self.bot;
                }
                let elems: Vec<Ty> =
                    xs.iter().zip(ys.iter()).map(|(&x, &y)| self.meet(x, y)).collect();
                self.tuple(&elems)
            }

            (Mem { .. }, Mem { .. }) => {
                if a == self.mem_top {
                    return b;
                }
                if b == self.mem_top {
                    return a;
                }
                if a == self.mem_bot || b == self.mem_bot {
                    return self.mem_bot;
                }
                let (Mem { alias: a1, t: t1 }, Mem { alias: a2, t: t2 }) =
                    (self.data(a).clone(), self.data(b).clone())
                else {
                    unreachable!()
                };
                if a1 == a2 {
                    let t = self.meet(t1, t2);
                    self.mem(a1, t)
                } else {
                    self.mem_bot
                }
            }

            (Ptr { obj: o1, nil: n1 }, Ptr { obj: o2, nil: n2 }) => {
                let obj = self.meet(o1, o2);
                self.ptr(obj, n1 | n2)
            }

            (StructTop, Struct { .. } | StructBot) => b,
            (Struct { .. } | StructBot, StructTop) => a,
            (StructBot, Struct { .. }) | (Struct { .. }, StructBot) => self.struct_bot,
            (
                Struct { name: n1, fields: f1 },
                Struct { name: n2, fields: f2 },
            ) => {
                // Same declaration iff names and alias classes agree
                let same = n1 == n2
                    && f1.len() == f2.len()
                    && f1
                        .iter()
                        .zip(f2.iter())
                        .all(|(x, y)| x.name == y.name && x.alias == y.alias);
                if !same {
                    return self.struct_bot;
                }
                let fields: Box<[Field]> = f1
                    .iter()
                    .zip(f2.iter())
                    .map(|(x, y)| Field {
                        name: x.name.clone(),
                        ty: self.meet(x.ty, y.ty),
                        alias: x.alias,
                    })
                    .collect();
                self.store.insert(Struct { name: n1, fields })
            }

            // Mixed families fall to the bottom of the whole lattice
            _ => self.bot,
        }
    }

    /// Lattice dual; involutive
    pub fn dual(&mut self, t: Ty) -> Ty {
        use TypeData::*;
        match self.data(t).clone() {
            Bot => self.top,
            Top => self.bot,
            Ctrl => self.xctrl,
            XCtrl => self.ctrl,
            Int { lo, hi } => {
                if lo == hi {
                    t
                } else {
                    self.int(hi, lo)
                }
            }
            FltBot => self.flt_top,
            FltTop => self.flt_bot,
            FltCon(_) => t,
            Tuple(elems) => {
                let elems: Vec<Ty> = elems.iter().map(|&e| self.dual(e)).collect();
                self.tuple(&elems)
            }
            Mem { alias, t: mt } => {
                let mt = self.dual(mt);
                self.mem(alias, mt)
            }
            Ptr { obj, nil } => {
                let obj = self.dual(obj);
                self.ptr(obj, !nil)
            }
            Struct { name, fields } => {
                let fields: Box<[Field]> = fields
                    .iter()
                    .map(|f| Field {
                        name: f.name.clone(),
                        ty: self.dual(f.ty),
                        alias: f.alias,
                    })
                    .collect();
                self.store.insert(Struct { name, fields })
            }
            StructBot => self.struct_top,
            StructTop => self.struct_bot,
        }
    }

    /// Least upper bound, defined through the dual
    pub fn join(&mut self, a: Ty, b: Ty) -> Ty {
        if a == b {
            return a;
        }
        let (da, db) = (self.dual(a), self.dual(b));
        let m = self.meet(da, db);
        self.dual(m)
    }

    /// True if `a` falls to `b`: `meet(a, b) == b`
    pub fn isa(&mut self, a: Ty, b: Ty) -> bool {
        self.meet(a, b) == b
    }

    /// Above the centerline: no concrete value can have this type yet
    pub fn is_high(&self, t: Ty) -> bool {
        use TypeData::*;
        match self.data(t) {
            Top | XCtrl | FltTop | StructTop => true,
            Int { lo, hi } => lo > hi,
            Ptr { obj, nil } => !nil && self.is_high(*obj),
            _ => false,
        }
    }

    /// Exactly one concrete value
    pub fn is_constant(&self, t: Ty) -> bool {
        use TypeData::*;
        match self.data(t) {
            Int { lo, hi } => lo == hi,
            FltCon(_) => true,
            Ptr { .. } => t == self.ptr_null,
            _ => false,
        }
    }

    pub fn is_high_or_const(&self, t: Ty) -> bool {
        self.is_high(t) || self.is_constant(t)
    }

    /// Pessimistic per-family bound, used to seed in-progress loop phis
    pub fn glb(&mut self, t: Ty) -> Ty {
        use TypeData::*;
        match self.data(t) {
            Int { .. } => self.int_bot,
            FltBot | FltTop | FltCon(_) => self.flt_bot,
            Ctrl | XCtrl => self.ctrl,
            Mem { .. } => self.mem_bot,
            Ptr { .. } => self.ptr_bot,
            _ => self.bot,
        }
    }

    /// Render a type for prints and graph dumps
    pub fn str(&self, t: Ty) -> String {
        use TypeData::*;
        match self.data(t) {
            Bot => "Bot".to_string(),
            Top => "Top".to_string(),
            Ctrl => "Ctrl".to_string(),
            XCtrl => "~Ctrl".to_string(),
            Int { lo, hi } => {
                if lo == hi {
                    format!("{lo}")
                } else if (*lo, *hi) == (i64::MIN, i64::MAX) {
                    "i64".to_string()
                } else if (*lo, *hi) == (i64::MAX, i64::MIN) {
                    "~i64".to_string()
                } else if (*lo, *hi) == (0, 1) {
                    "bool".to_string()
                } else if lo > hi {
                    format!("~[{hi},{lo}]")
                } else {
                    format!("[{lo},{hi}]")
                }
            }
            FltBot => "f64".to_string(),
            FltTop => "~f64".to_string(),
            FltCon(v) => format!("{}", v.0),
            Tuple(elems) => {
                let mut s = "[".to_string();
                for (i, &e) in elems.iter().enumerate() {
                    if i > 0 {
                        s.push(',');
                    }
                    s.push_str(&self.str(e));
                }
                s.push(']');
                s
            }
            Mem { alias: 0, t: mt } => {
                if self.is_high(*mt) || *mt == self.top {
                    "~MEM".to_string()
                } else {
                    "MEM".to_string()
                }
            }
            Mem { alias, t: mt } => format!("#{alias}:{}", self.str(*mt)),
            Ptr { .. } if t == self.ptr_null => "null".to_string(),
            Ptr { obj, nil } => {
                format!("*{}{}", self.str(*obj), if *nil { "?" } else { "" })
            }
            Struct { name, .. } => name.to_string(),
            StructBot => "$BOT".to_string(),
            StructTop => "$TOP".to_string(),
        }
    }
}

impl Default for Types {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A spread of sample types reaching into every mini-lattice, with duals
    fn gather(ts: &mut Types) -> Vec<Ty> {
        let s1 = ts.make_struct("S", &[("x", ts.int_bot), ("y", ts.int_bot)]);
        let mut out = vec![
            ts.bot,
            ts.top,
            ts.ctrl,
            ts.xctrl,
            ts.int_bot,
            ts.int_top,
            ts.int_zero,
            ts.int_one,
            ts.int_bool,
            ts.flt_bot,
            ts.flt_top,
            ts.mem_bot,
            ts.mem_top,
            ts.struct_bot,
            ts.struct_top,
            ts.ptr_bot,
            ts.ptr_top,
            ts.ptr_null,
            ts.if_both,
            ts.if_true,
            ts.if_false,
            ts.if_neither,
            s1,
        ];
        let extra = [
            ts.int(0, 5),
            ts.int(3, 9),
            ts.int(-5, 17),
            ts.int_con(42),
            ts.flt_con(3.5),
            ts.flt_con(-0.5),
            ts.mem(1, ts.int_bot),
            ts.mem(2, ts.int_zero),
            ts.ptr(s1, false),
            ts.ptr(s1, true),
            ts.tuple(&[ts.ctrl, ts.mem_bot, ts.int_bot]),
        ];
        out.extend(extra);
        let duals: Vec<Ty> = out.iter().map(|&t| ts.dual(t)).collect();
        out.extend(duals);
        out.sort();
        out.dedup();
        out
    }

    #[test]
    fn test_interning_identity() {
        let mut ts = Types::new();
        assert_eq!(ts.int(3, 3), ts.int_con(3));
        assert_eq!(ts.int(0, 1), ts.int_bool);
        assert_eq!(ts.mem(0, ts.bot), ts.mem_bot);
        assert_eq!(ts.ptr(ts.struct_top, true), ts.ptr_null);
        // Separate declarations get separate alias classes
        let s1 = ts.make_struct("S", &[("x", ts.int_bot)]);
        let s2 = ts.make_struct("S", &[("x", ts.int_bot)]);
        assert_ne!(s1, s2);
        // But the very same declaration is the very same handle
        assert_eq!(ts.field(s1, "x").unwrap().alias, 1);
        assert_eq!(ts.field(s2, "x").unwrap().alias, 2);
    }

    #[test]
    fn test_meet_laws() {
        let mut ts = Types::new();
        let all = gather(&mut ts);
        for &a in &all {
            // Idempotent, Top identity, Bot absorbing
            assert_eq!(ts.meet(a, a), a, "meet not idempotent on {}", ts.str(a));
            let top = ts.top;
            let bot = ts.bot;
            assert_eq!(ts.meet(a, top), a);
            assert_eq!(ts.meet(a, bot), bot);
            for &b in &all {
                // Commutative
                let ab = ts.meet(a, b);
                let ba = ts.meet(b, a);
                assert_eq!(ab, ba, "meet({}, {})", ts.str(a), ts.str(b));
                // Both operands fall to the meet
                assert!(ts.isa(a, ab));
                assert!(ts.isa(b, ab));
            }
        }
    }

    #[test]
    fn test_meet_associative() {
        let mut ts = Types::new();
        let all = gather(&mut ts);
        for &a in &all {
            for &b in &all {
                for &c in &all {
                    let ab = ts.meet(a, b);
                    let ab_c = ts.meet(ab, c);
                    let bc = ts.meet(b, c);
                    let a_bc = ts.meet(a, bc);
                    assert_eq!(
                        ab_c,
                        a_bc,
                        "assoc fail: ({}, {}, {})",
                        ts.str(a),
                        ts.str(b),
                        ts.str(c)
                    );
                }
            }
        }
    }

    #[test]
    fn test_dual_involution_and_symmetry() {
        let mut ts = Types::new();
        let all = gather(&mut ts);
        for &a in &all {
            let d = ts.dual(a);
            let dd = ts.dual(d);
            assert_eq!(a, dd, "dual not involutive on {}", ts.str(a));
            for &b in &all {
                // dual(meet) == join(duals)
                let m = ts.meet(a, b);
                let dm = ts.dual(m);
                let da = ts.dual(a);
                let db = ts.dual(b);
                assert_eq!(dm, ts.join(da, db));
            }
        }
    }

    #[test]
    fn test_int_ranges() {
        let mut ts = Types::new();
        let a = ts.int(0, 5);
        let b = ts.int(3, 9);
        assert_eq!(ts.meet(a, b), ts.int(0, 9));
        assert_eq!(ts.join(a, b), ts.int(3, 5));
        let c = ts.int_con(7);
        assert!(ts.is_constant(c));
        assert!(!ts.is_high(c));
        assert!(ts.is_high(ts.int_top));
        let m = ts.meet(c, ts.int_top);
        assert_eq!(m, c);
        // Constants are self-dual
        assert_eq!(ts.dual(c), c);
    }

    #[test]
    fn test_mixed_families() {
        let mut ts = Types::new();
        let i = ts.int_bot;
        let f = ts.flt_bot;
        let m = ts.meet(i, f);
        assert_eq!(m, ts.bot);
        let c = ts.meet(ts.ctrl, i);
        assert_eq!(c, ts.bot);
    }

    #[test]
    fn test_memory_aliases() {
        let mut ts = Types::new();
        let m1 = ts.mem(1, ts.int_bot);
        let m2 = ts.mem(2, ts.int_bot);
        let m1c = ts.mem(1, ts.int_zero);
        // Differing alias classes fall to all-memory
        assert_eq!(ts.meet(m1, m2), ts.mem_bot);
        // Same alias meets the payloads
        assert_eq!(ts.meet(m1, m1c), m1);
        let mt = ts.mem_top;
        assert_eq!(ts.meet(m1, mt), m1);
    }

    #[test]
    fn test_pointers() {
        let mut ts = Types::new();
        let s = ts.make_struct("S", &[("x", ts.int_bot)]);
        let p = ts.ptr(s, false);
        let pn = ts.ptr(s, true);
        let null = ts.ptr_null;
        assert_eq!(ts.meet(p, null), pn);
        assert!(ts.is_constant(null));
        assert!(ts.is_high(ts.ptr_top));
        assert!(!ts.is_high(p));
        assert!(ts.isa(p, ts.ptr_bot));
    }
}
