//! Scheduling behavior: block placement, loop-invariant hoisting, forced
//! loop exits and load/store ordering through anti-dependences.
use brine::{BoolOp, Graph, MemOp, Op};

fn logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn counted_loop_schedules() {
    logger();
    // i = 0; while (i < arg) i = i + 1; return i
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let arg = g.proj(g.start, 2);
    let head = g.loop_head(ctrl);
    let zero = g.con(0);
    let i = g.loop_phi("i", head, zero);
    let cond = g.cmp(BoolOp::Lt, i, arg);
    let iff = g.iff(head, cond);
    let enter = g.cproj(iff, 0);
    let exit = g.cproj(iff, 1);
    let one = g.con(1);
    let next = g.add(i, one);
    g.close_loop(head, enter, &[(i, next)]);
    g.ret(exit, i, &[]);

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    g.check_edges().unwrap();
    assert!(!g.pending_work());
    assert_eq!(s.loop_depth[&head], 2);
    assert_eq!(s.loop_depth[&exit], 1);
    assert_eq!(s.block[&next], enter);
    // The loop test sits in the header block, ahead of its If
    assert_eq!(s.block[&cond], head);
    let ord = &s.order[&head];
    assert!(ord.iter().position(|&n| n == cond) < ord.iter().position(|&n| n == iff));
}

#[test]
fn invariant_expression_hoists_out_of_the_loop() {
    logger();
    // while (i < 10) i = i + arg * arg; the multiply never changes
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let arg = g.proj(g.start, 2);
    let head = g.loop_head(ctrl);
    let zero = g.con(0);
    let i = g.loop_phi("i", head, zero);
    let ten = g.con(10);
    let cond = g.cmp(BoolOp::Lt, i, ten);
    let iff = g.iff(head, cond);
    let enter = g.cproj(iff, 0);
    let exit = g.cproj(iff, 1);
    let inv = g.mul(arg, arg);
    let next = g.add(i, inv);
    g.close_loop(head, enter, &[(i, next)]);
    g.ret(exit, i, &[]);

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    assert_eq!(s.loop_depth[&s.block[&next]], 2);
    assert_eq!(
        s.loop_depth[&s.block[&inv]],
        1,
        "the invariant multiply must leave the loop"
    );
}

#[test]
fn infinite_loop_gets_a_forced_exit() {
    logger();
    // while (1) i = i + arg
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let arg = g.proj(g.start, 2);
    let head = g.loop_head(ctrl);
    let zero = g.con(0);
    let i = g.loop_phi("i", head, zero);
    let next = g.add(i, arg);
    g.close_loop(head, head, &[(i, next)]);
    g.iterate();

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    // Forcing the exit must not leave stale worklist entries behind
    assert!(!g.pending_work());
    let never = g
        .live_nodes()
        .into_iter()
        .find(|&n| *g.op(n) == Op::Never)
        .expect("an exit was forced");
    // The untaken side reaches Stop so the loop has a dominator path out
    assert_eq!(s.loop_depth[&head], 2);
    assert!(g.outs(never).iter().any(|&u| matches!(g.op(u), Op::CProj(_))));
    assert!(g.num_ins(g.stop) > 0);
}

#[test]
fn same_alias_store_orders_after_the_load() {
    logger();
    // v = p.x; if (arg) p.x = 2; return v  -- hoisting v above the branch
    // is fine only if the store cannot pass it
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let mem = g.proj(g.start, 1);
    let arg = g.proj(g.start, 2);
    let ib = g.types.int_bot;
    let s_ty = g.types.make_struct("P", &[("x", ib), ("y", ib)]);
    let p = g.new_obj(ctrl, s_ty);
    let mo_x = MemOp::field(&g.types, s_ty, "x").unwrap();
    let iff = g.iff(ctrl, arg);
    let t = g.cproj(iff, 0);
    let f = g.cproj(iff, 1);
    let two = g.con(2);
    let st = g.store(mem, p, two, mo_x.clone());
    let merge = g.region(&[t, f]);
    let mphi = g.phi("x", merge, &[st, mem]);
    let merge = g.close_region(merge);
    let v = g.load(mem, p, mo_x);
    g.ret(merge, v, &[mphi]);

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    assert!(
        g.ins(st).contains(&Some(v)),
        "the store must carry an anti edge to the load"
    );
    // Load lands where the memory still dominates the store; the store
    // stays in its branch
    assert_eq!(s.block[&v], ctrl);
    assert_eq!(s.block[&st], t);
}

#[test]
fn distinct_aliases_do_not_interfere() {
    logger();
    // v = p.x; if (arg) p.y = 2; different fields never alias
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let mem = g.proj(g.start, 1);
    let arg = g.proj(g.start, 2);
    let ib = g.types.int_bot;
    let s_ty = g.types.make_struct("Q", &[("x", ib), ("y", ib)]);
    let p = g.new_obj(ctrl, s_ty);
    let mo_x = MemOp::field(&g.types, s_ty, "x").unwrap();
    let mo_y = MemOp::field(&g.types, s_ty, "y").unwrap();
    let iff = g.iff(ctrl, arg);
    let t = g.cproj(iff, 0);
    let f = g.cproj(iff, 1);
    let two = g.con(2);
    let st = g.store(mem, p, two, mo_y);
    let merge = g.region(&[t, f]);
    let mphi = g.phi("y", merge, &[st, mem]);
    let merge = g.close_region(merge);
    let v = g.load(mem, p, mo_x);
    let ins_before = g.num_ins(st);
    g.ret(merge, v, &[mphi]);

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    assert_eq!(g.num_ins(st), ins_before, "no anti edge across alias classes");
    assert!(!g.ins(st).contains(&Some(v)));
}

#[test]
fn diamond_schedule_places_shared_work_at_the_top() {
    logger();
    // both branches use arg + 1; it must compute once, before the split
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let arg = g.proj(g.start, 2);
    let one = g.con(1);
    let shared = g.add(arg, one);
    let iff = g.iff(ctrl, arg);
    let t = g.cproj(iff, 0);
    let f = g.cproj(iff, 1);
    let two = g.con(2);
    let a = g.mul(shared, two);
    let merge = g.region(&[t, f]);
    let phi = g.phi("v", merge, &[a, shared]);
    let merge = g.close_region(merge);
    g.ret(merge, phi, &[]);

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    // shared feeds the multiply (true branch) and the phi's false arm; its
    // home is the block dominating both
    assert_eq!(s.block[&shared], ctrl);
    assert_eq!(s.block[&a], t);
    assert_eq!(s.block[&phi], merge);
}

#[test]
fn three_way_merge_schedules() {
    logger();
    // if (arg) ... else if (arg < 10) ... else ...; a value computed before
    // the split is still needed after the three-way merge
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let arg = g.proj(g.start, 2);
    let one = g.con(1);
    let shared = g.add(arg, one);
    let iff1 = g.iff(ctrl, arg);
    let t1 = g.cproj(iff1, 0);
    let f1 = g.cproj(iff1, 1);
    let ten = g.con(10);
    let lt = g.cmp(BoolOp::Lt, arg, ten);
    let iff2 = g.iff(f1, lt);
    let t2 = g.cproj(iff2, 0);
    let f2 = g.cproj(iff2, 1);
    let two = g.con(2);
    let three = g.con(3);
    let b = g.mul(shared, two);
    let c = g.mul(shared, three);
    let merge = g.region(&[t1, t2, f2]);
    let phi = g.phi("v", merge, &[shared, b, c]);
    let merge = g.close_region(merge);
    let sum = g.add(phi, shared);
    g.ret(merge, sum, &[]);

    let s = g.build_cfg().unwrap();
    s.verify(&g).unwrap();
    // shared dominates all three arms; the late pass must cross the merge
    assert_eq!(s.block[&shared], ctrl);
    assert_eq!(s.block[&phi], merge);
    assert_eq!(s.block[&sum], merge);
    assert_eq!(s.block[&b], t2);
}

#[test]
fn schedule_covers_every_live_value() {
    logger();
    let mut g = Graph::new();
    let ctrl = g.cproj(g.start, 0);
    let arg = g.proj(g.start, 2);
    let head = g.loop_head(ctrl);
    let zero = g.con(0);
    let i = g.loop_phi("i", head, zero);
    let cond = g.cmp(BoolOp::Lt, i, arg);
    let iff = g.iff(head, cond);
    let enter = g.cproj(iff, 0);
    let exit = g.cproj(iff, 1);
    let one = g.con(1);
    let next = g.add(i, one);
    g.close_loop(head, enter, &[(i, next)]);
    g.ret(exit, i, &[]);

    let s = g.build_cfg().unwrap();
    for n in g.live_nodes() {
        assert!(
            s.block.contains_key(&n),
            "{n} ({}) was never scheduled",
            g.label(n)
        );
    }
}
