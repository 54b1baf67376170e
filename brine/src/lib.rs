//! A sea-of-nodes intermediate representation with a peephole optimizer and
//! global code motion.
//!
//! Programs are built directly into a [`Graph`], where control flow and data
//! flow are one structure: `Region`, `If` and `Loop` are nodes just like
//! `Add`. Every node carries a type drawn from an interned lattice
//! ([`Types`]), and construction is itself optimizing: constant folding,
//! algebraic simplification and global value numbering run as each node is
//! made, with [`Graph::iterate`] driving the same rewrites to a global
//! fixpoint afterwards.
//!
//! ```
//! use brine::{BoolOp, Graph};
//!
//! // return arg < 10 ? arg + 1 : arg
//! let mut g = Graph::new();
//! let ctrl = g.cproj(g.start, 0);
//! let arg = g.proj(g.start, 2);
//! let ten = g.con(10);
//! let cond = g.cmp(BoolOp::Lt, arg, ten);
//! let iff = g.iff(ctrl, cond);
//! let t = g.cproj(iff, 0);
//! let f = g.cproj(iff, 1);
//! let one = g.con(1);
//! let inc = g.add(arg, one);
//! let merge = g.region(&[t, f]);
//! let phi = g.phi("v", merge, &[inc, arg]);
//! let merge = g.close_region(merge);
//! g.ret(merge, phi, &[]);
//! g.iterate();
//!
//! // Values have no block until scheduled
//! let schedule = g.build_cfg().unwrap();
//! assert!(schedule.verify(&g).is_ok());
//! ```
//!
//! [`Graph::build_cfg`] turns the optimized graph back into a CFG: it finds
//! loops (forcing an exit onto any infinite loop), then schedules every
//! value between its earliest legal block and the latest block dominating
//! its uses, hoisting loop-invariant work outward and adding
//! anti-dependence edges so stores never slide between a load and the
//! memory it read.
pub mod gcm;
pub mod graph;
pub mod types;

mod error;
mod indexed;
mod opt;
mod print;

pub use error::Error;
pub use gcm::Schedule;
pub use graph::{BoolOp, Graph, MemOp, Node, Op};
pub use types::{Ty, TypeData, Types};
