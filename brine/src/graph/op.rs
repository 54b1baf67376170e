//! Operator tags for graph nodes
use crate::types::{Ty, Types};

/// Comparison flavor carried by [`Op::Bool`]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BoolOp {
    Eq,
    Lt,
    Le,
}

impl BoolOp {
    pub fn str(&self) -> &'static str {
        match self {
            BoolOp::Eq => "==",
            BoolOp::Lt => "<",
            BoolOp::Le => "<=",
        }
    }

    pub(crate) fn apply(&self, x: i64, y: i64) -> bool {
        match self {
            BoolOp::Eq => x == y,
            BoolOp::Lt => x < y,
            BoolOp::Le => x <= y,
        }
    }
}

/// Field access payload for [`Op::Load`] and [`Op::Store`].
///
/// The alias class is the one assigned to the field at struct declaration;
/// two accesses on different alias classes can never touch the same storage.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MemOp {
    pub name: Box<str>,
    pub alias: u32,
    pub declared: Ty,
}

impl MemOp {
    /// Build the access payload for a named field of a struct type
    pub fn field(types: &Types, obj: Ty, name: &str) -> Option<MemOp> {
        let f = types.field(obj, name)?;
        Some(MemOp {
            name: f.name.clone(),
            alias: f.alias,
            declared: f.ty,
        })
    }
}

/// The closed set of node operators.
///
/// Input slot conventions, with slot 0 reserved for control (or a gap until
/// scheduling fills it in):
///
/// | op        | inputs                          |
/// |-----------|---------------------------------|
/// | `Start`   | none                            |
/// | `Stop`    | every `Return`                  |
/// | `Return`  | ctrl, expr, mem...              |
/// | `Constant`| start                           |
/// | `Region`  | gap, ctrl...                    |
/// | `Loop`    | gap, entry, backedge            |
/// | `If`      | ctrl, pred                      |
/// | `Never`   | ctrl, kept-alive loop phis...   |
/// | `Phi`     | region, value per region input  |
/// | binops    | gap, lhs, rhs                   |
/// | `New`     | ctrl                            |
/// | `Load`    | gap, mem, ptr                   |
/// | `Store`   | gap, mem, ptr, value            |
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Op {
    Start,
    Stop,
    Return,
    Constant(Ty),
    Region,
    Loop,
    If,
    /// An If that never takes its exit; used to give infinite loops a path
    /// to Stop so they can be scheduled
    Never,
    CProj(u32),
    Proj(u32),
    Phi(Box<str>),
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    /// Logical right shift
    Shr,
    /// Arithmetic right shift
    Sar,
    Minus,
    Not,
    Bool(BoolOp),
    New(Ty),
    Load(MemOp),
    Store(MemOp),
}

impl Op {
    pub fn label(&self) -> String {
        match self {
            Op::Start => "Start".to_string(),
            Op::Stop => "Stop".to_string(),
            Op::Return => "Return".to_string(),
            Op::Constant(_) => "Con".to_string(),
            Op::Region => "Region".to_string(),
            Op::Loop => "Loop".to_string(),
            Op::If => "If".to_string(),
            Op::Never => "Never".to_string(),
            Op::CProj(i) => format!("CProj{i}"),
            Op::Proj(i) => format!("Proj{i}"),
            Op::Phi(l) => format!("Phi_{l}"),
            Op::Add => "Add".to_string(),
            Op::Sub => "Sub".to_string(),
            Op::Mul => "Mul".to_string(),
            Op::Div => "Div".to_string(),
            Op::And => "And".to_string(),
            Op::Or => "Or".to_string(),
            Op::Xor => "Xor".to_string(),
            Op::Shl => "Shl".to_string(),
            Op::Shr => "Shr".to_string(),
            Op::Sar => "Sar".to_string(),
            Op::Minus => "Minus".to_string(),
            Op::Not => "Not".to_string(),
            Op::Bool(b) => format!("Bool{}", b.str()),
            Op::New(_) => "New".to_string(),
            Op::Load(mo) => format!("Load_{}", mo.name),
            Op::Store(mo) => format!("Store_{}", mo.name),
        }
    }

    /// Part of the control flow graph
    pub fn is_cfg(&self) -> bool {
        matches!(
            self,
            Op::Start
                | Op::Stop
                | Op::Return
                | Op::Region
                | Op::Loop
                | Op::If
                | Op::Never
                | Op::CProj(_)
        )
    }

    /// Starts a basic block in the scheduled form
    pub fn is_block_head(&self) -> bool {
        matches!(self, Op::Start | Op::Region | Op::Loop | Op::CProj(_))
    }

    /// Ends a basic block; data never schedules onto these
    pub fn is_block_tail(&self) -> bool {
        matches!(self, Op::If | Op::Never)
    }

    /// Pinned nodes never move from the control they were built with
    pub fn is_pinned(&self) -> bool {
        self.is_cfg()
            || matches!(
                self,
                Op::Phi(_) | Op::Proj(_) | Op::Constant(_) | Op::New(_)
            )
    }

    /// Produces a memory slice
    pub fn is_mem(&self) -> bool {
        matches!(self, Op::Store(_))
    }
}
