use thiserror::Error;

/// Universal error type for the crate
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A structural invariant of the graph or schedule was violated.
    ///
    /// These are not recoverable: the graph is in an inconsistent state and
    /// the dump is attached for post-mortem debugging.
    #[error("internal invariant broken at node %{node}: {what}\n{dump}")]
    Internal {
        node: usize,
        what: &'static str,
        dump: String,
    },
}
