//! Collection scheduling: who to fetch next, and fetching them.

pub mod collector;
pub mod scorer;

pub use collector::Collector;
pub use scorer::{RankedAccount, ScoringSnapshot, prioritize};
