pub mod calculator;
pub mod query;
pub mod set;

pub use calculator::{ContextCalculator, StaticContextCalculator};
pub use query::{QueryFlags, QueryMode, QueryOptions};
pub use set::{Context, ContextSatisfyMode, ContextSet, SERVER_KEY, WORLD_KEY};
