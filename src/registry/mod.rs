//! Symbol Registry and Schedule Registry (spec.md §4.6, §4.4 consumers).

pub mod schedule;
pub mod symbol;

pub use schedule::ScheduleRegistry;
pub use symbol::SymbolRegistry;
