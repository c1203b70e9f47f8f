// Standard library glue over the runtime core.
pub mod basic;
pub mod package;
