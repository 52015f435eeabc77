pub mod aggregate;
pub mod builder;
pub mod linker;
pub mod matcher;
pub mod roster;
pub mod store;
