pub mod roster;
pub mod segment;
pub mod session;

pub use roster::{Candidate, Contact, Customer};
pub use segment::{KeyValue, Segment};
pub use session::{duration_minutes, Session, SessionStatus, SCHEMA_VERSION};
