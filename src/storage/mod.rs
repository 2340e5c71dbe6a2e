//!  Storage of work sessions is organized through [session_store::SessionStore].
//!  The basic idea is:
//!   - Every session is a record keyed by a surrogate id handed out on insert.
//!   - Records are looked up either by id or by the day they started on.
//!   - Records are only ever replaced whole, never patched in place.

pub mod entities;
pub mod error;
pub mod session_store;
