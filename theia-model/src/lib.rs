//! Event model and framed wire codec shared by every Theia component.
//!
//! This crate has no knowledge of storage or transport: it defines the
//! [`Event`] record, the byte-counted framing used to put one on the wire or
//! on disk (see [`codec`]), and the match predicate ([`Criteria`]) shared by
//! the live subscriber and the historical search path.

pub mod codec;
pub mod criteria;
pub mod error;
pub mod event;

pub use codec::{EventParser, EventSerializer};
pub use criteria::{Criteria, CriteriaError};
pub use error::{CodecError, Result};
pub use event::Event;
