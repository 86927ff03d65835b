//! Plain value types shared across the cover resolver.

mod book;
mod descriptor;
mod event;
mod provenance;
mod provider;

pub use book::{Book, Fingerprint};
pub use descriptor::{ImageDescriptor, PLACEHOLDER_PATH};
pub use event::BookCoverUpdatedEvent;
pub use provenance::{AttemptOutcome, AttemptedSource, ProvenanceRecord, SelectedImage};
pub use provider::{ProviderId, ResolutionTier, Storage};
