//! # Repository Module
//!
//! SQL access for the entry store. All statements live here; the stores only
//! decide *when* to call them.
//!
//! - [`EntryRepository`](entries::EntryRepository) - `offline_entries` rows

pub mod entries;
