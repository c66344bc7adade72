//! Page and feed extraction.
//!
//! Everything in here is pure: each function takes a document (and, where
//! needed, the source it came from) and returns extracted data without
//! touching the network or the data directory.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`html`] | `clean_html`, title and publication-date lookup |
//! | [`content`] | main-content container selection, sub-page links |
//! | [`links`] | article links on listing pages, date-window heuristic |
//! | [`feed`] | RSS/Atom items |

pub mod content;
pub mod feed;
pub mod html;
pub mod links;
