//! # litroute-zotero
//!
//! Async client for the [Zotero Web API v3](https://www.zotero.org/support/dev/web_api/v3/start).
//!
//! This crate provides:
//! - Paginated reads of top-level items in a collection or in the whole library
//! - Single item, children and collection lookups
//! - Full-text index access for attachments
//! - Version-guarded writes (`If-Unmodified-Since-Version`) for collections and tags
//! - Creation of linked-URL child attachments
//!
//! ## Example
//!
//! ```ignore
//! use litroute_zotero::{LibraryRef, Page, ZoteroClient};
//!
//! let client = ZoteroClient::new(LibraryRef::user("5452188"), Some(api_key))?;
//! let items = client.collection_items("2PSBFJEI", &Page::new(100, 0)).await?;
//!
//! for item in &items {
//!     println!("{} v{}: {}", item.key, item.version, item.data.title);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
pub mod types;

pub use client::{DEFAULT_BASE_URL, LibraryKind, LibraryRef, Page, ZoteroClient};
pub use error::{Error, Result};
pub use types::{Collection, Fulltext, Item, ItemData, ItemMeta, Tag};
