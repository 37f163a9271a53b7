//! Indexer client, restriction normaliser, store object table (row
//! engine) and search folder engine — the components that keep search
//! folders materialised against a live store (§4.2–§4.5).

pub mod engine;
pub mod indexer_client;
pub mod normalizer;
pub mod retry;
pub mod row_engine;
pub mod xml;

pub use engine::{SearchCriteria, SearchEngine, SearchFolderState};
pub use indexer_client::{IndexedTerm, IndexerClient, LineTransport, UnixSocketTransport};
pub use normalizer::{normalize_restriction, IndexTerm, Normalized};
pub use retry::{retry_on_deadlock, RetryOutcome};
pub use row_engine::{category_row, mvi_expand, query_rows, with_folder_lock, Row};
pub use xml::SearchCriteria as SearchCriteriaXml;
