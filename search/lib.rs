#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod candidates;
pub mod dispatch;
pub mod embed;
pub mod options;
pub mod pipeline;
pub mod progress;
pub mod standardize;
pub mod types;
pub mod verify;

#[path = "../linalg/mod.rs"]
pub mod linalg;

pub use dispatch::{Dispatcher, RayonDispatcher, SequentialDispatcher};
pub use embed::RestartState;
pub use options::{ConfigError, FilterMode, SearchOptions};
pub use pipeline::{SearchInput, thresholded_correlation, thresholded_correlation_with};
pub use types::{Match, Query, SearchError, SearchResult};
