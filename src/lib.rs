#![deny(warnings, clippy::all, clippy::pedantic)]
#![allow(
    // Acceptable for trait naming consistency (e.g., SerpDao, SerpDaoImpl)
    clippy::module_name_repetitions,

    // Required for score math: integer counts feed f64 ratios
    clippy::cast_precision_loss,

    // Necessary for batch sizing and pagination: usize ↔ i32/i64
    clippy::cast_possible_truncation,

    // Required for signed/unsigned conversions in database queries
    clippy::cast_possible_wrap,

    // Domain logic often requires helper declarations mid-function for readability
    clippy::items_after_statements,

    // Error context via anyhow::Context already provides sufficient documentation
    clippy::missing_errors_doc,

    // Panic paths are defensive (e.g., mutex poisoning), not part of normal flow
    clippy::missing_panics_doc,

    // Technical identifiers (e.g., SERP, DSI, CTR) don't need markdown formatting
    clippy::doc_markdown,

    // Named format args reduce readability for long messages with many placeholders
    clippy::uninlined_format_args,

    // if-let-else patterns are clearer than map_or for error handling flows
    clippy::option_if_let_else,

    // Pass-by-value necessary for async trait methods (Arc, Config types)
    clippy::needless_pass_by_value,

    // Too noisy: many utility methods return useful values but aren't always used
    clippy::must_use_candidate,

    // Nested conditions improve readability when branches are semantically distinct
    clippy::collapsible_if
)]

pub(crate) mod api;
pub mod app;
pub mod clients;
pub mod config;
pub(crate) mod dsi;
pub(crate) mod enrich;
pub mod observability;
pub mod pipeline;
pub(crate) mod queue;
pub(crate) mod robustness;
pub(crate) mod scheduler;
pub(crate) mod scrape;
pub(crate) mod serp;
pub mod store;
pub mod util;
