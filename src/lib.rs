pub mod alias;
pub mod audit;
pub mod authority;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod merge;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod provenance;
pub mod table;
