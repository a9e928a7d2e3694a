pub mod fileset;
pub mod filter;
pub mod manifest;
pub mod merge;
pub mod pipeline;
pub mod toolkit;
pub mod transfer;
pub mod workspace;
