pub mod archive;
pub mod assets;
pub mod book;
pub mod catalog;
pub mod config;
pub mod error;
pub mod helpcenter;
pub mod html;
pub mod ledger;
pub mod links;
pub mod logging;
pub mod reconcile;
pub mod runtime;
pub mod storage;
pub mod sync;
pub mod toc;

#[cfg(test)]
mod test_support;
