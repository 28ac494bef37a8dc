pub mod archive;
pub mod audit;
pub mod clock;
pub mod config;
pub mod convert;
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod join;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod util;
