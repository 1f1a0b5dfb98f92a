pub mod crawler;
pub mod transport;

pub use crawler::{CrawlResult, Crawler};
pub use transport::ReqwestTransport;
