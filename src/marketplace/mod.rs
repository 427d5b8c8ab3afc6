//! Marketplace API access: the page fetcher seam, its Takealot implementation,
//! retry policy and outbound proxy rotation.

pub mod proxy;
pub mod retry;
pub mod takealot;
pub mod trait_;

pub use proxy::{ProxyError, ProxyPool};
pub use retry::RetryPolicy;
pub use takealot::TakealotClient;
pub use trait_::{DateWindow, FetchError, Page, PageFetcher, PageRequest};
