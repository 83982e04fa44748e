pub mod http_provider;
pub mod replay;
pub mod synthetic;

pub use http_provider::HttpMarketDataProvider;
pub use replay::ReplayMarketDataProvider;
pub use synthetic::SyntheticMarketDataProvider;
