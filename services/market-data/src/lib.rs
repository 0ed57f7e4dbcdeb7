//! Market data gateway: wire types, collaborator traits and the HTTP
//! clients for the quote, option chain, indicator, clock and brokerage
//! providers.

pub mod types;
pub mod sources {
    pub(crate) mod health;
    pub mod alpaca;
    pub mod tradier;
    pub mod twelvedata;
}

pub use types::*;
pub use sources::alpaca::AlpacaClient;
pub use sources::tradier::TradierClient;
pub use sources::twelvedata::TwelveDataClient;
