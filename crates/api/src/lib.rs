//! External collaborators: off-chain price feeds, swap quoting, notification.
//!
//! Everything in this crate talks to a service the agent does not control.
//! Feed connectors push into channels and reconnect on their own; the quoter
//! and notifier sit behind traits so the core can be tested against scripted
//! doubles.

mod binance;
mod feed;
mod notifier;
mod pyth;
mod quoter;

pub use binance::BinanceFeed;
pub use feed::{FeedError, FeedEvent, PriceSource};
pub use notifier::{Notifier, NullNotifier, WebhookNotifier};
pub use pyth::PythFeed;
pub use quoter::{OneInchQuoter, QuoteRequest, QuoterError, SwapQuote, SwapQuoter};
