pub mod daily_pnl;
pub mod event;
pub mod trade;

pub use daily_pnl::*;
pub use event::*;
pub use trade::*;
