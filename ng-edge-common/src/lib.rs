pub mod event;
pub mod logger;

pub use event::EdgeEventBus;
pub use logger::Logger;
