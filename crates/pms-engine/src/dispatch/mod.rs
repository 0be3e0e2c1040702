mod channel;
mod dispatcher;

pub use channel::{signal_channel, ChannelSignalQueue, SignalReceiver};
pub use dispatcher::{Dispatcher, DispatcherOptions};
