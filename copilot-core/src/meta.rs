pub const NAME: &str = "copilot-widget";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
