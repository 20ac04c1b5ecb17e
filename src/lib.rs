pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod upstream;

pub use config::ProxyConfig;
pub use error::{ConvertError, ProxyError, Result};
pub use proxy::Proxy;
pub use server::{build_router, AppState};
pub use translate::{Converter, Dialect};
pub use upstream::{HttpUpstream, Upstream};
