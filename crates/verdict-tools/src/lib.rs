pub mod http;
pub mod registry;

pub use http::HttpToolTransport;
pub use registry::ToolRegistry;
