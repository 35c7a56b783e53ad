pub mod params;
pub mod schema;

pub use params::{redact, ParamDef, Params};
pub use schema::{Config, ImapSource, Source};
