#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod http;
pub mod queue;
pub mod results;
pub mod session;
pub mod transaction;

pub mod model {
    pub use oxrdf::*;
}

pub mod protocol {
    pub use rdf_fusion_protocol::*;
}

pub use config::{ConfigError, ParserConfig, SessionConfig};
pub use rdf_fusion_protocol::{ProtocolError, ProtocolResult};
pub use session::ProtocolSession;
