#[macro_use]
mod ident;

pub mod driver;
pub mod flow;
pub mod packet;
pub mod queue;
pub mod routing;
pub mod switch;
pub mod time;
pub mod topology;
pub mod units;

pub(crate) mod data;
pub(crate) mod entities;
pub(crate) mod simulation;

pub use data::{Output, QueueRecord, Record};
pub use driver::{run, Config, Error};
pub use flow::{FlowDesc, FlowId, FlowKey};
pub use routing::PathPolicy;
