pub mod block;
pub mod script;
pub mod sprite;
pub mod timing;
