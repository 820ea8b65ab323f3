//! Text protocol
//!
//! Decoding runs in three passes: [`token::tokenize`] produces a flat token
//! stream, [`nest::nest`] turns it into a step tree, and [`decode::reduce`]
//! builds the command. Encoding is a single pass in [`encode`].

pub mod decode;
pub mod encode;
pub mod nest;
pub mod token;
