//! GPT-2 decoder stack packaged as a framework submodule.
//!
//! [`Gpt2`] chains independently initialised [`DecoderBlock`]s and a final
//! LayerNorm over `[batch, seq, hidden]` features. Incremental decoding state
//! is an [`attention::KvCache`] the caller threads through
//! [`SubModule::forward`].

pub mod block;
pub mod config;
pub mod errors;
pub mod model;
pub mod submodule;

pub use block::DecoderBlock;
pub use config::{Gpt2Args, ModelConfig};
pub use errors::{ModelError, Result};
pub use model::Gpt2;
pub use submodule::SubModule;
