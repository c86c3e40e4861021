pub mod astro;
pub mod openai;
pub mod prokerala;

pub use astro::{AstroProvider, ScriptedAstro};
pub use openai::{ChatModel, ChatTurn, OpenAiChat, ScriptedChat};
pub use prokerala::{ProkeralaClient, UpstreamError};
