//! The two AI-side services: the annotator that captions and tags freshly
//! uploaded images, and the chatbot that answers prompts about one image.

mod annotator;
mod chatbot;

pub use annotator::{Annotator, HttpAnnotator};
pub use chatbot::{ChatPrompt, ChatService, HttpChatbot};
